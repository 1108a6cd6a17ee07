//! Session-wide registry of brokered gRPC services.
//!
//! One [`Broker`] is shared by every bridge component spawned from a single
//! plugin-bridge session. It owns the service-id space: ids are allocated
//! when a server is registered and are unique for the broker's lifetime.
//!
//! When a session spans two processes, each side runs its own broker and the
//! two are linked as peers: every successful registration is announced over
//! the [`BrokerPeer`](loopp_tonic_core::proto::broker_peer_server) control
//! service so the other side can dial the id back. The two brokers allocate
//! from opposite halves of the id space (see [`IdParity`]) so locally
//! assigned ids never collide with announced ones.

use crate::resource::Closeable;
use loopp_tonic_core::{Error, Result, proto};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

/// Opaque identifier for a brokered service.
///
/// Assigned by the broker at registration; carries no meaning beyond
/// uniqueness within the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u32);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which half of the id space this broker allocates from.
///
/// The host side of a session conventionally takes `Odd` and the plugin
/// side `Even`; a session confined to one process can share a single broker
/// and ignore parity entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdParity {
    #[default]
    Odd,
    Even,
}

impl IdParity {
    fn first(self) -> u32 {
        match self {
            Self::Odd => 1,
            Self::Even => 2,
        }
    }
}

/// Naming/logging context for one side of a bridge session.
///
/// Explicitly passed to every constructor; never global state.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Diagnostic name for this side of the session (e.g. `"host"`).
    pub name: String,
}

impl BrokerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone)]
struct RegisteredEndpoint {
    name: String,
    addr: SocketAddr,
}

type PeerClient = proto::broker_peer_client::BrokerPeerClient<Channel>;

/// Shared registry assigning opaque ids to served gRPC endpoints within one
/// session.
///
/// The endpoint table is the only shared mutable structure in the bridge;
/// it is mutex-guarded and safe under concurrent `serve`/`dial` calls.
pub struct Broker {
    next_id: AtomicU32,
    endpoints: Mutex<HashMap<ServiceId, RegisteredEndpoint>>,
    shutdown: CancellationToken,
    peer: Mutex<Option<PeerClient>>,
}

impl Broker {
    pub fn new(parity: IdParity) -> Self {
        Self {
            next_id: AtomicU32::new(parity.first()),
            endpoints: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            peer: Mutex::new(None),
        }
    }

    /// Links this broker to the peer process's announce service. Set the
    /// peer before serving anything that the other side needs to dial.
    pub fn set_peer(&self, client: PeerClient) {
        *self.peer.lock().expect("broker peer lock poisoned") = Some(client);
    }

    /// Records a service served by the peer process, making it dialable
    /// from this side.
    pub fn insert_remote(&self, id: ServiceId, name: impl Into<String>, addr: SocketAddr) {
        self.endpoints
            .lock()
            .expect("broker endpoint lock poisoned")
            .insert(
                id,
                RegisteredEndpoint {
                    name: name.into(),
                    addr,
                },
            );
    }

    /// Allocates a fresh id for a locally served endpoint and announces it
    /// to the peer, if one is linked.
    ///
    /// Fails with [`Error::BrokerClosed`] once [`close`](Self::close) has
    /// been called. An announce failure rolls the registration back.
    pub(crate) async fn register(&self, name: &str, addr: SocketAddr) -> Result<ServiceId> {
        if self.shutdown.is_cancelled() {
            return Err(Error::BrokerClosed);
        }
        let id = ServiceId(self.next_id.fetch_add(2, Ordering::Relaxed));
        self.endpoints
            .lock()
            .expect("broker endpoint lock poisoned")
            .insert(
                id,
                RegisteredEndpoint {
                    name: name.to_string(),
                    addr,
                },
            );

        let peer = self
            .peer
            .lock()
            .expect("broker peer lock poisoned")
            .clone();
        if let Some(mut peer) = peer {
            let announce = proto::AnnounceRequest {
                service_id: id.0,
                address: addr.to_string(),
                name: name.to_string(),
            };
            if let Err(status) = peer.announce(announce).await {
                self.deregister(id);
                return Err(Error::serve(format!("announce {name} (id {id}): {status}")));
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(service = name, id = id.0, %addr, "registered brokered service");
        Ok(id)
    }

    pub(crate) fn deregister(&self, id: ServiceId) {
        self.endpoints
            .lock()
            .expect("broker endpoint lock poisoned")
            .remove(&id);
    }

    pub(crate) fn lookup(&self, id: ServiceId) -> Option<(String, SocketAddr)> {
        self.endpoints
            .lock()
            .expect("broker endpoint lock poisoned")
            .get(&id)
            .map(|ep| (ep.name.clone(), ep.addr))
    }

    /// Number of currently registered endpoints. Diagnostic only.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints
            .lock()
            .expect("broker endpoint lock poisoned")
            .len()
    }

    /// Token cancelled when the broker shuts down; every server spawned
    /// through this broker stops serving when it fires.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shuts the broker down: refuses further registrations and stops every
    /// server spawned through it. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("endpoints", &self.endpoint_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Server half of the peer-announce control service.
///
/// Each side of a cross-process session serves this alongside its main
/// bridge services; announcements land in the local broker's endpoint
/// table.
pub struct BrokerPeerServer {
    broker: std::sync::Arc<Broker>,
}

impl BrokerPeerServer {
    pub fn new(broker: std::sync::Arc<Broker>) -> Self {
        Self { broker }
    }

    pub fn into_service(self) -> proto::broker_peer_server::BrokerPeerServer<Self> {
        proto::broker_peer_server::BrokerPeerServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::broker_peer_server::BrokerPeer for BrokerPeerServer {
    async fn announce(
        &self,
        request: Request<proto::AnnounceRequest>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        let req = request.into_inner();
        let addr: SocketAddr = req
            .address
            .parse()
            .map_err(|err| Error::invalid_value("address", format!("{}: {err}", req.address)))?;
        self.broker
            .insert_remote(ServiceId(req.service_id), req.name, addr);
        Ok(Response::new(proto::Empty {}))
    }
}

#[tonic::async_trait]
impl Closeable for Broker {
    async fn close(&self) -> Result<()> {
        Broker::close(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_addr() -> SocketAddr {
        "127.0.0.1:4100".parse().unwrap()
    }

    #[tokio::test]
    async fn sequential_registrations_yield_distinct_ids() {
        let broker = Broker::new(IdParity::Odd);
        let a = broker.register("reader", any_addr()).await.unwrap();
        let b = broker.register("reader", any_addr()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn parity_partitions_the_id_space() {
        let host = Broker::new(IdParity::Odd);
        let plugin = Broker::new(IdParity::Even);
        for _ in 0..8 {
            let h = host.register("h", any_addr()).await.unwrap();
            let p = plugin.register("p", any_addr()).await.unwrap();
            assert_eq!(h.0 % 2, 1);
            assert_eq!(p.0 % 2, 0);
        }
    }

    #[tokio::test]
    async fn closed_broker_refuses_registration() {
        let broker = Broker::new(IdParity::Odd);
        broker.close();
        let err = broker.register("late", any_addr()).await.unwrap_err();
        assert!(matches!(err, Error::BrokerClosed));
    }

    #[tokio::test]
    async fn deregister_removes_the_endpoint() {
        let broker = Broker::new(IdParity::Odd);
        let id = broker.register("reader", any_addr()).await.unwrap();
        assert!(broker.lookup(id).is_some());
        broker.deregister(id);
        assert!(broker.lookup(id).is_none());
        assert_eq!(broker.endpoint_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_registrations_never_collide() {
        let broker = std::sync::Arc::new(Broker::new(IdParity::Odd));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let broker = std::sync::Arc::clone(&broker);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..16 {
                    ids.push(broker.register("svc", any_addr()).await.unwrap());
                }
                ids
            }));
        }
        let mut all = std::collections::HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 8 * 16);
    }

    #[test]
    fn remote_endpoints_are_dialable_by_announced_id() {
        let broker = Broker::new(IdParity::Odd);
        broker.insert_remote(ServiceId(42), "peer.factory", any_addr());
        let (name, addr) = broker.lookup(ServiceId(42)).unwrap();
        assert_eq!(name, "peer.factory");
        assert_eq!(addr, any_addr());
    }
}
