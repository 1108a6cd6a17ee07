//! Convenience layer over the [`Broker`]: named serving, dialing, and
//! all-or-nothing construction.
//!
//! Every bridge component holds a [`BrokerExt`] — a cheap-to-clone handle
//! pairing the session broker with a naming context. Constructing a bridge
//! object is all-or-nothing: if step k of n fails, the resources allocated
//! by steps 1..k-1 are rolled back through [`BrokerExt::close_all`] before
//! the error is returned. Nothing here retries; retry policy belongs to the
//! caller.

use crate::broker::{Broker, BrokerConfig, ServiceId};
use crate::resource::{Closeable, Resource, Resources};
use futures::FutureExt;
use futures::future::BoxFuture;
use loopp_tonic_core::{Error, Result};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::codegen::Service;
use tonic::codegen::http::{Request, Response};
use tonic::server::NamedService;
use tonic::service::Routes;
use tonic::transport::{Channel, Endpoint, Server};

/// Collects the gRPC services and auxiliary resources registered by a
/// `serve`/`serve_new` callback.
#[derive(Default)]
pub struct ServiceRegistry {
    routes: Routes,
    deps: Resources,
}

impl ServiceRegistry {
    /// Adds a gRPC service to the server being constructed.
    pub fn add_service<S>(&mut self, svc: S) -> &mut Self
    where
        S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.routes = std::mem::take(&mut self.routes).add_service(svc);
        self
    }

    /// Adds an auxiliary resource produced during setup. It is closed with
    /// the server on success, or rolled back immediately if setup fails.
    pub fn add_dep(&mut self, resource: Resource) -> &mut Self {
        self.deps.push(resource);
        self
    }
}

/// A connection to a brokered service: either an established channel or a
/// lazy one resolved through a factory on first use.
///
/// Cloning is cheap; clones share the underlying (or pending) channel.
#[derive(Clone)]
pub struct ClientConn {
    name: String,
    id: Option<ServiceId>,
    inner: ConnInner,
}

#[derive(Clone)]
enum ConnInner {
    Ready(Channel),
    Lazy(Arc<LazyConn>),
}

type ConnFactory = Box<dyn Fn() -> BoxFuture<'static, Result<Channel>> + Send + Sync>;

struct LazyConn {
    cell: OnceCell<Channel>,
    factory: ConnFactory,
}

impl ClientConn {
    fn ready(name: String, id: ServiceId, channel: Channel) -> Self {
        Self {
            name,
            id: Some(id),
            inner: ConnInner::Ready(channel),
        }
    }

    fn lazy(name: String, factory: ConnFactory) -> Self {
        Self {
            name,
            id: None,
            inner: ConnInner::Lazy(Arc::new(LazyConn {
                cell: OnceCell::new(),
                factory,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The broker id this connection was dialed against, when known. A
    /// client shim built on an already-remote connection reports it here so
    /// composite bridges can proxy the id through instead of re-serving.
    pub fn service_id(&self) -> Option<ServiceId> {
        self.id
    }

    /// Returns the transport channel, establishing it on first use for lazy
    /// connections.
    pub async fn channel(&self) -> Result<Channel> {
        match &self.inner {
            ConnInner::Ready(channel) => Ok(channel.clone()),
            ConnInner::Lazy(lazy) => lazy
                .cell
                .get_or_try_init(|| (lazy.factory)())
                .await
                .cloned(),
        }
    }
}

#[tonic::async_trait]
impl Closeable for ClientConn {
    // Dropping the channel tears down the transport; remote-side cleanup is
    // each client's advisory Close RPC, not a connection-level concern.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A running gRPC server owned by a broker resource.
///
/// Closing cancels the accept loop, awaits the serve task, deregisters the
/// id, and closes any dependent resources absorbed at construction.
struct ServerHandle {
    name: String,
    id: ServiceId,
    broker: Arc<Broker>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<std::result::Result<(), tonic::transport::Error>>>>,
    deps: Mutex<Option<Resources>>,
}

#[tonic::async_trait]
impl Closeable for ServerHandle {
    async fn close(&self) -> Result<()> {
        self.token.cancel();
        let mut failures = Vec::new();
        if let Some(task) = self.task.lock().await.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => failures.push((self.name.clone(), err.to_string())),
                Err(err) => failures.push((self.name.clone(), format!("serve task: {err}"))),
            }
        }
        self.broker.deregister(self.id);
        if let Some(deps) = self.deps.lock().await.take() {
            if let Err(err) = deps.close_all().await {
                match err {
                    Error::Teardown {
                        failures: dep_failures,
                    } => failures.extend(dep_failures),
                    other => failures.push((self.name.clone(), other.to_string())),
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown { failures })
        }
    }
}

/// The broker plus naming context: the handle every shim is built from.
#[derive(Clone)]
pub struct BrokerExt {
    broker: Arc<Broker>,
    config: BrokerConfig,
}

impl BrokerExt {
    pub fn new(broker: Arc<Broker>, config: BrokerConfig) -> Self {
        Self { broker, config }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Derives a sub-context with a dotted name, e.g. `host.ExecProvider`.
    pub fn named(&self, sub: &str) -> Self {
        let mut config = self.config.clone();
        config.name = format!("{}.{}", config.name, sub);
        Self {
            broker: Arc::clone(&self.broker),
            config,
        }
    }

    /// Registers the services added by `register` under a freshly allocated
    /// id and starts serving them on an ephemeral loopback listener.
    ///
    /// The returned [`Resource`] owns the server: closing it stops the
    /// accept loop and deregisters the id.
    pub async fn serve<F>(&self, name: &str, register: F) -> Result<(ServiceId, Resource)>
    where
        F: FnOnce(&mut ServiceRegistry),
    {
        self.serve_new(
            name,
            |registry| {
                register(registry);
                Ok(())
            },
            Resources::new(),
        )
        .await
    }

    /// Like [`serve`](Self::serve), but the setup callback may fail and may
    /// itself produce auxiliary resources.
    ///
    /// On any failure — setup, listener binding, registration, or peer
    /// announcement — everything accumulated so far, *including* the `deps`
    /// passed in, is closed before the error (which names the failing step)
    /// is returned. On success the deps are absorbed into the returned
    /// server resource, so closing the server closes them too.
    pub async fn serve_new<F>(
        &self,
        name: &str,
        setup: F,
        mut deps: Resources,
    ) -> Result<(ServiceId, Resource)>
    where
        F: FnOnce(&mut ServiceRegistry) -> Result<()>,
    {
        let full_name = format!("{}.{}", self.config.name, name);

        let mut registry = ServiceRegistry::default();
        if let Err(err) = setup(&mut registry) {
            deps.absorb(registry.deps);
            let _ = self.close_all(deps).await;
            return Err(Error::serve(format!("setup {full_name}: {err}")));
        }
        deps.absorb(registry.deps);

        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(err) => {
                let _ = self.close_all(deps).await;
                return Err(Error::serve(format!("bind {full_name}: {err}")));
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                let _ = self.close_all(deps).await;
                return Err(Error::serve(format!("local addr {full_name}: {err}")));
            }
        };

        let token = self.broker.child_token();
        let incoming = TcpListenerStream::new(listener);
        let shutdown = token.clone().cancelled_owned();
        let task = tokio::spawn(
            Server::builder()
                .add_routes(registry.routes)
                .serve_with_incoming_shutdown(incoming, shutdown),
        );

        let id = match self.broker.register(&full_name, addr).await {
            Ok(id) => id,
            Err(err) => {
                token.cancel();
                let _ = task.await;
                let _ = self.close_all(deps).await;
                return Err(err);
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(service = %full_name, id = id.0, %addr, "serving");

        let resource = Resource::new(
            full_name.clone(),
            ServerHandle {
                name: full_name,
                id,
                broker: Arc::clone(&self.broker),
                token,
                task: Mutex::new(Some(task)),
                deps: Mutex::new(Some(deps)),
            },
        );
        Ok((id, resource))
    }

    /// Opens a connection to a previously registered service id.
    ///
    /// An unregistered id fails immediately with [`Error::Dial`]; a
    /// registered but unreachable target fails once the connection attempt
    /// is refused. Neither case blocks indefinitely.
    pub async fn dial(&self, id: ServiceId) -> Result<ClientConn> {
        let Some((name, addr)) = self.broker.lookup(id) else {
            return Err(Error::Dial {
                name: self.config.name.clone(),
                id: id.0,
            });
        };
        let endpoint = Endpoint::from_shared(format!("http://{addr}")).map_err(|err| {
            Error::serve(format!("endpoint for {name} (id {id}): {err}"))
        })?;
        let channel = endpoint.connect().await.map_err(|_err| {
            #[cfg(feature = "tracing")]
            tracing::warn!(service = %name, id = id.0, error = %_err, "dial failed");
            Error::Dial {
                name: name.clone(),
                id: id.0,
            }
        })?;
        Ok(ClientConn::ready(name, id, channel))
    }

    /// Creates a connection that resolves its target lazily: the factory
    /// runs on first use to produce the service id, which is then dialed.
    /// Used when the remote side of a method is only created on first use
    /// rather than eagerly.
    pub fn new_client_conn<F, Fut>(&self, name: &str, factory: F) -> ClientConn
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServiceId>> + Send + 'static,
    {
        let full_name = format!("{}.{}", self.config.name, name);
        let ext = self.clone();
        ClientConn::lazy(
            full_name,
            Box::new(move || {
                let ext = ext.clone();
                let id = factory();
                async move {
                    let id = id.await?;
                    let conn = ext.dial(id).await?;
                    conn.channel().await
                }
                .boxed()
            }),
        )
    }

    /// Closes every resource, never stopping early; failures are logged and
    /// aggregated into the returned error.
    pub async fn close_all(&self, resources: Resources) -> Result<()> {
        match resources.close_all().await {
            Ok(()) => Ok(()),
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(context = %self.config.name, error = %err, "teardown reported failures");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::IdParity;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn ext() -> BrokerExt {
        BrokerExt::new(
            Arc::new(Broker::new(IdParity::Odd)),
            BrokerConfig::new("test"),
        )
    }

    struct FlagCloser(Arc<AtomicBool>);

    #[tonic::async_trait]
    impl Closeable for FlagCloser {
        async fn close(&self) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dial_of_unregistered_id_fails_immediately() {
        let ext = ext();
        let err = ext.dial(ServiceId(99)).await.err().expect("expected an error");
        match err {
            Error::Dial { id, .. } => assert_eq!(id, 99),
            other => panic!("expected dial error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn serve_twice_with_same_name_yields_distinct_ids() {
        let ext = ext();
        let (a, res_a) = ext.serve("reader", |_| {}).await.unwrap();
        let (b, res_b) = ext.serve("reader", |_| {}).await.unwrap();
        assert_ne!(a, b);
        res_a.close().await.unwrap();
        res_b.close().await.unwrap();
    }

    #[tokio::test]
    async fn serve_then_dial_connects() {
        let ext = ext();
        let (id, resource) = ext.serve("empty", |_| {}).await.unwrap();
        let conn = ext.dial(id).await.unwrap();
        assert_eq!(conn.service_id(), Some(id));
        conn.channel().await.unwrap();
        resource.close().await.unwrap();
        // Closing deregisters: the id is no longer dialable.
        let err = ext.dial(id).await.err().expect("expected an error");
        assert!(matches!(err, Error::Dial { .. }));
    }

    #[tokio::test]
    async fn serve_new_failure_closes_deps_before_returning() {
        let ext = ext();
        let closed = Arc::new(AtomicBool::new(false));
        let mut deps = Resources::new();
        deps.push(Resource::new("dep", FlagCloser(Arc::clone(&closed))));

        let err = ext
            .serve_new(
                "broken",
                |_| Err(Error::serve("sub-provider lookup failed")),
                deps,
            )
            .await
            .unwrap_err();

        assert!(closed.load(Ordering::SeqCst));
        assert!(err.to_string().contains("test.broken"));
    }

    #[tokio::test]
    async fn serve_after_broker_close_fails_and_rolls_back() {
        let ext = ext();
        ext.broker().close();
        let closed = Arc::new(AtomicBool::new(false));
        let mut deps = Resources::new();
        deps.push(Resource::new("dep", FlagCloser(Arc::clone(&closed))));

        let err = ext.serve_new("late", |_| Ok(()), deps).await.unwrap_err();
        assert!(matches!(err, Error::BrokerClosed));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn lazy_conn_runs_its_factory_once() {
        let ext = ext();
        let (id, resource) = ext.serve("lazy-target", |_| {}).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let conn = ext.new_client_conn("lazy", move || {
            counted.fetch_add(1, Ordering::SeqCst);
            let id = id;
            async move { Ok(id) }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        conn.channel().await.unwrap();
        conn.channel().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        resource.close().await.unwrap();
    }
}
