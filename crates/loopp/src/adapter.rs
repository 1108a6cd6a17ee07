//! The Factory/Adapter bridge: composite construction across the process
//! boundary.
//!
//! Building an execution factory is not a single RPC. The host must first
//! expose its local provider capabilities as brokered services (so the
//! plugin can call back into them), then invoke the remote factory
//! construction with the provider's id, then wrap the returned id as a
//! factory client. Each step depends on the previous one's output, so the
//! sequence is strictly ordered — and any failure tears down everything
//! accumulated so far before the error is returned.

use crate::broker::ServiceId;
use crate::ext::{BrokerExt, ClientConn};
use crate::resource::{DepSet, Resource, Resources};
use crate::shims::{
    CommitStoreReaderServer, ExecProviderClient, OffRampReaderServer, OnRampReaderServer,
    PriceGetterServer, ReportingPluginFactoryClient, ReportingPluginFactoryServer,
};
use crate::types::{ExecProvider, ExecutionFactoryGenerator, ReportingPluginFactory};
use loopp_tonic_core::{Error, Result, proto};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

type Grpc = proto::execution_factory_generator_client::ExecutionFactoryGeneratorClient<Channel>;

/// Host-side bridge to a remote [`ExecutionFactoryGenerator`].
pub struct ExecutionAdapterClient {
    conn: ClientConn,
    ext: BrokerExt,
}

impl ExecutionAdapterClient {
    pub fn new(conn: ClientConn, ext: BrokerExt) -> Self {
        Self { conn, ext }
    }

    async fn grpc(&self) -> Result<Grpc> {
        Ok(Grpc::new(self.conn.channel().await?))
    }

    /// Constructs a remote execution factory, returning it together with
    /// every resource allocated along the way.
    ///
    /// The caller owns the returned [`Resources`] and is expected to close
    /// them (or hand them to the factory via
    /// [`ReportingPluginFactoryClient::absorb`]) when the factory is done.
    /// If any step fails, everything already allocated is closed before the
    /// error is returned: no resource is ever left both unreturned and
    /// unclosed.
    pub async fn new_execution_factory_with_resources(
        &self,
        provider: Arc<dyn ExecProvider>,
    ) -> Result<(ReportingPluginFactoryClient, Resources)> {
        let mut resources = Resources::new();

        // Step 1: a provider that is already a remote proxy is passed
        // through by id; a local one is served as a fresh brokered service.
        let provider_id = match provider.as_remote() {
            Some(id) => id,
            None => {
                let (id, server_res) = self
                    .ext
                    .serve_new(
                        "ExecProvider",
                        |registry| {
                            registry
                                .add_service(
                                    CommitStoreReaderServer::new(provider.commit_store_reader())
                                        .into_service(),
                                )
                                .add_service(
                                    OffRampReaderServer::new(provider.offramp_reader())
                                        .into_service(),
                                )
                                .add_service(
                                    OnRampReaderServer::new(provider.onramp_reader())
                                        .into_service(),
                                )
                                .add_service(
                                    PriceGetterServer::new(provider.price_getter())
                                        .into_service(),
                                );
                            Ok(())
                        },
                        Resources::new(),
                    )
                    .await?;
                resources.push(server_res);
                id
            }
        };

        // Step 2: remote factory construction against the provider id.
        let request = proto::NewExecutionFactoryRequest {
            provider_service_id: provider_id.0,
        };
        let reply = match self.grpc().await {
            Ok(mut grpc) => match grpc.new_execution_factory(request).await {
                Ok(reply) => reply.into_inner(),
                Err(status) => {
                    let _ = self.ext.close_all(resources).await;
                    return Err(Error::from(status));
                }
            },
            Err(err) => {
                let _ = self.ext.close_all(resources).await;
                return Err(err);
            }
        };

        // Step 3: wrap the produced factory id.
        let factory_conn = match self.ext.dial(ServiceId(reply.factory_service_id)).await {
            Ok(conn) => conn,
            Err(err) => {
                let _ = self.ext.close_all(resources).await;
                return Err(err);
            }
        };
        resources.push(Resource::new(
            factory_conn.name().to_string(),
            factory_conn.clone(),
        ));

        let factory =
            ReportingPluginFactoryClient::new(factory_conn, self.ext.named("ExecutionFactory"));
        Ok((factory, resources))
    }
}

#[tonic::async_trait]
impl ExecutionFactoryGenerator for ExecutionAdapterClient {
    async fn new_execution_factory(
        &self,
        provider: Arc<dyn ExecProvider>,
    ) -> Result<Arc<dyn ReportingPluginFactory>> {
        let (factory, resources) = self
            .new_execution_factory_with_resources(provider)
            .await?;
        // The factory takes ownership of everything accumulated during
        // construction; closing it closes the whole set.
        factory.absorb(resources).await;
        Ok(Arc::new(factory))
    }
}

/// Plugin-side bridge serving a real [`ExecutionFactoryGenerator`].
///
/// On each factory construction it dials back into the caller's provider
/// services, hands a provider proxy to the real implementation, serves the
/// produced factory as a new brokered service, and replies with its id.
pub struct ExecutionAdapterServer {
    inner: Arc<dyn ExecutionFactoryGenerator>,
    ext: BrokerExt,
    deps: DepSet,
}

impl ExecutionAdapterServer {
    pub fn new(inner: Arc<dyn ExecutionFactoryGenerator>, ext: BrokerExt) -> Self {
        Self {
            inner,
            ext,
            deps: DepSet::new(),
        }
    }

    pub fn into_service(
        self,
    ) -> proto::execution_factory_generator_server::ExecutionFactoryGeneratorServer<Self> {
        proto::execution_factory_generator_server::ExecutionFactoryGeneratorServer::new(self)
    }

    /// Closes every factory server this adapter has published.
    pub async fn close(&self) -> Result<()> {
        self.deps.close_all().await
    }
}

#[tonic::async_trait]
impl proto::execution_factory_generator_server::ExecutionFactoryGenerator
    for ExecutionAdapterServer
{
    async fn new_execution_factory(
        &self,
        request: Request<proto::NewExecutionFactoryRequest>,
    ) -> std::result::Result<Response<proto::NewExecutionFactoryReply>, Status> {
        let req = request.into_inner();

        let provider_conn = self.ext.dial(ServiceId(req.provider_service_id)).await?;
        let provider: Arc<dyn ExecProvider> =
            Arc::new(ExecProviderClient::new(provider_conn.clone()));

        // Domain errors from the real implementation pass through verbatim.
        let factory = self.inner.new_execution_factory(provider).await?;

        let factory_ext = self.ext.clone();
        let (factory_id, factory_res) = self
            .ext
            .serve_new(
                "ReportingPluginFactory",
                |registry| {
                    registry.add_dep(Resource::new(
                        provider_conn.name().to_string(),
                        provider_conn.clone(),
                    ));
                    registry.add_service(
                        ReportingPluginFactoryServer::new(factory, factory_ext).into_service(),
                    );
                    Ok(())
                },
                Resources::new(),
            )
            .await?;
        self.deps.push(factory_res).await;

        Ok(Response::new(proto::NewExecutionFactoryReply {
            factory_service_id: factory_id.0,
        }))
    }
}
