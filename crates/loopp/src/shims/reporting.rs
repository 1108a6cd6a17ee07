use super::{decode_array, decode_u8, finish_close};
use crate::broker::ServiceId;
use crate::ext::{BrokerExt, ClientConn};
use crate::resource::{DepSet, Resources};
use crate::types::{
    AttributedObservation, ReportingPlugin, ReportingPluginConfig, ReportingPluginFactory,
    ReportingPluginInfo, ReportingPluginLimits,
};
use loopp_tonic_core::{Error, Result, proto};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

type PluginGrpc = proto::reporting_plugin_client::ReportingPluginClient<Channel>;
type FactoryGrpc = proto::reporting_plugin_factory_client::ReportingPluginFactoryClient<Channel>;

fn info_to_proto(info: ReportingPluginInfo) -> proto::ReportingPluginInfo {
    proto::ReportingPluginInfo {
        name: info.name,
        max_query_len: info.limits.max_query_len,
        max_observation_len: info.limits.max_observation_len,
        max_report_len: info.limits.max_report_len,
    }
}

fn info_from_proto(info: proto::ReportingPluginInfo) -> ReportingPluginInfo {
    ReportingPluginInfo {
        name: info.name,
        limits: ReportingPluginLimits {
            max_query_len: info.max_query_len,
            max_observation_len: info.max_observation_len,
            max_report_len: info.max_report_len,
        },
    }
}

/// [`ReportingPlugin`] implemented over a brokered connection.
pub struct ReportingPluginClient {
    conn: ClientConn,
}

impl ReportingPluginClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }

    async fn grpc(&self) -> Result<PluginGrpc> {
        Ok(PluginGrpc::new(self.conn.channel().await?))
    }
}

#[tonic::async_trait]
impl ReportingPlugin for ReportingPluginClient {
    async fn observation(&self, sequence_number: u64, query: &[u8]) -> Result<Vec<u8>> {
        let request = proto::ObservationRequest {
            sequence_number,
            query: query.to_vec(),
        };
        let reply = self
            .grpc()
            .await?
            .observation(request)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(reply.observation)
    }

    async fn report(
        &self,
        sequence_number: u64,
        query: &[u8],
        observations: Vec<AttributedObservation>,
    ) -> Result<Option<Vec<u8>>> {
        let request = proto::ReportRequest {
            sequence_number,
            query: query.to_vec(),
            observations: observations
                .into_iter()
                .map(|obs| proto::AttributedObservation {
                    observation: obs.observation,
                    observer: u32::from(obs.observer),
                })
                .collect(),
        };
        let reply = self
            .grpc()
            .await?
            .report(request)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(reply.should_report.then_some(reply.report))
    }

    async fn close(&self) -> Result<()> {
        self.grpc()
            .await?
            .close(proto::Empty {})
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

/// Serves a concrete [`ReportingPlugin`] implementation over gRPC.
pub struct ReportingPluginServer {
    inner: Arc<dyn ReportingPlugin>,
    deps: DepSet,
}

impl ReportingPluginServer {
    pub fn new(inner: Arc<dyn ReportingPlugin>) -> Self {
        Self {
            inner,
            deps: DepSet::new(),
        }
    }

    pub fn into_service(self) -> proto::reporting_plugin_server::ReportingPluginServer<Self> {
        proto::reporting_plugin_server::ReportingPluginServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::reporting_plugin_server::ReportingPlugin for ReportingPluginServer {
    async fn observation(
        &self,
        request: Request<proto::ObservationRequest>,
    ) -> std::result::Result<Response<proto::ObservationReply>, Status> {
        let req = request.into_inner();
        let observation = self.inner.observation(req.sequence_number, &req.query).await?;
        Ok(Response::new(proto::ObservationReply { observation }))
    }

    async fn report(
        &self,
        request: Request<proto::ReportRequest>,
    ) -> std::result::Result<Response<proto::ReportReply>, Status> {
        let req = request.into_inner();
        let mut observations = Vec::with_capacity(req.observations.len());
        for obs in req.observations {
            observations.push(AttributedObservation {
                observation: obs.observation,
                observer: decode_u8("observer", obs.observer)?,
            });
        }

        let report = self
            .inner
            .report(req.sequence_number, &req.query, observations)
            .await?;
        Ok(Response::new(match report {
            Some(report) => proto::ReportReply {
                should_report: true,
                report,
            },
            None => proto::ReportReply {
                should_report: false,
                report: Vec::new(),
            },
        }))
    }

    async fn close(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        finish_close("ReportingPlugin", self.inner.close().await, &self.deps).await
    }
}

/// [`ReportingPluginFactory`] implemented over a brokered connection.
///
/// Also the handle for every resource a composite bridge accumulated while
/// constructing the factory: closing the client closes them all.
pub struct ReportingPluginFactoryClient {
    conn: ClientConn,
    ext: BrokerExt,
    deps: DepSet,
}

impl ReportingPluginFactoryClient {
    pub fn new(conn: ClientConn, ext: BrokerExt) -> Self {
        Self {
            conn,
            ext,
            deps: DepSet::new(),
        }
    }

    /// Takes ownership of resources whose lifetime should end with this
    /// factory.
    pub async fn absorb(&self, resources: Resources) {
        self.deps.absorb(resources).await;
    }

    async fn grpc(&self) -> Result<FactoryGrpc> {
        Ok(FactoryGrpc::new(self.conn.channel().await?))
    }
}

#[tonic::async_trait]
impl ReportingPluginFactory for ReportingPluginFactoryClient {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> Result<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)> {
        let request = proto::NewReportingPluginRequest {
            config: Some(proto::ReportingPluginConfig {
                config_digest: config.config_digest.to_vec(),
                oracle_id: u32::from(config.oracle_id),
                n: u32::from(config.n),
                f: u32::from(config.f),
                max_duration_ms: config.max_duration_ms,
                offchain_config: config.offchain_config,
            }),
        };
        let reply = self
            .grpc()
            .await?
            .new_reporting_plugin(request)
            .await
            .map_err(Error::from)?
            .into_inner();

        let info = info_from_proto(reply.info.ok_or_else(|| Error::required("info"))?);
        let conn = self.ext.dial(ServiceId(reply.plugin_service_id)).await?;
        let plugin: Arc<dyn ReportingPlugin> = Arc::new(ReportingPluginClient::new(conn));
        Ok((plugin, info))
    }

    async fn close(&self) -> Result<()> {
        let mut failures = Vec::new();
        // Advisory remote cleanup first; a transport failure is reported
        // but does not stop local teardown.
        match self.grpc().await {
            Ok(mut grpc) => {
                if let Err(status) = grpc.close(proto::Empty {}).await {
                    failures.push((self.conn.name().to_string(), status.to_string()));
                }
            }
            Err(err) => failures.push((self.conn.name().to_string(), err.to_string())),
        }
        if let Err(err) = self.deps.close_all().await {
            match err {
                Error::Teardown {
                    failures: dep_failures,
                } => failures.extend(dep_failures),
                other => failures.push((self.conn.name().to_string(), other.to_string())),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown { failures })
        }
    }
}

/// Serves a concrete [`ReportingPluginFactory`], publishing each produced
/// plugin as a new brokered service.
pub struct ReportingPluginFactoryServer {
    inner: Arc<dyn ReportingPluginFactory>,
    ext: BrokerExt,
    deps: DepSet,
}

impl ReportingPluginFactoryServer {
    pub fn new(inner: Arc<dyn ReportingPluginFactory>, ext: BrokerExt) -> Self {
        Self {
            inner,
            ext,
            deps: DepSet::new(),
        }
    }

    pub fn into_service(
        self,
    ) -> proto::reporting_plugin_factory_server::ReportingPluginFactoryServer<Self> {
        proto::reporting_plugin_factory_server::ReportingPluginFactoryServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::reporting_plugin_factory_server::ReportingPluginFactory
    for ReportingPluginFactoryServer
{
    async fn new_reporting_plugin(
        &self,
        request: Request<proto::NewReportingPluginRequest>,
    ) -> std::result::Result<Response<proto::NewReportingPluginReply>, Status> {
        let req = request.into_inner();
        let cfg = req.config.ok_or_else(|| Error::required("config"))?;
        let config = ReportingPluginConfig {
            config_digest: decode_array::<32>("config digest", &cfg.config_digest)?,
            oracle_id: decode_u8("oracle id", cfg.oracle_id)?,
            n: decode_u8("n", cfg.n)?,
            f: decode_u8("f", cfg.f)?,
            max_duration_ms: cfg.max_duration_ms,
            offchain_config: cfg.offchain_config,
        };

        let (plugin, info) = self.inner.new_reporting_plugin(config).await?;

        let (plugin_id, plugin_res) = self
            .ext
            .serve_new(
                "ReportingPlugin",
                |registry| {
                    registry.add_service(ReportingPluginServer::new(plugin).into_service());
                    Ok(())
                },
                Resources::new(),
            )
            .await?;
        self.deps.push(plugin_res).await;

        Ok(Response::new(proto::NewReportingPluginReply {
            plugin_service_id: plugin_id.0,
            info: Some(info_to_proto(info)),
        }))
    }

    async fn close(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        finish_close(
            "ReportingPluginFactory",
            self.inner.close().await,
            &self.deps,
        )
        .await
    }
}
