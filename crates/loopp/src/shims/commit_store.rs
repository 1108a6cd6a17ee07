use super::{decode_array, finish_close};
use crate::ext::ClientConn;
use crate::resource::DepSet;
use crate::types::CommitStoreReader;
use loopp_tonic_core::{Error, Result, proto};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

type Grpc = proto::commit_store_reader_client::CommitStoreReaderClient<Channel>;

/// [`CommitStoreReader`] implemented over a brokered connection.
pub struct CommitStoreReaderClient {
    conn: ClientConn,
}

impl CommitStoreReaderClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }

    async fn grpc(&self) -> Result<Grpc> {
        Ok(Grpc::new(self.conn.channel().await?))
    }
}

#[tonic::async_trait]
impl CommitStoreReader for CommitStoreReaderClient {
    async fn expected_next_sequence_number(&self) -> Result<u64> {
        let reply = self
            .grpc()
            .await?
            .expected_next_sequence_number(proto::Empty {})
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(reply.sequence_number)
    }

    async fn verify_execution_report(&self, report: &[u8]) -> Result<bool> {
        let request = proto::VerifyExecutionReportRequest {
            report: report.to_vec(),
        };
        let reply = self
            .grpc()
            .await?
            .verify_execution_report(request)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(reply.valid)
    }

    async fn is_blessed(&self, root: [u8; 32]) -> Result<bool> {
        let request = proto::IsBlessedRequest {
            root: root.to_vec(),
        };
        let reply = self
            .grpc()
            .await?
            .is_blessed(request)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(reply.blessed)
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

/// Serves a concrete [`CommitStoreReader`] implementation over gRPC.
pub struct CommitStoreReaderServer {
    inner: Arc<dyn CommitStoreReader>,
    deps: DepSet,
}

impl CommitStoreReaderServer {
    pub fn new(inner: Arc<dyn CommitStoreReader>) -> Self {
        Self {
            inner,
            deps: DepSet::new(),
        }
    }

    pub fn into_service(self) -> proto::commit_store_reader_server::CommitStoreReaderServer<Self> {
        proto::commit_store_reader_server::CommitStoreReaderServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::commit_store_reader_server::CommitStoreReader for CommitStoreReaderServer {
    async fn expected_next_sequence_number(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::ExpectedNextSequenceNumberReply>, Status> {
        let sequence_number = self.inner.expected_next_sequence_number().await?;
        Ok(Response::new(proto::ExpectedNextSequenceNumberReply {
            sequence_number,
        }))
    }

    async fn verify_execution_report(
        &self,
        request: Request<proto::VerifyExecutionReportRequest>,
    ) -> std::result::Result<Response<proto::VerifyExecutionReportReply>, Status> {
        let req = request.into_inner();
        let valid = self.inner.verify_execution_report(&req.report).await?;
        Ok(Response::new(proto::VerifyExecutionReportReply { valid }))
    }

    async fn is_blessed(
        &self,
        request: Request<proto::IsBlessedRequest>,
    ) -> std::result::Result<Response<proto::IsBlessedReply>, Status> {
        let req = request.into_inner();
        let root = decode_array::<32>("root", &req.root)?;
        let blessed = self.inner.is_blessed(root).await?;
        Ok(Response::new(proto::IsBlessedReply { blessed }))
    }

    async fn close(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        finish_close("CommitStoreReader", self.inner.close().await, &self.deps).await
    }
}
