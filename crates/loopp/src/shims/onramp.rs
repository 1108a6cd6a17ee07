use super::finish_close;
use crate::ext::ClientConn;
use crate::resource::DepSet;
use crate::types::{Address, OnRampReader, SendRequest};
use loopp_tonic_core::{Error, Result, proto};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

type Grpc = proto::on_ramp_reader_client::OnRampReaderClient<Channel>;

/// [`OnRampReader`] implemented over a brokered connection.
pub struct OnRampReaderClient {
    conn: ClientConn,
}

impl OnRampReaderClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }

    async fn grpc(&self) -> Result<Grpc> {
        Ok(Grpc::new(self.conn.channel().await?))
    }
}

#[tonic::async_trait]
impl OnRampReader for OnRampReaderClient {
    async fn address(&self) -> Result<Address> {
        let reply = self
            .grpc()
            .await?
            .address(proto::Empty {})
            .await
            .map_err(Error::from)?
            .into_inner();
        Address::try_from(reply.address.as_slice())
    }

    async fn router_address(&self) -> Result<Address> {
        let reply = self
            .grpc()
            .await?
            .router_address(proto::Empty {})
            .await
            .map_err(Error::from)?
            .into_inner();
        Address::try_from(reply.address.as_slice())
    }

    async fn get_send_requests_between(&self, min: u64, max: u64) -> Result<Vec<SendRequest>> {
        let request = proto::GetSendRequestsBetweenRequest { min, max };
        let reply = self
            .grpc()
            .await?
            .get_send_requests_between(request)
            .await
            .map_err(Error::from)?
            .into_inner();
        Ok(reply
            .requests
            .into_iter()
            .map(|req| SendRequest {
                sequence_number: req.sequence_number,
                data: req.data,
            })
            .collect())
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

/// Serves a concrete [`OnRampReader`] implementation over gRPC.
pub struct OnRampReaderServer {
    inner: Arc<dyn OnRampReader>,
    deps: DepSet,
}

impl OnRampReaderServer {
    pub fn new(inner: Arc<dyn OnRampReader>) -> Self {
        Self {
            inner,
            deps: DepSet::new(),
        }
    }

    pub fn into_service(self) -> proto::on_ramp_reader_server::OnRampReaderServer<Self> {
        proto::on_ramp_reader_server::OnRampReaderServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::on_ramp_reader_server::OnRampReader for OnRampReaderServer {
    async fn address(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::AddressReply>, Status> {
        let address = self.inner.address().await?;
        Ok(Response::new(proto::AddressReply {
            address: address.to_vec(),
        }))
    }

    async fn router_address(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::AddressReply>, Status> {
        let address = self.inner.router_address().await?;
        Ok(Response::new(proto::AddressReply {
            address: address.to_vec(),
        }))
    }

    async fn get_send_requests_between(
        &self,
        request: Request<proto::GetSendRequestsBetweenRequest>,
    ) -> std::result::Result<Response<proto::GetSendRequestsBetweenReply>, Status> {
        let req = request.into_inner();
        let requests = self
            .inner
            .get_send_requests_between(req.min, req.max)
            .await?;
        Ok(Response::new(proto::GetSendRequestsBetweenReply {
            requests: requests
                .into_iter()
                .map(|req| proto::SendRequest {
                    sequence_number: req.sequence_number,
                    data: req.data,
                })
                .collect(),
        }))
    }

    async fn close(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        finish_close("OnRampReader", self.inner.close().await, &self.deps).await
    }
}
