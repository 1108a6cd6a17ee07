use super::finish_close;
use crate::ext::ClientConn;
use crate::resource::DepSet;
use crate::types::{Address, ExecutionState, OffRampReader};
use loopp_tonic_core::{Error, Result, proto};
use std::sync::Arc;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

type Grpc = proto::off_ramp_reader_client::OffRampReaderClient<Channel>;

fn state_from_proto(state: i32) -> Result<ExecutionState> {
    let state = proto::ExecutionState::try_from(state)
        .map_err(|_| Error::invalid_value("execution state", format!("unknown discriminant {state}")))?;
    Ok(match state {
        proto::ExecutionState::Untouched => ExecutionState::Untouched,
        proto::ExecutionState::InProgress => ExecutionState::InProgress,
        proto::ExecutionState::Success => ExecutionState::Success,
        proto::ExecutionState::Failure => ExecutionState::Failure,
    })
}

fn state_to_proto(state: ExecutionState) -> proto::ExecutionState {
    match state {
        ExecutionState::Untouched => proto::ExecutionState::Untouched,
        ExecutionState::InProgress => proto::ExecutionState::InProgress,
        ExecutionState::Success => proto::ExecutionState::Success,
        ExecutionState::Failure => proto::ExecutionState::Failure,
    }
}

/// [`OffRampReader`] implemented over a brokered connection.
pub struct OffRampReaderClient {
    conn: ClientConn,
}

impl OffRampReaderClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }

    async fn grpc(&self) -> Result<Grpc> {
        Ok(Grpc::new(self.conn.channel().await?))
    }
}

#[tonic::async_trait]
impl OffRampReader for OffRampReaderClient {
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

    async fn get_execution_state(&self, sequence_number: u64) -> Result<ExecutionState> {
        let request = proto::GetExecutionStateRequest { sequence_number };
        let reply = self
            .grpc()
            .await?
            .get_execution_state(request)
            .await
            .map_err(Error::from)?
            .into_inner();
        state_from_proto(reply.state)
    }

    // The remote side answers UNIMPLEMENTED; surfaced as a hard error, not
    // a zero-value success.
    async fn gas_price_estimator(&self) -> Result<()> {
        self.grpc()
            .await?
            .gas_price_estimator(proto::Empty {})
            .await
            .map_err(Error::from)?;
        Ok(())
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

/// Serves a concrete [`OffRampReader`] implementation over gRPC.
pub struct OffRampReaderServer {
    inner: Arc<dyn OffRampReader>,
    deps: DepSet,
}

impl OffRampReaderServer {
    pub fn new(inner: Arc<dyn OffRampReader>) -> Self {
        Self {
            inner,
            deps: DepSet::new(),
        }
    }

    pub fn into_service(self) -> proto::off_ramp_reader_server::OffRampReaderServer<Self> {
        proto::off_ramp_reader_server::OffRampReaderServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::off_ramp_reader_server::OffRampReader for OffRampReaderServer {
    async fn address(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::AddressReply>, Status> {
        let address = self.inner.address().await?;
        Ok(Response::new(proto::AddressReply {
            address: address.to_vec(),
        }))
    }

    async fn get_execution_state(
        &self,
        request: Request<proto::GetExecutionStateRequest>,
    ) -> std::result::Result<Response<proto::GetExecutionStateReply>, Status> {
        let req = request.into_inner();
        let state = self.inner.get_execution_state(req.sequence_number).await?;
        Ok(Response::new(proto::GetExecutionStateReply {
            state: state_to_proto(state) as i32,
        }))
    }

    async fn gas_price_estimator(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        // No wire representation exists for the estimator yet; this RPC is
        // permanently unimplemented rather than guessing a contract.
        Err(Error::unimplemented("OffRampReader.GasPriceEstimator").into())
    }

    async fn close(
        &self,
        _request: Request<proto::Empty>,
    ) -> std::result::Result<Response<proto::Empty>, Status> {
        finish_close("OffRampReader", self.inner.close().await, &self.deps).await
    }
}
