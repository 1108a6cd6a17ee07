use super::{
    CommitStoreReaderClient, OffRampReaderClient, OnRampReaderClient, PriceGetterClient,
};
use crate::broker::ServiceId;
use crate::ext::ClientConn;
use crate::types::{CommitStoreReader, ExecProvider, OffRampReader, OnRampReader, PriceGetter};
use loopp_tonic_core::Result;
use std::sync::Arc;

/// [`ExecProvider`] backed by a single brokered connection.
///
/// All four capability services live on the one server the host registered
/// for the provider, so every capability client shares this connection.
pub struct ExecProviderClient {
    conn: ClientConn,
}

impl ExecProviderClient {
    pub fn new(conn: ClientConn) -> Self {
        Self { conn }
    }
}

#[tonic::async_trait]
impl ExecProvider for ExecProviderClient {
    fn commit_store_reader(&self) -> Arc<dyn CommitStoreReader> {
        Arc::new(CommitStoreReaderClient::new(self.conn.clone()))
    }

    fn offramp_reader(&self) -> Arc<dyn OffRampReader> {
        Arc::new(OffRampReaderClient::new(self.conn.clone()))
    }

    fn onramp_reader(&self) -> Arc<dyn OnRampReader> {
        Arc::new(OnRampReaderClient::new(self.conn.clone()))
    }

    fn price_getter(&self) -> Arc<dyn PriceGetter> {
        Arc::new(PriceGetterClient::new(self.conn.clone()))
    }

    fn as_remote(&self) -> Option<ServiceId> {
        self.conn.service_id()
    }

    // The provider's server is owned by whichever side registered it;
    // dropping the connection is all the cleanup this side performs.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
