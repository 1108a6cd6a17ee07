//! Domain-facing value types and the capability traits bridged across the
//! process boundary.
//!
//! These traits are what host-side code programs against. For each one the
//! bridge provides a client shim (the trait implemented over gRPC) and a
//! server shim (the generated service delegating to a real implementation);
//! see [`crate::shims`].

use crate::broker::ServiceId;
use loopp_tonic_core::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Length in bytes of an on-chain account address.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte account address. Construction is length-checked; a wire value
/// of any other length is rejected, never truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| Error::invalid_length("address", ADDRESS_LEN, bytes.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Execution status of a cross-chain message sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Untouched,
    InProgress,
    Success,
    Failure,
}

/// A message send request observed on the source chain. The payload is
/// opaque to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub sequence_number: u64,
    pub data: Vec<u8>,
}

/// Configuration handed to a reporting-plugin factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingPluginConfig {
    pub config_digest: [u8; 32],
    pub oracle_id: u8,
    pub n: u8,
    pub f: u8,
    pub max_duration_ms: u64,
    /// Opaque plugin-specific configuration.
    pub offchain_config: Vec<u8>,
}

/// Size limits advertised by a reporting plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportingPluginLimits {
    pub max_query_len: u64,
    pub max_observation_len: u64,
    pub max_report_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportingPluginInfo {
    pub name: String,
    pub limits: ReportingPluginLimits,
}

/// An observation attributed to the oracle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributedObservation {
    pub observation: Vec<u8>,
    pub observer: u8,
}

/// Prices for a set of tokens.
#[tonic::async_trait]
pub trait PriceGetter: Send + Sync {
    async fn token_prices_usd(&self, tokens: &[Address]) -> Result<HashMap<Address, u128>>;

    async fn close(&self) -> Result<()>;
}

#[tonic::async_trait]
pub trait CommitStoreReader: Send + Sync {
    async fn expected_next_sequence_number(&self) -> Result<u64>;

    /// Verifies an opaque execution report payload.
    async fn verify_execution_report(&self, report: &[u8]) -> Result<bool>;

    async fn is_blessed(&self, root: [u8; 32]) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

#[tonic::async_trait]
pub trait OffRampReader: Send + Sync {
    async fn address(&self) -> Result<Address>;

    async fn get_execution_state(&self, sequence_number: u64) -> Result<ExecutionState>;

    /// The estimator has no defined behavior yet; implementations inherit
    /// this hard "not implemented" error until one is specified.
    async fn gas_price_estimator(&self) -> Result<()> {
        Err(Error::unimplemented("OffRampReader.GasPriceEstimator"))
    }

    async fn close(&self) -> Result<()>;
}

#[tonic::async_trait]
pub trait OnRampReader: Send + Sync {
    async fn address(&self) -> Result<Address>;

    async fn router_address(&self) -> Result<Address>;

    async fn get_send_requests_between(&self, min: u64, max: u64) -> Result<Vec<SendRequest>>;

    async fn close(&self) -> Result<()>;
}

#[tonic::async_trait]
pub trait ReportingPlugin: Send + Sync {
    async fn observation(&self, sequence_number: u64, query: &[u8]) -> Result<Vec<u8>>;

    /// Returns `Some(report)` when the observations warrant one.
    async fn report(
        &self,
        sequence_number: u64,
        query: &[u8],
        observations: Vec<AttributedObservation>,
    ) -> Result<Option<Vec<u8>>>;

    async fn close(&self) -> Result<()>;
}

#[tonic::async_trait]
pub trait ReportingPluginFactory: Send + Sync {
    async fn new_reporting_plugin(
        &self,
        config: ReportingPluginConfig,
    ) -> Result<(Arc<dyn ReportingPlugin>, ReportingPluginInfo)>;

    async fn close(&self) -> Result<()>;
}

/// The bundle of capabilities an execution plugin needs from its host.
#[tonic::async_trait]
pub trait ExecProvider: Send + Sync {
    fn commit_store_reader(&self) -> Arc<dyn CommitStoreReader>;

    fn offramp_reader(&self) -> Arc<dyn OffRampReader>;

    fn onramp_reader(&self) -> Arc<dyn OnRampReader>;

    fn price_getter(&self) -> Arc<dyn PriceGetter>;

    /// When this provider is itself a proxy for a brokered service, the id
    /// it was dialed against. Composite bridges proxy that id through
    /// instead of serving the provider a second time.
    fn as_remote(&self) -> Option<ServiceId> {
        None
    }

    async fn close(&self) -> Result<()>;
}

/// Builds execution reporting-plugin factories against a provider.
#[tonic::async_trait]
pub trait ExecutionFactoryGenerator: Send + Sync {
    async fn new_execution_factory(
        &self,
        provider: Arc<dyn ExecProvider>,
    ) -> Result<Arc<dyn ReportingPluginFactory>>;
}
