//! Client/server shim pairs for every bridged capability.
//!
//! For each capability there are two types: a `*Client` that implements the
//! domain trait purely in terms of gRPC calls, and a `*Server` that
//! implements the generated service interface by delegating to a concrete
//! domain implementation. Servers own their implementation and a set of
//! dependent closers; their `Close` handler tears both down through the
//! aggregate close-all routine.
//!
//! Decode validation always runs before domain logic: fixed-length fields
//! are rejected with a descriptive length error rather than truncated, and
//! absent required sub-messages are rejected rather than defaulted.

mod commit_store;
mod offramp;
mod onramp;
mod price_getter;
mod provider;
mod reporting;

pub use commit_store::{CommitStoreReaderClient, CommitStoreReaderServer};
pub use offramp::{OffRampReaderClient, OffRampReaderServer};
pub use onramp::{OnRampReaderClient, OnRampReaderServer};
pub use price_getter::{PriceGetterClient, PriceGetterServer};
pub use provider::ExecProviderClient;
pub use reporting::{
    ReportingPluginClient, ReportingPluginFactoryClient, ReportingPluginFactoryServer,
    ReportingPluginServer,
};

use crate::resource::DepSet;
use loopp_tonic_core::{Error, Result, proto};
use tonic::{Response, Status};

/// Decodes a fixed-size byte field, rejecting any length mismatch.
pub(crate) fn decode_array<const N: usize>(field: &str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::invalid_length(field, N, bytes.len()))
}

/// Decodes a 16-byte big-endian unsigned integer.
pub(crate) fn decode_u128(field: &str, bytes: &[u8]) -> Result<u128> {
    Ok(u128::from_be_bytes(decode_array::<16>(field, bytes)?))
}

pub(crate) fn encode_u128(value: u128) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Decodes a `uint32` wire field that carries a `u8` domain value.
pub(crate) fn decode_u8(field: &str, value: u32) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_| Error::invalid_value(field, format!("{value} does not fit in a byte")))
}

/// Shared tail of every server shim's `Close` handler: combines the
/// implementation's close result with the dependent-closer sweep, reporting
/// every failure and never stopping early.
pub(crate) async fn finish_close(
    name: &str,
    inner: Result<()>,
    deps: &DepSet,
) -> std::result::Result<Response<proto::Empty>, Status> {
    let mut failures = Vec::new();
    if let Err(err) = inner {
        failures.push((name.to_string(), err.to_string()));
    }
    if let Err(err) = deps.close_all().await {
        match err {
            Error::Teardown {
                failures: dep_failures,
            } => failures.extend(dep_failures),
            other => failures.push((format!("{name} dependencies"), other.to_string())),
        }
    }
    if failures.is_empty() {
        Ok(Response::new(proto::Empty {}))
    } else {
        Err(Status::from(Error::Teardown { failures }))
    }
}
