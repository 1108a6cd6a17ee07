//! Error types for the plugin bridge.
//!
//! This module defines the central `Error` enum, which captures all
//! recoverable and reportable error cases within the bridge. It implements
//! `From<Error>` for `tonic::Status` so server shims can propagate failures
//! to the wire with appropriate status codes, and `From<tonic::Status>` for
//! `Error` so client shims can surface remote failures to domain callers
//! without losing the status.
//!
//! ## Error Cases
//! - `Dial`: a brokered service id could not be resolved or reached.
//! - `Unimplemented`: the remote side has no handler for the called RPC; a
//!   hard error, never a zero-value success.
//! - `InvalidLength` / `InvalidValue` / `Required`: a decoded message failed
//!   validation before any domain logic ran.
//! - `Teardown`: one or more resources failed to close during an aggregate
//!   close; every failure is retained.
//! - `BrokerClosed`: registration was attempted on a shut-down broker.
//! - `Serve`: a local gRPC server could not be started or stopped cleanly.
//! - `Rpc`: any other transport-level status returned by the remote side.

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the plugin bridge.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The target service id was not registered with the broker, or the
    /// registered address could not be reached.
    #[error("dial {name:?} (service id {id}): not registered or unreachable")]
    Dial { name: String, id: u32 },

    /// The called RPC has no handler on the remote side.
    #[error("{what}: not implemented")]
    Unimplemented { what: String },

    /// A fixed-length field decoded to the wrong number of bytes.
    #[error("invalid length for {field}: expected {expected} bytes, got {got}")]
    InvalidLength {
        field: String,
        expected: usize,
        got: usize,
    },

    /// A field decoded to a value outside its domain (e.g. an unknown enum
    /// discriminant).
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// A required sub-message was absent.
    #[error("missing required field {field}")]
    Required { field: String },

    /// One or more resources failed to close. Every failure is listed as
    /// `name: reason`.
    #[error("resource teardown failed: [{}]", format_failures(.failures))]
    Teardown { failures: Vec<(String, String)> },

    /// Registration was attempted on a broker that has been shut down.
    #[error("broker is closed")]
    BrokerClosed,

    /// A local server could not be started or stopped.
    #[error("serve {context}")]
    Serve { context: String },

    /// The remote side returned a non-OK status not covered above.
    #[error("rpc: {0}")]
    Rpc(Status),
}

impl Error {
    pub fn unimplemented(what: impl Into<String>) -> Self {
        Self::Unimplemented { what: what.into() }
    }

    pub fn invalid_length(field: impl Into<String>, expected: usize, got: usize) -> Self {
        Self::InvalidLength {
            field: field.into(),
            expected,
            got,
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::Required {
            field: field.into(),
        }
    }

    pub fn serve(context: impl Into<String>) -> Self {
        Self::Serve {
            context: context.into(),
        }
    }
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, reason)| format!("{name}: {reason}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Dial { .. } => Status::unavailable(err.to_string()),
            Error::Unimplemented { .. } => Status::unimplemented(err.to_string()),
            Error::InvalidLength { .. } | Error::InvalidValue { .. } | Error::Required { .. } => {
                Status::invalid_argument(err.to_string())
            }
            Error::Teardown { .. } => Status::internal(err.to_string()),
            Error::BrokerClosed => Status::failed_precondition(err.to_string()),
            Error::Serve { .. } => Status::internal(err.to_string()),
            // Pass remote statuses through unchanged so the message a domain
            // implementation attached is preserved end to end.
            Error::Rpc(status) => status,
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Unimplemented => Self::Unimplemented {
                what: status.message().to_string(),
            },
            _ => Self::Rpc(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unimplemented_status_round_trips_as_hard_error() {
        let status = Status::unimplemented("GasPriceEstimator");
        let err = Error::from(status);
        assert!(matches!(err, Error::Unimplemented { .. }));
        let back = Status::from(err);
        assert_eq!(back.code(), Code::Unimplemented);
    }

    #[test]
    fn domain_status_message_is_preserved() {
        let status = Status::internal("backing store unavailable");
        let err = Error::from(status);
        let back = Status::from(err);
        assert_eq!(back.message(), "backing store unavailable");
    }

    #[test]
    fn validation_maps_to_invalid_argument() {
        let err = Error::invalid_length("token", 20, 3);
        let status = Status::from(err);
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(status.message().contains("expected 20 bytes, got 3"));
    }

    #[test]
    fn teardown_lists_every_failure() {
        let err = Error::Teardown {
            failures: vec![
                ("PriceGetter".into(), "conn reset".into()),
                ("OffRampReader".into(), "already closed".into()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("PriceGetter: conn reset"));
        assert!(msg.contains("OffRampReader: already closed"));
    }
}
