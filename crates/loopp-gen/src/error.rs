//! Generator failure taxonomy.
//!
//! Every failure is fatal to the run and carries enough context (method
//! name, parameter, type) to fix the source trait or the mapping config.
//! There is no best-effort fallback: a partial or guessed wire contract is
//! worse than a hard failure at build time.

pub type Result<T> = std::result::Result<T, GenError>;

#[derive(Debug, thiserror::Error)]
pub enum GenError {
    #[error("interface {name} not found in {path}")]
    InterfaceNotFound { name: String, path: String },

    #[error("{name} in {path} is not a trait")]
    NotAnInterface { name: String, path: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("method {method}: unsupported signature: {reason}")]
    UnsupportedSignature { method: String, reason: String },

    #[error("method {method}, parameter {param}: unsupported type {ty}: {reason}")]
    UnsupportedType {
        method: String,
        param: String,
        ty: String,
        reason: String,
    },

    #[error(
        "method {method}, parameter {param}: polymorphic type {ty} has no `interfaces:` entry in the generator config"
    )]
    MissingOneof {
        method: String,
        param: String,
        ty: String,
    },

    #[error("config {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("{path}: {reason}")]
    Io { path: String, reason: String },
}
