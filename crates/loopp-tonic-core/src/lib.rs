#![doc = include_str!("../README.md")]

pub mod common;
pub use common::*;

/// Generated protobuf/gRPC bindings for the `loopp` package.
pub mod proto {
    tonic::include_proto!("loopp");

    /// Serialized file descriptor set, used to register gRPC server
    /// reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/loopp_descriptor.bin"));
}
