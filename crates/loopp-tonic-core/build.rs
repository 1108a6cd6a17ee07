/// Builds the gRPC client and server code for the `loopp.proto` definition
/// using `tonic-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`.
///
/// # Files and Paths
///
/// - Proto file: `proto/loopp.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// This function will `panic!` if code generation fails. For CI use or better
/// diagnostics, wrap with a proper error handler or logging.
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("loopp");
/// }
/// ```
///
/// This module will include both gRPC service traits and message types. The
/// file descriptor set is written alongside it so downstream servers can
/// register gRPC reflection.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("loopp_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/loopp.proto"], &["proto"])
        .unwrap();
}
