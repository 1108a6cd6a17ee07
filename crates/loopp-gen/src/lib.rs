#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod model;
pub mod parse;
pub mod render;


use crate::config::Config;
use crate::error::{GenError, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Command-line surface of the generator.
///
/// Missing required flags abort with a non-zero exit before any file is
/// written.
#[derive(Parser, Debug)]
#[command(
    name = "loopp-gen",
    about = "Generate a proto schema, gRPC shim pair, and round-trip test from a Rust trait"
)]
pub struct Cli {
    /// Rust source file containing the trait definition.
    #[arg(long)]
    pub pkg: PathBuf,

    /// Name of the trait to bridge.
    #[arg(long)]
    pub interface: String,

    /// Proto service name.
    #[arg(long, default_value = "Example")]
    pub service: String,

    /// Output path for the rendered .proto schema.
    #[arg(long)]
    pub proto_out: PathBuf,

    /// Output directory for rpc.rs and rpc_test.rs.
    #[arg(long)]
    pub out: PathBuf,

    /// Proto package name.
    #[arg(long, default_value = "loop.solana")]
    pub proto_pkg: String,

    /// Rust path the generated code imports the trait and its types from.
    #[arg(long, default_value = "super")]
    pub rust_use: String,

    /// Optional YAML mapping configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// The three files a successful run writes.
#[derive(Debug)]
pub struct GeneratedPaths {
    pub proto: PathBuf,
    pub rpc: PathBuf,
    pub test: PathBuf,
}

/// Runs the full pipeline: load config, introspect the trait, render all
/// three artifacts, and only then write them out.
pub fn generate(cli: &Cli) -> Result<GeneratedPaths> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let service = parse::build_service(
        &cli.pkg,
        &cli.interface,
        &cli.service,
        &cli.proto_pkg,
        &cli.rust_use,
        &config,
    )?;

    let proto = render::proto::render(&service);
    let rpc = render::rust::render(&service);
    let test = render::tests::render(&service);

    // Everything rendered; only now touch the filesystem.
    if let Some(parent) = cli.proto_out.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir(parent)?;
        }
    }
    create_dir(&cli.out)?;

    let paths = GeneratedPaths {
        proto: cli.proto_out.clone(),
        rpc: cli.out.join("rpc.rs"),
        test: cli.out.join("rpc_test.rs"),
    };
    write(&paths.proto, &proto)?;
    write(&paths.rpc, &rpc)?;
    write(&paths.test, &test)?;
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|err| GenError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|err| GenError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}
