#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use futures::Stream;
use loopp::adapter::ExecutionAdapterServer;
use loopp::broker::{Broker, BrokerConfig, BrokerPeerServer, IdParity};
use loopp::ext::BrokerExt;
use loopp_tonic_core::proto;
use loopp_tonic_core::proto::execution_factory_generator_server::ExecutionFactoryGeneratorServer;
use server::config::{CliArgs, ServerConfig};
use server::reference::ReferenceExecutionFactory;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::transport::{Endpoint, Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tracing_subscriber::EnvFilter;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            tracing::info!("Starting plugin server on {}", uds_path);
            let res = run_server_with_incoming(incoming, config).await;
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        tracing::info!("Starting plugin server on {}", tcp_path);
        run_server_with_incoming(incoming, config).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(incoming: I, config: ServerConfig) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let broker = Arc::new(Broker::new(IdParity::Even));
    if let Some(peer) = &config.peer {
        let channel = Endpoint::from_shared(format!("http://{peer}"))?.connect_lazy();
        broker.set_peer(proto::broker_peer_client::BrokerPeerClient::new(channel));
        tracing::info!("Announcing brokered services to peer at {peer}");
    }
    let ext = BrokerExt::new(Arc::clone(&broker), BrokerConfig::new(config.name.clone()));

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ExecutionFactoryGeneratorServer<ExecutionAdapterServer>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(loopp_tonic_core::proto::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let adapter = ExecutionAdapterServer::new(Arc::new(ReferenceExecutionFactory), ext);

    Server::builder()
        .add_service(health_service)
        .add_service(reflection)
        .add_service(adapter.into_service())
        .add_service(BrokerPeerServer::new(Arc::clone(&broker)).into_service())
        .serve_with_incoming_shutdown(incoming, shutdown_signal(broker, health_reporter))
        .await?;

    tracing::info!("Plugin server shut down");
    Ok(())
}

async fn shutdown_signal(broker: Arc<Broker>, health_reporter: HealthReporter) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<ExecutionFactoryGeneratorServer<ExecutionAdapterServer>>()
        .await;

    // 2. Refuse new registrations and stop every brokered sub-service.
    broker.close();
}
