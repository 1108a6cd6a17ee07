//! CLI/env configuration for the plugin server.

use clap::Parser;

/// Command-line arguments, with `LOOPP_*` environment fallbacks.
#[derive(Parser, Debug)]
#[command(
    name = "loopp-tonic-server",
    about = "Serve an execution factory over the plugin bridge"
)]
pub struct CliArgs {
    /// Listen address: `host:port`, or a filesystem path with `--uds`.
    #[arg(long, env = "LOOPP_LISTEN", default_value = "127.0.0.1:7745")]
    pub listen: String,

    /// Serve on a Unix domain socket instead of TCP.
    #[arg(long, env = "LOOPP_UDS")]
    pub uds: bool,

    /// Address of the host process's broker announce endpoint. Without it,
    /// services brokered here are only dialable in-process.
    #[arg(long, env = "LOOPP_PEER")]
    pub peer: Option<String>,

    /// Diagnostic name for this side of the bridge session.
    #[arg(long, env = "LOOPP_NAME", default_value = "plugin")]
    pub name: String,
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub peer: Option<String>,
    pub name: String,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.listen.is_empty() {
            anyhow::bail!("--listen must not be empty");
        }
        if !args.uds && args.listen.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("--listen {:?} is not a valid host:port address", args.listen);
        }
        Ok(Self {
            server_addr: args.listen,
            uds: args.uds,
            peer: args.peer,
            name: args.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_apply() {
        let config = ServerConfig::try_from(args(&["loopp-tonic-server"])).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:7745");
        assert!(!config.uds);
        assert_eq!(config.name, "plugin");
        assert!(config.peer.is_none());
    }

    #[test]
    fn invalid_tcp_address_is_rejected() {
        let result = ServerConfig::try_from(args(&["loopp-tonic-server", "--listen", "nope"]));
        assert!(result.is_err());
    }

    #[test]
    fn uds_path_skips_socket_addr_validation() {
        let config = ServerConfig::try_from(args(&[
            "loopp-tonic-server",
            "--listen",
            "/tmp/loopp.sock",
            "--uds",
        ]))
        .unwrap();
        assert!(config.uds);
        assert_eq!(config.server_addr, "/tmp/loopp.sock");
    }
}
