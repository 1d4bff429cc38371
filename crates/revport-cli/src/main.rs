//! revport CLI - run the relay server or expose a local service

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use revport_client::{TunnelClient, TunnelOptions};
use revport_proto::Protocol;
use revport_relay::{Relay, RelayConfig};

/// Reverse tunnels over a single outbound connection
#[derive(Parser, Debug)]
#[command(name = "revport")]
#[command(about = "Expose local TCP and HTTP services through a public relay", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the public relay server
    Server {
        /// Address to listen on for control and HTTP traffic
        #[arg(long, default_value = "0.0.0.0:5000")]
        bind: SocketAddr,

        /// Public domain of this relay (wildcard DNS should point here)
        #[arg(long, default_value = "localhost")]
        domain: String,

        /// Port range scanned for auto-assigned TCP tunnels
        #[arg(long, default_value = "40000-50000", value_parser = parse_port_range)]
        port_range: (u16, u16),

        /// Directory holding hook scripts
        #[arg(long, default_value = "hooks")]
        hooks_dir: PathBuf,
    },
    /// Expose a local service through a relay
    Client {
        /// Relay server URL
        #[arg(short, long, env = "REVPORT_SERVER", default_value = "http://localhost:5000")]
        server: String,

        /// Local service to expose, as `host:port` or a bare port
        local: String,

        /// Tunnel protocol (tcp, http, https)
        #[arg(short, long, default_value = "http")]
        protocol: Protocol,

        /// Requested subdomain for HTTP tunnels
        #[arg(long)]
        subdomain: Option<String>,

        /// Requested public port for TCP tunnels
        #[arg(long)]
        remote_port: Option<u16>,

        /// Opaque data passed to relay-side hooks
        #[arg(long)]
        data: Option<String>,
    },
}

fn parse_port_range(s: &str) -> Result<(u16, u16), String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("expected start-end, got {s}"))?;
    let start: u16 = start.trim().parse().map_err(|_| format!("bad port {start}"))?;
    let end: u16 = end.trim().parse().map_err(|_| format!("bad port {end}"))?;
    if start >= end {
        return Err(format!("empty port range {s}"));
    }
    Ok((start, end))
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("revport={log_level},revport_relay={log_level},revport_client={log_level}").into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Server {
            bind,
            domain,
            port_range,
            hooks_dir,
        } => {
            let relay = Relay::new(RelayConfig {
                domain,
                port_range: port_range.0..port_range.1,
                hooks_dir,
            });
            let listener = TcpListener::bind(bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            relay.serve(listener).await?;
        }
        Commands::Client {
            server,
            local,
            protocol,
            subdomain,
            remote_port,
            data,
        } => {
            let server = Url::parse(&server)
                .with_context(|| format!("invalid server url {server}"))?;
            // A bare port means a service on this machine.
            let local_addr = if local.contains(':') {
                local
            } else {
                format!("localhost:{local}")
            };
            info!("exposing {} via {}", local_addr, server);
            let client = TunnelClient::new(TunnelOptions {
                server,
                local_addr,
                protocol,
                subdomain,
                remote_port,
                extra_data: data,
            });
            client.run().await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range_parses() {
        assert_eq!(parse_port_range("40000-50000").unwrap(), (40000, 50000));
        assert!(parse_port_range("50000-40000").is_err());
        assert!(parse_port_range("40000").is_err());
        assert!(parse_port_range("a-b").is_err());
    }
}
