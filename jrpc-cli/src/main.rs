//! jrpc-cli - Command-line interface for jrpc servers
//!
//! Issues one call or notification per invocation.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use jrpc_client::{
    Client, ClientConfig, ClientError, HttpClientTransport, TcpClientTransport, WsClientTransport,
};
use jrpc_protocol::WireMode;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jrpc-cli")]
#[command(about = "Command-line interface for JSON-RPC 2.0 servers")]
#[command(version)]
struct Cli {
    /// Server address (persistent TCP connection)
    #[arg(short, long, env = "JRPC_SERVER", default_value = "127.0.0.1:7410")]
    server: SocketAddr,

    /// Server URL (HTTP transport, takes precedence over --ws and --server)
    #[arg(long, env = "JRPC_HTTP_URL")]
    http: Option<String>,

    /// Server URL (WebSocket transport, takes precedence over --server)
    #[arg(long, env = "JRPC_WS_URL")]
    ws: Option<String>,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,

    /// Use newline-delimited JSON instead of binary frames
    #[arg(long)]
    lines: bool,

    /// Extra HTTP or WebSocket handshake header (NAME:VALUE), may be repeated
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Call a method and print its result
    Call {
        /// Method name
        method: String,

        /// Positional parameters (JSON, or plain strings)
        params: Vec<String>,
    },

    /// Send a notification (no response)
    Notify {
        /// Method name
        method: String,

        /// Positional parameters (JSON, or plain strings)
        params: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new().with_request_timeout(Duration::from_secs(cli.timeout));
    if cli.lines {
        config = config.with_wire_mode(WireMode::Lines);
    }
    for header in &cli.headers {
        let Some((name, value)) = header.split_once(':') else {
            eprintln!("{}: invalid header {:?}, expected NAME:VALUE", "Error".red(), header);
            std::process::exit(2);
        };
        config = config.with_header(name.trim(), value.trim());
    }

    let client = match connect(&cli, config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}: {}", "Connection failed".red(), e);
            std::process::exit(1);
        }
    };

    let result = commands::execute(&client, cli.command).await;
    client.close().await?;

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}", commands::format_error(&e));
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn connect(cli: &Cli, config: ClientConfig) -> Result<Client, ClientError> {
    if let Some(url) = &cli.http {
        let transport = HttpClientTransport::new(url.clone(), &config)?;
        return Ok(Client::new(transport, config));
    }
    if let Some(url) = &cli.ws {
        let transport = WsClientTransport::connect(url.clone(), &config).await?;
        return Ok(Client::new(transport, config));
    }
    let transport = TcpClientTransport::connect(cli.server, &config).await?;
    Ok(Client::new(transport, config))
}
