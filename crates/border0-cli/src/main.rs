//! border0-listen: example Border0 listener.
//!
//! Binds a named socket, accepts inbound streams through the Border0 control
//! plane, and serves each one with an echo or a minimal HTTP handler.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use border0_core::SocketType;

/// How each accepted stream is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Copy every byte back to the sender.
    Echo,
    /// Answer one HTTP request with a greeting.
    Http,
}

/// border0-listen: serve traffic for a Border0 socket
#[derive(Debug, Parser)]
#[command(name = "border0-listen", version, about = "Serve traffic for a Border0 socket")]
pub struct Cli {
    /// Socket name
    #[arg(short = 's', long = "socket-name")]
    pub socket_name: Option<String>,

    /// Socket type: http, ssh, database, or tls
    #[arg(short = 't', long = "socket-type")]
    pub socket_type: Option<SocketType>,

    /// Auth token (default: BORDER0_AUTH_TOKEN)
    #[arg(long = "token")]
    pub token: Option<String>,

    /// Policy to attach at startup (repeatable)
    #[arg(short = 'p', long = "policy")]
    pub policies: Vec<String>,

    /// Control-plane host:port
    #[arg(long = "control-endpoint")]
    pub control_endpoint: Option<String>,

    /// Management API base URL
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// Accept queue depth
    #[arg(long = "queue-depth")]
    pub queue_depth: Option<usize>,

    /// Use plain TCP for control and relay connections (testing only)
    #[arg(long = "insecure")]
    pub insecure: bool,

    /// Config file path (default: ~/.border0/listener.toml)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Stream handler
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = Mode::Echo)]
    pub mode: Mode,

    /// Log level when RUST_LOG is unset
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &cli.log_level;
        EnvFilter::new(format!(
            "border0_listen={level},border0_client={level},border0_core={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let result = async {
        let path = cli.config.clone().unwrap_or_else(config::default_path);
        let file = config::Config::load(&path)?;
        let listener_config = config::merge(&cli, file.listener)?;
        commands::serve::run(listener_config, cli.mode).await
    }
    .await;

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("border0-listen: {e:#}");
        std::process::exit(1);
    }
}
