use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parley_realtime::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_VOICE};
use parley_realtime::{OpenAiRealtimeIssuer, RealtimeConfig};
use parley_server::ServerConfig;
use parley_telemetry::{LogFormat, TelemetryConfig};
use secrecy::SecretString;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Relay for shared realtime voice/chat sessions")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "PARLEY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Outbound events buffered per connection.
    #[arg(
        long,
        default_value_t = 256,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    max_send_queue: usize,

    /// Seconds between WebSocket pings.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    heartbeat_secs: u64,

    /// Seconds of silence before a connection is dropped.
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u64).range(1..))]
    client_timeout_secs: u64,

    /// Default log level (RUST_LOG takes precedence).
    #[arg(long, env = "PARLEY_LOG", default_value = "info")]
    log_level: Level,

    /// Log output: json or pretty.
    #[arg(long, default_value = "json")]
    log_format: LogFormat,

    /// Key used to mint realtime credentials.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_MODEL)]
    realtime_model: String,

    #[arg(long, default_value = DEFAULT_VOICE)]
    realtime_voice: String,

    #[arg(long, default_value = DEFAULT_BASE_URL)]
    openai_base_url: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let telemetry = TelemetryConfig {
        log_level: args.log_level,
        format: args.log_format,
        ..Default::default()
    };
    if let Err(e) = parley_telemetry::init_telemetry(&telemetry) {
        eprintln!("parley: {e}");
    }

    let realtime = RealtimeConfig {
        api_key: args.openai_api_key.map(SecretString::from),
        model: args.realtime_model,
        voice: args.realtime_voice,
        base_url: args.openai_base_url,
    };
    let issuer = OpenAiRealtimeIssuer::new(realtime).expect("Failed to build HTTP client");
    if !issuer.is_configured() {
        tracing::warn!("OPENAI_API_KEY not set; /token will return errors");
    }

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_send_queue: args.max_send_queue,
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        client_timeout: Duration::from_secs(args.client_timeout_secs),
    };

    let handle = match parley_server::start(config, Arc::new(issuer)).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            eprintln!("parley: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(port = handle.port, "Parley ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
    handle.shutdown().await;
}
