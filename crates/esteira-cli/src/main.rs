use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use esteira_core::{ReadError, ReaderConfig, SqsReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "esteira", about = "Tail an SQS queue and ack every message")]
struct Cli {
    /// Queue URL to consume from (overrides the config file)
    #[arg(long)]
    url: Option<String>,

    /// Path to a TOML config file
    #[arg(long, default_value = "esteira.toml")]
    config: String,

    /// Print message bodies to stdout instead of just logging metadata
    #[arg(long)]
    print_bodies: bool,

    /// Emit logs as line-delimited JSON
    #[arg(long)]
    log_json: bool,

    /// Seconds to wait for a clean drain on shutdown
    #[arg(long, default_value = "5")]
    drain_timeout: u64,
}

fn load_config(path: &str) -> ReaderConfig {
    if !Path::new(path).exists() {
        info!(path, "no config file found, using defaults");
        return ReaderConfig::default();
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                info!(path, "loaded configuration");
                config
            }
            Err(e) => {
                eprintln!("error parsing {path}: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("error reading {path}: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    esteira_core::telemetry::init_tracing(cli.log_json);

    let mut config = load_config(&cli.config);
    if let Some(url) = cli.url {
        config.url = url;
    }

    let reader = Arc::new(SqsReader::new(config)?);
    reader.connect().await;
    info!("connected, waiting for messages");

    let drain_timeout = Duration::from_secs(cli.drain_timeout);
    let closer = Arc::clone(&reader);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal, draining");
        if let Err(err) = closer.close(drain_timeout).await {
            warn!(error = %err, "drain did not finish cleanly");
        }
    });

    loop {
        match reader.read().await {
            Ok((msg, acker)) => {
                info!(
                    bytes = msg.body.len(),
                    message_id = msg.metadata.get("sqs_message_id").map(String::as_str),
                    receive_count = msg
                        .metadata
                        .get("sqs_approximate_receive_count")
                        .map(String::as_str),
                    "message"
                );
                if cli.print_bodies {
                    println!("{}", msg.body);
                }
                if let Err(err) = acker.ack().await {
                    error!(error = %err, "failed to ack message");
                }
            }
            Err(ReadError::Cancelled) => continue,
            Err(ReadError::EndOfInput) => break,
            Err(err) => {
                error!(error = %err, "read failed");
                break;
            }
        }
    }

    info!("reader drained, exiting");
    Ok(())
}

/// Resolve when the process is asked to stop: SIGINT from a terminal or
/// SIGTERM from a service manager.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
