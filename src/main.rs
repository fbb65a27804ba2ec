use anyhow::Context;
use carrot_relay::amqp::Connection;
use carrot_relay::connection::ConnectionManager;
use carrot_relay::consumers::{Handler, HandlerError, Incoming, QueueConsumer};
use carrot_relay::publishers::MessageEnvelope;
use carrot_relay::settings::Settings;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Relay messages from the input exchange to the output exchange.
#[derive(Debug, Parser)]
#[command(name = "carrot-relay", version, about)]
struct Cli {
    /// Path to the YAML settings file.
    #[arg(
        short,
        long,
        env = "CARROT_RELAY_CONFIG",
        default_value = "config/relay.yml"
    )]
    config: PathBuf,
}

/// Forwards every message, untouched, to the output exchange.
struct Forward;

#[async_trait::async_trait]
impl Handler for Forward {
    async fn handle(
        &self,
        incoming: &Incoming<'_>,
    ) -> Result<Option<MessageEnvelope>, HandlerError> {
        let mut reply = MessageEnvelope::new(incoming.payload().to_vec());
        reply.properties = Some(incoming.message.properties.clone());
        Ok(Some(reply))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::default();
    if let Err(e) = settings.load(&cli.config) {
        tracing::error!(error.message = %e, "Failed to load the settings");
        return ExitCode::FAILURE;
    }

    let builder = match ConnectionManager::from_settings(&settings) {
        Ok(builder) => builder,
        Err(e) => {
            tracing::error!(error.message = %format!("{e:#}"), "Invalid connection settings");
            return ExitCode::FAILURE;
        }
    };
    let manager = match builder.establish_until_shutdown(shutdown_signal()).await {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!(error.message = %e, "Could not bootstrap the relay");
            return ExitCode::from(e.exit_code());
        }
    };

    if let Err(e) = start_relay(&manager, &settings).await {
        tracing::error!(error.message = %format!("{e:#}"), "Failed to start the relay");
        return ExitCode::FAILURE;
    }

    shutdown_signal().await;
    tracing::info!("Shutting down");
    if let Err(e) = manager.close().await {
        tracing::warn!(error.message = %format!("{e:#}"), "Failed to close the connection");
    }
    ExitCode::SUCCESS
}

/// Attach the forwarding consumer, configured by the `RELAY_QUEUE`, `RELAY_ROUTING_KEYS`
/// and `RELAY_PREFETCH` settings.
async fn start_relay(
    manager: &ConnectionManager<Connection>,
    settings: &Settings,
) -> Result<(), anyhow::Error> {
    let queue_name = settings.get_str("RELAY_QUEUE").unwrap_or_default();
    let routing_keys = settings
        .get_str("RELAY_ROUTING_KEYS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty());
    let mut consumer = QueueConsumer::new(queue_name, Forward).with_routing_keys(routing_keys);
    if let Some(prefetch) = settings.get("RELAY_PREFETCH") {
        let prefetch = prefetch
            .as_u64()
            .or_else(|| prefetch.as_str().and_then(|p| p.trim().parse().ok()))
            .and_then(|p| u16::try_from(p).ok())
            .context("RELAY_PREFETCH must be an integer between 0 and 65535")?;
        consumer = consumer.prefetch_count(prefetch);
    }
    manager.add_consumer(consumer).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error.message = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error.message = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
