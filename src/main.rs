//! Aura Copilot - browser task orchestration engine
//!
//! Speaks JSON lines over stdio: `Inbound` messages and `DriverReply`
//! acknowledgements on stdin, `EngineEvent`s on stdout. Logs go to stderr.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use aura_copilot::{
    BridgeDriver, DriverReply, Engine, EngineConfig, EventBus, Inbound, ModelClient, Settings,
    SettingsUpdate,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// How long the event writer gets to flush after stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut settings = Settings::load();
    settings.apply(env_overrides());

    let mut config = EngineConfig::default();
    if let Some(path) = Settings::settings_path() {
        config = config.with_settings_path(path);
    }

    tracing::info!(
        "Aura Copilot starting: model {} @ {}, speed {}/5, strategy {}",
        or_unset(&settings.model_name),
        or_unset(&settings.endpoint),
        settings.speed(),
        settings.retry_strategy
    );

    let bus = EventBus::default();
    let bridge = Arc::new(BridgeDriver::new(bus.clone()));
    let engine = Engine::with_config(
        settings,
        Arc::new(ModelClient::new()),
        bridge.clone(),
        config,
        bus,
    );

    let writer = tokio::spawn(write_events(engine.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Ignoring malformed line: {}", e);
                continue;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("DriverReply") {
            match serde_json::from_value::<DriverReply>(value) {
                Ok(reply) => {
                    bridge.deliver(reply);
                }
                Err(e) => tracing::warn!("Ignoring malformed driver reply: {}", e),
            }
            continue;
        }

        match serde_json::from_value::<Inbound>(value) {
            Ok(message) => {
                let engine = engine.clone();
                tokio::spawn(async move { engine.handle(message).await });
            }
            Err(e) => tracing::warn!("Ignoring unknown message: {}", e),
        }
    }

    tracing::info!("stdin closed, shutting down");
    // Nobody is left to acknowledge driver commands.
    bridge.disconnect();
    engine.terminate().await;

    // The writer ends once the last bus sender is gone.
    drop(engine);
    drop(bridge);
    match tokio::time::timeout(SHUTDOWN_GRACE, writer).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!("Event writer did not drain in time"),
    }
    Ok(())
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "<unset>"
    } else {
        value
    }
}

/// Settings overrides from `COPILOT_*` environment variables.
fn env_overrides() -> SettingsUpdate {
    SettingsUpdate {
        endpoint: env::var("COPILOT_ENDPOINT").ok(),
        api_key: env::var("COPILOT_API_KEY").ok(),
        model: env::var("COPILOT_MODEL").ok(),
        execution_speed: env::var("COPILOT_SPEED").ok().and_then(|s| s.parse().ok()),
        retry_strategy: env::var("COPILOT_RETRY_STRATEGY")
            .ok()
            .and_then(|s| s.parse().ok()),
        task_duration_minutes: env::var("COPILOT_TASK_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok()),
        ..Default::default()
    }
}

async fn write_events(
    mut events: tokio::sync::broadcast::Receiver<aura_copilot::EngineEvent>,
) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    loop {
        match events.recv().await {
            Ok(event) => {
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                stdout.write_all(line.as_bytes()).await?;
                stdout.flush().await?;
            }
            Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} events", n),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
