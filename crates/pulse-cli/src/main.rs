//! # pulse
//!
//! Command-line client for a realtime event server: watch the event
//! stream or send a single message.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_core::logging::init_subscriber;
use pulse_core::{ConnectionState, EventType};
use pulse_realtime::{ConnectionEvent, RealtimeClient, Subscription};
use pulse_settings::{PulseSettings, RealtimeSettings, load_settings, load_settings_from_path};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Realtime event stream client.
#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Realtime event stream client")]
struct Cli {
    /// Settings file (defaults to `~/.pulse/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Server endpoint, overriding settings.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log filter, overriding settings (e.g. `debug`, `pulse_realtime=trace`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print incoming events as JSON lines until interrupted.
    Watch {
        /// Event type to print; repeatable. All types when omitted.
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<EventType>,
    },
    /// Send one message and exit.
    Send {
        /// Message type tag.
        message_type: String,
        /// JSON payload (defaults to `null`).
        data: Option<String>,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<PulseSettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        if let Some(endpoint) = &self.endpoint {
            settings.realtime.endpoint.clone_from(endpoint);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

/// One output line for an event.
fn render(event_type: EventType, data: &Value) -> String {
    json!({ "type": event_type, "data": data }).to_string()
}

fn parse_data(raw: Option<&str>) -> Result<Value> {
    raw.map_or(Ok(Value::Null), |raw| {
        serde_json::from_str(raw).with_context(|| format!("DATA_JSON is not valid JSON: {raw}"))
    })
}

async fn watch(settings: &RealtimeSettings, types: Vec<EventType>) -> Result<ExitCode> {
    let client = RealtimeClient::from_settings(settings);
    let types = if types.is_empty() {
        EventType::ALL.to_vec()
    } else {
        types
    };
    let _subscriptions: Vec<Subscription> = types
        .into_iter()
        .map(|ty| client.on(ty, move |data| println!("{}", render(ty, data))))
        .collect();

    let mut events = client.lifecycle();
    if !client.connect(&settings.endpoint).await && !settings.auto_reconnect {
        error!(endpoint = %settings.endpoint, "could not connect");
        return Ok(ExitCode::FAILURE);
    }

    let code = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                info!("interrupted, shutting down");
                break ExitCode::SUCCESS;
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::ReconnectExhausted { attempts }) => {
                    error!(attempts, endpoint = %settings.endpoint, "server unreachable");
                    break ExitCode::FAILURE;
                }
                Ok(ConnectionEvent::ReconnectScheduled { attempt, delay_ms }) => {
                    info!(attempt, delay_ms, "reconnecting");
                }
                Ok(ConnectionEvent::StateChanged { state }) => {
                    if state == ConnectionState::Disconnected && !settings.auto_reconnect {
                        warn!("connection closed");
                        break ExitCode::FAILURE;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "lifecycle events lagged"),
                Err(RecvError::Closed) => break ExitCode::FAILURE,
            },
        }
    };

    client.dispose().await;
    Ok(code)
}

async fn send(settings: &RealtimeSettings, message_type: &str, data: Value) -> ExitCode {
    let settings = RealtimeSettings {
        auto_reconnect: false,
        ..settings.clone()
    };
    let client = RealtimeClient::from_settings(&settings);
    if !client.connect(&settings.endpoint).await {
        error!(endpoint = %settings.endpoint, "could not connect");
        return ExitCode::FAILURE;
    }

    let sent = client.send_message(message_type, data);
    client.dispose().await;
    if sent {
        info!(message_type, "message sent");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command {
        Command::Watch { types } => watch(&settings.realtime, types).await,
        Command::Send { message_type, data } => {
            let data = parse_data(data.as_deref())?;
            Ok(send(&settings.realtime, &message_type, data).await)
        }
    }
}
