use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::api::UNKNOWN_DEVICE_NAME;
use crate::app::SessionHandler;
use crate::config::ChannelConfig;
use crate::error::CliConfigError;
use crate::events::Event;
use crate::realtime::RealtimeTransport;
use crate::session::{ConnectOptions, ConnectedPeripheral, DeviceSessionManager, DisconnectOutcome};

use super::command::parse_duration;
use super::ui::{ConnectedView, EventLineView};
use super::{Output, OutputFormat, write_json_line};

/// Arguments for the `connect` command.
#[derive(Debug, Default, Args)]
pub struct ConnectArgs {
    /// Peripheral address.
    #[arg(required_unless_present = "last")]
    address: Option<String>,
    /// Reconnect to the most recently connected peripheral.
    #[arg(long, conflicts_with = "address")]
    last: bool,
    /// Display name recorded in the history.
    #[arg(long)]
    name: Option<String>,
    /// Connect deadline (e.g. `15s`).
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// Skip the availability probe.
    #[arg(long)]
    no_probe: bool,
    /// Ask the backend to reconnect automatically.
    #[arg(long)]
    auto_reconnect: bool,
    /// Backend-side connect retries.
    #[arg(long, default_value_t = 0)]
    retries: u32,
    /// Stay connected and print events for this long, then disconnect.
    #[arg(long, value_parser = parse_duration)]
    hold: Option<Duration>,
}

impl ConnectArgs {
    /// Connect to `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Reconnect to the last peripheral.
    #[must_use]
    pub fn last() -> Self {
        Self {
            last: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Holds the connection for `duration` before disconnecting.
    #[must_use]
    pub fn with_hold(mut self, duration: Duration) -> Self {
        self.hold = Some(duration);
        self
    }

    fn options(&self) -> ConnectOptions {
        ConnectOptions::builder()
            .maybe_timeout(self.timeout)
            .maybe_auto_reconnect(self.auto_reconnect.then_some(true))
            .retry_count(self.retries)
            .maybe_probe(self.no_probe.then_some(false))
            .build()
    }
}

#[derive(Serialize)]
struct ConnectOutput<'a> {
    peripheral: &'a ConnectedPeripheral,
    state: crate::session::ConnectionState,
}

#[derive(Serialize)]
struct HoldOutput<'a> {
    events: &'a [Event],
    disconnect: &'a DisconnectOutcome,
}

/// Executes the `connect` command.
#[instrument(skip_all, level = "info", fields(address = ?args.address, last = args.last))]
pub(crate) async fn run<W>(
    manager: &mut DeviceSessionManager,
    channel: ChannelConfig,
    transport: Arc<dyn RealtimeTransport>,
    args: &ConnectArgs,
    out: &mut W,
    output: Output,
) -> Result<()>
where
    W: io::Write,
{
    let address = match (&args.address, args.last) {
        (Some(address), _) => Some(address.as_str()),
        (None, true) => None,
        (None, false) => return Err(CliConfigError::MissingConnectTarget.into()),
    };
    let display_name = match (&args.name, address) {
        (Some(name), _) => name.clone(),
        (None, Some(address)) => known_name(manager, address),
        (None, None) => UNKNOWN_DEVICE_NAME.to_string(),
    };

    let events = match args.hold {
        Some(_) => Some(manager.bus().stream(None)),
        None => None,
    };
    let peripheral = SessionHandler::new(manager)
        .connect(address, &display_name, args.options())
        .await?;
    let state = manager.snapshot().connection_state;

    match output.format() {
        OutputFormat::Pretty => writeln!(
            out,
            "{}",
            ConnectedView::new(&peripheral, state, output.painter())
        )?,
        OutputFormat::Json => write_json_line(
            out,
            &ConnectOutput {
                peripheral: &peripheral,
                state,
            },
        )?,
    }

    let (Some(hold), Some(mut events)) = (args.hold, events) else {
        return Ok(());
    };

    let realtime = manager.attach_realtime(channel, transport).await;
    debug!(?hold, "holding connection");
    let mut received = Vec::new();
    let deadline = tokio::time::sleep(hold);
    tokio::pin!(deadline);
    if output.format() == OutputFormat::Pretty {
        writeln!(out)?;
    }
    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = events.next() => {
                let Some(event) = event else { break };
                if output.format() == OutputFormat::Pretty {
                    writeln!(out, "{}", EventLineView::new(received.len() + 1, &event, output.painter()))?;
                }
                received.push(event);
            }
        }
    }

    let outcome = manager.controller().disconnect().await?;
    realtime.shutdown().await;
    match output.format() {
        OutputFormat::Pretty => {
            let painter = output.painter();
            let label = if outcome.acknowledged() {
                painter.success("Disconnected")
            } else {
                painter.warning("Disconnected locally; backend did not confirm")
            };
            writeln!(out, "{label}")?;
        }
        OutputFormat::Json => write_json_line(
            out,
            &HoldOutput {
                events: &received,
                disconnect: &outcome,
            },
        )?,
    }
    Ok(())
}

fn known_name(manager: &DeviceSessionManager, address: &str) -> String {
    manager
        .history()
        .find(address)
        .map(|entry| entry.display_name().to_string())
        .or_else(|| {
            manager
                .snapshot()
                .last_scan_results
                .into_iter()
                .find(|peripheral| peripheral.address() == address)
                .map(|peripheral| peripheral.display_name().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string())
}
