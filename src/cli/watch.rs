use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use futures::StreamExt;
use tracing::{info, instrument};

use crate::app::sleep_or_forever;
use crate::config::ChannelConfig;
use crate::realtime::RealtimeTransport;
use crate::session::DeviceSessionManager;

use super::command::parse_duration;
use super::ui::EventLineView;
use super::{Output, OutputFormat, write_json_line};

/// Arguments for the `watch` command.
#[derive(Debug, Default, Args)]
pub struct WatchArgs {
    /// Stop after this many events. If omitted, watch until Ctrl+C.
    #[arg(long)]
    max_events: Option<usize>,
    /// Stop after this long (e.g. `30s`).
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,
    /// Subscribe to these channels once the link is up.
    #[arg(long = "subscribe", value_name = "CHANNEL")]
    channels: Vec<String>,
}

impl WatchArgs {
    #[must_use]
    pub fn new(max_events: Option<usize>) -> Self {
        Self {
            max_events,
            ..Self::default()
        }
    }
}

/// Why a watch ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
enum WatchStop {
    #[display("event limit reached")]
    Limit,
    #[display("duration elapsed")]
    Elapsed,
    #[display("interrupted")]
    Interrupted,
    #[display("event stream ended")]
    Ended,
}

/// Executes the `watch` command.
#[instrument(skip_all, level = "info", fields(max_events = ?args.max_events, duration = ?args.duration))]
pub(crate) async fn run<W>(
    manager: &mut DeviceSessionManager,
    channel: ChannelConfig,
    transport: Arc<dyn RealtimeTransport>,
    args: &WatchArgs,
    out: &mut W,
    output: Output,
) -> Result<()>
where
    W: io::Write,
{
    let mut events = manager.bus().stream(None);
    let realtime = manager.attach_realtime(channel, transport).await;
    if !args.channels.is_empty() {
        realtime.wait_until_connected().await?;
        for channel_id in &args.channels {
            realtime.subscribe(channel_id).await?;
        }
    }

    let deadline = sleep_or_forever(args.duration);
    tokio::pin!(deadline);
    let mut received = 0usize;
    let stop = loop {
        if args.max_events.is_some_and(|limit| received >= limit) {
            break WatchStop::Limit;
        }
        tokio::select! {
            () = &mut deadline => break WatchStop::Elapsed,
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    tracing::warn!(%error, "failed to listen for Ctrl+C");
                }
                break WatchStop::Interrupted;
            }
            event = events.next() => {
                let Some(event) = event else { break WatchStop::Ended };
                received += 1;
                match output.format() {
                    OutputFormat::Pretty => {
                        writeln!(out, "{}", EventLineView::new(received, &event, output.painter()))?;
                    }
                    OutputFormat::Json => write_json_line(out, &event)?,
                }
            }
        }
    };

    realtime.shutdown().await;
    info!(%stop, received, "watch finished");
    if output.format() == OutputFormat::Pretty {
        writeln!(
            out,
            "{}",
            output
                .painter()
                .muted(format!("{received} events, {stop}"))
        )?;
    }
    Ok(())
}
