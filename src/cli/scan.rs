use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use crate::api::{DiscoveredPeripheral, sort_by_signal_strength};
use crate::app::SessionHandler;
use crate::session::{DeviceSessionManager, ScanRequest};

use super::command::parse_duration;
use super::ui::ScanResultsView;
use super::{Output, OutputFormat, write_json_line};

/// Arguments for the `scan` command.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// How long the backend scans (e.g. `5s`).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    duration: Duration,
    /// Listen for advertisements without requesting scan responses.
    #[arg(long)]
    passive: bool,
    /// Ignore cached results.
    #[arg(long)]
    fresh: bool,
    /// Passive scan that shortens itself when a scan ran recently.
    #[arg(long, conflicts_with_all = ["passive", "fresh"])]
    efficient: bool,
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            passive: false,
            fresh: false,
            efficient: false,
        }
    }
}

impl ScanArgs {
    /// Creates scan arguments for a scan of `duration`.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    fn request(&self) -> ScanRequest {
        ScanRequest::builder()
            .duration(self.duration)
            .active(!self.passive)
            .use_cache(!self.fresh)
            .build()
    }
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    count: usize,
    peripherals: &'a [DiscoveredPeripheral],
}

/// Executes the `scan` command.
#[instrument(skip(manager, args, out), level = "info", fields(efficient = args.efficient))]
pub(crate) async fn run<W>(
    manager: &DeviceSessionManager,
    args: &ScanArgs,
    out: &mut W,
    output: Output,
) -> Result<()>
where
    W: io::Write,
{
    let mut peripherals = SessionHandler::new(manager)
        .scan(args.request(), args.efficient)
        .await?;
    sort_by_signal_strength(&mut peripherals);

    match output.format() {
        OutputFormat::Pretty => {
            writeln!(out, "{}", ScanResultsView::new(&peripherals, output.painter()))?;
        }
        OutputFormat::Json => write_json_line(
            out,
            &ScanOutput {
                count: peripherals.len(),
                peripherals: &peripherals,
            },
        )?,
    }
    Ok(())
}
