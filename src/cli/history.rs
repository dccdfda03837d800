use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use crate::session::DeviceSessionManager;
use crate::store::ConnectionHistoryEntry;

use super::ui::HistoryView;
use super::{Output, OutputFormat, write_json_line};

/// Arguments for the `history` command.
#[derive(Debug, Default, Args)]
pub struct HistoryArgs {
    /// Forget every recorded connection.
    #[arg(long)]
    clear: bool,
}

impl HistoryArgs {
    /// Arguments that clear the history.
    #[must_use]
    pub fn clearing() -> Self {
        Self { clear: true }
    }
}

#[derive(Serialize)]
struct HistoryOutput<'a> {
    cleared: bool,
    entries: &'a [ConnectionHistoryEntry],
}

/// Executes the `history` command.
#[instrument(skip(manager, out), level = "info")]
pub(crate) fn run<W>(
    manager: &DeviceSessionManager,
    args: &HistoryArgs,
    out: &mut W,
    output: Output,
) -> Result<()>
where
    W: io::Write,
{
    let history = manager.history();
    if args.clear {
        history.clear();
    }
    let entries = history.list();

    match output.format() {
        OutputFormat::Pretty => {
            if args.clear {
                writeln!(out, "{}", output.painter().success("Connection history cleared."))?;
            } else {
                writeln!(out, "{}", HistoryView::new(&entries, output.painter()))?;
            }
        }
        OutputFormat::Json => write_json_line(
            out,
            &HistoryOutput {
                cleared: args.clear,
                entries: &entries,
            },
        )?,
    }
    Ok(())
}
