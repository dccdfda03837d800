use std::io;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use crate::api::UNKNOWN_DEVICE_NAME;
use crate::session::DeviceSessionManager;

use super::{Output, OutputFormat, write_json_line};

/// Arguments for the `pair` command.
#[derive(Debug, Args)]
pub struct PairArgs {
    /// Peripheral address.
    address: String,
    /// Display name reported in the pairing event.
    #[arg(long)]
    name: Option<String>,
}

impl PairArgs {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }
}

#[derive(Serialize)]
struct PairOutput<'a> {
    address: &'a str,
    paired: bool,
}

/// Executes the `pair` command.
#[instrument(skip(manager, out), level = "info")]
pub(crate) async fn run<W>(
    manager: &DeviceSessionManager,
    args: &PairArgs,
    out: &mut W,
    output: Output,
) -> Result<()>
where
    W: io::Write,
{
    let display_name = args.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME);
    manager
        .controller()
        .pair(&args.address, display_name)
        .await?;

    match output.format() {
        OutputFormat::Pretty => writeln!(
            out,
            "{} {}",
            output.painter().success("Paired"),
            output.painter().value(&args.address)
        )?,
        OutputFormat::Json => write_json_line(
            out,
            &PairOutput {
                address: &args.address,
                paired: true,
            },
        )?,
    }
    Ok(())
}
