use std::io;

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::instrument;

use crate::session::DeviceSessionManager;
use crate::utils::{format_rfc3339, serialize_rfc3339};

use super::ui::Table;
use super::{Output, OutputFormat, write_json_line};

/// On/off switch accepted by settings flags.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

/// Arguments for the `settings` command.
#[derive(Debug, Default, Args)]
pub struct SettingsArgs {
    /// Ask the backend to reconnect automatically on future connects.
    #[arg(long, value_enum)]
    auto_reconnect: Option<Toggle>,
}

impl SettingsArgs {
    #[must_use]
    pub fn with_auto_reconnect(mut self, toggle: Toggle) -> Self {
        self.auto_reconnect = Some(toggle);
        self
    }
}

#[derive(Serialize)]
struct SettingsOutput {
    auto_reconnect: bool,
    last_connected_device: Option<String>,
    #[serde(serialize_with = "serialize_optional_rfc3339")]
    last_scan: Option<OffsetDateTime>,
}

fn serialize_optional_rfc3339<S>(
    timestamp: &Option<OffsetDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match timestamp {
        Some(timestamp) => serialize_rfc3339(timestamp, serializer),
        None => serializer.serialize_none(),
    }
}

/// Executes the `settings` command.
#[instrument(skip(manager, out), level = "info")]
pub(crate) fn run<W>(
    manager: &DeviceSessionManager,
    args: &SettingsArgs,
    out: &mut W,
    output: Output,
) -> Result<()>
where
    W: io::Write,
{
    let preferences = manager.preferences();
    if let Some(toggle) = args.auto_reconnect {
        preferences.set_auto_reconnect(toggle == Toggle::On);
    }
    let settings = SettingsOutput {
        auto_reconnect: preferences.auto_reconnect(),
        last_connected_device: preferences.last_connected_device(),
        last_scan: preferences.scan_cache_timestamp(),
    };

    match output.format() {
        OutputFormat::Pretty => {
            let painter = output.painter();
            let none = || painter.muted("<none>");
            let table = Table::key_value(
                painter,
                vec![
                    (
                        "auto_reconnect",
                        painter.value(if settings.auto_reconnect { "on" } else { "off" }),
                    ),
                    (
                        "last_connected_device",
                        settings
                            .last_connected_device
                            .as_deref()
                            .map_or_else(none, |address| painter.value(address)),
                    ),
                    (
                        "last_scan",
                        settings.last_scan.map_or_else(none, format_rfc3339),
                    ),
                ],
            );
            writeln!(out, "{}", painter.heading("Settings:"))?;
            writeln!(out, "{table}")?;
        }
        OutputFormat::Json => write_json_line(out, &settings)?,
    }
    Ok(())
}
