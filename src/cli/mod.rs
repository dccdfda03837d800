pub(crate) mod command;
pub(crate) mod connect;
pub(crate) mod history;
pub(crate) mod pair;
pub(crate) mod scan;
pub(crate) mod settings;
pub(crate) mod ui;
pub(crate) mod watch;

use std::io;

use serde::Serialize;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::connect::ConnectArgs;
pub use self::history::HistoryArgs;
pub use self::pair::PairArgs;
pub use self::scan::ScanArgs;
pub use self::settings::{SettingsArgs, Toggle};
pub use self::watch::WatchArgs;

use self::ui::Painter;

/// Where and how a command renders its results.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Output {
    format: OutputFormat,
    painter: Painter,
}

impl Output {
    pub(crate) fn new(format: OutputFormat, stdout_is_terminal: bool) -> Self {
        Self {
            format,
            painter: Painter::new(stdout_is_terminal && format == OutputFormat::Pretty),
        }
    }

    pub(crate) fn format(&self) -> OutputFormat {
        self.format
    }

    pub(crate) fn painter(&self) -> &Painter {
        &self.painter
    }
}

pub(crate) fn write_json_line(out: &mut impl io::Write, value: &impl Serialize) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
