use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::api::ScanFixture;
use crate::cli::connect::ConnectArgs;
use crate::cli::history::HistoryArgs;
use crate::cli::pair::PairArgs;
use crate::cli::scan::ScanArgs;
use crate::cli::settings::SettingsArgs;
use crate::cli::watch::WatchArgs;
use crate::error::FixtureError;
use crate::realtime::NotificationFixture;

pub(crate) const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
pub(crate) const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/ws";

/// Command-line options for the device session tool.
#[derive(Debug, Parser)]
#[command(
    name = "devsession",
    about = "Scan, connect and watch devices through the device backend."
)]
pub struct Args {
    /// Base URL of the backend REST API.
    #[arg(long, global = true, env = "DEVSESSION_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
    /// URL of the backend push channel.
    #[arg(long, global = true, env = "DEVSESSION_WS_URL", default_value = DEFAULT_WS_URL)]
    ws_url: String,
    /// File holding connection history and preferences.
    #[arg(long, global = true, env = "DEVSESSION_STORE_PATH")]
    store_path: Option<PathBuf>,
    /// Log level override (takes precedence over `RUST_LOG`).
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the in-process fake backend instead of the HTTP API.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `address|name|rssi|service,service;...`.
    #[arg(long, global = true, requires = "fake")]
    fake_scan: Option<ScanFixture>,
    /// Artificial fake backend latency (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_latency: Option<Duration>,
    /// Fake push notifications as `channel=value,...`.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationFixture>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use devsession::{Args, Command, HistoryArgs};
    ///
    /// let args = Args::new(Command::History(HistoryArgs::default()));
    /// assert_eq!("http://127.0.0.1:8000/api", args.api_url());
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            store_path: None,
            log_level: None,
            output: None,
            fake: false,
            fake_scan: None,
            fake_latency: None,
            fake_notifications: None,
            command,
        }
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            latency,
            notifications,
        } = fake;

        self.fake = true;
        self.fake_scan = scan_fixture;
        self.fake_latency = Some(latency);
        self.fake_notifications = notifications;
        self
    }

    /// Persists history and preferences at `path`.
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    #[must_use]
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    #[must_use]
    pub fn store_path(&self) -> Option<&Path> {
        self.store_path.as_deref()
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed CLI arguments into command and optional fake-backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_latency,
            fake_notifications,
            command,
            ..
        } = self;

        let fake_args = fake.then(|| FakeArgs {
            scan_fixture: fake_scan,
            latency: fake_latency.unwrap_or(Duration::ZERO),
            notifications: fake_notifications,
        });

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: Option<ScanFixture>,
    #[builder(default)]
    latency: Duration,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationFixture>,
}

impl FakeArgs {
    pub(crate) fn into_parts(self) -> (Option<ScanFixture>, Duration, Option<NotificationFixture>) {
        (self.scan_fixture, self.latency, self.notifications)
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a discovery scan and list peripherals by signal strength.
    Scan(ScanArgs),
    /// Connect to a peripheral and record it in the history.
    Connect(ConnectArgs),
    /// Pair with a peripheral without connecting.
    Pair(PairArgs),
    /// Show or clear recently connected peripherals.
    History(HistoryArgs),
    /// Stream realtime channel events.
    Watch(WatchArgs),
    /// Show or change persisted preferences.
    Settings(SettingsArgs),
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Rendering of command results.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables for people.
    Pretty,
    /// One pretty-printed JSON document per result.
    Json,
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
