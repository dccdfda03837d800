use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use devsession_macros::progress;
use owo_colors::OwoColorize;
use tracing::{info, instrument};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::api::{ApiBackend, DeviceApi, DiscoveredPeripheral, FakeApiConfig, device_api_from_backend};
use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::config::{ChannelConfig, SessionConfig};
use crate::realtime::{FakeLink, FakeTransport, RealtimeTransport, WebSocketTransport};
use crate::session::{
    ConnectOptions, ConnectedPeripheral, ConnectionController, DeviceSessionManager, ScanRequest,
    Scanner,
};
use crate::store::{JsonFileStore, KeyValueStore, MemoryStore, default_store_path};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "devsession";

/// Collaborators a command runs against: REST client, push transport and
/// persistent store.
#[derive(Debug, Clone)]
pub struct Backend {
    api: Arc<dyn DeviceApi>,
    transport: Arc<dyn RealtimeTransport>,
    store: Arc<dyn KeyValueStore>,
    channel_url: String,
}

impl Backend {
    #[must_use]
    pub fn new(
        api: Arc<dyn DeviceApi>,
        transport: Arc<dyn RealtimeTransport>,
        store: Arc<dyn KeyValueStore>,
        channel_url: impl Into<String>,
    ) -> Self {
        Self {
            api,
            transport,
            store,
            channel_url: channel_url.into(),
        }
    }
}

/// Creates a backend talking HTTP and WebSocket to a running device service.
///
/// History and preferences go to `store_path`, or to the per-user state
/// directory when unset.
///
/// ```
/// let dir = tempfile::TempDir::new()?;
/// let backend = devsession::real_backend(
///     "http://127.0.0.1:8000/api",
///     "ws://127.0.0.1:8000/ws",
///     Some(&dir.path().join("store.json")),
/// )?;
/// let _ = backend;
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Errors
///
/// Returns an error if the API URL is invalid or the store cannot be read.
pub fn real_backend(api_url: &str, ws_url: &str, store_path: Option<&Path>) -> Result<Backend> {
    let api = device_api_from_backend(ApiBackend::Http {
        base_url: api_url.to_string(),
    })?;
    let path = store_path.map_or_else(default_store_path, Path::to_path_buf);
    let store = JsonFileStore::open(path)?;

    Ok(Backend::new(
        api,
        Arc::new(WebSocketTransport),
        Arc::new(store),
        ws_url,
    ))
}

/// Creates an in-process backend driven by fixtures.
///
/// Without `store_path` nothing is persisted between runs.
///
/// # Errors
///
/// Returns an error if the store at `store_path` cannot be read.
pub fn fake_backend(fake_args: FakeArgs, store_path: Option<&Path>) -> Result<Backend> {
    let (scan_fixture, latency, notifications) = fake_args.into_parts();
    let api = device_api_from_backend(ApiBackend::Fake(
        FakeApiConfig::builder()
            .devices(scan_fixture.map(Into::into).unwrap_or_default())
            .latency(latency)
            .build(),
    ))?;
    let frames = notifications.map(Into::into).unwrap_or_default();
    let transport = FakeTransport::new(vec![FakeLink::open(frames)])
        .with_ping_replies()
        .with_subscription_confirmations();
    let store: Arc<dyn KeyValueStore> = match store_path {
        Some(path) => Arc::new(JsonFileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    Ok(Backend::new(api, Arc::new(transport), store, "ws://fake/ws"))
}

/// CLI-facing session operations that render progress spinners.
#[derive(Debug, Clone)]
pub struct SessionHandler {
    controller: ConnectionController,
    scanner: Scanner,
}

impl SessionHandler {
    #[must_use]
    pub fn new(manager: &DeviceSessionManager) -> Self {
        Self {
            controller: manager.controller().clone(),
            scanner: manager.scanner().clone(),
        }
    }

    /// Scans for peripherals.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan is rejected or fails.
    #[progress(
        message = format!("Scanning for {}", humantime::format_duration(request.duration())),
        finished = format!("{} Scan finished", "✓".green()),
    )]
    #[instrument(skip(self), level = "info")]
    pub async fn scan(&self, request: ScanRequest, efficient: bool) -> Result<Vec<DiscoveredPeripheral>> {
        let result = if efficient {
            self.scanner.scan_power_efficient(request.duration()).await
        } else {
            self.scanner.scan(request).await
        };
        result.map_err(|error| {
            tracing::Span::current().pb_set_finish_message(&format!("{} Scan failed", "✗".red()));
            error.into()
        })
    }

    /// Connects to `address`, or to the last connected peripheral when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connect is rejected or fails.
    #[progress(
        message = match address {
            Some(address) => format!("Connecting to {address}"),
            None => "Reconnecting to the last peripheral".to_string(),
        },
        finished = format!("{} Connected", "✓".green()),
    )]
    #[instrument(skip(self, options), level = "info")]
    pub async fn connect(
        &self,
        address: Option<&str>,
        display_name: &str,
        options: ConnectOptions,
    ) -> Result<ConnectedPeripheral> {
        let result = match address {
            Some(address) => self.controller.connect(address, display_name, options).await,
            None => self.controller.reconnect_last(options).await,
        };
        result.map_err(|error| {
            let finish_message = format!("{} Connection failed", "✗".red());
            tracing::Span::current().pb_set_finish_message(&finish_message);
            error.into()
        })
    }
}

/// Runs the CLI command against `backend`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = devsession::Args::try_parse_from([
///     "devsession",
///     "--fake",
///     "--fake-scan",
///     "AA:BB|Widget|-40",
///     "scan",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = match maybe_fake_args {
///     Some(fake_args) => devsession::fake_backend(fake_args, None)?,
///     None => unreachable!("fake mode was requested"),
/// };
/// let mut out = Vec::new();
/// devsession::run(command, &mut out, backend, devsession::OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a session operation
/// fails, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    backend: Backend,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, backend, None, output_format).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a session operation
/// fails, or output writing fails.
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    backend: Backend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(
        command,
        out,
        &SystemTerminalClient,
        backend,
        log_level,
        output_format,
    )
    .await
}

/// Runs the CLI command with an injected terminal client.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a session operation
/// fails, or output writing fails.
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients_and_log_level(command, out, terminal_client, backend, None, output_format)
        .await
}

/// Runs the CLI command with injected clients and explicit telemetry settings.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl devsession::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = devsession::Args::try_parse_from([
///     "devsession",
///     "--log-level",
///     "trace",
///     "--fake",
///     "history",
/// ])?;
/// let log_level = args.log_level();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = devsession::fake_backend(maybe_fake_args.unwrap_or_else(|| {
///     devsession::FakeArgs::builder().build()
/// }), None)?;
/// let mut out = Vec::new();
/// devsession::run_with_clients_and_log_level(
///     command,
///     &mut out,
///     &FakeTerminal,
///     backend,
///     log_level,
///     devsession::OutputFormat::Pretty,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, a session operation
/// fails, or output writing fails.
#[instrument(
    skip(out, terminal_client, backend),
    level = "info",
    fields(command = %command_name(&command), ?log_level, ?output_format)
)]
pub async fn run_with_clients_and_log_level<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let Backend {
        api,
        transport,
        store,
        channel_url,
    } = backend;
    let mut manager = DeviceSessionManager::new(api, store, SessionConfig::default());
    let channel = ChannelConfig::builder().url(channel_url).build();
    let output = crate::cli::Output::new(output_format, terminal_client.stdout_is_terminal());

    let result = match command {
        Command::Scan(args) => crate::cli::scan::run(&manager, &args, out, output).await,
        Command::Connect(args) => {
            crate::cli::connect::run(&mut manager, channel, transport, &args, out, output).await
        }
        Command::Pair(args) => crate::cli::pair::run(&manager, &args, out, output).await,
        Command::History(args) => crate::cli::history::run(&manager, &args, out, output),
        Command::Watch(args) => {
            crate::cli::watch::run(&mut manager, channel, transport, &args, out, output).await
        }
        Command::Settings(args) => crate::cli::settings::run(&manager, &args, out, output),
    };

    manager.shutdown().await;
    info!(ok = result.is_ok(), "command finished");
    result
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Scan(_args) => "scan",
        Command::Connect(_args) => "connect",
        Command::Pair(_args) => "pair",
        Command::History(_args) => "history",
        Command::Watch(_args) => "watch",
        Command::Settings(_args) => "settings",
    }
}

/// Waits for `limit`, or forever when unset.
pub(crate) async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
