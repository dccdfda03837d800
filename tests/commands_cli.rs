use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;

use devsession::{
    Args, Command, ConnectArgs, FakeArgs, HistoryArgs, OutputFormat, PairArgs, ScanArgs,
    SessionError, SettingsArgs, Toggle, WatchArgs,
};

#[derive(Debug, Default)]
struct FakeTerminalClient;

impl devsession::TerminalClient for FakeTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        false
    }

    fn stderr_is_terminal(&self) -> bool {
        false
    }
}

async fn run_with_parsed_args(args: Args, output_format: OutputFormat) -> anyhow::Result<String> {
    let mut output = Vec::new();
    let store_path = args.store_path().map(ToOwned::to_owned);
    let api_url = args.api_url().to_string();
    let ws_url = args.ws_url().to_string();
    let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
    let backend = match maybe_fake_args {
        Some(fake_args) => devsession::fake_backend(fake_args, store_path.as_deref())?,
        None => devsession::real_backend(&api_url, &ws_url, store_path.as_deref())?,
    };
    devsession::run_with_clients(
        command,
        &mut output,
        &FakeTerminalClient,
        backend,
        output_format,
    )
    .await?;
    Ok(String::from_utf8(output)?)
}

async fn run_with_argv<const N: usize>(argv: [&str; N]) -> anyhow::Result<String> {
    let parsed_args = Args::try_parse_from(argv)?;
    run_with_parsed_args(parsed_args, OutputFormat::Pretty).await
}

fn json_documents(stdout: &str) -> anyhow::Result<Vec<Value>> {
    Ok(serde_json::Deserializer::from_str(stdout)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()?)
}

fn fake_with_scan(fixture: &str) -> anyhow::Result<FakeArgs> {
    Ok(FakeArgs::builder().scan_fixture(fixture)?.build())
}

#[tokio::test]
async fn scan_command_lists_peripherals_strongest_first() -> anyhow::Result<()> {
    let stdout = run_with_argv([
        "devsession",
        "--fake",
        "--fake-scan",
        "CC:DD;AA:BB|Widget|-40|180d",
        "scan",
        "--duration",
        "1s",
    ])
    .await?;

    assert_snapshot!(stdout.trim_end(), @r"
    Discovered peripherals (2):
    ╭─────────┬────────────────┬─────────┬──────────╮
    │ address │ name           │ signal  │ services │
    ├─────────┼────────────────┼─────────┼──────────┤
    │ AA:BB   │ Widget         │ -40 dBm │ 180d     │
    │ CC:DD   │ Unknown Device │ -       │          │
    ╰─────────┴────────────────┴─────────┴──────────╯
    ");
    Ok(())
}

#[tokio::test]
async fn scan_command_json_reports_count_and_peripherals() -> anyhow::Result<()> {
    let args = Args::new(Command::Scan(ScanArgs::new(Duration::from_secs(1))))
        .with_fake(fake_with_scan("AA:01|Far|-90;AA:02|Near|-30")?);

    let stdout = run_with_parsed_args(args, OutputFormat::Json).await?;
    let documents = json_documents(&stdout)?;

    assert_eq!(1, documents.len());
    assert_eq!(json!(2), documents[0]["count"]);
    assert_eq!(json!("AA:02"), documents[0]["peripherals"][0]["address"]);
    assert_eq!(json!("AA:01"), documents[0]["peripherals"][1]["address"]);
    Ok(())
}

#[test]
fn invalid_scan_fixture_is_rejected() {
    let result = FakeArgs::builder().scan_fixture("AA:BB|Widget|loud");
    assert!(matches!(
        result,
        Err(devsession::FixtureError::InvalidSignalStrength(_))
    ));
}

#[test]
fn connect_requires_an_address_or_last() {
    let error = Args::try_parse_from(["devsession", "--fake", "connect"])
        .expect_err("connect without a target should fail");
    assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
}

#[test]
fn efficient_scan_conflicts_with_passive() {
    let error = Args::try_parse_from(["devsession", "scan", "--efficient", "--passive"])
        .expect_err("conflicting scan flags should fail");
    assert_eq!(ErrorKind::ArgumentConflict, error.kind());
}

#[tokio::test]
async fn connect_then_history_share_the_store() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("store.json");
    let connect = Args::new(Command::Connect(
        ConnectArgs::new("AA:BB").with_name("Widget"),
    ))
    .with_fake(FakeArgs::builder().build())
    .with_store_path(&path);

    let stdout = run_with_parsed_args(connect, OutputFormat::Json).await?;
    let connected = json_documents(&stdout)?;
    assert_eq!(json!("connected"), connected[0]["state"]);
    assert_eq!(json!("AA:BB"), connected[0]["peripheral"]["address"]);

    let history = Args::new(Command::History(HistoryArgs::default()))
        .with_fake(FakeArgs::builder().build())
        .with_store_path(&path);
    let stdout = run_with_parsed_args(history, OutputFormat::Pretty).await?;
    assert!(stdout.starts_with("Recent connections:"));
    assert!(stdout.contains("│ 1 │ AA:BB   │ Widget │"));

    let clear = Args::new(Command::History(HistoryArgs::clearing()))
        .with_fake(FakeArgs::builder().build())
        .with_store_path(&path);
    let stdout = run_with_parsed_args(clear, OutputFormat::Json).await?;
    assert_eq!(
        json!({"cleared": true, "entries": []}),
        json_documents(&stdout)?[0]
    );
    Ok(())
}

#[tokio::test]
async fn connect_last_without_history_fails() -> anyhow::Result<()> {
    let args = Args::new(Command::Connect(ConnectArgs::last())).with_fake(FakeArgs::builder().build());

    let error = run_with_parsed_args(args, OutputFormat::Pretty)
        .await
        .expect_err("nothing to reconnect to");

    assert!(matches!(
        error.downcast_ref::<SessionError>(),
        Some(SessionError::NoPreviousDevice)
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_hold_streams_events_then_disconnects() -> anyhow::Result<()> {
    let fake = FakeArgs::builder().notifications("temp=21")?.build();
    let args = Args::new(Command::Connect(
        ConnectArgs::new("AA:BB")
            .with_name("Widget")
            .with_hold(Duration::from_secs(1)),
    ))
    .with_fake(fake);

    let stdout = run_with_parsed_args(args, OutputFormat::Json).await?;
    let documents = json_documents(&stdout)?;

    assert_eq!(2, documents.len());
    let kinds = documents[1]["events"]
        .as_array()
        .expect("events should be an array")
        .iter()
        .map(|event| event["kind"].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        vec![
            json!("connecting"),
            json!("connected"),
            json!("channel-connected"),
            json!("notification-received"),
        ],
        kinds
    );
    assert_eq!(json!({"outcome": "confirmed"}), documents[1]["disconnect"]);
    Ok(())
}

#[tokio::test]
async fn pair_command_reports_the_address() -> anyhow::Result<()> {
    let args = Args::new(Command::Pair(PairArgs::new("AA:BB"))).with_fake(FakeArgs::builder().build());

    let stdout = run_with_parsed_args(args, OutputFormat::Pretty).await?;

    assert_eq!("Paired AA:BB", stdout.trim_end());
    Ok(())
}

#[tokio::test]
async fn settings_command_updates_auto_reconnect() -> anyhow::Result<()> {
    let args = Args::new(Command::Settings(
        SettingsArgs::default().with_auto_reconnect(Toggle::On),
    ))
    .with_fake(FakeArgs::builder().build());

    let stdout = run_with_parsed_args(args, OutputFormat::Json).await?;

    assert_eq!(
        json!({"auto_reconnect": true, "last_connected_device": null, "last_scan": null}),
        json_documents(&stdout)?[0]
    );
    Ok(())
}

#[tokio::test]
async fn watch_command_prints_channel_events() -> anyhow::Result<()> {
    let fake = FakeArgs::builder()
        .notifications(r#"heart-rate=72,battery="low""#)?
        .build();
    let args = Args::new(Command::Watch(WatchArgs::new(Some(3)))).with_fake(fake);

    let stdout = run_with_parsed_args(args, OutputFormat::Pretty).await?;

    assert_snapshot!(stdout.trim_end(), @r"
    [0001] channel-connected url=ws://fake/ws
    [0002] notification-received channel_id=heart-rate value=72
    [0003] notification-received channel_id=battery value=low
    3 events, event limit reached
    ");
    Ok(())
}
