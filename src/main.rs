use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use devsession::{Args, OutputFormat, fake_backend, real_backend, run_with_log_level};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let log_level = args.log_level();
        let output_format = args.output_format().unwrap_or(if stdout.is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        });
        let api_url = args.api_url().to_string();
        let ws_url = args.ws_url().to_string();
        let store_path = args.store_path().map(ToOwned::to_owned);
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let backend = match maybe_fake_args {
            Some(fake_args) => fake_backend(fake_args, store_path.as_deref())?,
            None => real_backend(&api_url, &ws_url, store_path.as_deref())?,
        };

        run_with_log_level(command, &mut stdout, backend, log_level, output_format).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
