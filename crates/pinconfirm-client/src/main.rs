use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use pinconfirm::{ConfirmationSession, HttpTransport, Phase};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinconfirm_client::cli::ClientCli;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    // stdout is the user-facing view; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = ClientCli::parse();

    let transport = match HttpTransport::new(cli.endpoint.clone()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(endpoint = %transport.endpoint(), "using verification endpoint");

    let session = ConfirmationSession::start_with_teardown(
        transport,
        Some(cli.link.as_str()),
        Duration::from_secs(cli.teardown_secs),
    )
    .await;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());

    match pinconfirm_client::run(&session, stdin, std::io::stdout()).await {
        Ok(Phase::Committed) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
