//! WebService Test Proxy - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use ws_test_proxy::{ActionStatus, ScenarioConfig, SoapSimulator, WebServiceAction};

#[derive(Parser, Debug)]
#[command(
    name = "ws-test-proxy",
    about = "WebService test proxy - SOAP service simulation and message transformation",
    version
)]
struct Args {
    /// Path to the scenario file
    #[arg(short, long, default_value = "scenario.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Validate the scenario and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(path = ?args.config, "Loading scenario");
    let config = ScenarioConfig::from_file(&args.config)?;

    if args.validate {
        println!("Scenario is valid ({} actions defined)", config.actions.len());
        return Ok(());
    }

    let actions = config.actions.clone();
    let mut simulator = SoapSimulator::new(config.simulator);
    let mut cancel_wired = false;
    let mut failed = 0usize;

    for action in &actions {
        let response = simulator.execute(action).await?;

        match response.status {
            ActionStatus::Executed => info!(message = %response.message, "action executed"),
            ActionStatus::Failed => {
                failed += 1;
                error!(
                    message = %response.message,
                    error = response.error.as_deref().unwrap_or(""),
                    "action failed"
                );
            }
        }

        // Once the server runs, let ctrl-c interrupt a blocked receive.
        if !cancel_wired && matches!(action, WebServiceAction::Start) {
            if let Some(cancel) = simulator.cancel_handle() {
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                });
                cancel_wired = true;
            }
        }
    }

    simulator.cleanup();

    if failed > 0 {
        anyhow::bail!("{failed} action(s) failed");
    }
    Ok(())
}
