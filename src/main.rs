//! Command line entry point.
//!
//! ```text
//! wxblend_service run    [--config blend.toml]
//! wxblend_service verify [--config blend.toml]
//! ```
//!
//! `--replay-dir` / `WXBLEND_REPLAY_DIR` (and optionally `--replay-today` /
//! `WXBLEND_REPLAY_TODAY`) run against saved provider responses instead of
//! the live APIs.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use wxblend_service::cli::{Cli, Command};
use wxblend_service::config::Config;
use wxblend_service::ingest::transport::{build_http_client, Transport};
use wxblend_service::logging::{self, Component};
use wxblend_service::pipeline::{CancelToken, Pipeline, PipelineRun};
use wxblend_service::verify;

fn main() -> ExitCode {
    // Replay variables may live in .env alongside the API key.
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init_logger(
        config.log_level(),
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    );

    let (transport, today): (Arc<dyn Transport>, _) = match cli.dev_mode(Utc::now().date_naive()) {
        Some(dev) => {
            logging::info(
                Component::System,
                None,
                &format!("Replaying {} as {}", dev.fixtures_dir.display(), dev.today),
            );
            dev.prepare(&mut config);
            (dev.transport(), dev.today)
        }
        None => match build_http_client() {
            Ok(client) => (Arc::new(client) as Arc<dyn Transport>, Utc::now().date_naive()),
            Err(e) => {
                logging::error(Component::System, None, &format!("HTTP client: {}", e));
                return ExitCode::FAILURE;
            }
        },
    };

    match cli.cmd {
        Command::Verify => {
            let report = verify::run_full_verification(&config, transport, today);
            verify::print_summary(&report);
            if report.summary.failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
        Command::Run => {
            let pipeline = Pipeline::from_config(&config, transport);
            match pipeline.run_at(today, &CancelToken::new()) {
                Ok(run) => {
                    print_run(&run);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    logging::error(Component::System, None, &format!("Run failed: {}", e));
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn print_run(run: &PipelineRun) {
    println!("Evaluation day {} ({} merged hours)", run.evaluation_day, run.table.len());
    println!("Target,MAE,MSE,RMSE,R2");
    for metric in &run.metrics {
        println!("{}", metric);
    }
    for outcome in &run.outcomes {
        if let Err(e) = &outcome.result {
            println!("{}: skipped ({})", outcome.target, e);
        }
    }
    println!("Features:    {}", run.feature_path.display());
    println!("Predictions: {}", run.predictions_path.display());
}
