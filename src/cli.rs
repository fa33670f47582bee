//! Command line arguments.

use crate::dev_mode::{DevMode, REPLAY_DIR_ENV, REPLAY_TODAY_ENV};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "wxblend_service", about = "Blend two weather providers and score hourly predictions.")]
pub struct Cli {
    /// TOML configuration file. Built-in defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Replay saved provider responses from this directory instead of
    /// calling the live APIs.
    #[arg(long, env = REPLAY_DIR_ENV, global = true)]
    pub replay_dir: Option<PathBuf>,
    /// Date a replay run treats as today (YYYY-MM-DD).
    #[arg(long, env = REPLAY_TODAY_ENV, global = true, requires = "replay_dir")]
    pub replay_today: Option<NaiveDate>,
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Fetch, merge, export, train and evaluate.
    Run,
    /// Check that both providers answer with usable hours.
    Verify,
}

impl Cli {
    /// Replay settings, when a replay directory was given. Without a pinned
    /// date the replay runs as `today`.
    pub fn dev_mode(&self, today: NaiveDate) -> Option<DevMode> {
        let dir = self.replay_dir.as_ref()?;
        Some(DevMode::new(dir.clone(), self.replay_today.unwrap_or(today)))
    }
}
