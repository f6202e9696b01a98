//! Posture Monitor Core - Main Entry Point

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use posture_core::constants::{APP_NAME, APP_VERSION};
use posture_core::logic::analysis_loop::{self, ReplaySource};
use posture_core::logic::dataset::{reconcile_session, SessionLog};
use posture_core::logic::events::LogSink;
use posture_core::{Monitor, MonitorConfig};

#[derive(Parser, Debug)]
#[command(name = "posture-core")]
#[command(about = "Posture monitor core: fusion, decisions, alarms and session logs")]
#[command(version)]
struct Args {
    /// JSON config file (defaults apply to missing fields)
    #[arg(short, long, env = "POSTURE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a firmware capture through the full pipeline
    Run {
        /// Captured serial log
        #[arg(short, long)]
        input: PathBuf,

        /// Profile id from the user table (anonymous when omitted)
        #[arg(short, long)]
        profile: Option<i64>,

        /// Override the session logs directory
        #[arg(long, env = "POSTURE_LOGS_DIR")]
        logs_dir: Option<PathBuf>,
    },
    /// Merge a finished session into integrated_data_<session>.csv
    Reconcile {
        /// Session folder holding the data_*.csv windows
        #[arg(short, long)]
        folder: PathBuf,

        /// Session id (YYYYmmddHHMMSS)
        #[arg(short, long)]
        session: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("Starting {} v{}", APP_NAME, APP_VERSION);

    let mut config = match &args.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::from_env()?,
    };

    match args.command {
        Command::Run { input, profile, logs_dir } => {
            if let Some(dir) = logs_dir {
                config.logging.logs_dir = dir;
            }

            let monitor = Arc::new(Monitor::from_config(&config, profile, Arc::new(LogSink))?);
            let source = ReplaySource::open(&input)?;
            let stop = Arc::new(AtomicBool::new(false));

            let worker = analysis_loop::spawn(monitor.clone(), source, stop);
            let lines = worker.join().map_err(|_| "ingestion worker panicked")?;
            log::info!("Replayed {} lines from {:?}", lines, input);

            let summary = monitor.close()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if summary.samples > 0 {
                let output = reconcile_session(&monitor.session_folder(), &summary.session_id)?;
                println!("Integrated log: {}", output.display());
            }
        }
        Command::Reconcile { folder, session } => {
            let repaired = SessionLog::recover(&folder)?;
            if repaired > 0 {
                log::warn!("Repaired {} torn window file(s)", repaired);
            }
            let output = reconcile_session(&folder, &session)?;
            println!("Integrated log: {}", output.display());
        }
    }

    Ok(())
}
