//! RTK bridge: mediates between a GNSS receiver on a serial link and an
//! NTRIP caster over TCP.
//!
//! Usage:
//!   rtk-bridge -c /etc/rtk-bridge/config.json
//!   rtk-bridge -c /etc/rtk-bridge/config.json --stderr   # log to stderr

mod checksum;
mod config;
mod error;
mod geodesy;
mod mediator;
mod nmea;
mod ntrip;
mod rtcm;
mod serial;
mod sink;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "rtk-bridge", about = "RTK positioning client — serial/NTRIP bridge")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/rtk-bridge/config.json")]
    config: PathBuf,

    /// Log to stderr instead of syslog (useful for debugging).
    #[arg(long)]
    stderr: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(!cli.stderr).expect("failed to set up logging");

    let cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!("config error: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = config::validate_config(&cfg) {
        error!("config validation: {e}");
        process::exit(1);
    }

    info!(
        "rtk-bridge starting (serial={:?}, ntrip={:?})",
        cfg.serial.as_ref().map(|s| &s.port),
        cfg.ntrip.as_ref().map(|n| format!("{}:{}/{}", n.host, n.port, n.mountpoint)),
    );

    let sink: Arc<dyn sink::PositionSink> = Arc::new(sink::FilteringSink::new(sink::LoggingSink));
    let outcome = mediator::Mediator::start(&cfg, sink).await;

    if let Some(e) = &outcome.error {
        error!("mediator start failed: {e}; connected endpoints remain open");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install ctrl_c handler: {e}");
    } else {
        info!("shutdown signal received");
    }

    outcome.mediator.stop().await;

    if outcome.error.is_some() {
        process::exit(1);
    }
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: "rtk-bridge".into(),
            pid: process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }
    Ok(())
}
