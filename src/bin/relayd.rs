//! relayd - fiducial marker pose relay
//!
//! This daemon:
//! 1. Captures frames from the configured camera
//! 2. Detects markers and stores poses in a fixed record pool
//! 3. Broadcasts one UDP datagram per published record
//! 4. Serves the latest frame over HTTP (optional)
//! 5. Renders an annotated preview to the configured display sink

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use marker_relay::{PipelineError, Relay, RelaydConfig, StopToken};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file (overrides RELAY_CONFIG).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,
    /// Disable the HTTP API even if the config enables it.
    #[arg(long)]
    no_http: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = RelaydConfig::load_from(args.config.as_deref())?;
    if args.no_http {
        cfg.http.enabled = false;
    }

    let stop = StopToken::new();
    {
        let stop = stop.clone();
        if let Err(err) = ctrlc::set_handler(move || stop.stop()) {
            log::warn!("failed to install Ctrl+C handler: {}", err);
        }
    }

    log::info!(
        "relayd {} starting: camera {} -> udp {}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.device,
        cfg.udp.target
    );
    let relay = match Relay::start(&cfg, stop) {
        Ok(relay) => relay,
        Err(err) => {
            if let Some(pipeline_err) = err.downcast_ref::<PipelineError>() {
                log::error!("startup failed: {}", pipeline_err);
            }
            return Err(err);
        }
    };

    let stats = relay.run(args.seconds.map(Duration::from_secs))?;
    log::info!("relayd stopped: {}", stats);
    Ok(())
}
