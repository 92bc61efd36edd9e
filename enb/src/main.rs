//! Albor Space eNodeB PHY Application
//!
//! Runs the subframe worker pipeline against a ZMQ or simulated radio until
//! interrupted, reporting statistics periodically.

mod config;

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::EnbConfig;
use interfaces::sim_rf::{SimRadio, SimRfConfig};
use interfaces::zmq_rf::{ZmqRadio, ZmqRfConfig};
use interfaces::RadioInterface;
use layers::phy::{EnbPhy, SubframeProcessor, TestSignalProcessor};
use layers::stack::NullStack;

/// Albor Space eNodeB PHY
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Radio driver: zmq or sim
    #[arg(long)]
    device_driver: Option<String>,

    /// Radio arguments (e.g., "tx_port=tcp://*:2000,rx_port=tcp://localhost:2001,base_srate=1.92e6")
    #[arg(long)]
    device_args: Option<String>,

    /// Workers per carrier
    #[arg(long)]
    nof_workers: Option<usize>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn create_radio(config: &EnbConfig) -> Result<Arc<dyn RadioInterface>> {
    let nof_channels = config.nof_channels();
    match config.rf.device_driver.as_str() {
        "zmq" => {
            let zmq_config = ZmqRfConfig::from_device_args(&config.rf.device_args, nof_channels)?;
            info!("ZMQ radio: tx {:?}, rx {:?}, {} MHz",
                  zmq_config.tx_addresses, zmq_config.rx_addresses, zmq_config.sample_rate / 1e6);
            Ok(Arc::new(ZmqRadio::new(zmq_config)?))
        }
        "sim" => {
            let sim_config = SimRfConfig::from_device_args(&config.rf.device_args, nof_channels)?;
            info!("Simulated radio: {} MHz, realtime={}", sim_config.sample_rate / 1e6, sim_config.realtime);
            Ok(Arc::new(SimRadio::new(sim_config)))
        }
        other => Err(anyhow!("Unknown device driver '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EnbConfig::from_file(path)?,
        None => EnbConfig::default(),
    };
    if let Some(level) = &args.log_level {
        config.log.all_level = level.clone();
        config.log.phy_level = level.clone();
        config.log.rf_level = level.clone();
    }
    if let Some(driver) = args.device_driver {
        config.rf.device_driver = driver;
    }
    if let Some(device_args) = args.device_args {
        config.rf.device_args = device_args;
    }
    if let Some(n) = args.nof_workers {
        config.phy.nof_workers = n;
    }

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter_directive()));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space eNodeB PHY");
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path);
    }
    info!("Pipeline: {} carriers x {} workers, {} us subframes, tx offset {}",
          config.phy.carriers.len(), config.phy.nof_workers, config.phy.sf_duration_us, config.phy.tx_offset);

    let radio = create_radio(&config)?;

    let test_signal = config.test_signal.clone();
    let factory = move |_worker: usize, _carrier: usize| -> Box<dyn SubframeProcessor> {
        Box::new(TestSignalProcessor::new(test_signal.amplitude, test_signal.tone_cycles, test_signal.tx_period))
    };

    let phy = Arc::new(EnbPhy::new(config.phy_args(), radio, Arc::new(NullStack), &factory)?);
    phy.common().set_time_alignment(config.phy.time_alignment_us * 1e-6);
    phy.start()?;
    info!("eNodeB PHY running");

    // Start statistics reporting
    let stats_handle = config.metrics.enable.then(|| {
        let phy = phy.clone();
        let period = Duration::from_secs(config.metrics.period_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;

                let metrics = phy.metrics();
                let rf_stats = phy.radio_stats();
                info!("PHY Statistics:");
                info!("  Subframes: {}, TX: {}, TX end: {}, busy workers: {}",
                      metrics.subframes, metrics.tx_count, metrics.tx_end_count, phy.busy_workers());
                info!("  Worker time: avg {:.0} us, max {} us", metrics.avg_worker_us, metrics.max_worker_us);
                if metrics.worker_stalls > 0 || metrics.late_iterations > 0 {
                    warn!("  Stalls: {} (max {} us), late iterations: {}",
                          metrics.worker_stalls, metrics.max_stall_us, metrics.late_iterations);
                }
                info!("  RF: TX samples {}, RX samples {}, underruns {}, overruns {}",
                      rf_stats.tx_samples, rf_stats.rx_samples, rf_stats.tx_underruns, rf_stats.rx_overruns);
                if let Ok(json) = serde_json::to_string(&metrics) {
                    debug!("metrics {}", json);
                }
            }
        })
    });

    // Wait for shutdown signal
    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Run time of {} s elapsed", secs),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Received shutdown signal");
        }
    }

    // Shutdown
    info!("Shutting down eNodeB PHY");
    if let Some(handle) = stats_handle {
        handle.abort();
    }

    // Joining threads blocks; keep it off the async workers
    let stopper = phy.clone();
    tokio::task::spawn_blocking(move || stopper.stop()).await?;

    let metrics = phy.metrics();
    info!("Final: {} subframes, {} transmissions, {} stalls, {} PRACH detections",
          metrics.subframes, metrics.tx_count, metrics.worker_stalls, metrics.prach_detections);
    info!("eNodeB PHY shutdown complete");
    Ok(())
}
