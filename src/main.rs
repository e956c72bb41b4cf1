use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use telemetry_kit_rs::publisher::{HttpPublisher, JsonLinesPublisher, Publisher};
use telemetry_kit_rs::scheduler::{SensorSet, TelemetryScheduler};
use telemetry_kit_rs::sim::{SimulatedInertial, SimulatedNmea, SimulatedSwitch};
use telemetry_kit_rs::{TelemetryConfig, TravelContext};

#[derive(Parser, Debug)]
#[command(name = "telemetry_kit")]
#[command(
    about = "Vehicle telemetry kit - sampling, collision detection and driving summaries",
    long_about = None
)]
struct Args {
    /// JSON config file (missing fields keep their defaults)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run on simulated sensors instead of the kit hardware. Simulated jolts
    /// peak near 2.9 g, so pair with a lower --threshold to see crashes.
    #[arg(long)]
    simulate: bool,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Backend base URL for HTTP publishing
    #[arg(long, conflicts_with = "output")]
    backend_url: Option<String>,

    /// Append events as JSON lines to this file
    #[arg(long, default_value = "telemetry_events.jsonl")]
    output: PathBuf,

    #[arg(long, default_value = "kit-1")]
    kit_id: String,

    /// Start a trip for this driver immediately
    #[arg(long)]
    driver_id: Option<String>,

    /// Override the g-force crash threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Write live status JSON here after each summary
    #[arg(long)]
    status_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TelemetryConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TelemetryConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.g_force_threshold = threshold;
    }
    if args.status_path.is_some() {
        config.status_path = args.status_path.clone();
    }
    config.validate()?;

    log::info!("Telemetry kit starting");
    log::info!("  Kit: {}", args.kit_id);
    log::info!("  Simulated sensors: {}", args.simulate);
    log::info!("  Crash threshold: {} g", config.g_force_threshold);
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);

    let publisher: Arc<dyn Publisher> = match &args.backend_url {
        Some(url) => {
            log::info!("  Publishing to {}", url);
            Arc::new(HttpPublisher::new(url, Duration::from_secs(10))?)
        }
        None => {
            log::info!("  Publishing to {}", args.output.display());
            Arc::new(JsonLinesPublisher::open(&args.output).await?)
        }
    };

    let travel = Arc::new(TravelContext::new(args.kit_id.clone()));
    if let Some(driver) = &args.driver_id {
        travel.start_trip(args.kit_id.clone(), driver.clone());
    }

    let sensors = open_sensors(&config, args.simulate)?;
    let mut handle = TelemetryScheduler::new(config, publisher, travel.clone(), travel.clone())
        .start(sensors)?;

    if args.duration > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.duration)) => {
                log::info!("Duration reached, stopping...");
            }
            _ = tokio::signal::ctrl_c() => log::info!("Interrupted, stopping..."),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        log::info!("Interrupted, stopping...");
    }

    // The trip stays open until the final partial window is out
    if let Some(report) = handle.shutdown().await {
        if !report.abandoned_workers.is_empty() {
            log::warn!("Abandoned workers: {:?}", report.abandoned_workers);
        }
    }
    travel.end_trip();

    let status = handle.status();
    println!("\n=== Final Stats ===");
    println!("Ticks: {}", status.ticks);
    println!("Samples: {} ({} failed polls)", status.samples, status.failed_polls);
    println!("Crashes detected: {}", status.crashes_detected);
    println!("Summaries published: {}", status.summaries_flushed);
    println!("Publish failures: {}", status.publish_failures);
    println!("GPS fixes accepted: {}", status.gps_accepted);

    Ok(())
}

fn open_sensors(config: &TelemetryConfig, simulate: bool) -> Result<SensorSet> {
    if simulate {
        return Ok(SensorSet {
            inertial: Box::new(SimulatedInertial::new(45)),
            vibration: Box::new(SimulatedSwitch::new(5, 2)),
            shock: Box::new(SimulatedSwitch::new(60, 1)),
            gps: Box::new(SimulatedNmea::new(16.7528, -93.1152, 3)),
        });
    }

    #[cfg(target_os = "linux")]
    {
        Ok(telemetry_kit_rs::hardware::open_sensors(config))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        anyhow::bail!("kit hardware is only supported on Linux; use --simulate")
    }
}
