//! DCAM probe tool
//!
//! Lists cameras, dumps their properties and snaps a test frame. Built
//! against the simulated subsystem unless the `dcam_sdk` feature is on.
//!
//! ```bash
//! dcam_probe list
//! dcam_probe props --index 0 --json
//! dcam_probe snap --index 0 --timeout-ms 2000
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_driver_dcam::config::DcamConfig;
use daq_driver_dcam::property::PropertyAttribute;
use daq_driver_dcam::sdk::DcamApi;
use daq_driver_dcam::{logging, Camera, DeviceSession, DriverContext};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dcam_probe")]
#[command(about = "Inspect cameras on the DCAM-API", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = daq_driver_dcam::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras with their identification strings
    List,

    /// Dump every property of one camera
    Props {
        /// Camera index
        #[arg(long, default_value_t = 0)]
        index: i32,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Capture one frame and print its statistics
    Snap {
        /// Camera index
        #[arg(long, default_value_t = 0)]
        index: i32,

        /// Frame timeout in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u32,
    },
}

#[derive(Serialize)]
struct PropertyReport {
    id: i32,
    name: String,
    value: Option<f64>,
    text: Option<String>,
    attribute: Option<PropertyAttribute>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DcamConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init(&config.logging)?;

    let driver = DriverContext::init_with_config(backend(&config)?, &config.driver)?;
    tracing::info!(cameras = driver.device_count(), "DCAM-API ready");

    let outcome = match cli.command {
        Commands::List => list(&driver),
        Commands::Props { index, json } => props(&driver, index, json),
        Commands::Snap { index, timeout_ms } => snap(&driver, index, timeout_ms),
    };
    driver.uninit()?;
    outcome
}

#[cfg(feature = "dcam_sdk")]
fn backend(_config: &DcamConfig) -> Result<Arc<dyn DcamApi>> {
    Ok(Arc::new(daq_driver_dcam::sdk::native::NativeDcam::new()))
}

#[cfg(all(not(feature = "dcam_sdk"), feature = "mock"))]
fn backend(config: &DcamConfig) -> Result<Arc<dyn DcamApi>> {
    tracing::info!("Using the simulated DCAM-API");
    Ok(Arc::new(daq_driver_dcam::mock::SimulatedDcam::from_config(
        &config.simulator,
    )))
}

#[cfg(not(any(feature = "dcam_sdk", feature = "mock")))]
fn backend(_config: &DcamConfig) -> Result<Arc<dyn DcamApi>> {
    anyhow::bail!("built without a DCAM backend, enable `mock` or `dcam_sdk`")
}

fn list(driver: &DriverContext) -> Result<()> {
    if driver.device_count() == 0 {
        println!("No cameras found");
        return Ok(());
    }
    for index in 0..driver.device_count() {
        let info = driver
            .device_info(index)
            .with_context(|| format!("reading camera {index}"))?;
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        println!("[{index}] {} {}", field(&info.vendor), field(&info.model));
        println!("    serial:   {}", field(&info.camera_id));
        println!("    bus:      {}", field(&info.bus));
        println!("    firmware: {}", field(&info.camera_version));
        println!("    driver:   {}", field(&info.driver_version));
        println!("    api:      {}", field(&info.api_version));
    }
    Ok(())
}

fn report(session: &DeviceSession, id: i32, name: String) -> PropertyReport {
    let attribute = session.get_attribute(id).ok();
    let value = session.get_value(id).ok();
    let text = match (&attribute, value) {
        (Some(attr), Some(v)) => attr.label_of(v).map(str::to_string),
        _ => None,
    };
    PropertyReport {
        id,
        name,
        value,
        text,
        attribute,
    }
}

fn props(driver: &DriverContext, index: i32, json: bool) -> Result<()> {
    let mut session = driver.open(index)?;
    let reports = session
        .properties()
        .map(|entry| entry.map(|(id, name)| report(&session, id, name)))
        .collect::<daq_driver_dcam::Result<Vec<_>>>();
    driver.close(&mut session)?;
    let reports = reports?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    for r in &reports {
        let value = match (&r.text, r.value) {
            (Some(text), _) => text.clone(),
            (None, Some(v)) => v.to_string(),
            (None, None) => "-".to_string(),
        };
        let access = r.attribute.as_ref().map_or("", |a| match (a.readable, a.writable) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "",
        });
        println!("0x{:08X}  {:<40} {:<3} {}", r.id, r.name, access, value);
    }
    Ok(())
}

fn snap(driver: &DriverContext, index: i32, timeout_ms: u32) -> Result<()> {
    let mut camera = Camera::open(driver, index)?;
    let frame = camera.snap(timeout_ms);
    camera.close(driver)?;
    let frame = frame.context("snap failed")?;

    let pixels = frame.pixels_u16();
    let min = pixels.iter().copied().min().unwrap_or_default();
    let max = pixels.iter().copied().max().unwrap_or_default();
    let mean = if pixels.is_empty() {
        0.0
    } else {
        pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / pixels.len() as f64
    };

    println!(
        "{}x{} {:?} frame #{} (slot {})",
        frame.width, frame.height, frame.pixel_type, frame.framestamp, frame.frame_index
    );
    println!("    min {min}  max {max}  mean {mean:.1}");
    Ok(())
}
