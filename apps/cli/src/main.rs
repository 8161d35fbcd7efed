mod config;
mod monitor;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use dfu_core::driver::{DfuDriver, NusbDriver, find_dfu_devices};
use dfu_core::firmware::{FirmwareCatalog, FirmwareResolver};
use dfu_core::protocol::InterfaceRole;
use dfu_core::session::DfuSession;
use dfu_core::summary::ConnectionSummary;
use dfu_core::{DownloadOutcome, TracingObserver};
use tracing::{error, info, warn};

use crate::config::HostConfig;
use crate::monitor::BusMonitor;

#[derive(Parser, Debug)]
#[command(author, version, about = "USB DFU firmware updater (Pure Rust)", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vendor id filter, e.g. 04d8
    #[arg(long, value_parser = parse_hex_u16)]
    vid: Option<u16>,

    /// Only use the device with this serial number
    #[arg(long)]
    serial: Option<String>,

    /// Firmware image to flash instead of the catalog lookup
    #[arg(short, long)]
    firmware: Option<PathBuf>,

    /// Directory holding the catalog's firmware images
    #[arg(long)]
    firmware_dir: Option<PathBuf>,

    /// List DFU capable devices and exit
    #[arg(short, long)]
    list: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

/// Where firmware images come from.
#[derive(Clone)]
enum ImageSource {
    File(PathBuf),
    Catalog(FirmwareCatalog),
}

impl FirmwareResolver for ImageSource {
    fn resolve(&self, product_name: &str) -> Option<Vec<u8>> {
        match self {
            ImageSource::File(path) => match std::fs::read(path) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read firmware image");
                    None
                }
            },
            ImageSource::Catalog(catalog) => catalog.resolve(product_name),
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    if args.vid.is_some() {
        config.vendor_id = args.vid;
    }
    if args.serial.is_some() {
        config.serial = args.serial.clone();
    }
    if let Some(dir) = &args.firmware_dir {
        config.session.firmware = config.session.firmware.clone().with_base_dir(dir);
    }

    if args.list {
        return list_devices(&config);
    }

    info!("Starting DFU tool (nusb backend)...");

    let source = match args.firmware {
        Some(path) => ImageSource::File(path),
        None => ImageSource::Catalog(config.session.firmware.clone()),
    };
    let mut session: DfuSession<NusbDriver, TracingObserver> =
        DfuSession::new(config.session.clone()).with_resolver(source.clone());
    let _monitor = BusMonitor::spawn(session.disconnect_handle());

    let driver = discover(&config, None)?;
    let outcome = session.connect(driver)?;

    match outcome.role {
        InterfaceRole::Runtime => {
            let detached = session.enter_dfu_mode()?;
            info!(?detached, "Waiting for the device to re-enumerate in DFU mode");
            let driver = wait_for_dfu_mode(&config)?;
            let outcome = session.connect(driver)?;
            if outcome.role != InterfaceRole::Dfu {
                bail!("Device came back as {} instead of DFU", outcome.role);
            }
            report(session.download_staged()?);
        }
        InterfaceRole::Dfu => {
            let product = outcome.summary.device.product_name.clone().unwrap_or_default();
            let image = source
                .resolve(&product)
                .with_context(|| format!("No firmware image for \"{product}\""))?;
            report(session.download(&image)?);
        }
        InterfaceRole::Unknown(protocol) => {
            bail!("Interface protocol 0x{protocol:02x} is neither runtime nor DFU mode")
        }
    }

    session.disconnect();
    Ok(())
}

fn report(outcome: DownloadOutcome) {
    match outcome {
        DownloadOutcome::Complete => info!("Firmware download complete"),
        DownloadOutcome::DeviceReset => info!("Firmware download complete, device reset"),
        DownloadOutcome::ManifestationTolerated => {
            warn!("Firmware downloaded but the device did not reset")
        }
    }
}

/// First DFU interface matching the host filters, optionally restricted to
/// one interface role.
fn discover(config: &HostConfig, role: Option<InterfaceRole>) -> Result<NusbDriver> {
    find_dfu_devices(config.vendor_id, config.serial.as_deref())?
        .into_iter()
        .find(|d| role.is_none_or(|r| d.info().role() == r))
        .context("No matching DFU device found")
}

fn wait_for_dfu_mode(config: &HostConfig) -> Result<NusbDriver> {
    let timeout = Duration::from_millis(config.reconnect_timeout_ms);
    let start = Instant::now();
    loop {
        if let Ok(driver) = discover(config, Some(InterfaceRole::Dfu)) {
            return Ok(driver);
        }
        if start.elapsed() >= timeout {
            bail!("Device did not reappear in DFU mode within {}ms", timeout.as_millis());
        }
        thread::sleep(Duration::from_millis(250));
    }
}

fn list_devices(config: &HostConfig) -> Result<()> {
    let drivers = find_dfu_devices(config.vendor_id, config.serial.as_deref())?;
    if drivers.is_empty() {
        println!("No DFU devices found");
    }
    for driver in drivers {
        let summary = ConnectionSummary {
            device: driver.info().clone(),
            descriptor: None,
            memory: None,
        };
        println!("{}", summary.dfu_line());
    }
    Ok(())
}
