//! CLI Entry Point for medlink
//!
//! # Usage
//!
//! ```bash
//! medlink devices
//! medlink acquire --form 101 --param 1 --param 170.0
//! medlink send --device ecg --param 1234 --param 77 --param "SUZUKI ICHIRO"
//! medlink simulate --model dc250t --frame result.bin
//! medlink validate
//! ```
//!
//! Results are printed as JSON on stdout; logs go to stderr. The process
//! exits with the legacy numeric status of the result code.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medlink::config::{AppConfig, DEFAULT_CONFIG_PATH};
use medlink::{simulate, tracing_init};
use medlink_core::{DeviceModel, MeasurementRequest, MeasurementResult};
use medlink_hardware::{
    DriverRegistry, HardwareConfig, Orchestrator, SerialFactory, SerialSettings,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "medlink")]
#[command(
    version,
    about = "Clinical instrument link: drive bedside devices over serial",
    long_about = None
)]
struct Cli {
    /// Application configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Device configuration file (overrides `hardware_config`)
    #[arg(long)]
    devices: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured devices and whether a driver serves them
    Devices,

    /// Run one measurement over the serial transport
    Acquire {
        /// Examination form identifier
        #[arg(long)]
        form: u32,
        /// Sub-identifier within the form
        #[arg(long, default_value_t = 0)]
        sub: u32,
        /// Parameters in slot order, starting at slot 1
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Transmit patient metadata to a send-only device
    Send {
        /// Device id from the device configuration
        #[arg(long)]
        device: String,
        /// Parameters in slot order, starting at slot 1
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Run a driver against scripted frames (dry run)
    Simulate {
        /// Instrument model label, e.g. `dc320`
        #[arg(long)]
        model: DeviceModel,
        /// Frame file or hex string; repeat for multi-frame exchanges
        #[arg(long = "frame")]
        frames: Vec<String>,
        /// Parameters in slot order, starting at slot 1
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("cannot load {}", cli.config.display()))?;
    config.validate().map_err(anyhow::Error::msg)?;
    tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(name = %config.application.name, "starting");

    let devices_path = cli.devices.unwrap_or_else(|| config.hardware_config.clone());

    match cli.command {
        Commands::Devices => list_devices(&devices_path),
        Commands::Acquire { form, sub, params } => {
            let request = MeasurementRequest {
                form_id: form,
                sub_id: sub,
                params: simulate::params_from_args(&params),
            };
            let orchestrator = build_orchestrator(&config, &devices_path)?;
            let result = acquire_with_interrupt(orchestrator, request).await;
            print_result(&result)
        }
        Commands::Send { device, params } => {
            let orchestrator = build_orchestrator(&config, &devices_path)?;
            let code = orchestrator
                .send(&device, simulate::params_from_args(&params))
                .await;
            print_result(&MeasurementResult::from_code(code))
        }
        Commands::Simulate {
            model,
            frames,
            params,
        } => {
            let frames = frames
                .iter()
                .map(|arg| simulate::load_frame(arg))
                .collect::<Result<Vec<_>>>()?;
            let simulation = simulate::run(
                &DriverRegistry::builtin(),
                model,
                frames,
                simulate::params_from_args(&params),
                &config.orchestrator.limits(),
            );
            println!("{}", serde_json::to_string_pretty(&simulation)?);
            Ok(ExitCode::from(simulation.result.code.status_code()))
        }
        Commands::Validate => {
            let devices = HardwareConfig::load(&devices_path)?;
            let registry = DriverRegistry::builtin();
            for device in &devices.devices {
                if !registry.supports(device.model) {
                    warn!(device = %device.id, model = %device.model, "no driver for model");
                }
            }
            println!(
                "configuration ok: {} devices, {} items",
                devices.devices.len(),
                devices.items.len()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_orchestrator(config: &AppConfig, devices_path: &Path) -> Result<Arc<Orchestrator>> {
    let devices = HardwareConfig::load(devices_path)?;
    let settings = SerialSettings {
        baud_rate: config.serial.baud_rate,
        read_timeout: Duration::from_millis(config.serial.read_timeout_ms),
        ..SerialSettings::default()
    };
    Ok(Arc::new(Orchestrator::new(
        Arc::new(devices),
        Arc::new(DriverRegistry::builtin()),
        Arc::new(SerialFactory::new(settings)),
        config.orchestrator.limits(),
    )))
}

/// Run `request`, cancelling it on Ctrl-C.
async fn acquire_with_interrupt(
    orchestrator: Arc<Orchestrator>,
    request: MeasurementRequest,
) -> MeasurementResult {
    let canceller = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling measurement");
                orchestrator.cancel();
            }
        })
    };
    let result = orchestrator.acquire(request).await;
    canceller.abort();
    result
}

fn print_result(result: &MeasurementResult) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(ExitCode::from(result.code.status_code()))
}

fn list_devices(path: &Path) -> Result<ExitCode> {
    let devices = HardwareConfig::load(path)?;
    let registry = DriverRegistry::builtin();

    println!("{:<16} {:<14} {:<14} {:<9} ADDRESS", "ID", "MODEL", "ARCHETYPE", "DRIVER");
    for device in &devices.devices {
        let driver = if registry.receiver(device.model).is_some() {
            "receive"
        } else if registry.sender(device.model).is_some() {
            "send"
        } else {
            "none"
        };
        println!(
            "{:<16} {:<14} {:<14} {:<9} {}",
            device.id,
            device.model,
            device.model.archetype().name(),
            driver,
            device.address
        );
    }
    Ok(ExitCode::SUCCESS)
}
