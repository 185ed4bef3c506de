use clap::Parser;
use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc::channel;

use crate::config::Config;
use crate::constants::DEFAULT_FFS_DIR;
use crate::drivers::DriverSlot;
use crate::ds3::Ds3Emulator;
use crate::session::pairing::PairingStore;
use crate::session::{PowerState, SessionManager};
use crate::state::Shared;
use crate::transport::bt::{hci, Connector};
use crate::transport::usb::WiredTransport;

mod config;
mod constants;
mod drivers;
mod ds3;
mod output;
mod session;
mod state;
mod transport;

/// Command-line arguments. The daemon is configured by its YAML config;
/// these are the deployment-site overrides.
#[derive(Parser)]
#[command(name = "rosettapad", about = "DualShock 3 bridge daemon")]
struct Args {
    /// Path to the config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// FunctionFS mount of the gadget function.
    #[arg(long)]
    ffs_dir: Option<PathBuf>,
    /// Bluetooth adapter index.
    #[arg(long)]
    hci_dev: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let log_level = match env::var("LOG_LEVEL") {
        Ok(value) => value,
        Err(_) => "info".to_string(),
    };
    env::set_var("RUST_LOG", log_level);
    env_logger::init();
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref());
    if let Some(hci_dev) = args.hci_dev {
        config.hci_dev = hci_dev;
    }
    let ffs_dir = args
        .ffs_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FFS_DIR));

    log::info!("Starting RosettaPad v{}", VERSION);

    let shared = Shared::new();
    shared
        .flags
        .set_touchpad_as_right_stick(config.touchpad_as_right_stick);

    let pairing = Arc::new(PairingStore::open(config.pairing_path()));

    // The radio address feeds the 0xF2 feature report and the pairing
    // record. Fall back to the record if the adapter is not up yet.
    let local_addr = match hci::local_address(config.hci_dev) {
        Ok(addr) => addr,
        Err(e) => match pairing.record() {
            Some(record) => {
                log::warn!("Could not read adapter address ({e}), using recorded one");
                record.local
            }
            None => {
                log::error!("No wireless adapter found: {e}");
                process::exit(1);
            }
        },
    };
    log::info!("Bridge wireless address: {local_addr}");

    let emulator = Arc::new(Mutex::new(Ds3Emulator::new()));
    {
        let mut emulator = emulator.lock().unwrap();
        emulator.set_own_mac(local_addr);
        if let Some(record) = pairing.record() {
            emulator.set_host_mac(record.console);
            shared.flags.set_pairing_complete();
        }
    }

    let power = Arc::new(Mutex::new(PowerState::Active));
    let driver_slot = Arc::new(DriverSlot::default());
    let (session_tx, session_rx) = channel(64);

    // Cannot function without the gadget endpoints.
    if let Err(e) = WiredTransport::spawn(
        emulator.clone(),
        shared.clone(),
        session_tx.clone(),
        power.clone(),
        &ffs_dir,
    ) {
        log::error!("{e}");
        process::exit(1);
    }

    tokio::spawn(drivers::run_input_reader(
        shared.clone(),
        driver_slot.clone(),
        config.clone(),
        session_tx.clone(),
    ));
    tokio::spawn(output::run_output_throttler(
        shared.clone(),
        driver_slot.clone(),
        power.clone(),
        config.clone(),
    ));

    let connector = Connector {
        emulator: emulator.clone(),
        shared: shared.clone(),
        session_tx: session_tx.clone(),
    };
    let mut manager = SessionManager::new(
        session_rx,
        emulator,
        shared.clone(),
        pairing,
        power,
        driver_slot,
        config,
        local_addr,
        Box::new(connector),
    );

    let mut sig_term = tokio::signal::unix::signal(SignalKind::terminate())?;
    let mut sig_int = tokio::signal::unix::signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = manager.run() => {
            log::info!("Session manager finished");
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received CTRL+C. Shutting down.");
        },
        _ = sig_int.recv() => {
            log::info!("Received SIGINT. Shutting down.");
        },
        _ = sig_term.recv() => {
            log::info!("Received SIGTERM. Shutting down.");
        }
    }

    // Every worker loop observes the flag within its poll bound.
    shared.flags.stop();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    log::info!("RosettaPad stopped");
    Ok(())
}
