//! STDrone - Main entry point
//!
//! Scans for a drone, connects, discovers its attribute table and then either
//! dumps the table or streams telemetry until interrupted.

mod config;
mod monitor;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use stdrone_discovery::{DroneScanner, ScanEvent};
use stdrone_link::BtleLink;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "stdrone")]
#[command(about = "BLE client for STDrone flight controllers")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stdrone.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Discover services, print the attribute table and exit
    #[arg(long)]
    dump: bool,

    /// Print telemetry changes as JSON lines
    #[arg(long)]
    json: bool,

    /// Only connect to drones advertising this name (repeatable)
    #[arg(short, long)]
    name: Vec<String>,

    /// Initial joystick command as 14 hex digits
    #[arg(long)]
    command: Option<String>,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("STDrone v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        return Ok(());
    }

    let mut config = config::load_config(&args.config)?;
    if !args.name.is_empty() {
        config.scan.target_names = args.name.clone();
    }

    let initial_command = args
        .command
        .as_deref()
        .map(hex::decode)
        .transpose()
        .context("Joystick command must be hex")?;

    info!(
        targets = ?config.scan.target_names,
        timeout_secs = config.scan.timeout_secs,
        "Configuration loaded"
    );

    let scanner = DroneScanner::new(config.scanner_config());
    let mut scan_events = scanner.subscribe();
    let quiet = args.json;
    tokio::spawn(async move {
        while let Ok(event) = scan_events.recv().await {
            if quiet {
                continue;
            }
            match event {
                ScanEvent::DroneFound { name, id } => eprintln!("Found {name} ({id})"),
                ScanEvent::ScanCompleted { found } => eprintln!("Scan finished: {found} found"),
                ScanEvent::ScanStarted => eprintln!("Scanning..."),
            }
        }
    });

    let drones = scanner.scan_default().await?;
    let Some(drone) = drones.into_iter().next() else {
        bail!("No drone found");
    };

    let (mut link, handle) =
        BtleLink::connect(drone.adapter, drone.peripheral, drone.name, config.session_config())
            .await?;
    if let Err(e) = link.discover().await {
        link.shutdown().await;
        return Err(e.into());
    }

    if args.dump {
        for line in link.session().service_tree() {
            println!("{line}");
        }
        link.shutdown().await;
        return Ok(());
    }

    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let mut tracker = monitor::DeltaTracker::new();
    link.session_mut().on_update(Box::new(move |snapshot| {
        if let Some(delta) = tracker.diff(snapshot) {
            let _ = update_tx.send(delta);
        }
    }));
    link.session_mut().on_disconnect(Box::new(|| warn!("Drone disconnected")));

    let printer = tokio::spawn(monitor::print_updates(update_rx, args.json));
    let mut run = tokio::spawn(link.run());

    if let Some(command) = initial_command {
        handle.set_command(command).await?;
    }

    // Forward terminal input to the drone console. Blocking stdin stays off the runtime.
    let (input_tx, mut input_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(|line| line.ok()) {
            if input_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    let console = handle.clone();
    tokio::spawn(async move {
        while let Some(line) = input_rx.recv().await {
            if line.is_empty() {
                continue;
            }
            if let Err(e) = console.write_stdin(format!("{line}\n")).await {
                warn!(error = %e, "Console input rejected");
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, disconnecting");
            if let Err(e) = handle.disconnect().await {
                warn!(error = %e, "Link already closed");
            }
            (&mut run).await??;
        }
        result = &mut run => {
            result??;
        }
    }

    printer.await?;
    Ok(())
}
