// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the Modbus register slave
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use modbus_register_slave::config::ConfigStore;
use modbus_register_slave::daemon::Daemon;
use modbus_register_slave::registers::DEFAULT_CAPACITY;

/// Modbus TCP/RTU slave serving a persisted bank of holding registers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration document, rewritten with the register values after every request
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Number of holding registers in the bank
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Transport mode override (TCP or RTU)
    #[arg(long)]
    mode: Option<String>,

    /// TCP port override
    #[arg(short, long)]
    port: Option<u16>,

    /// TCP bind address override
    #[arg(short, long)]
    address: Option<String>,

    /// Serial device override (RTU)
    #[arg(long)]
    serial_port: Option<String>,

    /// Serial baud rate override (RTU)
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Write a sample configuration next to the configuration path and exit
    #[arg(long)]
    write_sample: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    let args = Args::parse();
    let store = ConfigStore::new(&args.config);

    if args.write_sample {
        store.write_sample()?;
        return Ok(());
    }

    let mut daemon = Daemon::new(store, args.capacity);
    let mut config = daemon
        .load_config()
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    config.apply_args(
        args.mode,
        args.port,
        args.address,
        args.serial_port,
        args.baud_rate,
    );

    info!(
        "Modbus register slave: {} registers, mode {}",
        daemon.bank().capacity(),
        config.mode
    );

    daemon
        .launch_until(&config, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Unable to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}
