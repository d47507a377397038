// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use clap::Parser;
use std::error::Error;
use std::net::SocketAddr;
use tokio_modbus::prelude::*;

/// Modbus client for reading and writing holding registers on the register slave
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Unit identifier sent with each request
    #[clap(long, default_value = "1")]
    unit: u8,

    /// Starting holding register address
    #[clap(long, default_value = "0")]
    register: u16,

    /// Number of registers to read
    #[clap(long, default_value = "10")]
    quantity: u16,

    /// Values written from the starting register before reading back
    #[clap(long, value_delimiter = ',')]
    write: Vec<u16>,
}

/// Address of the `offset`-th register read from `start`.
///
/// Addresses wrap around the 16-bit register space.
fn register_address(start: u16, offset: usize) -> u16 {
    start.wrapping_add(offset as u16)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    // Parse command line arguments
    let args = Args::parse();

    // Format server address
    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port).parse()?;
    println!("Connecting to Modbus server at {}", socket_addr);

    // Create TCP transport
    let mut ctx = tcp::connect_slave(socket_addr, Slave(args.unit)).await?;

    match args.write.as_slice() {
        [] => {}
        [value] => {
            println!("Writing {} to holding register {}", value, args.register);
            ctx.write_single_register(args.register, *value).await??;
        }
        values => {
            println!(
                "Writing {} values starting at holding register {}",
                values.len(),
                args.register
            );
            ctx.write_multiple_registers(args.register, values).await??;
        }
    }

    println!(
        "Reading {} holding registers starting at address {}",
        args.quantity, args.register
    );
    let response = ctx
        .read_holding_registers(args.register, args.quantity)
        .await??;

    for (i, value) in response.iter().enumerate() {
        println!("Register {}: {}", register_address(args.register, i), value);
    }

    ctx.disconnect().await?;
    Ok(())
}
