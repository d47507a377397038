// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the Modbus TCP slave
//!
//! These tests start a real slave on an OS assigned port and talk to it
//! with a `tokio-modbus` client: reads and writes of holding registers,
//! persistence of the bank after each request, error conditions, and the
//! release of the transport once the session is closed.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_modbus::prelude::*;

use modbus_register_slave::config::{Config, ConfigStore, Mode};
use modbus_register_slave::daemon::RequestLoop;
use modbus_register_slave::modbus::{SessionState, Transport, TransportError, TransportSession};
use modbus_register_slave::registers::RegisterBank;

type SlaveOutcome = (Result<(), TransportError>, RegisterBank);

/// Test slave running in the background
struct TestSlave {
    addr: SocketAddr,
    config_path: PathBuf,
    handle: JoinHandle<SlaveOutcome>,
    _dir: TempDir,
}

fn write_config(path: &Path, registers: &[u16]) -> Result<(), Box<dyn std::error::Error>> {
    let document = json!({
        "mode": "TCP",
        "port": 0,
        "serial_port": "",
        "baud_rate": 9600,
        "parity": "N",
        "data_bits": 8,
        "stop_bits": 1,
        "registers": registers
    });
    std::fs::write(path, serde_json::to_string_pretty(&document)?)?;
    Ok(())
}

fn persisted_registers(path: &Path) -> Vec<u64> {
    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    document["registers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|value| value.as_u64().unwrap())
        .collect()
}

/// Test utility function to start a Modbus slave in the background
async fn start_test_slave(registers: &[u16]) -> Result<TestSlave, Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let config_path = dir.path().join("config.json");
    write_config(&config_path, registers)?;

    let store = ConfigStore::new(&config_path);
    let mut bank = RegisterBank::new(16);
    let config = store.load(&mut bank)?;

    let mut session = TransportSession::new();
    let mut connection = session.connect(&config).await?;
    assert_eq!(session.state(), SessionState::Connected);
    let addr = connection.local_addr().expect("TCP connection has an address");
    println!("Test slave started on: {}", addr);

    let handle = tokio::spawn(async move {
        let result = RequestLoop::new(&mut bank, &store)
            .run(&mut connection)
            .await;
        session.close(connection).await;
        (result, bank)
    });

    Ok(TestSlave {
        addr,
        config_path,
        handle,
        _dir: dir,
    })
}

#[tokio::test]
async fn test_read_initial_registers() -> Result<(), Box<dyn std::error::Error>> {
    let slave = start_test_slave(&[10, 20, 30, 40]).await?;
    let mut ctx = tcp::connect(slave.addr).await?;

    let data = ctx.read_holding_registers(0, 6).await??;
    assert_eq!(data, vec![10, 20, 30, 40, 0, 0]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_is_served_and_persisted() -> Result<(), Box<dyn std::error::Error>> {
    let slave = start_test_slave(&[]).await?;
    let mut ctx = tcp::connect(slave.addr).await?;

    ctx.write_single_register(5, 999).await??;
    ctx.write_multiple_registers(1, &[101, 202, 303]).await??;

    let data = ctx.read_holding_registers(0, 6).await??;
    assert_eq!(data, vec![0, 101, 202, 303, 0, 999]);

    // Wait for the loop to end so that no save is in progress
    ctx.disconnect().await?;
    drop(ctx);
    let (result, _bank) = time::timeout(Duration::from_secs(5), slave.handle).await??;
    assert!(result.is_err());

    let registers = persisted_registers(&slave.config_path);
    assert_eq!(registers.len(), 16);
    assert_eq!(&registers[..6], &[0, 101, 202, 303, 0, 999]);
    Ok(())
}

#[tokio::test]
async fn test_invalid_register_address() -> Result<(), Box<dyn std::error::Error>> {
    let slave = start_test_slave(&[]).await?;
    let mut ctx = tcp::connect(slave.addr).await?;

    let result = ctx.read_holding_registers(15, 2).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));

    let result = ctx.write_single_register(16, 1).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_function() -> Result<(), Box<dyn std::error::Error>> {
    let slave = start_test_slave(&[]).await?;
    let mut ctx = tcp::connect(slave.addr).await?;

    let result = ctx.read_coils(0, 1).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalFunction));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_client_disconnect_ends_the_loop() -> Result<(), Box<dyn std::error::Error>> {
    let slave = start_test_slave(&[1, 2, 3]).await?;
    let mut ctx = tcp::connect(slave.addr).await?;
    ctx.write_single_register(0, 77).await??;
    ctx.disconnect().await?;
    drop(ctx);

    let (result, bank) = time::timeout(Duration::from_secs(5), slave.handle).await??;
    assert!(matches!(result, Err(TransportError::Communication(_))));
    assert_eq!(bank.read_range(0, 3)?, vec![77, 2, 3]);

    // The listener is released once the session is closed
    TcpListener::bind(slave.addr).await?;
    Ok(())
}

#[tokio::test]
async fn test_second_client_is_refused() -> Result<(), Box<dyn std::error::Error>> {
    let slave = start_test_slave(&[4]).await?;
    let mut first = tcp::connect(slave.addr).await?;
    assert_eq!(first.read_holding_registers(0, 1).await??, vec![4]);

    let second = time::timeout(Duration::from_secs(2), async {
        match tcp::connect(slave.addr).await {
            Ok(mut second) => second
                .read_holding_registers(0, 1)
                .await
                .ok()
                .and_then(Result::ok),
            Err(_) => None,
        }
    })
    .await;
    assert!(!matches!(second, Ok(Some(_))));

    // The first client is still served
    assert_eq!(first.read_holding_registers(0, 1).await??, vec![4]);
    first.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_connect_then_close_releases_listener() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config {
        port: 0,
        ..Config::default()
    };
    let mut session = TransportSession::new();
    assert_eq!(session.state(), SessionState::Uninitialized);

    let connection = session.connect(&config).await?;
    let addr = connection.local_addr().expect("TCP connection has an address");
    session.close(connection).await;
    assert_eq!(session.state(), SessionState::Closed);

    TcpListener::bind(addr).await?;
    Ok(())
}

#[tokio::test]
async fn test_close_disconnects_served_client() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config {
        port: 0,
        ..Config::default()
    };
    let mut session = TransportSession::new();
    let mut connection = session.connect(&config).await?;
    let addr = connection.local_addr().expect("TCP connection has an address");

    // Serve one request by hand so the client is known to be accepted
    let mut ctx = tcp::connect(addr).await?;
    let mut bank = RegisterBank::new(4);
    bank.set(0, 12)?;
    let (read, served) = tokio::join!(ctx.read_holding_registers(0, 1), async {
        let frame = connection
            .receive()
            .await?
            .expect("the TCP transport always yields a frame");
        connection.reply(frame, &mut bank).await
    });
    assert_eq!(read??, vec![12]);
    served?;

    session.close(connection).await;

    // The client socket is shut down along with the listener
    let result = time::timeout(Duration::from_secs(2), ctx.read_holding_registers(0, 1)).await;
    assert!(
        matches!(result, Ok(Err(_))),
        "client still served after close: {:?}",
        result
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_mode_is_rejected() {
    let config = Config {
        mode: Mode::Unknown("UDP".to_string()),
        ..Config::default()
    };
    let mut session = TransportSession::new();

    let result = session.connect(&config).await;
    assert!(matches!(result, Err(TransportError::UnknownMode(mode)) if mode == "UDP"));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_port_in_use_fails_to_connect() -> Result<(), Box<dyn std::error::Error>> {
    let taken = TcpListener::bind("127.0.0.1:0").await?;
    let config = Config {
        port: taken.local_addr()?.port().into(),
        ..Config::default()
    };

    let result = TransportSession::new().connect(&config).await;
    assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    Ok(())
}
