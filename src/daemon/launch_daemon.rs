// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::future::Future;

use anyhow::{Context, Result};
use log::{debug, info};

use super::request_loop::RequestLoop;
use crate::config::{Config, ConfigError, ConfigStore};
use crate::modbus::TransportSession;
use crate::registers::RegisterBank;

/// Owns the register bank, its configuration store and the transport
/// session of a running slave.
pub struct Daemon {
    store: ConfigStore,
    bank: RegisterBank,
    session: TransportSession,
}

impl Daemon {
    /// Create a daemon with a zeroed bank of `capacity` registers.
    pub fn new(store: ConfigStore, capacity: usize) -> Self {
        Daemon {
            store,
            bank: RegisterBank::new(capacity),
            session: TransportSession::new(),
        }
    }

    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Load the configuration document, filling the bank with its registers.
    pub fn load_config(&mut self) -> Result<Config, ConfigError> {
        let config = self.store.load(&mut self.bank)?;
        debug!(
            "Loaded {} initial register values into a bank of {}",
            config.registers.len().min(self.bank.capacity()),
            self.bank.capacity()
        );
        Ok(config)
    }

    /// Connect the transport and serve requests until a communication error.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        self.launch_until(config, std::future::pending::<()>()).await
    }

    /// Connect the transport and serve requests until a communication error
    /// or until `shutdown` completes.
    ///
    /// The connection is closed in both cases. Only the shutdown path returns
    /// `Ok`.
    pub async fn launch_until<F>(&mut self, config: &Config, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut connection = self
            .session
            .connect(config)
            .await
            .context("Failed to set up the Modbus transport")?;

        let outcome = {
            let mut request_loop = RequestLoop::new(&mut self.bank, &self.store);
            let outcome = tokio::select! {
                result = request_loop.run(&mut connection) => {
                    result.context("Modbus request loop terminated")
                }
                _ = shutdown => {
                    info!("Shutdown requested");
                    Ok(())
                }
            };
            info!("Served {} requests", request_loop.served());
            outcome
        };

        self.session.close(connection).await;
        outcome
    }
}
