// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! On-disk configuration document and register persistence

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use super::{Config, ConfigError};
use crate::registers::RegisterBank;

/// Destination for register snapshots.
///
/// The request loop persists the bank through this trait after every
/// serviced request.
pub trait Persistence {
    fn save(&self, bank: &RegisterBank) -> Result<(), ConfigError>;
}

/// Document written by [`ConfigStore::save`]
#[derive(Serialize)]
struct RegisterSnapshot {
    registers: Vec<u16>,
}

/// Serialize `value` as JSON indented with four spaces.
pub(crate) fn write_pretty<W: Write, T: Serialize>(writer: W, value: &T) -> io::Result<()> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
    value.serialize(&mut serializer)?;
    Ok(())
}

/// Configuration document bound to a path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration and copy its initial register values into
    /// `bank`.
    ///
    /// The document is fully validated before the bank is written, so the
    /// bank is left unmodified on any error.
    pub fn load(&self, bank: &mut RegisterBank) -> Result<Config, ConfigError> {
        debug!("Loading configuration from {:?}", self.path);
        let file = File::open(&self.path).map_err(|source| ConfigError::NotFound {
            path: self.path.clone(),
            source,
        })?;

        let document: serde_json::Value = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        let config = Config::from_value(document)?;

        if config.registers.len() > bank.capacity() {
            debug!(
                "Configuration holds {} registers, only the first {} are used",
                config.registers.len(),
                bank.capacity()
            );
        }
        bank.load(&config.registers);
        Ok(config)
    }

    /// Replace the document with the current register values.
    ///
    /// The file is truncated and rewritten with a single `registers` key;
    /// any other key it held before is dropped.
    pub fn save(&self, bank: &RegisterBank) -> Result<(), ConfigError> {
        let write_failed = |source: io::Error| ConfigError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        let file = File::create(&self.path).map_err(write_failed)?;
        let mut writer = BufWriter::new(file);
        let snapshot = RegisterSnapshot {
            registers: bank.snapshot(),
        };
        write_pretty(&mut writer, &snapshot).map_err(write_failed)?;
        writer.flush().map_err(write_failed)?;

        debug!(
            "Saved {} registers to {:?}",
            snapshot.registers.len(),
            self.path
        );
        Ok(())
    }

    /// Path of the sample document written next to the configuration.
    pub fn sample_path(&self) -> PathBuf {
        self.path.with_extension("sample.json")
    }

    /// Write a complete sample configuration next to the configured path.
    pub fn write_sample(&self) -> Result<PathBuf, ConfigError> {
        let sample_path = self.sample_path();
        debug!("Creating sample configuration file at {:?}", sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        Config::default().save_to_file(&sample_path)?;
        info!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(sample_path)
    }
}

impl Persistence for ConfigStore {
    fn save(&self, bank: &RegisterBank) -> Result<(), ConfigError> {
        ConfigStore::save(self, bank)
    }
}
