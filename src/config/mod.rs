// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the Modbus register slave
//!
//! The configuration is a JSON document holding the transport parameters and
//! the initial holding register values:
//!
//! ```json
//! {
//!     "mode": "TCP",
//!     "port": 502,
//!     "serial_port": "/dev/ttyUSB0",
//!     "baud_rate": 9600,
//!     "parity": "N",
//!     "data_bits": 8,
//!     "stop_bits": 1,
//!     "registers": [10, 20, 30]
//! }
//! ```
//!
//! `mode` selects the transport; only that transport's parameters have to be
//! meaningful, but every field listed above except `registers` must be
//! present. An optional `address` key sets the TCP bind address.
//!
//! Loading and saving go through [`ConfigStore`]. A saved document only holds
//! the `registers` key: it is a snapshot of the bank, not a full
//! configuration.
//!
//! ## Usage
//!
//! ```no_run
//! use modbus_register_slave::config::ConfigStore;
//! use modbus_register_slave::registers::RegisterBank;
//!
//! let store = ConfigStore::new("config.json");
//! let mut bank = RegisterBank::default();
//! let config = store.load(&mut bank).unwrap();
//! println!("Transport mode: {}", config.mode);
//! ```

pub mod store;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use store::{ConfigStore, Persistence};

/// Keys that every configuration document must carry.
pub const REQUIRED_FIELDS: [&str; 7] = [
    "mode",
    "port",
    "serial_port",
    "baud_rate",
    "parity",
    "data_bits",
    "stop_bits",
];

/// Errors raised while loading or saving the configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to open configuration file {path:?}: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed configuration document: {0}")]
    Malformed(String),

    #[error("Missing required configuration field '{0}'")]
    MissingField(&'static str),

    #[error("Unable to write configuration file {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Transport selected by the `mode` key.
///
/// Any string is accepted when parsing; unsupported values are kept in
/// [`Mode::Unknown`] and rejected when the transport is set up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    Tcp,
    Rtu,
    Unknown(String),
}

impl From<String> for Mode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "TCP" => Mode::Tcp,
            "RTU" => Mode::Rtu,
            _ => Mode::Unknown(value),
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Tcp => f.write_str("TCP"),
            Mode::Rtu => f.write_str("RTU"),
            Mode::Unknown(other) => f.write_str(other),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

/// Transport parameters and initial register values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Transport to serve on
    pub mode: Mode,

    /// TCP port, only used in TCP mode.
    ///
    /// The transport fields are kept as plain JSON integers: the ones of the
    /// unused transport are never range checked. The selected transport
    /// validates its own when it is set up.
    pub port: i64,

    /// Network address the TCP listener binds to.
    ///
    /// Defaults to the loopback address when absent from the document.
    #[serde(default = "default_address")]
    pub address: String,

    /// Serial device path, only used in RTU mode.
    pub serial_port: String,

    /// Serial line speed (RTU)
    pub baud_rate: i64,

    /// Serial parity: `N`, `E` or `O` (RTU).
    ///
    /// Stored in the document as a non-empty string of which only the first
    /// character is significant.
    #[serde(
        deserialize_with = "deserialize_parity",
        serialize_with = "serialize_parity"
    )]
    pub parity: char,

    /// Serial data bits (RTU)
    pub data_bits: i64,

    /// Serial stop bits (RTU)
    pub stop_bits: i64,

    /// Initial holding register values, in register order.
    #[serde(default)]
    pub registers: Vec<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Tcp,
            port: 502, // Standard Modbus TCP port
            address: default_address(),
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            parity: 'N',
            data_bits: 8,
            stop_bits: 1,
            registers: Vec::new(),
        }
    }
}

fn deserialize_parity<'de, D>(deserializer: D) -> Result<char, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value
        .chars()
        .next()
        .ok_or_else(|| serde::de::Error::custom("parity must be a non-empty string"))
}

fn serialize_parity<S>(parity: &char, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&parity.to_string())
}

impl Config {
    /// Build a configuration from an already parsed JSON document.
    ///
    /// Required keys are checked before the typed conversion so that an
    /// absent key is reported as [`ConfigError::MissingField`] rather than a
    /// generic parse error.
    pub fn from_value(document: serde_json::Value) -> Result<Self, ConfigError> {
        let object = document
            .as_object()
            .ok_or_else(|| ConfigError::Malformed("document is not a JSON object".to_string()))?;

        if let Some(missing) = REQUIRED_FIELDS
            .iter()
            .find(|field| !object.contains_key(**field))
        {
            return Err(ConfigError::MissingField(*missing));
        }

        serde_json::from_value(document).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// Write the complete configuration, pretty printed, to `path`.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_failed = |source: io::Error| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(write_failed)?;
        let mut writer = BufWriter::new(file);
        store::write_pretty(&mut writer, self).map_err(write_failed)?;
        writer.flush().map_err(write_failed)?;
        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only the values that are provided replace the ones read from the
    /// document.
    pub fn apply_args(
        &mut self,
        mode: Option<String>,
        port: Option<u16>,
        address: Option<String>,
        serial_port: Option<String>,
        baud_rate: Option<u32>,
    ) {
        if let Some(mode) = mode {
            debug!("Overriding mode from command line: {}", mode);
            self.mode = Mode::from(mode);
        }
        if let Some(port) = port {
            debug!("Overriding port from command line: {}", port);
            self.port = port.into();
        }
        if let Some(address) = address {
            debug!("Overriding address from command line: {}", address);
            self.address = address;
        }
        if let Some(serial_port) = serial_port {
            debug!("Overriding serial port from command line: {}", serial_port);
            self.serial_port = serial_port;
        }
        if let Some(baud_rate) = baud_rate {
            debug!("Overriding baud rate from command line: {}", baud_rate);
            self.baud_rate = baud_rate.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_document() -> serde_json::Value {
        json!({
            "mode": "RTU",
            "port": 1502,
            "serial_port": "/dev/ttyS1",
            "baud_rate": 19200,
            "parity": "Even",
            "data_bits": 7,
            "stop_bits": 2,
            "registers": [1, 2, 3]
        })
    }

    #[test]
    fn test_parse_full_document() {
        let config = Config::from_value(full_document()).unwrap();
        assert_eq!(config.mode, Mode::Rtu);
        assert_eq!(config.port, 1502);
        assert_eq!(config.serial_port, "/dev/ttyS1");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.parity, 'E');
        assert_eq!(config.data_bits, 7);
        assert_eq!(config.stop_bits, 2);
        assert_eq!(config.registers, vec![1, 2, 3]);
        assert_eq!(config.address, "127.0.0.1");
    }

    #[test]
    fn test_unknown_mode_still_parses() {
        let mut document = full_document();
        document["mode"] = json!("UDP");
        let config = Config::from_value(document).unwrap();
        assert_eq!(config.mode, Mode::Unknown("UDP".to_string()));
        assert_eq!(config.mode.to_string(), "UDP");
    }

    #[test]
    fn test_each_required_field_is_reported() {
        for field in REQUIRED_FIELDS {
            let mut document = full_document();
            document.as_object_mut().unwrap().remove(field);
            match Config::from_value(document) {
                Err(ConfigError::MissingField(name)) => assert_eq!(name, field),
                other => panic!("expected MissingField({field}), got {other:?}"),
            }
        }
    }

    #[test]
    fn test_registers_are_optional() {
        let mut document = full_document();
        document.as_object_mut().unwrap().remove("registers");
        let config = Config::from_value(document).unwrap();
        assert!(config.registers.is_empty());
    }

    #[test]
    fn test_empty_parity_is_malformed() {
        let mut document = full_document();
        document["parity"] = json!("");
        assert!(matches!(
            Config::from_value(document),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_register_out_of_range_is_malformed() {
        let mut document = full_document();
        document["registers"] = json!([1, 70000]);
        assert!(matches!(
            Config::from_value(document),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_object_document_is_malformed() {
        assert!(matches!(
            Config::from_value(json!([1, 2, 3])),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_unused_transport_fields_are_not_range_checked() {
        // RTU document with a port no TCP listener could use
        let mut document = full_document();
        document["port"] = json!(70000);
        let config = Config::from_value(document).unwrap();
        assert_eq!(config.port, 70000);

        // TCP document with nonsensical serial settings
        let mut document = full_document();
        document["mode"] = json!("TCP");
        document["baud_rate"] = json!(-1);
        document["data_bits"] = json!(300);
        document["stop_bits"] = json!(-2);
        let config = Config::from_value(document).unwrap();
        assert_eq!(config.mode, Mode::Tcp);
        assert_eq!(config.baud_rate, -1);
        assert_eq!(config.data_bits, 300);
        assert_eq!(config.stop_bits, -2);
    }

    #[test]
    fn test_non_integer_transport_field_is_malformed() {
        let mut document = full_document();
        document["baud_rate"] = json!("fast");
        assert!(matches!(
            Config::from_value(document),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_apply_args_overrides_only_given_values() {
        let mut config = Config::default();
        config.apply_args(Some("RTU".to_string()), None, None, None, Some(115200));
        assert_eq!(config.mode, Mode::Rtu);
        assert_eq!(config.port, 502);
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.serial_port, "/dev/ttyUSB0");
    }
}
