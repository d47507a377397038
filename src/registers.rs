// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Holding register storage
//!
//! The [`RegisterBank`] is a fixed-length, zero-initialized array of 16-bit
//! holding registers. Its length is chosen once at construction and never
//! changes afterwards; every access is bounds-checked and an out-of-range
//! index is reported as [`RegisterError::OutOfBounds`] instead of being
//! clamped.
//!
//! The bank is owned by the caller and lent to the configuration store (to
//! load and save values) and to the request loop (to serve Modbus requests).

use thiserror::Error;

/// Number of holding registers exposed when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Errors raised by register accesses
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Register range {index}..{end} is outside the bank (capacity {capacity})")]
    OutOfBounds {
        index: usize,
        end: usize,
        capacity: usize,
    },
}

/// Fixed-capacity ordered store of holding register values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    values: Vec<u16>,
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RegisterBank {
    /// Create a bank of `capacity` registers, all set to zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            values: vec![0; capacity],
        }
    }

    /// Number of registers in the bank
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Read the register at `index`.
    pub fn get(&self, index: usize) -> Result<u16, RegisterError> {
        self.check_range(index, 1)?;
        Ok(self.values[index])
    }

    /// Write `value` to the register at `index`.
    pub fn set(&mut self, index: usize, value: u16) -> Result<(), RegisterError> {
        self.check_range(index, 1)?;
        self.values[index] = value;
        Ok(())
    }

    /// Copy of every register value in index order.
    pub fn snapshot(&self) -> Vec<u16> {
        self.values.clone()
    }

    /// Overwrite the first `min(capacity, values.len())` registers.
    ///
    /// Registers beyond the end of `values` keep their current content and
    /// extra entries in `values` are ignored.
    pub fn load(&mut self, values: &[u16]) {
        let count = values.len().min(self.values.len());
        self.values[..count].copy_from_slice(&values[..count]);
    }

    /// Read `count` consecutive registers starting at `addr`.
    pub fn read_range(&self, addr: usize, count: usize) -> Result<Vec<u16>, RegisterError> {
        self.check_range(addr, count)?;
        Ok(self.values[addr..addr + count].to_vec())
    }

    /// Write `values` to consecutive registers starting at `addr`.
    ///
    /// The whole range is validated first, so a rejected write leaves the
    /// bank untouched.
    pub fn write_range(&mut self, addr: usize, values: &[u16]) -> Result<(), RegisterError> {
        self.check_range(addr, values.len())?;
        self.values[addr..addr + values.len()].copy_from_slice(values);
        Ok(())
    }

    fn check_range(&self, index: usize, count: usize) -> Result<(), RegisterError> {
        let capacity = self.values.len();
        match index.checked_add(count) {
            Some(end) if end <= capacity && index < capacity => Ok(()),
            end => Err(RegisterError::OutOfBounds {
                index,
                end: end.unwrap_or(usize::MAX),
                capacity,
            }),
        }
    }
}
