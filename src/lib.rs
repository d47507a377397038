// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus register slave library
//!
//! This library serves a fixed bank of holding registers as a Modbus slave
//! over TCP or serial (RTU), loading the initial values from a JSON document
//! and persisting the bank back to it after every request.

pub mod config;
pub mod daemon;
pub mod modbus;
pub mod registers;
