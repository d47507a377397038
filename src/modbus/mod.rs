// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module exposes the register bank as a Modbus slave over TCP or
//! serial (RTU), using `tokio-modbus` for framing.
//!
//! ## Key Components
//!
//! - `TransportSession`: creates the TCP or RTU transport from the
//!   configuration and releases it on shutdown.
//! - `Connection`: a live transport, implementing the `Transport` trait the
//!   request loop pulls requests from.
//! - `Frame`: one decoded request and the channel its response goes to.
//! - `handle_request`: the holding register read/write semantics.
//!
//! ## Register Map
//!
//! Holding registers `0..N` map one to one onto the register bank, where `N`
//! is the bank capacity (1000 by default). Input registers, coils and
//! discrete inputs are not served.

pub mod frame;
pub mod modbus_server;
pub mod transport;

pub use frame::Frame;
pub use modbus_server::{handle_request, FrameForwarder};
pub use transport::{
    Connection, Endpoint, SessionState, Transport, TransportError, TransportSession, RTU_SLAVE_ID,
};
