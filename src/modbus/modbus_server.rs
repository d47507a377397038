// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus server side of the register slave
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the device that provides data,
//! while the client is the device that requests data.
//!
//! The Modbus master is the device that requests data, while the Modbus slave is the device
//! that provides data. In other words, the Modbus master is here the client and the
//! Modbus slave is here the server.
//!
//! Two pieces live here:
//!
//! - [`FrameForwarder`], the `tokio-modbus` service plugged into the TCP or RTU
//!   server. It does not touch any register: every request is forwarded as a
//!   [`Frame`] to the request loop, which owns the [`RegisterBank`], and the
//!   response computed there is sent back to the client.
//! - [`handle_request`], the holding register semantics applied by the loop.
//!
//! ## Supported Functions
//!
//! | Code | Function |
//! |------|----------|
//! | 0x03 | Read Holding Registers |
//! | 0x06 | Write Single Register |
//! | 0x10 | Write Multiple Registers |
//! | 0x16 | Mask Write Register |
//! | 0x17 | Read/Write Multiple Registers |
//!
//! Any other function code is answered with an `IllegalFunction` exception,
//! and an address range falling outside the bank with `IllegalDataAddress`.

use std::{future, future::Future, pin::Pin};

use log::{debug, error};
use tokio::sync::{mpsc, oneshot};
use tokio_modbus::{ExceptionCode, Request, Response, SlaveId, SlaveRequest};

use super::frame::Frame;
use crate::registers::{RegisterBank, RegisterError};

/// Broadcast address on a serial bus
const BROADCAST_SLAVE_ID: SlaveId = 0;

/// `tokio-modbus` service handing every request over to the request loop.
///
/// With a slave filter (RTU), requests for other slaves are ignored without
/// a response and broadcast requests are forwarded with their response
/// suppressed. Without a filter (TCP), the unit identifier is not checked.
pub struct FrameForwarder {
    frames: mpsc::Sender<Frame>,
    slave_filter: Option<SlaveId>,
}

impl FrameForwarder {
    pub fn new(frames: mpsc::Sender<Frame>, slave_filter: Option<SlaveId>) -> Self {
        Self {
            frames,
            slave_filter,
        }
    }
}

impl tokio_modbus::server::Service for FrameForwarder {
    type Request = SlaveRequest<'static>;
    type Response = Option<Response>;
    type Exception = ExceptionCode;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Exception>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = req;
        debug!("Received Modbus request for slave {}: {:?}", slave, request);

        let broadcast = match self.slave_filter {
            Some(_) if slave == BROADCAST_SLAVE_ID => true,
            Some(own_id) if slave != own_id => {
                debug!("Ignoring request addressed to slave {}", slave);
                return Box::pin(future::ready(Ok(None)));
            }
            _ => false,
        };

        let frames = self.frames.clone();
        Box::pin(async move {
            let (responder, response) = oneshot::channel();
            let frame = Frame::with_responder(slave, request, broadcast, responder);
            if frames.send(frame).await.is_err() {
                error!("Request loop is gone, cannot serve Modbus request");
                return Err(ExceptionCode::ServerDeviceFailure);
            }
            response
                .await
                .unwrap_or(Err(ExceptionCode::ServerDeviceFailure))
        })
    }
}

/// Apply a Modbus request to the register bank and build its response.
///
/// A request that cannot be fully satisfied leaves the bank untouched.
pub fn handle_request(
    bank: &mut RegisterBank,
    request: &Request<'_>,
) -> Result<Response, ExceptionCode> {
    let res = match request {
        Request::ReadHoldingRegisters(addr, cnt) => {
            debug!(
                "Reading {} holding registers starting from address {}",
                cnt, addr
            );
            register_read(bank, *addr, *cnt).map(Response::ReadHoldingRegisters)
        }
        Request::WriteSingleRegister(addr, value) => {
            debug!("Writing value {} to holding register {}", value, addr);
            register_write(bank, *addr, std::slice::from_ref(value))
                .map(|_| Response::WriteSingleRegister(*addr, *value))
        }
        Request::WriteMultipleRegisters(addr, values) => {
            debug!(
                "Writing {} values to holding registers starting from address {}",
                values.len(),
                addr
            );
            register_write(bank, *addr, values)
                .map(|_| Response::WriteMultipleRegisters(*addr, values.len() as u16))
        }
        Request::MaskWriteRegister(addr, and_mask, or_mask) => {
            debug!(
                "Masking holding register {} with and={:#06x} or={:#06x}",
                addr, and_mask, or_mask
            );
            mask_write(bank, *addr, *and_mask, *or_mask)
                .map(|_| Response::MaskWriteRegister(*addr, *and_mask, *or_mask))
        }
        Request::ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, values) => {
            debug!(
                "Writing {} values from address {} then reading {} from address {}",
                values.len(),
                write_addr,
                read_cnt,
                read_addr
            );
            // The read range is checked up front so that a bad read does not
            // leave the write applied.
            register_read(bank, *read_addr, *read_cnt)
                .and_then(|_| register_write(bank, *write_addr, values))
                .and_then(|_| register_read(bank, *read_addr, *read_cnt))
                .map(Response::ReadWriteMultipleRegisters)
        }
        _ => {
            error!(
                "Exception::IllegalFunction - Unimplemented function code in request: {request:?}"
            );
            Err(ExceptionCode::IllegalFunction)
        }
    };

    if let Err(e) = &res {
        error!("Modbus request error: {:?}", e);
    }
    res
}

fn illegal_address(err: RegisterError) -> ExceptionCode {
    error!("Exception::IllegalDataAddress - {}", err);
    ExceptionCode::IllegalDataAddress
}

/// Read `cnt` holding registers starting at `addr`.
fn register_read(bank: &RegisterBank, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
    bank.read_range(addr.into(), cnt.into())
        .map_err(illegal_address)
}

/// Write holding registers. Used by both the write single register
/// and write multiple registers requests.
fn register_write(bank: &mut RegisterBank, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
    bank.write_range(addr.into(), values)
        .map_err(illegal_address)
}

fn mask_write(
    bank: &mut RegisterBank,
    addr: u16,
    and_mask: u16,
    or_mask: u16,
) -> Result<(), ExceptionCode> {
    let current = bank.get(addr.into()).map_err(illegal_address)?;
    let value = (current & and_mask) | (or_mask & !and_mask);
    bank.set(addr.into(), value).map_err(illegal_address)
}
