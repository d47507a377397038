// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Receive, apply, respond and persist cycle
//!
//! The [`RequestLoop`] drives one connection sequentially:
//!
//! 1. wait for the next request from the [`Transport`];
//! 2. apply it to the [`RegisterBank`] and send the response;
//! 3. persist the whole bank.
//!
//! The only suspension point is the wait for the next request: serving and
//! persisting a request always complete before the next one is received.
//! A transport error ends the loop; a failed save is only logged, the
//! in-memory bank staying the reference until the next successful save.

use log::{debug, error, warn};

use crate::config::Persistence;
use crate::modbus::{Frame, Transport, TransportError};
use crate::registers::RegisterBank;

pub struct RequestLoop<'a, P: Persistence + ?Sized> {
    bank: &'a mut RegisterBank,
    persistence: &'a P,
    served: u64,
}

impl<'a, P: Persistence + ?Sized> RequestLoop<'a, P> {
    pub fn new(bank: &'a mut RegisterBank, persistence: &'a P) -> Self {
        Self {
            bank,
            persistence,
            served: 0,
        }
    }

    /// Number of requests served so far
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Serve requests until the transport fails.
    ///
    /// This only returns with the transport error that ended the loop.
    pub async fn run<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), TransportError> {
        loop {
            match transport.receive().await {
                Ok(Some(frame)) => self.serve(transport, frame).await,
                Ok(None) => debug!("Empty reception, nothing to serve"),
                Err(e) => {
                    error!("Error during communication: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn serve<T: Transport + ?Sized>(&mut self, transport: &mut T, frame: Frame) {
        debug!("Serving request from slave {}: {:?}", frame.slave(), frame.request());
        if let Err(e) = transport.reply(frame, &mut *self.bank).await {
            warn!("Response could not be delivered: {}", e);
        }
        self.served += 1;

        if let Err(e) = self.persistence.save(&*self.bank) {
            warn!("Failed to persist registers: {}", e);
        }
    }
}
