// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! A received Modbus request waiting for its response

use log::{debug, warn};
use tokio::sync::oneshot;
use tokio_modbus::{ExceptionCode, Request, Response, SlaveId};

use super::modbus_server::handle_request;
use super::transport::TransportError;
use crate::registers::RegisterBank;

/// Outcome sent back to the `tokio-modbus` server; `Ok(None)` means no
/// response goes on the wire.
pub type Reply = Result<Option<Response>, ExceptionCode>;

/// Decoded request together with the channel its response is written to.
#[derive(Debug)]
pub struct Frame {
    slave: SlaveId,
    request: Request<'static>,
    broadcast: bool,
    responder: Option<oneshot::Sender<Reply>>,
}

impl Frame {
    /// Frame that is not attached to any client. Responding only applies
    /// the request to the bank.
    pub fn new(slave: SlaveId, request: Request<'static>) -> Self {
        Self {
            slave,
            request,
            broadcast: false,
            responder: None,
        }
    }

    pub(crate) fn with_responder(
        slave: SlaveId,
        request: Request<'static>,
        broadcast: bool,
        responder: oneshot::Sender<Reply>,
    ) -> Self {
        Self {
            slave,
            request,
            broadcast,
            responder: Some(responder),
        }
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub fn request(&self) -> &Request<'static> {
        &self.request
    }

    /// Whether the request was broadcast and gets no response
    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }

    /// Apply the request to `bank` and send the response to the client.
    ///
    /// The bank is updated even when the client can no longer be reached;
    /// that case is reported as a communication error.
    pub fn respond(self, bank: &mut RegisterBank) -> Result<(), TransportError> {
        let outcome = handle_request(bank, &self.request);
        let reply = if self.broadcast {
            debug!("Broadcast request applied, no response sent");
            Ok(None)
        } else {
            outcome.map(Some)
        };

        match self.responder {
            Some(responder) => responder.send(reply).map_err(|_| {
                warn!("Client went away before the response could be sent");
                TransportError::Communication("response channel closed".to_string())
            }),
            None => Ok(()),
        }
    }
}
