// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-register-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Transport setup for the Modbus slave
//!
//! [`TransportSession`] turns a [`Config`] into a live [`Connection`]:
//!
//! - **TCP**: a listener is bound on `address:port` and served by the
//!   `tokio-modbus` TCP server. Only the first client gets serviced; later
//!   clients are refused while the slave serves a single connection.
//! - **RTU**: the serial device is opened with the configured line settings
//!   and served by the `tokio-modbus` RTU server as slave [`RTU_SLAVE_ID`].
//!
//! In both cases the `tokio-modbus` server runs in a background task and
//! forwards every decoded request to the [`Connection`], from which the
//! request loop pulls them with [`Transport::receive`].

use std::io;
use std::net::{self, Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tokio_modbus::SlaveId;
use tokio_serial::{DataBits, Parity, SerialPortBuilder, SerialStream, StopBits};

use super::frame::Frame;
use super::modbus_server::FrameForwarder;
use crate::config::{Config, Mode};
use crate::registers::RegisterBank;

/// Slave identity answered to on a serial bus
pub const RTU_SLAVE_ID: SlaveId = 1;

/// Requests are served one at a time, so a single slot is enough.
const FRAME_QUEUE_DEPTH: usize = 1;

/// Errors raised while setting up or using the transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Unknown mode specified in config: {0}")]
    UnknownMode(String),

    #[error("Unable to create Modbus context: {0}")]
    ContextCreation(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Error during communication: {0}")]
    Communication(String),
}

/// Source of Modbus requests for the request loop.
#[async_trait]
pub trait Transport: Send {
    /// Wait for the next request.
    ///
    /// `Ok(None)` is an empty reception and carries nothing to serve. An
    /// error means the connection is no longer usable.
    async fn receive(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Serve `frame` against `bank` and put the response on the wire.
    async fn reply(&mut self, frame: Frame, bank: &mut RegisterBank) -> Result<(), TransportError>;
}

/// Lifecycle of a [`TransportSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Connected,
    Closed,
}

/// What a [`Connection`] is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Rtu(String),
}

/// Socket of the TCP client being served, kept so that it can be shut down
/// from outside the per-client task `tokio-modbus` spawns for it.
type ServedClient = Arc<Mutex<Option<net::TcpStream>>>;

/// Live transport: the background `tokio-modbus` server and the queue of
/// requests it decoded.
pub struct Connection {
    endpoint: Endpoint,
    frames: mpsc::Receiver<Frame>,
    server: Option<JoinHandle<io::Result<()>>>,
    client: ServedClient,
}

impl Connection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Address the TCP listener is bound to, `None` for RTU.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.endpoint {
            Endpoint::Tcp(addr) => Some(addr),
            Endpoint::Rtu(_) => None,
        }
    }

    /// Error describing why the request queue was closed.
    async fn termination_error(&mut self) -> TransportError {
        let Some(server) = self.server.take() else {
            return TransportError::Communication("connection already terminated".to_string());
        };

        // The TCP server keeps accepting after its only client left, it has
        // to be stopped. The RTU server ends on its own.
        if matches!(self.endpoint, Endpoint::Tcp(_)) {
            server.abort();
        }
        match server.await {
            Ok(Ok(())) => TransportError::Communication("connection closed".to_string()),
            Ok(Err(e)) => TransportError::Communication(e.to_string()),
            Err(e) if e.is_cancelled() => {
                TransportError::Communication("connection closed by client".to_string())
            }
            Err(e) => TransportError::Communication(format!("server task failed: {}", e)),
        }
    }

    /// Shut down the socket of the served TCP client, if any.
    ///
    /// The client task then reads end of stream and drops its service.
    fn release_client(&self) {
        let client = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(client) = client {
            debug!("Disconnecting Modbus client on {:?}", self.endpoint);
            if let Err(e) = client.shutdown(Shutdown::Both) {
                debug!("Client socket already closed: {}", e);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.release_client();
        if let Some(server) = self.server.take() {
            server.abort();
            if let Err(e) = server.await {
                if !e.is_cancelled() {
                    warn!("Modbus server task ended abnormally: {}", e);
                }
            }
        }
        self.frames.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release_client();
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

#[async_trait]
impl Transport for Connection {
    async fn receive(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.frames.recv().await {
            Some(frame) => Ok(Some(frame)),
            None => Err(self.termination_error().await),
        }
    }

    async fn reply(&mut self, frame: Frame, bank: &mut RegisterBank) -> Result<(), TransportError> {
        frame.respond(bank)
    }
}

/// Sets up and tears down the transport selected by the configuration.
#[derive(Debug)]
pub struct TransportSession {
    state: SessionState,
}

impl Default for TransportSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Create the transport context and perform the connect handshake.
    ///
    /// An unsupported mode is rejected before any I/O. On failure the
    /// partially created context is released and the session ends up
    /// [`SessionState::Closed`].
    pub async fn connect(&mut self, config: &Config) -> Result<Connection, TransportError> {
        if let Mode::Unknown(mode) = &config.mode {
            error!("Unknown mode specified in config: {}", mode);
            self.state = SessionState::Closed;
            return Err(TransportError::UnknownMode(mode.clone()));
        }

        self.state = SessionState::Connecting;
        info!("Attempting to start Modbus {} slave", config.mode);
        let result = match config.mode {
            Mode::Tcp => connect_tcp(config).await,
            _ => connect_rtu(config),
        };

        match &result {
            Ok(connection) => {
                info!("Connected successfully on {:?}", connection.endpoint());
                self.state = SessionState::Connected;
            }
            Err(e) => {
                error!("{}", e);
                self.state = SessionState::Closed;
            }
        }
        result
    }

    /// Release every resource held by `connection`.
    pub async fn close(&mut self, mut connection: Connection) {
        debug!("Closing Modbus connection on {:?}", connection.endpoint());
        connection.shutdown().await;
        self.state = SessionState::Closed;
        info!("Modbus connection closed");
    }
}

/// Keep a handle on the socket of the served client and give the stream back
/// to the server.
fn track_client(
    stream: TcpStream,
    served: &Mutex<Option<net::TcpStream>>,
) -> io::Result<TcpStream> {
    let stream = stream.into_std()?;
    let handle = stream.try_clone()?;
    *served.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    TcpStream::from_std(stream)
}

async fn connect_tcp(config: &Config) -> Result<Connection, TransportError> {
    let port = u16::try_from(config.port).map_err(|_| {
        TransportError::ContextCreation(format!("TCP port {} out of range", config.port))
    })?;
    let socket_addr: SocketAddr = format!("{}:{}", config.address, port)
        .parse()
        .map_err(|e| {
            TransportError::ContextCreation(format!(
                "invalid TCP address {}:{}: {}",
                config.address, config.port, e
            ))
        })?;

    let listener = TcpListener::bind(socket_addr)
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    info!("Modbus TCP slave listening on {}", local_addr);

    let (sender, frames) = mpsc::channel(FRAME_QUEUE_DEPTH);
    // Handed to the first client only.
    let pending = Arc::new(Mutex::new(Some(sender)));
    let client: ServedClient = Arc::new(Mutex::new(None));

    let server = Server::new(listener);
    let served = Arc::clone(&client);
    let on_connected = move |stream: TcpStream, socket_addr: SocketAddr| {
        let pending = Arc::clone(&pending);
        let served = Arc::clone(&served);
        async move {
            let sender = pending
                .lock()
                .unwrap_or_else(|poisoned| {
                    error!("Client slot lock poisoned, recovering it");
                    poisoned.into_inner()
                })
                .take();
            let Some(sender) = sender else {
                warn!(
                    "Refusing Modbus client {}: a client is already served",
                    socket_addr
                );
                return Ok(None);
            };

            let stream = track_client(stream, &served)?;
            accept_tcp_connection(stream, socket_addr, |peer: SocketAddr| {
                info!("Serving Modbus client {}", peer);
                Ok(Some(FrameForwarder::new(sender.clone(), None)))
            })
        }
    };
    let on_process_error = |err: io::Error| {
        error!("Modbus TCP connection error: {}", err);
    };

    let handle = tokio::spawn(async move {
        server
            .serve(&on_connected, on_process_error)
            .await
            .map(drop)
    });

    Ok(Connection {
        endpoint: Endpoint::Tcp(local_addr),
        frames,
        server: Some(handle),
        client,
    })
}

fn connect_rtu(config: &Config) -> Result<Connection, TransportError> {
    let builder = serial_builder(config)?;
    let serial = SerialStream::open(&builder).map_err(|e| {
        TransportError::ConnectFailed(format!("{}: {}", config.serial_port, e))
    })?;
    info!(
        "Modbus RTU slave {} on {} ({} baud, {}{}{})",
        RTU_SLAVE_ID,
        config.serial_port,
        config.baud_rate,
        config.data_bits,
        config.parity,
        config.stop_bits
    );

    let (sender, frames) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let server = tokio_modbus::server::rtu::Server::new(serial);
    let service = FrameForwarder::new(sender, Some(RTU_SLAVE_ID));
    let handle = tokio::spawn(async move { server.serve_forever(service).await.map(drop) });

    Ok(Connection {
        endpoint: Endpoint::Rtu(config.serial_port.clone()),
        frames,
        server: Some(handle),
        client: Arc::new(Mutex::new(None)),
    })
}

/// Validate the serial line settings and build the port description.
pub fn serial_builder(config: &Config) -> Result<SerialPortBuilder, TransportError> {
    let invalid = TransportError::ContextCreation;

    if config.serial_port.is_empty() {
        return Err(invalid("empty serial port path".to_string()));
    }
    let baud_rate = match u32::try_from(config.baud_rate) {
        Ok(baud_rate) if baud_rate > 0 => baud_rate,
        _ => {
            return Err(invalid(format!(
                "baud rate {} must be positive",
                config.baud_rate
            )))
        }
    };
    let parity = match config.parity.to_ascii_uppercase() {
        'N' => Parity::None,
        'E' => Parity::Even,
        'O' => Parity::Odd,
        other => return Err(invalid(format!("unsupported parity '{}'", other))),
    };
    let data_bits = match config.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        other => return Err(invalid(format!("unsupported data bits {}", other))),
    };
    let stop_bits = match config.stop_bits {
        1 => StopBits::One,
        2 => StopBits::Two,
        other => return Err(invalid(format!("unsupported stop bits {}", other))),
    };

    Ok(tokio_serial::new(config.serial_port.as_str(), baud_rate)
        .parity(parity)
        .data_bits(data_bits)
        .stop_bits(stop_bits))
}
