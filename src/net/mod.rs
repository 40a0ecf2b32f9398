//! Control-plane networking.
//!
//! The connection manager drives the two-phase protocol: a single-shot
//! handshake that announces the stage and learns the southbound endpoint,
//! then a long-lived southbound handler serving control operations until
//! shutdown.

pub mod handshake;
pub mod southbound;
pub mod wire;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use crate::core::agent::Agent;
use crate::options;
use handshake::HandshakeHandler;
use southbound::SouthboundHandler;
use wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("socket operation failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed control message: {0}")]
    Wire(#[from] WireError),
    #[error("connection closed by the control plane")]
    Closed,
    #[error("communication type not supported: {0}")]
    Unsupported(&'static str),
}

/// Transport used to reach the control plane. The rpc slot is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationType {
    Unix,
    Inet,
    Rpc,
    None,
}

impl CommunicationType {
    pub fn from_token(token: &str) -> CommunicationType {
        match token {
            "unix" => CommunicationType::Unix,
            "inet" => CommunicationType::Inet,
            "rpc" => CommunicationType::Rpc,
            _ => CommunicationType::None,
        }
    }
}

/// Where and how the stage first contacts the control plane.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub connection_type: CommunicationType,
    pub address: String,
    pub port: i32,
}

impl ConnectionOptions {
    pub fn new(connection_type: CommunicationType, address: &str, port: i32) -> ConnectionOptions {
        ConnectionOptions {
            connection_type,
            address: address.to_string(),
            port,
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            connection_type: CommunicationType::None,
            address: options::DEFAULT_SOCKET_PATH.to_string(),
            port: options::DEFAULT_PORT,
        }
    }
}

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// Open a stream to an endpoint. A negative port means the address is a
// unix socket path.
pub(crate) async fn connect_endpoint(
    address: &str,
    port: i32,
) -> Result<(BoxedReader, BoxedWriter), ConnectionError> {
    if port < 0 {
        let stream = UnixStream::connect(address).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok((Box::new(reader), Box::new(writer)))
    } else {
        let stream = TcpStream::connect((address, port as u16)).await?;
        let (reader, writer) = tokio::io::split(stream);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Manages the stage's connection to the control plane.
pub struct ConnectionManager {
    southbound_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    log: slog::Logger,
}

impl ConnectionManager {
    /// Run the handshake to completion, then start the southbound task.
    ///
    /// With `CommunicationType::None` the stage runs without a control
    /// plane and only local rules files program it.
    pub async fn connect(
        connection_options: ConnectionOptions,
        agent: Arc<Agent>,
        shutdown: Arc<AtomicBool>,
        southbound_read_timeout: std::time::Duration,
        log: slog::Logger,
    ) -> Result<ConnectionManager, ConnectionError> {
        let log = log.new(slog::o!("subsystem" => "connection_manager"));

        match connection_options.connection_type {
            CommunicationType::None => {
                slog::info!(log, "stage running without control plane");
                return Ok(ConnectionManager {
                    southbound_task: std::sync::Mutex::new(None),
                    shutdown,
                    log,
                });
            }
            CommunicationType::Rpc => {
                return Err(ConnectionError::Unsupported("rpc"));
            }
            CommunicationType::Unix | CommunicationType::Inet => {}
        }

        // Phase one: the handshake runs to completion before any
        // southbound traffic starts.
        let handshake = HandshakeHandler::new(connection_options, Arc::clone(&agent), log.clone());
        handshake.run().await?;
        let (southbound_address, southbound_port) = match handshake.southbound_endpoint() {
            Some(endpoint) => endpoint,
            None => return Err(ConnectionError::Closed),
        };

        // Phase two: long-lived southbound connection.
        let (reader, writer) = connect_endpoint(&southbound_address, southbound_port).await?;
        let handler = SouthboundHandler::new(
            reader,
            writer,
            agent,
            Arc::clone(&shutdown),
            southbound_read_timeout,
            log.clone(),
        );
        let task_log = log.clone();
        let task = tokio::task::spawn(async move {
            if let Err(error) = handler.listen().await {
                slog::error!(task_log, "southbound handler terminated"; "error" => error.to_string());
            }
        });

        slog::debug!(
            log,
            "stage listening for control operations";
            "address" => southbound_address,
            "port" => southbound_port
        );

        Ok(ConnectionManager {
            southbound_task: std::sync::Mutex::new(Some(task)),
            shutdown,
            log,
        })
    }

    pub fn is_connection_interrupted(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal shutdown and wait for the southbound task to exit.
    pub async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::Release);
        let task = match self.southbound_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            if let Err(error) = task.await {
                slog::debug!(self.log, "southbound task join failed"; "error" => error.to_string());
            }
        }
    }
}
