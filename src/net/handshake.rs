//! Phase one of the control-plane protocol.
//!
//! The handshake handler connects to the configured endpoint, announces
//! the stage by writing its identity record exactly once, and reads back
//! the endpoint the southbound handler must connect to. It then exits;
//! the connection manager takes over with phase two.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::core::agent::Agent;
use crate::net::wire::StageHandshakeRaw;
use crate::net::{connect_endpoint, ConnectionError, ConnectionOptions};

pub struct HandshakeHandler {
    connection_options: ConnectionOptions,
    agent: Arc<Agent>,
    southbound_endpoint: std::sync::Mutex<Option<(String, i32)>>,
    log: slog::Logger,
}

impl HandshakeHandler {
    pub fn new(
        connection_options: ConnectionOptions,
        agent: Arc<Agent>,
        log: slog::Logger,
    ) -> HandshakeHandler {
        HandshakeHandler {
            connection_options,
            agent,
            southbound_endpoint: std::sync::Mutex::new(None),
            log: log.new(slog::o!("handler" => "handshake")),
        }
    }

    /// Run the handshake to completion.
    pub async fn run(&self) -> Result<(), ConnectionError> {
        let port = match self.connection_options.connection_type {
            crate::net::CommunicationType::Unix => -1,
            _ => self.connection_options.port,
        };
        let (mut reader, mut writer) =
            connect_endpoint(&self.connection_options.address, port).await?;

        // Oversize identity fields fail here, before anything hits the
        // socket.
        let info = self.agent.stage_info_raw()?;
        let encoded = info.encode()?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        slog::debug!(
            self.log,
            "submitted stage info";
            "stage_name" => info.stage_name.clone(),
            "pid" => info.pid
        );

        let mut buffer = vec![0u8; StageHandshakeRaw::SIZE];
        reader.read_exact(&mut buffer).await?;
        let handshake = StageHandshakeRaw::decode(&buffer)?;
        slog::debug!(
            self.log,
            "received southbound endpoint";
            "address" => handshake.address.clone(),
            "port" => handshake.port
        );

        if let Ok(mut endpoint) = self.southbound_endpoint.lock() {
            *endpoint = Some((handshake.address, handshake.port));
        }
        Ok(())
    }

    /// The endpoint learned from the control plane, once `run` finished.
    pub fn southbound_endpoint(&self) -> Option<(String, i32)> {
        self.southbound_endpoint
            .lock()
            .ok()
            .and_then(|endpoint| endpoint.clone())
    }
}
