//! Phase two of the control-plane protocol: the long-lived southbound
//! handler.
//!
//! The handler reads a fixed-size header per operation and dispatches on
//! its type. The read and write sides of the socket are guarded by
//! separate locks so statistics responses and acknowledgements never
//! interleave. Header reads run under a bounded timeout so the loop can
//! observe the shared shutdown flag; a read or write failure is fatal and
//! flips that flag itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::core::agent::Agent;
use crate::net::wire::{
    Ack, ControlOperation, ControlPlaneOperationType, CreateChannelRaw, CreateObjectRaw,
    DifferentiationRuleRaw, EnforcementRuleRaw, RemoveRuleRaw, SUBTYPE_CREATE_CHANNEL,
    SUBTYPE_CREATE_OBJECT,
};
use crate::net::{BoxedReader, BoxedWriter, ConnectionError};
use crate::status::Status;

pub struct SouthboundHandler {
    reader: Mutex<BoxedReader>,
    writer: Mutex<BoxedWriter>,
    agent: Arc<Agent>,
    shutdown: Arc<AtomicBool>,
    read_timeout: Duration,
    log: slog::Logger,
}

impl SouthboundHandler {
    pub fn new(
        reader: BoxedReader,
        writer: BoxedWriter,
        agent: Arc<Agent>,
        shutdown: Arc<AtomicBool>,
        read_timeout: Duration,
        log: slog::Logger,
    ) -> SouthboundHandler {
        SouthboundHandler {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            agent,
            shutdown,
            read_timeout,
            log: log.new(slog::o!("handler" => "southbound")),
        }
    }

    // Read one header, re-checking the shutdown flag at every timeout.
    // Returns None on orderly shutdown. Partially read headers are kept
    // across timeouts; `read` is cancel safe so no bytes are lost.
    async fn read_control_operation(&self) -> Result<Option<ControlOperation>, ConnectionError> {
        let mut buffer = [0u8; ControlOperation::SIZE];
        let mut filled = 0usize;
        let mut reader = self.reader.lock().await;
        while filled < buffer.len() {
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(None);
            }
            match tokio::time::timeout(self.read_timeout, reader.read(&mut buffer[filled..])).await
            {
                Err(_) => continue,
                Ok(Ok(0)) => return Err(ConnectionError::Closed),
                Ok(Ok(read)) => filled += read,
                Ok(Err(error)) => return Err(error.into()),
            }
        }
        Ok(Some(ControlOperation::decode(&buffer)?))
    }

    async fn read_body(&self, size: usize) -> Result<Vec<u8>, ConnectionError> {
        let mut buffer = vec![0u8; size];
        let mut reader = self.reader.lock().await;
        reader.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    async fn write_response(&self, data: &[u8]) -> Result<usize, ConnectionError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(data.len())
    }

    async fn write_ack(&self, status: Status) -> Result<usize, ConnectionError> {
        let ack = Ack {
            status: if status.is_ok() { Ack::OK } else { Ack::ERROR },
        };
        self.write_response(&ack.encode()).await
    }

    /// Serve control operations until shutdown or a fatal socket error.
    pub async fn listen(&self) -> Result<(), ConnectionError> {
        loop {
            let operation = match self.read_control_operation().await {
                Ok(Some(operation)) => operation,
                Ok(None) => {
                    slog::debug!(self.log, "southbound handler observed shutdown");
                    return Ok(());
                }
                Err(error) => {
                    self.shutdown.store(true, Ordering::Release);
                    return Err(error);
                }
            };

            match self.handle_control_operation(operation).await {
                Ok(written) if written > 0 => {}
                Ok(_) => {
                    self.shutdown.store(true, Ordering::Release);
                    return Err(ConnectionError::Closed);
                }
                Err(error) => {
                    self.shutdown.store(true, Ordering::Release);
                    return Err(error);
                }
            }
        }
    }

    /// Dispatch one control operation. Returns the number of bytes
    /// written back; non-positive surfaces as a fatal connection error.
    async fn handle_control_operation(
        &self,
        operation: ControlOperation,
    ) -> Result<usize, ConnectionError> {
        slog::debug!(
            self.log,
            "control operation";
            "type" => operation.operation_type,
            "subtype" => operation.operation_subtype,
            "size" => operation.size
        );

        match ControlPlaneOperationType::from_i32(operation.operation_type)? {
            ControlPlaneOperationType::StageHandshake => {
                // Handshakes belong to phase one; receiving one here means
                // the control plane lost track of the connection state.
                Err(ConnectionError::Wire(
                    crate::net::wire::WireError::UnknownOperation(operation.operation_type),
                ))
            }
            ControlPlaneOperationType::StageReady => {
                let status = self.agent.mark_ready();
                self.write_ack(status).await
            }
            ControlPlaneOperationType::CreateHousekeepingRule => {
                self.create_housekeeping_rule(operation).await
            }
            ControlPlaneOperationType::CreateDifferentiationRule => {
                let body = self.read_body(operation.size.max(0) as usize).await?;
                let raw = DifferentiationRuleRaw::decode(&body)?;
                let status = self.agent.employ_differentiation_rule(raw);
                self.write_ack(status).await
            }
            ControlPlaneOperationType::CreateEnforcementRule => {
                let body = self.read_body(operation.size.max(0) as usize).await?;
                let raw = EnforcementRuleRaw::decode(&body)?;
                let status = self.agent.employ_enforcement_rule(raw).await;
                self.write_ack(status).await
            }
            ControlPlaneOperationType::CollectStatistics => {
                let stats = self.agent.collect_global_statistics();
                self.write_response(&stats.encode()).await
            }
            ControlPlaneOperationType::ExecuteHousekeepingRules => {
                let status = self.agent.execute_pending_housekeeping_rules().await;
                self.write_ack(status).await
            }
            ControlPlaneOperationType::RemoveRule => {
                let body = self.read_body(operation.size.max(0) as usize).await?;
                let raw = RemoveRuleRaw::decode(&body)?;
                let status = self.agent.remove_rule(raw);
                self.write_ack(status).await
            }
        }
    }

    async fn create_housekeeping_rule(
        &self,
        operation: ControlOperation,
    ) -> Result<usize, ConnectionError> {
        let body = self.read_body(operation.size.max(0) as usize).await?;
        let status = match operation.operation_subtype {
            SUBTYPE_CREATE_CHANNEL => {
                let raw = CreateChannelRaw::decode(&body)?;
                self.agent.employ_create_channel(raw).await
            }
            SUBTYPE_CREATE_OBJECT => {
                let raw = CreateObjectRaw::decode(&body)?;
                self.agent.employ_create_object(raw).await
            }
            other => {
                slog::error!(self.log, "unknown housekeeping subtype"; "subtype" => other);
                Status::error()
            }
        };
        self.write_ack(status).await
    }
}
