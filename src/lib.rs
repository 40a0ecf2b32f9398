//! flowgate: a programmable I/O data-plane stage.
//!
//! flowgate embeds into a storage client or server and intercepts its
//! I/O requests. Each request is classified by a small tuple of tags
//! (workflow, operation type, operation context), routed to a channel,
//! and enforced by the mechanism installed for it: a token-bucket rate
//! limiter, a pass-through counter, or whatever a future variant adds. A
//! remote control plane installs and retunes those mechanisms at runtime
//! over a socket; local rules files do the same for standalone
//! deployments.
//!
//! The embedding host drives everything through [`Stage`]:
//!
//! ```no_run
//! use flowgate::{Context, Response, StageBuilder};
//!
//! # async fn example() -> Result<(), flowgate::StageError> {
//! let stage = StageBuilder::new()
//!     .stage_name("kvs-shim")
//!     .channels(4)
//!     .create_default_objects(true)
//!     .build()
//!     .await?;
//!
//! let context = Context::new(1, 0, 0, 4096, 1);
//! let mut response = Response::new(0);
//! stage.enforce_request(&context, &[], &mut response).await;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod differentiation;
pub mod enforcement;
pub mod instance;
pub mod logging;
pub mod net;
pub mod options;
pub mod rules;
pub mod status;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use crate::core::{Context, Core, StageInfo};
pub use crate::enforcement::{Response, ResponseStatus, Ticket};
pub use crate::instance::{InstanceInterface, StageInstance};
pub use crate::net::{CommunicationType, ConnectionError, ConnectionOptions};
pub use crate::options::StageOptions;
pub use crate::status::Status;

use crate::core::agent::Agent;
use crate::logging::LogControl;
use crate::net::ConnectionManager;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("control plane connection failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("configuration failed: {0}")]
    Config(#[from] options::ConfigError),
}

/// The top-level data-plane object embedded in a host process.
///
/// A stage owns the core (channels and rule tables), the agent that
/// programs it, and the connection manager talking to the control plane.
/// The `ready` and `shutdown` flags are shared atomics: the stage only
/// enforces requests once the control plane (or a local bootstrap) marks
/// it ready, and every background task observes `shutdown`.
pub struct Stage {
    core: Arc<Core>,
    agent: Arc<Agent>,
    ready: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    connection: ConnectionManager,
    log_control: Option<LogControl>,
    log: slog::Logger,
}

impl Stage {
    /// Submit one request for enforcement.
    ///
    /// Returns [`Status::Enforced`] when the request passed through an
    /// enforcement mechanism, and [`Status::Error`] when the stage is not
    /// ready or routing found no channel.
    pub async fn enforce_request(
        &self,
        context: &Context,
        buffer: &[u8],
        response: &mut Response,
    ) -> Status {
        if !self.ready.load(Ordering::Acquire) {
            slog::debug!(self.log, "request refused, stage not ready");
            return Status::error();
        }
        self.core.enforce_request(context, buffer, response).await
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_interrupted(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Interrupt the stage: background tasks exit at their next timeout
    /// boundary and the control-plane connection closes.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.connection.disconnect().await;
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub fn stage_info(&self) -> StageInfo {
        self.agent.stage_info()
    }

    pub fn stage_name(&self) -> String {
        self.agent.stage_info().name().to_string()
    }

    pub fn set_stage_description(&self, description: &str) {
        self.agent.set_stage_description(description);
    }

    /// Raise or lower the log level of a running stage.
    pub fn set_debug_logging(&self, debug: bool) {
        if let Some(control) = &self.log_control {
            control.set_debug(debug);
        }
    }
}

/// Builds a [`Stage`].
///
/// Every knob is optional: the default build is a stage with no channels,
/// no control plane, and terminal logging. Deployments that need default
/// channels, local rules files, or a control-plane connection opt in per
/// field, or load everything at once from a YAML config with
/// [`StageBuilder::from_options`].
pub struct StageBuilder {
    stage_name: Option<String>,
    channels: i64,
    create_default_objects: bool,
    default_channel: Option<i64>,
    housekeeping_rules_file: Option<PathBuf>,
    differentiation_rules_file: Option<PathBuf>,
    enforcement_rules_file: Option<PathBuf>,
    execute_on_receive: bool,
    connection_options: ConnectionOptions,
    southbound_read_timeout: Duration,
    logger: Option<slog::Logger>,
    debug: bool,
}

impl StageBuilder {
    pub fn new() -> StageBuilder {
        StageBuilder {
            stage_name: None,
            channels: 0,
            create_default_objects: false,
            default_channel: None,
            housekeeping_rules_file: None,
            differentiation_rules_file: None,
            enforcement_rules_file: None,
            execute_on_receive: true,
            connection_options: ConnectionOptions::default(),
            southbound_read_timeout: options::SOUTHBOUND_READ_TIMEOUT,
            logger: None,
            debug: false,
        }
    }

    /// Seed the builder from loaded configuration.
    pub fn from_options(stage_options: StageOptions) -> StageBuilder {
        let mut builder = StageBuilder::new();
        builder.stage_name = stage_options.stage_name.clone();
        builder.channels = stage_options.channels;
        builder.create_default_objects = stage_options.create_default_objects;
        builder.housekeeping_rules_file =
            core::agent::existing_path(stage_options.housekeeping_rules_file.as_ref());
        builder.differentiation_rules_file =
            core::agent::existing_path(stage_options.differentiation_rules_file.as_ref());
        builder.enforcement_rules_file =
            core::agent::existing_path(stage_options.enforcement_rules_file.as_ref());
        builder.southbound_read_timeout = stage_options.southbound_read_timeout;
        builder.debug = stage_options.debug;
        if let Some(connection_type) = &stage_options.connection_type {
            builder.connection_options.connection_type =
                CommunicationType::from_token(connection_type);
        }
        if let Some(address) = &stage_options.connection_address {
            builder.connection_options.address = address.clone();
        }
        if let Some(port) = stage_options.connection_port {
            builder.connection_options.port = port;
        }
        builder
    }

    pub fn stage_name(mut self, name: &str) -> StageBuilder {
        self.stage_name = Some(name.to_string());
        self
    }

    /// Create this many channels at build time, with workflow ids
    /// `0..channels`.
    pub fn channels(mut self, channels: i64) -> StageBuilder {
        self.channels = channels;
        self
    }

    /// Install a catch-all noop object in every default channel.
    pub fn create_default_objects(mut self, create: bool) -> StageBuilder {
        self.create_default_objects = create;
        self
    }

    /// Route requests that match no channel to this one instead of
    /// rejecting them.
    pub fn default_channel(mut self, channel_id: i64) -> StageBuilder {
        self.default_channel = Some(channel_id);
        self
    }

    pub fn housekeeping_rules_file(mut self, path: PathBuf) -> StageBuilder {
        self.housekeeping_rules_file = Some(path);
        self
    }

    pub fn differentiation_rules_file(mut self, path: PathBuf) -> StageBuilder {
        self.differentiation_rules_file = Some(path);
        self
    }

    pub fn enforcement_rules_file(mut self, path: PathBuf) -> StageBuilder {
        self.enforcement_rules_file = Some(path);
        self
    }

    /// Execute housekeeping rules as they are inserted instead of staging
    /// them for a later execute command.
    pub fn execute_on_receive(mut self, execute: bool) -> StageBuilder {
        self.execute_on_receive = execute;
        self
    }

    pub fn connection(mut self, connection_options: ConnectionOptions) -> StageBuilder {
        self.connection_options = connection_options;
        self
    }

    pub fn logger(mut self, logger: slog::Logger) -> StageBuilder {
        self.logger = Some(logger);
        self
    }

    pub fn debug(mut self, debug: bool) -> StageBuilder {
        self.debug = debug;
        self
    }

    pub async fn build(self) -> Result<Stage, StageError> {
        let (log, log_control) = match self.logger {
            Some(logger) => (logger, None),
            None => {
                let (logger, control) = logging::stage_logger(self.debug);
                (logger, Some(control))
            }
        };
        logging::set_fallback(log.clone());

        let ready = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let core = Arc::new(Core::new(Arc::clone(&shutdown), log.clone()));
        let stage_info = StageInfo::new(self.stage_name.as_deref());
        slog::info!(
            log,
            "constructing data plane stage";
            "stage_name" => stage_info.name().to_string(),
            "channels" => self.channels
        );

        let agent = Arc::new(Agent::new(
            Arc::clone(&core),
            Arc::clone(&ready),
            stage_info,
            log.clone(),
        ));

        // Default channels route by workflow id; an optional catch-all
        // object per channel bypasses anything more specific rules have
        // not claimed yet.
        for channel_id in 0..self.channels {
            core.create_channel(channel_id, channel_id, -1, -1);
            if self.create_default_objects {
                core.create_enforcement_object(
                    channel_id,
                    0,
                    differentiation::ObjectDifferentiationPair::new(0, 0),
                    enforcement::ObjectType::Noop,
                    &[],
                )
                .await;
            }
        }
        core.set_default_channel(self.default_channel);

        agent
            .bootstrap_rules(
                self.housekeeping_rules_file.as_deref(),
                self.differentiation_rules_file.as_deref(),
                self.enforcement_rules_file.as_deref(),
                self.execute_on_receive,
            )
            .await;

        let standalone =
            self.connection_options.connection_type == CommunicationType::None;
        let connection = ConnectionManager::connect(
            self.connection_options,
            Arc::clone(&agent),
            Arc::clone(&shutdown),
            self.southbound_read_timeout,
            log.clone(),
        )
        .await?;

        // Without a control plane nothing else will flip the ready flag;
        // the local bootstrap is all the programming this stage gets.
        if standalone {
            agent.mark_ready();
        }

        Ok(Stage {
            core,
            agent,
            ready,
            shutdown,
            connection,
            log_control,
            log,
        })
    }
}

impl Default for StageBuilder {
    fn default() -> Self {
        StageBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    #[tokio::test]
    async fn standalone_stage_is_ready_after_build() {
        let stage = StageBuilder::new()
            .stage_name("standalone")
            .channels(2)
            .create_default_objects(true)
            .logger(test_logger())
            .build()
            .await
            .expect("build stage");

        assert!(stage.is_ready());
        assert!(!stage.is_interrupted());
        assert_eq!(stage.core().channel_count(), 2);

        let context = Context::new(0, 0, 0, 256, 1);
        let mut response = Response::new(0);
        let status = stage.enforce_request(&context, b"abc", &mut response).await;
        assert!(status.is_enforced());
        assert_eq!(response.status(), ResponseStatus::Success);
        assert_eq!(response.content(), b"abc");
    }

    #[tokio::test]
    async fn requests_are_refused_until_ready() {
        // A stage wired for a control plane is not ready at build time;
        // simulate by never marking ready.
        let stage = StageBuilder::new()
            .stage_name("not-ready")
            .logger(test_logger())
            .build()
            .await
            .expect("build stage");

        // Standalone stages are marked ready by the bootstrap, so flip it
        // back to exercise the gate.
        stage.ready.store(false, Ordering::Release);

        let context = Context::new(0, 0, 0, 0, 1);
        let mut response = Response::new(0);
        let status = stage.enforce_request(&context, &[], &mut response).await;
        assert!(status.is_error());
    }

    #[tokio::test]
    async fn rule_files_program_the_stage_at_build() {
        let mut path = std::env::temp_dir();
        path.push(format!("flowgate-stage-{}-hsk", std::process::id()));
        std::fs::write(
            &path,
            "create_channel 1 0 PAIO_GENERAL 9 no_op no_op\n\
             create_object 2 0 1 noop PAIO_GENERAL no_op no_op\n",
        )
        .expect("write rules");

        let stage = StageBuilder::new()
            .stage_name("ruled")
            .housekeeping_rules_file(path.clone())
            .logger(test_logger())
            .build()
            .await
            .expect("build stage");

        assert_eq!(stage.core().channel_count(), 1);

        let context = Context::new(9, 0, 0, 64, 1);
        let mut response = Response::new(0);
        let status = stage.enforce_request(&context, &[], &mut response).await;
        assert!(status.is_enforced());
        assert_eq!(response.status(), ResponseStatus::Success);

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn shutdown_flips_the_shared_flag() {
        let stage = StageBuilder::new()
            .stage_name("stopping")
            .logger(test_logger())
            .build()
            .await
            .expect("build stage");
        assert!(!stage.is_interrupted());
        stage.shutdown().await;
        assert!(stage.is_interrupted());
    }

    #[tokio::test]
    async fn instance_interface_round_trips() {
        let stage = Arc::new(
            StageBuilder::new()
                .stage_name("instanced")
                .channels(1)
                .create_default_objects(true)
                .logger(test_logger())
                .build()
                .await
                .expect("build stage"),
        );

        let instance = StageInstance::new(Arc::clone(&stage));
        let context = instance.build_context(0, 0, 0, 128, 1);
        let response = instance.enforce(&context, b"through the instance").await;
        assert_eq!(response.status(), ResponseStatus::Success);
        assert_eq!(response.content(), b"through the instance");
    }

    #[tokio::test]
    async fn stage_description_is_settable() {
        let stage = StageBuilder::new()
            .stage_name("described")
            .logger(test_logger())
            .build()
            .await
            .expect("build stage");
        stage.set_stage_description("posix interposition shim");
        assert_eq!(stage.stage_info().description(), "posix interposition shim");
        assert_eq!(stage.stage_name(), "described");
    }
}
