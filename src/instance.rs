//! Northbound contract between a host I/O layer and the stage.
//!
//! A host embeds the stage behind an instance: something that knows how
//! to turn its own requests into contexts and push them through
//! enforcement. Storage-specific shims (POSIX interposition, key-value
//! store hooks) implement `InstanceInterface` on top of their own request
//! vocabulary; `StageInstance` is the generic implementation for hosts
//! that already hold classifier values.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Context;
use crate::enforcement::response::{Response, ResponseStatus};
use crate::Stage;

#[async_trait]
pub trait InstanceInterface: Send + Sync {
    /// Build the classifier tuple for one request.
    fn build_context(
        &self,
        workflow_id: i64,
        operation_type: i32,
        operation_context: i32,
        operation_size: u64,
        total_operations: i32,
    ) -> Context;

    /// Push one request through the stage and return its response.
    async fn enforce(&self, context: &Context, buffer: &[u8]) -> Response;
}

/// Generic instance over a shared stage.
pub struct StageInstance {
    stage: Arc<Stage>,
    default_operation_type: i32,
    default_operation_context: i32,
}

impl StageInstance {
    pub fn new(stage: Arc<Stage>) -> StageInstance {
        StageInstance {
            stage,
            default_operation_type: crate::core::definitions::NO_OP,
            default_operation_context: crate::core::definitions::NO_OP,
        }
    }

    /// Tags applied when the host does not classify a request itself.
    pub fn set_default_operations(&mut self, operation_type: i32, operation_context: i32) {
        self.default_operation_type = operation_type;
        self.default_operation_context = operation_context;
    }

    pub fn default_operation_type(&self) -> i32 {
        self.default_operation_type
    }

    pub fn default_operation_context(&self) -> i32 {
        self.default_operation_context
    }

    /// Build a context carrying the instance's default operation tags.
    pub fn build_default_context(
        &self,
        workflow_id: i64,
        operation_size: u64,
        total_operations: i32,
    ) -> Context {
        Context::new(
            workflow_id,
            self.default_operation_type,
            self.default_operation_context,
            operation_size,
            total_operations,
        )
    }
}

#[async_trait]
impl InstanceInterface for StageInstance {
    fn build_context(
        &self,
        workflow_id: i64,
        operation_type: i32,
        operation_context: i32,
        operation_size: u64,
        total_operations: i32,
    ) -> Context {
        Context::new(
            workflow_id,
            operation_type,
            operation_context,
            operation_size,
            total_operations,
        )
    }

    async fn enforce(&self, context: &Context, buffer: &[u8]) -> Response {
        let mut response = Response::new(0);
        let status = self.stage.enforce_request(context, buffer, &mut response).await;
        if !status.is_enforced() && response.status() == ResponseStatus::None {
            response.set_status(ResponseStatus::Error);
        }
        response
    }
}
