use crate::core::definitions;

/// Per-request classifier tuple handed to the stage by the interface layer.
///
/// A context carries everything the stage needs to classify and
/// differentiate one request: the workflow it belongs to (tenant, thread,
/// flow), the operation type and context tags, the operation size, and the
/// number of operations batched behind it. It is immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    workflow_id: i64,
    operation_type: i32,
    operation_context: i32,
    operation_size: u64,
    total_operations: i32,
}

impl Context {
    pub fn new(
        workflow_id: i64,
        operation_type: i32,
        operation_context: i32,
        operation_size: u64,
        total_operations: i32,
    ) -> Context {
        Context {
            workflow_id,
            operation_type,
            operation_context,
            operation_size,
            total_operations,
        }
    }

    pub fn workflow_id(&self) -> i64 {
        self.workflow_id
    }

    pub fn operation_type(&self) -> i32 {
        self.operation_type
    }

    pub fn operation_context(&self) -> i32 {
        self.operation_context
    }

    pub fn operation_size(&self) -> u64 {
        self.operation_size
    }

    pub fn total_operations(&self) -> i32 {
        self.total_operations
    }
}

impl Default for Context {
    fn default() -> Self {
        Context {
            workflow_id: -1,
            operation_type: definitions::NO_OP,
            operation_context: definitions::NO_OP,
            operation_size: 0,
            total_operations: 0,
        }
    }
}

impl std::fmt::Display for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Context {{{}, {}, {}, {}, {}}}",
            self.workflow_id,
            self.operation_type,
            self.operation_context,
            self.operation_size,
            self.total_operations
        )
    }
}
