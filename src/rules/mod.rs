//! Rules: the control instructions that program a stage.
//!
//! Housekeeping rules create and manage channels and enforcement objects,
//! differentiation rules configure request routing, and enforcement rules
//! retune installed objects at runtime. Rules arrive either from local
//! rules files or from the control plane over the southbound connection.

pub mod parser;
pub mod tables;

pub use parser::{RuleType, RulesParser};
pub use tables::{DifferentiationTable, EnforcementTable, HousekeepingTable};

/// Operations a housekeeping rule can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HousekeepingOperation {
    NoOp = 0,
    CreateChannel = 1,
    CreateObject = 2,
    Configure = 3,
    Remove = 4,
}

impl HousekeepingOperation {
    pub fn from_token(token: &str) -> HousekeepingOperation {
        match token {
            "create_channel" => HousekeepingOperation::CreateChannel,
            "create_object" => HousekeepingOperation::CreateObject,
            "configure" => HousekeepingOperation::Configure,
            "remove" => HousekeepingOperation::Remove,
            _ => HousekeepingOperation::NoOp,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            HousekeepingOperation::NoOp => "no_op",
            HousekeepingOperation::CreateChannel => "create_channel",
            HousekeepingOperation::CreateObject => "create_object",
            HousekeepingOperation::Configure => "configure",
            HousekeepingOperation::Remove => "remove",
        }
    }
}

/// Management instruction over channels and enforcement objects.
///
/// Property layout depends on the operation. For `create_channel` the
/// properties are the channel differentiation selectors `[workflow_id,
/// operation_type, operation_context]` (`-1` meaning wildcard). For
/// `create_object` they are `[object_type, operation_type,
/// operation_context, initial configuration...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HousekeepingRule {
    pub rule_id: u64,
    pub operation: HousekeepingOperation,
    pub channel_id: i64,
    pub enforcement_object_id: i64,
    pub properties: Vec<i64>,
    pub enforced: bool,
}

impl HousekeepingRule {
    pub fn new(
        rule_id: u64,
        operation: HousekeepingOperation,
        channel_id: i64,
        enforcement_object_id: i64,
        properties: Vec<i64>,
    ) -> HousekeepingRule {
        HousekeepingRule {
            rule_id,
            operation,
            channel_id,
            enforcement_object_id,
            properties,
            enforced: false,
        }
    }

    pub fn property_at(&self, index: usize) -> i64 {
        self.properties.get(index).copied().unwrap_or(-1)
    }
}

impl std::fmt::Display for HousekeepingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {:?}, {}",
            self.rule_id,
            self.operation.name(),
            self.channel_id,
            self.enforcement_object_id,
            self.properties,
            self.enforced
        )
    }
}

/// Whether a differentiation rule targets channel or object routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferentiationRuleType {
    None = 0,
    Channel = 1,
    Object = 2,
}

impl DifferentiationRuleType {
    pub fn from_token(token: &str) -> DifferentiationRuleType {
        match token {
            "channel" => DifferentiationRuleType::Channel,
            "object" => DifferentiationRuleType::Object,
            _ => DifferentiationRuleType::None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DifferentiationRuleType::None => "none",
            DifferentiationRuleType::Channel => "channel",
            DifferentiationRuleType::Object => "object",
        }
    }
}

/// Routing instruction: which classifier values select a channel or an
/// enforcement object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifferentiationRule {
    pub rule_id: u64,
    pub rule_type: DifferentiationRuleType,
    pub channel_id: i64,
    pub enforcement_object_id: i64,
    pub workflow_id: i64,
    pub operation_type: i64,
    pub operation_context: i64,
}

impl std::fmt::Display for DifferentiationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {{{}, {}, {}}}",
            self.rule_id,
            self.rule_type.name(),
            self.channel_id,
            self.enforcement_object_id,
            self.workflow_id,
            self.operation_type,
            self.operation_context
        )
    }
}

/// Runtime reconfiguration of an installed enforcement object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementRule {
    pub rule_id: u64,
    pub channel_id: i64,
    pub enforcement_object_id: i64,
    pub operation: i32,
    pub configurations: Vec<i64>,
}

impl std::fmt::Display for EnforcementRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {:?}",
            self.rule_id,
            self.channel_id,
            self.enforcement_object_id,
            self.operation,
            self.configurations
        )
    }
}
