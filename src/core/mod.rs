//! The core: channel registry, request routing, and rule application.

pub mod agent;
pub mod context;
pub mod definitions;
pub mod stage_info;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::differentiation::{
    ChannelDifferentiationBuilder, ChannelDifferentiationTuple, ObjectDifferentiationPair,
};
use crate::enforcement::channel::{Channel, ChannelStatsRaw};
use crate::enforcement::object::ObjectType;
use crate::enforcement::response::{Response, ResponseStatus};
use crate::enforcement::tb_stats::ObjectStatisticsRaw;
use crate::rules::tables::{DifferentiationTable, EnforcementTable, HousekeepingTable};
use crate::rules::{
    DifferentiationRule, EnforcementRule, HousekeepingOperation, HousekeepingRule,
};
use crate::status::Status;

pub use context::Context;
pub use stage_info::StageInfo;

/// Registry of channels and rule tables; owner of the request path.
///
/// The channel map is keyed twice: by channel id for management
/// operations, and by differentiation token for the per-request lookup. A
/// request whose token matches no channel follows the no-match policy:
/// routed to the default channel when one is configured, otherwise
/// rejected.
pub struct Core {
    channels: std::sync::Mutex<HashMap<i64, Arc<Channel>>>,
    channel_tokens: std::sync::Mutex<HashMap<u32, i64>>,
    channel_diff_builder: std::sync::Mutex<ChannelDifferentiationBuilder>,
    housekeeping_table: HousekeepingTable,
    differentiation_table: DifferentiationTable,
    enforcement_table: EnforcementTable,
    default_channel: std::sync::Mutex<Option<i64>>,
    shutdown: Arc<AtomicBool>,
    log: slog::Logger,
}

impl Core {
    pub fn new(shutdown: Arc<AtomicBool>, log: slog::Logger) -> Core {
        let mut builder = ChannelDifferentiationBuilder::default();
        builder.bind_builder();
        Core {
            channels: std::sync::Mutex::new(HashMap::new()),
            channel_tokens: std::sync::Mutex::new(HashMap::new()),
            channel_diff_builder: std::sync::Mutex::new(builder),
            housekeeping_table: HousekeepingTable::new(log.clone()),
            differentiation_table: DifferentiationTable::default(),
            enforcement_table: EnforcementTable::default(),
            default_channel: std::sync::Mutex::new(None),
            shutdown,
            log,
        }
    }

    /// Select which classifiers the channel routing hashes over. Applies
    /// to lookups and channels created afterwards.
    pub fn define_channel_differentiation(
        &self,
        workflow: bool,
        operation_type: bool,
        operation_context: bool,
    ) {
        if let Ok(mut builder) = self.channel_diff_builder.lock() {
            builder.set_classifiers(workflow, operation_type, operation_context);
            builder.bind_builder();
        }
    }

    fn build_channel_token(&self, tuple: &ChannelDifferentiationTuple) -> u32 {
        match self.channel_diff_builder.lock() {
            Ok(builder) => builder.build_token(tuple),
            Err(poisoned) => poisoned.into_inner().build_token(tuple),
        }
    }

    /// Route every unmatched request to `channel_id` instead of failing.
    pub fn set_default_channel(&self, channel_id: Option<i64>) {
        if let Ok(mut guard) = self.default_channel.lock() {
            *guard = channel_id;
        }
    }

    pub fn channel(&self, channel_id: i64) -> Option<Arc<Channel>> {
        self.channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(&channel_id).cloned())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn route(&self, context: &Context) -> Option<Arc<Channel>> {
        let tuple = ChannelDifferentiationTuple::new(
            context.workflow_id() as u32,
            context.operation_type() as u32,
            context.operation_context() as u32,
        );
        let token = self.build_channel_token(&tuple);

        let channel_id = self
            .channel_tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(&token).copied());

        match channel_id {
            Some(channel_id) => self.channel(channel_id),
            None => {
                let fallback = self.default_channel.lock().ok().and_then(|guard| *guard);
                fallback.and_then(|channel_id| self.channel(channel_id))
            }
        }
    }

    /// Enforce one request. Returns `Enforced` when a channel handled it,
    /// `Error` when routing found nothing.
    pub async fn enforce_request(
        &self,
        context: &Context,
        buffer: &[u8],
        response: &mut Response,
    ) -> Status {
        match self.route(context) {
            Some(channel) => {
                channel.enforce(context, buffer, response).await;
                Status::enforced()
            }
            None => {
                slog::debug!(
                    self.log,
                    "no channel for request";
                    "workflow_id" => context.workflow_id(),
                    "operation_type" => context.operation_type()
                );
                response.set_status(ResponseStatus::Error);
                Status::error()
            }
        }
    }

    /// Create a channel whose routing token is built from the rule's
    /// selector tuple. Duplicate ids and duplicate tokens are rejected.
    pub fn create_channel(
        &self,
        channel_id: i64,
        workflow_id: i64,
        operation_type: i64,
        operation_context: i64,
    ) -> Status {
        let tuple = ChannelDifferentiationTuple::new(
            workflow_id as u32,
            operation_type as u32,
            operation_context as u32,
        );
        let token = self.build_channel_token(&tuple);

        let mut channels = match self.channels.lock() {
            Ok(channels) => channels,
            Err(_) => return Status::error(),
        };
        let mut tokens = match self.channel_tokens.lock() {
            Ok(tokens) => tokens,
            Err(_) => return Status::error(),
        };

        if channels.contains_key(&channel_id) || tokens.contains_key(&token) {
            slog::error!(
                self.log,
                "channel already exists";
                "channel_id" => channel_id,
                "token" => token
            );
            return Status::error();
        }

        let channel = Arc::new(Channel::new(
            channel_id,
            Arc::clone(&self.shutdown),
            self.log.clone(),
        ));
        channels.insert(channel_id, channel);
        tokens.insert(token, channel_id);
        slog::debug!(self.log, "created channel"; "channel_id" => channel_id, "token" => token);
        Status::ok()
    }

    pub async fn create_enforcement_object(
        &self,
        channel_id: i64,
        object_id: i64,
        pair: ObjectDifferentiationPair,
        object_type: ObjectType,
        configurations: &[i64],
    ) -> Status {
        match self.channel(channel_id) {
            Some(channel) => {
                channel
                    .create_enforcement_object(object_id, pair, object_type, configurations)
                    .await
            }
            None => {
                slog::error!(self.log, "unknown channel"; "channel_id" => channel_id);
                Status::error()
            }
        }
    }

    pub async fn configure_enforcement_object(
        &self,
        channel_id: i64,
        object_id: i64,
        operation: i32,
        values: &[i64],
    ) -> Status {
        match self.channel(channel_id) {
            Some(channel) => {
                channel
                    .configure_enforcement_object(object_id, operation, values)
                    .await
            }
            None => Status::error(),
        }
    }

    pub async fn collect_object_statistics(
        &self,
        channel_id: i64,
        object_id: i64,
        raw: &mut ObjectStatisticsRaw,
    ) -> Status {
        match self.channel(channel_id) {
            Some(channel) => channel.collect_object_statistics(object_id, raw).await,
            None => Status::not_found(),
        }
    }

    pub fn collect_channel_statistics(
        &self,
        channel_id: i64,
        raw: &mut ChannelStatsRaw,
    ) -> Status {
        match self.channel(channel_id) {
            Some(channel) => channel.collect_general_statistics(raw),
            None => Status::not_found(),
        }
    }

    /// General statistics of every channel, for the control plane.
    pub fn collect_global_statistics(&self) -> Vec<ChannelStatsRaw> {
        let channels: Vec<Arc<Channel>> = match self.channels.lock() {
            Ok(channels) => channels.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        let mut all = Vec::with_capacity(channels.len());
        for channel in channels {
            let mut raw = ChannelStatsRaw::default();
            if channel.collect_general_statistics(&mut raw).is_ok() {
                all.push(raw);
            }
        }
        all.sort_by_key(|raw| raw.channel_id);
        all
    }

    pub fn housekeeping_table(&self) -> &HousekeepingTable {
        &self.housekeeping_table
    }

    pub fn differentiation_table(&self) -> &DifferentiationTable {
        &self.differentiation_table
    }

    pub fn enforcement_table(&self) -> &EnforcementTable {
        &self.enforcement_table
    }

    // Execute one housekeeping rule against the registry.
    async fn employ_housekeeping_rule(&self, rule: &HousekeepingRule) -> Status {
        match rule.operation {
            HousekeepingOperation::CreateChannel => self.create_channel(
                rule.channel_id,
                rule.property_at(0),
                rule.property_at(1),
                rule.property_at(2),
            ),
            HousekeepingOperation::CreateObject => {
                let object_type = ObjectType::from_i32(rule.property_at(0) as i32);
                let pair = ObjectDifferentiationPair::new(
                    rule.property_at(1) as u32,
                    rule.property_at(2) as u32,
                );
                let configurations: Vec<i64> = rule.properties.iter().skip(3).copied().collect();
                self.create_enforcement_object(
                    rule.channel_id,
                    rule.enforcement_object_id,
                    pair,
                    object_type,
                    &configurations,
                )
                .await
            }
            HousekeepingOperation::Configure
            | HousekeepingOperation::Remove
            | HousekeepingOperation::NoOp => Status::not_supported(),
        }
    }

    /// Insert a housekeeping rule and optionally execute it immediately.
    pub async fn insert_housekeeping_rule(
        &self,
        rule: HousekeepingRule,
        execute: bool,
    ) -> Status {
        let rule_id = rule.rule_id;
        let status = self.housekeeping_table.insert_rule(rule.clone());
        if !status.is_ok() {
            return status;
        }
        if execute {
            let employed = self.employ_housekeeping_rule(&rule).await;
            if employed.is_ok() {
                return self.housekeeping_table.mark_rule_as_enforced(rule_id);
            }
            return employed;
        }
        Status::ok()
    }

    /// Execute every housekeeping rule still flagged as not enforced.
    pub async fn execute_pending_housekeeping_rules(&self) -> Status {
        let pending = self.housekeeping_table.pending_rule_ids();
        for rule_id in pending {
            let rule = match self.housekeeping_table.select_rule(rule_id) {
                Some(rule) => rule,
                None => continue,
            };
            if self.employ_housekeeping_rule(&rule).await.is_ok() {
                self.housekeeping_table.mark_rule_as_enforced(rule_id);
            }
        }
        Status::ok()
    }

    pub fn insert_differentiation_rule(&self, rule: DifferentiationRule) -> Status {
        self.differentiation_table.insert_rule(rule)
    }

    /// Apply an enforcement rule: record it and translate it into the
    /// target object's configure call.
    pub async fn apply_enforcement_rule(&self, rule: EnforcementRule) -> Status {
        self.enforcement_table.insert_rule(rule.clone());
        self.configure_enforcement_object(
            rule.channel_id,
            rule.enforcement_object_id,
            rule.operation,
            &rule.configurations,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn test_core() -> Core {
        Core::new(Arc::new(AtomicBool::new(false)), test_logger())
    }

    #[tokio::test]
    async fn requests_route_to_the_matching_channel() {
        let core = test_core();
        assert!(core.create_channel(1, 7, -1, -1).is_ok());
        core.create_enforcement_object(
            1,
            0,
            ObjectDifferentiationPair::new(0, 0),
            ObjectType::Noop,
            &[],
        )
        .await;

        // Default differentiation routes by workflow id only.
        let context = Context::new(7, 1, 1, 64, 1);
        let mut response = Response::new(0);
        let status = core.enforce_request(&context, b"data", &mut response).await;
        assert!(status.is_enforced());
        assert_eq!(response.status(), ResponseStatus::Success);
        assert_eq!(response.content(), b"data");
    }

    #[tokio::test]
    async fn unmatched_requests_error_without_a_default_channel() {
        let core = test_core();
        core.create_channel(1, 7, -1, -1);

        let context = Context::new(999, 1, 1, 64, 1);
        let mut response = Response::new(0);
        let status = core.enforce_request(&context, &[], &mut response).await;
        assert!(status.is_error());
        assert_eq!(response.status(), ResponseStatus::Error);
    }

    #[tokio::test]
    async fn unmatched_requests_fall_back_to_the_default_channel() {
        let core = test_core();
        core.create_channel(1, 7, -1, -1);
        core.set_default_channel(Some(1));

        let context = Context::new(999, 1, 1, 64, 1);
        let mut response = Response::new(0);
        let status = core.enforce_request(&context, &[], &mut response).await;
        assert!(status.is_enforced());
        assert_eq!(response.status(), ResponseStatus::Success);
    }

    #[test]
    fn duplicate_channels_are_rejected() {
        let core = test_core();
        assert!(core.create_channel(1, 7, -1, -1).is_ok());
        assert!(core.create_channel(1, 8, -1, -1).is_error());
        // Same routing token, different id.
        assert!(core.create_channel(2, 7, -1, -1).is_error());
        assert_eq!(core.channel_count(), 1);
    }

    #[tokio::test]
    async fn housekeeping_rules_create_channels_and_objects() {
        let core = test_core();

        let channel_rule = HousekeepingRule::new(
            1,
            HousekeepingOperation::CreateChannel,
            1,
            -1,
            vec![3, -1, -1],
        );
        assert!(core.insert_housekeeping_rule(channel_rule, true).await.is_ok());
        assert_eq!(core.channel_count(), 1);

        let object_rule = HousekeepingRule::new(
            2,
            HousekeepingOperation::CreateObject,
            1,
            10,
            vec![ObjectType::DynamicRateLimiter as i64, 0, 0, 1_000_000, 1000],
        );
        assert!(core.insert_housekeeping_rule(object_rule, true).await.is_ok());

        // Both rules are now enforced; nothing is pending.
        assert_eq!(core.housekeeping_table().rules_left_to_employ(), 0);
        assert_eq!(core.housekeeping_table().size(), 2);
    }

    #[tokio::test]
    async fn deferred_rules_execute_on_demand() {
        let core = test_core();
        let rule = HousekeepingRule::new(
            5,
            HousekeepingOperation::CreateChannel,
            2,
            -1,
            vec![4, -1, -1],
        );
        assert!(core.insert_housekeeping_rule(rule, false).await.is_ok());
        assert_eq!(core.channel_count(), 0);
        assert_eq!(core.housekeeping_table().rules_left_to_employ(), 1);

        assert!(core.execute_pending_housekeeping_rules().await.is_ok());
        assert_eq!(core.channel_count(), 1);
        assert_eq!(core.housekeeping_table().rules_left_to_employ(), 0);
    }

    #[tokio::test]
    async fn enforcement_rules_translate_to_configure_calls() {
        let core = test_core();
        core.create_channel(1, 1, -1, -1);
        core.create_enforcement_object(
            1,
            2,
            ObjectDifferentiationPair::new(0, 0),
            ObjectType::DynamicRateLimiter,
            &[1_000_000, 1000],
        )
        .await;

        let rule = EnforcementRule {
            rule_id: 1,
            channel_id: 1,
            enforcement_object_id: 2,
            operation: crate::enforcement::rate_limiter::DrlOperation::Rate as i32,
            configurations: vec![500],
        };
        assert!(core.apply_enforcement_rule(rule).await.is_ok());
        assert_eq!(core.enforcement_table().size(), 1);

        let missing = EnforcementRule {
            rule_id: 2,
            channel_id: 9,
            enforcement_object_id: 2,
            operation: 2,
            configurations: vec![500],
        };
        assert!(core.apply_enforcement_rule(missing).await.is_error());
    }

    #[tokio::test]
    async fn global_statistics_cover_every_channel() {
        let core = test_core();
        core.create_channel(1, 1, -1, -1);
        core.create_channel(2, 2, -1, -1);

        let context = Context::new(1, 1, 1, 100, 1);
        let mut response = Response::new(0);
        core.enforce_request(&context, &[], &mut response).await;

        let stats = core.collect_global_statistics();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].channel_id, 1);
        assert_eq!(stats[0].total_operations, 1);
        assert_eq!(stats[1].total_operations, 0);
    }
}
