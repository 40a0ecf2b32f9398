//! The agent bridges rules to the core.
//!
//! At stage construction it loads the local rules files (housekeeping,
//! differentiation, enforcement) and applies them; afterwards it backs
//! every operation the southbound handler dispatches on behalf of the
//! control plane.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::stage_info::StageInfo;
use crate::core::Core;
use crate::net::wire::{self, StageInfoRaw, WireError};
use crate::rules::parser::{RuleType, RulesParser};
use crate::rules::{DifferentiationRule, EnforcementRule, HousekeepingRule};
use crate::status::Status;

pub struct Agent {
    core: Arc<Core>,
    ready: Arc<AtomicBool>,
    stage_info: std::sync::Mutex<StageInfo>,
    log: slog::Logger,
}

impl Agent {
    pub fn new(
        core: Arc<Core>,
        ready: Arc<AtomicBool>,
        stage_info: StageInfo,
        log: slog::Logger,
    ) -> Agent {
        Agent {
            core,
            ready,
            stage_info: std::sync::Mutex::new(stage_info),
            log: log.new(slog::o!("subsystem" => "agent")),
        }
    }

    /// Load and apply the local rules files. Missing paths are skipped.
    /// Housekeeping rules execute immediately when `execute_on_receive`
    /// is set, otherwise they stay staged in the table.
    pub async fn bootstrap_rules(
        &self,
        housekeeping: Option<&Path>,
        differentiation: Option<&Path>,
        enforcement: Option<&Path>,
        execute_on_receive: bool,
    ) {
        if let Some(path) = housekeeping {
            self.load_housekeeping_rules(path, execute_on_receive).await;
        }
        if let Some(path) = differentiation {
            self.load_differentiation_rules(path);
        }
        if let Some(path) = enforcement {
            self.load_enforcement_rules(path).await;
        }
    }

    async fn load_housekeeping_rules(&self, path: &Path, execute: bool) {
        let parser = RulesParser::from_file(RuleType::Housekeeping, path, self.log.clone());

        // Channels first, then the objects that live inside them.
        let mut rules: Vec<HousekeepingRule> = Vec::new();
        parser.get_create_channel_rules(&mut rules, -1);
        parser.get_create_object_rules(&mut rules, -1);

        let mut applied = 0;
        for rule in rules {
            if self.core.insert_housekeeping_rule(rule, execute).await.is_ok() {
                applied += 1;
            }
        }
        slog::info!(
            self.log,
            "loaded housekeeping rules";
            "path" => path.display().to_string(),
            "applied" => applied,
            "executed" => execute
        );
    }

    fn load_differentiation_rules(&self, path: &Path) {
        let parser = RulesParser::from_file(RuleType::Differentiation, path, self.log.clone());
        let mut rules: Vec<DifferentiationRule> = Vec::new();
        parser.get_differentiation_rules(&mut rules, -1);

        let mut applied = 0;
        for rule in rules {
            if self.core.insert_differentiation_rule(rule).is_ok() {
                applied += 1;
            }
        }
        slog::info!(
            self.log,
            "loaded differentiation rules";
            "path" => path.display().to_string(),
            "applied" => applied
        );
    }

    async fn load_enforcement_rules(&self, path: &Path) {
        let parser = RulesParser::from_file(RuleType::Enforcement, path, self.log.clone());
        let mut rules: Vec<EnforcementRule> = Vec::new();
        parser.get_enforcement_rules(&mut rules, -1);

        let mut applied = 0;
        for rule in rules {
            if self.core.apply_enforcement_rule(rule).await.is_ok() {
                applied += 1;
            }
        }
        slog::info!(
            self.log,
            "loaded enforcement rules";
            "path" => path.display().to_string(),
            "applied" => applied
        );
    }

    /// Flip the shared ready flag: the stage starts accepting requests.
    pub fn mark_ready(&self) -> Status {
        self.ready.store(true, Ordering::Release);
        slog::info!(self.log, "stage marked ready");
        Status::ok()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Serialize the stage identity for the handshake.
    pub fn stage_info_raw(&self) -> Result<StageInfoRaw, WireError> {
        match self.stage_info.lock() {
            Ok(info) => Ok(StageInfoRaw::from_stage_info(&info)),
            Err(poisoned) => Ok(StageInfoRaw::from_stage_info(&poisoned.into_inner())),
        }
    }

    pub fn set_stage_description(&self, description: &str) {
        if let Ok(mut info) = self.stage_info.lock() {
            info.set_description(description);
        }
    }

    pub fn stage_info(&self) -> StageInfo {
        match self.stage_info.lock() {
            Ok(info) => info.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Handle a create-housekeeping-rule control operation. The rule is
    /// inserted and executed immediately.
    pub async fn employ_create_channel(&self, raw: wire::CreateChannelRaw) -> Status {
        if raw.channel_mask >= 0 {
            self.core.define_channel_differentiation(
                raw.channel_mask & 0b001 != 0,
                raw.channel_mask & 0b010 != 0,
                raw.channel_mask & 0b100 != 0,
            );
        }

        let rule = HousekeepingRule::new(
            raw.rule_id.max(0) as u64,
            crate::rules::HousekeepingOperation::CreateChannel,
            raw.channel_id,
            -1,
            vec![raw.workflow_id, raw.operation_type, raw.operation_context],
        );
        let status = self.core.insert_housekeeping_rule(rule, true).await;
        if !status.is_ok() {
            return status;
        }

        if let Some(channel) = self.core.channel(raw.channel_id) {
            if raw.object_mask >= 0 {
                channel.define_object_differentiation(
                    raw.object_mask & 0b01 != 0,
                    raw.object_mask & 0b10 != 0,
                );
            }
            if raw.create_default_object != 0 {
                let created = channel
                    .create_enforcement_object(
                        0,
                        crate::differentiation::ObjectDifferentiationPair::new(0, 0),
                        crate::enforcement::object::ObjectType::Noop,
                        &[],
                    )
                    .await;
                if !created.is_ok() {
                    return created;
                }
            }
        }
        Status::ok()
    }

    pub async fn employ_create_object(&self, raw: wire::CreateObjectRaw) -> Status {
        let mut properties = vec![
            raw.object_type as i64,
            raw.operation_type,
            raw.operation_context,
        ];
        properties.extend_from_slice(&raw.configurations);
        let rule = HousekeepingRule::new(
            raw.rule_id.max(0) as u64,
            crate::rules::HousekeepingOperation::CreateObject,
            raw.channel_id,
            raw.enforcement_object_id,
            properties,
        );
        self.core.insert_housekeeping_rule(rule, true).await
    }

    pub fn employ_differentiation_rule(&self, raw: wire::DifferentiationRuleRaw) -> Status {
        let rule = DifferentiationRule {
            rule_id: raw.rule_id.max(0) as u64,
            rule_type: match raw.rule_type {
                1 => crate::rules::DifferentiationRuleType::Channel,
                2 => crate::rules::DifferentiationRuleType::Object,
                _ => crate::rules::DifferentiationRuleType::None,
            },
            channel_id: raw.channel_id,
            enforcement_object_id: raw.enforcement_object_id,
            workflow_id: raw.workflow_id,
            operation_type: raw.operation_type,
            operation_context: raw.operation_context,
        };
        self.core.insert_differentiation_rule(rule)
    }

    pub async fn employ_enforcement_rule(&self, raw: wire::EnforcementRuleRaw) -> Status {
        let rule = EnforcementRule {
            rule_id: raw.rule_id.max(0) as u64,
            channel_id: raw.channel_id,
            enforcement_object_id: raw.enforcement_object_id,
            operation: raw.enforcement_operation,
            configurations: raw.properties(),
        };
        self.core.apply_enforcement_rule(rule).await
    }

    pub async fn execute_pending_housekeeping_rules(&self) -> Status {
        self.core.execute_pending_housekeeping_rules().await
    }

    pub fn remove_rule(&self, raw: wire::RemoveRuleRaw) -> Status {
        let rule_id = raw.rule_id.max(0) as u64;
        match raw.rule_kind {
            wire::RULE_KIND_HOUSEKEEPING => self.core.housekeeping_table().remove_rule(rule_id),
            wire::RULE_KIND_DIFFERENTIATION => {
                self.core.differentiation_table().remove_rule(rule_id)
            }
            wire::RULE_KIND_ENFORCEMENT => self.core.enforcement_table().remove_rule(rule_id),
            other => {
                slog::error!(self.log, "unknown rule kind"; "kind" => other);
                Status::error()
            }
        }
    }

    pub fn collect_global_statistics(&self) -> wire::StatsGlobalRaw {
        wire::StatsGlobalRaw {
            channels: self.core.collect_global_statistics(),
        }
    }
}

/// Resolve an optional configured path, dropping ones that do not exist.
pub fn existing_path(path: Option<&String>) -> Option<PathBuf> {
    path.map(PathBuf::from).filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn test_agent() -> Agent {
        let shutdown = Arc::new(AtomicBool::new(false));
        let core = Arc::new(Core::new(shutdown, test_logger()));
        Agent::new(
            core,
            Arc::new(AtomicBool::new(false)),
            StageInfo::new(Some("agent-test")),
            test_logger(),
        )
    }

    #[tokio::test]
    async fn bootstrap_applies_rules_files() {
        let mut path = std::env::temp_dir();
        path.push(format!("flowgate-agent-{}-hsk", std::process::id()));
        std::fs::write(
            &path,
            "create_channel 1 1 PAIO_GENERAL 1 no_op no_op\n\
             create_object 2 1 0 noop PAIO_GENERAL no_op no_op\n",
        )
        .expect("write rules");

        let agent = test_agent();
        agent.bootstrap_rules(Some(&path), None, None, true).await;
        assert_eq!(agent.core().channel_count(), 1);
        assert_eq!(agent.core().housekeeping_table().size(), 2);
        assert_eq!(agent.core().housekeeping_table().rules_left_to_employ(), 0);
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn control_plane_rules_flow_through_the_agent() {
        let agent = test_agent();

        let status = agent
            .employ_create_channel(wire::CreateChannelRaw {
                rule_id: 1,
                channel_id: 1,
                workflow_id: 3,
                operation_type: -1,
                operation_context: -1,
                channel_mask: -1,
                create_default_object: 0,
                object_mask: -1,
            })
            .await;
        assert!(status.is_ok());

        let status = agent
            .employ_create_object(wire::CreateObjectRaw {
                rule_id: 2,
                channel_id: 1,
                enforcement_object_id: 4,
                object_type: 2,
                operation_type: 0,
                operation_context: 0,
                configurations: vec![1_000_000, 1000],
            })
            .await;
        assert!(status.is_ok());

        let status = agent
            .employ_enforcement_rule(wire::EnforcementRuleRaw {
                rule_id: 3,
                channel_id: 1,
                enforcement_object_id: 4,
                enforcement_operation: 2,
                property_first: 500,
                property_second: -1,
                property_third: -1,
            })
            .await;
        assert!(status.is_ok());
    }

    #[tokio::test]
    async fn ready_flag_flips_once_marked() {
        let agent = test_agent();
        assert!(!agent.is_ready());
        assert!(agent.mark_ready().is_ok());
        assert!(agent.is_ready());
    }

    #[tokio::test]
    async fn remove_rule_dispatches_by_kind() {
        let agent = test_agent();
        agent
            .employ_create_channel(wire::CreateChannelRaw {
                rule_id: 7,
                channel_id: 1,
                workflow_id: 1,
                operation_type: -1,
                operation_context: -1,
                channel_mask: -1,
                create_default_object: 0,
                object_mask: -1,
            })
            .await;

        let status = agent.remove_rule(wire::RemoveRuleRaw {
            rule_kind: wire::RULE_KIND_HOUSEKEEPING,
            rule_id: 7,
        });
        assert!(status.is_ok());

        let status = agent.remove_rule(wire::RemoveRuleRaw {
            rule_kind: 99,
            rule_id: 7,
        });
        assert!(status.is_error());
    }
}
