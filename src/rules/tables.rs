//! Thread-safe rule tables keyed by rule id.
//!
//! Insertion is idempotent by id: re-inserting an existing rule id fails
//! and leaves the table untouched. Selection returns deep copies so no
//! table lock outlives a call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::rules::{DifferentiationRule, EnforcementRule, HousekeepingRule};
use crate::status::Status;

#[derive(Debug, Default)]
pub struct HousekeepingTable {
    rules: std::sync::Mutex<HashMap<u64, HousekeepingRule>>,
    total_rules: AtomicI64,
    rules_left_to_employ: AtomicI64,
    log: Option<slog::Logger>,
}

impl HousekeepingTable {
    pub fn new(log: slog::Logger) -> HousekeepingTable {
        HousekeepingTable {
            rules: std::sync::Mutex::new(HashMap::new()),
            total_rules: AtomicI64::new(0),
            rules_left_to_employ: AtomicI64::new(0),
            log: Some(log),
        }
    }

    fn log_error(&self, message: &str, rule_id: u64) {
        if let Some(log) = &self.log {
            slog::error!(log, "{}", message; "rule_id" => rule_id);
        }
    }

    pub fn insert_rule(&self, rule: HousekeepingRule) -> Status {
        let rule_id = rule.rule_id;
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Status::error(),
        };
        if rules.contains_key(&rule_id) {
            drop(rules);
            self.log_error("housekeeping rule already exists", rule_id);
            return Status::error();
        }
        rules.insert(rule_id, rule);
        drop(rules);
        self.total_rules.fetch_add(1, Ordering::AcqRel);
        self.rules_left_to_employ.fetch_add(1, Ordering::AcqRel);
        Status::ok()
    }

    pub fn select_rule(&self, rule_id: u64) -> Option<HousekeepingRule> {
        self.rules
            .lock()
            .ok()
            .and_then(|rules| rules.get(&rule_id).cloned())
    }

    /// Mark a rule enforced. The transition happens once; marking an
    /// already enforced rule is an error.
    pub fn mark_rule_as_enforced(&self, rule_id: u64) -> Status {
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Status::error(),
        };
        match rules.get_mut(&rule_id) {
            Some(rule) => {
                if rule.enforced {
                    drop(rules);
                    self.log_error("housekeeping rule already enforced", rule_id);
                    Status::error()
                } else {
                    rule.enforced = true;
                    drop(rules);
                    self.rules_left_to_employ.fetch_sub(1, Ordering::AcqRel);
                    Status::ok()
                }
            }
            None => {
                drop(rules);
                self.log_error("housekeeping rule does not exist", rule_id);
                Status::not_found()
            }
        }
    }

    pub fn remove_rule(&self, rule_id: u64) -> Status {
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Status::error(),
        };
        match rules.remove(&rule_id) {
            Some(rule) => {
                drop(rules);
                if !rule.enforced {
                    self.rules_left_to_employ.fetch_sub(1, Ordering::AcqRel);
                }
                self.total_rules.fetch_sub(1, Ordering::AcqRel);
                Status::ok()
            }
            None => {
                drop(rules);
                self.log_error("housekeeping rule does not exist", rule_id);
                Status::not_found()
            }
        }
    }

    pub fn size(&self) -> i64 {
        self.total_rules.load(Ordering::Acquire)
    }

    pub fn rules_left_to_employ(&self) -> i64 {
        self.rules_left_to_employ.load(Ordering::Acquire)
    }

    /// Snapshot the ids of rules that have not been enforced yet. The
    /// table lock is released before the caller acts on them.
    pub fn pending_rule_ids(&self) -> Vec<u64> {
        match self.rules.lock() {
            Ok(rules) => {
                let mut ids: Vec<u64> = rules
                    .values()
                    .filter(|rule| !rule.enforced)
                    .map(|rule| rule.rule_id)
                    .collect();
                ids.sort_unstable();
                ids
            }
            Err(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DifferentiationTable {
    rules: std::sync::Mutex<HashMap<u64, DifferentiationRule>>,
    total_rules: AtomicI64,
}

impl DifferentiationTable {
    pub fn insert_rule(&self, rule: DifferentiationRule) -> Status {
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Status::error(),
        };
        if rules.contains_key(&rule.rule_id) {
            return Status::error();
        }
        rules.insert(rule.rule_id, rule);
        drop(rules);
        self.total_rules.fetch_add(1, Ordering::AcqRel);
        Status::ok()
    }

    pub fn select_rule(&self, rule_id: u64) -> Option<DifferentiationRule> {
        self.rules
            .lock()
            .ok()
            .and_then(|rules| rules.get(&rule_id).cloned())
    }

    pub fn remove_rule(&self, rule_id: u64) -> Status {
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Status::error(),
        };
        match rules.remove(&rule_id) {
            Some(_) => {
                drop(rules);
                self.total_rules.fetch_sub(1, Ordering::AcqRel);
                Status::ok()
            }
            None => Status::not_found(),
        }
    }

    pub fn size(&self) -> i64 {
        self.total_rules.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
pub struct EnforcementTable {
    rules: std::sync::Mutex<HashMap<u64, EnforcementRule>>,
    total_rules: AtomicI64,
}

impl EnforcementTable {
    pub fn insert_rule(&self, rule: EnforcementRule) -> Status {
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Status::error(),
        };
        if rules.contains_key(&rule.rule_id) {
            return Status::error();
        }
        rules.insert(rule.rule_id, rule);
        drop(rules);
        self.total_rules.fetch_add(1, Ordering::AcqRel);
        Status::ok()
    }

    pub fn select_rule(&self, rule_id: u64) -> Option<EnforcementRule> {
        self.rules
            .lock()
            .ok()
            .and_then(|rules| rules.get(&rule_id).cloned())
    }

    pub fn remove_rule(&self, rule_id: u64) -> Status {
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Status::error(),
        };
        match rules.remove(&rule_id) {
            Some(_) => {
                drop(rules);
                self.total_rules.fetch_sub(1, Ordering::AcqRel);
                Status::ok()
            }
            None => Status::not_found(),
        }
    }

    pub fn size(&self) -> i64 {
        self.total_rules.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DifferentiationRuleType, HousekeepingOperation};

    fn housekeeping_rule(rule_id: u64) -> HousekeepingRule {
        HousekeepingRule::new(
            rule_id,
            HousekeepingOperation::CreateChannel,
            1,
            -1,
            vec![0, -1, -1],
        )
    }

    #[test]
    fn insert_is_idempotent_by_id() {
        let table = HousekeepingTable::default();
        assert!(table.insert_rule(housekeeping_rule(1)).is_ok());
        assert!(table.insert_rule(housekeeping_rule(1)).is_error());
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn select_returns_a_copy() {
        let table = HousekeepingTable::default();
        table.insert_rule(housekeeping_rule(5));
        let copy = table.select_rule(5).expect("rule exists");
        assert_eq!(copy.rule_id, 5);
        assert!(table.select_rule(6).is_none());
    }

    #[test]
    fn mark_enforced_transitions_once() {
        let table = HousekeepingTable::default();
        table.insert_rule(housekeeping_rule(1));
        assert_eq!(table.rules_left_to_employ(), 1);
        assert!(table.mark_rule_as_enforced(1).is_ok());
        assert_eq!(table.rules_left_to_employ(), 0);
        assert!(table.mark_rule_as_enforced(1).is_error());
        assert!(table.mark_rule_as_enforced(2).is_not_found());
    }

    #[test]
    fn remove_updates_counters() {
        let table = HousekeepingTable::default();
        table.insert_rule(housekeeping_rule(1));
        table.insert_rule(housekeeping_rule(2));
        table.mark_rule_as_enforced(1);
        assert!(table.remove_rule(1).is_ok());
        assert!(table.remove_rule(2).is_ok());
        assert!(table.remove_rule(3).is_not_found());
        assert_eq!(table.size(), 0);
        assert_eq!(table.rules_left_to_employ(), 0);
    }

    #[test]
    fn size_tracks_inserts_minus_removals() {
        let table = DifferentiationTable::default();
        for rule_id in 0..4u64 {
            let status = table.insert_rule(DifferentiationRule {
                rule_id,
                rule_type: DifferentiationRuleType::Channel,
                channel_id: 1,
                enforcement_object_id: -1,
                workflow_id: rule_id as i64,
                operation_type: -1,
                operation_context: -1,
            });
            assert!(status.is_ok());
        }
        assert_eq!(table.size(), 4);
        table.remove_rule(0);
        table.remove_rule(1);
        assert_eq!(table.size(), 2);
    }

    #[test]
    fn pending_ids_skip_enforced_rules() {
        let table = HousekeepingTable::default();
        table.insert_rule(housekeeping_rule(1));
        table.insert_rule(housekeeping_rule(2));
        table.insert_rule(housekeeping_rule(3));
        table.mark_rule_as_enforced(2);
        assert_eq!(table.pending_rule_ids(), vec![1, 3]);
    }

    #[test]
    fn enforcement_table_round_trip() {
        let table = EnforcementTable::default();
        let rule = EnforcementRule {
            rule_id: 9,
            channel_id: 1,
            enforcement_object_id: 2,
            operation: 1,
            configurations: vec![1_000_000, 500],
        };
        assert!(table.insert_rule(rule.clone()).is_ok());
        assert_eq!(table.select_rule(9), Some(rule));
        assert!(table.remove_rule(9).is_ok());
        assert!(table.remove_rule(9).is_not_found());
    }
}
