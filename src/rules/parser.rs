//! Line-oriented rules-file parser.
//!
//! Rules files are UTF-8 text with one rule per line and
//! whitespace-separated tokens. Lines starting with `#` are comments.
//! Malformed lines are logged and skipped; unknown enum tokens degrade to
//! the `-1`/noop defaults instead of failing, so a stage can load files
//! written for a newer vocabulary.
//!
//! Line shapes:
//!
//! ```text
//! create_channel <rule_id> <channel_id> <context_type> <workflow_id> <op_type> <op_ctx>
//! create_object  <rule_id> <channel_id> <object_id> <object_type> <context_type> <op_type> <op_ctx>
//! <channel|object> <rule_id> <channel_id> <object_id> <workflow_id> <op_type> <op_ctx>
//! <rule_id> <channel_id> <object_id> <object_type> <operation> [args...]
//! ```

use std::io::Write;
use std::path::Path;

use crate::core::definitions;
use crate::enforcement::object::ObjectType;
use crate::enforcement::rate_limiter::DrlOperation;
use crate::rules::{
    DifferentiationRule, DifferentiationRuleType, EnforcementRule, HousekeepingOperation,
    HousekeepingRule,
};

const CREATE_CHANNEL_MIN_ELEMENTS: usize = 7;
const CREATE_OBJECT_MIN_ELEMENTS: usize = 8;
const DIFFERENTIATION_MIN_ELEMENTS: usize = 7;
const ENFORCEMENT_MIN_ELEMENTS: usize = 5;

/// The kind of rules a file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Noop = 0,
    Housekeeping = 1,
    Differentiation = 2,
    Enforcement = 3,
}

#[derive(Debug)]
pub struct RulesParser {
    rule_type: RuleType,
    staged_rules: Vec<Vec<String>>,
    log: slog::Logger,
}

impl RulesParser {
    pub fn new(rule_type: RuleType, log: slog::Logger) -> RulesParser {
        RulesParser {
            rule_type,
            staged_rules: Vec::new(),
            log,
        }
    }

    /// Create a parser and stage every rule found at `path`.
    pub fn from_file(rule_type: RuleType, path: &Path, log: slog::Logger) -> RulesParser {
        let mut parser = RulesParser::new(rule_type, log);
        parser.read_rules_from_file(path);
        parser
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    /// Read and stage rules from a file. Returns the number staged.
    pub fn read_rules_from_file(&mut self, path: &Path) -> usize {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) => {
                slog::error!(
                    self.log,
                    "failed to read rules file";
                    "path" => path.display().to_string(),
                    "error" => error.to_string()
                );
                return 0;
            }
        };

        let mut staged = 0;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
            self.staged_rules.push(tokens);
            staged += 1;
        }
        slog::debug!(
            self.log,
            "staged rules from file";
            "path" => path.display().to_string(),
            "rules" => staged
        );
        staged
    }

    fn parse_i64(token: &str) -> i64 {
        token.parse::<i64>().unwrap_or(-1)
    }

    fn take_limit(&self, total_rules: i64) -> usize {
        if total_rules < 0 {
            self.staged_rules.len()
        } else {
            total_rules as usize
        }
    }

    /// Collect staged `create_channel` housekeeping rules.
    pub fn get_create_channel_rules(
        &self,
        rules: &mut Vec<HousekeepingRule>,
        total_rules: i64,
    ) -> usize {
        let limit = self.take_limit(total_rules);
        let mut collected = 0;
        for tokens in &self.staged_rules {
            if collected >= limit {
                break;
            }
            if tokens[0] != "create_channel" {
                continue;
            }
            if tokens.len() < CREATE_CHANNEL_MIN_ELEMENTS {
                slog::error!(self.log, "malformed create_channel rule"; "elements" => tokens.len());
                continue;
            }

            let context_type = &tokens[3];
            rules.push(HousekeepingRule::new(
                Self::parse_i64(&tokens[1]).max(0) as u64,
                HousekeepingOperation::CreateChannel,
                Self::parse_i64(&tokens[2]),
                -1,
                vec![
                    Self::parse_i64(&tokens[4]),
                    definitions::convert_operation(context_type, &tokens[5]),
                    definitions::convert_operation(context_type, &tokens[6]),
                ],
            ));
            collected += 1;
        }
        collected
    }

    /// Collect staged `create_object` housekeeping rules.
    pub fn get_create_object_rules(
        &self,
        rules: &mut Vec<HousekeepingRule>,
        total_rules: i64,
    ) -> usize {
        let limit = self.take_limit(total_rules);
        let mut collected = 0;
        for tokens in &self.staged_rules {
            if collected >= limit {
                break;
            }
            if tokens[0] != "create_object" {
                continue;
            }
            if tokens.len() < CREATE_OBJECT_MIN_ELEMENTS {
                slog::error!(self.log, "malformed create_object rule"; "elements" => tokens.len());
                continue;
            }

            let object_type = ObjectType::from_token(&tokens[4]);
            let context_type = &tokens[5];
            let mut properties = vec![
                object_type as i64,
                definitions::convert_operation(context_type, &tokens[6]),
                definitions::convert_operation(context_type, &tokens[7]),
            ];
            // Trailing tokens become the object's initial configuration.
            for token in &tokens[8..] {
                properties.push(Self::parse_i64(token));
            }

            rules.push(HousekeepingRule::new(
                Self::parse_i64(&tokens[1]).max(0) as u64,
                HousekeepingOperation::CreateObject,
                Self::parse_i64(&tokens[2]),
                Self::parse_i64(&tokens[3]),
                properties,
            ));
            collected += 1;
        }
        collected
    }

    /// Collect staged differentiation rules.
    pub fn get_differentiation_rules(
        &self,
        rules: &mut Vec<DifferentiationRule>,
        total_rules: i64,
    ) -> usize {
        let limit = self.take_limit(total_rules);
        let mut collected = 0;
        for tokens in &self.staged_rules {
            if collected >= limit {
                break;
            }
            let rule_type = DifferentiationRuleType::from_token(&tokens[0]);
            if rule_type == DifferentiationRuleType::None {
                continue;
            }
            if tokens.len() < DIFFERENTIATION_MIN_ELEMENTS {
                slog::error!(self.log, "malformed differentiation rule"; "elements" => tokens.len());
                continue;
            }

            rules.push(DifferentiationRule {
                rule_id: Self::parse_i64(&tokens[1]).max(0) as u64,
                rule_type,
                channel_id: Self::parse_i64(&tokens[2]),
                enforcement_object_id: Self::parse_i64(&tokens[3]),
                workflow_id: Self::parse_i64(&tokens[4]),
                operation_type: Self::parse_i64(&tokens[5]),
                operation_context: Self::parse_i64(&tokens[6]),
            });
            collected += 1;
        }
        collected
    }

    // Convert an enforcement operation token under the object's
    // vocabulary; unknown operations become -1.
    fn convert_enforcement_operation(object_type: ObjectType, token: &str) -> i32 {
        match object_type {
            ObjectType::DynamicRateLimiter => DrlOperation::from_token(token)
                .map(|operation| operation as i32)
                .unwrap_or(-1),
            ObjectType::Noop => 0,
        }
    }

    /// Collect staged enforcement rules.
    pub fn get_enforcement_rules(
        &self,
        rules: &mut Vec<EnforcementRule>,
        total_rules: i64,
    ) -> usize {
        let limit = self.take_limit(total_rules);
        let mut collected = 0;
        for tokens in &self.staged_rules {
            if collected >= limit {
                break;
            }
            if tokens.len() < ENFORCEMENT_MIN_ELEMENTS {
                slog::error!(self.log, "malformed enforcement rule"; "elements" => tokens.len());
                continue;
            }
            // Enforcement lines are the only ones starting with a numeric
            // rule id.
            if tokens[0].parse::<u64>().is_err() {
                continue;
            }

            let object_type = ObjectType::from_token(&tokens[3]);
            let configurations = tokens[5..].iter().map(|t| Self::parse_i64(t)).collect();

            rules.push(EnforcementRule {
                rule_id: Self::parse_i64(&tokens[0]).max(0) as u64,
                channel_id: Self::parse_i64(&tokens[1]),
                enforcement_object_id: Self::parse_i64(&tokens[2]),
                operation: Self::convert_enforcement_operation(object_type, &tokens[4]),
                configurations,
            });
            collected += 1;
        }
        collected
    }

    /// Drop all staged rules. Returns how many were dropped.
    pub fn erase_rules(&mut self) -> usize {
        let erased = self.staged_rules.len();
        self.staged_rules.clear();
        erased
    }

    /// Write the staged rules to `writer`, one line per rule.
    pub fn print_rules(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        for tokens in &self.staged_rules {
            writeln!(writer, "{}", tokens.join(" "))?;
        }
        Ok(())
    }
}
