//! Rule sets anchored at one location

use super::rules::{AclRule, RuleId, RuleKind};
use crate::error::{AclError, Result};

/// All rules anchored at one base, kept sorted by priority ascending
#[derive(Debug, Clone)]
pub struct AclSet {
    base: String,
    rules: Vec<AclRule>,
}

impl AclSet {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            rules: Vec::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn rules(&self) -> &[AclRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Add a rule, defaulting its priority to the current length
    pub fn add(&mut self, mut rule: AclRule) -> Result<()> {
        if rule.kind() != RuleKind::Rule {
            return Err(AclError::TypeMismatch(format!(
                "role entry {} cannot be added to the rule set at '{}'",
                rule.id(),
                self.base
            )));
        }

        if rule.priority().is_none() {
            rule.assign_priority(self.rules.len() as i32);
        }
        self.rules.push(rule);
        self.sort();
        Ok(())
    }

    pub(crate) fn sort(&mut self) {
        self.rules.sort_by_key(|rule| rule.priority().unwrap_or(0));
    }

    pub fn get(&self, id: RuleId) -> Option<&AclRule> {
        self.rules.iter().find(|rule| rule.id() == id)
    }

    pub fn get_mut(&mut self, id: RuleId) -> Option<&mut AclRule> {
        self.rules.iter_mut().find(|rule| rule.id() == id)
    }

    pub fn remove(&mut self, id: RuleId) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.id() != id);
        self.rules.len() != before
    }

    /// Strip `identity` from every rule's member list
    pub fn remove_rules_for_identity(&mut self, identity: &str) -> usize {
        self.rules
            .iter_mut()
            .map(|rule| rule.remove_member(identity))
            .filter(|removed| *removed)
            .count()
    }
}
