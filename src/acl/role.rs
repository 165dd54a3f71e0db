//! Named, reusable bundles of role entries

use super::rules::{AclRule, RuleId, RuleKind};
use crate::error::{AclError, Result};

/// A named role, entries kept sorted by priority descending
#[derive(Debug, Clone)]
pub struct AclRole {
    name: String,
    entries: Vec<AclRule>,
}

impl AclRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[AclRule] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry, defaulting its priority to the current length
    pub fn add(&mut self, mut entry: AclRule) -> Result<()> {
        if entry.kind() != RuleKind::RoleEntry {
            return Err(AclError::TypeMismatch(format!(
                "rule {} is not a role entry and cannot be added to role '{}'",
                entry.id(),
                self.name
            )));
        }

        if entry.priority().is_none() {
            entry.assign_priority(self.entries.len() as i32);
        }
        self.entries.push(entry);
        self.sort();
        Ok(())
    }

    pub(crate) fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.priority().unwrap_or(0).cmp(&a.priority().unwrap_or(0)));
    }

    pub fn get(&self, id: RuleId) -> Option<&AclRule> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn get_mut(&mut self, id: RuleId) -> Option<&mut AclRule> {
        self.entries.iter_mut().find(|entry| entry.id() == id)
    }

    pub fn remove(&mut self, id: RuleId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id() != id);
        self.entries.len() != before
    }

    /// Names of roles referenced directly by this role's entries
    pub fn referenced_roles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| entry.role())
    }
}
