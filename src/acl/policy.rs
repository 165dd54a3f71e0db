//! Scope and Policy Decision Types

use crate::error::{AclError, Result};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::RuleId;

/// How a rule propagates across the location hierarchy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Applies only at the rule set's own base
    One,

    /// Applies at the base and below, revocable by a more specific reset
    Sub,

    /// Like `Sub`, but never revoked by a reset
    Psub,

    /// Suppresses `One`/`Sub` grants found further up the walk
    Reset,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::One => "one",
            Scope::Sub => "sub",
            Scope::Psub => "psub",
            Scope::Reset => "reset",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "one" => Ok(Scope::One),
            "sub" => Ok(Scope::Sub),
            "psub" => Ok(Scope::Psub),
            "reset" => Ok(Scope::Reset),
            other => Err(AclError::InvalidScope(format!(
                "'{}' is not one of one, sub, psub, reset",
                other
            ))),
        }
    }
}

/// Result of evaluating an access request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Identity is on the break-glass admin list
    Bypass,

    /// Granted by a rule
    Allow {
        rule_id: RuleId,
        scope: Scope,
        location: String,
    },

    /// A matching grant was suppressed by an earlier reset
    Deny { reason: String },

    /// No applicable rule (default deny)
    NoMatch,
}

impl PolicyDecision {
    /// Check if the decision allows the operation
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Bypass | PolicyDecision::Allow { .. })
    }

    /// Check if the decision denies the operation
    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }

    /// Get the denial reason if this is a deny decision
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            PolicyDecision::Deny { reason } => Some(reason),
            PolicyDecision::NoMatch => Some("No matching ACL rule"),
            PolicyDecision::Bypass | PolicyDecision::Allow { .. } => None,
        }
    }
}
