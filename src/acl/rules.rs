//! ACL Rules and Actions
//!
//! Defines the structure and matching of Access Control List rules. The same
//! type backs both rules anchored in a rule set and entries inside a role;
//! [`RuleKind`] decides which operations are legal.

use super::patterns::{MemberPattern, OptionMatcher, Permissions, TopicPattern};
use super::role::AclRole;
use super::Scope;
use crate::error::{AclError, Result};

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Resolver-assigned rule handle
pub type RuleId = u64;

/// Lowest (most preferred) priority value
pub const MIN_PRIORITY: i32 = -100;

/// Highest (least preferred) priority value
pub const MAX_PRIORITY: i32 = 100;

/// Where a rule lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Anchored in a rule set, carries members
    Rule,

    /// Part of a role, never carries members
    RoleEntry,
}

/// One granted action: a topic pattern, permission letters and options
#[derive(Debug, Clone, PartialEq)]
pub struct AclAction {
    topic: TopicPattern,
    permissions: Permissions,
    options: BTreeMap<String, OptionMatcher>,
}

impl AclAction {
    pub fn new(topic: &str, acls: &str, options: Option<&Value>) -> Result<Self> {
        let topic = TopicPattern::compile(topic)?;
        let permissions = Permissions::parse(acls)?;

        let mut compiled = BTreeMap::new();
        match options {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (key, expected) in map {
                    compiled.insert(key.clone(), OptionMatcher::compile(key, expected)?);
                }
            }
            Some(other) => {
                return Err(AclError::Validation(format!(
                    "options must be a mapping, got {}",
                    other
                )))
            }
        }

        Ok(Self {
            topic,
            permissions,
            options: compiled,
        })
    }

    pub fn topic(&self) -> &str {
        self.topic.as_str()
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn options(&self) -> serde_json::Map<String, Value> {
        self.options
            .iter()
            .map(|(key, matcher)| (key.clone(), matcher.to_value()))
            .collect()
    }

    pub fn topic_matches(&self, topic: &str) -> bool {
        self.topic.matches(topic)
    }

    fn matches(&self, request: &MatchRequest<'_>) -> bool {
        if !self.topic.matches(request.topic) {
            debug!("topic '{}' does not match '{}'", request.topic, self.topic.as_str());
            return false;
        }

        if !self.permissions.contains(request.permissions) {
            debug!(
                "requested '{}' is not covered by granted '{}' on '{}'",
                request.permissions,
                self.permissions,
                self.topic.as_str()
            );
            return false;
        }

        for (key, matcher) in &self.options {
            let satisfied = request
                .options
                .get(key)
                .map(|supplied| matcher.matches(supplied))
                .unwrap_or(false);

            if !satisfied {
                debug!(
                    "option '{}' (expected {}) not satisfied by {:?}",
                    key,
                    matcher.to_value(),
                    request.options.get(key)
                );
                if request.enforce_options {
                    return false;
                }
            }
        }

        true
    }
}

/// What a rule grants
#[derive(Debug, Clone, PartialEq)]
pub enum RuleTarget {
    /// Explicit actions
    Actions(Vec<AclAction>),

    /// Everything the named role grants
    Role(String),
}

/// Parameters of one access check
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub identity: &'a str,
    pub topic: &'a str,
    pub permissions: Permissions,
    pub options: &'a HashMap<String, String>,
    pub enforce_options: bool,
}

/// ACL rule defining access permissions
#[derive(Debug, Clone)]
pub struct AclRule {
    id: RuleId,
    kind: RuleKind,
    scope: Scope,
    members: Vec<MemberPattern>,
    priority: Option<i32>,
    target: RuleTarget,
}

impl AclRule {
    /// Create a rule for a rule set
    pub fn new(id: RuleId, scope: Scope) -> Self {
        Self::with_kind(id, RuleKind::Rule, scope)
    }

    /// Create an entry for a role
    pub fn new_role_entry(id: RuleId, scope: Scope) -> Self {
        Self::with_kind(id, RuleKind::RoleEntry, scope)
    }

    fn with_kind(id: RuleId, kind: RuleKind, scope: Scope) -> Self {
        Self {
            id,
            kind,
            scope,
            members: Vec::new(),
            priority: None,
            target: RuleTarget::Actions(Vec::new()),
        }
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    /// Set the scope from its textual form
    pub fn set_scope_str(&mut self, scope: &str) -> Result<()> {
        self.scope = scope.parse()?;
        Ok(())
    }

    pub fn members(&self) -> Vec<String> {
        self.members.iter().map(|m| m.as_str().to_string()).collect()
    }

    pub fn set_members<S: AsRef<str>>(&mut self, members: &[S]) -> Result<()> {
        if self.kind == RuleKind::RoleEntry {
            return Err(AclError::UnsupportedOperation(
                "role entries cannot have members".to_string(),
            ));
        }

        let compiled = members
            .iter()
            .map(|member| MemberPattern::compile(member.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.members = compiled;
        Ok(())
    }

    /// Remove a literal member entry; returns whether it was present
    pub fn remove_member(&mut self, member: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.as_str() != member);
        self.members.len() != before
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) -> Result<()> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(AclError::Validation(format!(
                "priority {} is out of range [{}, {}]",
                priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }
        self.priority = Some(priority);
        Ok(())
    }

    /// Set a priority chosen by the collection or read back from the store,
    /// bypassing the range check applied to caller input
    pub(crate) fn assign_priority(&mut self, priority: i32) {
        self.priority = Some(priority);
    }

    pub fn target(&self) -> &RuleTarget {
        &self.target
    }

    pub fn uses_role(&self) -> bool {
        matches!(self.target, RuleTarget::Role(_))
    }

    pub fn role(&self) -> Option<&str> {
        match &self.target {
            RuleTarget::Role(name) => Some(name),
            RuleTarget::Actions(_) => None,
        }
    }

    pub fn actions(&self) -> &[AclAction] {
        match &self.target {
            RuleTarget::Actions(actions) => actions,
            RuleTarget::Role(_) => &[],
        }
    }

    pub fn add_action(&mut self, action: AclAction) -> Result<()> {
        match &mut self.target {
            RuleTarget::Actions(actions) => {
                actions.push(action);
                Ok(())
            }
            RuleTarget::Role(_) => Err(AclError::ConflictingRole(self.id)),
        }
    }

    /// Drop all actions and any role reference
    pub fn clear_actions(&mut self) {
        self.target = RuleTarget::Actions(Vec::new());
    }

    /// Reference a registered role instead of explicit actions
    pub fn use_role(&mut self, name: &str, roles: &HashMap<String, AclRole>) -> Result<()> {
        if !roles.contains_key(name) {
            return Err(AclError::UnknownRole(name.to_string()));
        }
        self.use_role_unchecked(name);
        Ok(())
    }

    /// Reference a role that may not be registered yet (document loading)
    pub(crate) fn use_role_unchecked(&mut self, name: &str) {
        self.target = RuleTarget::Role(name.to_string());
    }

    /// Match the rule against a request.
    ///
    /// Returns the scope of the granting rule, which is the scope of the
    /// matching role entry when the rule uses a role.
    pub fn matches(
        &self,
        request: &MatchRequest<'_>,
        roles: &HashMap<String, AclRole>,
        skip_identity_check: bool,
        visited_roles: &mut Vec<String>,
    ) -> Result<Option<Scope>> {
        if !skip_identity_check && !self.members.iter().any(|m| m.matches(request.identity)) {
            return Ok(None);
        }

        match &self.target {
            RuleTarget::Role(name) => {
                if visited_roles.iter().any(|visited| visited == name) {
                    let path = visited_roles.join(" -> ");
                    return Err(AclError::RoleRecursion {
                        role: name.clone(),
                        path,
                    });
                }

                let role = roles
                    .get(name)
                    .ok_or_else(|| AclError::UnknownRole(name.clone()))?;

                visited_roles.push(name.clone());
                let mut granted = None;
                for entry in role.entries() {
                    if let Some(scope) = entry.matches(request, roles, true, visited_roles)? {
                        granted = Some(scope);
                        break;
                    }
                }
                visited_roles.pop();
                Ok(granted)
            }
            RuleTarget::Actions(actions) => {
                if actions.iter().any(|action| action.matches(request)) {
                    Ok(Some(self.scope))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request<'a>(
        identity: &'a str,
        topic: &'a str,
        acls: &str,
        options: &'a HashMap<String, String>,
    ) -> MatchRequest<'a> {
        MatchRequest {
            identity,
            topic,
            permissions: Permissions::parse(acls).unwrap(),
            options,
            enforce_options: true,
        }
    }

    fn rule_with_action(topic: &str, acls: &str) -> AclRule {
        let mut rule = AclRule::new(1, Scope::Sub);
        rule.set_members(&["alice"]).unwrap();
        rule.add_action(AclAction::new(topic, acls, None).unwrap())
            .unwrap();
        rule
    }

    #[test]
    fn test_rule_matches_member_and_action() {
        let rule = rule_with_action("org.app.*", "rw");
        let roles = HashMap::new();
        let options = HashMap::new();

        let granted = rule
            .matches(&request("alice", "org.app.widget", "r", &options), &roles, false, &mut Vec::new())
            .unwrap();
        assert_eq!(granted, Some(Scope::Sub));

        let other = rule
            .matches(&request("bob", "org.app.widget", "r", &options), &roles, false, &mut Vec::new())
            .unwrap();
        assert_eq!(other, None);

        let too_much = rule
            .matches(&request("alice", "org.app.widget", "rwcd", &options), &roles, false, &mut Vec::new())
            .unwrap();
        assert_eq!(too_much, None);
    }

    #[test]
    fn test_empty_members_match_nobody() {
        let mut rule = AclRule::new(1, Scope::Sub);
        rule.add_action(AclAction::new("*", "r", None).unwrap()).unwrap();
        let options = HashMap::new();

        let granted = rule
            .matches(&request("alice", "a.b", "r", &options), &HashMap::new(), false, &mut Vec::new())
            .unwrap();
        assert_eq!(granted, None);
    }

    #[test]
    fn test_role_entry_rejects_members() {
        let mut entry = AclRule::new_role_entry(1, Scope::Sub);
        let err = entry.set_members(&["alice"]).unwrap_err();
        assert!(matches!(err, AclError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_invalid_scope_string() {
        let mut rule = AclRule::new(1, Scope::Sub);
        assert!(matches!(
            rule.set_scope_str("subtree"),
            Err(AclError::InvalidScope(_))
        ));
        rule.set_scope_str("psub").unwrap();
        assert_eq!(rule.scope(), Scope::Psub);
    }

    #[test]
    fn test_priority_range() {
        let mut rule = AclRule::new(1, Scope::Sub);
        assert!(rule.set_priority(-100).is_ok());
        assert!(rule.set_priority(100).is_ok());
        assert!(rule.set_priority(101).is_err());
        assert!(rule.set_priority(-101).is_err());
        assert_eq!(rule.priority(), Some(100));
    }

    #[test]
    fn test_add_action_conflicts_with_role() {
        let mut roles = HashMap::new();
        roles.insert("viewer".to_string(), AclRole::new("viewer"));

        let mut rule = AclRule::new(7, Scope::Sub);
        rule.use_role("viewer", &roles).unwrap();
        let err = rule
            .add_action(AclAction::new("a.b", "r", None).unwrap())
            .unwrap_err();
        assert!(matches!(err, AclError::ConflictingRole(7)));

        rule.clear_actions();
        assert!(!rule.uses_role());
        assert!(rule.add_action(AclAction::new("a.b", "r", None).unwrap()).is_ok());
    }

    #[test]
    fn test_use_role_clears_actions() {
        let mut roles = HashMap::new();
        roles.insert("viewer".to_string(), AclRole::new("viewer"));

        let mut rule = rule_with_action("a.b", "r");
        assert!(matches!(
            rule.use_role("missing", &roles),
            Err(AclError::UnknownRole(_))
        ));
        rule.use_role("viewer", &roles).unwrap();
        assert!(rule.actions().is_empty());
        assert_eq!(rule.role(), Some("viewer"));
    }

    #[test]
    fn test_options_enforced_and_legacy() {
        let mut rule = AclRule::new(1, Scope::Sub);
        rule.set_members(&["alice"]).unwrap();
        rule.add_action(
            AclAction::new("a.b", "r", Some(&json!({"uid": "adm.*"}))).unwrap(),
        )
        .unwrap();
        let roles = HashMap::new();

        let mut supplied = HashMap::new();
        supplied.insert("uid".to_string(), "admin".to_string());
        let granted = rule
            .matches(&request("alice", "a.b", "r", &supplied), &roles, false, &mut Vec::new())
            .unwrap();
        assert_eq!(granted, Some(Scope::Sub));

        let empty = HashMap::new();
        let strict = request("alice", "a.b", "r", &empty);
        assert_eq!(rule.matches(&strict, &roles, false, &mut Vec::new()).unwrap(), None);

        let legacy = MatchRequest {
            enforce_options: false,
            ..strict
        };
        assert_eq!(
            rule.matches(&legacy, &roles, false, &mut Vec::new()).unwrap(),
            Some(Scope::Sub)
        );
    }

    #[test]
    fn test_options_must_be_mapping() {
        let err = AclAction::new("a.b", "r", Some(&json!(["x"]))).unwrap_err();
        assert!(err.to_string().contains("mapping"));
    }
}
