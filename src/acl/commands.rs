//! Permission-gated ACL administration
//!
//! Every command takes the acting identity first and is authorized against
//! the configured meta topic: `w` at the target base for rule changes, `w` at
//! the root for role and admin changes, `r` for listings.

use super::patterns::Permissions;
use super::resolver::{AclState, Resolver};
use super::role::AclRole;
use super::rules::{AclAction, AclRule, RuleId, RuleKind};
use super::set::AclSet;
use super::{location, Scope};
use crate::error::{AclError, Result};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// One action as supplied by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub topic: String,
    pub acls: String,
    #[serde(default)]
    pub options: Option<Value>,
}

impl ActionSpec {
    pub fn new(topic: impl Into<String>, acls: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            acls: acls.into(),
            options: None,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// What a new or updated rule grants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSpec {
    Actions(Vec<ActionSpec>),
    Role(String),
}

/// Definition of a rule or role entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Required for action rules, ignored for role references
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    pub target: TargetSpec,
}

impl RuleSpec {
    pub fn actions(scope: &str, actions: Vec<ActionSpec>) -> Self {
        Self {
            scope: Some(scope.to_string()),
            members: Vec::new(),
            priority: None,
            target: TargetSpec::Actions(actions),
        }
    }

    pub fn role(name: impl Into<String>) -> Self {
        Self {
            scope: None,
            members: Vec::new(),
            priority: None,
            target: TargetSpec::Role(name.into()),
        }
    }

    pub fn members<S: Into<String>>(mut self, members: impl IntoIterator<Item = S>) -> Self {
        self.members = members.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Partial update of a rule or role entry; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleUpdate {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub members: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub target: Option<TargetSpec>,
}

/// Read-only view of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionView {
    pub topic: String,
    pub acls: String,
    pub options: Map<String, Value>,
}

/// Read-only view of a rule or role entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleView {
    /// `None` for synthesized rules
    pub id: Option<RuleId>,
    /// Anchor of the rule, `None` for role entries
    pub base: Option<String>,
    pub priority: Option<i32>,
    /// `None` when the rule references a role
    pub scope: Option<Scope>,
    pub members: Vec<String>,
    pub role: Option<String>,
    pub actions: Vec<ActionView>,
    /// Synthesized entries cannot be changed through the command API
    pub read_only: bool,
}

impl RuleView {
    pub fn from_rule(rule: &AclRule, base: Option<&str>) -> Self {
        Self {
            id: Some(rule.id()),
            base: base.map(str::to_string),
            priority: rule.priority(),
            scope: (!rule.uses_role()).then(|| rule.scope()),
            members: rule.members(),
            role: rule.role().map(str::to_string),
            actions: rule
                .actions()
                .iter()
                .map(|action| ActionView {
                    topic: action.topic().to_string(),
                    acls: action.permissions().to_string(),
                    options: action.options(),
                })
                .collect(),
            read_only: false,
        }
    }

    /// The admin bypass list presented as an unrevokable rule at the root
    fn admin_bypass(admins: &BTreeSet<String>, root: &str) -> Self {
        Self {
            id: None,
            base: Some(root.to_string()),
            priority: None,
            scope: Some(Scope::Psub),
            members: admins.iter().cloned().collect(),
            role: None,
            actions: vec![ActionView {
                topic: "*".to_string(),
                acls: Permissions::all().to_string(),
                options: Map::new(),
            }],
            read_only: true,
        }
    }
}

/// Read-only view of a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleView {
    pub name: String,
    pub entries: Vec<RuleView>,
}

impl RoleView {
    fn from_role(role: &AclRole) -> Self {
        Self {
            name: role.name().to_string(),
            entries: role
                .entries()
                .iter()
                .map(|entry| RuleView::from_rule(entry, None))
                .collect(),
        }
    }
}

impl Resolver {
    fn authorize(&self, state: &AclState, identity: &str, acls: &str, location: &str) -> Result<()> {
        let allowed = state.check(
            identity,
            &self.config().meta_topic,
            acls,
            &HashMap::new(),
            Some(location),
        )?;
        if allowed {
            return Ok(());
        }

        let verb = if acls.contains('w') { "modify" } else { "view" };
        Err(AclError::NotAuthorized(format!(
            "{} may not {} ACLs at {}",
            identity, verb, location
        )))
    }

    fn build_rule(&self, state: &AclState, kind: RuleKind, spec: &RuleSpec) -> Result<AclRule> {
        let scope = match (&spec.target, &spec.scope) {
            (_, Some(scope)) => scope.parse::<Scope>()?,
            (TargetSpec::Role(_), None) => Scope::Sub,
            (TargetSpec::Actions(_), None) => {
                return Err(AclError::Validation(
                    "scope is required for rules with actions".to_string(),
                ))
            }
        };

        let mut rule = match kind {
            RuleKind::Rule => AclRule::new(self.next_id(), scope),
            RuleKind::RoleEntry => AclRule::new_role_entry(self.next_id(), scope),
        };

        if kind == RuleKind::Rule || !spec.members.is_empty() {
            rule.set_members(spec.members.as_slice())?;
        }
        if let Some(priority) = spec.priority {
            rule.set_priority(priority)?;
        }
        apply_target(&mut rule, state, &spec.target)?;
        Ok(rule)
    }

    /// Add a rule to the rule set at `base`, creating the set if needed
    pub fn add_rule(&self, identity: &str, base: &str, spec: RuleSpec) -> Result<RuleId> {
        let mut state = self.write();

        if !location::is_within(base, state.root()) {
            return Err(AclError::Validation(format!(
                "base '{}' is outside of '{}'",
                base,
                state.root()
            )));
        }
        self.authorize(&state, identity, "w", base)?;

        let rule = self.build_rule(&state, RuleKind::Rule, &spec)?;
        let id = rule.id();
        state
            .sets
            .entry(base.to_string())
            .or_insert_with(|| AclSet::new(base))
            .add(rule)?;

        info!("{} added ACL rule {} at {}", identity, id, base);
        self.persist(&state)?;
        Ok(id)
    }

    /// Change fields of an existing rule
    pub fn update_rule(&self, identity: &str, id: RuleId, update: RuleUpdate) -> Result<()> {
        let mut state = self.write();

        let base = state.base_of(id).ok_or(AclError::RuleNotFound(id))?;
        self.authorize(&state, identity, "w", &base)?;

        let mut rule = state
            .set(&base)
            .and_then(|set| set.get(id))
            .cloned()
            .ok_or(AclError::RuleNotFound(id))?;
        apply_update(&mut rule, &state, &update)?;

        let set = state
            .sets
            .get_mut(&base)
            .ok_or_else(|| AclError::BaseNotFound(base.clone()))?;
        if let Some(slot) = set.get_mut(id) {
            *slot = rule;
        }
        set.sort();

        info!("{} updated ACL rule {} at {}", identity, id, base);
        self.persist(&state)
    }

    /// Remove a rule, dropping its rule set when it becomes empty
    pub fn remove_rule(&self, identity: &str, id: RuleId) -> Result<bool> {
        let mut state = self.write();

        let base = state.base_of(id).ok_or(AclError::RuleNotFound(id))?;
        self.authorize(&state, identity, "w", &base)?;

        let removed = match state.sets.get_mut(&base) {
            Some(set) => set.remove(id),
            None => return Err(AclError::BaseNotFound(base)),
        };
        if state.sets.get(&base).is_some_and(AclSet::is_empty) {
            state.sets.remove(&base);
        }

        info!("{} removed ACL rule {} at {}", identity, id, base);
        self.persist(&state)?;
        Ok(removed)
    }

    /// Register an empty role
    pub fn add_role(&self, identity: &str, name: &str) -> Result<()> {
        let mut state = self.write();
        let root = state.root().to_string();
        self.authorize(&state, identity, "w", &root)?;

        if name.trim().is_empty() {
            return Err(AclError::Validation("role name cannot be empty".to_string()));
        }
        if state.roles.contains_key(name) {
            return Err(AclError::RoleAlreadyExists(name.to_string()));
        }
        state.roles.insert(name.to_string(), AclRole::new(name));

        info!("{} added ACL role {}", identity, name);
        self.persist(&state)
    }

    /// Add an entry to a role
    pub fn add_rule_to_role(&self, identity: &str, role: &str, spec: RuleSpec) -> Result<RuleId> {
        let mut state = self.write();
        let root = state.root().to_string();
        self.authorize(&state, identity, "w", &root)?;

        if !state.roles.contains_key(role) {
            return Err(AclError::UnknownRole(role.to_string()));
        }
        if let TargetSpec::Role(target) = &spec.target {
            ensure_acyclic(&state, role, target)?;
        }

        let entry = self.build_rule(&state, RuleKind::RoleEntry, &spec)?;
        let id = entry.id();
        state
            .roles
            .get_mut(role)
            .ok_or_else(|| AclError::UnknownRole(role.to_string()))?
            .add(entry)?;

        info!("{} added entry {} to ACL role {}", identity, id, role);
        self.persist(&state)?;
        Ok(id)
    }

    /// Change fields of an existing role entry
    pub fn update_role_rule(&self, identity: &str, id: RuleId, update: RuleUpdate) -> Result<()> {
        let mut state = self.write();
        let root = state.root().to_string();

        let role = state.role_of(id).ok_or(AclError::RuleNotFound(id))?;
        self.authorize(&state, identity, "w", &root)?;

        if let Some(TargetSpec::Role(target)) = &update.target {
            ensure_acyclic(&state, &role, target)?;
        }

        let mut entry = state
            .role(&role)
            .and_then(|r| r.get(id))
            .cloned()
            .ok_or(AclError::RuleNotFound(id))?;
        apply_update(&mut entry, &state, &update)?;

        let slot = state
            .roles
            .get_mut(&role)
            .ok_or_else(|| AclError::UnknownRole(role.clone()))?;
        if let Some(existing) = slot.get_mut(id) {
            *existing = entry;
        }
        slot.sort();

        info!("{} updated entry {} of ACL role {}", identity, id, role);
        self.persist(&state)
    }

    /// Remove one entry from a role
    pub fn remove_role_rule(&self, identity: &str, id: RuleId) -> Result<bool> {
        let mut state = self.write();
        let root = state.root().to_string();

        let role = state.role_of(id).ok_or(AclError::RuleNotFound(id))?;
        self.authorize(&state, identity, "w", &root)?;

        let removed = state
            .roles
            .get_mut(&role)
            .map(|r| r.remove(id))
            .unwrap_or(false);

        info!("{} removed entry {} from ACL role {}", identity, id, role);
        self.persist(&state)?;
        Ok(removed)
    }

    /// Remove a role that nothing references any more
    pub fn remove_role(&self, identity: &str, name: &str) -> Result<bool> {
        let mut state = self.write();
        let root = state.root().to_string();
        self.authorize(&state, identity, "w", &root)?;

        if !state.roles.contains_key(name) {
            return Err(AclError::UnknownRole(name.to_string()));
        }
        if state.is_role_used(name) {
            return Err(AclError::RoleStillInUse(name.to_string()));
        }
        state.roles.remove(name);

        info!("{} removed ACL role {}", identity, name);
        self.persist(&state)?;
        Ok(true)
    }

    /// List rules the caller may view, optionally filtered by base and by a
    /// topic the rule has to grant something on
    pub fn list_rules(
        &self,
        identity: &str,
        base: Option<&str>,
        topic: Option<&str>,
    ) -> Result<Vec<RuleView>> {
        let state = self.read();
        let mut views = Vec::new();

        let meta_topic = &self.config().meta_topic;
        let no_options = HashMap::new();

        let root = state.root().to_string();
        if !state.admins.is_empty()
            && base.map_or(true, |b| b == root)
            && topic.map_or(true, |t| !t.is_empty())
            && state.check(identity, meta_topic, "r", &no_options, Some(&root))?
        {
            views.push(RuleView::admin_bypass(&state.admins, &root));
        }

        for set in state.sets() {
            if base.is_some_and(|b| b != set.base()) {
                continue;
            }
            if !state.check(identity, meta_topic, "r", &no_options, Some(set.base()))? {
                continue;
            }

            views.extend(
                set.rules()
                    .iter()
                    .filter(|rule| topic.map_or(true, |t| grants_topic(&state, rule, t)))
                    .map(|rule| RuleView::from_rule(rule, Some(set.base()))),
            );
        }

        Ok(views)
    }

    /// List all roles, ordered by name
    pub fn list_roles(&self, identity: &str) -> Result<Vec<RoleView>> {
        let state = self.read();
        let root = state.root().to_string();
        self.authorize(&state, identity, "r", &root)?;

        Ok(state.roles().into_iter().map(RoleView::from_role).collect())
    }

    /// Fetch one rule or role entry by id
    pub fn get_rule(&self, id: RuleId) -> Option<RuleView> {
        let state = self.read();
        let base = state.base_of(id);
        state
            .get_rule(id)
            .map(|rule| RuleView::from_rule(rule, base.as_deref()))
    }

    /// Strip a deleted account from every member list
    pub fn remove_rules_for_identity(&self, identity: &str) -> Result<usize> {
        let mut state = self.write();
        let changed: usize = state
            .sets
            .values_mut()
            .map(|set| set.remove_rules_for_identity(identity))
            .sum();

        if changed > 0 {
            info!("removed {} from {} ACL rules", identity, changed);
            self.persist(&state)?;
        }
        Ok(changed)
    }

    /// Temporarily exempt `target` from ACL evaluation (not persisted)
    pub fn add_admin(&self, identity: &str, target: &str) -> Result<bool> {
        let mut state = self.write();
        let root = state.root().to_string();
        self.authorize(&state, identity, "w", &root)?;

        if target.is_empty() {
            return Err(AclError::Validation("admin identity cannot be empty".to_string()));
        }
        let added = state.admins.insert(target.to_string());
        info!("{} added {} to the ACL admin list", identity, target);
        Ok(added)
    }

    /// Drop `target` from the admin list
    pub fn remove_admin(&self, identity: &str, target: &str) -> Result<bool> {
        let mut state = self.write();
        let root = state.root().to_string();
        self.authorize(&state, identity, "w", &root)?;

        let removed = state.admins.remove(target);
        info!("{} removed {} from the ACL admin list", identity, target);
        Ok(removed)
    }
}

fn apply_target(rule: &mut AclRule, state: &AclState, target: &TargetSpec) -> Result<()> {
    rule.clear_actions();
    match target {
        TargetSpec::Role(name) => rule.use_role(name, &state.roles),
        TargetSpec::Actions(actions) => {
            for action in actions {
                rule.add_action(AclAction::new(
                    &action.topic,
                    &action.acls,
                    action.options.as_ref(),
                )?)?;
            }
            Ok(())
        }
    }
}

fn apply_update(rule: &mut AclRule, state: &AclState, update: &RuleUpdate) -> Result<()> {
    if let Some(scope) = &update.scope {
        rule.set_scope_str(scope)?;
    }
    if let Some(members) = &update.members {
        rule.set_members(members.as_slice())?;
    }
    if let Some(priority) = update.priority {
        rule.set_priority(priority)?;
    }
    if let Some(target) = &update.target {
        apply_target(rule, state, target)?;
    }
    Ok(())
}

fn ensure_acyclic(state: &AclState, role: &str, target: &str) -> Result<()> {
    if state.role_reaches(target, role) {
        return Err(AclError::Validation(format!(
            "role '{}' cannot reference '{}': the reference would be circular",
            role, target
        )));
    }
    Ok(())
}

/// Whether the rule grants anything on `topic`, expanding role references
fn grants_topic(state: &AclState, rule: &AclRule, topic: &str) -> bool {
    let mut stack: Vec<&AclRule> = vec![rule];
    let mut seen = BTreeSet::new();

    while let Some(current) = stack.pop() {
        match current.role() {
            Some(name) => {
                if !seen.insert(name.to_string()) {
                    continue;
                }
                if let Some(role) = state.role(name) {
                    stack.extend(role.entries());
                }
            }
            None => {
                if current
                    .actions()
                    .iter()
                    .any(|action| action.topic() == topic || action.topic_matches(topic))
                {
                    return true;
                }
            }
        }
    }
    false
}
