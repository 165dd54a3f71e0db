//! ACL Resolver
//!
//! Owns every rule set and role, answers access checks and persists the
//! model after each change.
//!
//! A check walks from the requested location toward the configured root.
//! At each level the rule set anchored there is scanned in order:
//!
//! - `reset` marks the walk as reset and keeps scanning
//! - `psub` grants immediately, reset or not
//! - `sub` grants unless the walk was reset
//! - `one` grants only at the requested location itself, unless reset
//!
//! Mutations hold the write lock across authorization, validation, mutation
//! and persistence, so concurrent writers are serialized and readers never
//! observe a half-applied change.

use super::location;
use super::patterns::Permissions;
use super::role::AclRole;
use super::rules::{AclRule, MatchRequest, RuleId};
use super::set::AclSet;
use super::storage::{self, AclDocument, AclStore, FileAclStore, InMemoryAclStore};
use super::{PolicyDecision, Scope};
use crate::config::AclConfig;
use crate::error::{AclError, Result};

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// In-memory model of all rule sets and roles
#[derive(Debug, Clone)]
pub struct AclState {
    pub(crate) sets: BTreeMap<String, AclSet>,
    pub(crate) roles: HashMap<String, AclRole>,
    pub(crate) admins: BTreeSet<String>,
    pub(crate) root: String,
    pub(crate) enforce_options: bool,
}

impl AclState {
    pub fn new(config: &AclConfig) -> Self {
        Self {
            sets: BTreeMap::new(),
            roles: HashMap::new(),
            admins: config.admins.iter().cloned().collect(),
            root: config.root_location.clone(),
            enforce_options: config.enforce_options,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn set(&self, base: &str) -> Option<&AclSet> {
        self.sets.get(base)
    }

    pub fn sets(&self) -> impl Iterator<Item = &AclSet> {
        self.sets.values()
    }

    pub fn role(&self, name: &str) -> Option<&AclRole> {
        self.roles.get(name)
    }

    /// Roles ordered by name
    pub fn roles(&self) -> Vec<&AclRole> {
        let mut roles: Vec<&AclRole> = self.roles.values().collect();
        roles.sort_by(|a, b| a.name().cmp(b.name()));
        roles
    }

    /// Evaluate a request and report how it was decided
    pub fn evaluate(
        &self,
        identity: &str,
        topic: &str,
        permissions: &str,
        options: &HashMap<String, String>,
        location: Option<&str>,
    ) -> Result<PolicyDecision> {
        if self.admins.contains(identity) {
            debug!("{} is on the admin list, bypassing ACL evaluation", identity);
            return Ok(PolicyDecision::Bypass);
        }

        let requested = match Permissions::parse(permissions) {
            Ok(requested) => requested,
            Err(e) => {
                debug!("request by {} can never be granted: {}", identity, e);
                return Ok(PolicyDecision::NoMatch);
            }
        };

        let request = MatchRequest {
            identity,
            topic,
            permissions: requested,
            options,
            enforce_options: self.enforce_options,
        };

        let start = location.unwrap_or(&self.root);
        let mut reset = false;
        let mut suppressed: Option<String> = None;

        for (depth, level) in location::walk(start, &self.root).enumerate() {
            let Some(set) = self.sets.get(&level) else {
                continue;
            };

            for rule in set.rules() {
                let mut visited = Vec::new();
                let scope = match rule.matches(&request, &self.roles, false, &mut visited) {
                    Ok(Some(scope)) => scope,
                    Ok(None) => continue,
                    Err(e) => {
                        error!("ACL rule {} at {} cannot be evaluated: {}", rule.id(), level, e);
                        return Err(e);
                    }
                };

                let granted = match scope {
                    Scope::Reset => {
                        debug!("rule {} at {} resets inherited grants", rule.id(), level);
                        reset = true;
                        false
                    }
                    Scope::Psub => true,
                    Scope::Sub => !reset,
                    Scope::One => depth == 0 && !reset,
                };

                if granted {
                    debug!(
                        "{} granted '{}' on {} at {} by rule {} ({})",
                        identity, permissions, topic, level, rule.id(), scope
                    );
                    return Ok(PolicyDecision::Allow {
                        rule_id: rule.id(),
                        scope,
                        location: level,
                    });
                }

                if reset && matches!(scope, Scope::Sub | Scope::One) && suppressed.is_none() {
                    suppressed = Some(format!(
                        "rule {} at {} was suppressed by a reset",
                        rule.id(),
                        level
                    ));
                }
            }
        }

        debug!(
            "{} denied '{}' on {} at {}",
            identity, permissions, topic, start
        );
        Ok(match suppressed {
            Some(reason) => PolicyDecision::Deny { reason },
            None => PolicyDecision::NoMatch,
        })
    }

    /// Boolean form of [`AclState::evaluate`]
    pub fn check(
        &self,
        identity: &str,
        topic: &str,
        permissions: &str,
        options: &HashMap<String, String>,
        location: Option<&str>,
    ) -> Result<bool> {
        Ok(self
            .evaluate(identity, topic, permissions, options, location)?
            .is_allowed())
    }

    /// Base of the rule set holding rule `id`
    pub(crate) fn base_of(&self, id: RuleId) -> Option<String> {
        self.sets
            .values()
            .find(|set| set.get(id).is_some())
            .map(|set| set.base().to_string())
    }

    /// Name of the role holding entry `id`
    pub(crate) fn role_of(&self, id: RuleId) -> Option<String> {
        self.roles
            .values()
            .find(|role| role.get(id).is_some())
            .map(|role| role.name().to_string())
    }

    pub fn get_rule(&self, id: RuleId) -> Option<&AclRule> {
        self.sets
            .values()
            .find_map(|set| set.get(id))
            .or_else(|| self.roles.values().find_map(|role| role.get(id)))
    }

    /// Whether any rule or role entry references `name`
    pub fn is_role_used(&self, name: &str) -> bool {
        self.sets
            .values()
            .flat_map(|set| set.rules())
            .any(|rule| rule.role() == Some(name))
            || self
                .roles
                .values()
                .any(|role| role.referenced_roles().any(|r| r == name))
    }

    /// Whether following references from `from` can reach `target`
    pub(crate) fn role_reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = BTreeSet::new();
        while let Some(name) = stack.pop() {
            if name == target {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(role) = self.roles.get(&name) {
                stack.extend(role.referenced_roles().map(str::to_string));
            }
        }
        false
    }

    pub fn rule_count(&self) -> usize {
        self.sets.values().map(AclSet::len).sum::<usize>()
            + self.roles.values().map(AclRole::len).sum::<usize>()
    }

    pub fn to_document(&self) -> AclDocument {
        storage::encode(self.sets.values(), self.roles())
    }
}

/// The ACL resolver
pub struct Resolver {
    config: AclConfig,
    state: RwLock<AclState>,
    store: Box<dyn AclStore>,
    next_rule_id: AtomicU64,
}

impl Resolver {
    fn unloaded(config: AclConfig, store: Box<dyn AclStore>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            state: RwLock::new(AclState::new(&config)),
            config,
            store,
            next_rule_id: AtomicU64::new(1),
        })
    }

    /// Create a resolver over `store` and load whatever it holds.
    ///
    /// Fails if the stored document is malformed or references unknown roles.
    pub fn new(config: AclConfig, store: Box<dyn AclStore>) -> Result<Self> {
        let resolver = Self::unloaded(config, store)?;
        resolver.reload()?;
        Ok(resolver)
    }

    /// Like [`Resolver::new`], but a document that cannot be loaded is
    /// logged and the resolver starts with no rules or roles. The store is
    /// left untouched until the next change is saved.
    pub fn new_or_empty(config: AclConfig, store: Box<dyn AclStore>) -> Result<Self> {
        let resolver = Self::unloaded(config, store)?;
        if let Err(e) = resolver.reload() {
            error!(
                "ACL store {} could not be loaded, starting empty: {}",
                resolver.store.describe(),
                e
            );
        }
        Ok(resolver)
    }

    /// Create a resolver backed by the configured JSON file
    pub fn open(config: AclConfig) -> Result<Self> {
        let store = FileAclStore::new(config.store_path.clone());
        Self::new(config, Box::new(store))
    }

    /// Create a resolver backed by an empty in-memory store
    pub fn in_memory(config: AclConfig) -> Result<Self> {
        Self::new(config, Box::new(InMemoryAclStore::new()))
    }

    pub fn config(&self) -> &AclConfig {
        &self.config
    }

    pub(crate) fn next_id(&self) -> RuleId {
        self.next_rule_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Replace the in-memory model with the stored document.
    ///
    /// A store that cannot be read counts as empty. Any other failure leaves
    /// the current model untouched.
    pub fn reload(&self) -> Result<()> {
        let document = match self.store.load() {
            Ok(Some(document)) => document,
            Ok(None) => AclDocument::default(),
            Err(AclError::Io(e)) => {
                warn!(
                    "ACL store {} could not be read, starting empty: {}",
                    self.store.describe(),
                    e
                );
                AclDocument::default()
            }
            Err(e) => return Err(e),
        };

        let (sets, roles) = storage::decode(&document, || self.next_id())?;

        let mut state = self.state.write();
        state.sets = sets;
        state.roles = roles;
        info!(
            "loaded {} rule sets and {} roles from {}",
            state.sets.len(),
            state.roles.len(),
            self.store.describe()
        );
        Ok(())
    }

    /// Flush the current model to the store
    pub fn save(&self) -> Result<()> {
        let state = self.state.read();
        self.persist(&state)
    }

    /// Write the whole model. A failure is reported but the in-memory change
    /// that preceded it stays in place.
    pub(crate) fn persist(&self, state: &AclState) -> Result<()> {
        let document = state.to_document();
        self.store.save(&document).map_err(|e| {
            warn!("failed to save ACLs to {}: {}", self.store.describe(), e);
            e
        })
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, AclState> {
        self.state.read()
    }

    pub(crate) fn write(&self) -> parking_lot::RwLockWriteGuard<'_, AclState> {
        self.state.write()
    }

    /// Decide whether `identity` holds `permissions` on `topic` at `location`
    /// (the root when `None`).
    pub fn check(
        &self,
        identity: &str,
        topic: &str,
        permissions: &str,
        options: Option<&HashMap<String, String>>,
        location: Option<&str>,
    ) -> Result<bool> {
        let empty = HashMap::new();
        self.state
            .read()
            .check(identity, topic, permissions, options.unwrap_or(&empty), location)
    }

    /// Like [`Resolver::check`], but reports which rule decided
    pub fn evaluate(
        &self,
        identity: &str,
        topic: &str,
        permissions: &str,
        options: Option<&HashMap<String, String>>,
        location: Option<&str>,
    ) -> Result<PolicyDecision> {
        let empty = HashMap::new();
        self.state
            .read()
            .evaluate(identity, topic, permissions, options.unwrap_or(&empty), location)
    }

    pub fn is_admin(&self, identity: &str) -> bool {
        self.state.read().admins.contains(identity)
    }

    pub fn admins(&self) -> Vec<String> {
        self.state.read().admins.iter().cloned().collect()
    }

    pub fn is_role_used(&self, name: &str) -> bool {
        self.state.read().is_role_used(name)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.state
            .read()
            .roles()
            .into_iter()
            .map(|role| role.name().to_string())
            .collect()
    }

    /// Number of rules and role entries
    pub fn rule_count(&self) -> usize {
        self.state.read().rule_count()
    }

    /// Snapshot of the current model
    pub fn snapshot(&self) -> AclState {
        self.state.read().clone()
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("store", &self.store.describe())
            .finish()
    }
}
