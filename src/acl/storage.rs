//! ACL Persistent Storage Layer
//!
//! The whole resolver state is persisted as one JSON document and rewritten
//! on every change. Roles are listed by name, rule sets by base:
//!
//! ```json
//! {
//!   "roles": {"viewer": [{"priority": 0, "scope": "sub", "actions": [...]}]},
//!   "acl": {"dc=example,dc=net": [{"acls": [{"priority": 0, "members": ["alice"], "role": "viewer"}]}]}
//! }
//! ```

use super::role::AclRole;
use super::rules::{AclAction, AclRule, RuleId};
use super::set::AclSet;
use super::Scope;
use crate::error::{AclError, Result};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persisted form of the resolver state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclDocument {
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<RoleEntryDocument>>,
    #[serde(default)]
    pub acl: BTreeMap<String, Vec<AclSetDocument>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AclSetDocument {
    #[serde(default)]
    pub acls: Vec<RuleDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDocument {
    pub topic: String,
    pub acls: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// A rule set entry: either a role reference or explicit actions.
///
/// Each form rejects the other's fields, so an entry carrying both `role`
/// and `scope`/`actions` fails to load instead of losing half its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleDocument {
    Role(RoleRuleDocument),
    Actions(ActionRuleDocument),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleRuleDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default)]
    pub members: Vec<String>,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionRuleDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default)]
    pub members: Vec<String>,
    pub scope: Scope,
    #[serde(default)]
    pub actions: Vec<ActionDocument>,
}

/// A role entry; like [`RuleDocument`] but without members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleEntryDocument {
    Role(RoleReferenceDocument),
    Actions(RoleActionsDocument),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleReferenceDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleActionsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    pub scope: Scope,
    #[serde(default)]
    pub actions: Vec<ActionDocument>,
}

/// Persistent storage interface for the ACL document
pub trait AclStore: Send + Sync {
    /// Read the stored document, `None` if nothing has been stored yet
    fn load(&self) -> Result<Option<AclDocument>>;

    /// Replace the stored document
    fn save(&self, document: &AclDocument) -> Result<()>;

    /// Human readable location of the store, for logging
    fn describe(&self) -> String;
}

/// JSON file store with atomic replacement
#[derive(Debug, Clone)]
pub struct FileAclStore {
    path: PathBuf,
}

impl FileAclStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AclStore for FileAclStore {
    fn load(&self) -> Result<Option<AclDocument>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("ACL store {} does not exist yet", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, document: &AclDocument) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let bytes = serde_json::to_vec_pretty(document)?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.as_file_mut().write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| AclError::Io(e.error))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory store, keeps the serialized document
#[derive(Debug, Default)]
pub struct InMemoryAclStore {
    content: Mutex<Option<String>>,
}

impl InMemoryAclStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a raw JSON document
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: Mutex::new(Some(content.into())),
        }
    }

    /// The raw JSON last saved
    pub fn content(&self) -> Option<String> {
        self.content.lock().clone()
    }
}

impl AclStore for InMemoryAclStore {
    fn load(&self) -> Result<Option<AclDocument>> {
        match self.content.lock().as_deref() {
            Some(content) => Ok(Some(serde_json::from_str(content)?)),
            None => Ok(None),
        }
    }

    fn save(&self, document: &AclDocument) -> Result<()> {
        let content = serde_json::to_string(document)?;
        *self.content.lock() = Some(content);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

fn encode_actions(actions: &[AclAction]) -> Vec<ActionDocument> {
    actions
        .iter()
        .map(|action| ActionDocument {
            topic: action.topic().to_string(),
            acls: action.permissions().to_string(),
            options: action.options(),
        })
        .collect()
}

fn decode_actions(rule: &mut AclRule, actions: &[ActionDocument]) -> Result<()> {
    for action in actions {
        let options = Value::Object(action.options.clone());
        rule.add_action(AclAction::new(&action.topic, &action.acls, Some(&options))?)?;
    }
    Ok(())
}

/// Encode rule sets and roles into a document
pub fn encode<'a>(
    sets: impl IntoIterator<Item = &'a AclSet>,
    roles: impl IntoIterator<Item = &'a AclRole>,
) -> AclDocument {
    let mut document = AclDocument::default();

    for role in roles {
        let entries = role
            .entries()
            .iter()
            .map(|entry| match entry.role() {
                Some(name) => RoleEntryDocument::Role(RoleReferenceDocument {
                    priority: entry.priority(),
                    role: name.to_string(),
                }),
                None => RoleEntryDocument::Actions(RoleActionsDocument {
                    priority: entry.priority(),
                    scope: entry.scope(),
                    actions: encode_actions(entry.actions()),
                }),
            })
            .collect();
        document.roles.insert(role.name().to_string(), entries);
    }

    for set in sets {
        let acls = set
            .rules()
            .iter()
            .map(|rule| match rule.role() {
                Some(name) => RuleDocument::Role(RoleRuleDocument {
                    priority: rule.priority(),
                    members: rule.members(),
                    role: name.to_string(),
                }),
                None => RuleDocument::Actions(ActionRuleDocument {
                    priority: rule.priority(),
                    members: rule.members(),
                    scope: rule.scope(),
                    actions: encode_actions(rule.actions()),
                }),
            })
            .collect();
        document
            .acl
            .entry(set.base().to_string())
            .or_default()
            .push(AclSetDocument { acls });
    }

    document
}

/// Rebuild rule sets and roles from a document.
///
/// Role references may point forward to roles defined later in the document;
/// every reference has to resolve once the whole document has been read.
pub fn decode(
    document: &AclDocument,
    mut next_id: impl FnMut() -> RuleId,
) -> Result<(BTreeMap<String, AclSet>, HashMap<String, AclRole>)> {
    let mut roles: HashMap<String, AclRole> = document
        .roles
        .keys()
        .map(|name| (name.clone(), AclRole::new(name.clone())))
        .collect();
    let mut pending: Vec<String> = Vec::new();

    for (name, entries) in &document.roles {
        let mut decoded = Vec::with_capacity(entries.len());
        for entry in entries {
            let (priority, rule) = match entry {
                RoleEntryDocument::Role(reference) => {
                    let mut rule = AclRule::new_role_entry(next_id(), Scope::Sub);
                    rule.use_role_unchecked(&reference.role);
                    pending.push(reference.role.clone());
                    (reference.priority, rule)
                }
                RoleEntryDocument::Actions(entry) => {
                    let mut rule = AclRule::new_role_entry(next_id(), entry.scope);
                    decode_actions(&mut rule, &entry.actions)?;
                    (entry.priority, rule)
                }
            };
            decoded.push(with_priority(rule, priority));
        }

        if let Some(role) = roles.get_mut(name) {
            for rule in decoded {
                role.add(rule)?;
            }
        }
    }

    let mut sets: BTreeMap<String, AclSet> = BTreeMap::new();
    for (base, documents) in &document.acl {
        for set_document in documents {
            for rule_document in &set_document.acls {
                let (priority, rule) = match rule_document {
                    RuleDocument::Role(reference) => {
                        let mut rule = AclRule::new(next_id(), Scope::Sub);
                        rule.set_members(reference.members.as_slice())?;
                        rule.use_role_unchecked(&reference.role);
                        pending.push(reference.role.clone());
                        (reference.priority, rule)
                    }
                    RuleDocument::Actions(document) => {
                        let mut rule = AclRule::new(next_id(), document.scope);
                        rule.set_members(document.members.as_slice())?;
                        decode_actions(&mut rule, &document.actions)?;
                        (document.priority, rule)
                    }
                };
                sets.entry(base.clone())
                    .or_insert_with(|| AclSet::new(base.clone()))
                    .add(with_priority(rule, priority))?;
            }
        }
    }

    if let Some(missing) = pending.iter().find(|name| !roles.contains_key(*name)) {
        return Err(AclError::UnresolvedRoleReference(missing.clone()));
    }

    sets.retain(|_, set| !set.is_empty());
    Ok((sets, roles))
}

/// Stored priorities may exceed the caller range once a collection has grown
/// past it through default assignment
fn with_priority(mut rule: AclRule, priority: Option<i32>) -> AclRule {
    if let Some(priority) = priority {
        rule.assign_priority(priority);
    }
    rule
}
