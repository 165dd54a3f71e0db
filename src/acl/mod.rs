//! Access Control List (ACL) Resolution
//!
//! Rules are grouped in rule sets anchored at locations of a directory-shaped
//! namespace. Each rule grants permission letters on dotted topics to the
//! identities matching its member patterns, either directly or through a
//! named role. The [`Resolver`] owns the model, decides access checks and
//! persists every change.

pub mod commands;
pub mod location;
pub mod patterns;
pub mod policy;
pub mod resolver;
pub mod role;
pub mod rules;
pub mod set;
pub mod storage;

// Core ACL types
pub use patterns::{MemberPattern, OptionMatcher, Permissions, TopicPattern, PERMISSION_LETTERS};
pub use policy::{PolicyDecision, Scope};
pub use role::AclRole;
pub use rules::{AclAction, AclRule, MatchRequest, RuleId, RuleKind, RuleTarget};
pub use set::AclSet;

// Resolver and command types
pub use commands::{ActionSpec, ActionView, RoleView, RuleSpec, RuleUpdate, RuleView, TargetSpec};
pub use resolver::{AclState, Resolver};

// Storage types
pub use storage::{AclDocument, AclStore, FileAclStore, InMemoryAclStore};
