//! treeacl
//!
//! A hierarchical ACL resolution engine. Rules are anchored at locations of a
//! directory-shaped namespace, grant permission letters on dotted topics and
//! can be bundled into reusable roles. The [`acl::Resolver`] answers
//! `check(identity, topic, permissions, options, location)` by walking from
//! the requested location toward the configured root.

pub mod acl;
pub mod config;
pub mod error;

pub use acl::{PolicyDecision, Resolver, Scope};
pub use config::{AclConfig, Config};
pub use error::{AclError, Result};
