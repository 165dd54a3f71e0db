use thiserror::Error;

use crate::acl::RuleId;

pub type Result<T> = std::result::Result<T, AclError>;

#[derive(Error, Debug)]
pub enum AclError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid members: {0}")]
    InvalidMembers(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Rule {0} uses a role, clear its actions first")]
    ConflictingRole(RuleId),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Role already exists: {0}")]
    RoleAlreadyExists(String),

    #[error("Role is still in use: {0}")]
    RoleStillInUse(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("Base not found: {0}")]
    BaseNotFound(String),

    #[error("Recursion detected while resolving role {role} (path: {path})")]
    RoleRecursion { role: String, path: String },

    #[error("Unresolved role reference: {0}")]
    UnresolvedRoleReference(String),
}
