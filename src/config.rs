use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub acl: AclConfig,
}

/// ACL resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Top of the location hierarchy; the outward walk stops above it
    pub root_location: String,
    /// Path of the persisted JSON document
    pub store_path: PathBuf,
    /// Identities that bypass every ACL check
    pub admins: Vec<String>,
    /// Topic guarding ACL administration and listing
    pub meta_topic: String,
    /// Reject actions whose options are not satisfied by the caller.
    /// `false` restores the legacy behaviour where mismatches are only logged.
    pub enforce_options: bool,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            root_location: "dc=example,dc=net".to_string(),
            store_path: PathBuf::from("/var/lib/treeacl/acl.json"),
            admins: Vec::new(),
            meta_topic: "org.treeacl.acl".to_string(),
            enforce_options: true,
        }
    }
}

impl AclConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.root_location.trim().is_empty() {
            return Err(crate::error::AclError::InvalidConfig(
                "acl.root_location cannot be empty".to_string(),
            ));
        }

        if self.meta_topic.trim().is_empty() {
            return Err(crate::error::AclError::InvalidConfig(
                "acl.meta_topic cannot be empty".to_string(),
            ));
        }

        if self.meta_topic.contains(['#', '*']) {
            return Err(crate::error::AclError::InvalidConfig(
                "acl.meta_topic must not contain wildcards".to_string(),
            ));
        }

        if self.admins.iter().any(|admin| admin.is_empty()) {
            return Err(crate::error::AclError::InvalidConfig(
                "acl.admins cannot contain empty identities".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| crate::error::AclError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.acl.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.acl.enforce_options);
    }

    #[test]
    fn test_config_validation_root_location() {
        let mut config = Config::default();
        config.acl.root_location = "  ".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("root_location"));
    }

    #[test]
    fn test_config_validation_meta_topic_wildcards() {
        let mut config = Config::default();
        config.acl.meta_topic = "org.treeacl.*".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("wildcards"));
    }

    #[test]
    fn test_toml_partial_config_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [acl]
            root_location = "dc=corp,dc=org"
            admins = ["root", "ops"]
            "#,
        )
        .unwrap();

        assert_eq!(config.acl.root_location, "dc=corp,dc=org");
        assert_eq!(config.acl.admins, vec!["root".to_string(), "ops".to_string()]);
        assert_eq!(config.acl.meta_topic, "org.treeacl.acl");
        assert!(config.acl.enforce_options);
    }

    #[test]
    fn test_toml_serialization_deserialization() {
        let config = Config::default();

        let toml_string = toml::to_string(&config).unwrap();
        let deserialized = Config::from_toml(&toml_string).unwrap();

        assert!(deserialized.validate().is_ok());
        assert_eq!(config.acl.root_location, deserialized.acl.root_location);
        assert_eq!(config.acl.store_path, deserialized.acl.store_path);
    }

    #[test]
    fn test_from_file_missing_path() {
        let result = Config::from_file("/nonexistent/treeacl.toml");
        assert!(matches!(result, Err(crate::error::AclError::Io(_))));
    }
}
