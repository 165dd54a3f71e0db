//! Patterns for ACL Matching
//!
//! Compiled matchers for the three things a rule is matched against: the
//! caller identity (member regexes), the action topic (dotted wildcard
//! patterns) and the caller supplied options.

use crate::error::{AclError, Result};

use regex::Regex;
use serde_json::Value;
use std::fmt;

/// Permission letters in canonical order
pub const PERMISSION_LETTERS: &str = "rwmcdsxe";

/// Set of permission letters (read, write, move, create, delete, search,
/// execute, receive-event)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(u8);

impl Permissions {
    pub fn all() -> Self {
        Self(u8::MAX)
    }

    pub fn empty() -> Self {
        Self(0)
    }

    /// Parse a letter string, rejecting letters outside the alphabet
    pub fn parse(letters: &str) -> Result<Self> {
        let mut bits = 0u8;
        for letter in letters.chars() {
            match PERMISSION_LETTERS.find(letter) {
                Some(index) => bits |= 1 << index,
                None => {
                    return Err(AclError::Validation(format!(
                        "unsupported permission letter '{}' in '{}' (allowed: {})",
                        letter, letters, PERMISSION_LETTERS
                    )))
                }
            }
        }
        Ok(Self(bits))
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, requested: Permissions) -> bool {
        self.0 & requested.0 == requested.0
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, letter) in PERMISSION_LETTERS.chars().enumerate() {
            if self.0 & (1 << index) != 0 {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// Dotted topic pattern.
///
/// `#` matches exactly one segment, `*` matches one or more segments.
/// Matching is anchored at both ends.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    pattern: String,
    regex: Regex,
}

impl TopicPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(AclError::Validation("topic cannot be empty".to_string()));
        }

        let mut expr = String::with_capacity(pattern.len() * 2 + 8);
        expr.push_str("^(?:");
        for c in pattern.chars() {
            match c {
                '#' => expr.push_str(r"[^.]+"),
                '*' => expr.push_str(".+"),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push_str(")$");

        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.regex.is_match(topic)
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// Member pattern applied to the caller identity.
///
/// The regex must match starting at the first character of the identity; it
/// does not have to consume all of it.
#[derive(Debug, Clone)]
pub struct MemberPattern {
    pattern: String,
    regex: Regex,
}

impl MemberPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
            AclError::InvalidMembers(format!("'{}' is not a valid pattern: {}", pattern, e))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, identity: &str) -> bool {
        self.regex.is_match(identity)
    }
}

impl PartialEq for MemberPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// Expected value of one action option
#[derive(Debug, Clone)]
pub enum OptionMatcher {
    /// String values are regexes applied from the start of the caller value
    Pattern { source: String, regex: Regex },

    /// Any other JSON value must equal the caller value
    Exact(Value),
}

impl OptionMatcher {
    pub fn compile(key: &str, expected: &Value) -> Result<Self> {
        match expected {
            Value::String(source) => {
                let regex = Regex::new(&format!("^(?:{})", source)).map_err(|e| {
                    AclError::Validation(format!(
                        "option '{}' has an invalid pattern '{}': {}",
                        key, source, e
                    ))
                })?;
                Ok(OptionMatcher::Pattern {
                    source: source.clone(),
                    regex,
                })
            }
            other => Ok(OptionMatcher::Exact(other.clone())),
        }
    }

    pub fn matches(&self, supplied: &str) -> bool {
        match self {
            OptionMatcher::Pattern { regex, .. } => regex.is_match(supplied),
            OptionMatcher::Exact(value) => value.to_string() == supplied,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            OptionMatcher::Pattern { source, .. } => Value::String(source.clone()),
            OptionMatcher::Exact(value) => value.clone(),
        }
    }
}

impl PartialEq for OptionMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.to_value() == other.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permissions_subset() {
        let granted = Permissions::parse("rw").unwrap();
        assert!(granted.contains(Permissions::parse("r").unwrap()));
        assert!(granted.contains(Permissions::parse("wr").unwrap()));
        assert!(!granted.contains(Permissions::parse("rwcd").unwrap()));
        assert!(granted.contains(Permissions::empty()));
    }

    #[test]
    fn test_permissions_rejects_unknown_letter() {
        let err = Permissions::parse("rq").unwrap_err();
        assert!(err.to_string().contains("'q'"));
    }

    #[test]
    fn test_permissions_display_is_canonical() {
        assert_eq!(Permissions::parse("wr").unwrap().to_string(), "rw");
        assert_eq!(Permissions::all().to_string(), PERMISSION_LETTERS);
        assert_eq!(Permissions::parse("").unwrap(), Permissions::empty());
    }

    #[test]
    fn test_topic_single_segment_wildcard() {
        let pattern = TopicPattern::compile("a.#.c").unwrap();
        assert!(pattern.matches("a.x.c"));
        assert!(!pattern.matches("a.c"));
        assert!(!pattern.matches("a.x.y.c"));
    }

    #[test]
    fn test_topic_multi_segment_wildcard() {
        let pattern = TopicPattern::compile("a.*.c").unwrap();
        assert!(pattern.matches("a.x.c"));
        assert!(pattern.matches("a.x.y.c"));
        assert!(!pattern.matches("a.x.c.d"));
        assert!(!pattern.matches("a..c.d"));
    }

    #[test]
    fn test_topic_literal_dots_are_escaped() {
        let pattern = TopicPattern::compile("org.app.widget").unwrap();
        assert!(pattern.matches("org.app.widget"));
        assert!(!pattern.matches("orgXappXwidget"));
        assert!(!pattern.matches("org.app.widgets"));
    }

    #[test]
    fn test_member_pattern_anchored_at_start() {
        let pattern = MemberPattern::compile("ali.e").unwrap();
        assert!(pattern.matches("alice"));
        assert!(pattern.matches("alice2"));
        assert!(!pattern.matches("malice"));
    }

    #[test]
    fn test_member_pattern_invalid() {
        let err = MemberPattern::compile("(unclosed").unwrap_err();
        assert!(matches!(err, AclError::InvalidMembers(_)));
    }

    #[test]
    fn test_option_matchers() {
        let pattern = OptionMatcher::compile("uid", &json!("adm.*")).unwrap();
        assert!(pattern.matches("admin"));
        assert!(!pattern.matches("user"));

        let exact = OptionMatcher::compile("level", &json!(3)).unwrap();
        assert!(exact.matches("3"));
        assert!(!exact.matches("4"));
        assert_eq!(exact.to_value(), json!(3));
    }
}
