//! Decision algorithm tests
//!
//! Exercises `Resolver::check` through the public command API:
//! - scope semantics (one, sub, psub, reset) across the location walk
//! - permission letter subsets and topic wildcards
//! - role indirection and recursion detection
//! - admin bypass

use std::collections::HashMap;

use serde_json::json;
use treeacl::acl::{ActionSpec, InMemoryAclStore, RuleSpec, RuleUpdate, TargetSpec};
use treeacl::{AclConfig, AclError, PolicyDecision, Resolver, Scope};

const ROOT: &str = "dc=example,dc=net";
const PEOPLE: &str = "ou=people,dc=example,dc=net";
const STAFF: &str = "ou=staff,ou=people,dc=example,dc=net";
const ADMIN: &str = "root";

fn config() -> AclConfig {
    AclConfig {
        root_location: ROOT.to_string(),
        admins: vec![ADMIN.to_string()],
        ..AclConfig::default()
    }
}

fn resolver() -> Resolver {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Resolver::in_memory(config()).expect("Failed to create resolver")
}

fn grant(resolver: &Resolver, base: &str, scope: &str, members: &[&str], topic: &str, acls: &str) -> u64 {
    resolver
        .add_rule(
            ADMIN,
            base,
            RuleSpec::actions(scope, vec![ActionSpec::new(topic, acls)])
                .members(members.iter().copied()),
        )
        .expect("Failed to add rule")
}

fn check(resolver: &Resolver, identity: &str, topic: &str, acls: &str, location: &str) -> bool {
    resolver
        .check(identity, topic, acls, None, Some(location))
        .expect("check failed")
}

#[test]
fn test_example_scenario() {
    let resolver = resolver();
    grant(&resolver, ROOT, "sub", &["alice"], "org.app.*", "rw");
    let location = "ou=sub,dc=example,dc=net";

    assert!(check(&resolver, "alice", "org.app.widget", "r", location));
    assert!(!check(&resolver, "bob", "org.app.widget", "r", location));
    assert!(!check(&resolver, "alice", "org.app.widget", "rwcd", location));
}

#[test]
fn test_subset_permission_law() {
    let resolver = resolver();
    grant(&resolver, ROOT, "sub", &["alice"], "org.app.#", "rsx");

    for requested in ["r", "s", "x", "rs", "sx", "rsx", "xsr", ""] {
        assert!(check(&resolver, "alice", "org.app.widget", requested, ROOT), "{requested}");
    }
    for requested in ["w", "rw", "rsxe", "m", "c", "d"] {
        assert!(!check(&resolver, "alice", "org.app.widget", requested, ROOT), "{requested}");
    }
}

#[test]
fn test_topic_wildcard_law() {
    let resolver = resolver();
    grant(&resolver, ROOT, "sub", &["alice"], "a.#.c", "r");
    grant(&resolver, ROOT, "sub", &["bob"], "a.*.c", "r");

    assert!(check(&resolver, "alice", "a.x.c", "r", ROOT));
    assert!(!check(&resolver, "alice", "a.c", "r", ROOT));
    assert!(!check(&resolver, "alice", "a.x.y.c", "r", ROOT));

    assert!(check(&resolver, "bob", "a.x.c", "r", ROOT));
    assert!(check(&resolver, "bob", "a.x.y.c", "r", ROOT));
    assert!(!check(&resolver, "bob", "a.x.c.d", "r", ROOT));
}

#[test]
fn test_scope_one_locality() {
    let resolver = resolver();
    grant(&resolver, PEOPLE, "one", &["alice"], "org.app.*", "r");

    assert!(check(&resolver, "alice", "org.app.widget", "r", PEOPLE));
    assert!(!check(&resolver, "alice", "org.app.widget", "r", STAFF));
    assert!(!check(&resolver, "alice", "org.app.widget", "r", ROOT));
}

#[test]
fn test_scope_sub_propagation_and_reset() {
    let resolver = resolver();
    grant(&resolver, ROOT, "sub", &["alice"], "org.app.*", "rw");
    grant(&resolver, STAFF, "reset", &["alice"], "org.app.*", "rw");
    let below_staff = "cn=a,ou=staff,ou=people,dc=example,dc=net";

    assert!(check(&resolver, "alice", "org.app.widget", "r", ROOT));
    assert!(check(&resolver, "alice", "org.app.widget", "r", PEOPLE));
    assert!(!check(&resolver, "alice", "org.app.widget", "r", STAFF));
    assert!(!check(&resolver, "alice", "org.app.widget", "r", below_staff));
}

#[test]
fn test_reset_suppresses_one_at_same_level() {
    let resolver = resolver();
    resolver
        .add_rule(
            ADMIN,
            PEOPLE,
            RuleSpec::actions("reset", vec![ActionSpec::new("org.app.*", "r")])
                .members(["alice"])
                .priority(-10),
        )
        .unwrap();
    grant(&resolver, PEOPLE, "one", &["alice"], "org.app.*", "r");

    assert!(!check(&resolver, "alice", "org.app.widget", "r", PEOPLE));
}

#[test]
fn test_psub_is_reset_proof() {
    let resolver = resolver();
    grant(&resolver, ROOT, "psub", &["alice"], "org.app.*", "r");
    grant(&resolver, PEOPLE, "reset", &["alice"], "org.app.*", "r");
    grant(&resolver, STAFF, "reset", &["alice"], "org.app.*", "r");

    assert!(check(&resolver, "alice", "org.app.widget", "r", STAFF));
    assert!(check(&resolver, "alice", "org.app.widget", "r", PEOPLE));
}

#[test]
fn test_reset_only_applies_to_matching_identity() {
    let resolver = resolver();
    grant(&resolver, ROOT, "sub", &["alice", "bob"], "org.app.*", "r");
    grant(&resolver, PEOPLE, "reset", &["alice"], "org.app.*", "r");

    assert!(!check(&resolver, "alice", "org.app.widget", "r", PEOPLE));
    assert!(check(&resolver, "bob", "org.app.widget", "r", PEOPLE));
}

#[test]
fn test_member_patterns_are_regexes_anchored_at_start() {
    let resolver = resolver();
    grant(&resolver, ROOT, "sub", &["adm-[0-9]+"], "org.app.*", "r");

    assert!(check(&resolver, "adm-12", "org.app.widget", "r", ROOT));
    assert!(!check(&resolver, "x-adm-12", "org.app.widget", "r", ROOT));
    assert!(!check(&resolver, "adm-", "org.app.widget", "r", ROOT));
}

#[test]
fn test_options_are_enforced() {
    let resolver = resolver();
    resolver
        .add_rule(
            ADMIN,
            ROOT,
            RuleSpec::actions(
                "sub",
                vec![ActionSpec::new("org.app.user", "w")
                    .with_options(json!({"uid": "alice", "level": 2}))],
            )
            .members(["alice"]),
        )
        .unwrap();

    let mut options = HashMap::new();
    options.insert("uid".to_string(), "alice".to_string());
    options.insert("level".to_string(), "2".to_string());
    assert!(resolver
        .check("alice", "org.app.user", "w", Some(&options), Some(ROOT))
        .unwrap());

    options.insert("level".to_string(), "3".to_string());
    assert!(!resolver
        .check("alice", "org.app.user", "w", Some(&options), Some(ROOT))
        .unwrap());
    assert!(!resolver.check("alice", "org.app.user", "w", None, Some(ROOT)).unwrap());
}

#[test]
fn test_legacy_option_mode_only_logs() {
    let config = AclConfig {
        enforce_options: false,
        ..config()
    };
    let resolver = Resolver::in_memory(config).unwrap();
    resolver
        .add_rule(
            ADMIN,
            ROOT,
            RuleSpec::actions(
                "sub",
                vec![ActionSpec::new("org.app.user", "w").with_options(json!({"uid": "alice"}))],
            )
            .members(["alice"]),
        )
        .unwrap();

    assert!(resolver.check("alice", "org.app.user", "w", None, Some(ROOT)).unwrap());
}

#[test]
fn test_role_indirection() {
    let resolver = resolver();
    resolver.add_role(ADMIN, "viewer").unwrap();
    resolver
        .add_rule_to_role(
            ADMIN,
            "viewer",
            RuleSpec::actions("sub", vec![ActionSpec::new("org.app.*", "r")]),
        )
        .unwrap();
    resolver.add_role(ADMIN, "editor").unwrap();
    resolver
        .add_rule_to_role(ADMIN, "editor", RuleSpec::role("viewer"))
        .unwrap();
    resolver
        .add_rule(ADMIN, PEOPLE, RuleSpec::role("editor").members(["alice"]))
        .unwrap();

    assert!(check(&resolver, "alice", "org.app.widget", "r", STAFF));
    assert!(!check(&resolver, "alice", "org.app.widget", "w", STAFF));
    assert!(!check(&resolver, "bob", "org.app.widget", "r", STAFF));
    assert!(!check(&resolver, "alice", "org.app.widget", "r", ROOT));
}

#[test]
fn test_role_entry_scope_applies() {
    let resolver = resolver();
    resolver.add_role(ADMIN, "local").unwrap();
    resolver
        .add_rule_to_role(
            ADMIN,
            "local",
            RuleSpec::actions("one", vec![ActionSpec::new("org.app.*", "r")]),
        )
        .unwrap();
    resolver
        .add_rule(ADMIN, PEOPLE, RuleSpec::role("local").members(["alice"]))
        .unwrap();

    assert!(check(&resolver, "alice", "org.app.widget", "r", PEOPLE));
    assert!(!check(&resolver, "alice", "org.app.widget", "r", STAFF));
}

#[test]
fn test_role_recursion_is_reported() {
    let document = json!({
        "roles": {
            "a": [{"priority": 0, "role": "b"}],
            "b": [{"priority": 0, "role": "a"}]
        },
        "acl": {
            ROOT: [{"acls": [{"priority": 0, "members": ["alice"], "role": "a"}]}]
        }
    });
    let store = InMemoryAclStore::with_content(document.to_string());
    let resolver = Resolver::new(config(), Box::new(store)).unwrap();

    let err = resolver
        .check("alice", "org.app.widget", "r", None, Some(ROOT))
        .unwrap_err();
    assert!(matches!(err, AclError::RoleRecursion { .. }));

    // identities that do not match the rule never expand the roles
    assert!(!resolver
        .check("bob", "org.app.widget", "r", None, Some(ROOT))
        .unwrap());
}

#[test]
fn test_diamond_role_references_are_not_recursion() {
    let resolver = resolver();
    for name in ["base", "left", "right", "top"] {
        resolver.add_role(ADMIN, name).unwrap();
    }
    resolver
        .add_rule_to_role(
            ADMIN,
            "base",
            RuleSpec::actions("sub", vec![ActionSpec::new("org.app.#", "r")]),
        )
        .unwrap();
    resolver.add_rule_to_role(ADMIN, "left", RuleSpec::role("base")).unwrap();
    resolver.add_rule_to_role(ADMIN, "right", RuleSpec::role("base")).unwrap();
    resolver.add_rule_to_role(ADMIN, "top", RuleSpec::role("left")).unwrap();
    resolver.add_rule_to_role(ADMIN, "top", RuleSpec::role("right")).unwrap();
    resolver
        .add_rule(ADMIN, ROOT, RuleSpec::role("top").members(["alice"]))
        .unwrap();

    assert!(check(&resolver, "alice", "org.app.widget", "r", ROOT));
    assert!(!check(&resolver, "alice", "org.other.widget", "r", ROOT));
}

#[test]
fn test_admin_bypass() {
    let resolver = resolver();
    assert!(check(&resolver, ADMIN, "any.topic.at.all", "rwmcdsxe", STAFF));
    assert!(resolver
        .check(ADMIN, "x", "rwmcdsxe", None, Some("dc=elsewhere,dc=org"))
        .unwrap());
    assert_eq!(
        resolver.evaluate(ADMIN, "x", "r", None, None).unwrap(),
        PolicyDecision::Bypass
    );
}

#[test]
fn test_default_location_is_root() {
    let resolver = resolver();
    grant(&resolver, ROOT, "one", &["alice"], "org.app.*", "r");

    assert!(resolver.check("alice", "org.app.widget", "r", None, None).unwrap());
}

#[test]
fn test_evaluate_reports_granting_rule() {
    let resolver = resolver();
    let id = grant(&resolver, PEOPLE, "sub", &["alice"], "org.app.*", "r");

    let decision = resolver
        .evaluate("alice", "org.app.widget", "r", None, Some(STAFF))
        .unwrap();
    assert_eq!(
        decision,
        PolicyDecision::Allow {
            rule_id: id,
            scope: Scope::Sub,
            location: PEOPLE.to_string(),
        }
    );
}

#[test]
fn test_update_changes_decision() {
    let resolver = resolver();
    let id = grant(&resolver, ROOT, "sub", &["alice"], "org.app.*", "r");
    assert!(check(&resolver, "alice", "org.app.widget", "r", PEOPLE));

    resolver
        .update_rule(
            ADMIN,
            id,
            RuleUpdate {
                scope: Some("one".to_string()),
                ..RuleUpdate::default()
            },
        )
        .unwrap();
    assert!(!check(&resolver, "alice", "org.app.widget", "r", PEOPLE));

    resolver
        .update_rule(
            ADMIN,
            id,
            RuleUpdate {
                scope: Some("sub".to_string()),
                target: Some(TargetSpec::Actions(vec![ActionSpec::new("org.other.*", "r")])),
                ..RuleUpdate::default()
            },
        )
        .unwrap();
    assert!(!check(&resolver, "alice", "org.app.widget", "r", PEOPLE));
    assert!(check(&resolver, "alice", "org.other.widget", "r", PEOPLE));
}
