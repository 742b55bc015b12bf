//! One-hop trust delegation.
//!
//! A role with a `trust` target has no members of its own. Instead, the trust
//! domain grants `assume_role` on the delegated role's name to one or more of
//! its own roles, and the members of those roles become the delegated role's
//! members. Delegation is only ever followed one level: a granting role that
//! itself delegates contributes no members.

use crate::domain::{AssertionEffect, DomainData, Role};
use regex::Regex;

pub const ASSUME_ROLE: &str = "assume_role";

/// Resolves the members of `delegated_role` (a fully qualified role name in
/// the delegating domain) as granted by `trust_domain`.
///
/// Members of all matching grants are combined in policy order. A domain that
/// grants nothing yields an empty list.
pub fn delegated_members(trust_domain: &DomainData, delegated_role: &str) -> Vec<String> {
    let mut members = Vec::new();

    let grants = trust_domain
        .policies
        .contents
        .policies
        .iter()
        .flat_map(|p| p.assertions.iter())
        .filter(|a| a.action == ASSUME_ROLE)
        .filter(|a| a.effect != Some(AssertionEffect::Deny));

    for assertion in grants {
        if !glob_matches(&assertion.resource, delegated_role) {
            continue;
        }

        let Some(role) = find_role(trust_domain, &assertion.role) else {
            tracing::debug!(
                domain = %trust_domain.name,
                role = %assertion.role,
                "Assertion references an unknown role"
            );
            continue;
        };

        if let Some(next) = role.trust() {
            tracing::debug!(
                domain = %trust_domain.name,
                role = %role.name,
                trust = %next,
                "Ignoring grant to a role that delegates further"
            );
            continue;
        }

        for member in role.member_names() {
            if !members.contains(&member) {
                members.push(member);
            }
        }
    }

    members
}

fn find_role<'d>(domain: &'d DomainData, name: &str) -> Option<&'d Role> {
    domain.roles.iter().find(|r| r.name == name)
}

/// Translates a resource pattern using `*` and `?` wildcards into an anchored
/// regular expression.
pub fn glob_to_regex(pattern: &str) -> String {
    let mut re = String::with_capacity(pattern.len() + 2);
    re.push('^');
    let mut literal = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut literal))),
        }
    }
    re.push('$');
    re
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    match Regex::new(&glob_to_regex(pattern)) {
        Ok(re) => re.is_match(name),
        Err(error) => {
            tracing::warn!(%error, %pattern, "Invalid resource pattern");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Assertion, Policy};
    use chrono::{TimeZone, Utc};

    fn role(name: &str, members: &[&str], trust: Option<&str>) -> Role {
        Role {
            name: name.to_string(),
            modified: None,
            members: Some(members.iter().map(|m| m.to_string()).collect()),
            role_members: None,
            trust: trust.map(Into::into),
        }
    }

    fn grant(role: &str, resource: &str, effect: Option<AssertionEffect>) -> Assertion {
        Assertion {
            role: role.to_string(),
            resource: resource.to_string(),
            action: ASSUME_ROLE.to_string(),
            effect,
            id: None,
        }
    }

    fn domain(name: &str, roles: Vec<Role>, assertions: Vec<Assertion>) -> DomainData {
        let mut domain = DomainData {
            name: name.to_string(),
            modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            enabled: None,
            roles,
            policies: Default::default(),
        };
        domain.policies.contents.domain = name.to_string();
        domain.policies.contents.policies = vec![Policy {
            name: format!("{name}:policy.trust"),
            modified: None,
            assertions,
        }];
        domain
    }

    #[test]
    fn resolves_one_hop() {
        let b = domain(
            "b",
            vec![role("b:role.local", &["user.u1"], None)],
            vec![grant("b:role.local", "a:role.R", None)],
        );
        assert_eq!(delegated_members(&b, "a:role.R"), vec!["user.u1"]);
        assert!(delegated_members(&b, "a:role.other").is_empty());
    }

    #[test]
    fn does_not_follow_a_second_hop() {
        let b = domain(
            "b",
            vec![role("b:role.local", &["user.u1"], Some("c"))],
            vec![grant("b:role.local", "a:role.R", None)],
        );
        assert!(delegated_members(&b, "a:role.R").is_empty());
    }

    #[test]
    fn matches_wildcard_resources() {
        let b = domain(
            "b",
            vec![
                role("b:role.readers", &["user.u1", "user.u2"], None),
                role("b:role.writers", &["user.u2", "user.u3"], None),
            ],
            vec![
                grant("b:role.readers", "a:role.*", Some(AssertionEffect::Allow)),
                grant("b:role.writers", "a:role.?", None),
            ],
        );
        assert_eq!(
            delegated_members(&b, "a:role.R"),
            vec!["user.u1", "user.u2", "user.u3"]
        );
        assert_eq!(
            delegated_members(&b, "a:role.RR"),
            vec!["user.u1", "user.u2"]
        );
    }

    #[test]
    fn ignores_other_actions_and_denials() {
        let mut read = grant("b:role.local", "a:role.R", None);
        read.action = "read".to_string();
        let b = domain(
            "b",
            vec![role("b:role.local", &["user.u1"], None)],
            vec![
                read,
                grant("b:role.local", "a:role.R", Some(AssertionEffect::Deny)),
                grant("b:role.missing", "a:role.R", None),
            ],
        );
        assert!(delegated_members(&b, "a:role.R").is_empty());
    }

    #[test]
    fn escapes_regex_metacharacters() {
        assert_eq!(glob_to_regex("a:role.*"), r"^a:role\..*$");
        assert_eq!(glob_to_regex("a+b?"), r"^a\+b.$");
        assert!(glob_matches("a:role.(x)", "a:role.(x)"));
        assert!(!glob_matches("a:role.x", "a:roleXx"));
    }
}
