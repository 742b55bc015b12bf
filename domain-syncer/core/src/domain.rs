use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A domain as published by the policy service, signed with the service's key.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignedDomain {
    pub domain: DomainData,

    #[serde(default)]
    pub signature: String,

    #[serde(default)]
    pub key_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainData {
    pub name: String,

    /// Advances every time anything in the domain changes.
    pub modified: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    // The change listing only returns domain metadata, so roles and policies
    // may be absent.
    #[serde(default)]
    pub roles: Vec<Role>,

    #[serde(default)]
    pub policies: SignedPolicies,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Fully qualified, e.g. `sports:role.readers`.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_members: Option<Vec<RoleMember>>,

    /// The domain this role delegates its membership to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleMember {
    pub member_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignedPolicies {
    #[serde(default)]
    pub contents: DomainPolicies,

    #[serde(default)]
    pub signature: String,

    #[serde(default)]
    pub key_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainPolicies {
    #[serde(default)]
    pub domain: String,

    #[serde(default)]
    pub policies: Vec<Policy>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,

    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub role: String,

    /// A resource pattern that may contain `*` and `?` wildcards.
    pub resource: String,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<AssertionEffect>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum AssertionEffect {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "DENY")]
    Deny,
}

// === impl SignedDomain ===

impl SignedDomain {
    pub fn name(&self) -> &str {
        &self.domain.name
    }

    /// Returns a copy with every signature field cleared.
    ///
    /// Signatures are regenerated by the service without any change to the
    /// domain's contents, so they are not considered when comparing domains.
    pub fn without_signatures(&self) -> Self {
        let mut domain = self.clone();
        domain.signature.clear();
        domain.key_id.clear();
        domain.domain.policies.signature.clear();
        domain.domain.policies.key_id.clear();
        domain
    }

    /// Compares two domains ignoring their signatures.
    pub fn same_content(&self, other: &Self) -> bool {
        self.without_signatures() == other.without_signatures()
    }

    /// Iterates over the domains that this domain's roles delegate to.
    pub fn trust_domains(&self) -> impl Iterator<Item = &str> {
        self.domain.roles.iter().filter_map(Role::trust)
    }
}

// === impl Role ===

impl Role {
    pub fn trust(&self) -> Option<&str> {
        self.trust.as_deref().filter(|t| !t.is_empty())
    }

    /// Lists the role's members from both the plain and the detailed member
    /// lists, without duplicates.
    pub fn member_names(&self) -> Vec<String> {
        let plain = self.members.iter().flatten().cloned();
        let detailed = self
            .role_members
            .iter()
            .flatten()
            .map(|m| m.member_name.clone());

        let mut names = Vec::new();
        for name in plain.chain(detailed) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = r#"{
        "domain": {
            "name": "home.alice",
            "modified": "2019-03-04T21:19:58.563Z",
            "roles": [
                {
                    "name": "home.alice:role.admin",
                    "members": ["user.alice"],
                    "roleMembers": [
                        {"memberName": "user.alice"},
                        {"memberName": "user.bob", "expiration": "2030-01-01T00:00:00Z"}
                    ]
                },
                {"name": "home.alice:role.readers", "trust": "sys.auth"}
            ],
            "policies": {
                "contents": {
                    "domain": "home.alice",
                    "policies": [{
                        "name": "home.alice:policy.admin",
                        "assertions": [{
                            "role": "home.alice:role.admin",
                            "resource": "home.alice:*",
                            "action": "*",
                            "effect": "ALLOW"
                        }]
                    }]
                },
                "signature": "policy-sig",
                "keyId": "0"
            }
        },
        "signature": "domain-sig",
        "keyId": "0"
    }"#;

    #[test]
    fn decodes_signed_domain() {
        let domain = serde_json::from_str::<SignedDomain>(DOMAIN).expect("must decode");
        assert_eq!(domain.name(), "home.alice");
        assert_eq!(domain.domain.roles.len(), 2);
        assert_eq!(
            domain.domain.roles[0].member_names(),
            vec!["user.alice".to_string(), "user.bob".to_string()]
        );
        assert_eq!(domain.trust_domains().collect::<Vec<_>>(), vec!["sys.auth"]);
        assert_eq!(
            domain.domain.policies.contents.policies[0].assertions[0].effect,
            Some(AssertionEffect::Allow)
        );
    }

    #[test]
    fn decodes_metadata_only_domain() {
        let domain = serde_json::from_str::<SignedDomain>(
            r#"{"domain": {"name": "home.bob", "modified": "2020-01-01T00:00:00Z"}}"#,
        )
        .expect("must decode");
        assert!(domain.domain.roles.is_empty());
        assert!(domain.domain.policies.contents.policies.is_empty());
        assert_eq!(domain.trust_domains().count(), 0);
    }

    #[test]
    fn content_comparison_ignores_signatures() {
        let a = serde_json::from_str::<SignedDomain>(DOMAIN).expect("must decode");

        let mut b = a.clone();
        b.signature = "rotated".to_string();
        b.domain.policies.signature = "rotated".to_string();
        b.domain.policies.key_id = "1".to_string();
        assert_ne!(a, b);
        assert!(a.same_content(&b));

        let mut c = a.clone();
        c.domain.roles[0].members = Some(vec!["user.mallory".to_string()]);
        assert!(!a.same_content(&c));
    }

    #[test]
    fn empty_trust_is_not_a_delegation() {
        let role = Role {
            name: "home.alice:role.empty".to_string(),
            modified: None,
            members: None,
            role_members: None,
            trust: Some(String::new()),
        };
        assert_eq!(role.trust(), None);
        assert!(role.member_names().is_empty());
    }
}
