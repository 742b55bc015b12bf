use crate::domain::DomainData;

const MSD_ROLE_PREFIXES: [&str; 2] = [":role.acl.", ":role.msd-read-role-"];
const MSD_POLICY_PREFIXES: [&str; 2] = [":policy.acl.", ":policy.msd-read-policy-"];

/// Strips the roles and policies that the service generates for
/// microsegmentation rules.
///
/// These are only meaningful to the network policy layer and can make up the
/// bulk of a large domain.
pub fn filter_msd_rules(domain: &mut DomainData) {
    let name = domain.name.clone();
    let generated = |prefixes: &[&str], item: &str| {
        item.strip_prefix(&*name)
            .map(|rest| prefixes.iter().any(|p| rest.starts_with(p)))
            .unwrap_or(false)
    };

    domain
        .roles
        .retain(|role| !generated(&MSD_ROLE_PREFIXES, &role.name));
    domain
        .policies
        .contents
        .policies
        .retain(|policy| !generated(&MSD_POLICY_PREFIXES, &policy.name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Policy, Role};
    use chrono::{TimeZone, Utc};

    fn role(name: &str) -> Role {
        Role {
            name: name.to_string(),
            modified: None,
            members: None,
            role_members: None,
            trust: None,
        }
    }

    fn policy(name: &str) -> Policy {
        Policy {
            name: name.to_string(),
            modified: None,
            assertions: vec![],
        }
    }

    #[test]
    fn strips_generated_rules() {
        let mut domain = DomainData {
            name: "home.alice".to_string(),
            modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            enabled: None,
            roles: vec![
                role("home.alice:role.admin"),
                role("home.alice:role.acl.service.inbound"),
                role("home.alice:role.msd-read-role-service"),
                // Rules generated for other domains are kept.
                role("home.bob:role.acl.service.inbound"),
            ],
            policies: Default::default(),
        };
        domain.policies.contents.policies = vec![
            policy("home.alice:policy.admin"),
            policy("home.alice:policy.acl.service.inbound"),
            policy("home.alice:policy.msd-read-policy-service"),
            policy("home.alice:policy.aclonly"),
        ];

        filter_msd_rules(&mut domain);

        assert_eq!(
            domain.roles.iter().map(|r| &*r.name).collect::<Vec<_>>(),
            vec!["home.alice:role.admin", "home.bob:role.acl.service.inbound"]
        );
        assert_eq!(
            domain
                .policies
                .contents
                .policies
                .iter()
                .map(|p| &*p.name)
                .collect::<Vec<_>>(),
            vec!["home.alice:policy.admin", "home.alice:policy.aclonly"]
        );
    }
}
