use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, SecondsFormat, Utc};
use domain_syncer_core::trust;
use domain_syncer_k8s_api::{PolicyDomain, ResourceExt};
use std::sync::Arc;

/// Mirrored domains, by name and by trust target.
#[derive(Debug, Default)]
pub struct DomainIndex {
    domains: HashMap<String, Arc<PolicyDomain>>,

    /// Maps each trust target to the domains with a role delegating to it.
    /// Entries are removed once no domain delegates to the target.
    by_trust: HashMap<String, HashSet<String>>,

    /// Every domain that has ever been indexed as a trust target.
    seen_trust: HashSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("domain {0} is not mirrored")]
pub struct NotIndexed(pub String);

// === impl DomainIndex ===

impl DomainIndex {
    /// Indexes a domain, returning the version it replaced.
    pub fn apply(&mut self, domain: PolicyDomain) -> Option<Arc<PolicyDomain>> {
        let name = domain.name_any();
        let domain = Arc::new(domain);

        for target in domain.trust_domains() {
            self.by_trust
                .entry(target.to_string())
                .or_default()
                .insert(name.clone());
            self.seen_trust.insert(target.to_string());
        }

        let prior = self.domains.insert(name.clone(), domain.clone());
        if let Some(prior) = prior.as_ref() {
            let current = domain.trust_domains().collect::<HashSet<_>>();
            for target in prior.trust_domains() {
                if !current.contains(target) {
                    self.unlink(target, &name);
                }
            }
        }
        prior
    }

    pub fn delete(&mut self, name: &str) -> Option<Arc<PolicyDomain>> {
        let prior = self.domains.remove(name)?;
        for target in prior.trust_domains() {
            self.unlink(target, name);
        }
        Some(prior)
    }

    fn unlink(&mut self, target: &str, name: &str) {
        if let Some(delegators) = self.by_trust.get_mut(target) {
            delegators.remove(name);
            if delegators.is_empty() {
                self.by_trust.remove(target);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<PolicyDomain>> {
        self.domains.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.domains.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Tests whether any mirrored domain currently delegates to `name`.
    pub fn is_trust_target(&self, name: &str) -> bool {
        self.by_trust.contains_key(name)
    }

    /// Lists the mirrored domains delegating to `target`.
    pub fn delegators(&self, target: &str) -> Vec<String> {
        let mut names = self
            .by_trust
            .get(target)
            .map(|d| d.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Lists every domain that has been a trust target since startup, including
    /// targets that are no longer delegated to.
    pub fn trust_targets(&self) -> Vec<String> {
        let mut targets = self.seen_trust.iter().cloned().collect::<Vec<_>>();
        targets.sort();
        targets
    }

    pub fn live_trust_targets(&self) -> usize {
        self.by_trust.len()
    }

    /// Returns the most recent modification time of all mirrored domains as an
    /// RFC3339 timestamp, or an empty string when nothing is mirrored.
    pub fn latest_cursor(&self) -> String {
        let latest = self
            .domains
            .values()
            .map(|d| d.snapshot().domain.modified)
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        if latest == DateTime::<Utc>::UNIX_EPOCH {
            return String::new();
        }
        latest.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Resolves the members that a mirrored trust domain grants to
    /// `delegated_role`.
    pub fn resolve_delegated_members(
        &self,
        trust_domain: &str,
        delegated_role: &str,
    ) -> Result<Vec<String>, NotIndexed> {
        let domain = self
            .domains
            .get(trust_domain)
            .ok_or_else(|| NotIndexed(trust_domain.to_string()))?;
        Ok(trust::delegated_members(
            &domain.snapshot().domain,
            delegated_role,
        ))
    }
}
