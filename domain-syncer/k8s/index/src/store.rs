use crate::{DomainApi, DomainIndex, Error, NotIndexed, SharedDomains};
use domain_syncer_core::SignedDomain;
use domain_syncer_k8s_api::PolicyDomain;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

/// Reads mirrored domains from the local index and writes them through the
/// API server.
#[derive(Clone, Debug)]
pub struct Store<A> {
    api: A,
    index: SharedDomains,
}

/// The outcome of [`Store::create_or_update`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

// === impl Store ===

impl<A: DomainApi> Store<A> {
    /// Bounds the number of times an update is retried after losing a race
    /// with another writer.
    const MAX_CONFLICTS: usize = 3;

    pub fn new(api: A) -> Self {
        Self::with_index(api, Arc::new(RwLock::new(DomainIndex::default())))
    }

    pub fn with_index(api: A, index: SharedDomains) -> Self {
        Self { api, index }
    }

    pub fn index(&self) -> &SharedDomains {
        &self.index
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<PolicyDomain>> {
        self.index.read().get(name)
    }

    pub fn is_trust_target(&self, name: &str) -> bool {
        self.index.read().is_trust_target(name)
    }

    pub fn trust_targets(&self) -> Vec<String> {
        self.index.read().trust_targets()
    }

    pub fn latest_cursor(&self) -> String {
        self.index.read().latest_cursor()
    }

    pub fn resolve_delegated_members(
        &self,
        trust_domain: &str,
        delegated_role: &str,
    ) -> Result<Vec<String>, NotIndexed> {
        self.index
            .read()
            .resolve_delegated_members(trust_domain, delegated_role)
    }

    /// Mirrors a snapshot of the domain `name`.
    ///
    /// Nothing is written when the mirrored snapshot already has the same
    /// contents, ignoring signatures, and carries no error status. Updates are
    /// conditional on the resource version; when another writer wins, the
    /// current version is fetched and the update is retried.
    pub async fn create_or_update(
        &self,
        name: &str,
        snapshot: &SignedDomain,
    ) -> Result<Applied, Error> {
        if snapshot.name() != name {
            return Err(Error::InvalidSnapshot {
                name: name.to_string(),
                found: snapshot.name().to_string(),
            });
        }

        let mut current = self.get_by_name(name).map(|d| (*d).clone());
        for _ in 0..=Self::MAX_CONFLICTS {
            let existing = match current.take() {
                Some(existing) => existing,
                None => {
                    let domain = PolicyDomain::from_snapshot(snapshot.clone());
                    match self.api.create(&domain).await {
                        Ok(created) => {
                            info!(domain = %name, "Created");
                            self.index.write().apply(created);
                            return Ok(Applied::Created);
                        }
                        Err(Error::AlreadyExists(_)) => {
                            debug!(domain = %name, "Created concurrently");
                            match self.api.get(name).await? {
                                Some(existing) => existing,
                                None => continue,
                            }
                        }
                        Err(error) => return Err(error),
                    }
                }
            };

            if existing.snapshot().same_content(snapshot) && existing.status_message().is_empty() {
                debug!(domain = %name, "Unchanged");
                return Ok(Applied::Unchanged);
            }

            match self.update(existing, snapshot).await {
                Ok(updated) => {
                    info!(domain = %name, "Updated");
                    self.index.write().apply(updated);
                    return Ok(Applied::Updated);
                }
                Err(Error::Conflict(_) | Error::NotFound(_)) => {
                    debug!(domain = %name, "Update lost a race; refetching");
                    current = self.api.get(name).await?;
                }
                Err(error) => return Err(error),
            }
        }

        Err(Error::Conflict(name.to_string()))
    }

    async fn update(
        &self,
        mut domain: PolicyDomain,
        snapshot: &SignedDomain,
    ) -> Result<PolicyDomain, Error> {
        if !domain.snapshot().same_content(snapshot) {
            domain.spec.signed = snapshot.clone();
            domain = self.api.replace(&domain).await?;
        }
        if !domain.status_message().is_empty() {
            let name = snapshot.name();
            domain = self.api.set_status(name, "").await?;
        }
        Ok(domain)
    }

    /// Deletes the mirror of `name`, if there is one.
    ///
    /// Returns false when nothing was mirrored.
    pub async fn remove(&self, name: &str) -> Result<bool, Error> {
        if !self.index.read().contains(name) {
            return Ok(false);
        }
        self.api.delete(name).await?;
        info!(domain = %name, "Deleted");
        self.index.write().delete(name);
        Ok(true)
    }

    /// Records a sync failure on an existing mirror, leaving its snapshot as
    /// it was.
    pub async fn set_error_status(&self, name: &str, message: &str) -> Result<(), Error> {
        let Some(domain) = self.get_by_name(name) else {
            return Ok(());
        };
        if domain.status_message() == message {
            return Ok(());
        }
        let updated = self.api.set_status(name, message).await?;
        self.index.write().apply(updated);
        Ok(())
    }
}
