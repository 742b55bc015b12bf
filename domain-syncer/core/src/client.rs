use crate::domain::SignedDomain;

/// Domains reported as changed by the policy service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangedDomains {
    /// Metadata-only snapshots of the changed domains.
    pub domains: Vec<SignedDomain>,

    /// The cursor to pass to the next listing. Empty when nothing changed.
    pub cursor: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("domain not found")]
    NotFound,

    #[error("policy service returned {code}: {message}")]
    Status { code: u16, message: String },

    #[error("policy service request failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Reads signed domains from the policy service.
#[async_trait::async_trait]
pub trait DomainClient: Send + Sync + 'static {
    /// Fetches the full snapshot of a domain.
    ///
    /// Returns `Ok(None)` when the service answers but has no such domain.
    async fn fetch_domain(&self, name: &str) -> Result<Option<SignedDomain>, ClientError>;

    /// Lists the domains modified since `cursor`. An empty cursor lists
    /// everything.
    async fn list_changed_domains(&self, cursor: &str) -> Result<ChangedDomains, ClientError>;
}

// === impl ClientError ===

impl ClientError {
    pub fn transport(error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self::Transport(error.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::Status { code: 404, .. })
    }
}
