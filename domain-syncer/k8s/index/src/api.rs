use domain_syncer_k8s_api::{
    Api, DeleteParams, Patch, PatchParams, PolicyDomain, PostParams, ResourceExt,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An update was based on a stale resource version.
    #[error("{0} was modified concurrently")]
    Conflict(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("snapshot of {found} cannot be stored as {name}")]
    InvalidSnapshot { name: String, found: String },

    #[error(transparent)]
    Api(kube::Error),
}

/// Writes mirrored domains to the API server.
#[async_trait::async_trait]
pub trait DomainApi: Clone + Send + Sync + 'static {
    async fn get(&self, name: &str) -> Result<Option<PolicyDomain>, Error>;

    async fn create(&self, domain: &PolicyDomain) -> Result<PolicyDomain, Error>;

    /// Replaces a domain, failing with [`Error::Conflict`] if the resource
    /// version is stale.
    async fn replace(&self, domain: &PolicyDomain) -> Result<PolicyDomain, Error>;

    async fn set_status(&self, name: &str, message: &str) -> Result<PolicyDomain, Error>;

    /// Deletes a domain. Deleting a missing domain succeeds.
    async fn delete(&self, name: &str) -> Result<(), Error>;
}

// === impl Error ===

impl Error {
    pub fn from_api(name: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(rsp) if rsp.code == 409 && rsp.reason == "AlreadyExists" => {
                Self::AlreadyExists(name.to_string())
            }
            kube::Error::Api(rsp) if rsp.code == 409 => Self::Conflict(name.to_string()),
            kube::Error::Api(rsp) if rsp.code == 404 => Self::NotFound(name.to_string()),
            error => Self::Api(error),
        }
    }
}

// === impl Api ===

#[async_trait::async_trait]
impl DomainApi for Api<PolicyDomain> {
    async fn get(&self, name: &str) -> Result<Option<PolicyDomain>, Error> {
        Api::get_opt(self, name)
            .await
            .map_err(|e| Error::from_api(name, e))
    }

    async fn create(&self, domain: &PolicyDomain) -> Result<PolicyDomain, Error> {
        Api::create(self, &PostParams::default(), domain)
            .await
            .map_err(|e| Error::from_api(&domain.name_any(), e))
    }

    async fn replace(&self, domain: &PolicyDomain) -> Result<PolicyDomain, Error> {
        let name = domain.name_any();
        Api::replace(self, &name, &PostParams::default(), domain)
            .await
            .map_err(|e| Error::from_api(&name, e))
    }

    async fn set_status(&self, name: &str, message: &str) -> Result<PolicyDomain, Error> {
        let patch = serde_json::json!({ "status": { "message": message } });
        Api::patch_status(self, name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::from_api(name, e))
    }

    async fn delete(&self, name: &str) -> Result<(), Error> {
        match Api::delete(self, name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(error) => match Error::from_api(name, error) {
                Error::NotFound(_) => Ok(()),
                error => Err(error),
            },
        }
    }
}
