use domain_syncer_core::SignedDomain;
use kube::{api::ObjectMeta, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A local copy of a policy domain.
///
/// The resource is named after the domain and its spec holds the last signed
/// snapshot that was accepted from the policy service.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "sync.policy.io",
    version = "v1",
    kind = "PolicyDomain",
    shortname = "pdom",
    status = "PolicyDomainStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDomainSpec {
    #[serde(flatten)]
    pub signed: SignedDomain,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDomainStatus {
    /// Describes why the last sync failed. Empty after a successful sync.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

// === impl PolicyDomain ===

impl PolicyDomain {
    pub fn from_snapshot(signed: SignedDomain) -> Self {
        let metadata = ObjectMeta {
            name: Some(signed.name().to_string()),
            ..ObjectMeta::default()
        };
        Self {
            metadata,
            spec: PolicyDomainSpec { signed },
            status: None,
        }
    }

    pub fn snapshot(&self) -> &SignedDomain {
        &self.spec.signed
    }

    pub fn status_message(&self) -> &str {
        self.status.as_ref().map(|s| &*s.message).unwrap_or("")
    }

    pub fn trust_domains(&self) -> impl Iterator<Item = &str> {
        self.spec.signed.trust_domains()
    }
}
