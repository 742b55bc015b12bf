//! An HTTP client for the policy service's signed-domain API.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use domain_syncer_core::{ChangedDomains, ClientError, DomainClient, SignedDomain};
use reqwest::{
    header::{ETAG, IF_NONE_MATCH},
    RequestBuilder, Response, StatusCode, Url,
};
use std::path::PathBuf;
use tracing::{debug, trace};

pub use reqwest::header::HeaderName;

/// How requests to the policy service are authenticated.
///
/// Credentials are provisioned by other components; the client only attaches
/// them.
#[derive(Clone, Debug)]
pub enum Credential {
    /// A pre-minted token, read from `path` on every request and sent in the
    /// `header` header.
    Token { header: HeaderName, path: PathBuf },

    /// A PEM-encoded client certificate and key, presented during the TLS
    /// handshake.
    Certificate { cert: PathBuf, key: PathBuf },
}

#[derive(Clone, Debug)]
pub struct HttpDomainClient {
    http: reqwest::Client,
    domains_url: Url,
    token: Option<(HeaderName, PathBuf)>,
}

#[derive(serde::Deserialize)]
struct DomainList {
    #[serde(default)]
    domains: Vec<SignedDomain>,
}

// === impl HttpDomainClient ===

impl HttpDomainClient {
    pub async fn new(
        base_url: &str,
        credential: Credential,
        disable_keep_alives: bool,
    ) -> Result<Self> {
        let domains_url = domains_url(base_url)?;

        let mut http = reqwest::Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if disable_keep_alives {
            http = http.pool_max_idle_per_host(0);
        }

        let token = match credential {
            Credential::Token { header, path } => Some((header, path)),
            Credential::Certificate { cert, key } => {
                let mut pem = tokio::fs::read(&cert)
                    .await
                    .with_context(|| format!("reading {}", cert.display()))?;
                pem.push(b'\n');
                pem.extend(
                    tokio::fs::read(&key)
                        .await
                        .with_context(|| format!("reading {}", key.display()))?,
                );
                let identity =
                    reqwest::Identity::from_pem(&pem).context("invalid client identity")?;
                http = http.identity(identity);
                None
            }
        };

        let http = http.build().context("failed to build HTTP client")?;
        Ok(Self {
            http,
            domains_url,
            token,
        })
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ClientError> {
        let req = match &self.token {
            Some((header, path)) => {
                let token = tokio::fs::read_to_string(path)
                    .await
                    .map_err(ClientError::transport)?;
                req.header(header.clone(), token.trim())
            }
            None => req,
        };
        req.send().await.map_err(ClientError::transport)
    }

    async fn domains(rsp: Response) -> Result<Vec<SignedDomain>, ClientError> {
        let list = rsp
            .json::<DomainList>()
            .await
            .map_err(ClientError::transport)?;
        Ok(list.domains)
    }
}

#[async_trait::async_trait]
impl DomainClient for HttpDomainClient {
    async fn fetch_domain(&self, name: &str) -> Result<Option<SignedDomain>, ClientError> {
        let req = self
            .http
            .get(self.domains_url.clone())
            .query(&[("domain", name)]);
        let rsp = check_status(self.send(req).await?).await?;
        let domains = Self::domains(rsp).await?;
        trace!(domain = %name, found = domains.len(), "Fetched");
        Ok(domains.into_iter().find(|d| d.name() == name))
    }

    async fn list_changed_domains(&self, cursor: &str) -> Result<ChangedDomains, ClientError> {
        let mut req = self
            .http
            .get(self.domains_url.clone())
            .query(&[("metaonly", "true"), ("master", "false")]);
        if !cursor.is_empty() {
            req = req.header(IF_NONE_MATCH, cursor);
        }

        let rsp = self.send(req).await?;
        if rsp.status() == StatusCode::NOT_MODIFIED {
            debug!(%cursor, "No changes");
            return Ok(ChangedDomains::default());
        }
        let rsp = check_status(rsp).await?;
        let cursor = rsp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let domains = Self::domains(rsp).await?;
        debug!(changed = domains.len(), %cursor, "Listed changes");
        Ok(ChangedDomains { domains, cursor })
    }
}

async fn check_status(rsp: Response) -> Result<Response, ClientError> {
    let status = rsp.status();
    if status.is_success() {
        return Ok(rsp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound);
    }
    let message = rsp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        code: status.as_u16(),
        message: message.trim().to_string(),
    })
}

fn domains_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid API URL: {base}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join("sys/modified_domains")
        .context("invalid API URL")
}
