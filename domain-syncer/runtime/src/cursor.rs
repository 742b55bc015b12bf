use crate::k8s::{Api, Client, ConfigMap, ObjectMeta, PostParams};
use anyhow::Result;
use std::collections::BTreeMap;

/// Persists the change cursor so that it survives restarts.
#[async_trait::async_trait]
pub trait CursorSink: Send + Sync + 'static {
    async fn record(&self, cursor: &str) -> Result<()>;
}

/// Records the cursor under a key of a `ConfigMap`.
#[derive(Clone)]
pub struct ConfigMapCursor {
    api: Api<ConfigMap>,
    name: String,
    key: String,
}

// === impl ConfigMapCursor ===

impl ConfigMapCursor {
    pub fn new(client: Client, namespace: &str, name: String, key: String) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name,
            key,
        }
    }
}

#[async_trait::async_trait]
impl CursorSink for ConfigMapCursor {
    async fn record(&self, cursor: &str) -> Result<()> {
        let params = PostParams::default();
        match self.api.get_opt(&self.name).await? {
            Some(mut cm) => {
                cm.data
                    .get_or_insert_with(BTreeMap::new)
                    .insert(self.key.clone(), cursor.to_string());
                self.api.replace(&self.name, &params, &cm).await?;
            }
            None => {
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(self.name.clone()),
                        ..ObjectMeta::default()
                    },
                    data: Some(BTreeMap::from([(self.key.clone(), cursor.to_string())])),
                    ..ConfigMap::default()
                };
                self.api.create(&params, &cm).await?;
            }
        }
        Ok(())
    }
}
