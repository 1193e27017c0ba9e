// ── Live configuration ──
//
// The configuration document is loaded once at start-up, then enriched by
// the backend's `api/bds/v1/app/config`. Readers take cheap snapshots via
// `ArcSwap`; writers swap in a whole new document.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bds_config::Configuration;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::CoreError;

/// Where the configuration document comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Already built by the host.
    Inline(Box<Configuration>),
    /// JSON document served over HTTP.
    Url(Url),
    /// TOML or JSON file, layered with `BDS_*` environment variables.
    File(PathBuf),
    /// The platform config path, layered with `BDS_*` environment variables.
    Platform,
}

impl From<Configuration> for ConfigSource {
    fn from(config: Configuration) -> Self {
        Self::Inline(Box::new(config))
    }
}

impl ConfigSource {
    /// Resolve the document. Does not validate it.
    pub async fn resolve(&self, http: &reqwest::Client) -> Result<Configuration, CoreError> {
        match self {
            Self::Inline(config) => Ok(Configuration::clone(config)),
            Self::Url(url) => {
                debug!(%url, "fetching configuration document");
                let resp = http
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| CoreError::ConnectionFailed {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
                let body: Value = resp.json().await.map_err(|e| CoreError::Config {
                    message: format!("configuration at {url} is not JSON: {e}"),
                })?;
                Ok(Configuration::from_json(body)?)
            }
            Self::File(path) => Ok(bds_config::load_from(path)?),
            Self::Platform => Ok(bds_config::load()?),
        }
    }
}

/// Shared, swappable configuration document.
#[derive(Debug)]
pub struct ConfigService {
    current: ArcSwap<Configuration>,
}

impl ConfigService {
    /// Wrap a validated document.
    pub fn new(config: Configuration) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(config),
        })
    }

    /// Resolve and validate a document from `source`.
    pub async fn load(source: &ConfigSource, http: &reqwest::Client) -> Result<Self, CoreError> {
        Self::new(source.resolve(http).await?)
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    pub fn app_id(&self) -> String {
        self.current.load().app_id.clone()
    }

    pub fn server_url(&self) -> Result<Url, CoreError> {
        Ok(self.current.load().server_url()?)
    }

    /// Shallow-merge a backend-provided document over the current one.
    pub fn merge_remote(&self, remote: &Value) -> Result<(), CoreError> {
        let mut next = Configuration::clone(&self.current.load());
        next.merge_remote(remote)?;
        self.current.store(Arc::new(next));
        Ok(())
    }

    /// Replace the document wholesale.
    pub fn replace(&self, config: Configuration) -> Result<(), CoreError> {
        config.validate()?;
        self.current.store(Arc::new(config));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> Configuration {
        Configuration {
            app_id: "app-1".into(),
            server_url: "https://api.example.com".into(),
            ..Configuration::default()
        }
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let err = ConfigService::new(Configuration::default()).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn remote_merge_is_visible_to_new_snapshots() {
        let service = ConfigService::new(config()).unwrap();
        let before = service.current();

        service
            .merge_remote(&json!({"catalogId": "cat-9", "theme": "dark"}))
            .unwrap();

        assert_eq!(before.catalog_id, None);
        let after = service.current();
        assert_eq!(after.catalog_id.as_deref(), Some("cat-9"));
        assert_eq!(after.extra("theme"), Some(&json!("dark")));
        assert_eq!(service.app_id(), "app-1");
    }

    #[tokio::test]
    async fn inline_source_resolves_without_network() {
        let source = ConfigSource::from(config());
        let service = ConfigService::load(&source, &reqwest::Client::new()).await.unwrap();
        assert_eq!(service.server_url().unwrap().as_str(), "https://api.example.com/");
    }
}
