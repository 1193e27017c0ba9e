//! Configuration for the BDS client SDK.
//!
//! The application configuration document (`appId`, `serverUrl`, locales,
//! CMS options and any extra keys the backend adds), layered loading
//! through figment, persisted client storage (memory, TOML file, system
//! keyring) and tracing-subscriber setup for host applications.

pub mod logging;
pub mod storage;

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};
use thiserror::Error;
use url::Url;

pub use storage::{ClientStorage, FileStore, KeyValueStore, KeyringStore, MemoryStore};

/// Environment variable prefix (`BDS_APP_ID`, `BDS_SERVER_URL`, ...).
pub const ENV_PREFIX: &str = "BDS_";

pub const DEFAULT_LOCALE: &str = "en";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("invalid configuration document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to serialize storage: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse storage file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("logging already initialised: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Configuration document ──────────────────────────────────────────

/// Where CMS content is read from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum ContentSource {
    /// Files bundled with the host application.
    Local,
    /// The CMS backend API.
    #[default]
    Api,
    /// A CDN path, per application.
    Remote,
}

/// CMS overrides carried by the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_source: Option<ContentSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_on_api: Option<bool>,
}

/// Application configuration document.
///
/// Keys the SDK does not model are kept in `extra`, so a backend-provided
/// `api/bds/v1/app/config` document survives a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub app_id: String,

    /// Backend base URL; API paths and the hub endpoint are joined onto it.
    #[serde(default)]
    pub server_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Fallback access-token lifetime when the backend reports none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_time_span_second: Option<u64>,

    #[serde(default = "default_locale")]
    pub default_locale: String,

    #[serde(default)]
    pub supported_locale: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms: Option<CmsConfig>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.into()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            server_url: String::new(),
            api_token: None,
            refresh_token_time_span_second: None,
            default_locale: default_locale(),
            supported_locale: Vec::new(),
            user_type_name: None,
            catalog_id: None,
            cms: None,
            extra: Map::new(),
        }
    }
}

impl Configuration {
    /// Parse an inline JSON document (e.g. fetched from a config URL).
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Require the fields every service depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "appId".into(),
                reason: "must not be empty".into(),
            });
        }
        self.server_url()?;
        Ok(())
    }

    /// Server URL with a guaranteed trailing slash.
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let raw = if self.server_url.ends_with('/') {
            self.server_url.clone()
        } else {
            format!("{}/", self.server_url)
        };
        raw.parse().map_err(|e| ConfigError::Validation {
            field: "serverUrl".into(),
            reason: format!("invalid URL {:?}: {e}", self.server_url),
        })
    }

    pub fn api_token(&self) -> Option<SecretString> {
        self.api_token.clone().map(SecretString::from)
    }

    /// Shallow-merge a remote document over this one: keys present in
    /// `remote` replace local values, everything else is kept.
    pub fn merge_remote(&mut self, remote: &Value) -> Result<(), ConfigError> {
        let Value::Object(remote) = remote else {
            tracing::debug!("Remote configuration is not an object, ignoring");
            return Ok(());
        };

        let mut merged = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in remote {
            merged.insert(key.clone(), value.clone());
        }
        *self = serde_json::from_value(Value::Object(merged))?;
        Ok(())
    }

    /// Untyped lookup into keys the SDK does not model.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "bds-platform", "bdskit")
}

/// Platform config file path (`.../bdskit/config.toml`).
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || fallback_dir().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Platform data directory for persisted client storage.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(fallback_dir, |dirs| dirs.data_dir().to_path_buf())
}

fn fallback_dir() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("bdskit");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Layered sources: defaults → file (TOML, or JSON by extension) → `BDS_*`
/// environment variables.
pub fn figment(path: &Path) -> Figment {
    let base = Figment::new().merge(Serialized::defaults(Configuration::default()));

    let with_file = if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
        base.merge(Json::file(path))
    } else {
        base.merge(Toml::file(path))
    };

    with_file.merge(
        Env::prefixed(ENV_PREFIX)
            .lowercase(false)
            .map(|key| snake_to_camel(key.as_str()).into()),
    )
}

/// Load from an explicit file plus environment.
pub fn load_from(path: &Path) -> Result<Configuration, ConfigError> {
    Ok(figment(path).extract()?)
}

/// Load from the platform config path plus environment.
pub fn load() -> Result<Configuration, ConfigError> {
    load_from(&config_path())
}

/// `APP_ID` → `appId`, matching the document's camelCase keys.
fn snake_to_camel(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut upper = false;
    for ch in raw.chars() {
        if ch == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch.to_ascii_lowercase());
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn snake_keys_become_camel_case() {
        assert_eq!(snake_to_camel("APP_ID"), "appId");
        assert_eq!(snake_to_camel("refresh_token_time_span_second"), "refreshTokenTimeSpanSecond");
        assert_eq!(snake_to_camel("catalogid"), "catalogid");
    }

    #[test]
    fn document_keeps_unknown_keys() {
        let config = Configuration::from_json(json!({
            "appId": "app",
            "serverUrl": "https://api.example.com",
            "theme": {"primary": "#123"}
        }))
        .unwrap();

        assert_eq!(config.default_locale, "en");
        assert_eq!(config.extra("theme"), Some(&json!({"primary": "#123"})));
        assert_eq!(config.server_url().unwrap().as_str(), "https://api.example.com/");
    }

    #[test]
    fn validate_rejects_missing_app_id_and_bad_url() {
        let mut config = Configuration::default();
        config.server_url = "https://api.example.com/".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { field, .. }) if field == "appId"
        ));

        config.app_id = "app".into();
        config.server_url = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { field, .. }) if field == "serverUrl"
        ));
    }

    #[test]
    fn remote_document_overrides_and_extends() {
        let mut config = Configuration::from_json(json!({
            "appId": "app",
            "serverUrl": "https://api.example.com/",
            "defaultLocale": "en"
        }))
        .unwrap();

        config
            .merge_remote(&json!({
                "defaultLocale": "fr",
                "catalogId": "cat-1",
                "features": ["chat"]
            }))
            .unwrap();

        assert_eq!(config.app_id, "app");
        assert_eq!(config.default_locale, "fr");
        assert_eq!(config.catalog_id.as_deref(), Some("cat-1"));
        assert_eq!(config.extra("features"), Some(&json!(["chat"])));
    }

    #[test]
    fn file_and_env_layers_merge() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                appId = "from-file"
                serverUrl = "https://file.example.com/"
                supportedLocale = ["en", "fr"]

                [cms]
                localPath = "content"
                defaultSource = "Local"
                "#,
            )?;
            jail.set_env("BDS_SERVER_URL", "https://env.example.com/");
            jail.set_env("BDS_CATALOG_ID", "cat-9");

            let config = load_from(Path::new("config.toml")).unwrap();
            assert_eq!(config.app_id, "from-file");
            assert_eq!(config.server_url, "https://env.example.com/");
            assert_eq!(config.catalog_id.as_deref(), Some("cat-9"));
            assert_eq!(config.supported_locale, vec!["en".to_owned(), "fr".to_owned()]);

            let cms = config.cms.unwrap();
            assert_eq!(cms.default_source, Some(ContentSource::Local));
            assert_eq!(cms.local_path.as_deref(), Some("content"));
            Ok(())
        });
    }

    #[test]
    fn json_file_is_supported() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.json",
                r#"{"appId": "json-app", "serverUrl": "http://localhost:5000"}"#,
            )?;
            let config = load_from(Path::new("config.json")).unwrap();
            assert_eq!(config.app_id, "json-app");
            assert_eq!(config.default_locale, "en");
            Ok(())
        });
    }
}
