// ── CMS content with source fallback ──
//
// Content is read from one of three sources: files bundled with the host
// (Local), the CMS API (Api) or a per-application CDN path (Remote). A miss
// on the preferred source retries on the API. Local and Remote files are
// named `{group}/{lang}.{name}.{ext}` and looked up in the current locale,
// then the fallback locale.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use bds_api::{ApiClient, HubEvent, HubMultiplexer, RequestOptions};
use bds_config::CmsConfig;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::ConfigService;
use crate::model::{Content, ContentMapItem, ContentSource, ContentType, sort_content_map};
use crate::service::translation::TranslationService;

const CONTENT_FILTERS: &str = "CMS.Content:key|id|value|contentType|order";
const MAP_FILE: &str = "maps.json";
const REFRESH_EVENT: &str = "RefreshCms";
const EVENT_CHANNEL_SIZE: usize = 64;

/// Post-processes every loaded value (e.g. markdown rendering).
pub trait ContentConverter: Send + Sync {
    fn convert(&self, content_type: ContentType, value: String) -> String;
}

impl<F> ContentConverter for F
where
    F: Fn(ContentType, String) -> String + Send + Sync,
{
    fn convert(&self, content_type: ContentType, value: String) -> String {
        self(content_type, value)
    }
}

#[derive(Debug, Clone)]
pub struct CmsOptions {
    pub local_path: Option<PathBuf>,
    pub remote_path: Option<String>,
    pub default_source: ContentSource,
    /// Retry misses on the API.
    pub fallback_on_api: bool,
}

impl Default for CmsOptions {
    fn default() -> Self {
        Self {
            local_path: None,
            remote_path: None,
            default_source: ContentSource::Api,
            fallback_on_api: true,
        }
    }
}

impl CmsOptions {
    /// Apply the `cms` section of the configuration document.
    pub fn overlay(&self, config: &CmsConfig) -> Self {
        Self {
            local_path: config
                .local_path
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| self.local_path.clone()),
            remote_path: config.remote_path.clone().or_else(|| self.remote_path.clone()),
            default_source: config.default_source.unwrap_or(self.default_source),
            fallback_on_api: config.fallback_on_api.unwrap_or(self.fallback_on_api),
        }
    }
}

/// A `RefreshCms` push for a watched catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogChanged {
    pub catalog_key: String,
    pub group: String,
}

/// Result of [`CmsService::load_content`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedContent {
    Single(String),
    /// Every content of a group, in map order.
    Group(Vec<String>),
}

pub struct CmsService {
    api: Arc<ApiClient>,
    config: Arc<ConfigService>,
    translation: Arc<TranslationService>,
    hub: HubMultiplexer,
    options: ArcSwap<CmsOptions>,
    converter: Option<Arc<dyn ContentConverter>>,
    changes: broadcast::Sender<CatalogChanged>,
}

impl CmsService {
    pub fn new(
        api: Arc<ApiClient>,
        config: Arc<ConfigService>,
        translation: Arc<TranslationService>,
        hub: HubMultiplexer,
        options: CmsOptions,
    ) -> Self {
        let (changes, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let tx = changes.clone();
        hub.on(REFRESH_EVENT, move |event: HubEvent| {
            let tx = tx.clone();
            async move {
                if let (Some(catalog_key), Some(group)) = (event.str_arg(0), event.str_arg(1)) {
                    debug!(catalog_key, group, "catalog changed");
                    let _ = tx.send(CatalogChanged {
                        catalog_key: catalog_key.to_owned(),
                        group: group.to_owned(),
                    });
                }
                Ok(())
            }
        });
        Self {
            api,
            config,
            translation,
            hub,
            options: ArcSwap::from_pointee(options),
            converter: None,
            changes,
        }
    }

    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn ContentConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Apply the configuration document's `cms` overrides.
    pub fn init(&self) {
        if let Some(cms) = &self.config.current().cms {
            self.options.store(Arc::new(self.options.load().overlay(cms)));
        }
    }

    pub fn options(&self) -> Arc<CmsOptions> {
        self.options.load_full()
    }

    // ── Live updates ─────────────────────────────────────────────────

    /// Subscribe `catalog_key` on the hub; its `RefreshCms` pushes show up
    /// on [`catalog_changes`](Self::catalog_changes).
    pub fn watch_catalog(&self, catalog_key: &str) {
        self.hub.subscribe(catalog_key);
    }

    pub fn unwatch_catalog(&self, catalog_key: &str) {
        self.hub.unsubscribe(catalog_key);
    }

    pub fn catalog_changes(&self) -> broadcast::Receiver<CatalogChanged> {
        self.changes.subscribe()
    }

    // ── Content ──────────────────────────────────────────────────────

    /// One content when `item` names it, else the whole group.
    pub async fn load_content(
        &self,
        group: &str,
        item: Option<(ContentType, &str)>,
        source: Option<ContentSource>,
    ) -> Option<LoadedContent> {
        match item {
            Some((content_type, name)) => self
                .content(group, content_type, name, source)
                .await
                .map(LoadedContent::Single),
            None => self.group_content(group, source).await.map(LoadedContent::Group),
        }
    }

    /// A single content, falling back to the API on a miss.
    pub async fn content(
        &self,
        group: &str,
        content_type: ContentType,
        name: &str,
        source: Option<ContentSource>,
    ) -> Option<String> {
        if group.is_empty() || name.is_empty() {
            return None;
        }
        let source = self.source(source);
        let found = self.content_from(source, group, content_type, name).await;
        if found.is_some() || !self.falls_back(source) {
            return found;
        }
        debug!(group, name, %source, "content missing, falling back to api");
        self.content_from(ContentSource::Api, group, content_type, name).await
    }

    /// Every content of a group in map order, falling back to the API on a
    /// miss.
    pub async fn group_content(
        &self,
        group: &str,
        source: Option<ContentSource>,
    ) -> Option<Vec<String>> {
        if group.is_empty() {
            return None;
        }
        let source = self.source(source);
        let found = self.group_content_from(source, group).await;
        if found.is_some() || !self.falls_back(source) {
            return found;
        }
        debug!(group, %source, "content group missing, falling back to api");
        self.group_content_from(ContentSource::Api, group).await
    }

    /// The group's content map sorted by `order`, falling back to the API
    /// on a miss.
    pub async fn get_content_map(
        &self,
        group: &str,
        source: Option<ContentSource>,
    ) -> Option<Vec<ContentMapItem>> {
        if group.is_empty() {
            return None;
        }
        let source = self.source(source);
        let mut map = self.map_from(source, group).await;
        if map.is_none() && self.falls_back(source) {
            map = self.map_from(ContentSource::Api, group).await;
        }
        map.map(|mut items| {
            sort_content_map(&mut items);
            items
        })
    }

    fn source(&self, explicit: Option<ContentSource>) -> ContentSource {
        explicit.unwrap_or(self.options.load().default_source)
    }

    fn falls_back(&self, source: ContentSource) -> bool {
        source != ContentSource::Api && self.options.load().fallback_on_api
    }

    fn convert(&self, content_type: ContentType, value: String) -> String {
        match &self.converter {
            Some(converter) => converter.convert(content_type, value),
            None => value,
        }
    }

    // ── Per-source dispatch ──────────────────────────────────────────

    async fn content_from(
        &self,
        source: ContentSource,
        group: &str,
        content_type: ContentType,
        name: &str,
    ) -> Option<String> {
        match source {
            ContentSource::Api => self.api_content(group, name).await,
            ContentSource::Local | ContentSource::Remote => {
                let root = self.file_root(source)?;
                self.localized_file(&root, group, content_type, name).await
            }
        }
    }

    async fn group_content_from(&self, source: ContentSource, group: &str) -> Option<Vec<String>> {
        let mut map = self.map_from(source, group).await?;
        sort_content_map(&mut map);

        let mut contents = Vec::with_capacity(map.len());
        match source {
            ContentSource::Api => {
                for key in map.iter().filter_map(|item| item.content.as_ref()?.key.as_deref()) {
                    if let Some(value) = self.api_content_by_key(key).await {
                        contents.push(value);
                    }
                }
            }
            ContentSource::Local | ContentSource::Remote => {
                let root = self.file_root(source)?;
                for item in &map {
                    let (Some(name), Some(content_type)) =
                        (item.name.as_deref(), item.content_type)
                    else {
                        continue;
                    };
                    let file = self.localized_file(&root, group, content_type, name).await;
                    contents.extend(file);
                }
            }
        }
        Some(contents)
    }

    async fn map_from(&self, source: ContentSource, group: &str) -> Option<Vec<ContentMapItem>> {
        match source {
            ContentSource::Api => self.api_map(group).await,
            ContentSource::Local | ContentSource::Remote => {
                let root = self.file_root(source)?;
                let text = self.read(&root, &format!("{group}/{MAP_FILE}")).await?;
                match serde_json::from_str(&text) {
                    Ok(map) => Some(map),
                    Err(e) => {
                        warn!(group, %source, error = %e, "unreadable content map");
                        None
                    }
                }
            }
        }
    }

    // ── Local and Remote files ───────────────────────────────────────

    fn file_root(&self, source: ContentSource) -> Option<FileRoot> {
        let options = self.options.load();
        match source {
            ContentSource::Local => options.local_path.clone().map(FileRoot::Dir),
            ContentSource::Remote => {
                let remote = options.remote_path.as_deref()?;
                Some(FileRoot::Url(format!(
                    "{}/{}",
                    remote.trim_end_matches('/'),
                    self.config.app_id()
                )))
            }
            ContentSource::Api => None,
        }
    }

    /// `{group}/{lang}.{name}.{ext}` in the current locale, then the
    /// fallback locale.
    async fn localized_file(
        &self,
        root: &FileRoot,
        group: &str,
        content_type: ContentType,
        name: &str,
    ) -> Option<String> {
        let current = self.translation.current_locale();
        let fallback = self.translation.fallback_locale();
        let ext = content_type.extension();

        let mut langs = vec![current.as_str()];
        if current != fallback {
            langs.push(fallback.as_str());
        }
        for lang in langs.into_iter().filter(|l| !l.is_empty()) {
            if let Some(text) = self.read(root, &format!("{group}/{lang}.{name}.{ext}")).await {
                return Some(self.convert(content_type, text));
            }
        }
        None
    }

    async fn read(&self, root: &FileRoot, relative: &str) -> Option<String> {
        match root {
            FileRoot::Dir(dir) => {
                let path = dir.join(relative);
                match tokio::fs::read_to_string(&path).await {
                    Ok(text) => Some(text),
                    Err(e) if e.kind() == ErrorKind::NotFound => None,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "content file unreadable");
                        None
                    }
                }
            }
            FileRoot::Url(base) => {
                let url = format!("{base}/{relative}");
                let opts = RequestOptions::new().without_credentials().silent();
                match self.api.get_text(&url, &opts).await {
                    Ok(resp) => Some(resp.into_data()),
                    Err(e) => {
                        debug!(%url, error = %e, "remote content miss");
                        None
                    }
                }
            }
        }
    }

    // ── Api ──────────────────────────────────────────────────────────

    async fn api_content(&self, group: &str, name: &str) -> Option<String> {
        let opts = RequestOptions::new().silent().filters([CONTENT_FILTERS]);
        let content = self
            .api_get::<Content>(&format!("api/cms/v1/content/{group}/{name}"), &opts)
            .await?;
        self.content_value(content)
    }

    async fn api_content_by_key(&self, key: &str) -> Option<String> {
        let content = self
            .api_get::<Content>(
                &format!("api/cms/v1/content/{key}"),
                &RequestOptions::new().silent(),
            )
            .await?;
        self.content_value(content)
    }

    async fn api_map(&self, group: &str) -> Option<Vec<ContentMapItem>> {
        self.api_get(&format!("api/cms/v1/map/{group}"), &RequestOptions::new().silent())
            .await
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        opts: &RequestOptions,
    ) -> Option<T> {
        match self.api.get::<Option<T>>(path, opts).await {
            Ok(resp) => resp.into_data(),
            Err(e) => {
                debug!(path, error = %e, "api content miss");
                None
            }
        }
    }

    fn content_value(&self, content: Content) -> Option<String> {
        let content_type = content.content_type.unwrap_or_default();
        content.value.map(|value| self.convert(content_type, value))
    }
}

enum FileRoot {
    Dir(PathBuf),
    Url(String),
}
