// ── Locale negotiation and message bundles ──

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bds_config::{Configuration, DEFAULT_LOCALE};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Supplies the message bundle of a language.
#[async_trait]
pub trait LocaleLoader: Send + Sync {
    /// Nested JSON object of messages, or `None` when the language has no
    /// bundle.
    async fn load(&self, lang: &str) -> Option<Value>;
}

/// Loader that never finds a bundle. `t` then echoes keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBundles;

#[async_trait]
impl LocaleLoader for NoBundles {
    async fn load(&self, _lang: &str) -> Option<Value> {
        None
    }
}

/// Host overrides; unset fields come from the configuration document.
#[derive(Debug, Clone, Default)]
pub struct TranslationOptions {
    pub locale: Option<String>,
    pub fallback_locale: Option<String>,
    pub supported_locale: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
struct Locales {
    /// Preferred locale used when `set_locale` gets no language.
    preferred: String,
    fallback: String,
    supported: Vec<String>,
}

impl Locales {
    fn resolve(options: &TranslationOptions, config: &Configuration) -> Self {
        let configured = (!config.default_locale.is_empty()).then(|| config.default_locale.clone());
        let preferred = options
            .locale
            .clone()
            .or_else(|| configured.clone())
            .unwrap_or_else(|| DEFAULT_LOCALE.to_owned());
        let fallback = options
            .fallback_locale
            .clone()
            .or_else(|| configured.clone())
            .unwrap_or_else(|| DEFAULT_LOCALE.to_owned());
        let supported = options
            .supported_locale
            .clone()
            .or_else(
                || (!config.supported_locale.is_empty()).then(|| config.supported_locale.clone()),
            )
            .unwrap_or_else(|| vec![configured.unwrap_or_else(|| DEFAULT_LOCALE.to_owned())]);
        Self {
            preferred,
            fallback,
            supported,
        }
    }

    fn closest(&self, lang: Option<&str>) -> String {
        if let Some(lang) = lang {
            if self.supported.iter().any(|s| s == lang) {
                return lang.to_owned();
            }
            let primary = lang.split('-').next().unwrap_or(lang);
            if self.supported.iter().any(|s| s == primary) {
                return primary.to_owned();
            }
        }
        self.fallback.clone()
    }
}

pub struct TranslationService {
    options: TranslationOptions,
    loader: Arc<dyn LocaleLoader>,
    locales: RwLock<Locales>,
    bundles: DashMap<String, Arc<Value>>,
    current: watch::Sender<String>,
}

impl TranslationService {
    pub fn new(options: TranslationOptions, loader: Arc<dyn LocaleLoader>) -> Self {
        let locales = Locales::resolve(&options, &Configuration::default());
        let (current, _) = watch::channel(String::new());
        Self {
            options,
            loader,
            locales: RwLock::new(locales),
            bundles: DashMap::new(),
            current,
        }
    }

    /// Resolve locales against the configuration and load the fallback
    /// bundle.
    pub async fn init(&self, config: &Configuration) {
        let locales = Locales::resolve(&self.options, config);
        let fallback = locales.fallback.clone();
        debug!(
            preferred = %locales.preferred,
            fallback = %fallback,
            supported = ?locales.supported,
            "locales resolved"
        );
        *self.locales.write().expect("locale lock poisoned") = locales;
        self.load_lang(&fallback).await;
    }

    fn locales(&self) -> Locales {
        self.locales.read().expect("locale lock poisoned").clone()
    }

    /// Exact supported match, else its primary subtag, else the fallback.
    pub fn closest_locale(&self, lang: Option<&str>) -> String {
        self.locales.read().expect("locale lock poisoned").closest(lang)
    }

    pub fn fallback_locale(&self) -> String {
        self.locales().fallback
    }

    pub fn supported_locales(&self) -> Vec<String> {
        self.locales().supported
    }

    /// Active locale; empty until the first `set_locale`.
    pub fn current_locale(&self) -> String {
        self.current.borrow().clone()
    }

    pub fn watch_locale(&self) -> watch::Receiver<String> {
        self.current.subscribe()
    }

    pub fn is_loaded(&self, lang: &str) -> bool {
        self.bundles.contains_key(lang)
    }

    /// Switch to the closest supported locale of `lang` (the preferred
    /// locale when `None`), loading its bundle on first use.
    pub async fn set_locale(&self, lang: Option<&str>) -> String {
        let locales = self.locales();
        let lang = locales.closest(Some(lang.unwrap_or(&locales.preferred)));
        if *self.current.borrow() != lang {
            if !self.is_loaded(&lang) {
                self.load_lang(&lang).await;
            }
            self.current.send_replace(lang.clone());
            debug!(locale = %lang, "locale changed");
        }
        lang
    }

    async fn load_lang(&self, lang: &str) {
        match self.loader.load(lang).await {
            Some(bundle) if bundle.is_object() => {
                self.bundles.insert(lang.to_owned(), Arc::new(bundle));
            }
            Some(_) => warn!(locale = lang, "locale bundle is not an object, ignored"),
            None => debug!(locale = lang, "no bundle for locale"),
        }
    }

    /// Message for a dotted `key` in the current locale, then the
    /// fallback; the key itself when neither has it.
    pub fn t(&self, key: &str) -> String {
        let current = self.current_locale();
        let fallback = self.fallback_locale();
        [current.as_str(), fallback.as_str()]
            .into_iter()
            .find_map(|lang| {
                let bundle = self.bundles.get(lang)?;
                lookup(&bundle, key).map(str::to_owned)
            })
            .unwrap_or_else(|| key.to_owned())
    }
}

fn lookup<'a>(bundle: &'a Value, key: &str) -> Option<&'a str> {
    key.split('.')
        .try_fold(bundle, |node, segment| node.get(segment))
        .and_then(Value::as_str)
}
