// ── Platform application data ──
//
// Backend-side app configuration and reference lists shared by every
// feature.

use std::sync::Arc;

use bds_api::{ApiClient, RequestOptions};
use serde_json::Value;
use tracing::debug;

use crate::config::ConfigService;
use crate::error::CoreError;
use crate::model::{BdsEntity, Country, Reference};
use crate::store::EntityCollection;

const APP_CONFIG_PATH: &str = "api/bds/v1/app/config";
const COUNTRIES_PATH: &str = "api/bds/v1/app/countries";

pub struct PlatformService {
    api: Arc<ApiClient>,
    config: Arc<ConfigService>,
    countries: EntityCollection<Country>,
}

impl PlatformService {
    pub fn new(api: Arc<ApiClient>, config: Arc<ConfigService>) -> Self {
        Self {
            api,
            config,
            countries: EntityCollection::new(),
        }
    }

    /// Merge the backend's app configuration into the live document, then
    /// load the country list.
    pub async fn init(&self) -> Result<(), CoreError> {
        let remote = self
            .api
            .get::<Value>(APP_CONFIG_PATH, &RequestOptions::default())
            .await?
            .into_data();
        if remote.is_object() {
            self.config.merge_remote(&remote)?;
        }

        let countries = self
            .api
            .get::<Option<Vec<Country>>>(COUNTRIES_PATH, &RequestOptions::default())
            .await?
            .into_data()
            .unwrap_or_default();
        debug!(count = countries.len(), "countries loaded");
        self.countries.clear();
        for country in countries {
            let key = country_key(&country);
            self.countries.upsert(key, country);
        }
        Ok(())
    }

    /// Countries keyed by ISO-3 code (entity id when absent).
    pub fn countries(&self) -> &EntityCollection<Country> {
        &self.countries
    }
}

fn country_key(country: &Country) -> String {
    country
        .iso_code3
        .clone()
        .or_else(|| country.entity.id.clone())
        .or_else(|| country.name.clone())
        .unwrap_or_default()
}

/// `{id, type, displayName}` pointer to `entity`.
pub fn to_reference(entity: &BdsEntity) -> Reference {
    entity.to_reference()
}

pub fn to_references<'a>(entities: impl IntoIterator<Item = &'a BdsEntity>) -> Vec<Reference> {
    entities.into_iter().map(BdsEntity::to_reference).collect()
}
