// ── Entity metadata shared by every backend document ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lightweight pointer to another entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Who did something, and when.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by: Option<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    /// Opaque concurrency token, echoed back on updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cas: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<UserEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<UserEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Reference>,
}

/// Identity block carried by every document (flattened into each model).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BdsEntity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl BdsEntity {
    /// `{id, type, displayName}` pointer to this entity.
    pub fn to_reference(&self) -> Reference {
        Reference {
            id: self.id.clone(),
            kind: self.kind.clone(),
            display_name: self.display_name.clone(),
            ..Reference::default()
        }
    }
}

/// Uploaded file or image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Asset {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Implemented by models that embed a [`BdsEntity`].
pub trait Entity {
    fn entity(&self) -> &BdsEntity;

    fn id(&self) -> Option<&str> {
        self.entity().id.as_deref()
    }

    fn key(&self) -> Option<&str> {
        self.entity().key.as_deref()
    }
}

/// Implement [`Entity`] for structs with an `entity: BdsEntity` field.
macro_rules! impl_entity {
    ($($ty:ty),+ $(,)?) => {
        $(impl $crate::model::Entity for $ty {
            fn entity(&self) -> &$crate::model::BdsEntity {
                &self.entity
            }
        })+
    };
}

pub(crate) use impl_entity;

impl_entity!(Asset);
