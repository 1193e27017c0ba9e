// ── CMS content and content maps ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity::{BdsEntity, Reference, impl_entity};

/// How a content value is formatted. Picks the file extension for
/// Local/Remote content.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ContentType {
    #[default]
    Default,
    Html,
    Markdown,
}

impl ContentType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Html => "html",
            Self::Default => "txt",
        }
    }
}

/// A single CMS content document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Content {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    /// Sent as a string or a number depending on the backend version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<serde_json::Value>,
}

/// One entry of a group's content map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentMapItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

/// Stable ascending sort by `order`, missing orders counting as 0.
pub fn sort_content_map(map: &mut [ContentMapItem]) {
    map.sort_by_key(|item| item.order.unwrap_or(0));
}

impl_entity!(Content);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(name: &str, order: Option<i64>) -> ContentMapItem {
        ContentMapItem {
            name: Some(name.into()),
            order,
            ..ContentMapItem::default()
        }
    }

    #[test]
    fn missing_order_sorts_as_zero_and_keeps_position() {
        let mut map = vec![item("two", Some(2)), item("none", None), item("zero", Some(0))];
        sort_content_map(&mut map);
        let names: Vec<_> = map.iter().map(|i| i.name.as_deref().unwrap()).collect();
        assert_eq!(names, ["none", "zero", "two"]);
    }

    #[test]
    fn content_type_uses_upper_case_on_the_wire() {
        let parsed: ContentType = serde_json::from_str("\"MARKDOWN\"").unwrap();
        assert_eq!(parsed, ContentType::Markdown);
        assert_eq!(parsed.extension(), "md");
        assert_eq!(ContentType::Html.to_string(), "HTML");
    }
}
