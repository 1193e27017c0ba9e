// ── Social documents: chat channels, blogs, calendars and forums ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{Asset, BdsEntity, Reference, impl_entity};
use super::user::User;

/// Container of messages: chat channel, blog or calendar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageGroup {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Set locally when the hub reports unread messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_messages: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type Channel = MessageGroup;
pub type Blog = MessageGroup;
pub type Calendar = MessageGroup;

/// Fields shared by every message-like document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<Reference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub full_assets: Vec<Asset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<Box<MessageGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_asset: Option<Asset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlogPost {
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<Box<MessageGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalendarItem {
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<Box<MessageGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_stamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time_stamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_day: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened: Option<bool>,
}

// ── Forum ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Post {
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_to: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub star: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_popular: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_best: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Topic {
    #[serde(flatten)]
    pub group: MessageGroup,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_post: Option<Box<Post>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Thread {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_post: Option<Box<Post>>,
}

/// Chat participant with presence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SocUser {
    #[serde(flatten)]
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

impl_entity!(MessageGroup, MessageBody, Thread);

macro_rules! impl_message_entity {
    ($($ty:ty),+) => {
        $(impl super::Entity for $ty {
            fn entity(&self) -> &BdsEntity {
                &self.body.entity
            }
        })+
    };
}

impl_message_entity!(Message, BlogPost, CalendarItem, Post);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use serde_json::json;

    #[test]
    fn message_reads_body_and_group() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "content": "hello",
            "messageType": "TEXT",
            "relatedTo": {"key": "SOC.Channel|c1", "locked": true}
        }))
        .unwrap();
        assert_eq!(message.id(), Some("m1"));
        assert_eq!(message.body.content.as_deref(), Some("hello"));
        assert_eq!(message.related_to.unwrap().locked, Some(true));
    }

    #[test]
    fn calendar_item_parses_instants() {
        let item: CalendarItem = serde_json::from_value(json!({
            "title": "Standup",
            "start": "2024-03-04T09:00:00Z",
            "allDay": false
        }))
        .unwrap();
        assert_eq!(item.body.title.as_deref(), Some("Standup"));
        assert!(item.start.is_some());
        assert_eq!(item.all_day, Some(false));
    }

    #[test]
    fn soc_user_flattens_the_profile() {
        let user: SocUser =
            serde_json::from_value(json!({"id": "u1", "login": "ada", "online": true})).unwrap();
        assert_eq!(user.user.login.as_deref(), Some("ada"));
        assert_eq!(user.online, Some(true));
    }
}
