// ── Chat channels over the shared hub ──
//
// Each channel the user belongs to is a subscription key on the hub. The
// server pushes `RefreshChats(key)` when new messages arrive and
// `UpdateChannel(key)` when the channel itself changed.

use std::sync::{Arc, RwLock, Weak};

use bds_api::{ApiClient, HubEvent, HubMultiplexer, RequestOptions};
use futures_util::Stream;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Channel, Message, SocUser};
use crate::store::EntityCollection;
use crate::stream::Snapshot;

const CHATS_PATH: &str = "api/soc/v1/chats";
const REFRESH_EVENT: &str = "RefreshChats";
const UPDATE_EVENT: &str = "UpdateChannel";
const EVENT_CHANNEL_SIZE: usize = 64;

/// Pushed channel activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// New messages arrived in the channel.
    Changed(String),
    /// The channel document was refetched.
    ChannelUpdated(String),
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Emoji catalogue: a file path or an absolute URL to a JSON array of
    /// `{char, group}`.
    pub emoji_path: Option<String>,
}

/// Emojis of one group; `char` is the group's first emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiGroup {
    pub char: String,
    pub emojis: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmojiEntry {
    char: String,
    #[serde(default)]
    group: String,
}

/// Group emojis by `group`, keeping first-appearance order.
pub fn group_emojis(entries: &[Value]) -> Vec<EmojiGroup> {
    let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
    for entry in entries {
        match EmojiEntry::deserialize(entry) {
            Ok(e) => groups.entry(e.group).or_default().push(e.char),
            Err(err) => debug!(error = %err, "skipping malformed emoji entry"),
        }
    }
    groups
        .into_values()
        .filter_map(|emojis| {
            Some(EmojiGroup {
                char: emojis.first()?.clone(),
                emojis,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct ChatService {
    inner: Arc<ChatInner>,
}

struct ChatInner {
    api: Arc<ApiClient>,
    hub: HubMultiplexer,
    options: ChatOptions,
    channel_keys: RwLock<Vec<String>>,
    channels: EntityCollection<Channel>,
    users: EntityCollection<SocUser>,
    emojis: watch::Sender<Arc<Vec<EmojiGroup>>>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatService {
    /// Build the service and register its hub listeners.
    pub fn new(api: Arc<ApiClient>, hub: HubMultiplexer, options: ChatOptions) -> Self {
        let (emojis, _) = watch::channel(Arc::new(Vec::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let inner = Arc::new(ChatInner {
            api,
            hub,
            options,
            channel_keys: RwLock::new(Vec::new()),
            channels: EntityCollection::new(),
            users: EntityCollection::new(),
            emojis,
            events,
        });
        Self::register(&inner);
        Self { inner }
    }

    fn register(inner: &Arc<ChatInner>) {
        let weak = Arc::downgrade(inner);
        inner.hub.on(REFRESH_EVENT, move |event: HubEvent| {
            let weak = Weak::clone(&weak);
            async move {
                if let (Some(inner), Some(key)) = (weak.upgrade(), event.str_arg(0)) {
                    Self { inner }.on_refresh_chats(key);
                }
                Ok(())
            }
        });

        let weak = Arc::downgrade(inner);
        inner.hub.on(UPDATE_EVENT, move |event: HubEvent| {
            let weak = Weak::clone(&weak);
            async move {
                if let (Some(inner), Some(key)) = (weak.upgrade(), event.str_arg(0)) {
                    Self { inner }.on_update_channel(key).await;
                }
                Ok(())
            }
        });
    }

    /// Load the emoji catalogue, if configured. Failures leave it empty.
    pub async fn init(&self) {
        let Some(path) = self.inner.options.emoji_path.as_deref() else {
            return;
        };
        match self.read_emoji_file(path).await {
            Ok(entries) => {
                let groups = group_emojis(&entries);
                debug!(groups = groups.len(), "emoji catalogue loaded");
                self.inner.emojis.send_replace(Arc::new(groups));
            }
            Err(e) => warn!(path, error = %e, "emoji catalogue unavailable"),
        }
    }

    async fn read_emoji_file(&self, path: &str) -> Result<Vec<Value>, CoreError> {
        let text = if url::Url::parse(path).is_ok() {
            let opts = RequestOptions::new().without_credentials().silent();
            self.inner.api.get_text(path, &opts).await?.into_data()
        } else {
            tokio::fs::read_to_string(path).await.map_err(|e| CoreError::Storage {
                message: format!("{path}: {e}"),
            })?
        };
        Ok(serde_json::from_str(&text)?)
    }

    // ── Store ────────────────────────────────────────────────────────

    pub fn channel_keys(&self) -> Vec<String> {
        self.inner.channel_keys.read().expect("channel key lock poisoned").clone()
    }

    pub fn channels(&self) -> &EntityCollection<Channel> {
        &self.inner.channels
    }

    /// Channel snapshots, one per store change from now on.
    pub fn channel_updates(&self) -> impl Stream<Item = Snapshot<Channel>> + Send + 'static {
        self.inner.channels.subscribe().updates()
    }

    /// Chat users, filled by the host.
    pub fn users(&self) -> &EntityCollection<SocUser> {
        &self.inner.users
    }

    pub fn emojis(&self) -> Arc<Vec<EmojiGroup>> {
        Arc::clone(&self.inner.emojis.borrow())
    }

    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// Cached channel, if any.
    pub fn get_chat(&self, channel_key: &str) -> Option<Arc<Channel>> {
        self.inner.channels.get(channel_key)
    }

    pub fn mark_channel_refreshed(&self, channel_key: &str) {
        self.inner.channels.modify(channel_key, |c| c.new_messages = Some(false));
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe every channel of the signed-in user.
    pub fn init_user(&self, channel_keys: Vec<String>) {
        for key in &channel_keys {
            self.inner.hub.subscribe(key.clone());
        }
        *self.inner.channel_keys.write().expect("channel key lock poisoned") = channel_keys;
    }

    /// Unsubscribe every channel and forget them.
    pub fn clear_user(&self) {
        let keys = std::mem::take(
            &mut *self.inner.channel_keys.write().expect("channel key lock poisoned"),
        );
        for key in &keys {
            self.inner.hub.unsubscribe(key);
        }
        self.inner.channels.clear();
    }

    fn on_refresh_chats(&self, channel_key: &str) {
        debug!(channel_key, "new chat messages");
        self.inner.channels.modify(channel_key, |c| c.new_messages = Some(true));
        let _ = self.inner.events.send(ChatEvent::Changed(channel_key.to_owned()));
    }

    async fn on_update_channel(&self, channel_key: &str) {
        match self.get_channel(channel_key, &RequestOptions::new().silent()).await {
            Ok(Some(channel)) => {
                self.inner.channels.upsert(channel_key, channel);
            }
            Ok(None) => {}
            Err(e) => warn!(channel_key, error = %e, "channel refresh failed"),
        }
        let _ = self.inner.events.send(ChatEvent::ChannelUpdated(channel_key.to_owned()));
    }

    // ── Remote operations ────────────────────────────────────────────

    pub async fn get_channel(
        &self,
        channel_id: &str,
        opts: &RequestOptions,
    ) -> Result<Option<Channel>, CoreError> {
        let resp = self
            .inner
            .api
            .get::<Option<Channel>>(&format!("{CHATS_PATH}/{channel_id}"), opts)
            .await?;
        Ok(resp.into_data())
    }

    pub async fn get_new_messages(
        &self,
        channel_id: &str,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Message>, CoreError> {
        self.messages(channel_id, "newmessages", limit, scroll_id).await
    }

    pub async fn get_old_messages(
        &self,
        channel_id: &str,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Message>, CoreError> {
        self.messages(channel_id, "oldmessages", limit, scroll_id).await
    }

    async fn messages(
        &self,
        channel_id: &str,
        direction: &str,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Message>, CoreError> {
        let resp = self
            .inner
            .api
            .get::<Option<Vec<Message>>>(
                &format!("{CHATS_PATH}/{channel_id}/{direction}"),
                &RequestOptions::new().paged(limit, scroll_id),
            )
            .await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn put_message(
        &self,
        channel_id: &str,
        message: &Message,
    ) -> Result<Option<Message>, CoreError> {
        let resp = self
            .inner
            .api
            .put::<Option<Message>, _>(
                &format!("{CHATS_PATH}/{channel_id}/message"),
                message,
                &RequestOptions::default(),
            )
            .await?;
        Ok(resp.into_data())
    }

    pub async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), CoreError> {
        self.inner
            .api
            .delete::<Value>(
                &format!("{CHATS_PATH}/{channel_id}/message/{message_id}"),
                &RequestOptions::default(),
            )
            .await?;
        Ok(())
    }

    pub async fn toggle_lock(&self, channel_id: &str) -> Result<Option<Channel>, CoreError> {
        let resp = self
            .inner
            .api
            .post::<Option<Channel>, _>(
                &format!("{CHATS_PATH}/{channel_id}/toggleLock"),
                &Value::Null,
                &RequestOptions::default(),
            )
            .await?;
        Ok(resp.into_data())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn emojis_group_in_first_appearance_order() {
        let entries = vec![
            json!({"char": "😀", "group": "Smileys"}),
            json!({"char": "🐶", "group": "Animals"}),
            json!({"char": "😁", "group": "Smileys"}),
            json!({"group": "Broken"}),
        ];
        assert_eq!(
            group_emojis(&entries),
            vec![
                EmojiGroup {
                    char: "😀".into(),
                    emojis: vec!["😀".into(), "😁".into()],
                },
                EmojiGroup {
                    char: "🐶".into(),
                    emojis: vec!["🐶".into()],
                },
            ]
        );
    }
}
