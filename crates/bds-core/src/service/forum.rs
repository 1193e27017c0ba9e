// Forum topics, threads and posts.

use std::sync::Arc;

use bds_api::{ApiClient, RequestOptions};
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{Post, Thread, Topic};

const FORUM_PATH: &str = "api/soc/v1/forum";
const POST_FILTERS: &str = "SOC.BlogPost:key|id|meta|title|fullAvatar";

pub struct ForumService {
    api: Arc<ApiClient>,
}

impl ForumService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    // ── Topics and threads ───────────────────────────────────────────

    pub async fn get_topics(
        &self,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Topic>, CoreError> {
        let opts = RequestOptions::new().paged(limit, scroll_id);
        let path = format!("{FORUM_PATH}/topics");
        let resp = self.api.get::<Option<Vec<Topic>>>(&path, &opts).await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn get_topic(&self, topic_id: &str) -> Result<Option<Topic>, CoreError> {
        Ok(self
            .api
            .get(&format!("{FORUM_PATH}/topic/{topic_id}"), &RequestOptions::default())
            .await?
            .into_data())
    }

    pub async fn get_threads(
        &self,
        topic_id: &str,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Thread>, CoreError> {
        let resp = self
            .api
            .get::<Option<Vec<Thread>>>(
                &format!("{FORUM_PATH}/topic/{topic_id}/threads"),
                &RequestOptions::new().paged(limit, scroll_id),
            )
            .await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, CoreError> {
        Ok(self
            .api
            .get(&format!("{FORUM_PATH}/{thread_id}"), &RequestOptions::default())
            .await?
            .into_data())
    }

    // ── Posts ────────────────────────────────────────────────────────

    pub async fn get_posts(
        &self,
        thread_id: &str,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<Post>, CoreError> {
        let opts = RequestOptions::new().filters([POST_FILTERS]).paged(limit, scroll_id);
        let resp = self
            .api
            .get::<Option<Vec<Post>>>(&format!("{FORUM_PATH}/{thread_id}/posts"), &opts)
            .await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn get_post(
        &self,
        thread_id: &str,
        post_id: &str,
    ) -> Result<Option<Post>, CoreError> {
        let path = format!("{FORUM_PATH}/{thread_id}/post/{post_id}");
        Ok(self.api.get(&path, &RequestOptions::default()).await?.into_data())
    }

    pub async fn put_post(&self, thread_id: &str, post: &Post) -> Result<Option<Post>, CoreError> {
        Ok(self
            .api
            .put(&format!("{FORUM_PATH}/{thread_id}/post"), post, &RequestOptions::default())
            .await?
            .into_data())
    }

    pub async fn update_post(
        &self,
        thread_id: &str,
        post_id: &str,
        post: &Post,
    ) -> Result<Option<Post>, CoreError> {
        let path = format!("{FORUM_PATH}/{thread_id}/post/{post_id}");
        Ok(self.api.post(&path, post, &RequestOptions::default()).await?.into_data())
    }

    pub async fn delete_post(&self, thread_id: &str, post_id: &str) -> Result<(), CoreError> {
        let path = format!("{FORUM_PATH}/{thread_id}/post/{post_id}");
        self.api.delete::<Value>(&path, &RequestOptions::default()).await?;
        Ok(())
    }
}
