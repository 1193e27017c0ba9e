// Blogs and their posts.

use std::sync::Arc;

use bds_api::{ApiClient, RequestOptions};
use serde_json::Value;

use crate::error::CoreError;
use crate::model::{Blog, BlogPost};

const BLOGS_PATH: &str = "api/soc/v1/blogs";
const POST_FILTERS: &str = "SOC.BlogPost:key|id|meta|title|fullAvatar";

pub struct BlogService {
    api: Arc<ApiClient>,
}

impl BlogService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn get_blog(&self, blog_id: &str) -> Result<Option<Blog>, CoreError> {
        Ok(self
            .api
            .get(&format!("{BLOGS_PATH}/{blog_id}"), &RequestOptions::default())
            .await?
            .into_data())
    }

    /// Post summaries; `draft` selects unpublished posts.
    pub async fn get_blog_posts(
        &self,
        blog_id: &str,
        draft: bool,
        limit: u32,
        scroll_id: Option<&str>,
    ) -> Result<Vec<BlogPost>, CoreError> {
        let opts = RequestOptions::new()
            .filters([POST_FILTERS])
            .query("draft", draft)
            .paged(limit, scroll_id);
        let resp = self
            .api
            .get::<Option<Vec<BlogPost>>>(&format!("{BLOGS_PATH}/{blog_id}/posts"), &opts)
            .await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn get_blog_post(
        &self,
        blog_id: &str,
        post_id: &str,
    ) -> Result<Option<BlogPost>, CoreError> {
        let path = format!("{BLOGS_PATH}/{blog_id}/post/{post_id}");
        Ok(self.api.get(&path, &RequestOptions::default()).await?.into_data())
    }

    pub async fn put_blog_post(
        &self,
        blog_id: &str,
        post: &BlogPost,
    ) -> Result<Option<BlogPost>, CoreError> {
        let path = format!("{BLOGS_PATH}/{blog_id}/post");
        Ok(self.api.put(&path, post, &RequestOptions::default()).await?.into_data())
    }

    pub async fn update_blog_post(
        &self,
        blog_id: &str,
        post_id: &str,
        post: &BlogPost,
    ) -> Result<Option<BlogPost>, CoreError> {
        let path = format!("{BLOGS_PATH}/{blog_id}/post/{post_id}");
        Ok(self.api.post(&path, post, &RequestOptions::default()).await?.into_data())
    }

    pub async fn delete_blog_post(&self, blog_id: &str, post_id: &str) -> Result<(), CoreError> {
        let path = format!("{BLOGS_PATH}/{blog_id}/post/{post_id}");
        self.api.delete::<Value>(&path, &RequestOptions::default()).await?;
        Ok(())
    }
}
