// Full-text search across every entity type the app exposes.

use std::sync::Arc;

use bds_api::{ApiClient, RequestOptions};

use crate::error::CoreError;
use crate::model::{SearchEntityResponse, SearchRequest};

const SEARCH_PATH: &str = "api/bds/v1/search";

pub struct SearchService {
    api: Arc<ApiClient>,
}

impl SearchService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// One page of hits; follow `scroll_id` with [`SearchRequest::next_page`].
    pub async fn search_full_text(
        &self,
        request: &SearchRequest,
    ) -> Result<Option<SearchEntityResponse>, CoreError> {
        Ok(self
            .api
            .post(SEARCH_PATH, request, &RequestOptions::default())
            .await?
            .into_data())
    }
}
