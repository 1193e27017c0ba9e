// Calendars and their items.

use std::sync::Arc;

use bds_api::{ApiClient, RequestOptions};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::CoreError;
use crate::model::CalendarItem;

const CALENDARS_PATH: &str = "api/soc/v1/calendars";
const ITEM_FILTERS: &str = "SOC.CalendarItem:key|id|meta|title|fullAvatar|startDate|endDate|allDay";

pub struct CalendarService {
    api: Arc<ApiClient>,
}

impl CalendarService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Items between `start` and `end`.
    pub async fn get_calendar_items(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CalendarItem>, CoreError> {
        let opts = RequestOptions::new()
            .filters([ITEM_FILTERS])
            .query("startDate", start.to_rfc3339_opts(SecondsFormat::Millis, true))
            .query("endDate", end.to_rfc3339_opts(SecondsFormat::Millis, true))
            .query("limit", limit);
        let path = format!("{CALENDARS_PATH}/{calendar_id}/items");
        let resp = self.api.get::<Option<Vec<CalendarItem>>>(&path, &opts).await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    pub async fn get_calendar_item(
        &self,
        calendar_id: &str,
        item_id: &str,
    ) -> Result<Option<CalendarItem>, CoreError> {
        let path = format!("{CALENDARS_PATH}/{calendar_id}/item/{item_id}");
        Ok(self.api.get(&path, &RequestOptions::default()).await?.into_data())
    }

    pub async fn put_calendar_item(
        &self,
        calendar_id: &str,
        item: &CalendarItem,
    ) -> Result<Option<CalendarItem>, CoreError> {
        let path = format!("{CALENDARS_PATH}/{calendar_id}/item");
        Ok(self.api.put(&path, item, &RequestOptions::default()).await?.into_data())
    }

    pub async fn update_calendar_item(
        &self,
        calendar_id: &str,
        item_id: &str,
        item: &CalendarItem,
    ) -> Result<Option<CalendarItem>, CoreError> {
        let path = format!("{CALENDARS_PATH}/{calendar_id}/item/{item_id}");
        Ok(self.api.post(&path, item, &RequestOptions::default()).await?.into_data())
    }

    pub async fn delete_calendar_item(
        &self,
        calendar_id: &str,
        item_id: &str,
    ) -> Result<(), CoreError> {
        let path = format!("{CALENDARS_PATH}/{calendar_id}/item/{item_id}");
        self.api.delete::<Value>(&path, &RequestOptions::default()).await?;
        Ok(())
    }
}
