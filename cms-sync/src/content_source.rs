use crate::config::ContentSourceConfig;
use crate::errors::UpstreamError;
use crate::types::ContentItem;
use crate::upstream::{RETRIABLE_READ_STATUS_CODES, RetryPolicy, send_with_retry};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Read-only provider of content items.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Lists every item of the collection, in the source's order.
    async fn list_items(&self) -> Result<Vec<ContentItem>, UpstreamError>;
}

#[derive(Deserialize, Default)]
struct FieldData {
    slug: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct CollectionItem {
    id: String,
    #[serde(rename = "fieldData", default)]
    field_data: FieldData,
    slug: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct Pagination {
    total: u64,
}

#[derive(Deserialize)]
struct ItemsPage {
    #[serde(default)]
    items: Vec<CollectionItem>,
    pagination: Option<Pagination>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<CollectionItem> for ContentItem {
    fn from(item: CollectionItem) -> Self {
        // Field data wins; the top-level fields are the legacy location
        let slug = non_empty(item.field_data.slug).or(non_empty(item.slug));
        let title = non_empty(item.field_data.name)
            .or(non_empty(item.name))
            .unwrap_or_default();

        ContentItem {
            external_id: item.id,
            slug,
            title,
        }
    }
}

/// Lists the items of one CMS collection through the v2 REST API.
pub struct WebflowContentSource {
    client: reqwest::Client,
    items_url: Url,
    api_token: String,
    page_size: u32,
    retry: RetryPolicy,
}

impl WebflowContentSource {
    pub fn new(config: &ContentSourceConfig) -> Result<Self, UpstreamError> {
        let mut items_url = config.base_url.clone();
        items_url
            .path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(config.base_url.to_string()))?
            .pop_if_empty()
            .extend(["v2", "collections", config.collection_id.as_str(), "items"]);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(WebflowContentSource {
            client,
            items_url,
            api_token: config.api_token.clone(),
            page_size: config.page_size,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl ContentSource for WebflowContentSource {
    async fn list_items(&self) -> Result<Vec<ContentItem>, UpstreamError> {
        let mut items = Vec::new();
        let mut offset: u64 = 0;
        let mut page_fetches = 0;

        loop {
            let mut url = self.items_url.clone();
            url.query_pairs_mut()
                .append_pair("offset", &offset.to_string())
                .append_pair("limit", &self.page_size.to_string());

            let response = send_with_retry(self.retry, RETRIABLE_READ_STATUS_CODES, || {
                self.client
                    .get(url.clone())
                    .bearer_auth(&self.api_token)
                    .header(ACCEPT, "application/json")
            })
            .await?;

            let page = response.json::<ItemsPage>().await?;
            page_fetches += 1;

            let received = page.items.len() as u64;
            offset += received;
            items.extend(page.items.into_iter().map(ContentItem::from));

            // Without pagination metadata the first page is all there is
            match page.pagination {
                Some(pagination) if received > 0 && offset < pagination.total => continue,
                _ => break,
            }
        }

        tracing::debug!(page_fetches, items = items.len(), "Fetched content items");
        Ok(items)
    }
}
