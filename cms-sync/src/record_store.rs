use crate::config::RecordStoreConfig;
use crate::errors::UpstreamError;
use crate::types::{NewRecord, TrackedRecord};
use crate::upstream::{
    RETRIABLE_READ_STATUS_CODES, RETRIABLE_WRITE_STATUS_CODES, RetryPolicy, send_with_retry,
};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use url::Url;

/// Table of view-count records keyed by slug.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Full scan of the table.
    async fn list_records(&self) -> Result<Vec<TrackedRecord>, UpstreamError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<TrackedRecord>, UpstreamError>;

    /// Creates up to `MAX_BATCH_SIZE` records in one call. The created
    /// records are returned in request order.
    async fn create_records(
        &self,
        records: &[NewRecord],
    ) -> Result<Vec<TrackedRecord>, UpstreamError>;
}

/// Counters are plain numbers, but the store may hand them back as floats,
/// or as an error object when a formula field fails. Anything that is not
/// a non-negative number reads as unset.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        _ => None,
    })
}

#[derive(Deserialize, Default)]
struct RecordFields {
    slug: Option<String>,
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    view_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    total_views: Option<u64>,
    #[serde(default, deserialize_with = "lenient_count")]
    old_views: Option<u64>,
}

#[derive(Deserialize)]
struct StoredRecord {
    id: String,
    #[serde(default)]
    fields: RecordFields,
}

impl From<StoredRecord> for TrackedRecord {
    fn from(record: StoredRecord) -> Self {
        let fields = record.fields;
        TrackedRecord {
            record_id: record.id,
            slug: fields.slug.filter(|s| !s.is_empty()),
            title: fields.title.unwrap_or_default(),
            view_count: fields.view_count.unwrap_or(0),
            total_views: fields.total_views,
            old_views: fields.old_views.unwrap_or(0),
        }
    }
}

#[derive(Deserialize)]
struct RecordsPage {
    #[serde(default)]
    records: Vec<StoredRecord>,
    offset: Option<String>,
}

#[derive(Serialize)]
struct CreateEntry<'a> {
    fields: &'a NewRecord,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    records: Vec<CreateEntry<'a>>,
}

/// Quotes a value for use inside a single-quoted formula string.
fn escape_formula_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Talks to an Airtable-style table over its REST API.
pub struct AirtableRecordStore {
    client: reqwest::Client,
    table_url: Url,
    api_key: String,
    retry: RetryPolicy,
}

impl AirtableRecordStore {
    pub fn new(config: &RecordStoreConfig) -> Result<Self, UpstreamError> {
        let mut table_url = config.base_url.clone();
        table_url
            .path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(config.base_url.to_string()))?
            .pop_if_empty()
            .extend([
                "v0",
                config.base_id.as_str(),
                config.table_name.as_str(),
            ]);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(AirtableRecordStore {
            client,
            table_url,
            api_key: config.api_key.clone(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_page(&self, url: &Url) -> Result<RecordsPage, UpstreamError> {
        let response = send_with_retry(self.retry, RETRIABLE_READ_STATUS_CODES, || {
            self.client.get(url.clone()).bearer_auth(&self.api_key)
        })
        .await?;

        Ok(response.json::<RecordsPage>().await?)
    }
}

#[async_trait]
impl RecordStore for AirtableRecordStore {
    async fn list_records(&self) -> Result<Vec<TrackedRecord>, UpstreamError> {
        let mut records = Vec::new();
        let mut next_offset: Option<String> = None;
        let mut page_fetches = 0;

        loop {
            let mut url = self.table_url.clone();
            if let Some(ref offset) = next_offset {
                url.query_pairs_mut().append_pair("offset", offset);
            }

            let page = self.fetch_page(&url).await?;
            page_fetches += 1;
            records.extend(page.records.into_iter().map(TrackedRecord::from));

            match page.offset {
                Some(offset) => next_offset = Some(offset),
                None => break,
            }
        }

        tracing::debug!(page_fetches, records = records.len(), "Fetched records");
        Ok(records)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<TrackedRecord>, UpstreamError> {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair(
                "filterByFormula",
                &format!("{{slug}} = '{}'", escape_formula_value(slug)),
            )
            .append_pair("maxRecords", "1");

        let page = self.fetch_page(&url).await?;
        Ok(page.records.into_iter().next().map(TrackedRecord::from))
    }

    async fn create_records(
        &self,
        records: &[NewRecord],
    ) -> Result<Vec<TrackedRecord>, UpstreamError> {
        let request = CreateRequest {
            records: records.iter().map(|fields| CreateEntry { fields }).collect(),
        };

        let response = send_with_retry(self.retry, RETRIABLE_WRITE_STATUS_CODES, || {
            self.client
                .post(self.table_url.clone())
                .bearer_auth(&self.api_key)
                .json(&request)
        })
        .await?;

        let page = response.json::<RecordsPage>().await?;
        Ok(page.records.into_iter().map(TrackedRecord::from).collect())
    }
}
