use crate::content_source::ContentSource;
use crate::errors::UpstreamError;
use crate::record_store::RecordStore;
use crate::types::{ContentItem, NewRecord, TrackedRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

pub fn item(slug: &str) -> ContentItem {
    ContentItem::new(format!("wf-{slug}"), Some(slug), format!("Title {slug}"))
}

pub fn items(count: usize) -> Vec<ContentItem> {
    (0..count).map(|i| item(&format!("post-{i}"))).collect()
}

pub fn record(slug: &str, view_count: u64) -> TrackedRecord {
    TrackedRecord {
        record_id: format!("rec-{slug}"),
        slug: Some(slug.to_string()),
        title: format!("Title {slug}"),
        view_count,
        total_views: None,
        old_views: 0,
    }
}

fn unavailable() -> UpstreamError {
    UpstreamError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "unavailable".into(),
    }
}

#[derive(Default)]
pub struct FakeContentSource {
    items: Mutex<Vec<ContentItem>>,
    fail: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeContentSource {
    pub fn new(items: Vec<ContentItem>) -> Self {
        FakeContentSource {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        let source = FakeContentSource::default();
        source.fail.store(true, Ordering::Relaxed);
        source
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ContentSource for FakeContentSource {
    async fn list_items(&self) -> Result<Vec<ContentItem>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::Relaxed) {
            return Err(unavailable());
        }
        Ok(self.items.lock().clone())
    }
}

/// In-memory record store. Created records get sequential ids.
#[derive(Default)]
pub struct FakeRecordStore {
    records: Mutex<Vec<TrackedRecord>>,
    create_calls: Mutex<Vec<(Instant, usize)>>,
    failing_batches: HashSet<usize>,
    fail_list: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeRecordStore {
    pub fn new(records: Vec<TrackedRecord>) -> Self {
        FakeRecordStore {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    /// Create calls with these zero-based indices fail.
    pub fn with_failing_batches(mut self, batches: impl IntoIterator<Item = usize>) -> Self {
        self.failing_batches = batches.into_iter().collect();
        self
    }

    pub fn set_list_failing(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::Relaxed);
    }

    pub fn records(&self) -> Vec<TrackedRecord> {
        self.records.lock().clone()
    }

    pub fn create_calls(&self) -> Vec<(Instant, usize)> {
        self.create_calls.lock().clone()
    }

    pub fn created_slugs(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.record_id.starts_with("recNew"))
            .filter_map(|r| r.slug.clone())
            .collect()
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn list_records(&self) -> Result<Vec<TrackedRecord>, UpstreamError> {
        if self.fail_list.load(Ordering::Relaxed) {
            return Err(unavailable());
        }
        Ok(self.records.lock().clone())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<TrackedRecord>, UpstreamError> {
        if self.fail_list.load(Ordering::Relaxed) {
            return Err(unavailable());
        }
        Ok(self
            .records
            .lock()
            .iter()
            .find(|r| r.slug.as_deref() == Some(slug))
            .cloned())
    }

    async fn create_records(
        &self,
        records: &[NewRecord],
    ) -> Result<Vec<TrackedRecord>, UpstreamError> {
        let batch_index = {
            let mut calls = self.create_calls.lock();
            calls.push((Instant::now(), records.len()));
            calls.len() - 1
        };

        if self.failing_batches.contains(&batch_index) {
            return Err(UpstreamError::Status {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                body: "INVALID_RECORDS".into(),
            });
        }

        let created: Vec<TrackedRecord> = records
            .iter()
            .map(|new_record| TrackedRecord {
                record_id: format!("recNew{}", self.next_id.fetch_add(1, Ordering::Relaxed)),
                slug: Some(new_record.slug.clone()),
                title: new_record.title.clone(),
                view_count: new_record.view_count,
                total_views: None,
                old_views: new_record.old_views,
            })
            .collect();

        self.records.lock().extend(created.iter().cloned());
        Ok(created)
    }
}
