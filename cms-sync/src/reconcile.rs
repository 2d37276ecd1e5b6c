use crate::config::{MAX_BATCH_SIZE, SyncConfig};
use crate::content_source::ContentSource;
use crate::errors::SyncError;
use crate::metrics_defs::{RECORD_CREATE_ERRORS, RECORDS_CREATED};
use crate::record_store::RecordStore;
use crate::types::{
    ContentItem, CreatedEntry, FailedEntry, NewRecord, SourceItem, SyncReport, TrackedRecord,
};
use shared::counter;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        SyncSettings {
            batch_size: config.batch_size.clamp(1, MAX_BATCH_SIZE),
            batch_delay: config.batch_delay(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings::from(&SyncConfig::default())
    }
}

/// Content items with a usable slug that have no record yet, in listing
/// order. A slug listed twice is only returned once.
pub fn missing_items(items: &[ContentItem], records: &[TrackedRecord]) -> Vec<SourceItem> {
    let existing: HashSet<&str> = records
        .iter()
        .filter_map(|r| r.slug.as_deref())
        .filter(|s| !s.is_empty())
        .collect();
    let mut queued: HashSet<String> = HashSet::new();

    items
        .iter()
        .filter_map(ContentItem::normalize)
        .filter(|item| !existing.contains(item.slug.as_str()))
        .filter(|item| queued.insert(item.slug.clone()))
        .collect()
}

/// Creates the records that the content source has and the record store lacks.
pub struct Reconciler {
    content: Arc<dyn ContentSource>,
    records: Arc<dyn RecordStore>,
    settings: SyncSettings,
}

impl Reconciler {
    pub fn new(
        content: Arc<dyn ContentSource>,
        records: Arc<dyn RecordStore>,
        settings: SyncSettings,
    ) -> Self {
        Reconciler {
            content,
            records,
            settings,
        }
    }

    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let items = self
            .content
            .list_items()
            .await
            .map_err(SyncError::ContentFetch)?;
        let records = self
            .records
            .list_records()
            .await
            .map_err(SyncError::RecordFetch)?;

        tracing::info!(
            content_items = items.len(),
            records = records.len(),
            "Fetched both sources"
        );

        let missing = missing_items(&items, &records);
        if missing.is_empty() {
            tracing::info!("All content items already have records");
            return Ok(SyncReport::up_to_date(items.len(), records.len()));
        }

        tracing::info!(missing = missing.len(), "Creating missing records");

        let mut created = Vec::new();
        let mut errors = Vec::new();

        for (index, batch) in missing.chunks(self.settings.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
            self.create_batch(index, batch, &mut created, &mut errors).await;
        }

        tracing::info!(
            created = created.len(),
            errors = errors.len(),
            "Sync completed"
        );

        Ok(SyncReport::completed(
            created,
            errors,
            items.len(),
            records.len(),
            missing.len(),
        ))
    }

    async fn create_batch(
        &self,
        index: usize,
        batch: &[SourceItem],
        created: &mut Vec<CreatedEntry>,
        errors: &mut Vec<FailedEntry>,
    ) {
        let new_records: Vec<NewRecord> = batch.iter().map(NewRecord::from).collect();

        match self.records.create_records(&new_records).await {
            Ok(stored) => {
                let stored_count = stored.len();
                for (item, record) in batch.iter().zip(stored) {
                    created.push(CreatedEntry {
                        slug: item.slug.clone(),
                        title: item.title.clone(),
                        record_id: record.record_id,
                        external_id: item.external_id.clone(),
                    });
                }
                let shortfall = batch.len().saturating_sub(stored_count);
                for item in batch.iter().skip(stored_count) {
                    errors.push(FailedEntry {
                        slug: item.slug.clone(),
                        error: "record store returned no record for this item".to_string(),
                    });
                }
                counter!(RECORDS_CREATED).increment((batch.len() - shortfall) as u64);
                if shortfall > 0 {
                    tracing::warn!(
                        batch = index,
                        shortfall,
                        "Record store returned fewer records than requested"
                    );
                    counter!(RECORD_CREATE_ERRORS).increment(shortfall as u64);
                }
                tracing::debug!(batch = index, size = batch.len(), "Created batch");
            }
            Err(err) => {
                tracing::error!(
                    batch = index,
                    size = batch.len(),
                    error = %err,
                    "Batch create failed"
                );
                counter!(RECORD_CREATE_ERRORS).increment(batch.len() as u64);
                let message = err.to_string();
                errors.extend(batch.iter().map(|item| FailedEntry {
                    slug: item.slug.clone(),
                    error: message.clone(),
                }));
            }
        }
    }
}
