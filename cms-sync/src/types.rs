use serde::Serialize;

pub type Slug = String;

/// An item as listed by the content source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentItem {
    pub external_id: String,
    pub slug: Option<Slug>,
    pub title: String,
}

impl ContentItem {
    pub fn new<I, S, T>(external_id: I, slug: Option<S>, title: T) -> Self
    where
        I: Into<String>,
        S: Into<String>,
        T: Into<String>,
    {
        ContentItem {
            external_id: external_id.into(),
            slug: slug.map(Into::into),
            title: title.into(),
        }
    }

    /// Drops items without a usable slug; they cannot be joined against records.
    pub fn normalize(&self) -> Option<SourceItem> {
        let slug = self.slug.as_deref().filter(|s| !s.is_empty())?;
        Some(SourceItem {
            slug: slug.to_string(),
            title: self.title.clone(),
            external_id: self.external_id.clone(),
        })
    }
}

/// A content item that has a slug.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceItem {
    pub slug: Slug,
    pub title: String,
    pub external_id: String,
}

/// A view-count record held by the record store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedRecord {
    pub record_id: String,
    pub slug: Option<Slug>,
    pub title: String,
    pub view_count: u64,
    /// Superseding counter. Older records do not carry it.
    pub total_views: Option<u64>,
    pub old_views: u64,
}

impl TrackedRecord {
    /// Falls back to `view_count` when the stored total is absent or zero.
    ///
    /// A stored zero is indistinguishable from a record that predates the
    /// field, so both read as the legacy counter.
    pub fn total_views(&self) -> u64 {
        match self.total_views {
            Some(total) if total > 0 => total,
            _ => self.view_count,
        }
    }
}

/// Field map for a record about to be created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewRecord {
    pub slug: Slug,
    pub title: String,
    pub view_count: u64,
    pub old_views: u64,
}

impl From<&SourceItem> for NewRecord {
    fn from(item: &SourceItem) -> Self {
        NewRecord {
            slug: item.slug.clone(),
            title: item.title.clone(),
            view_count: 0,
            old_views: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedEntry {
    pub slug: Slug,
    pub title: String,
    pub record_id: String,
    pub external_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedEntry {
    pub slug: Slug,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total_content_items: usize,
    pub total_records: usize,
    pub missing: usize,
    pub created_count: usize,
    pub error_count: usize,
}

/// Outcome of a sync run that managed to read both sources.
///
/// Batch write failures are listed in `errors` but do not turn `success` off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub synced: usize,
    pub created: Vec<CreatedEntry>,
    pub errors: Vec<FailedEntry>,
    pub stats: SyncStats,
}

impl SyncReport {
    pub fn up_to_date(total_content_items: usize, total_records: usize) -> Self {
        SyncReport {
            success: true,
            message: "All content items already exist in the record store".to_string(),
            synced: 0,
            created: Vec::new(),
            errors: Vec::new(),
            stats: SyncStats {
                total_content_items,
                total_records,
                ..SyncStats::default()
            },
        }
    }

    pub fn completed(
        created: Vec<CreatedEntry>,
        errors: Vec<FailedEntry>,
        total_content_items: usize,
        total_records: usize,
        missing: usize,
    ) -> Self {
        SyncReport {
            success: true,
            message: format!(
                "Sync completed: {} created, {} errors",
                created.len(),
                errors.len()
            ),
            synced: created.len(),
            stats: SyncStats {
                total_content_items,
                total_records,
                missing,
                created_count: created.len(),
                error_count: errors.len(),
            },
            created,
            errors,
        }
    }
}

/// One row of the count listing served to the front end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViewCount {
    pub slug: Option<Slug>,
    pub view_count: u64,
    pub total_views: u64,
    pub title: String,
    pub old_views: u64,
}

impl From<&TrackedRecord> for ViewCount {
    fn from(record: &TrackedRecord) -> Self {
        ViewCount {
            slug: record.slug.clone(),
            view_count: record.view_count,
            total_views: record.total_views(),
            title: record.title.clone(),
            old_views: record.old_views,
        }
    }
}
