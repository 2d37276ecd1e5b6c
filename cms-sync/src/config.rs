use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Largest number of records the record store accepts in one create call.
pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Batch size must be between 1 and {MAX_BATCH_SIZE}, got {0}")]
    InvalidBatchSize(usize),

    #[error("Page size cannot be 0")]
    InvalidPageSize,

    #[error("Empty {0}")]
    EmptyField(&'static str),
}

/// Service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for the public API (sync webhook and count lookups)
    pub listener: Listener,
    /// Listener for health and readiness probes
    pub admin_listener: Listener,
    pub content_source: ContentSourceConfig,
    pub record_store: RecordStoreConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.content_source.validate()?;
        self.record_store.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// The CMS collection whose items are mirrored into the record store.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ContentSourceConfig {
    #[serde(default = "default_content_source_url")]
    pub base_url: Url,
    pub api_token: String,
    pub collection_id: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ContentSourceConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.collection_id.is_empty() {
            return Err(ValidationError::EmptyField("content_source.collection_id"));
        }
        if self.page_size == 0 {
            return Err(ValidationError::InvalidPageSize);
        }
        Ok(())
    }
}

/// The table holding one view-count record per slug.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RecordStoreConfig {
    #[serde(default = "default_record_store_url")]
    pub base_url: Url,
    pub api_key: String,
    pub base_id: String,
    pub table_name: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RecordStoreConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.base_id.is_empty() {
            return Err(ValidationError::EmptyField("record_store.base_id"));
        }
        if self.table_name.is_empty() {
            return Err(ValidationError::EmptyField("record_store.table_name"));
        }
        Ok(())
    }
}

/// What to do with a signed request when no secret is configured to check it.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingSecretPolicy {
    /// Log a misconfiguration warning and let the request through.
    #[default]
    Allow,
    /// Reject the request as unauthenticated.
    Reject,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WebhookConfig {
    /// Secrets tried for timestamp-composite signatures.
    #[serde(default)]
    pub secrets: Vec<String>,
    /// Secret used for raw-body signatures. Defaults to the first entry of `secrets`.
    #[serde(default)]
    pub raw_body_secret: Option<String>,
    #[serde(default)]
    pub missing_secret_policy: MissingSecretPolicy,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// How long a settled sync keeps absorbing new triggers.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between two consecutive create batches.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ValidationError::InvalidBatchSize(self.batch_size));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            debounce_ms: default_debounce_ms(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

fn default_content_source_url() -> Url {
    Url::parse("https://api.webflow.com").expect("static URL is valid")
}

fn default_record_store_url() -> Url {
    Url::parse("https://api.airtable.com").expect("static URL is valid")
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    200
}
