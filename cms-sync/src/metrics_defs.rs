//! Metrics definitions for the sync service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SYNC_RUNS: MetricDef = MetricDef {
    name: "sync.runs",
    metric_type: MetricType::Counter,
    description: "Number of reconciliation runs, tagged by outcome",
};

pub const SYNC_ATTACHED: MetricDef = MetricDef {
    name: "sync.attached",
    metric_type: MetricType::Counter,
    description: "Number of sync requests served by an in-flight or settled run",
};

pub const SYNC_DURATION: MetricDef = MetricDef {
    name: "sync.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a reconciliation run in seconds",
};

pub const RECORDS_CREATED: MetricDef = MetricDef {
    name: "sync.records.created",
    metric_type: MetricType::Counter,
    description: "Number of records created in the record store",
};

pub const RECORD_CREATE_ERRORS: MetricDef = MetricDef {
    name: "sync.records.errors",
    metric_type: MetricType::Counter,
    description: "Number of records that failed to be created",
};

pub const SIGNATURE_REJECTED: MetricDef = MetricDef {
    name: "webhook.signature.rejected",
    metric_type: MetricType::Counter,
    description: "Number of webhook requests rejected for a bad signature",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "http.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to handle an inbound request in seconds, tagged by endpoint",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SYNC_RUNS,
    SYNC_ATTACHED,
    SYNC_DURATION,
    RECORDS_CREATED,
    RECORD_CREATE_ERRORS,
    SIGNATURE_REJECTED,
    REQUEST_DURATION,
];
