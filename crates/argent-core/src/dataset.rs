//! Dataset descriptors: the single validated configuration value for one
//! curated dataset.
//!
//! A descriptor is constructed once at the job boundary, validated with
//! [`DatasetDescriptor::validate`] before any I/O, and passed explicitly to
//! every component. There is no ambient configuration lookup anywhere in
//! the engine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What kind of thing a dataset's rows describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Immutable facts that happened at a point in time.
    Event,
    /// Mutable state observed over time.
    State,
    /// Events derived from other curated datasets.
    DerivedEvent,
    /// State derived from other curated datasets.
    DerivedState,
}

impl EntityKind {
    /// Returns true for event-like kinds.
    #[must_use]
    pub const fn is_event_like(self) -> bool {
        matches!(self, Self::Event | Self::DerivedEvent)
    }

    /// Returns true for state-like kinds.
    #[must_use]
    pub const fn is_state_like(self) -> bool {
        matches!(self, Self::State | Self::DerivedState)
    }
}

/// How much history the curated output retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// No merge semantics: output mirrors the load.
    None,
    /// Overwrite-only current state (SCD Type 1).
    Scd1,
    /// Full history with effective intervals (SCD Type 2).
    Scd2,
    /// Deduplicated current state, no interval tracking.
    LatestOnly,
}

impl HistoryMode {
    /// Returns true for modes whose output is a current-state-only
    /// projection.
    ///
    /// These outputs must never be partitioned by record time: doing so
    /// makes "what is the current value" require a max-date subquery and
    /// can make "what was true on date X" return nothing once the value is
    /// overwritten out of that partition.
    #[must_use]
    pub const fn is_current_state_only(self) -> bool {
        matches!(self, Self::Scd1 | Self::LatestOnly)
    }
}

/// The five curated transformation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CuratedModel {
    /// Identity passthrough; overwrites the prior artifact at that
    /// `load_date` only.
    PeriodicSnapshot,
    /// Passthrough delta tagged with `load_date`; downstream applies the
    /// merge.
    IncrementalMerge,
    /// Union with prior state, then keep the newest row per business key.
    FullMergeDedupe,
    /// Same reduction as `FullMergeDedupe`, output is always a full
    /// current-state-only snapshot.
    ScdType1,
    /// Per-key open/close state machine emitting a full effective-interval
    /// timeline.
    ScdType2,
}

impl CuratedModel {
    /// Returns true if the model reduces per business key.
    #[must_use]
    pub const fn requires_business_keys(self) -> bool {
        matches!(self, Self::FullMergeDedupe | Self::ScdType1 | Self::ScdType2)
    }

    /// Returns true if the model orders rows by the order column.
    #[must_use]
    pub const fn requires_order_column(self) -> bool {
        self.requires_business_keys()
    }

    /// Returns true if the model consumes the prior current-state snapshot.
    #[must_use]
    pub const fn reads_prior_state(self) -> bool {
        self.requires_business_keys()
    }

    /// The history mode each model's output implies.
    #[must_use]
    pub const fn implied_history_mode(self) -> HistoryMode {
        match self {
            Self::PeriodicSnapshot | Self::IncrementalMerge => HistoryMode::None,
            Self::FullMergeDedupe => HistoryMode::LatestOnly,
            Self::ScdType1 => HistoryMode::Scd1,
            Self::ScdType2 => HistoryMode::Scd2,
        }
    }

    /// Stable snake_case name, matching the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PeriodicSnapshot => "periodic_snapshot",
            Self::IncrementalMerge => "incremental_merge",
            Self::FullMergeDedupe => "full_merge_dedupe",
            Self::ScdType1 => "scd_type_1",
            Self::ScdType2 => "scd_type_2",
        }
    }
}

impl std::fmt::Display for CuratedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CuratedModel {
    type Err = Error;

    /// Parses a model name, accepting the short aliases that appear in
    /// older dataset configurations.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "periodic_snapshot" | "periodic" => Ok(Self::PeriodicSnapshot),
            "incremental_merge" | "incremental" => Ok(Self::IncrementalMerge),
            "full_merge_dedupe" | "full_merge" => Ok(Self::FullMergeDedupe),
            "scd_type_1" | "scd1" => Ok(Self::ScdType1),
            "scd_type_2" | "scd2" => Ok(Self::ScdType2),
            other => Err(Error::InvalidInput(format!(
                "unknown curated model: {other}"
            ))),
        }
    }
}

/// Schema-evolution policy applied to each incoming batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPolicy {
    /// Reject any type mismatch or missing expected column.
    #[default]
    Strict,
    /// Accept new columns (bumping the profile version) and null-backfill
    /// missing nullable columns; reject narrowing changes.
    Lenient,
    /// Best-effort value coercion before falling back to lenient rules.
    /// Every coercion is logged.
    Auto,
}

/// Bad-record thresholds for the error policy.
///
/// Comparison is strictly-greater-than: at exactly the threshold the
/// partition still succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorThresholds {
    /// Maximum number of quarantined rows per partition.
    pub max_bad_records: Option<u64>,
    /// Maximum quarantined percentage (0.0–100.0) per partition.
    pub max_bad_percent: Option<f64>,
}

/// What to do when a row fails validation or merge-time coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMode {
    /// Quarantine bad rows and continue while thresholds hold.
    #[default]
    ContinueOnError,
    /// The first bad row aborts the partition.
    FailFast,
}

/// Chunked-writer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOptions {
    /// Rows held per in-flight partition buffer before a flush.
    pub max_rows_per_chunk: usize,
    /// Rows per artifact file; larger partitions split into sequentially
    /// numbered files.
    pub max_rows_per_artifact: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_rows_per_chunk: 50_000,
            max_rows_per_artifact: 250_000,
        }
    }
}

/// The validated configuration for one curated dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Business domain the dataset belongs to.
    pub domain: String,
    /// Entity name within the domain.
    pub entity: String,
    /// Dataset schema version (the `v{N}` path segment).
    pub schema_version: u32,
    /// Load pattern identifier (e.g. `full`, `incremental`).
    pub pattern: String,
    /// Whether the pattern appears as a path segment.
    pub include_pattern_segment: bool,
    /// What the rows describe.
    pub entity_kind: EntityKind,
    /// How much history the output retains.
    pub history_mode: HistoryMode,
    /// The curated transformation model.
    pub model: CuratedModel,
    /// Ordered business-key columns (required for state models).
    pub business_keys: Vec<String>,
    /// Monotonic recency column (required for dedupe/SCD models).
    pub order_column: Option<String>,
    /// Record-time partition key names, outermost first. Must be empty for
    /// current-state-only outputs.
    pub partition_by: Vec<String>,
    /// Source column record-time partition values are derived from.
    pub record_time_column: Option<String>,
    /// Schema-evolution policy.
    pub schema_policy: SchemaPolicy,
    /// Bad-record thresholds.
    pub error_thresholds: ErrorThresholds,
    /// Bad-row handling mode.
    pub quality_mode: QualityMode,
    /// Abort the whole load on the first failed partition.
    pub abort_load_on_partition_failure: bool,
    /// Writer buffering configuration.
    pub writer: WriterOptions,
    /// Require and verify the Bronze checksum manifest before promotion.
    pub require_checksum: bool,
    /// Treat absent Bronze partitions as an empty load instead of an error.
    pub allow_empty_load: bool,
    /// Source Bronze system name.
    pub source_system: String,
    /// Source Bronze table name.
    pub source_table: String,
}

impl DatasetDescriptor {
    /// Validates the descriptor.
    ///
    /// Called once at the job boundary, before any I/O. Every violation is
    /// a [`Error::Configuration`] naming the offending field.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` on the first contradiction found.
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(Error::configuration("domain", "must not be empty"));
        }
        if self.entity.is_empty() {
            return Err(Error::configuration("entity", "must not be empty"));
        }
        if self.schema_version == 0 {
            return Err(Error::configuration("schema_version", "must be >= 1"));
        }

        if self.model.requires_business_keys() && self.business_keys.is_empty() {
            return Err(Error::configuration(
                "business_keys",
                format!("model {} requires at least one business key", self.model),
            ));
        }
        if self.model.requires_order_column() && self.order_column.is_none() {
            return Err(Error::configuration(
                "order_column",
                format!("model {} requires an order column", self.model),
            ));
        }
        if let Some(order_column) = &self.order_column {
            if self.business_keys.contains(order_column) {
                return Err(Error::configuration(
                    "order_column",
                    format!("`{order_column}` cannot also be a business key"),
                ));
            }
        }

        if self.history_mode != self.model.implied_history_mode() {
            return Err(Error::configuration(
                "history_mode",
                format!(
                    "model {} implies history_mode {:?}, got {:?}",
                    self.model,
                    self.model.implied_history_mode(),
                    self.history_mode
                ),
            ));
        }

        // Current-state-only outputs must not be partitioned by record time.
        if self.history_mode.is_current_state_only() && !self.partition_by.is_empty() {
            return Err(Error::configuration(
                "partition_by",
                format!(
                    "history_mode {:?} produces a current-state-only output; \
                     record-time partitioning would break current-value queries \
                     (remove partition_by: {:?})",
                    self.history_mode, self.partition_by
                ),
            ));
        }

        if !self.partition_by.is_empty() && self.record_time_column.is_none() {
            return Err(Error::configuration(
                "record_time_column",
                "partition_by is set but no record-time source column is configured",
            ));
        }

        if let Some(percent) = self.error_thresholds.max_bad_percent {
            if !(0.0..=100.0).contains(&percent) {
                return Err(Error::configuration(
                    "error_thresholds.max_bad_percent",
                    format!("must be within 0.0–100.0, got {percent}"),
                ));
            }
        }

        if self.writer.max_rows_per_chunk == 0 {
            return Err(Error::configuration(
                "writer.max_rows_per_chunk",
                "must be >= 1",
            ));
        }
        if self.writer.max_rows_per_artifact == 0 {
            return Err(Error::configuration(
                "writer.max_rows_per_artifact",
                "must be >= 1",
            ));
        }

        Ok(())
    }

    /// The record-time partition key resolved for this dataset, if any.
    ///
    /// Explicit `partition_by` wins; otherwise event-history outputs derive
    /// `{record_time_column}_dt`. Current-state-only outputs never have one.
    #[must_use]
    pub fn record_time_key(&self) -> Option<String> {
        if self.history_mode.is_current_state_only() {
            return None;
        }
        if let Some(first) = self.partition_by.first() {
            return Some(first.clone());
        }
        match self.history_mode {
            HistoryMode::Scd2 => Some("effective_from_dt".to_string()),
            HistoryMode::None => self
                .record_time_column
                .as_ref()
                .map(|column| format!("{column}_dt")),
            HistoryMode::Scd1 | HistoryMode::LatestOnly => None,
        }
    }
}
