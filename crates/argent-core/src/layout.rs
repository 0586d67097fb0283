//! Canonical Bronze and Silver storage paths.
//!
//! This module is the single source of truth for layer paths. All
//! components construct paths through these types; no hardcoded folder
//! literals exist outside this module, and the key *names* themselves are
//! configuration, not constants.
//!
//! # Path Layout
//!
//! ```text
//! Bronze:  system={system}/table={table}/pattern={pattern}/dt={date}/
//!          ├── *.jsonl                  # raw record batches
//!          └── _checksums.json          # checksum manifest
//!
//! Silver:  domain={domain}/entity={entity}/v{N}/[pattern={pattern}/]
//!          └── load_date={date}/
//!              ├── [record_time_key={value}/]part-00000.jsonl
//!              ├── _state/current.jsonl     # merge-model state snapshot
//!              ├── _quarantine/bad-rows.jsonl
//!              └── load.metadata.json
//! ```
//!
//! The record-time segment is present only for history-bearing outputs;
//! current-state-only outputs (`scd1`, `latest_only`) are written directly
//! under the `load_date` segment.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dataset::DatasetDescriptor;

/// Configured key names for Bronze partition paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BronzePathKeys {
    /// Key for the source system segment.
    pub system_key: String,
    /// Key for the source table segment.
    pub entity_key: String,
    /// Key for the load-pattern segment.
    pub pattern_key: String,
    /// Key for the extraction-date segment.
    pub date_key: String,
}

impl Default for BronzePathKeys {
    fn default() -> Self {
        Self {
            system_key: "system".into(),
            entity_key: "table".into(),
            pattern_key: "pattern".into(),
            date_key: "dt".into(),
        }
    }
}

/// Configured key names for Silver partition paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilverPathKeys {
    /// Key for the domain segment.
    pub domain_key: String,
    /// Key for the entity segment.
    pub entity_key: String,
    /// Prefix for the schema-version segment (`v{N}`, no `=`).
    pub version_key: String,
    /// Key for the optional pattern segment.
    pub pattern_key: String,
    /// Key for the load-date segment.
    pub load_date_key: String,
}

impl Default for SilverPathKeys {
    fn default() -> Self {
        Self {
            domain_key: "domain".into(),
            entity_key: "entity".into(),
            version_key: "v".into(),
            pattern_key: "pattern".into(),
            load_date_key: "load_date".into(),
        }
    }
}

/// Reference to one Bronze input partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BronzePartitionRef {
    /// Source system name.
    pub system: String,
    /// Source table name.
    pub table: String,
    /// Load pattern the extraction ran under.
    pub pattern: String,
    /// Extraction date of the partition.
    pub extraction_date: NaiveDate,
    /// Key names used to build the path.
    pub keys: BronzePathKeys,
}

/// Name of the Bronze checksum manifest within a partition.
pub const CHECKSUM_MANIFEST_NAME: &str = "_checksums.json";

impl BronzePartitionRef {
    /// Builds a reference for the descriptor's source at `extraction_date`.
    #[must_use]
    pub fn for_dataset(
        descriptor: &DatasetDescriptor,
        keys: BronzePathKeys,
        extraction_date: NaiveDate,
    ) -> Self {
        Self {
            system: descriptor.source_system.clone(),
            table: descriptor.source_table.clone(),
            pattern: descriptor.pattern.clone(),
            extraction_date,
            keys,
        }
    }

    /// The partition prefix, with a trailing slash.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!(
            "{}={}/{}={}/{}={}/{}={}/",
            self.keys.system_key,
            self.system,
            self.keys.entity_key,
            self.table,
            self.keys.pattern_key,
            self.pattern,
            self.keys.date_key,
            self.extraction_date,
        )
    }

    /// Path of a named artifact within the partition.
    #[must_use]
    pub fn artifact_path(&self, name: &str) -> String {
        format!("{}{name}", self.prefix())
    }

    /// Path of the checksum manifest.
    #[must_use]
    pub fn manifest_path(&self) -> String {
        self.artifact_path(CHECKSUM_MANIFEST_NAME)
    }
}

/// Checksum manifest written alongside Bronze artifacts.
///
/// Maps artifact name → `sha256:<hex>` digest of the artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChecksumManifest {
    /// Artifact name → checksum.
    pub files: BTreeMap<String, String>,
}

impl ChecksumManifest {
    /// Artifact names in manifest order, excluding the manifest itself.
    pub fn artifact_names(&self) -> impl Iterator<Item = &String> {
        self.files
            .keys()
            .filter(|name| name.as_str() != CHECKSUM_MANIFEST_NAME)
    }

    /// Expected checksum for an artifact, if listed.
    #[must_use]
    pub fn expected(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }
}

/// Resolved Silver output layout for one dataset + `load_date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilverLayout {
    keys: SilverPathKeys,
    domain: String,
    entity: String,
    schema_version: u32,
    pattern: Option<String>,
    load_date: NaiveDate,
}

impl SilverLayout {
    /// Builds the layout for a descriptor and `load_date`.
    ///
    /// The pattern segment is included only when the descriptor opts in.
    #[must_use]
    pub fn new(descriptor: &DatasetDescriptor, keys: SilverPathKeys, load_date: NaiveDate) -> Self {
        Self {
            keys,
            domain: descriptor.domain.clone(),
            entity: descriptor.entity.clone(),
            schema_version: descriptor.schema_version,
            pattern: descriptor
                .include_pattern_segment
                .then(|| descriptor.pattern.clone()),
            load_date,
        }
    }

    /// The load date this layout targets.
    #[must_use]
    pub fn load_date(&self) -> NaiveDate {
        self.load_date
    }

    /// The configured load-date key name.
    #[must_use]
    pub fn load_date_key(&self) -> &str {
        &self.keys.load_date_key
    }

    /// Dataset root prefix shared by every load of this dataset.
    #[must_use]
    pub fn dataset_root(&self) -> String {
        let mut prefix = format!(
            "{}={}/{}={}/{}{}/",
            self.keys.domain_key,
            self.domain,
            self.keys.entity_key,
            self.entity,
            self.keys.version_key,
            self.schema_version,
        );
        if let Some(pattern) = &self.pattern {
            prefix.push_str(&format!("{}={pattern}/", self.keys.pattern_key));
        }
        prefix
    }

    /// Prefix of this load's partition, with a trailing slash.
    #[must_use]
    pub fn load_prefix(&self) -> String {
        format!(
            "{}{}={}/",
            self.dataset_root(),
            self.keys.load_date_key,
            self.load_date,
        )
    }

    /// Directory of one output partition within the load.
    ///
    /// `record_time` is the resolved `(key, value)` pair for
    /// history-bearing outputs, `None` for current-state-only outputs.
    #[must_use]
    pub fn partition_dir(&self, record_time: Option<(&str, &str)>) -> String {
        match record_time {
            Some((key, value)) => format!("{}{key}={value}/", self.load_prefix()),
            None => self.load_prefix(),
        }
    }

    /// Deterministic artifact path within a partition.
    #[must_use]
    pub fn artifact_path(&self, record_time: Option<(&str, &str)>, index: usize) -> String {
        format!("{}part-{index:05}.jsonl", self.partition_dir(record_time))
    }

    /// Path of the load's metadata record.
    #[must_use]
    pub fn metadata_path(&self) -> String {
        format!("{}load.metadata.json", self.load_prefix())
    }

    /// Path of the current-state snapshot persisted with this load.
    #[must_use]
    pub fn state_snapshot_path(&self) -> String {
        format!("{}_state/current.jsonl", self.load_prefix())
    }

    /// Path of the quarantine side artifact for this load.
    #[must_use]
    pub fn quarantine_path(&self) -> String {
        format!("{}_quarantine/bad-rows.jsonl", self.load_prefix())
    }

    /// Maps a visible path under this load into the staging area for `run_id`.
    ///
    /// Writes land in staging and are promoted only after the whole load
    /// succeeds, so a failed run leaves nothing partially visible.
    #[must_use]
    pub fn staging_path(&self, run_id: &str, visible_path: &str) -> String {
        format!("_staging/{run_id}/{visible_path}")
    }

    /// Staging prefix for `run_id`.
    #[must_use]
    pub fn staging_prefix(&self, run_id: &str) -> String {
        format!("_staging/{run_id}/{}", self.load_prefix())
    }
}
