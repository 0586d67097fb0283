//! Integrity recording: per-artifact checksums and the load metadata
//! record.
//!
//! The metadata record is the sole contract read by downstream consumers
//! (external-table DDL generation, rerun/idempotency checks). It is
//! created once per (dataset, `load_date`), only after every partition
//! wrote successfully, and never mutated afterward — reruns replace the
//! whole `load_date` partition, they do not edit metadata in place.
//!
//! The load-level checksum covers the canonical serialization of the
//! deterministic content (artifacts, schema version, totals). `run_id` and
//! `written_at` are deliberately excluded so two identical reruns produce
//! identical load checksums.

use std::sync::Arc;

use argent_core::canonical::{canonical_checksum, sha256_prefixed};
use argent_core::dataset::{CuratedModel, DatasetDescriptor};
use argent_core::layout::SilverLayout;
use argent_core::storage::{StorageBackend, WritePrecondition};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SilverError};
use crate::quality::QuarantineSummary;
use crate::writer::FlushedArtifact;

/// Metadata for one written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Record-time partition value, `None` for unpartitioned output.
    pub partition: Option<String>,
    /// Visible artifact path.
    pub artifact: String,
    /// Rows in the artifact.
    pub row_count: u64,
    /// Artifact size in bytes.
    pub byte_size: u64,
    /// `sha256:` checksum of the artifact bytes.
    pub checksum: String,
}

/// The deterministic portion of the metadata record, hashed for the
/// load-level checksum.
#[derive(Debug, Serialize)]
struct HashedContent<'a> {
    domain: &'a str,
    entity: &'a str,
    schema_version: u32,
    model: CuratedModel,
    load_date: String,
    schema_profile_version: u64,
    record_time_key: Option<&'a str>,
    artifacts: &'a [ArtifactRecord],
    state_checksum: Option<&'a str>,
    quarantine: Option<&'a QuarantineSummary>,
    total_rows: u64,
    total_bytes: u64,
    error_count: u64,
}

/// The load's metadata record, one per (dataset, `load_date`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMetadata {
    /// Business domain.
    pub domain: String,
    /// Entity name.
    pub entity: String,
    /// Dataset schema version (the `v{N}` segment).
    pub schema_version: u32,
    /// Curated model applied.
    pub model: CuratedModel,
    /// Operational load date.
    pub load_date: NaiveDate,
    /// Schema profile version the load was validated against.
    pub schema_profile_version: u64,
    /// Record-time partition key, if the output carries one.
    pub record_time_key: Option<String>,
    /// Written artifacts, in partition order.
    pub artifacts: Vec<ArtifactRecord>,
    /// Checksum of the current-state snapshot, for merge models.
    pub state_checksum: Option<String>,
    /// Quarantine summary, when rows were rejected.
    pub quarantine: Option<QuarantineSummary>,
    /// Total rows written across artifacts.
    pub total_rows: u64,
    /// Total bytes written across artifacts.
    pub total_bytes: u64,
    /// Quarantined row count for the load partition.
    pub error_count: u64,
    /// Deterministic load-level checksum (excludes `run_id`/`written_at`).
    pub load_checksum: String,
    /// Identifier of the run that produced the load.
    pub run_id: String,
    /// When the record was written.
    pub written_at: DateTime<Utc>,
}

/// Computes checksums and writes the load metadata record.
pub struct IntegrityRecorder {
    storage: Arc<dyn StorageBackend>,
}

impl IntegrityRecorder {
    /// Creates a recorder over the storage capability.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Builds artifact records by hashing each staged artifact's bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if a staged artifact cannot be read back.
    pub async fn collect_artifacts(
        &self,
        flushed: &[FlushedArtifact],
    ) -> Result<Vec<ArtifactRecord>> {
        let mut records = Vec::with_capacity(flushed.len());
        for artifact in flushed {
            let bytes = self.storage.get(&artifact.staging_path).await?;
            records.push(ArtifactRecord {
                partition: artifact.partition.clone(),
                artifact: artifact.visible_path.clone(),
                row_count: artifact.row_count,
                byte_size: bytes.len() as u64,
                checksum: sha256_prefixed(&bytes),
            });
        }
        Ok(records)
    }

    /// Assembles the metadata record and stages it for promotion.
    ///
    /// Called only after every partition for the `load_date` wrote
    /// successfully.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the record cannot be encoded, or a
    /// write failure if it cannot be staged.
    #[allow(clippy::too_many_arguments)]
    pub async fn stage_record(
        &self,
        descriptor: &DatasetDescriptor,
        layout: &SilverLayout,
        run_id: &str,
        schema_profile_version: u64,
        record_time_key: Option<&str>,
        artifacts: Vec<ArtifactRecord>,
        state_checksum: Option<String>,
        quarantine: Option<QuarantineSummary>,
    ) -> Result<LoadMetadata> {
        let total_rows = artifacts.iter().map(|a| a.row_count).sum();
        let total_bytes = artifacts.iter().map(|a| a.byte_size).sum();
        let error_count = quarantine.as_ref().map_or(0, |q| q.row_count);

        let load_checksum = canonical_checksum(&HashedContent {
            domain: &descriptor.domain,
            entity: &descriptor.entity,
            schema_version: descriptor.schema_version,
            model: descriptor.model,
            load_date: layout.load_date().to_string(),
            schema_profile_version,
            record_time_key,
            artifacts: &artifacts,
            state_checksum: state_checksum.as_deref(),
            quarantine: quarantine.as_ref(),
            total_rows,
            total_bytes,
            error_count,
        })?;

        let record = LoadMetadata {
            domain: descriptor.domain.clone(),
            entity: descriptor.entity.clone(),
            schema_version: descriptor.schema_version,
            model: descriptor.model,
            load_date: layout.load_date(),
            schema_profile_version,
            record_time_key: record_time_key.map(ToString::to_string),
            artifacts,
            state_checksum,
            quarantine,
            total_rows,
            total_bytes,
            error_count,
            load_checksum,
            run_id: run_id.to_string(),
            written_at: Utc::now(),
        };

        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| argent_core::Error::serialization("encoding load metadata", e))?;
        let staging_path = layout.staging_path(run_id, &layout.metadata_path());
        self.storage
            .put(&staging_path, Bytes::from(bytes), WritePrecondition::None)
            .await
            .map_err(|e| SilverError::Write {
                message: format!("staging load metadata {staging_path}: {e}"),
            })?;

        tracing::info!(
            load_checksum = %record.load_checksum,
            total_rows = record.total_rows,
            artifacts = record.artifacts.len(),
            "staged load metadata record"
        );

        Ok(record)
    }

    /// Reads the visible metadata record for a load, if present.
    ///
    /// This is the interface rerun/idempotency checks use: an existing
    /// record with the same load checksum means the rerun produced
    /// identical output.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if the record exists but is unreadable.
    pub async fn read(&self, layout: &SilverLayout) -> Result<Option<LoadMetadata>> {
        match self.storage.get(&layout.metadata_path()).await {
            Ok(bytes) => {
                let record: LoadMetadata = serde_json::from_slice(&bytes).map_err(|e| {
                    SilverError::integrity(format!(
                        "load metadata at {} is unreadable: {e}",
                        layout.metadata_path()
                    ))
                })?;
                Ok(Some(record))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
