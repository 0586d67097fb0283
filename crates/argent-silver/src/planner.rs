//! Partition planning: resolve Bronze inputs and the Silver output layout.
//!
//! The planner is the first stage of every load and the place where
//! contradictory configuration dies. In particular, the current-state-only
//! invariant (no record-time partitioning for `scd1`/`latest_only`) is
//! enforced here, at resolve time — not later, not silently.

use std::sync::Arc;

use argent_core::dataset::DatasetDescriptor;
use argent_core::layout::{
    BronzePartitionRef, BronzePathKeys, CHECKSUM_MANIFEST_NAME, ChecksumManifest, SilverLayout,
    SilverPathKeys,
};
use argent_core::storage::StorageBackend;
use argent_core::{Error as CoreError, canonical::sha256_prefixed};
use chrono::NaiveDate;

use crate::error::{Result, SilverError};

/// One resolved Bronze input partition.
#[derive(Debug, Clone)]
pub struct ResolvedBronzePartition {
    /// The partition reference (path construction).
    pub reference: BronzePartitionRef,
    /// The checksum manifest, when present.
    pub manifest: Option<ChecksumManifest>,
    /// Artifact names under the partition, sorted, manifest excluded.
    pub artifacts: Vec<String>,
}

/// The resolved plan for one dataset + `load_date`.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    /// Silver output layout.
    pub layout: SilverLayout,
    /// Ordered Bronze input partitions. Empty only under an explicit
    /// empty-load configuration.
    pub bronze: Vec<ResolvedBronzePartition>,
    /// Resolved record-time partition key, if the output carries one.
    pub record_time_key: Option<String>,
}

/// Resolves Bronze inputs and the Silver output path for a load.
pub struct PartitionPlanner {
    storage: Arc<dyn StorageBackend>,
    bronze_keys: BronzePathKeys,
    silver_keys: SilverPathKeys,
}

impl PartitionPlanner {
    /// Creates a planner over the given storage capability and path keys.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        bronze_keys: BronzePathKeys,
        silver_keys: SilverPathKeys,
    ) -> Self {
        Self {
            storage,
            bronze_keys,
            silver_keys,
        }
    }

    /// Resolves the plan for `descriptor` at `load_date`.
    ///
    /// # Errors
    ///
    /// - [`SilverError::Configuration`] if the descriptor is invalid,
    ///   including a non-empty `partition_by` on a current-state-only mode
    /// - [`SilverError::Core`] (`NotFound`) if expected Bronze partitions
    ///   are absent and empty loads are not allowed
    /// - [`SilverError::Integrity`] if the checksum manifest is missing
    ///   while `require_checksum` is set
    pub async fn resolve(
        &self,
        descriptor: &DatasetDescriptor,
        load_date: NaiveDate,
    ) -> Result<LoadPlan> {
        descriptor.validate().map_err(configuration_error)?;

        let layout = SilverLayout::new(descriptor, self.silver_keys.clone(), load_date);
        let record_time_key = descriptor.record_time_key();

        let reference =
            BronzePartitionRef::for_dataset(descriptor, self.bronze_keys.clone(), load_date);
        let prefix = reference.prefix();

        let mut listed = self.storage.list(&prefix).await?;
        listed.sort_by(|a, b| a.path.cmp(&b.path));

        if listed.is_empty() {
            if descriptor.allow_empty_load {
                tracing::info!(
                    bronze_prefix = %prefix,
                    "no Bronze partition found, continuing with empty load"
                );
                return Ok(LoadPlan {
                    layout,
                    bronze: Vec::new(),
                    record_time_key,
                });
            }
            return Err(CoreError::NotFound(format!(
                "expected Bronze partition is absent: {prefix}"
            ))
            .into());
        }

        let manifest = self.read_manifest(&reference).await?;
        if manifest.is_none() && descriptor.require_checksum {
            return Err(SilverError::integrity(format!(
                "checksum manifest missing at {} but integrity is required",
                reference.manifest_path()
            )));
        }

        let artifacts: Vec<String> = listed
            .iter()
            .filter_map(|meta| meta.path.strip_prefix(&prefix))
            .filter(|name| *name != CHECKSUM_MANIFEST_NAME)
            .map(ToString::to_string)
            .collect();

        Ok(LoadPlan {
            layout,
            bronze: vec![ResolvedBronzePartition {
                reference,
                manifest,
                artifacts,
            }],
            record_time_key,
        })
    }

    /// Verifies every Bronze artifact against its checksum manifest.
    ///
    /// Partitions without a manifest are skipped (resolve already rejected
    /// that case when integrity is required).
    ///
    /// # Errors
    ///
    /// Returns [`SilverError::Integrity`] on the first mismatched or
    /// missing artifact. Mismatches are surfaced, never auto-repaired.
    pub async fn verify_inputs(&self, plan: &LoadPlan) -> Result<()> {
        for partition in &plan.bronze {
            let Some(manifest) = &partition.manifest else {
                continue;
            };

            for name in manifest.artifact_names() {
                let path = partition.reference.artifact_path(name);
                let bytes = match self.storage.get(&path).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.is_not_found() => {
                        return Err(SilverError::integrity(format!(
                            "artifact listed in checksum manifest is missing: {path}"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };

                let actual = sha256_prefixed(&bytes);
                let expected = manifest.expected(name).unwrap_or_default();
                if actual != expected {
                    return Err(SilverError::integrity(format!(
                        "checksum mismatch for {path}: expected {expected}, got {actual}"
                    )));
                }
            }

            tracing::debug!(
                partition = %partition.reference.prefix(),
                artifacts = manifest.artifact_names().count(),
                "bronze checksum verification passed"
            );
        }
        Ok(())
    }

    /// Reads and parses the checksum manifest, if present.
    async fn read_manifest(
        &self,
        reference: &BronzePartitionRef,
    ) -> Result<Option<ChecksumManifest>> {
        match self.storage.get(&reference.manifest_path()).await {
            Ok(bytes) => {
                let manifest: ChecksumManifest =
                    serde_json::from_slice(&bytes).map_err(|e| {
                        SilverError::integrity(format!(
                            "checksum manifest at {} is unreadable: {e}",
                            reference.manifest_path()
                        ))
                    })?;
                Ok(Some(manifest))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Maps core configuration errors into the Silver taxonomy, passing other
/// core errors through.
fn configuration_error(error: CoreError) -> SilverError {
    match error {
        CoreError::Configuration { field, message } => {
            SilverError::Configuration { field, message }
        }
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argent_core::dataset::{
        CuratedModel, EntityKind, ErrorThresholds, QualityMode, SchemaPolicy, WriterOptions,
    };
    use argent_core::storage::{MemoryBackend, WritePrecondition};
    use bytes::Bytes;

    fn descriptor(model: CuratedModel) -> DatasetDescriptor {
        DatasetDescriptor {
            domain: "sales".into(),
            entity: "orders".into(),
            schema_version: 1,
            pattern: "full".into(),
            include_pattern_segment: false,
            entity_kind: EntityKind::State,
            history_mode: model.implied_history_mode(),
            model,
            business_keys: vec!["order_id".into()],
            order_column: Some("updated_at".into()),
            partition_by: vec![],
            record_time_column: Some("updated_at".into()),
            schema_policy: SchemaPolicy::Lenient,
            error_thresholds: ErrorThresholds::default(),
            quality_mode: QualityMode::ContinueOnError,
            abort_load_on_partition_failure: false,
            writer: WriterOptions::default(),
            require_checksum: false,
            allow_empty_load: false,
            source_system: "erp".into(),
            source_table: "orders".into(),
        }
    }

    fn load_date() -> NaiveDate {
        "2025-06-01".parse().expect("valid date literal")
    }

    fn planner(backend: Arc<MemoryBackend>) -> PartitionPlanner {
        PartitionPlanner::new(
            backend,
            BronzePathKeys::default(),
            SilverPathKeys::default(),
        )
    }

    async fn seed_bronze(backend: &MemoryBackend, with_manifest: bool) {
        let chunk = Bytes::from("{\"order_id\":1}\n");
        backend
            .put(
                "system=erp/table=orders/pattern=full/dt=2025-06-01/chunk-000.jsonl",
                chunk.clone(),
                WritePrecondition::None,
            )
            .await
            .expect("seed chunk");

        if with_manifest {
            let manifest = serde_json::json!({
                "files": { "chunk-000.jsonl": sha256_prefixed(&chunk) }
            });
            backend
                .put(
                    "system=erp/table=orders/pattern=full/dt=2025-06-01/_checksums.json",
                    Bytes::from(serde_json::to_vec(&manifest).expect("manifest json")),
                    WritePrecondition::None,
                )
                .await
                .expect("seed manifest");
        }
    }

    #[tokio::test]
    async fn resolve_lists_artifacts_in_order() {
        let backend = Arc::new(MemoryBackend::new());
        seed_bronze(&backend, true).await;

        let plan = planner(backend)
            .resolve(&descriptor(CuratedModel::ScdType1), load_date())
            .await
            .expect("plan resolves");

        assert_eq!(plan.bronze.len(), 1);
        assert_eq!(plan.bronze[0].artifacts, vec!["chunk-000.jsonl"]);
        assert!(plan.bronze[0].manifest.is_some());
        assert_eq!(plan.record_time_key, None);
    }

    #[tokio::test]
    async fn partitioned_current_state_fails_at_resolve_time() {
        let backend = Arc::new(MemoryBackend::new());
        seed_bronze(&backend, true).await;

        let mut bad = descriptor(CuratedModel::ScdType1);
        bad.partition_by = vec!["updated_at_dt".into()];

        let err = planner(backend)
            .resolve(&bad, load_date())
            .await
            .expect_err("must fail before any processing");
        assert!(matches!(
            err,
            SilverError::Configuration {
                field: "partition_by",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn absent_bronze_is_not_found() {
        let backend = Arc::new(MemoryBackend::new());

        let err = planner(backend)
            .resolve(&descriptor(CuratedModel::PeriodicSnapshot), load_date())
            .await
            .expect_err("absent bronze must fail");
        assert!(matches!(err, SilverError::Core(e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn absent_bronze_allowed_under_empty_load_mode() {
        let backend = Arc::new(MemoryBackend::new());

        let mut d = descriptor(CuratedModel::PeriodicSnapshot);
        d.allow_empty_load = true;

        let plan = planner(backend)
            .resolve(&d, load_date())
            .await
            .expect("empty load resolves");
        assert!(plan.bronze.is_empty());
    }

    #[tokio::test]
    async fn missing_manifest_with_integrity_required_fails() {
        let backend = Arc::new(MemoryBackend::new());
        seed_bronze(&backend, false).await;

        let mut d = descriptor(CuratedModel::PeriodicSnapshot);
        d.require_checksum = true;

        let err = planner(backend)
            .resolve(&d, load_date())
            .await
            .expect_err("missing manifest must fail");
        assert!(matches!(err, SilverError::Integrity { .. }));
    }

    #[tokio::test]
    async fn verify_detects_tampered_artifact() {
        let backend = Arc::new(MemoryBackend::new());
        seed_bronze(&backend, true).await;

        // Tamper after the manifest was written.
        backend
            .put(
                "system=erp/table=orders/pattern=full/dt=2025-06-01/chunk-000.jsonl",
                Bytes::from("{\"order_id\":999}\n"),
                WritePrecondition::None,
            )
            .await
            .expect("tamper");

        let planner = planner(backend);
        let plan = planner
            .resolve(&descriptor(CuratedModel::PeriodicSnapshot), load_date())
            .await
            .expect("plan resolves");

        let err = planner
            .verify_inputs(&plan)
            .await
            .expect_err("tampered artifact must fail verification");
        assert!(matches!(err, SilverError::Integrity { .. }));
    }

    #[tokio::test]
    async fn verify_passes_on_clean_inputs() {
        let backend = Arc::new(MemoryBackend::new());
        seed_bronze(&backend, true).await;

        let planner = planner(backend);
        let plan = planner
            .resolve(&descriptor(CuratedModel::PeriodicSnapshot), load_date())
            .await
            .expect("plan resolves");
        planner
            .verify_inputs(&plan)
            .await
            .expect("clean inputs verify");
    }
}
