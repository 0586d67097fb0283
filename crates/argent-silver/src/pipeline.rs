//! The Silver load pipeline: Plan → Reconcile → Merge → Write → Record.
//!
//! One pipeline run promotes one (dataset, `load_date`). Reads overlap
//! under a bounded worker pool; the merge reduction is a single
//! authoritative pass over each business key's rows. Everything is written
//! to a run-scoped staging prefix and atomically promoted only after every
//! partition and the metadata record succeed — a failed or cancelled run
//! leaves no partially visible partition.
//!
//! Cancellation is cooperative: the pipeline checks its token between
//! chunks, so an enclosing orchestrator timeout can stop a long merge
//! without leaving corrupt state behind.

use std::sync::Arc;

use argent_core::dataset::{DatasetDescriptor, HistoryMode};
use argent_core::layout::{BronzePathKeys, SilverLayout, SilverPathKeys};
use argent_core::observability::load_span;
use argent_core::record::{FieldValue, Row};
use argent_core::schema::SchemaProfile;
use argent_core::storage::StorageBackend;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use ulid::Ulid;

use crate::error::{Result, SilverError};
use crate::integrity::{IntegrityRecorder, LoadMetadata};
use crate::merge::{EFFECTIVE_FROM, MergeEngine};
use crate::planner::{LoadPlan, PartitionPlanner};
use crate::quality::{ErrorPolicy, QuarantineWriter, QuarantinedRow};
use crate::reconciler::SchemaReconciler;
use crate::state::CurrentStateStore;
use crate::writer::{ChunkedWriter, decode_jsonl};

/// Pipeline construction options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Bronze path key names.
    pub bronze_keys: BronzePathKeys,
    /// Silver path key names.
    pub silver_keys: SilverPathKeys,
    /// Concurrent Bronze artifact reads.
    pub read_concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            bronze_keys: BronzePathKeys::default(),
            silver_keys: SilverPathKeys::default(),
            read_concurrency: 4,
        }
    }
}

/// One decoded Bronze batch, in artifact order.
struct DecodedBatch {
    artifact: String,
    rows: Vec<Row>,
    bad_lines: Vec<(usize, String)>,
}

/// Promotes one dataset + `load_date` from Bronze to Silver.
pub struct SilverPipeline {
    storage: Arc<dyn StorageBackend>,
    descriptor: DatasetDescriptor,
    options: PipelineOptions,
}

impl SilverPipeline {
    /// Creates a pipeline, validating the descriptor once at the job
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns [`SilverError::Configuration`] before any I/O if the
    /// descriptor is invalid.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        descriptor: DatasetDescriptor,
        options: PipelineOptions,
    ) -> Result<Self> {
        descriptor.validate().map_err(|e| match e {
            argent_core::Error::Configuration { field, message } => {
                SilverError::Configuration { field, message }
            }
            other => other.into(),
        })?;

        Ok(Self {
            storage,
            descriptor,
            options,
        })
    }

    /// Runs the full load: plan, verify, reconcile, merge, write, record,
    /// promote.
    ///
    /// # Errors
    ///
    /// Propagates the error taxonomy of each stage. On any failure the
    /// staging area is cleaned up best-effort and nothing becomes visible.
    pub async fn run(
        &self,
        load_date: chrono::NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<LoadMetadata> {
        let run_id = Ulid::new().to_string();
        let span = load_span(
            "promote",
            &self.descriptor.domain,
            &self.descriptor.entity,
            &load_date.to_string(),
        );

        let result = self
            .run_inner(load_date, &run_id, cancel)
            .instrument(span)
            .await;

        if result.is_err() {
            self.cleanup_staging(&run_id).await;
        }
        result
    }

    async fn run_inner(
        &self,
        load_date: chrono::NaiveDate,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<LoadMetadata> {
        let planner = PartitionPlanner::new(
            self.storage.clone(),
            self.options.bronze_keys.clone(),
            self.options.silver_keys.clone(),
        );
        let plan = planner.resolve(&self.descriptor, load_date).await?;
        let engine = MergeEngine::for_dataset(&self.descriptor)?;
        let policy = ErrorPolicy::from_descriptor(&self.descriptor);

        if self.descriptor.require_checksum {
            planner.verify_inputs(&plan).await?;
        }

        let batches = self.read_batches(&plan, cancel).await?;
        let total_input: u64 = batches
            .iter()
            .map(|b| (b.rows.len() + b.bad_lines.len()) as u64)
            .sum();

        let mut quarantined: Vec<QuarantinedRow> = Vec::new();
        let mut reconciler =
            SchemaReconciler::new(self.descriptor.schema_policy, SchemaProfile::default());
        let required = self.required_columns();

        let mut accepted: Vec<Row> = Vec::new();
        for batch in batches {
            if cancel.is_cancelled() {
                return Err(SilverError::Cancelled);
            }

            for (row_index, raw) in batch.bad_lines {
                policy.on_bad_row("unparseable JSON line")?;
                quarantined.push(QuarantinedRow {
                    source: batch.artifact.clone(),
                    row_index,
                    reason: "unparseable JSON line".into(),
                    row: serde_json::Value::String(raw),
                });
            }

            reconciler.seed_profile(&batch.rows, &required);
            let outcome = reconciler.reconcile(batch.rows);
            let reconciled = outcome.batch;
            for violation in outcome.violations {
                policy.on_bad_row(&violation.reason)?;
                quarantined.push(QuarantinedRow {
                    source: batch.artifact.clone(),
                    row_index: violation.row_index,
                    reason: violation.reason,
                    row: serde_json::to_value(&violation.row)
                        .unwrap_or(serde_json::Value::Null),
                });
            }
            accepted.extend(reconciled.rows);
        }

        let (mergeable, unmergeable) = engine.screen(accepted);
        for rejected in unmergeable {
            policy.on_bad_row(&rejected.reason)?;
            quarantined.push(QuarantinedRow {
                source: "merge".into(),
                row_index: rejected.row_index,
                reason: rejected.reason,
                row: serde_json::to_value(&rejected.row).unwrap_or(serde_json::Value::Null),
            });
        }

        let state_store = CurrentStateStore::new(self.storage.clone());
        let prior = if self.descriptor.model.reads_prior_state() {
            state_store.load_prior(&plan.layout).await?
        } else {
            None
        };

        if cancel.is_cancelled() {
            return Err(SilverError::Cancelled);
        }

        let outcome = engine.apply(prior.as_deref(), mergeable)?;

        let keyed_rows =
            self.assign_partitions(&plan, outcome.rows, &policy, &mut quarantined)?;

        if let Err(threshold_err) = policy.check_partition(quarantined.len() as u64, total_input)
        {
            // The partition fails, but operators still get the listing of
            // offending rows at the visible quarantine path.
            if let Err(e) = QuarantineWriter::new(self.storage.clone())
                .persist(&plan.layout, &quarantined)
                .await
            {
                tracing::warn!(error = %e, "could not persist quarantine listing");
            }
            return Err(threshold_err);
        }

        let writer = ChunkedWriter::new(self.storage.clone(), self.descriptor.writer);
        let flushed = writer
            .write_partitions(
                &plan.layout,
                run_id,
                plan.record_time_key.as_deref(),
                keyed_rows,
                cancel,
            )
            .await?;

        let state_checksum = match &outcome.state {
            Some(rows) => Some(state_store.stage(&plan.layout, run_id, rows).await?),
            None => None,
        };

        let quarantine = QuarantineWriter::new(self.storage.clone())
            .stage(&plan.layout, run_id, &quarantined)
            .await?;

        let recorder = IntegrityRecorder::new(self.storage.clone());
        let artifacts = recorder.collect_artifacts(&flushed).await?;
        let metadata = recorder
            .stage_record(
                &self.descriptor,
                &plan.layout,
                run_id,
                reconciler.profile().version,
                plan.record_time_key.as_deref(),
                artifacts,
                state_checksum,
                quarantine,
            )
            .await?;

        if cancel.is_cancelled() {
            return Err(SilverError::Cancelled);
        }

        self.promote(&plan.layout, run_id).await?;
        tracing::info!(
            total_rows = metadata.total_rows,
            error_count = metadata.error_count,
            load_checksum = %metadata.load_checksum,
            "load promoted"
        );
        Ok(metadata)
    }

    /// Non-nullable columns used to seed a fresh schema profile.
    fn required_columns(&self) -> Vec<String> {
        let mut required = self.descriptor.business_keys.clone();
        if self.descriptor.model.requires_order_column() {
            if let Some(order_column) = &self.descriptor.order_column {
                required.push(order_column.clone());
            }
        }
        required
    }

    /// Reads Bronze artifacts concurrently under a bounded pool, preserving
    /// artifact order.
    async fn read_batches(
        &self,
        plan: &LoadPlan,
        cancel: &CancellationToken,
    ) -> Result<Vec<DecodedBatch>> {
        let mut targets: Vec<(String, String)> = Vec::new();
        for partition in &plan.bronze {
            for name in &partition.artifacts {
                targets.push((name.clone(), partition.reference.artifact_path(name)));
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.options.read_concurrency.max(1)));
        let mut join_set = JoinSet::new();
        for (index, (name, path)) in targets.iter().cloned().enumerate() {
            let storage = self.storage.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| argent_core::Error::Internal {
                        message: "read pool semaphore closed".into(),
                    })?;
                let bytes = storage.get(&path).await?;
                let (rows, bad_lines) = decode_jsonl(&bytes);
                Ok::<_, SilverError>((
                    index,
                    DecodedBatch {
                        artifact: name,
                        rows,
                        bad_lines,
                    },
                ))
            });
        }

        let mut slots: Vec<Option<DecodedBatch>> =
            std::iter::repeat_with(|| None).take(targets.len()).collect();
        while let Some(joined) = join_set.join_next().await {
            if cancel.is_cancelled() {
                join_set.abort_all();
                return Err(SilverError::Cancelled);
            }
            let (index, batch) = joined.map_err(|e| argent_core::Error::Internal {
                message: format!("bronze read task failed: {e}"),
            })??;
            slots[index] = Some(batch);
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Resolves each output row's record-time partition value and sorts
    /// rows by partition, keeping merge order within a partition.
    fn assign_partitions(
        &self,
        plan: &LoadPlan,
        rows: Vec<Row>,
        policy: &ErrorPolicy,
        quarantined: &mut Vec<QuarantinedRow>,
    ) -> Result<Vec<(Option<String>, Row)>> {
        let Some(_key) = plan.record_time_key.as_deref() else {
            return Ok(rows.into_iter().map(|row| (None, row)).collect());
        };

        let source_column = match self.descriptor.history_mode {
            HistoryMode::Scd2 => Some(EFFECTIVE_FROM.to_string()),
            HistoryMode::None => self.descriptor.record_time_column.clone(),
            HistoryMode::Scd1 | HistoryMode::LatestOnly => None,
        };
        let Some(source_column) = source_column else {
            return Ok(rows.into_iter().map(|row| (None, row)).collect());
        };

        let mut keyed = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.into_iter().enumerate() {
            match partition_value(&row, &source_column) {
                Some(value) => keyed.push((Some(value), row)),
                None => {
                    let reason =
                        format!("no record-time value in column `{source_column}`");
                    policy.on_bad_row(&reason)?;
                    quarantined.push(QuarantinedRow {
                        source: "partitioning".into(),
                        row_index,
                        reason,
                        row: serde_json::to_value(&row).unwrap_or(serde_json::Value::Null),
                    });
                }
            }
        }

        keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(keyed)
    }

    /// Replaces the visible load partition with the staged run output.
    ///
    /// Reruns replace the whole `load_date` partition: the visible prefix
    /// is cleared first, so no residual artifacts from an earlier run of
    /// the same `load_date` survive.
    async fn promote(&self, layout: &SilverLayout, run_id: &str) -> Result<()> {
        let visible = self.storage.list(&layout.load_prefix()).await?;
        for meta in visible {
            self.storage.delete(&meta.path).await?;
        }

        let staging_prefix = format!("_staging/{run_id}/");
        let mut staged = self.storage.list(&staging_prefix).await?;
        staged.sort_by(|a, b| a.path.cmp(&b.path));

        for meta in &staged {
            let visible_path =
                meta.path
                    .strip_prefix(&staging_prefix)
                    .ok_or_else(|| argent_core::Error::Internal {
                        message: format!("staged object outside staging prefix: {}", meta.path),
                    })?;
            self.storage
                .copy(&meta.path, visible_path)
                .await
                .map_err(|e| SilverError::Write {
                    message: format!("promoting {visible_path}: {e}"),
                })?;
        }

        for meta in &staged {
            self.storage.delete(&meta.path).await?;
        }

        tracing::info!(objects = staged.len(), "promoted staged load");
        Ok(())
    }

    /// Best-effort removal of a failed run's staging area.
    async fn cleanup_staging(&self, run_id: &str) {
        let staging_prefix = format!("_staging/{run_id}/");
        match self.storage.list(&staging_prefix).await {
            Ok(staged) => {
                for meta in staged {
                    if let Err(e) = self.storage.delete(&meta.path).await {
                        tracing::warn!(path = %meta.path, error = %e, "staging cleanup failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not list staging area for cleanup");
            }
        }
    }
}

/// Derives the record-time partition value from a row.
///
/// Date-like values become `YYYY-MM-DD`; other scalars fall back to a
/// path-safe rendering. Nulls yield `None` and are quarantined upstream.
fn partition_value(row: &Row, source_column: &str) -> Option<String> {
    let value = row.get(source_column)?;
    if value.is_null() {
        return None;
    }
    if let Some(date) = value.as_date() {
        return Some(date.to_string());
    }
    Some(path_safe(&display_value(value)))
}

fn display_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => "null".to_string(),
        FieldValue::Boolean(b) => b.to_string(),
        FieldValue::Int64(n) => n.to_string(),
        FieldValue::Float64(x) => x.to_string(),
        FieldValue::Date(d) => d.to_string(),
        FieldValue::Timestamp(ts) => ts.to_rfc3339(),
        FieldValue::Text(s) => s.clone(),
    }
}

fn path_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
