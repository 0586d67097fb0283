//! Current-state snapshot store for merge models.
//!
//! The prior current state is modelled as a versioned, immutable snapshot
//! per `load_date`, read and written through the injected storage
//! capability — never as ambient in-process state. The merge engine
//! receives it as an explicit parameter; it has no way to reach back into
//! a live cursor.

use std::sync::Arc;

use argent_core::canonical::sha256_prefixed;
use argent_core::layout::SilverLayout;
use argent_core::record::Row;
use argent_core::storage::{StorageBackend, WritePrecondition};
use chrono::NaiveDate;

use crate::error::{Result, SilverError};
use crate::writer::{decode_jsonl, encode_jsonl};

/// Relative path of the state snapshot within a load prefix.
const STATE_SUFFIX: &str = "_state/current.jsonl";

/// Loads and persists current-state snapshots.
pub struct CurrentStateStore {
    storage: Arc<dyn StorageBackend>,
}

impl CurrentStateStore {
    /// Creates a store over the storage capability.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Loads the latest prior state snapshot written before this layout's
    /// `load_date`.
    ///
    /// Returns `None` when no prior load exists (the first load of a
    /// dataset legitimately starts from nothing).
    ///
    /// # Errors
    ///
    /// Returns [`SilverError::MergeState`] if a prior snapshot exists but
    /// cannot be parsed — a corrupt state must fail the partition rather
    /// than silently restart history.
    pub async fn load_prior(&self, layout: &SilverLayout) -> Result<Option<Vec<Row>>> {
        let root = layout.dataset_root();
        let listed = self.storage.list(&root).await?;

        let segment_prefix = format!("{}=", layout.load_date_key());
        let mut candidates: Vec<(NaiveDate, String)> = Vec::new();
        for meta in listed {
            let Some(relative) = meta.path.strip_prefix(&root) else {
                continue;
            };
            if !relative.ends_with(STATE_SUFFIX) {
                continue;
            }
            let Some(segment) = relative.split('/').next() else {
                continue;
            };
            let Some(date_str) = segment.strip_prefix(&segment_prefix) else {
                continue;
            };
            let Ok(date) = date_str.parse::<NaiveDate>() else {
                continue;
            };
            if date < layout.load_date() {
                candidates.push((date, meta.path));
            }
        }

        let Some((prior_date, path)) = candidates.into_iter().max() else {
            return Ok(None);
        };

        let bytes = match self.storage.get(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                return Err(SilverError::merge_state(format!(
                    "prior state snapshot disappeared during load: {path}"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let (rows, bad_lines) = decode_jsonl(&bytes);
        if !bad_lines.is_empty() {
            return Err(SilverError::merge_state(format!(
                "prior state snapshot at {path} is corrupt: {} unparseable lines",
                bad_lines.len()
            )));
        }

        tracing::debug!(
            prior_load_date = %prior_date,
            rows = rows.len(),
            "loaded prior current-state snapshot"
        );
        Ok(Some(rows))
    }

    /// Stages this load's state snapshot and returns its checksum.
    ///
    /// # Errors
    ///
    /// Returns a write failure if the snapshot cannot be staged.
    pub async fn stage(
        &self,
        layout: &SilverLayout,
        run_id: &str,
        rows: &[Row],
    ) -> Result<String> {
        let bytes = encode_jsonl(rows)?;
        let checksum = sha256_prefixed(&bytes);

        let visible_path = layout.state_snapshot_path();
        let staging_path = layout.staging_path(run_id, &visible_path);
        self.storage
            .put(&staging_path, bytes, WritePrecondition::None)
            .await
            .map_err(|e| SilverError::Write {
                message: format!("staging state snapshot {staging_path}: {e}"),
            })?;

        Ok(checksum)
    }
}
