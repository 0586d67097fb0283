//! Error policy: classify, quarantine, and threshold bad records.
//!
//! A row is "bad" if it fails schema validation or merge-time coercion.
//! Under `ContinueOnError` bad rows are quarantined to a side artifact and
//! counted; the partition succeeds while thresholds hold. Under `FailFast`
//! the first bad row aborts the partition.
//!
//! Threshold comparison is strictly-greater-than: at exactly the
//! configured threshold the partition still succeeds.

use std::sync::Arc;

use argent_core::canonical::sha256_prefixed;
use argent_core::dataset::{DatasetDescriptor, ErrorThresholds, QualityMode};
use argent_core::layout::SilverLayout;
use argent_core::storage::{StorageBackend, WritePrecondition};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SilverError};

/// One quarantined row with its rejection reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedRow {
    /// Artifact the row came from.
    pub source: String,
    /// Row index within the source artifact.
    pub row_index: usize,
    /// Why the row was rejected.
    pub reason: String,
    /// The offending row as received.
    pub row: serde_json::Value,
}

/// Summary of the quarantine side artifact, recorded in load metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineSummary {
    /// Visible path of the quarantine artifact.
    pub artifact: String,
    /// Number of quarantined rows.
    pub row_count: u64,
    /// Checksum of the quarantine artifact bytes.
    pub checksum: String,
}

/// Applies the configured bad-record policy.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    thresholds: ErrorThresholds,
    mode: QualityMode,
}

impl ErrorPolicy {
    /// Builds the policy from a dataset descriptor.
    #[must_use]
    pub fn from_descriptor(descriptor: &DatasetDescriptor) -> Self {
        Self {
            thresholds: descriptor.error_thresholds,
            mode: descriptor.quality_mode,
        }
    }

    /// Called as each bad row is observed.
    ///
    /// # Errors
    ///
    /// Under `FailFast`, the first bad row aborts the partition.
    pub fn on_bad_row(&self, reason: &str) -> Result<()> {
        match self.mode {
            QualityMode::ContinueOnError => Ok(()),
            QualityMode::FailFast => Err(SilverError::QualityThreshold {
                message: format!("fail-fast: first bad row aborts the partition ({reason})"),
            }),
        }
    }

    /// Evaluates thresholds once the partition's rows are counted.
    ///
    /// `total` is the full row count including bad rows. Comparison is
    /// strictly-greater-than on both thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`SilverError::QualityThreshold`] when a threshold is
    /// exceeded.
    pub fn check_partition(&self, bad: u64, total: u64) -> Result<()> {
        if let Some(max_records) = self.thresholds.max_bad_records {
            if bad > max_records {
                return Err(SilverError::QualityThreshold {
                    message: format!("{bad} bad records exceed max_bad_records={max_records}"),
                });
            }
        }

        if let Some(max_percent) = self.thresholds.max_bad_percent {
            if total > 0 {
                #[allow(clippy::cast_precision_loss)]
                let percent = (bad as f64 / total as f64) * 100.0;
                if percent > max_percent {
                    return Err(SilverError::QualityThreshold {
                        message: format!(
                            "{percent:.3}% bad records exceed max_bad_percent={max_percent}"
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Writes the quarantine side artifact for a load.
pub struct QuarantineWriter {
    storage: Arc<dyn StorageBackend>,
}

impl QuarantineWriter {
    /// Creates a quarantine writer over the storage capability.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Stages the quarantine artifact for this load, if any rows were
    /// rejected. Returns the summary for load metadata.
    ///
    /// # Errors
    ///
    /// Returns a write failure if the artifact cannot be staged.
    pub async fn stage(
        &self,
        layout: &SilverLayout,
        run_id: &str,
        rows: &[QuarantinedRow],
    ) -> Result<Option<QuarantineSummary>> {
        self.write(layout, Some(run_id), rows).await
    }

    /// Writes the quarantine artifact directly to its visible path.
    ///
    /// Used when a partition fails its quality thresholds: the partition
    /// itself never becomes visible, but operators still get the listing
    /// of offending rows and reasons.
    ///
    /// # Errors
    ///
    /// Returns a write failure if the artifact cannot be written.
    pub async fn persist(
        &self,
        layout: &SilverLayout,
        rows: &[QuarantinedRow],
    ) -> Result<Option<QuarantineSummary>> {
        self.write(layout, None, rows).await
    }

    async fn write(
        &self,
        layout: &SilverLayout,
        staging_run: Option<&str>,
        rows: &[QuarantinedRow],
    ) -> Result<Option<QuarantineSummary>> {
        if rows.is_empty() {
            return Ok(None);
        }

        let mut out = Vec::new();
        for row in rows {
            let line = serde_json::to_vec(row)
                .map_err(|e| argent_core::Error::serialization("encoding quarantined row", e))?;
            out.extend_from_slice(&line);
            out.push(b'\n');
        }

        let checksum = sha256_prefixed(&out);
        let visible_path = layout.quarantine_path();
        let target_path = match staging_run {
            Some(run_id) => layout.staging_path(run_id, &visible_path),
            None => visible_path.clone(),
        };

        self.storage
            .put(&target_path, Bytes::from(out), WritePrecondition::None)
            .await
            .map_err(|e| SilverError::Write {
                message: format!("writing quarantine artifact {target_path}: {e}"),
            })?;

        tracing::warn!(
            artifact = %visible_path,
            rows = rows.len(),
            "quarantined bad rows"
        );

        Ok(Some(QuarantineSummary {
            artifact: visible_path,
            row_count: rows.len() as u64,
            checksum,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(thresholds: ErrorThresholds, mode: QualityMode) -> ErrorPolicy {
        ErrorPolicy { thresholds, mode }
    }

    #[test]
    fn exactly_at_percent_threshold_succeeds() {
        let p = policy(
            ErrorThresholds {
                max_bad_records: None,
                max_bad_percent: Some(10.0),
            },
            QualityMode::ContinueOnError,
        );

        // 10 bad of 100 total is exactly 10%: succeeds.
        p.check_partition(10, 100).expect("boundary must pass");
        // 11 of 100 exceeds it.
        assert!(p.check_partition(11, 100).is_err());
    }

    #[test]
    fn exactly_at_record_threshold_succeeds() {
        let p = policy(
            ErrorThresholds {
                max_bad_records: Some(5),
                max_bad_percent: None,
            },
            QualityMode::ContinueOnError,
        );

        p.check_partition(5, 50).expect("boundary must pass");
        assert!(p.check_partition(6, 50).is_err());
    }

    #[test]
    fn no_thresholds_means_unbounded_quarantine() {
        let p = policy(ErrorThresholds::default(), QualityMode::ContinueOnError);
        p.check_partition(1_000, 1_000).expect("must pass");
    }

    #[test]
    fn fail_fast_aborts_on_first_bad_row() {
        let p = policy(ErrorThresholds::default(), QualityMode::FailFast);
        assert!(p.on_bad_row("broken").is_err());

        let p = policy(ErrorThresholds::default(), QualityMode::ContinueOnError);
        p.on_bad_row("broken").expect("continue mode tolerates");
    }
}
