//! Chunked, bounded-memory artifact writing.
//!
//! The writer consumes transformed rows sorted by partition value, buffers
//! them per resolved record-time partition, and flushes JSON Lines
//! artifacts to the staging area. A buffer flushes when it reaches the
//! configured row cap, when the partition value changes, or at end of
//! stream. Oversized partitions split into sequentially numbered files
//! with deterministic names (`part-00000.jsonl`, `part-00001.jsonl`, …).

use std::sync::Arc;

use argent_core::dataset::WriterOptions;
use argent_core::layout::SilverLayout;
use argent_core::record::Row;
use argent_core::storage::{StorageBackend, WritePrecondition};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SilverError};

/// One flushed artifact, reported as the flush completes.
#[derive(Debug, Clone)]
pub struct FlushedArtifact {
    /// Record-time partition value, `None` for unpartitioned output.
    pub partition: Option<String>,
    /// Path the artifact was staged at.
    pub staging_path: String,
    /// Path the artifact will be visible at after promotion.
    pub visible_path: String,
    /// Rows in the artifact.
    pub row_count: u64,
    /// Serialized size in bytes.
    pub byte_size: u64,
}

/// Streams transformed rows into bounded partition buffers.
pub struct ChunkedWriter {
    storage: Arc<dyn StorageBackend>,
    flush_threshold: usize,
}

impl ChunkedWriter {
    /// Creates a writer with the given buffering options.
    ///
    /// Object storage cannot append, so every buffer flush creates one
    /// artifact file: the in-flight buffer bound and the file-split
    /// threshold meet at the smaller of the two configured values.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, options: WriterOptions) -> Self {
        Self {
            storage,
            flush_threshold: options
                .max_rows_per_chunk
                .min(options.max_rows_per_artifact)
                .max(1),
        }
    }

    /// Writes `rows` (sorted by partition value) into staged artifacts.
    ///
    /// `record_time_key` is the partition key name; rows carry their
    /// resolved partition value. The writer checks `cancel` between
    /// flushes so a cooperative cancellation never leaves a partially
    /// written buffer behind as a visible artifact.
    ///
    /// # Errors
    ///
    /// Returns [`SilverError::Cancelled`] on cancellation, or a write
    /// failure from the storage capability.
    pub async fn write_partitions<I>(
        &self,
        layout: &SilverLayout,
        run_id: &str,
        record_time_key: Option<&str>,
        rows: I,
        cancel: &CancellationToken,
    ) -> Result<Vec<FlushedArtifact>>
    where
        I: IntoIterator<Item = (Option<String>, Row)>,
    {
        let mut flushed = Vec::new();
        let mut buffer: Vec<Row> = Vec::new();
        let mut current: Option<Option<String>> = None;
        let mut artifact_index = 0usize;

        for (partition, row) in rows {
            let partition_changed = current.as_ref().is_some_and(|c| *c != partition);

            if partition_changed {
                self.flush(
                    layout,
                    run_id,
                    record_time_key,
                    current.as_ref().and_then(Clone::clone),
                    &mut buffer,
                    artifact_index,
                    &mut flushed,
                    cancel,
                )
                .await?;
                artifact_index = 0;
            }
            current = Some(partition);
            buffer.push(row);

            if buffer.len() >= self.flush_threshold {
                self.flush(
                    layout,
                    run_id,
                    record_time_key,
                    current.as_ref().and_then(Clone::clone),
                    &mut buffer,
                    artifact_index,
                    &mut flushed,
                    cancel,
                )
                .await?;
                artifact_index += 1;
            }
        }

        if !buffer.is_empty() {
            self.flush(
                layout,
                run_id,
                record_time_key,
                current.as_ref().and_then(Clone::clone),
                &mut buffer,
                artifact_index,
                &mut flushed,
                cancel,
            )
            .await?;
        }

        Ok(flushed)
    }

    #[allow(clippy::too_many_arguments)]
    async fn flush(
        &self,
        layout: &SilverLayout,
        run_id: &str,
        record_time_key: Option<&str>,
        partition: Option<String>,
        buffer: &mut Vec<Row>,
        artifact_index: usize,
        flushed: &mut Vec<FlushedArtifact>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(SilverError::Cancelled);
        }

        let bytes = encode_jsonl(buffer)?;
        let byte_size = bytes.len() as u64;
        let row_count = buffer.len() as u64;
        buffer.clear();

        let record_time = match (record_time_key, partition.as_deref()) {
            (Some(key), Some(value)) => Some((key, value)),
            _ => None,
        };
        let visible_path = layout.artifact_path(record_time, artifact_index);
        let staging_path = layout.staging_path(run_id, &visible_path);

        self.storage
            .put(&staging_path, bytes, WritePrecondition::None)
            .await
            .map_err(|e| SilverError::Write {
                message: format!("flushing {staging_path}: {e}"),
            })?;

        tracing::info!(
            partition = partition.as_deref().unwrap_or("-"),
            artifact = %visible_path,
            rows = row_count,
            bytes = byte_size,
            "flushed partition buffer"
        );

        flushed.push(FlushedArtifact {
            partition,
            staging_path,
            visible_path,
            row_count,
            byte_size,
        });
        Ok(())
    }
}

/// Encodes rows as JSON Lines. Row maps are column-ordered, so the bytes
/// are deterministic for a given row sequence.
pub fn encode_jsonl(rows: &[Row]) -> Result<Bytes> {
    let mut out = Vec::new();
    for row in rows {
        let line = serde_json::to_vec(row)
            .map_err(|e| argent_core::Error::serialization("encoding row", e))?;
        out.extend_from_slice(&line);
        out.push(b'\n');
    }
    Ok(Bytes::from(out))
}

/// Decodes a JSON Lines payload into rows, reporting unparseable lines.
pub fn decode_jsonl(bytes: &[u8]) -> (Vec<Row>, Vec<(usize, String)>) {
    let mut rows = Vec::new();
    let mut bad_lines = Vec::new();
    for (index, line) in bytes.split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Row>(line) {
            Ok(row) => rows.push(row),
            Err(_) => bad_lines.push((index, String::from_utf8_lossy(line).into_owned())),
        }
    }
    (rows, bad_lines)
}
