//! # argent-silver
//!
//! Silver transformation and layout engine for the Argent medallion
//! pipeline.
//!
//! This crate turns partitioned Bronze record batches into curated, query-
//! ready Silver datasets:
//!
//! - **Planner**: resolves Bronze inputs and the Silver output layout,
//!   killing contradictory configuration before any I/O
//! - **Reconciler**: validates and evolves batch schemas under the
//!   configured policy (strict / lenient / auto)
//! - **Merge Engine**: applies one of five curated models (periodic
//!   snapshot, incremental merge, full-merge dedupe, SCD Type 1/2)
//! - **Chunked Writer**: streams rows into bounded partition buffers and
//!   flushes deterministic JSON Lines artifacts
//! - **Error Policy**: quarantines bad rows and thresholds failures
//! - **Integrity Recorder**: per-artifact checksums and the load metadata
//!   record — the sole contract downstream consumers read
//!
//! ## Commit discipline
//!
//! Every write lands in a run-scoped staging prefix and is promoted to the
//! visible path only after the whole load (including metadata) succeeds.
//! A failed or cancelled run leaves nothing partially visible.
//!
//! ## Example
//!
//! ```rust,ignore
//! use argent_silver::prelude::*;
//!
//! let pipeline = SilverPipeline::new(storage, descriptor, PipelineOptions::default())?;
//! let metadata = pipeline.run(load_date, &cancel).await?;
//! println!("promoted {} rows", metadata.total_rows);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod integrity;
pub mod merge;
pub mod pipeline;
pub mod planner;
pub mod quality;
pub mod reconciler;
pub mod state;
pub mod writer;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Result, SilverError};
    pub use crate::integrity::{ArtifactRecord, IntegrityRecorder, LoadMetadata};
    pub use crate::merge::{EFFECTIVE_FROM, EFFECTIVE_TO, IS_CURRENT, MergeEngine, MergeOutcome};
    pub use crate::pipeline::{PipelineOptions, SilverPipeline};
    pub use crate::planner::{LoadPlan, PartitionPlanner, ResolvedBronzePartition};
    pub use crate::quality::{ErrorPolicy, QuarantineSummary, QuarantinedRow};
    pub use crate::reconciler::{ReconcileOutcome, SchemaReconciler};
    pub use crate::state::CurrentStateStore;
    pub use crate::writer::{ChunkedWriter, FlushedArtifact};
}

pub use error::{Result, SilverError};
pub use integrity::{IntegrityRecorder, LoadMetadata};
pub use merge::{MergeEngine, MergeOutcome};
pub use pipeline::{PipelineOptions, SilverPipeline};
pub use planner::{LoadPlan, PartitionPlanner};
pub use quality::ErrorPolicy;
pub use reconciler::SchemaReconciler;
pub use writer::ChunkedWriter;
