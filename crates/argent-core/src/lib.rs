//! # argent-core
//!
//! Core abstractions for the Argent medallion curation engine.
//!
//! This crate provides the foundational types shared by every Argent component:
//!
//! - **Dataset Descriptors**: Validated configuration for one curated dataset
//! - **Records & Schema Profiles**: Typed rows and versioned column profiles
//! - **Layer Layout**: Bronze/Silver partition paths built from configured key names
//! - **Storage Capability**: Abstract object-storage interface for all layers
//! - **Canonical Encoding**: Deterministic serialization for checksums and reruns
//!
//! ## Crate Boundary
//!
//! `argent-core` is the only crate allowed to define shared primitives.
//! The Silver engine (`argent-silver`) consumes these contracts; it never
//! redefines them.
//!
//! ## Example
//!
//! ```rust
//! use argent_core::prelude::*;
//!
//! let keys = SilverPathKeys::default();
//! assert_eq!(keys.domain_key, "domain");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod canonical;
pub mod dataset;
pub mod error;
pub mod layout;
pub mod observability;
pub mod record;
pub mod schema;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use argent_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::canonical::{sha256_prefixed, to_canonical_bytes};
    pub use crate::dataset::{
        CuratedModel, DatasetDescriptor, EntityKind, ErrorThresholds, HistoryMode, QualityMode,
        SchemaPolicy, WriterOptions,
    };
    pub use crate::error::{Error, Result};
    pub use crate::layout::{
        BronzePartitionRef, BronzePathKeys, ChecksumManifest, SilverLayout, SilverPathKeys,
    };
    pub use crate::record::{FieldValue, RecordBatch, Row};
    pub use crate::schema::{ColumnProfile, SchemaProfile, SemanticType};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

// Re-export key types at crate root for ergonomics
pub use dataset::{CuratedModel, DatasetDescriptor, EntityKind, HistoryMode, SchemaPolicy};
pub use error::{Error, Result};
pub use layout::{BronzePartitionRef, BronzePathKeys, SilverLayout, SilverPathKeys};
pub use observability::{LogFormat, init_logging};
pub use record::{FieldValue, RecordBatch, Row};
pub use schema::{SchemaProfile, SemanticType};
pub use storage::{MemoryBackend, StorageBackend, WritePrecondition, WriteResult};
