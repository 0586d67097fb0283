//! Pipeline-level contracts: rerun determinism, replacement semantics,
//! quality thresholds, staged promotion, and integrity verification.

use std::sync::Arc;

use argent_core::canonical::sha256_prefixed;
use argent_core::dataset::{
    CuratedModel, DatasetDescriptor, EntityKind, ErrorThresholds, QualityMode, SchemaPolicy,
    WriterOptions,
};
use argent_core::record::{FieldValue, Row};
use argent_core::storage::{MemoryBackend, StorageBackend, WritePrecondition};
use argent_silver::SilverError;
use argent_silver::pipeline::{PipelineOptions, SilverPipeline};
use argent_silver::writer::{decode_jsonl, encode_jsonl};
use bytes::Bytes;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

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

fn order_row(order_id: i64, updated_at: i64, status: &str) -> Row {
    Row::new()
        .with("order_id", FieldValue::Int64(order_id))
        .with("updated_at", FieldValue::Int64(updated_at))
        .with("status", FieldValue::Text(status.into()))
}

async fn seed_bronze_artifact(backend: &MemoryBackend, name: &str, bytes: Bytes) {
    backend
        .put(
            &format!("system=erp/table=orders/pattern=full/dt=2025-06-01/{name}"),
            bytes,
            WritePrecondition::None,
        )
        .await
        .expect("seed bronze artifact");
}

async fn seed_bronze(backend: &MemoryBackend, rows: &[Row]) {
    seed_bronze_artifact(
        backend,
        "chunk-000.jsonl",
        encode_jsonl(rows).expect("encode"),
    )
    .await;
}

fn load_date() -> NaiveDate {
    "2025-06-01".parse().expect("valid date literal")
}

async fn run_fresh(
    rows: &[Row],
    d: DatasetDescriptor,
) -> (Arc<MemoryBackend>, argent_silver::LoadMetadata) {
    let backend = Arc::new(MemoryBackend::new());
    seed_bronze(&backend, rows).await;
    let pipeline = SilverPipeline::new(backend.clone(), d, PipelineOptions::default())
        .expect("pipeline builds");
    let metadata = pipeline
        .run(load_date(), &CancellationToken::new())
        .await
        .expect("load succeeds");
    (backend, metadata)
}

#[tokio::test]
async fn reruns_on_identical_input_are_checksum_identical() {
    let rows = vec![
        order_row(1, 10, "pending"),
        order_row(1, 20, "shipped"),
        order_row(2, 5, "open"),
    ];

    let (_, first) = run_fresh(&rows, descriptor(CuratedModel::ScdType1)).await;
    let (_, second) = run_fresh(&rows, descriptor(CuratedModel::ScdType1)).await;

    assert_eq!(first.load_checksum, second.load_checksum);
    assert_eq!(first.artifacts, second.artifacts);
    assert_eq!(first.state_checksum, second.state_checksum);
}

#[tokio::test]
async fn periodic_snapshot_rerun_fully_replaces_the_load_partition() {
    // Scenario: first run writes three rows, the rerun writes one.
    let backend = Arc::new(MemoryBackend::new());
    seed_bronze(
        &backend,
        &[
            order_row(1, 10, "a"),
            order_row(2, 10, "b"),
            order_row(3, 10, "c"),
        ],
    )
    .await;

    let mut d = descriptor(CuratedModel::PeriodicSnapshot);
    d.record_time_column = None;
    let pipeline = SilverPipeline::new(backend.clone(), d, PipelineOptions::default())
        .expect("pipeline builds");

    let first = pipeline
        .run(load_date(), &CancellationToken::new())
        .await
        .expect("first run succeeds");
    assert_eq!(first.total_rows, 3);

    // Replace the Bronze input with a smaller extraction and rerun.
    seed_bronze(&backend, &[order_row(9, 1, "only")]).await;
    let second = pipeline
        .run(load_date(), &CancellationToken::new())
        .await
        .expect("second run succeeds");
    assert_eq!(second.total_rows, 1);

    // No residual artifacts from the first run remain at that load_date.
    let listed = backend
        .list("domain=sales/entity=orders/v1/load_date=2025-06-01/")
        .await
        .expect("list visible");
    let artifact_count = listed
        .iter()
        .filter(|m| m.path.ends_with(".jsonl") && m.path.contains("part-"))
        .count();
    assert_eq!(artifact_count, 1);

    let bytes = backend
        .get("domain=sales/entity=orders/v1/load_date=2025-06-01/part-00000.jsonl")
        .await
        .expect("read artifact");
    let (rows, _) = decode_jsonl(&bytes);
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn bad_rows_at_exactly_the_percent_threshold_succeed() {
    // 1 bad of 10 total = 10.0%, exactly at the threshold.
    let mut rows: Vec<Row> = (1..=9).map(|i| order_row(i, 10, "ok")).collect();
    rows.push(Row::new().with("order_id", FieldValue::Int64(99))); // no order column

    let mut d = descriptor(CuratedModel::ScdType1);
    d.error_thresholds = ErrorThresholds {
        max_bad_records: None,
        max_bad_percent: Some(10.0),
    };

    let (_, metadata) = run_fresh(&rows, d).await;
    assert_eq!(metadata.error_count, 1);
    assert_eq!(metadata.total_rows, 9);
}

#[tokio::test]
async fn bad_rows_above_the_percent_threshold_fail_the_partition() {
    // 2 bad of 10 total = 20% > 10%.
    let mut rows: Vec<Row> = (1..=8).map(|i| order_row(i, 10, "ok")).collect();
    rows.push(Row::new().with("order_id", FieldValue::Int64(98)));
    rows.push(Row::new().with("order_id", FieldValue::Int64(99)));

    let mut d = descriptor(CuratedModel::ScdType1);
    d.error_thresholds = ErrorThresholds {
        max_bad_records: None,
        max_bad_percent: Some(10.0),
    };

    let backend = Arc::new(MemoryBackend::new());
    seed_bronze(&backend, &rows).await;
    let pipeline = SilverPipeline::new(backend.clone(), d, PipelineOptions::default())
        .expect("pipeline builds");

    let err = pipeline
        .run(load_date(), &CancellationToken::new())
        .await
        .expect_err("threshold breach must fail");
    assert!(matches!(err, SilverError::QualityThreshold { .. }));

    // No partition data or metadata becomes visible, but the quarantine
    // listing does, so operators can inspect the offending rows.
    let visible = backend.list("domain=sales/").await.expect("list");
    assert!(visible.iter().all(|m| m.path.contains("_quarantine/")));
    assert_eq!(visible.len(), 1);
    assert!(
        backend
            .list("_staging/")
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn fail_fast_aborts_on_the_first_bad_row() {
    let rows = vec![
        order_row(1, 10, "ok"),
        Row::new().with("order_id", FieldValue::Int64(2)),
    ];

    let mut d = descriptor(CuratedModel::ScdType1);
    d.quality_mode = QualityMode::FailFast;

    let backend = Arc::new(MemoryBackend::new());
    seed_bronze(&backend, &rows).await;
    let pipeline = SilverPipeline::new(backend.clone(), d, PipelineOptions::default())
        .expect("pipeline builds");

    let err = pipeline
        .run(load_date(), &CancellationToken::new())
        .await
        .expect_err("fail-fast must abort");
    assert!(matches!(err, SilverError::QualityThreshold { .. }));
}

#[tokio::test]
async fn quarantine_artifact_lists_offending_rows_with_reasons() {
    let rows = vec![
        order_row(1, 10, "ok"),
        Row::new().with("order_id", FieldValue::Int64(7)), // missing order column
    ];

    let (backend, metadata) = run_fresh(&rows, descriptor(CuratedModel::ScdType1)).await;

    let quarantine = metadata.quarantine.expect("quarantine summary present");
    assert_eq!(quarantine.row_count, 1);

    let bytes = backend
        .get(&quarantine.artifact)
        .await
        .expect("quarantine artifact readable");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("updated_at"));
    assert!(text.contains("\"order_id\":7"));
    assert_eq!(sha256_prefixed(text.as_bytes()), quarantine.checksum);
}

#[tokio::test]
async fn tampered_bronze_fails_integrity_verification() {
    let backend = Arc::new(MemoryBackend::new());
    let rows = vec![order_row(1, 10, "ok")];
    let bytes = encode_jsonl(&rows).expect("encode");

    seed_bronze_artifact(&backend, "chunk-000.jsonl", bytes.clone()).await;
    let manifest = serde_json::json!({
        "files": { "chunk-000.jsonl": sha256_prefixed(&bytes) }
    });
    seed_bronze_artifact(
        &backend,
        "_checksums.json",
        Bytes::from(serde_json::to_vec(&manifest).expect("manifest json")),
    )
    .await;

    // Corrupt the artifact after the manifest was produced.
    seed_bronze_artifact(&backend, "chunk-000.jsonl", Bytes::from("tampered\n")).await;

    let mut d = descriptor(CuratedModel::ScdType1);
    d.require_checksum = true;

    let pipeline = SilverPipeline::new(backend, d, PipelineOptions::default())
        .expect("pipeline builds");
    let err = pipeline
        .run(load_date(), &CancellationToken::new())
        .await
        .expect_err("tampered input must fail");
    assert!(matches!(err, SilverError::Integrity { .. }));
}

#[tokio::test]
async fn cancellation_leaves_nothing_visible() {
    let backend = Arc::new(MemoryBackend::new());
    seed_bronze(&backend, &[order_row(1, 10, "ok")]).await;

    let pipeline = SilverPipeline::new(
        backend.clone(),
        descriptor(CuratedModel::ScdType1),
        PipelineOptions::default(),
    )
    .expect("pipeline builds");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline
        .run(load_date(), &cancel)
        .await
        .expect_err("cancelled run must fail");
    assert!(matches!(err, SilverError::Cancelled));

    assert!(
        backend
            .list("domain=sales/")
            .await
            .expect("list")
            .is_empty()
    );
    assert!(
        backend
            .list("_staging/")
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn lenient_policy_records_the_evolved_profile_version() {
    let rows = vec![
        order_row(1, 10, "ok"),
        order_row(2, 20, "ok").with("channel", FieldValue::Text("web".into())),
    ];

    let (_, metadata) = run_fresh(&rows, descriptor(CuratedModel::ScdType1)).await;

    // Seed profile is version 1; admitting `channel` bumps it.
    assert_eq!(metadata.schema_profile_version, 2);
    assert_eq!(metadata.total_rows, 2);
    assert_eq!(metadata.error_count, 0);
}

#[tokio::test]
async fn empty_load_mode_records_an_empty_metadata_record() {
    let backend = Arc::new(MemoryBackend::new());

    let mut d = descriptor(CuratedModel::PeriodicSnapshot);
    d.allow_empty_load = true;

    let pipeline = SilverPipeline::new(backend.clone(), d, PipelineOptions::default())
        .expect("pipeline builds");
    let metadata = pipeline
        .run(load_date(), &CancellationToken::new())
        .await
        .expect("empty load succeeds");

    assert_eq!(metadata.total_rows, 0);
    assert!(metadata.artifacts.is_empty());

    // The metadata record itself is visible.
    assert!(
        backend
            .head("domain=sales/entity=orders/v1/load_date=2025-06-01/load.metadata.json")
            .await
            .expect("head")
            .is_some()
    );
}
