//! Schema reconciliation: validate and evolve batches against the
//! dataset's versioned schema profile.
//!
//! Three policies, from most to least conservative:
//!
//! - **Strict** — exact type match required; unknown columns and missing
//!   expected columns are violations.
//! - **Lenient** — new columns are admitted (bumping the profile version),
//!   missing nullable columns are null-backfilled, and numeric widening
//!   (`Int64 → Float64`) is accepted; everything else is a violation.
//!   Type relaxation to `Text` is *not* performed implicitly.
//! - **Auto** — best-effort value coercion toward the profiled type before
//!   falling back to lenient rules. Every coercion is logged.
//!
//! Violations are per-row and routed to the error policy; the reconciler
//! never aborts a batch by itself.

use argent_core::dataset::SchemaPolicy;
use argent_core::record::{FieldValue, RecordBatch, Row};
use argent_core::schema::{ColumnProfile, SchemaProfile, SemanticType};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// A row rejected during reconciliation.
#[derive(Debug, Clone)]
pub struct RowViolation {
    /// Index of the row within its source batch.
    pub row_index: usize,
    /// The offending row, as received.
    pub row: Row,
    /// Why the row was rejected.
    pub reason: String,
}

/// Result of reconciling one batch.
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Accepted rows (coerced and backfilled as the policy allows),
    /// stamped with the profile version they now conform to.
    pub batch: RecordBatch,
    /// Rejected rows with reasons, in source order.
    pub violations: Vec<RowViolation>,
    /// Number of value coercions performed (auto policy only).
    pub coercions: u64,
}

/// Validates and evolves incoming batches against a schema profile.
pub struct SchemaReconciler {
    policy: SchemaPolicy,
    profile: SchemaProfile,
}

impl SchemaReconciler {
    /// Creates a reconciler with the given policy and starting profile.
    #[must_use]
    pub fn new(policy: SchemaPolicy, profile: SchemaProfile) -> Self {
        Self { policy, profile }
    }

    /// The current schema profile.
    #[must_use]
    pub fn profile(&self) -> &SchemaProfile {
        &self.profile
    }

    /// Seeds an empty profile from the first row of the first batch.
    ///
    /// Column types are inferred from the row's non-null values; columns
    /// in `required` are marked non-nullable. Columns that only appear in
    /// later rows go through normal policy evolution. No-op if the profile
    /// already has columns.
    pub fn seed_profile(&mut self, rows: &[Row], required: &[String]) {
        if !self.profile.is_empty() {
            return;
        }
        let Some(first) = rows.first() else {
            return;
        };

        let mut columns = std::collections::BTreeMap::new();
        for (name, value) in first.iter() {
            if let Some(ty) = SemanticType::of_value(value) {
                let profile = if required.contains(name) {
                    ColumnProfile::required(ty)
                } else {
                    ColumnProfile::nullable(ty)
                };
                columns.insert(name.clone(), profile);
            }
        }
        self.profile = SchemaProfile::new(columns);
    }

    /// Reconciles one batch against the profile, evolving it as the policy
    /// allows.
    pub fn reconcile(&mut self, rows: Vec<Row>) -> ReconcileOutcome {
        if matches!(self.policy, SchemaPolicy::Lenient | SchemaPolicy::Auto) {
            self.admit_new_columns(&rows);
        }

        let mut accepted = Vec::with_capacity(rows.len());
        let mut violations = Vec::new();
        let mut coercions = 0u64;

        for (row_index, row) in rows.into_iter().enumerate() {
            match self.reconcile_row(row.clone(), &mut coercions) {
                Ok(reconciled) => accepted.push(reconciled),
                Err(reason) => violations.push(RowViolation {
                    row_index,
                    row,
                    reason,
                }),
            }
        }

        if coercions > 0 {
            tracing::info!(
                policy = ?self.policy,
                coercions,
                profile_version = self.profile.version,
                "schema reconciliation performed value coercions"
            );
        }

        ReconcileOutcome {
            batch: RecordBatch::new(self.profile.version, accepted),
            violations,
            coercions,
        }
    }

    /// Admits columns the profile has not seen, bumping the version once
    /// per new column. Types are inferred from the first non-null value.
    fn admit_new_columns(&mut self, rows: &[Row]) {
        for row in rows {
            for (name, value) in row.iter() {
                if self.profile.column(name).is_some() {
                    continue;
                }
                if let Some(ty) = SemanticType::of_value(value) {
                    tracing::info!(column = %name, semantic_type = %ty, "admitting new column");
                    self.profile.admit_column(name.clone(), ty);
                }
            }
        }
    }

    fn reconcile_row(&mut self, mut row: Row, coercions: &mut u64) -> Result<Row, String> {
        // Unknown columns: strict rejects, lenient/auto admitted them above
        // (all-null new columns stay unknown and pass through untyped).
        if matches!(self.policy, SchemaPolicy::Strict) {
            if let Some(unknown) = row
                .columns()
                .find(|name| self.profile.column(name).is_none())
            {
                return Err(format!("unexpected column `{unknown}` under strict policy"));
            }
        }

        let profiled: Vec<(String, ColumnProfile)> = self
            .profile
            .columns
            .iter()
            .map(|(name, profile)| (name.clone(), *profile))
            .collect();

        for (name, column) in profiled {
            let value = row.get(&name).cloned().unwrap_or(FieldValue::Null);

            let Some(value_type) = SemanticType::of_value(&value) else {
                // Null or absent.
                if !column.nullable {
                    return Err(format!("missing value for non-nullable column `{name}`"));
                }
                match self.policy {
                    SchemaPolicy::Strict => {
                        if row.get(&name).is_none() {
                            return Err(format!("missing expected column `{name}`"));
                        }
                    }
                    SchemaPolicy::Lenient | SchemaPolicy::Auto => {
                        row.set(name.clone(), FieldValue::Null);
                    }
                }
                continue;
            };

            if value_type == column.semantic_type {
                continue;
            }

            match self.policy {
                SchemaPolicy::Strict => {
                    return Err(format!(
                        "type mismatch in column `{name}`: expected {}, got {}",
                        column.semantic_type, value_type
                    ));
                }
                SchemaPolicy::Lenient => {
                    if self.accept_with_widening(&name, value_type, column.semantic_type) {
                        continue;
                    }
                    return Err(format!(
                        "type change in column `{name}` rejected: {} does not widen to {}",
                        value_type, column.semantic_type
                    ));
                }
                SchemaPolicy::Auto => {
                    if self.accept_with_widening(&name, value_type, column.semantic_type) {
                        continue;
                    }
                    match coerce(&value, column.semantic_type) {
                        Some(coerced) => {
                            tracing::debug!(
                                column = %name,
                                from = %value_type,
                                to = %column.semantic_type,
                                "coerced value"
                            );
                            *coercions += 1;
                            row.set(name.clone(), coerced);
                        }
                        None => {
                            return Err(format!(
                                "cannot coerce column `{name}` from {} to {}",
                                value_type, column.semantic_type
                            ));
                        }
                    }
                }
            }
        }

        Ok(row)
    }

    /// Accepts widenable values, widening the column profile for numeric
    /// relaxation (`Int64 → Float64`). Returns false when the change is a
    /// narrowing or a relaxation lenient does not perform.
    fn accept_with_widening(
        &mut self,
        name: &str,
        value_type: SemanticType,
        column_type: SemanticType,
    ) -> bool {
        if value_type.widens_to(column_type) {
            return true;
        }
        if value_type == SemanticType::Float64 && column_type == SemanticType::Int64 {
            tracing::info!(column = %name, "widening column int64 -> float64");
            self.profile.widen_column(name, SemanticType::Float64);
            return true;
        }
        false
    }
}

/// Best-effort value coercion toward a target type (auto policy).
fn coerce(value: &FieldValue, target: SemanticType) -> Option<FieldValue> {
    match (value, target) {
        (FieldValue::Text(s), SemanticType::Int64) => {
            s.trim().parse::<i64>().ok().map(FieldValue::Int64)
        }
        (FieldValue::Text(s), SemanticType::Float64) => {
            s.trim().parse::<f64>().ok().map(FieldValue::Float64)
        }
        #[allow(clippy::cast_precision_loss)]
        (FieldValue::Int64(n), SemanticType::Float64) => Some(FieldValue::Float64(*n as f64)),
        (FieldValue::Text(s), SemanticType::Boolean) => match s.trim() {
            "true" | "1" => Some(FieldValue::Boolean(true)),
            "false" | "0" => Some(FieldValue::Boolean(false)),
            _ => None,
        },
        (FieldValue::Text(s), SemanticType::Date) => {
            s.trim().parse::<NaiveDate>().ok().map(FieldValue::Date)
        }
        (FieldValue::Text(s), SemanticType::Timestamp) => s
            .trim()
            .parse::<DateTime<Utc>>()
            .ok()
            .map(FieldValue::Timestamp),
        (FieldValue::Timestamp(ts), SemanticType::Date) => Some(FieldValue::Date(ts.date_naive())),
        (FieldValue::Boolean(b), SemanticType::Text) => {
            Some(FieldValue::Text(if *b { "true" } else { "false" }.into()))
        }
        (FieldValue::Int64(n), SemanticType::Text) => Some(FieldValue::Text(n.to_string())),
        (FieldValue::Float64(x), SemanticType::Text) => Some(FieldValue::Text(x.to_string())),
        (FieldValue::Date(d), SemanticType::Text) => Some(FieldValue::Text(d.to_string())),
        (FieldValue::Timestamp(ts), SemanticType::Text) => Some(FieldValue::Text(
            ts.to_rfc3339_opts(SecondsFormat::Micros, true),
        )),
        _ => None,
    }
}
