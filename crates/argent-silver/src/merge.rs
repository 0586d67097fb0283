//! The merge engine: five curated transformation models.
//!
//! A model application is a pure function of
//! `(prior current-state snapshot, incoming batch, business keys, order
//! column)` — the prior state is an explicit, versioned snapshot parameter,
//! never a live cursor the engine reaches back into.
//!
//! The reduction for state models is a single authoritative pass per
//! business key. Rows are sorted by `(canonical business key, order
//! column)` before reducing so the result is deterministic regardless of
//! input ordering; the tie-break on an equal order value is "last in
//! sorted order wins" (batch rows sort after prior-state rows).

use std::collections::BTreeMap;

use argent_core::dataset::{CuratedModel, DatasetDescriptor};
use argent_core::record::{FieldValue, Row};

use crate::error::{Result, SilverError};

/// Effective-interval start column emitted by SCD Type 2.
pub const EFFECTIVE_FROM: &str = "effective_from";
/// Effective-interval end column emitted by SCD Type 2 (null while open).
pub const EFFECTIVE_TO: &str = "effective_to";
/// Current-row flag emitted by SCD Type 2.
pub const IS_CURRENT: &str = "is_current";

/// Result of applying a curated model to a batch.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// The curated rows to write for this load.
    pub rows: Vec<Row>,
    /// Current-state snapshot to persist for the next load (state models
    /// only; `None` for passthrough models).
    pub state: Option<Vec<Row>>,
}

/// A row the engine cannot merge (quarantine candidate).
#[derive(Debug, Clone)]
pub struct UnmergeableRow {
    /// Index of the row within its source batch.
    pub row_index: usize,
    /// The offending row.
    pub row: Row,
    /// Why the row cannot be merged.
    pub reason: String,
}

/// Applies one of the five curated transformation models.
#[derive(Debug)]
pub struct MergeEngine {
    model: CuratedModel,
    business_keys: Vec<String>,
    order_column: Option<String>,
}

impl MergeEngine {
    /// Builds the engine for a dataset, re-checking model requirements.
    ///
    /// # Errors
    ///
    /// Returns [`SilverError::Configuration`] if the model's required
    /// business keys or order column are missing. This runs at job start,
    /// never mid-batch.
    pub fn for_dataset(descriptor: &DatasetDescriptor) -> Result<Self> {
        if descriptor.model.requires_business_keys() && descriptor.business_keys.is_empty() {
            return Err(SilverError::Configuration {
                field: "business_keys",
                message: format!(
                    "model {} requires at least one business key",
                    descriptor.model
                ),
            });
        }
        if descriptor.model.requires_order_column() && descriptor.order_column.is_none() {
            return Err(SilverError::Configuration {
                field: "order_column",
                message: format!("model {} requires an order column", descriptor.model),
            });
        }

        Ok(Self {
            model: descriptor.model,
            business_keys: descriptor.business_keys.clone(),
            order_column: descriptor.order_column.clone(),
        })
    }

    /// The model this engine applies.
    #[must_use]
    pub fn model(&self) -> CuratedModel {
        self.model
    }

    /// Splits rows into mergeable rows and quarantine candidates.
    ///
    /// For models that order by the order column, rows missing a usable
    /// order value cannot take part in the reduction and are routed to the
    /// error policy instead of silently winning or losing merges.
    #[must_use]
    pub fn screen(&self, rows: Vec<Row>) -> (Vec<Row>, Vec<UnmergeableRow>) {
        let Some(order_column) = self.order_column.as_deref() else {
            return (rows, Vec::new());
        };
        if !self.model.requires_order_column() {
            return (rows, Vec::new());
        }

        let mut mergeable = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        for (row_index, row) in rows.into_iter().enumerate() {
            if row.has_value(order_column) {
                mergeable.push(row);
            } else {
                rejected.push(UnmergeableRow {
                    row_index,
                    row,
                    reason: format!("missing order column `{order_column}` value"),
                });
            }
        }
        (mergeable, rejected)
    }

    /// Applies the model to a batch, consulting the prior current-state
    /// snapshot where the model requires it.
    ///
    /// # Errors
    ///
    /// Returns an error if key encoding fails or a state row is malformed.
    pub fn apply(&self, prior: Option<&[Row]>, batch: Vec<Row>) -> Result<MergeOutcome> {
        match self.model {
            CuratedModel::PeriodicSnapshot | CuratedModel::IncrementalMerge => Ok(MergeOutcome {
                rows: batch,
                state: None,
            }),
            CuratedModel::FullMergeDedupe | CuratedModel::ScdType1 => {
                let reduced = self.reduce_latest(prior, batch)?;
                Ok(MergeOutcome {
                    rows: reduced.clone(),
                    state: Some(reduced),
                })
            }
            CuratedModel::ScdType2 => self.apply_scd2(prior, batch),
        }
    }

    fn order_column(&self) -> Result<&str> {
        self.order_column
            .as_deref()
            .ok_or_else(|| SilverError::Configuration {
                field: "order_column",
                message: format!("model {} requires an order column", self.model),
            })
    }

    /// Union of prior state and batch, reduced to the newest row per key.
    fn reduce_latest(&self, prior: Option<&[Row]>, batch: Vec<Row>) -> Result<Vec<Row>> {
        let order_column = self.order_column()?;

        // Prior rows first: at an equal order value the batch row sorts
        // later and wins the stable-sort tie-break.
        let mut rows: Vec<Row> = prior.unwrap_or_default().to_vec();
        rows.extend(batch);

        let mut keyed: Vec<(String, Row)> = rows
            .into_iter()
            .map(|row| Ok((row.canonical_key(&self.business_keys)?, row)))
            .collect::<Result<_>>()?;

        keyed.sort_by(|(key_a, row_a), (key_b, row_b)| {
            key_a.cmp(key_b).then_with(|| {
                order_value(row_a, order_column).total_cmp(&order_value(row_b, order_column))
            })
        });

        let mut latest: BTreeMap<String, Row> = BTreeMap::new();
        for (key, row) in keyed {
            // Later sorted rows overwrite: maximum order value per key,
            // last in sorted order on ties.
            latest.insert(key, row);
        }

        Ok(latest.into_values().collect())
    }

    /// Per-key open/close state machine over the full timeline.
    fn apply_scd2(&self, prior: Option<&[Row]>, batch: Vec<Row>) -> Result<MergeOutcome> {
        let order_column = self.order_column()?;

        let mut closed: Vec<(String, Row)> = Vec::new();
        let mut open_by_key: BTreeMap<String, Row> = BTreeMap::new();

        for row in prior.unwrap_or_default() {
            let key = row.canonical_key(&self.business_keys)?;
            let is_open = matches!(row.get(IS_CURRENT), Some(FieldValue::Boolean(true)));
            if is_open {
                if open_by_key.insert(key.clone(), row.clone()).is_some() {
                    return Err(SilverError::merge_state(format!(
                        "prior state holds more than one open row for key {key}"
                    )));
                }
            } else {
                closed.push((key, row.clone()));
            }
        }

        for (key, observation) in self.sorted_observations(batch)? {
            let record_time = observation
                .get(order_column)
                .cloned()
                .unwrap_or(FieldValue::Null);
            let attrs = observation.without(order_column);

            match open_by_key.get(&key) {
                None => {
                    open_by_key.insert(key, open_row(attrs, record_time));
                }
                Some(open) => {
                    if scd2_attrs(open) == attrs {
                        // Unchanged observation: no-op, no emission.
                        continue;
                    }
                    let mut closing = open.clone();
                    closing.set(EFFECTIVE_TO, record_time.clone());
                    closing.set(IS_CURRENT, FieldValue::Boolean(false));
                    closed.push((key.clone(), closing));
                    open_by_key.insert(key, open_row(attrs, record_time));
                }
            }
        }

        // Assemble the timeline sorted by (key, effective_from) so output
        // bytes are deterministic.
        let mut timeline: Vec<(String, Row)> = closed;
        timeline.extend(open_by_key);
        timeline.sort_by(|(key_a, row_a), (key_b, row_b)| {
            key_a.cmp(key_b).then_with(|| {
                order_value(row_a, EFFECTIVE_FROM).total_cmp(&order_value(row_b, EFFECTIVE_FROM))
            })
        });

        let rows: Vec<Row> = timeline.into_iter().map(|(_, row)| row).collect();
        Ok(MergeOutcome {
            state: Some(rows.clone()),
            rows,
        })
    }

    /// Sorts batch rows by (key, order value) and drops exact duplicate
    /// observations (same key, same order value), keeping the last in
    /// sorted order. Repeated extraction rows must not produce spurious
    /// transitions.
    fn sorted_observations(&self, batch: Vec<Row>) -> Result<Vec<(String, Row)>> {
        let order_column = self.order_column()?;

        let mut keyed: Vec<(String, Row)> = batch
            .into_iter()
            .map(|row| Ok((row.canonical_key(&self.business_keys)?, row)))
            .collect::<Result<_>>()?;

        keyed.sort_by(|(key_a, row_a), (key_b, row_b)| {
            key_a.cmp(key_b).then_with(|| {
                order_value(row_a, order_column).total_cmp(&order_value(row_b, order_column))
            })
        });

        let mut deduped: Vec<(String, Row)> = Vec::with_capacity(keyed.len());
        for (key, row) in keyed {
            if let Some((last_key, last_row)) = deduped.last() {
                if *last_key == key
                    && order_value(last_row, order_column)
                        .total_cmp(&order_value(&row, order_column))
                        .is_eq()
                {
                    deduped.pop();
                }
            }
            deduped.push((key, row));
        }

        Ok(deduped)
    }
}

fn order_value(row: &Row, order_column: &str) -> FieldValue {
    row.get(order_column).cloned().unwrap_or(FieldValue::Null)
}

/// Builds a fresh open row from observed attributes.
fn open_row(attrs: Row, record_time: FieldValue) -> Row {
    attrs
        .with(EFFECTIVE_FROM, record_time)
        .with(EFFECTIVE_TO, FieldValue::Null)
        .with(IS_CURRENT, FieldValue::Boolean(true))
}

/// Projects the attribute set of an SCD2 timeline row (bookkeeping columns
/// removed).
fn scd2_attrs(row: &Row) -> Row {
    let mut attrs = row.clone();
    attrs.remove(EFFECTIVE_FROM);
    attrs.remove(EFFECTIVE_TO);
    attrs.remove(IS_CURRENT);
    attrs
}
