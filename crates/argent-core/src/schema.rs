//! Versioned schema profiles and semantic column types.
//!
//! A schema profile is the dataset's contract for incoming batches: column
//! name → semantic type + nullability, stamped with a monotonically
//! increasing version. The reconciler evolves profiles under the configured
//! policy; downstream consumers only ever read the latest version for a
//! dataset + `load_date`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::FieldValue;

/// Semantic column types.
///
/// Widening order is `Int64 → Float64 → Text`; `Date`/`Timestamp`/`Boolean`
/// widen only to `Text`. Anything against that order is narrowing and is
/// rejected under every schema policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Boolean value.
    Boolean,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float.
    Float64,
    /// Calendar date.
    Date,
    /// UTC timestamp.
    Timestamp,
    /// Arbitrary text.
    Text,
}

impl SemanticType {
    /// Infers the semantic type of a value. Returns `None` for nulls.
    #[must_use]
    pub fn of_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Null => None,
            FieldValue::Boolean(_) => Some(Self::Boolean),
            FieldValue::Int64(_) => Some(Self::Int64),
            FieldValue::Float64(_) => Some(Self::Float64),
            FieldValue::Date(_) => Some(Self::Date),
            FieldValue::Timestamp(_) => Some(Self::Timestamp),
            FieldValue::Text(_) => Some(Self::Text),
        }
    }

    /// Returns true if a value of type `self` may be stored in a column of
    /// type `target` without loss.
    #[must_use]
    pub fn widens_to(self, target: Self) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Self::Int64, Self::Float64) | (_, Self::Text) => true,
            _ => false,
        }
    }

    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for SemanticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type and nullability of one profiled column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnProfile {
    /// Semantic type of the column.
    pub semantic_type: SemanticType,
    /// Whether nulls are allowed.
    pub nullable: bool,
}

impl ColumnProfile {
    /// A nullable column of the given type.
    #[must_use]
    pub const fn nullable(semantic_type: SemanticType) -> Self {
        Self {
            semantic_type,
            nullable: true,
        }
    }

    /// A non-nullable column of the given type.
    #[must_use]
    pub const fn required(semantic_type: SemanticType) -> Self {
        Self {
            semantic_type,
            nullable: false,
        }
    }

    /// Returns true if `value` conforms to this column profile.
    #[must_use]
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match SemanticType::of_value(value) {
            None => self.nullable,
            Some(ty) => ty.widens_to(self.semantic_type),
        }
    }
}

/// A versioned mapping from column names to their profiles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaProfile {
    /// Monotonically increasing profile version.
    pub version: u64,
    /// Column name → profile, in column order.
    pub columns: BTreeMap<String, ColumnProfile>,
}

impl SchemaProfile {
    /// Creates a profile at version 1 from the given columns.
    #[must_use]
    pub fn new(columns: BTreeMap<String, ColumnProfile>) -> Self {
        Self {
            version: 1,
            columns,
        }
    }

    /// Gets a column profile by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.get(name)
    }

    /// Returns true if the profile has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Admits a new column, bumping the version.
    ///
    /// New columns are always nullable: historical rows predate them.
    pub fn admit_column(&mut self, name: impl Into<String>, semantic_type: SemanticType) {
        self.columns
            .insert(name.into(), ColumnProfile::nullable(semantic_type));
        self.version += 1;
    }

    /// Widens an existing column to a broader type, bumping the version.
    ///
    /// Callers must have verified the change is a widening; narrowing a
    /// column through this method is a logic error upstream.
    pub fn widen_column(&mut self, name: &str, semantic_type: SemanticType) {
        if let Some(profile) = self.columns.get_mut(name) {
            profile.semantic_type = semantic_type;
            self.version += 1;
        }
    }

    /// Names of non-nullable columns.
    pub fn required_columns(&self) -> impl Iterator<Item = &String> {
        self.columns
            .iter()
            .filter(|(_, p)| !p.nullable)
            .map(|(name, _)| name)
    }
}
