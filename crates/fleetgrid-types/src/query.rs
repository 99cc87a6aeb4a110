//! Sort/filter model edited by the grid, and the wire contract sent to the server.
//!
//! The grid side is typed: a [`SortSpec`] is an ordered list of keys and a
//! [`FilterSpec`] maps each column to one [`Predicate`]. The wire side
//! ([`QueryContract`], [`SortModelEntry`], [`FilterModelEntry`]) mirrors the JSON
//! body of `POST /api/<collection>/query`. Translation between the two lives in
//! the client crate; this module only defines the shapes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::row::Row;

// ============================================================================
// Field paths
// ============================================================================

/// Dotted logical column identifier, e.g. `"fuelConsumption"` or `"coordinates.x"`.
///
/// Nested paths are kept as one key end to end; the server resolves the segments.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn is_nested(&self) -> bool {
        self.0.contains('.')
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Sort
// ============================================================================

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct SortKey {
    pub field: FieldPath,
    pub direction: SortDirection,
}

/// Ordered sort keys: primary first. Order is significant and preserved on the wire.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct SortSpec(Vec<SortKey>);

impl SortSpec {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a key after the existing ones.
    pub fn then(mut self, field: impl Into<FieldPath>, direction: SortDirection) -> Self {
        self.0.push(SortKey { field: field.into(), direction });
        self
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<SortKey> for SortSpec {
    fn from_iter<I: IntoIterator<Item = SortKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Filter
// ============================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum TextOp {
    Contains,
    NotContains,
    Equals,
    NotEqual,
    StartsWith,
    EndsWith,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum NumberOp {
    Equals,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    InRange,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum DateOp {
    Equals,
    NotEqual,
    LessThan,
    GreaterThan,
    InRange,
}

/// Predicate descriptor for one column.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Text { op: TextOp, value: String },
    /// `to` is only meaningful for [`NumberOp::InRange`].
    Number { op: NumberOp, value: Option<f64>, to: Option<f64> },
    /// Dates travel as the strings the grid produced (`yyyy-MM-dd` or ISO datetime).
    Date { op: DateOp, from: String, to: Option<String> },
    Set { values: Vec<String> },
    /// A filter kind the client has no typed model for. Every field is sent as given.
    Passthrough { filter_type: String, fields: Map<String, Value> },
}

impl Predicate {
    pub fn text(op: TextOp, value: impl Into<String>) -> Self {
        Self::Text { op, value: value.into() }
    }

    pub fn number(op: NumberOp, value: f64) -> Self {
        Self::Number { op, value: Some(value), to: None }
    }

    pub fn number_range(min: f64, max: f64) -> Self {
        Self::Number { op: NumberOp::InRange, value: Some(min), to: Some(max) }
    }

    /// The wire `filterType` for this predicate.
    pub fn kind(&self) -> &str {
        match self {
            Self::Text { .. } => "text",
            Self::Number { .. } => "number",
            Self::Date { .. } => "date",
            Self::Set { .. } => "set",
            Self::Passthrough { filter_type, .. } => filter_type,
        }
    }
}

/// Column → predicate. Keys are unique; iteration order is canonical (sorted by path).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterSpec(BTreeMap<FieldPath, Predicate>);

impl FilterSpec {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Set (or replace) the predicate for a column.
    pub fn with(mut self, field: impl Into<FieldPath>, predicate: Predicate) -> Self {
        self.0.insert(field.into(), predicate);
        self
    }

    pub fn insert(&mut self, field: impl Into<FieldPath>, predicate: Predicate) -> Option<Predicate> {
        self.0.insert(field.into(), predicate)
    }

    pub fn remove(&mut self, field: &FieldPath) -> Option<Predicate> {
        self.0.remove(field)
    }

    pub fn get(&self, field: &FieldPath) -> Option<&Predicate> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &Predicate)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// Wire contract
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortModelEntry {
    pub col_id: String,
    pub sort: SortDirection,
}

/// One entry of the wire `filterModel`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterModelEntry {
    pub filter_type: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_to: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    /// Fields of kinds the client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FilterModelEntry {
    pub fn bare(filter_type: impl Into<String>) -> Self {
        Self {
            filter_type: filter_type.into(),
            op: None,
            filter: None,
            filter_to: None,
            date_from: None,
            date_to: None,
            values: None,
            extra: Map::new(),
        }
    }
}

/// The unit sent to the query endpoint. Immutable once issued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContract {
    pub start_row: u64,
    pub end_row: u64,
    #[serde(default)]
    pub sort_model: Vec<SortModelEntry>,
    #[serde(default)]
    pub filter_model: BTreeMap<String, FilterModelEntry>,
}

/// `200` body of the query endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Total row count when the server knows it; negative or null means unknown.
    #[serde(default)]
    pub last_row: Option<i64>,
}

impl QueryResponse {
    pub fn total_rows(&self) -> Option<u64> {
        self.last_row.and_then(|n| u64::try_from(n).ok())
    }
}

/// Identity of a (sort, filter) pair. Two queries with equal signatures read the
/// same ordered collection.
#[derive(Clone, Debug, Default, Hash, Eq, PartialEq)]
pub struct Signature(String);

impl Signature {
    /// Wrap an already-canonical encoding of the sort and filter models.
    pub fn from_canonical(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ops_render_as_wire_names() {
        assert_eq!(NumberOp::GreaterThanOrEqual.to_string(), "greaterThanOrEqual");
        assert_eq!(NumberOp::InRange.to_string(), "inRange");
        assert_eq!(TextOp::StartsWith.to_string(), "startsWith");
        assert_eq!(SortDirection::Desc.to_string(), "desc");
        assert_eq!("lessThan".parse::<DateOp>().unwrap(), DateOp::LessThan);
    }

    #[test]
    fn filter_entry_skips_absent_fields() {
        let mut entry = FilterModelEntry::bare("number");
        entry.op = Some("greaterThan".into());
        entry.filter = Some(json!(10.0));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({"filterType": "number", "type": "greaterThan", "filter": 10.0})
        );
    }

    #[test]
    fn query_response_total_rows() {
        let resp: QueryResponse =
            serde_json::from_value(json!({"rows": [{"id": 1}], "lastRow": -1})).unwrap();
        assert_eq!(resp.rows.len(), 1);
        assert_eq!(resp.total_rows(), None);

        let resp: QueryResponse = serde_json::from_value(json!({"rows": []})).unwrap();
        assert_eq!(resp.last_row, None);

        let resp: QueryResponse = serde_json::from_value(json!({"lastRow": 42})).unwrap();
        assert_eq!(resp.total_rows(), Some(42));
    }

    #[test]
    fn filter_spec_keys_are_unique() {
        let mut spec = FilterSpec::new()
            .with("type", Predicate::text(TextOp::Equals, "CAR"));
        let previous = spec.insert("type", Predicate::text(TextOp::Equals, "BOAT"));
        assert!(previous.is_some());
        assert_eq!(spec.len(), 1);
    }

    #[test]
    fn nested_field_path() {
        let path = FieldPath::from("coordinates.x");
        assert!(path.is_nested());
        assert_eq!(path.segments().collect::<Vec<_>>(), vec!["coordinates", "x"]);
    }
}
