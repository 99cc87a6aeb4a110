//! Opaque server rows.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server-assigned record identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A record as returned by the query endpoint.
///
/// The client never interprets attributes beyond the `id` field; nested values
/// (e.g. `coordinates`) stay as JSON objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// The stable identifier, if the row carries a numeric `id`.
    pub fn id(&self) -> Option<RecordId> {
        self.0.get("id").and_then(Value::as_i64).map(RecordId)
    }

    /// Look up an attribute by dotted path (`"coordinates.x"`).
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Value> for Row {
    /// Non-object values become an empty row.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_and_nested_lookup() {
        let row = Row::from(json!({
            "id": 7,
            "name": "Cessna",
            "coordinates": {"x": 12.5, "y": 3.0}
        }));
        assert_eq!(row.id(), Some(RecordId(7)));
        assert_eq!(row.get_path("coordinates.x"), Some(&json!(12.5)));
        assert_eq!(row.get_path("coordinates.z"), None);
        assert_eq!(row.get_path("name.first"), None);
    }

    #[test]
    fn row_without_numeric_id() {
        let row = Row::from(json!({"id": "abc"}));
        assert_eq!(row.id(), None);
        assert_eq!(Row::from(json!([1, 2])), Row::default());
    }
}
