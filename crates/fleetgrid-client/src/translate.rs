//! Grid sort/filter state → wire query contract.
//!
//! Pure and total: every representable [`SortSpec`] / [`FilterSpec`] maps to
//! exactly one [`QueryContract`]. Column paths are copied verbatim, so nested
//! paths such as `coordinates.x` reach the server as one dotted key.

use std::collections::BTreeMap;
use std::ops::Range;

use fleetgrid_types::{
    FilterModelEntry, FilterSpec, Predicate, QueryContract, Signature, SortModelEntry, SortSpec,
};
use serde_json::Value;

/// Build the contract for one row range under the given sort and filter.
pub fn translate(sort: &SortSpec, filter: &FilterSpec, range: Range<u64>) -> QueryContract {
    QueryContract {
        start_row: range.start,
        end_row: range.end,
        sort_model: sort_model(sort),
        filter_model: filter_model(filter),
    }
}

/// The wire `sortModel`, primary key first.
pub fn sort_model(sort: &SortSpec) -> Vec<SortModelEntry> {
    sort.keys()
        .iter()
        .map(|key| SortModelEntry {
            col_id: key.field.as_str().to_string(),
            sort: key.direction,
        })
        .collect()
}

pub fn filter_model(filter: &FilterSpec) -> BTreeMap<String, FilterModelEntry> {
    filter
        .iter()
        .map(|(field, predicate)| (field.as_str().to_string(), filter_entry(predicate)))
        .collect()
}

/// Wire form of one predicate.
pub fn filter_entry(predicate: &Predicate) -> FilterModelEntry {
    let mut entry = FilterModelEntry::bare(predicate.kind());
    match predicate {
        Predicate::Text { op, value } => {
            entry.op = Some(op.to_string());
            entry.filter = Some(Value::String(value.clone()));
        }
        Predicate::Number { op, value, to } => {
            entry.op = Some(op.to_string());
            // Non-finite numbers become JSON null rather than failing.
            entry.filter = value.map(Value::from);
            entry.filter_to = to.map(Value::from);
        }
        Predicate::Date { op, from, to } => {
            entry.op = Some(op.to_string());
            entry.date_from = Some(from.clone());
            entry.date_to = to.clone();
        }
        Predicate::Set { values } => {
            entry.values = Some(values.clone());
        }
        Predicate::Passthrough { fields, .. } => {
            entry.extra = fields.clone();
            entry.extra.remove("filterType");
        }
    }
    entry
}

/// Canonical identity of a (sort, filter) pair.
///
/// Filter keys are already sorted, so equal specs always encode identically.
pub fn signature(sort: &SortSpec, filter: &FilterSpec) -> Signature {
    // String keys and JSON values only: encoding cannot fail.
    let encoded = serde_json::to_string(&(sort_model(sort), filter_model(filter)))
        .unwrap_or_default();
    Signature::from_canonical(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_types::{DateOp, NumberOp, SortDirection, TextOp};
    use serde_json::{Map, json};

    #[test]
    fn sort_order_is_preserved() {
        let sort = SortSpec::new()
            .then("type", SortDirection::Asc)
            .then("id", SortDirection::Desc);
        let contract = translate(&sort, &FilterSpec::new(), 0..50);
        let wire = serde_json::to_value(&contract).unwrap();
        assert_eq!(
            wire,
            json!({
                "startRow": 0,
                "endRow": 50,
                "sortModel": [
                    {"colId": "type", "sort": "asc"},
                    {"colId": "id", "sort": "desc"}
                ],
                "filterModel": {}
            })
        );
    }

    #[test]
    fn typed_predicates_map_to_wire_fields() {
        let filter = FilterSpec::new()
            .with("fuelConsumption", Predicate::number(NumberOp::GreaterThan, 10.0))
            .with("enginePower", Predicate::number_range(100.0, 300.0))
            .with("name", Predicate::text(TextOp::Contains, "mi"))
            .with(
                "creationDate",
                Predicate::Date { op: DateOp::InRange, from: "2024-01-01".into(), to: Some("2024-02-01".into()) },
            );
        let model = serde_json::to_value(filter_model(&filter)).unwrap();
        assert_eq!(
            model,
            json!({
                "creationDate": {"filterType": "date", "type": "inRange", "dateFrom": "2024-01-01", "dateTo": "2024-02-01"},
                "enginePower": {"filterType": "number", "type": "inRange", "filter": 100.0, "filterTo": 300.0},
                "fuelConsumption": {"filterType": "number", "type": "greaterThan", "filter": 10.0},
                "name": {"filterType": "text", "type": "contains", "filter": "mi"}
            })
        );
    }

    #[test]
    fn nested_paths_stay_dotted() {
        let sort = SortSpec::new().then("coordinates.y", SortDirection::Asc);
        let filter = FilterSpec::new()
            .with("coordinates.x", Predicate::number(NumberOp::LessThan, 5.0));
        let contract = translate(&sort, &filter, 50..100);
        assert_eq!(contract.sort_model[0].col_id, "coordinates.y");
        assert!(contract.filter_model.contains_key("coordinates.x"));
        assert!(!contract.filter_model.contains_key("coordinates"));
    }

    #[test]
    fn unsupported_kind_passes_through_unchanged() {
        let mut fields = Map::new();
        fields.insert("filterType".into(), json!("multi"));
        fields.insert("filterModels".into(), json!([{"filterType": "text", "type": "equals", "filter": "CAR"}]));
        fields.insert("type".into(), json!("custom"));
        let filter = FilterSpec::new().with(
            "type",
            Predicate::Passthrough { filter_type: "multi".into(), fields },
        );
        let entry = serde_json::to_value(&filter_model(&filter)["type"]).unwrap();
        assert_eq!(
            entry,
            json!({
                "filterType": "multi",
                "type": "custom",
                "filterModels": [{"filterType": "text", "type": "equals", "filter": "CAR"}]
            })
        );
    }

    #[test]
    fn non_finite_number_becomes_null() {
        let entry = filter_entry(&Predicate::number(NumberOp::Equals, f64::NAN));
        assert_eq!(entry.filter, Some(Value::Null));
    }

    #[test]
    fn signature_ignores_insertion_order_but_not_sort_order() {
        let a = FilterSpec::new()
            .with("type", Predicate::text(TextOp::Equals, "CAR"))
            .with("capacity", Predicate::number(NumberOp::GreaterThan, 2.0));
        let b = FilterSpec::new()
            .with("capacity", Predicate::number(NumberOp::GreaterThan, 2.0))
            .with("type", Predicate::text(TextOp::Equals, "CAR"));
        let sort = SortSpec::new().then("id", SortDirection::Desc);
        assert_eq!(signature(&sort, &a), signature(&sort, &b));

        let s1 = SortSpec::new().then("a", SortDirection::Asc).then("b", SortDirection::Asc);
        let s2 = SortSpec::new().then("b", SortDirection::Asc).then("a", SortDirection::Asc);
        assert_ne!(signature(&s1, &a), signature(&s2, &a));
    }

    #[test]
    fn deterministic() {
        let filter = FilterSpec::new().with("id", Predicate::number(NumberOp::Equals, 7.0));
        let sort = SortSpec::new();
        assert_eq!(translate(&sort, &filter, 0..10), translate(&sort, &filter, 0..10));
    }
}
