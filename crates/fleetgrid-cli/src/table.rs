//! Plain-text rendering of row windows.

use std::ops::Range;

use fleetgrid_client::{ClientError, GridSink};
use fleetgrid_types::Row;
use serde_json::Value;
use tracing::debug;

/// Prints every window it receives as an aligned table on stdout.
pub struct TableSink {
    /// Columns to print, in order. Empty means "whatever the first row has".
    columns: Vec<String>,
}

impl TableSink {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    fn columns_for(&self, rows: &[Row]) -> Vec<String> {
        if !self.columns.is_empty() {
            return self.columns.clone();
        }
        let Some(first) = rows.first() else {
            return Vec::new();
        };
        let mut columns: Vec<String> = first.fields().keys().filter(|k| *k != "id").cloned().collect();
        columns.insert(0, "id".to_string());
        columns
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn render(columns: &[String], rows: &[Row]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| columns.iter().map(|c| cell(row.get_path(c))).collect())
        .collect();
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| cells.iter().map(|r| r[i].chars().count()).chain([c.len()]).max().unwrap_or(0))
        .collect();

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(columns);
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}

impl GridSink for TableSink {
    fn rows_loaded(&self, range: Range<u64>, rows: &[Row], last_row: Option<u64>) {
        let columns = self.columns_for(rows);
        let total = last_row.map(|n| n.to_string()).unwrap_or_else(|| "?".into());
        let shown_end = range.start + rows.len() as u64;
        println!("rows {}..{} of {}", range.start, shown_end, total);
        if !rows.is_empty() {
            print!("{}", render(&columns, rows));
        }
    }

    fn rows_failed(&self, range: Range<u64>, error: &ClientError) {
        eprintln!("rows {}..{} failed: {}", range.start, range.end, error);
    }

    fn scroll_to(&self, index: u64) {
        debug!(index, "scroll");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_and_missing_cells() {
        let rows = vec![
            Row::from(json!({"id": 1, "name": "Bus", "coordinates": {"x": 1.5, "y": 2.0}})),
            Row::from(json!({"id": 22, "name": null})),
        ];
        let columns = vec!["id".to_string(), "name".to_string(), "coordinates.x".to_string()];
        let table = render(&columns, &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "id  name  coordinates.x");
        assert_eq!(lines[1], "1   Bus   1.5");
        assert_eq!(lines[2], "22");
    }

    #[test]
    fn id_column_leads_by_default() {
        let sink = TableSink::new(Vec::new());
        let rows = vec![Row::from(json!({"name": "Bus", "id": 1}))];
        assert_eq!(sink.columns_for(&rows), vec!["id".to_string(), "name".to_string()]);
    }
}
