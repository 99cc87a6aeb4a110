//! Command-line sort and filter expressions.
//!
//! Sort: `field` or `field:asc` / `field:desc`.
//!
//! Filter: `field>v`, `field>=v`, `field<v`, `field<=v`, `field=v`, `field!=v`,
//! `field~text` (contains), `field=a..b` (inclusive range). Dotted fields such
//! as `coordinates.x` are passed through as-is.

use fleetgrid_types::{DateOp, FieldPath, NumberOp, Predicate, SortDirection, TextOp};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("no operator in filter {0:?} (expected one of > >= < <= = != ~)")]
    MissingOperator(String),
    #[error("empty field name in {0:?}")]
    EmptyField(String),
    #[error("{op} needs a number or a yyyy-mm-dd date, got {value:?}")]
    NotComparable { op: &'static str, value: String },
    #[error("range bounds must be numbers, got {0:?}")]
    BadRange(String),
    #[error("sort direction must be asc or desc, got {0:?}")]
    BadDirection(String),
}

/// Longest operators first so `>=` is not read as `>`.
const OPERATORS: [&str; 7] = [">=", "<=", "!=", ">", "<", "~", "="];

pub fn parse_sort(expr: &str) -> Result<(FieldPath, SortDirection), ExprError> {
    let (field, direction) = match expr.split_once(':') {
        Some((field, dir)) => {
            let direction = dir
                .trim()
                .to_ascii_lowercase()
                .parse::<SortDirection>()
                .map_err(|_| ExprError::BadDirection(dir.to_string()))?;
            (field, direction)
        }
        None => (expr, SortDirection::Asc),
    };
    let field = field.trim();
    if field.is_empty() {
        return Err(ExprError::EmptyField(expr.to_string()));
    }
    Ok((FieldPath::new(field), direction))
}

pub fn parse_filter(expr: &str) -> Result<(FieldPath, Predicate), ExprError> {
    let (at, op) = expr
        .char_indices()
        .find_map(|(i, _)| OPERATORS.iter().find(|op| expr[i..].starts_with(**op)).map(|op| (i, *op)))
        .ok_or_else(|| ExprError::MissingOperator(expr.to_string()))?;

    let field = expr[..at].trim();
    if field.is_empty() {
        return Err(ExprError::EmptyField(expr.to_string()));
    }
    let value = expr[at + op.len()..].trim();

    let predicate = match op {
        "~" => Predicate::text(TextOp::Contains, value),
        "=" => match value.split_once("..") {
            Some((min, max)) => match (min.trim().parse::<f64>(), max.trim().parse::<f64>()) {
                (Ok(min), Ok(max)) => Predicate::number_range(min, max),
                _ => return Err(ExprError::BadRange(value.to_string())),
            },
            None => match value.parse::<f64>() {
                Ok(n) => Predicate::number(NumberOp::Equals, n),
                Err(_) => Predicate::text(TextOp::Equals, value),
            },
        },
        "!=" => match value.parse::<f64>() {
            Ok(n) => Predicate::number(NumberOp::NotEqual, n),
            Err(_) => Predicate::text(TextOp::NotEqual, value),
        },
        _ => comparison(op, value)?,
    };
    Ok((FieldPath::new(field), predicate))
}

fn comparison(op: &'static str, value: &str) -> Result<Predicate, ExprError> {
    if let Ok(n) = value.parse::<f64>() {
        let op = match op {
            ">" => NumberOp::GreaterThan,
            ">=" => NumberOp::GreaterThanOrEqual,
            "<" => NumberOp::LessThan,
            _ => NumberOp::LessThanOrEqual,
        };
        return Ok(Predicate::number(op, n));
    }
    let date_op = match op {
        ">" => Some(DateOp::GreaterThan),
        "<" => Some(DateOp::LessThan),
        _ => None,
    };
    match date_op {
        Some(op) if looks_like_date(value) => {
            Ok(Predicate::Date { op, from: value.to_string(), to: None })
        }
        _ => Err(ExprError::NotComparable { op, value: value.to_string() }),
    }
}

fn looks_like_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[..10].iter().enumerate().all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_expressions() {
        assert_eq!(parse_sort("name").unwrap(), (FieldPath::new("name"), SortDirection::Asc));
        assert_eq!(
            parse_sort("coordinates.x:DESC").unwrap(),
            (FieldPath::new("coordinates.x"), SortDirection::Desc)
        );
        assert_eq!(parse_sort("id:up"), Err(ExprError::BadDirection("up".into())));
        assert!(matches!(parse_sort(":asc"), Err(ExprError::EmptyField(_))));
    }

    #[test]
    fn numeric_comparisons() {
        let (field, pred) = parse_filter("fuelConsumption>10").unwrap();
        assert_eq!(field.as_str(), "fuelConsumption");
        assert_eq!(pred, Predicate::number(NumberOp::GreaterThan, 10.0));
        assert_eq!(parse_filter("capacity >= 4").unwrap().1, Predicate::number(NumberOp::GreaterThanOrEqual, 4.0));
        assert_eq!(parse_filter("capacity<=4").unwrap().1, Predicate::number(NumberOp::LessThanOrEqual, 4.0));
        assert_eq!(parse_filter("id!=3").unwrap().1, Predicate::number(NumberOp::NotEqual, 3.0));
    }

    #[test]
    fn ranges_text_and_dates() {
        assert_eq!(parse_filter("enginePower=100..250").unwrap().1, Predicate::number_range(100.0, 250.0));
        assert_eq!(parse_filter("type=CAR").unwrap().1, Predicate::text(TextOp::Equals, "CAR"));
        assert_eq!(parse_filter("name~bus").unwrap().1, Predicate::text(TextOp::Contains, "bus"));
        assert_eq!(
            parse_filter("creationDate>2024-01-31").unwrap().1,
            Predicate::Date { op: DateOp::GreaterThan, from: "2024-01-31".into(), to: None }
        );
        assert_eq!(parse_filter("coordinates.y<12.5").unwrap().0, FieldPath::new("coordinates.y"));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(matches!(parse_filter("name"), Err(ExprError::MissingOperator(_))));
        assert!(matches!(parse_filter(">5"), Err(ExprError::EmptyField(_))));
        assert!(matches!(parse_filter("enginePower=a..b"), Err(ExprError::BadRange(_))));
        assert!(matches!(parse_filter("name>bob"), Err(ExprError::NotComparable { op: ">", .. })));
    }
}
