//! In-memory evaluation of a condition tree against one catalog entry.
//!
//! Agrees with the SQL the query compiler emits: a missing value never
//! satisfies a comparison, text matching is ASCII case-insensitive like
//! SQLite's LIKE, and equality is exact.

use crate::catalog::CatalogEntry;
use crate::grammar::{Condition, Expr, Field, Operand, Operator, Scalar};

/// Whether `entry` satisfies `expr`. `all` stops at the first false child,
/// `any` at the first true one.
pub fn matches(expr: &Expr, entry: &CatalogEntry) -> bool {
    match expr {
        Expr::All(children) => children.iter().all(|child| matches(child, entry)),
        Expr::Any(children) => children.iter().any(|child| matches(child, entry)),
        Expr::Not(inner) => !matches(inner, entry),
        Expr::Condition(condition) => matches_condition(condition, entry),
    }
}

enum Actual<'a> {
    Text(Option<&'a str>),
    /// Numbers and timestamps (as epoch milliseconds)
    Number(Option<f64>),
    Tags(&'a [String]),
}

fn actual<'a>(field: Field, entry: &'a CatalogEntry) -> Actual<'a> {
    match field {
        Field::Name => Actual::Text(Some(&entry.name)),
        Field::Size => Actual::Number(Some(entry.size as f64)),
        Field::Type => Actual::Text(entry.primary_type.as_deref()),
        Field::Mime => Actual::Text(entry.mime.as_deref()),
        Field::Created => Actual::Number(Some(entry.created_at.timestamp_millis() as f64)),
        Field::Modified => Actual::Number(entry.modified.map(|ts| ts.timestamp_millis() as f64)),
        Field::Path => Actual::Text(Some(&entry.full_path)),
        Field::Extension => Actual::Text(entry.extension.as_deref()),
        Field::Tag => Actual::Tags(&entry.tags),
    }
}

fn matches_condition(condition: &Condition, entry: &CatalogEntry) -> bool {
    let op = condition.op;
    let value = actual(condition.field, entry);

    match (op, &condition.operand) {
        (Operator::In, Operand::Many(list)) if list.is_empty() => return false,
        (Operator::NotIn, Operand::Many(list)) if list.is_empty() => return true,
        _ => {}
    }

    let present = match &value {
        Actual::Text(v) => v.is_some(),
        Actual::Number(v) => v.is_some(),
        Actual::Tags(tags) => !tags.is_empty(),
    };
    match (op, &condition.operand) {
        (Operator::IsNull, _) | (Operator::Eq, Operand::Null) => return !present,
        (Operator::IsNotNull, _) | (Operator::Ne, Operand::Null) => return present,
        _ => {}
    }

    match value {
        Actual::Text(None) | Actual::Number(None) => false,
        Actual::Text(Some(text)) => text_matches(text, op, &condition.operand),
        Actual::Number(Some(number)) => number_matches(number, op, &condition.operand),
        Actual::Tags(tags) => tags_match(tags, op, &condition.operand),
    }
}

fn text_matches(text: &str, op: Operator, operand: &Operand) -> bool {
    match (op, operand) {
        (Operator::Regex, Operand::Pattern(pattern)) => pattern.is_match(text),
        (Operator::In, Operand::Many(list)) => list.iter().any(|s| scalar_text(s) == Some(text)),
        (Operator::NotIn, Operand::Many(list)) => !list.iter().any(|s| scalar_text(s) == Some(text)),
        (_, Operand::One(scalar)) => {
            let Some(expected) = scalar_text(scalar) else {
                return false;
            };
            match op {
                Operator::Eq => text == expected,
                Operator::Ne => text != expected,
                Operator::Gt => text > expected,
                Operator::Gte => text >= expected,
                Operator::Lt => text < expected,
                Operator::Lte => text <= expected,
                Operator::Contains => fold(text).contains(&fold(expected)),
                Operator::StartsWith => fold(text).starts_with(&fold(expected)),
                Operator::EndsWith => fold(text).ends_with(&fold(expected)),
                _ => false,
            }
        }
        _ => false,
    }
}

fn number_matches(number: f64, op: Operator, operand: &Operand) -> bool {
    match (op, operand) {
        (Operator::In, Operand::Many(list)) => list.iter().any(|s| s.as_f64() == Some(number)),
        (Operator::NotIn, Operand::Many(list)) => !list.iter().any(|s| s.as_f64() == Some(number)),
        (_, Operand::One(scalar)) => {
            let Some(expected) = scalar.as_f64() else {
                return false;
            };
            match op {
                Operator::Eq => number == expected,
                Operator::Ne => number != expected,
                Operator::Gt => number > expected,
                Operator::Gte => number >= expected,
                Operator::Lt => number < expected,
                Operator::Lte => number <= expected,
                _ => false,
            }
        }
        _ => false,
    }
}

fn tags_match(tags: &[String], op: Operator, operand: &Operand) -> bool {
    match (op, operand) {
        (Operator::Ne, Operand::One(_)) => !tags_match(tags, Operator::Eq, operand),
        (Operator::NotIn, Operand::Many(_)) => !tags_match(tags, Operator::In, operand),
        (Operator::In, Operand::Many(list)) => tags
            .iter()
            .any(|tag| list.iter().any(|s| scalar_text(s) == Some(tag.as_str()))),
        (Operator::Regex, Operand::Pattern(pattern)) => tags.iter().any(|tag| pattern.is_match(tag)),
        (_, Operand::One(_)) => tags.iter().any(|tag| text_matches(tag, op, operand)),
        _ => false,
    }
}

fn scalar_text(scalar: &Scalar) -> Option<&str> {
    match scalar {
        Scalar::Text(s) => Some(s),
        _ => None,
    }
}

fn fold(s: &str) -> String {
    s.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_expr;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn entry() -> CatalogEntry {
        CatalogEntry {
            asset_id: 1,
            content_hash: "c".repeat(64).parse().unwrap(),
            full_path: "/photos/2024/Beach.JPG".into(),
            name: "Beach.JPG".into(),
            extension: Some("jpg".into()),
            volume_id: None,
            size: 2_000,
            mime: Some("image/jpeg".into()),
            primary_type: Some("image".into()),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            modified: None,
            last_seen: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            is_available: true,
            tags: vec!["holiday".into(), "family".into()],
        }
    }

    fn check(doc: Value) -> bool {
        matches(&parse_expr(&doc).unwrap(), &entry())
    }

    #[test]
    fn comparisons_on_numbers_and_text() {
        assert!(check(json!({"field": "size", "op": "gt", "value": 1000})));
        assert!(!check(json!({"field": "size", "op": "lt", "value": 1000})));
        assert!(check(json!({"field": "type", "op": "eq", "value": "image"})));
        assert!(check(json!({"field": "extension", "op": "in", "value": ["png", "JPG"]})));
    }

    #[test]
    fn text_matching_ignores_ascii_case() {
        assert!(check(json!({"field": "name", "op": "contains", "value": "beach"})));
        assert!(check(json!({"field": "path", "op": "starts_with", "value": "/PHOTOS"})));
        assert!(check(json!({"field": "name", "op": "ends_with", "value": ".jpg"})));
        assert!(!check(json!({"field": "name", "op": "eq", "value": "beach.jpg"})));
    }

    #[test]
    fn missing_values_never_match_comparisons() {
        assert!(!check(json!({"field": "modified", "op": "lt", "value": "2100-01-01"})));
        assert!(!check(json!({"field": "modified", "op": "ne", "value": 0})));
        assert!(check(json!({"field": "modified", "op": "is_null"})));
        assert!(check(json!({"not": {"field": "modified", "op": "gt", "value": 0}})));
    }

    #[test]
    fn empty_lists() {
        assert!(!check(json!({"field": "type", "op": "in", "value": []})));
        assert!(check(json!({"field": "modified", "op": "not_in", "value": []})));
    }

    #[test]
    fn tag_set_semantics() {
        assert!(check(json!({"field": "tag", "op": "eq", "value": "family"})));
        assert!(check(json!({"field": "tag", "op": "ne", "value": "work"})));
        assert!(!check(json!({"field": "tag", "op": "not_in", "value": ["work", "holiday"]})));
        assert!(check(json!({"field": "tag", "op": "contains", "value": "HOLI"})));
        assert!(check(json!({"field": "tag", "op": "is_not_null"})));
    }

    #[test]
    fn timestamps_compare_by_instant() {
        assert!(check(json!({"field": "created", "op": "gte", "value": "2024-06-01"})));
        assert!(check(json!({"field": "created", "op": "lt", "value": "2024-06-01T12:00:01Z"})));
    }

    #[test]
    fn combinators() {
        assert!(check(json!({"all": [
            {"field": "type", "op": "eq", "value": "image"},
            {"any": [
                {"field": "size", "op": "lt", "value": 100},
                {"field": "tag", "op": "eq", "value": "family"}
            ]}
        ]})));
        assert!(check(json!({"all": []})));
        assert!(!check(json!({"any": []})));
    }
}
