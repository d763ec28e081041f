//! Condition grammar shared by the query compiler and the rule engine.
//!
//! ```json
//! {"all": [
//!     {"field": "type", "op": "eq", "value": "image"},
//!     {"not": {"field": "tag", "op": "in", "value": ["archived", "trash"]}}
//! ]}
//! ```
//!
//! Parsing resolves field and operator names against closed tables and
//! converts every value to the field's kind, so anything that parses can be
//! compiled to SQL or evaluated in memory without further checks.

use crate::error::CompileError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde_json::{Map, Value};

/// Deepest nesting of `all`/`any`/`not` accepted.
pub const MAX_DEPTH: usize = 32;

/// A parsed condition tree.
#[derive(Debug, Clone)]
pub enum Expr {
    /// True when every child is; an empty list is true
    All(Vec<Expr>),
    /// True when some child is; an empty list is false
    Any(Vec<Expr>),
    Not(Box<Expr>),
    Condition(Condition),
}

/// One `{field, op, value}` leaf.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: Field,
    pub op: Operator,
    pub operand: Operand,
}

// ============================================================================
// Fields
// ============================================================================

/// How values of a field compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Timestamp,
    /// Set of tag names on the blob
    TagSet,
}

/// Every field a condition may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Size,
    /// Blob `primary_type`
    Type,
    Mime,
    /// When the blob was first catalogued
    Created,
    /// Filesystem mtime of the asset
    Modified,
    Path,
    Extension,
    Tag,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Name,
        Field::Size,
        Field::Type,
        Field::Mime,
        Field::Created,
        Field::Modified,
        Field::Path,
        Field::Extension,
        Field::Tag,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Size => "size",
            Field::Type => "type",
            Field::Mime => "mime",
            Field::Created => "created",
            Field::Modified => "modified",
            Field::Path => "path",
            Field::Extension => "extension",
            Field::Tag => "tag",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Name | Field::Type | Field::Mime | Field::Path | Field::Extension => {
                FieldKind::Text
            }
            Field::Size => FieldKind::Number,
            Field::Created | Field::Modified => FieldKind::Timestamp,
            Field::Tag => FieldKind::TagSet,
        }
    }

    /// Whether a catalog row can lack a value for this field.
    pub fn nullable(&self) -> bool {
        matches!(
            self,
            Field::Type | Field::Mime | Field::Modified | Field::Extension
        )
    }
}

// ============================================================================
// Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive substring; `like` is accepted as an alias
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::Contains,
        Operator::StartsWith,
        Operator::EndsWith,
        Operator::Regex,
        Operator::In,
        Operator::NotIn,
        Operator::IsNull,
        Operator::IsNotNull,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        if name == "like" {
            return Some(Operator::Contains);
        }
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::Regex => "regex",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }

    fn is_text_match(&self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::StartsWith | Operator::EndsWith | Operator::Regex
        )
    }

    /// Whether this operator means anything for a field of `kind`.
    pub fn supports(&self, kind: FieldKind) -> bool {
        match kind {
            FieldKind::Text => true,
            FieldKind::Number | FieldKind::Timestamp => !self.is_text_match(),
            FieldKind::TagSet => !self.is_ordering(),
        }
    }
}

// ============================================================================
// Operands
// ============================================================================

/// A value already converted to its field's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Real(f64),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    /// Numeric view for comparisons across integer/real.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(n) => Some(*n as f64),
            Scalar::Real(n) => Some(*n),
            Scalar::Timestamp(ts) => Some(ts.timestamp_millis() as f64),
            Scalar::Text(_) => None,
        }
    }
}

/// The right-hand side of a condition.
#[derive(Debug, Clone)]
pub enum Operand {
    /// `is_null` / `is_not_null` (any `value` is ignored)
    None,
    /// `eq null` / `ne null`
    Null,
    One(Scalar),
    Many(Vec<Scalar>),
    Pattern(Regex),
}

// ============================================================================
// Sorting
// ============================================================================

/// One `{"field", "dir"}` entry of a query's `sort` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: Field,
    pub descending: bool,
}

/// A top-level query document: condition tree plus optional sort.
#[derive(Debug, Clone)]
pub struct QueryDocument {
    pub filter: Expr,
    pub sort: Vec<SortSpec>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a query document. The top-level object may carry `sort` next to its
/// combinator key; `{}` (or only `sort`) matches everything.
pub fn parse_query(doc: &Value) -> Result<QueryDocument, CompileError> {
    let obj = doc.as_object().ok_or_else(|| malformed("$", "query must be a JSON object"))?;

    let sort = match obj.get("sort") {
        Some(value) => parse_sort(value)?,
        None => Vec::new(),
    };

    let rest: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| key.as_str() != "sort")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let filter = if rest.is_empty() {
        Expr::All(Vec::new())
    } else {
        parse_object(&rest, "$", 1)?
    };

    Ok(QueryDocument { filter, sort })
}

/// Parse a condition tree (a rule's `when`, or a query without `sort`).
pub fn parse_expr(doc: &Value) -> Result<Expr, CompileError> {
    parse_node(doc, "$", 1)
}

fn parse_node(value: &Value, path: &str, depth: usize) -> Result<Expr, CompileError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed(path, "expected a JSON object"))?;
    parse_object(obj, path, depth)
}

fn parse_object(obj: &Map<String, Value>, path: &str, depth: usize) -> Result<Expr, CompileError> {
    if depth > MAX_DEPTH {
        return Err(CompileError::TooDeep { max: MAX_DEPTH });
    }

    let combinators: Vec<&str> = ["all", "any", "not"]
        .into_iter()
        .filter(|key| obj.contains_key(*key))
        .collect();

    match combinators.as_slice() {
        [] => parse_condition(obj, path).map(Expr::Condition),
        [key] => {
            if obj.len() != 1 {
                return Err(malformed(
                    path,
                    &format!("'{}' must be the only key of its object", key),
                ));
            }
            let child_path = format!("{}.{}", path, key);
            let inner = &obj[*key];
            match *key {
                "not" => Ok(Expr::Not(Box::new(parse_node(inner, &child_path, depth + 1)?))),
                _ => {
                    let items = inner
                        .as_array()
                        .ok_or_else(|| malformed(&child_path, "expected an array"))?;
                    let children = items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| parse_node(item, &format!("{}[{}]", child_path, i), depth + 1))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(if *key == "all" {
                        Expr::All(children)
                    } else {
                        Expr::Any(children)
                    })
                }
            }
        }
        many => Err(malformed(
            path,
            &format!("exactly one of all/any/not allowed, found {}", many.join(", ")),
        )),
    }
}

fn parse_condition(obj: &Map<String, Value>, path: &str) -> Result<Condition, CompileError> {
    if let Some(extra) = obj
        .keys()
        .find(|key| !matches!(key.as_str(), "field" | "op" | "value"))
    {
        return Err(malformed(path, &format!("unexpected key '{}'", extra)));
    }

    let field_name = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(path, "condition needs a string 'field'"))?;
    let field = Field::parse(field_name).ok_or_else(|| CompileError::UnknownField {
        path: path.to_string(),
        field: field_name.to_string(),
    })?;

    let op_name = match obj.get("op") {
        None => "eq",
        Some(value) => value
            .as_str()
            .ok_or_else(|| malformed(path, "'op' must be a string"))?,
    };
    let op = Operator::parse(op_name).ok_or_else(|| CompileError::UnknownOperator {
        path: path.to_string(),
        op: op_name.to_string(),
    })?;

    if !op.supports(field.kind()) {
        return Err(CompileError::UnsupportedOperator {
            path: path.to_string(),
            field: field.as_str().to_string(),
            op: op.as_str().to_string(),
        });
    }

    let operand = parse_operand(field, op, obj.get("value"), path)?;
    Ok(Condition { field, op, operand })
}

fn parse_operand(
    field: Field,
    op: Operator,
    value: Option<&Value>,
    path: &str,
) -> Result<Operand, CompileError> {
    let invalid = |reason: &str| CompileError::InvalidValue {
        path: path.to_string(),
        field: field.as_str().to_string(),
        op: op.as_str().to_string(),
        reason: reason.to_string(),
    };

    match op {
        Operator::IsNull | Operator::IsNotNull => Ok(Operand::None),
        Operator::In | Operator::NotIn => {
            let items = value
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("expected an array"))?;
            items
                .iter()
                .map(|item| parse_scalar(field, item).map_err(|reason| invalid(&reason)))
                .collect::<Result<Vec<_>, _>>()
                .map(Operand::Many)
        }
        Operator::Regex => {
            let pattern = value
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("expected a pattern string"))?;
            Regex::new(pattern)
                .map(Operand::Pattern)
                .map_err(|e| invalid(&format!("bad pattern: {}", e)))
        }
        Operator::Eq | Operator::Ne => match value {
            None | Some(Value::Null) => Ok(Operand::Null),
            Some(v) => parse_scalar(field, v).map(Operand::One).map_err(|r| invalid(&r)),
        },
        _ => match value {
            None | Some(Value::Null) => Err(invalid("a value is required")),
            Some(v) => parse_scalar(field, v).map(Operand::One).map_err(|r| invalid(&r)),
        },
    }
}

fn parse_scalar(field: Field, value: &Value) -> Result<Scalar, String> {
    match field.kind() {
        FieldKind::Text | FieldKind::TagSet => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err("expected a string".to_string()),
            };
            Ok(Scalar::Text(if field == Field::Extension {
                text.trim_start_matches('.').to_lowercase()
            } else {
                text
            }))
        }
        FieldKind::Number => match value {
            Value::Number(n) => number_scalar(n.as_i64(), n.as_f64()),
            Value::String(s) => {
                let s = s.trim();
                number_scalar(s.parse::<i64>().ok(), s.parse::<f64>().ok())
            }
            _ => Err("expected a number".to_string()),
        },
        FieldKind::Timestamp => parse_timestamp(value).map(Scalar::Timestamp),
    }
}

fn number_scalar(int: Option<i64>, real: Option<f64>) -> Result<Scalar, String> {
    match (int, real) {
        (Some(n), _) => Ok(Scalar::Integer(n)),
        (None, Some(n)) if n.is_finite() => Ok(Scalar::Real(n)),
        _ => Err("expected a number".to_string()),
    }
}

/// Epoch milliseconds, RFC 3339, or `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| format!("{} is not a valid epoch-milliseconds value", n)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Ok(ts.with_timezone(&Utc));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(|| format!("'{}' is not an RFC 3339 timestamp or YYYY-MM-DD date", s))
        }
        _ => Err("expected a timestamp".to_string()),
    }
}

fn parse_sort(value: &Value) -> Result<Vec<SortSpec>, CompileError> {
    let items = value
        .as_array()
        .ok_or_else(|| malformed("$.sort", "expected an array"))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let path = format!("$.sort[{}]", i);
            let name = item
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed(&path, "sort entry needs a string 'field'"))?;
            let field = Field::parse(name).ok_or_else(|| CompileError::UnknownField {
                path: path.clone(),
                field: name.to_string(),
            })?;
            if field.kind() == FieldKind::TagSet {
                return Err(malformed(&path, "cannot sort by tag"));
            }
            let descending = match item.get("dir").and_then(Value::as_str) {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => {
                    return Err(malformed(
                        &path,
                        &format!("dir must be 'asc' or 'desc', got '{}'", other),
                    ))
                }
            };
            Ok(SortSpec { field, descending })
        })
        .collect()
}

fn malformed(path: &str, reason: &str) -> CompileError {
    CompileError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(expr: Expr) -> Condition {
        match expr {
            Expr::Condition(c) => c,
            other => panic!("expected condition, got {:?}", other),
        }
    }

    #[test]
    fn parses_nested_tree() {
        let expr = parse_expr(&json!({
            "all": [
                {"field": "type", "op": "eq", "value": "image"},
                {"any": [
                    {"field": "size", "op": "lt", "value": 100},
                    {"not": {"field": "tag", "op": "eq", "value": "keep"}}
                ]}
            ]
        }))
        .unwrap();

        let Expr::All(children) = expr else {
            panic!("expected all");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(&children[1], Expr::Any(inner) if inner.len() == 2));
    }

    #[test]
    fn op_defaults_to_eq_and_like_is_contains() {
        let c = condition(parse_expr(&json!({"field": "name", "value": "x"})).unwrap());
        assert_eq!(c.op, Operator::Eq);
        let c = condition(parse_expr(&json!({"field": "name", "op": "like", "value": "x"})).unwrap());
        assert_eq!(c.op, Operator::Contains);
    }

    #[test]
    fn rejects_unknown_field_and_operator() {
        let err = parse_expr(&json!({"field": "colour", "op": "eq", "value": 1})).unwrap_err();
        assert!(matches!(err, CompileError::UnknownField { .. }));

        let err = parse_expr(&json!({"field": "size", "op": "approx", "value": 1})).unwrap_err();
        assert!(matches!(err, CompileError::UnknownOperator { .. }));
    }

    #[test]
    fn rejects_meaningless_operator_for_kind() {
        let err = parse_expr(&json!({"field": "tag", "op": "gt", "value": "a"})).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedOperator { .. }));

        let err = parse_expr(&json!({"field": "size", "op": "contains", "value": "1"})).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedOperator { .. }));
    }

    #[test]
    fn rejects_two_combinators_in_one_object() {
        let err = parse_expr(&json!({"all": [], "any": []})).unwrap_err();
        assert!(matches!(err, CompileError::Malformed { .. }));
    }

    #[test]
    fn depth_is_capped() {
        let mut doc = json!({"field": "size", "op": "gt", "value": 1});
        for _ in 0..MAX_DEPTH {
            doc = json!({"not": doc});
        }
        assert!(matches!(
            parse_expr(&doc),
            Err(CompileError::TooDeep { max: MAX_DEPTH })
        ));
    }

    #[test]
    fn values_take_the_field_kind() {
        let c = condition(parse_expr(&json!({"field": "size", "op": "gt", "value": "1000"})).unwrap());
        assert!(matches!(c.operand, Operand::One(Scalar::Integer(1000))));

        let c = condition(parse_expr(&json!({"field": "extension", "value": ".JPG"})).unwrap());
        assert!(matches!(c.operand, Operand::One(Scalar::Text(ref s)) if s == "jpg"));

        let c = condition(
            parse_expr(&json!({"field": "created", "op": "gte", "value": "2024-03-01"})).unwrap(),
        );
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(c.operand, Operand::One(Scalar::Timestamp(ts)) if ts == expected));

        let err = parse_expr(&json!({"field": "size", "op": "gt", "value": "big"})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidValue { .. }));
    }

    #[test]
    fn eq_null_and_bad_regex() {
        let c = condition(parse_expr(&json!({"field": "mime", "op": "eq", "value": null})).unwrap());
        assert!(matches!(c.operand, Operand::Null));

        let err = parse_expr(&json!({"field": "name", "op": "regex", "value": "("})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidValue { .. }));
    }

    #[test]
    fn query_document_carries_sort() {
        let doc = parse_query(&json!({
            "field": "type", "op": "eq", "value": "video",
            "sort": [{"field": "size", "dir": "desc"}, {"field": "name"}]
        }))
        .unwrap();
        assert_eq!(
            doc.sort,
            vec![
                SortSpec { field: Field::Size, descending: true },
                SortSpec { field: Field::Name, descending: false },
            ]
        );
        assert!(matches!(doc.filter, Expr::Condition(_)));

        let everything = parse_query(&json!({})).unwrap();
        assert!(matches!(everything.filter, Expr::All(ref v) if v.is_empty()));

        let err = parse_query(&json!({"sort": [{"field": "tag"}]})).unwrap_err();
        assert!(matches!(err, CompileError::Malformed { .. }));
    }
}
