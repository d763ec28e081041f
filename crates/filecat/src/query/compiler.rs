//! Condition tree → parameter-bound SQL over `assets a JOIN blobs b`.
//!
//! Column names come only from `column_for`; every value is a bound `?`.
//! Conditions on nullable columns are guarded with `IS NOT NULL`, so a
//! comparison never yields SQL NULL and `not` behaves like the in-memory
//! evaluator.

use crate::catalog::{AssetFilter, Catalog, CatalogEntry, OrderTerm, Page};
use crate::error::{CompileError, Result};
use crate::grammar::{self, Condition, Expr, Field, Operand, Operator, Scalar, SortSpec};
use filecat_db::DbValue;
use serde_json::Value;

const TAG_MATCH: &str = "EXISTS (SELECT 1 FROM file_tags ft JOIN tags t ON t.id = ft.tag_id \
     WHERE ft.content_hash = a.content_hash AND ";

const ANY_TAG: &str =
    "EXISTS (SELECT 1 FROM file_tags ft WHERE ft.content_hash = a.content_hash)";

/// A validated, ready-to-run query.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub filter: AssetFilter,
    pub order: Vec<OrderTerm>,
}

impl CompiledQuery {
    /// One page of matching available assets plus the total match count.
    pub fn execute(&self, catalog: &Catalog, limit: u64, offset: u64) -> Result<Page<CatalogEntry>> {
        catalog.list_assets(&self.filter, &self.order, limit, offset)
    }

    pub fn count(&self, catalog: &Catalog) -> Result<u64> {
        catalog.count_assets(&self.filter)
    }
}

/// Compile a query document (`{...condition tree..., "sort": [...]}`).
pub fn compile(ast: &Value) -> std::result::Result<CompiledQuery, CompileError> {
    let doc = grammar::parse_query(ast)?;
    let (clause, params) = compile_expr(&doc.filter);
    Ok(CompiledQuery {
        filter: AssetFilter::new(clause, params),
        order: order_terms(&doc.sort),
    })
}

/// Compile an already-parsed tree. Cannot fail: parsing checked everything.
pub fn compile_expr(expr: &Expr) -> (String, Vec<DbValue>) {
    let mut params = Vec::new();
    let clause = emit(expr, &mut params);
    (clause, params)
}

fn emit(expr: &Expr, params: &mut Vec<DbValue>) -> String {
    match expr {
        Expr::All(children) if children.is_empty() => "1".to_string(),
        Expr::Any(children) if children.is_empty() => "0".to_string(),
        Expr::All(children) => join(children, " AND ", params),
        Expr::Any(children) => join(children, " OR ", params),
        Expr::Not(inner) => format!("NOT ({})", emit(inner, params)),
        Expr::Condition(condition) => match condition.field {
            Field::Tag => emit_tag(condition, params),
            _ => emit_column(condition, params),
        },
    }
}

fn join(children: &[Expr], sep: &str, params: &mut Vec<DbValue>) -> String {
    let parts: Vec<String> = children
        .iter()
        .map(|child| format!("({})", emit(child, params)))
        .collect();
    parts.join(sep)
}

fn emit_column(condition: &Condition, params: &mut Vec<DbValue>) -> String {
    let Some(column) = column_for(condition.field) else {
        return "0".to_string();
    };

    let predicate = match (&condition.op, &condition.operand) {
        (Operator::IsNull, _) | (Operator::Eq, Operand::Null) => {
            return format!("{} IS NULL", column)
        }
        (Operator::IsNotNull, _) | (Operator::Ne, Operand::Null) => {
            return format!("{} IS NOT NULL", column)
        }
        (Operator::In, Operand::Many(values)) if values.is_empty() => return "0".to_string(),
        (Operator::NotIn, Operand::Many(values)) if values.is_empty() => return "1".to_string(),
        (op, operand) => match value_predicate(column, *op, operand, params) {
            Some(sql) => sql,
            None => return "0".to_string(),
        },
    };

    if condition.field.nullable() {
        format!("{col} IS NOT NULL AND {pred}", col = column, pred = predicate)
    } else {
        predicate
    }
}

/// `column <op> ?` for operators that take a value.
fn value_predicate(
    column: &str,
    op: Operator,
    operand: &Operand,
    params: &mut Vec<DbValue>,
) -> Option<String> {
    let comparison = |sql_op: &str, params: &mut Vec<DbValue>| -> Option<String> {
        let Operand::One(value) = operand else {
            return None;
        };
        params.push(scalar_value(value));
        Some(format!("{} {} ?", column, sql_op))
    };

    match op {
        Operator::Eq => comparison("=", params),
        Operator::Ne => comparison("!=", params),
        Operator::Gt => comparison(">", params),
        Operator::Gte => comparison(">=", params),
        Operator::Lt => comparison("<", params),
        Operator::Lte => comparison("<=", params),
        Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
            let Operand::One(Scalar::Text(text)) = operand else {
                return None;
            };
            params.push(like_pattern(op, text).into());
            Some(format!("{} LIKE ? ESCAPE '\\'", column))
        }
        Operator::Regex => {
            let Operand::Pattern(pattern) = operand else {
                return None;
            };
            params.push(pattern.as_str().into());
            Some(format!("regexp(?, {})", column))
        }
        Operator::In | Operator::NotIn => {
            let Operand::Many(values) = operand else {
                return None;
            };
            params.extend(values.iter().map(scalar_value));
            let placeholders = vec!["?"; values.len()].join(", ");
            let keyword = if op == Operator::In { "IN" } else { "NOT IN" };
            Some(format!("{} {} ({})", column, keyword, placeholders))
        }
        Operator::IsNull | Operator::IsNotNull => None,
    }
}

fn emit_tag(condition: &Condition, params: &mut Vec<DbValue>) -> String {
    let has_tag = |predicate: String| format!("{}{})", TAG_MATCH, predicate);

    match (&condition.op, &condition.operand) {
        (Operator::IsNull, _) | (Operator::Eq, Operand::Null) => format!("NOT {}", ANY_TAG),
        (Operator::IsNotNull, _) | (Operator::Ne, Operand::Null) => ANY_TAG.to_string(),
        (Operator::In, Operand::Many(values)) if values.is_empty() => "0".to_string(),
        (Operator::NotIn, Operand::Many(values)) if values.is_empty() => "1".to_string(),
        (Operator::Ne, operand) => match value_predicate("t.name", Operator::Eq, operand, params) {
            Some(predicate) => format!("NOT {}", has_tag(predicate)),
            None => "0".to_string(),
        },
        (Operator::NotIn, operand) => {
            match value_predicate("t.name", Operator::In, operand, params) {
                Some(predicate) => format!("NOT {}", has_tag(predicate)),
                None => "0".to_string(),
            }
        }
        (op, operand) => match value_predicate("t.name", *op, operand, params) {
            Some(predicate) => has_tag(predicate),
            None => "0".to_string(),
        },
    }
}

/// SQL column for a field; `None` for the tag set, which has no column.
pub(crate) fn column_for(field: Field) -> Option<&'static str> {
    match field {
        Field::Name => Some("a.name"),
        Field::Size => Some("b.size"),
        Field::Type => Some("b.primary_type"),
        Field::Mime => Some("b.mime"),
        Field::Created => Some("b.created_at"),
        Field::Modified => Some("a.mtime"),
        Field::Path => Some("a.full_path"),
        Field::Extension => Some("a.extension"),
        Field::Tag => None,
    }
}

fn order_terms(sort: &[SortSpec]) -> Vec<OrderTerm> {
    let terms: Vec<OrderTerm> = sort
        .iter()
        .filter_map(|spec| column_for(spec.field).map(|col| OrderTerm::new(col, spec.descending)))
        .collect();
    if terms.is_empty() {
        vec![OrderTerm::newest_first()]
    } else {
        terms
    }
}

fn scalar_value(value: &Scalar) -> DbValue {
    match value {
        Scalar::Text(s) => DbValue::Text(s.clone()),
        Scalar::Integer(n) => DbValue::Integer(*n),
        Scalar::Real(n) => DbValue::Real(*n),
        Scalar::Timestamp(ts) => DbValue::Timestamp(*ts),
    }
}

pub(crate) fn like_pattern(op: Operator, text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    match op {
        Operator::StartsWith => format!("{}%", escaped),
        Operator::EndsWith => format!("%{}", escaped),
        _ => format!("%{}%", escaped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sql(ast: Value) -> (String, Vec<DbValue>) {
        let compiled = compile(&ast).unwrap();
        (
            compiled.filter.clause().to_string(),
            compiled.filter.params().to_vec(),
        )
    }

    #[test]
    fn values_are_bound_never_inlined() {
        let (clause, params) = sql(json!({"field": "name", "op": "eq", "value": "x' OR 1=1 --"}));
        assert_eq!(clause, "a.name = ?");
        assert_eq!(params, vec![DbValue::Text("x' OR 1=1 --".into())]);
    }

    #[test]
    fn empty_lists_fold_to_constants() {
        assert_eq!(sql(json!({"field": "type", "op": "in", "value": []})).0, "0");
        assert_eq!(sql(json!({"field": "type", "op": "not_in", "value": []})).0, "1");
        assert_eq!(sql(json!({"all": []})).0, "1");
        assert_eq!(sql(json!({"any": []})).0, "0");
    }

    #[test]
    fn eq_null_is_is_null() {
        assert_eq!(
            sql(json!({"field": "mime", "op": "eq", "value": null})).0,
            "b.mime IS NULL"
        );
    }

    #[test]
    fn nullable_columns_are_guarded() {
        let (clause, _) = sql(json!({"field": "type", "op": "ne", "value": "image"}));
        assert_eq!(clause, "b.primary_type IS NOT NULL AND b.primary_type != ?");
    }

    #[test]
    fn like_escapes_wildcards() {
        let (clause, params) = sql(json!({"field": "name", "op": "contains", "value": "50%_off"}));
        assert_eq!(clause, "a.name LIKE ? ESCAPE '\\'");
        assert_eq!(params, vec![DbValue::Text("%50\\%\\_off%".into())]);
    }

    #[test]
    fn tags_compile_to_subqueries() {
        let (clause, params) = sql(json!({"field": "tag", "op": "ne", "value": "keep"}));
        assert!(clause.starts_with("NOT EXISTS (SELECT 1 FROM file_tags"));
        assert!(clause.ends_with("t.name = ?)"));
        assert_eq!(params, vec![DbValue::Text("keep".into())]);
    }

    #[test]
    fn combinators_nest_with_parentheses() {
        let (clause, params) = sql(json!({
            "all": [
                {"field": "size", "op": "gt", "value": 10},
                {"not": {"field": "extension", "op": "in", "value": ["tmp", "LOG"]}}
            ]
        }));
        assert_eq!(
            clause,
            "(b.size > ?) AND (NOT (a.extension IS NOT NULL AND a.extension IN (?, ?)))"
        );
        assert_eq!(
            params,
            vec![
                DbValue::Integer(10),
                DbValue::Text("tmp".into()),
                DbValue::Text("log".into())
            ]
        );
    }

    #[test]
    fn sort_defaults_to_newest_first() {
        let compiled = compile(&json!({})).unwrap();
        assert_eq!(compiled.order, vec![OrderTerm::newest_first()]);

        let compiled = compile(&json!({"sort": [{"field": "size", "dir": "asc"}]})).unwrap();
        assert_eq!(compiled.order, vec![OrderTerm::new("b.size", false)]);
    }
}
