//! Automation rules: `{"name", "when", "then"}` documents that run ordered
//! actions on the catalog entries their condition matches.
//!
//! A `Rule` only exists after validation, so everything the engine runs has
//! a known condition vocabulary and parsed action arguments.

mod action;
mod engine;
mod eval;

pub use action::{Action, ACTION_NAMES, DEFAULT_RULE_TAG_COLOR};
pub use engine::{ActionResult, ApplyReport, BatchItem, BatchOutcome, BatchReport, RuleEngine};
pub use eval::matches;

use crate::error::ValidationErrors;
use crate::grammar::{self, Expr};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub when: Expr,
    pub then: Vec<Action>,
}

impl Rule {
    /// Validate and parse one rule document.
    pub fn from_json(doc: &Value) -> Result<Self, ValidationErrors> {
        let mut errors = Vec::new();

        let Some(obj) = doc.as_object() else {
            return Err(ValidationErrors(vec!["rule must be a JSON object".to_string()]));
        };

        let name = match obj.get("name").and_then(Value::as_str).map(str::trim) {
            Some(name) if !name.is_empty() => Some(name.to_string()),
            _ => {
                errors.push("'name' is required and must be a non-empty string".to_string());
                None
            }
        };

        let when = match obj.get("when") {
            None => {
                errors.push("'when' is required".to_string());
                None
            }
            Some(value) => match grammar::parse_expr(value) {
                Ok(expr) => Some(expr),
                Err(e) => {
                    errors.push(format!("when: {}", e));
                    None
                }
            },
        };

        let then = match obj.get("then") {
            None => {
                errors.push("'then' is required".to_string());
                None
            }
            Some(Value::Array(items)) => {
                let mut actions = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match Action::parse(item) {
                        Ok(action) => actions.push(action),
                        Err(e) => errors.push(format!("then[{}]: {}", i, e)),
                    }
                }
                Some(actions)
            }
            Some(_) => {
                errors.push("'then' must be an array of actions".to_string());
                None
            }
        };

        for key in obj.keys() {
            if !matches!(key.as_str(), "name" | "when" | "then" | "description" | "enabled") {
                errors.push(format!("unexpected key '{}'", key));
            }
        }

        match (name, when, then) {
            (Some(name), Some(when), Some(then)) if errors.is_empty() => Ok(Rule { name, when, then }),
            _ => Err(ValidationErrors(errors)),
        }
    }
}

/// Outcome of `validate`, for callers that want a report instead of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check a rule document against the condition and action vocabulary.
pub fn validate(doc: &Value) -> ValidationResult {
    match Rule::from_json(doc) {
        Ok(_) => ValidationResult {
            valid: true,
            errors: Vec::new(),
        },
        Err(errors) => ValidationResult {
            valid: false,
            errors: errors.0,
        },
    }
}

/// Parse a list of rule documents, reporting every invalid one.
pub fn parse_rules(docs: &[Value]) -> Result<Vec<Rule>, ValidationErrors> {
    let mut rules = Vec::with_capacity(docs.len());
    let mut errors = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        match Rule::from_json(doc) {
            Ok(rule) => rules.push(rule),
            Err(e) => errors.extend(e.0.into_iter().map(|msg| format!("rules[{}]: {}", i, msg))),
        }
    }
    if errors.is_empty() {
        Ok(rules)
    } else {
        Err(ValidationErrors(errors))
    }
}
