//! Declarative object filter used to select the objects a refactor acts
//! on. Conditions are ANDed and evaluated against the logical view.
//!
//! This is deliberately small: no joins, no boolean nesting.

use std::cmp::Ordering;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlexError, Result};
use crate::property::compile_regex;
use crate::registry::ClassInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    NotNull,
    /// Regex match on the text form.
    Matches,
    /// Value is one of an array.
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub property: String,
    pub op: FilterOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectFilter {
    pub conditions: Vec<Condition>,
}

impl ObjectFilter {
    /// Filter matching every object.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn with(mut self, property: &str, op: FilterOp, value: Option<Value>) -> Self {
        self.conditions.push(Condition { property: property.to_string(), op, value });
        self
    }

    pub fn eq(self, property: &str, value: Value) -> Self {
        self.with(property, FilterOp::Eq, Some(value))
    }

    pub fn ne(self, property: &str, value: Value) -> Self {
        self.with(property, FilterOp::Ne, Some(value))
    }

    pub fn gt(self, property: &str, value: Value) -> Self {
        self.with(property, FilterOp::Gt, Some(value))
    }

    pub fn lt(self, property: &str, value: Value) -> Self {
        self.with(property, FilterOp::Lt, Some(value))
    }

    pub fn is_null(self, property: &str) -> Self {
        self.with(property, FilterOp::IsNull, None)
    }

    pub fn not_null(self, property: &str) -> Self {
        self.with(property, FilterOp::NotNull, None)
    }

    pub fn matches(self, property: &str, pattern: &str) -> Self {
        self.with(property, FilterOp::Matches, Some(Value::String(pattern.to_string())))
    }

    /// Check property names and operands against `class` and compile
    /// regexes. Fails before any object is touched.
    pub fn prepare(&self, class: &ClassInfo) -> Result<PreparedFilter> {
        let mut conditions = Vec::with_capacity(self.conditions.len());
        for c in &self.conditions {
            class.require_property(&c.property)?;
            let regex = match c.op {
                FilterOp::Matches => {
                    let pattern = c.value.as_ref().and_then(Value::as_str).ok_or_else(|| {
                        FlexError::InvalidDefinition(format!("filter on '{}': matches needs a pattern", c.property))
                    })?;
                    Some(compile_regex(pattern)?)
                }
                _ => None,
            };
            let needs_value = !matches!(c.op, FilterOp::IsNull | FilterOp::NotNull);
            if needs_value && c.value.is_none() {
                return Err(FlexError::InvalidDefinition(format!(
                    "filter on '{}' has no value",
                    c.property
                )));
            }
            if c.op == FilterOp::In && !c.value.as_ref().is_some_and(Value::is_array) {
                return Err(FlexError::InvalidDefinition(format!(
                    "filter on '{}': in needs an array",
                    c.property
                )));
            }
            conditions.push((c.clone(), regex));
        }
        Ok(PreparedFilter { conditions })
    }
}

/// Filter checked against a class, ready to evaluate.
#[derive(Debug, Clone)]
pub struct PreparedFilter {
    conditions: Vec<(Condition, Option<Regex>)>,
}

impl PreparedFilter {
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|(c, regex)| {
            let actual = data.get(&c.property).filter(|v| !v.is_null());
            match c.op {
                FilterOp::IsNull => actual.is_none(),
                FilterOp::NotNull => actual.is_some(),
                _ => {
                    let Some(actual) = actual else {
                        return c.op == FilterOp::Ne;
                    };
                    let items: Vec<&Value> = match actual {
                        Value::Array(a) => a.iter().collect(),
                        v => vec![v],
                    };
                    let expected = c.value.as_ref().unwrap_or(&Value::Null);
                    match c.op {
                        FilterOp::Ne => items.iter().all(|v| compare(v, expected) != Some(Ordering::Equal)),
                        _ => items.iter().any(|v| test(c.op, v, expected, regex.as_ref())),
                    }
                }
            }
        })
    }
}

fn test(op: FilterOp, actual: &Value, expected: &Value, regex: Option<&Regex>) -> bool {
    match op {
        FilterOp::Eq => compare(actual, expected) == Some(Ordering::Equal),
        FilterOp::Lt => compare(actual, expected) == Some(Ordering::Less),
        FilterOp::Le => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
        FilterOp::Ge => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Matches => regex.is_some_and(|re| re.is_match(&text_of(actual))),
        FilterOp::In => expected
            .as_array()
            .is_some_and(|a| a.iter().any(|e| compare(actual, e) == Some(Ordering::Equal))),
        FilterOp::Ne | FilterOp::IsNull | FilterOp::NotNull => false,
    }
}

/// Ordering between two JSON scalars of the same kind.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Key comparison ─────────────────────────────────────────────────

/// How key values are compared when grouping or correlating objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyComparison {
    #[default]
    Exact,
    IgnoreCase,
    /// Case-insensitive, trimmed, inner whitespace collapsed.
    Normalized,
}

impl KeyComparison {
    /// Grouping key for a tuple of values. `None` if any part is missing,
    /// objects without a full key never group.
    pub fn key_of(&self, values: &[Option<&Value>]) -> Option<String> {
        let mut parts = Vec::with_capacity(values.len());
        for v in values {
            let v = (*v).filter(|v| !v.is_null())?;
            let text = text_of(v);
            parts.push(match self {
                KeyComparison::Exact => text,
                KeyComparison::IgnoreCase => text.to_lowercase(),
                KeyComparison::Normalized => text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
            });
        }
        serde_json::to_string(&parts).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(filter: &ObjectFilter, data: Value) -> bool {
        let prepared = PreparedFilter {
            conditions: filter
                .conditions
                .iter()
                .map(|c| {
                    let re = (c.op == FilterOp::Matches)
                        .then(|| compile_regex(c.value.as_ref().unwrap().as_str().unwrap()).unwrap());
                    (c.clone(), re)
                })
                .collect(),
        };
        prepared.matches(data.as_object().unwrap())
    }

    #[test]
    fn test_conditions_are_anded() {
        let f = ObjectFilter::all().eq("city", json!("Oslo")).gt("age", json!(30));
        assert!(run(&f, json!({"city": "Oslo", "age": 40})));
        assert!(!run(&f, json!({"city": "Oslo", "age": 20})));
        assert!(!run(&f, json!({"age": 40})));
    }

    #[test]
    fn test_null_handling() {
        let f = ObjectFilter::all().is_null("email");
        assert!(run(&f, json!({"email": null})));
        assert!(run(&f, json!({})));
        assert!(!run(&f, json!({"email": "a@b"})));
        assert!(run(&ObjectFilter::all().ne("x", json!(1)), json!({})));
    }

    #[test]
    fn test_matches_and_multi() {
        let f = ObjectFilter::all().matches("tags", "^ur");
        assert!(run(&f, json!({"tags": ["new", "urgent"]})));
        assert!(!run(&f, json!({"tags": ["new"]})));
    }

    #[test]
    fn test_filter_json_shape() {
        let f: ObjectFilter = serde_json::from_value(json!([
            {"property": "status", "op": "in", "value": ["open", "new"]}
        ]))
        .unwrap();
        assert!(run(&f, json!({"status": "new"})));
    }

    #[test]
    fn test_key_comparison() {
        let a = json!("  Acme   Corp ");
        let b = json!("acme corp");
        assert_ne!(KeyComparison::Exact.key_of(&[Some(&a)]), KeyComparison::Exact.key_of(&[Some(&b)]));
        assert_eq!(
            KeyComparison::Normalized.key_of(&[Some(&a)]),
            KeyComparison::Normalized.key_of(&[Some(&b)])
        );
        assert_eq!(KeyComparison::Exact.key_of(&[Some(&a), None]), None);
    }
}
