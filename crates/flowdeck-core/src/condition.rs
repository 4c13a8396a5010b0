//! Condition evaluator
//!
//! Evaluates `ConditionalRule` trees against a flow's data bag. Evaluation
//! never fails: malformed rules degrade to a fixed answer and log a warning
//! (unknown operator is `true`, non-numeric comparison is `false`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::state::FlowData;
use crate::step::FlowStep;

/// Comparison applied between `data[field]` and the rule's value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Exists,
    NotExists,
    /// Anything not recognized when the rule was loaded
    #[serde(other)]
    Unknown,
}

/// How child rules are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// Boolean rule over flow data, optionally combining nested rules
///
/// When `rules` is non-empty the node only combines its children with
/// `logic`; its own `field`, `operator` and `value` are ignored.
///
/// ```yaml
/// logic: or
/// rules:
///   - field: plan
///     operator: equals
///     value: enterprise
///   - field: seats
///     operator: greater_than
///     value: 50
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionalRule {
    #[serde(default)]
    pub field: String,

    #[serde(default)]
    pub operator: Operator,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default)]
    pub logic: Logic,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<ConditionalRule>,
}

impl ConditionalRule {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Equals, value)
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::Exists,
            ..Default::default()
        }
    }

    pub fn not_exists(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::NotExists,
            ..Default::default()
        }
    }

    /// Combinator that holds when every child holds
    pub fn all(rules: Vec<ConditionalRule>) -> Self {
        Self {
            logic: Logic::And,
            rules,
            ..Default::default()
        }
    }

    /// Combinator that holds when any child holds
    pub fn any(rules: Vec<ConditionalRule>) -> Self {
        Self {
            logic: Logic::Or,
            rules,
            ..Default::default()
        }
    }

    pub fn evaluate(&self, data: &FlowData) -> bool {
        evaluate_condition(self, data)
    }
}

/// Evaluate a rule tree against `data`
pub fn evaluate_condition(rule: &ConditionalRule, data: &FlowData) -> bool {
    if !rule.rules.is_empty() {
        return match rule.logic {
            Logic::Or => rule.rules.iter().any(|child| evaluate_condition(child, data)),
            Logic::And => rule.rules.iter().all(|child| evaluate_condition(child, data)),
        };
    }

    let actual = data.get(&rule.field);
    let expected = rule.value.as_ref();

    match rule.operator {
        Operator::Equals => strict_equals(actual, expected),
        Operator::NotEquals => !strict_equals(actual, expected),
        Operator::Contains => array_contains(actual, expected),
        Operator::NotContains => !array_contains(actual, expected),
        Operator::GreaterThan => compare_numbers(rule, actual, expected, |a, b| a > b),
        Operator::LessThan => compare_numbers(rule, actual, expected, |a, b| a < b),
        Operator::GreaterThanOrEqual => compare_numbers(rule, actual, expected, |a, b| a >= b),
        Operator::LessThanOrEqual => compare_numbers(rule, actual, expected, |a, b| a <= b),
        Operator::Exists => is_present(actual),
        Operator::NotExists => !is_present(actual),
        Operator::Unknown => {
            warn!(
                "Unknown operator on rule for field '{}', treating as satisfied",
                rule.field
            );
            true
        }
    }
}

/// A step without a condition is always visible
pub fn is_step_visible(step: &FlowStep, data: &FlowData) -> bool {
    match &step.condition {
        Some(condition) => evaluate_condition(condition, data),
        None => true,
    }
}

/// Equality of two JSON values, with numbers compared by value (`1 == 1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

fn strict_equals(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    match (actual, expected) {
        (Some(a), Some(b)) => values_equal(a, b),
        // An absent comparand stands for null
        (Some(Value::Null), None) => true,
        (None, None) => true,
        _ => false,
    }
}

fn array_contains(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let Some(Value::Array(items)) = actual else {
        return false;
    };
    let needle = expected.unwrap_or(&Value::Null);
    items.iter().any(|item| values_equal(item, needle))
}

fn compare_numbers(
    rule: &ConditionalRule,
    actual: Option<&Value>,
    expected: Option<&Value>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (
        actual.and_then(Value::as_f64),
        expected.and_then(Value::as_f64),
    ) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => {
            warn!(
                "Non-numeric comparison on field '{}' ({:?}), treating as false",
                rule.field, rule.operator
            );
            false
        }
    }
}

fn is_present(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}
