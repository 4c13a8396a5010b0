//! Per-instance flow state
//!
//! `FlowState` is the serializable part of a running instance. A state store
//! persists exactly this shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value bag shared by rules, expressions and hooks
pub type FlowData = serde_json::Map<String, serde_json::Value>;

/// Shallow-merge `update` into `data`; existing keys not named in `update` survive
pub fn merge_data(data: &mut FlowData, update: FlowData) {
    for (key, value) in update {
        data.insert(key, value);
    }
}

/// Single problem reported by a validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field the issue refers to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    pub message: String,
}

/// Outcome of a step validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            errors: vec![ValidationIssue {
                field: None,
                message: message.into(),
            }],
        }
    }

    /// Add a field-scoped issue; the result becomes invalid
    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.is_valid = false;
        self.errors.push(ValidationIssue {
            field: Some(field.into()),
            message: message.into(),
        });
        self
    }
}

/// Mutable progress of one flow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub flow_id: String,

    pub current_step_id: String,

    /// Declaration index of the current step
    pub current_step_index: usize,

    /// Stack of previously-current step ids, most recent last
    #[serde(default)]
    pub visited_steps: Vec<String>,

    #[serde(default)]
    pub data: FlowData,

    /// Last validation result per step id
    #[serde(default)]
    pub errors: BTreeMap<String, ValidationResult>,

    #[serde(default)]
    pub is_validating: bool,

    #[serde(default)]
    pub is_complete: bool,

    #[serde(default)]
    pub is_paused: bool,

    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlowState {
    pub fn new(
        flow_id: impl Into<String>,
        current_step_id: impl Into<String>,
        current_step_index: usize,
        data: FlowData,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            current_step_id: current_step_id.into(),
            current_step_index,
            visited_steps: Vec::new(),
            data,
            errors: BTreeMap::new(),
            is_validating: false,
            is_complete: false,
            is_paused: false,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Errors recorded for the current step, if its last validation failed
    pub fn current_errors(&self) -> Option<&ValidationResult> {
        self.errors
            .get(&self.current_step_id)
            .filter(|result| !result.is_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: serde_json::Value) -> FlowData {
        match value {
            serde_json::Value::Object(map) => map,
            _ => FlowData::new(),
        }
    }

    #[test]
    fn test_merge_is_shallow_and_additive() {
        let mut data = FlowData::new();
        merge_data(&mut data, bag(json!({"a": 1})));
        merge_data(&mut data, bag(json!({"b": 2})));
        assert_eq!(serde_json::Value::Object(data.clone()), json!({"a": 1, "b": 2}));

        // Nested objects are replaced, not deep-merged
        merge_data(&mut data, bag(json!({"a": {"x": 1}})));
        merge_data(&mut data, bag(json!({"a": {"y": 2}})));
        assert_eq!(data["a"], json!({"y": 2}));
        assert_eq!(data["b"], json!(2));
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = FlowState::new("onboarding", "welcome", 0, bag(json!({"plan": "pro"})));
        let value = serde_json::to_value(&state).unwrap();

        assert_eq!(value["flowId"], json!("onboarding"));
        assert_eq!(value["currentStepId"], json!("welcome"));
        assert_eq!(value["visitedSteps"], json!([]));
        assert!(value.get("completedAt").is_none());

        let back: FlowState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_current_errors_only_reports_failures() {
        let mut state = FlowState::new("f", "s1", 0, FlowData::new());
        assert!(state.current_errors().is_none());

        state.errors.insert("s1".into(), ValidationResult::valid());
        assert!(state.current_errors().is_none());

        state.errors.insert(
            "s1".into(),
            ValidationResult::valid().with_field_error("email", "required"),
        );
        let errors = state.current_errors().unwrap();
        assert_eq!(errors.errors[0].field.as_deref(), Some("email"));
    }
}
