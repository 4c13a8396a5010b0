//! Flow templates
//!
//! A template wraps a base flow under a category. `instantiate` produces a
//! concrete flow with selected fields overridden.

use serde::{Deserialize, Serialize};

use crate::branch::FlowBranch;
use crate::flow::{Flow, FlowMode, FlowSettings};
use crate::hook::{CancelCallback, CompleteCallback, StepChangeCallback};
use crate::state::{merge_data, FlowData};
use crate::step::FlowStep;
use crate::FlowResult;

/// Reusable flow blueprint
///
/// ```yaml
/// id: survey
/// name: Customer survey
/// category: feedback
/// flow:
///   id: survey
///   name: Survey
///   steps:
///     - id: rate
///       type: selection
///       component: StarRating
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowTemplate {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub flow: Flow,
}

impl FlowTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, flow: Flow) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            category: None,
            flow,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn from_yaml(content: &str) -> FlowResult<Self> {
        let template: FlowTemplate = serde_yaml::from_str(content)?;
        template.flow.validate()?;
        Ok(template)
    }

    /// Concrete flow from this template with `overrides` applied
    pub fn instantiate(&self, overrides: FlowOverrides) -> Flow {
        let base = &self.flow;
        let mut initial_data = base.initial_data.clone();
        if let Some(data) = overrides.initial_data {
            merge_data(&mut initial_data, data);
        }

        let mut callbacks = base.callbacks.clone();
        if overrides.on_complete.is_some() {
            callbacks.on_complete = overrides.on_complete;
        }
        if overrides.on_cancel.is_some() {
            callbacks.on_cancel = overrides.on_cancel;
        }
        if overrides.on_step_change.is_some() {
            callbacks.on_step_change = overrides.on_step_change;
        }

        Flow {
            id: overrides.id.unwrap_or_else(|| base.id.clone()),
            name: overrides.name.unwrap_or_else(|| base.name.clone()),
            description: overrides.description.or_else(|| base.description.clone()),
            mode: overrides.mode.unwrap_or(base.mode),
            steps: overrides.steps.unwrap_or_else(|| base.steps.clone()),
            branches: overrides.branches.unwrap_or_else(|| base.branches.clone()),
            settings: overrides.settings.unwrap_or_else(|| base.settings.clone()),
            initial_data,
            callbacks,
        }
    }
}

/// Fields that replace the template's when set
///
/// `initial_data` is shallow-merged over the template's instead of replacing it.
#[derive(Default)]
pub struct FlowOverrides {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub mode: Option<FlowMode>,
    pub steps: Option<Vec<FlowStep>>,
    pub branches: Option<Vec<FlowBranch>>,
    pub settings: Option<FlowSettings>,
    pub initial_data: Option<FlowData>,
    pub on_complete: Option<CompleteCallback>,
    pub on_cancel: Option<CancelCallback>,
    pub on_step_change: Option<StepChangeCallback>,
}

impl FlowOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn initial_data(mut self, data: FlowData) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn settings(mut self, settings: FlowSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}
