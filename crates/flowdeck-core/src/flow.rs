//! Flow definitions
//!
//! A `Flow` is the immutable definition shared by every instance started
//! from it. Definitions are usually loaded from YAML:
//!
//! ```yaml
//! id: onboarding
//! name: Customer onboarding
//! mode: guided
//! settings:
//!   showProgress: true
//!   persistState: true
//! initialData:
//!   plan: free
//! steps:
//!   - id: welcome
//!     type: content
//!   - id: profile
//!     type: form
//!     component: ProfileForm
//! branches: []
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::branch::{BranchCondition, FlowBranch};
use crate::hook::FlowCallbacks;
use crate::state::FlowData;
use crate::step::{FlowStep, StepType};
use crate::{FlowError, FlowResult};

/// How strictly the flow guides the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowMode {
    #[default]
    Guided,
    FreeExplore,
    Hybrid,
}

fn default_true() -> bool {
    true
}

/// Per-flow behavior switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSettings {
    #[serde(default)]
    pub show_progress: bool,

    #[serde(default = "default_true")]
    pub allow_back: bool,

    #[serde(default)]
    pub allow_skip: bool,

    #[serde(default)]
    pub auto_advance: bool,

    /// Save a state snapshot after every change
    #[serde(default)]
    pub persist_state: bool,

    /// Store key prefix; the flow id when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_key: Option<String>,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            show_progress: false,
            allow_back: true,
            allow_skip: false,
            auto_advance: false,
            persist_state: false,
            persistence_key: None,
        }
    }
}

/// Reusable multi-step flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub mode: FlowMode,

    pub steps: Vec<FlowStep>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<FlowBranch>,

    #[serde(default)]
    pub settings: FlowSettings,

    #[serde(default, skip_serializing_if = "FlowData::is_empty")]
    pub initial_data: FlowData,

    #[serde(skip)]
    pub callbacks: FlowCallbacks,
}

impl Flow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<FlowStep>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            mode: FlowMode::default(),
            steps,
            branches: Vec::new(),
            settings: FlowSettings::default(),
            initial_data: FlowData::new(),
            callbacks: FlowCallbacks::default(),
        }
    }

    /// Parse a flow from YAML and validate it
    pub fn from_yaml(content: &str) -> FlowResult<Self> {
        let flow: Flow = serde_yaml::from_str(content)?;
        flow.validate()?;
        Ok(flow)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mode(mut self, mode: FlowMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_initial_data(mut self, data: FlowData) -> Self {
        self.initial_data = data;
        self
    }

    pub fn with_callbacks(mut self, callbacks: FlowCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_branch(mut self, branch: FlowBranch) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Declaration index of a step
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// First step visible for `data`, with its index
    pub fn first_visible_step(&self, data: &FlowData) -> Option<(usize, &FlowStep)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(_, step)| step.is_visible(data))
    }

    /// Steps visible for `data`, in declaration order
    pub fn visible_steps<'a>(&'a self, data: &'a FlowData) -> impl Iterator<Item = &'a FlowStep> {
        self.steps.iter().filter(move |step| step.is_visible(data))
    }

    /// Key under which instance snapshots of this flow are stored
    pub fn persistence_key(&self) -> &str {
        self.settings.persistence_key.as_deref().unwrap_or(&self.id)
    }

    /// Check the definition for structural errors
    pub fn validate(&self) -> FlowResult<()> {
        if self.id.is_empty() {
            return Err(FlowError::invalid_flow("<unnamed>", "flow id is required"));
        }

        if self.steps.is_empty() {
            return Err(FlowError::invalid_flow(&self.id, "at least one step is required"));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(FlowError::invalid_flow(&self.id, "step id is required"));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(FlowError::invalid_flow(
                    &self.id,
                    format!("duplicate step id '{}'", step.id),
                ));
            }
            if step.step_type == StepType::Navigation && step.navigation.is_none() {
                return Err(FlowError::invalid_flow(
                    &self.id,
                    format!("navigation step '{}' requires a navigation target", step.id),
                ));
            }
        }

        for branch in &self.branches {
            if !ids.contains(branch.from_step_id.as_str()) {
                return Err(FlowError::invalid_flow(
                    &self.id,
                    format!(
                        "branch '{}' starts at unknown step '{}'",
                        branch.id, branch.from_step_id
                    ),
                ));
            }
            if !ids.contains(branch.target_step_id.as_str()) {
                return Err(FlowError::invalid_flow(
                    &self.id,
                    format!(
                        "branch '{}' targets unknown step '{}'",
                        branch.id, branch.target_step_id
                    ),
                ));
            }
            if let BranchCondition::Expression { expression } = &branch.condition {
                crate::expression::Expression::parse(expression).map_err(|e| {
                    FlowError::invalid_flow(
                        &self.id,
                        format!("branch '{}' has a malformed expression: {}", branch.id, e),
                    )
                })?;
            }
        }

        Ok(())
    }
}
