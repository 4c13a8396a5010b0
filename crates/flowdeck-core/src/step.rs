//! Flow step definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::condition::ConditionalRule;
use crate::hook::{StepHook, StepHooks, StepValidator};
use crate::state::FlowData;

/// Kind of step, used by renderers to pick a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// Data entry
    Form,
    /// Move the presentation to a target (scene, slide, stage)
    Navigation,
    /// Choose among options
    Selection,
    /// Summary before completion
    Review,
    /// Static content
    Content,
}

impl StepType {
    /// Steps whose renderer collects or displays data through a component
    pub fn is_form_like(&self) -> bool {
        matches!(self, Self::Form | Self::Selection | Self::Review)
    }
}

/// Point in the target's coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

/// Transition used when a navigation step is entered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// Transition style (e.g. "fade", "slide", "zoom")
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Target of a navigation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTarget {
    /// Reference to a scene, deck, slide or stage
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

/// Guidance shown alongside a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepGuidance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tips: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
}

/// A single stage of a flow
///
/// ```yaml
/// id: billing
/// type: form
/// title: Billing details
/// component: BillingForm
/// condition:
///   field: plan
///   operator: not_equals
///   value: free
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    pub id: String,

    /// Position hint; declaration order is what navigation uses
    #[serde(default)]
    pub order: u32,

    #[serde(rename = "type")]
    pub step_type: StepType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Navigation steps only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<NavigationTarget>,

    /// Renderer component reference for form-like steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub props: HashMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<StepGuidance>,

    /// Visibility rule; the step is skipped when it evaluates to false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionalRule>,

    #[serde(skip)]
    pub hooks: StepHooks,
}

impl FlowStep {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            order: 0,
            step_type,
            title: None,
            description: None,
            navigation: None,
            component: None,
            props: HashMap::new(),
            guidance: None,
            condition: None,
            hooks: StepHooks::default(),
        }
    }

    pub fn form(id: impl Into<String>, component: impl Into<String>) -> Self {
        Self::new(id, StepType::Form).with_component(component)
    }

    pub fn navigation(id: impl Into<String>, target: impl Into<String>) -> Self {
        let mut step = Self::new(id, StepType::Navigation);
        step.navigation = Some(NavigationTarget {
            target: target.into(),
            coordinates: None,
            transition: None,
        });
        step
    }

    pub fn content(id: impl Into<String>) -> Self {
        Self::new(id, StepType::Content)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_condition(mut self, condition: ConditionalRule) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn on_enter(mut self, hook: Arc<dyn StepHook>) -> Self {
        self.hooks.on_enter = Some(hook);
        self
    }

    pub fn on_exit(mut self, hook: Arc<dyn StepHook>) -> Self {
        self.hooks.on_exit = Some(hook);
        self
    }

    pub fn on_validate(mut self, validator: Arc<dyn StepValidator>) -> Self {
        self.hooks.on_validate = Some(validator);
        self
    }

    pub fn is_visible(&self, data: &FlowData) -> bool {
        crate::condition::is_step_visible(self, data)
    }
}
