//! Lifecycle events published by the engine

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::{FlowData, ValidationResult};

/// Event kind, used to subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowEventKind {
    #[serde(rename = "flow-start")]
    Start,
    #[serde(rename = "flow-step-enter")]
    StepEnter,
    #[serde(rename = "flow-step-exit")]
    StepExit,
    #[serde(rename = "flow-step-change")]
    StepChange,
    #[serde(rename = "flow-data-update")]
    DataUpdate,
    #[serde(rename = "flow-validation-error")]
    ValidationError,
    #[serde(rename = "flow-pause")]
    Pause,
    #[serde(rename = "flow-resume")]
    Resume,
    #[serde(rename = "flow-complete")]
    Complete,
    #[serde(rename = "flow-cancel")]
    Cancel,
}

impl FlowEventKind {
    pub const ALL: [FlowEventKind; 10] = [
        Self::Start,
        Self::StepEnter,
        Self::StepExit,
        Self::StepChange,
        Self::DataUpdate,
        Self::ValidationError,
        Self::Pause,
        Self::Resume,
        Self::Complete,
        Self::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "flow-start",
            Self::StepEnter => "flow-step-enter",
            Self::StepExit => "flow-step-exit",
            Self::StepChange => "flow-step-change",
            Self::DataUpdate => "flow-data-update",
            Self::ValidationError => "flow-validation-error",
            Self::Pause => "flow-pause",
            Self::Resume => "flow-resume",
            Self::Complete => "flow-complete",
            Self::Cancel => "flow-cancel",
        }
    }

    /// Completion and cancellation end an instance
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancel)
    }
}

impl fmt::Display for FlowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload; every variant carries the instance id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    #[serde(rename = "flow-start", rename_all = "camelCase")]
    Start {
        instance_id: String,
        flow_id: String,
        step_id: String,
    },

    #[serde(rename = "flow-step-enter", rename_all = "camelCase")]
    StepEnter { instance_id: String, step_id: String },

    #[serde(rename = "flow-step-exit", rename_all = "camelCase")]
    StepExit { instance_id: String, step_id: String },

    #[serde(rename = "flow-step-change", rename_all = "camelCase")]
    StepChange {
        instance_id: String,
        from_step_id: String,
        to_step_id: String,
    },

    /// `data` is the partial update, not the merged bag
    #[serde(rename = "flow-data-update", rename_all = "camelCase")]
    DataUpdate { instance_id: String, data: FlowData },

    #[serde(rename = "flow-validation-error", rename_all = "camelCase")]
    ValidationError {
        instance_id: String,
        step_id: String,
        result: ValidationResult,
    },

    #[serde(rename = "flow-pause", rename_all = "camelCase")]
    Pause { instance_id: String },

    #[serde(rename = "flow-resume", rename_all = "camelCase")]
    Resume { instance_id: String },

    #[serde(rename = "flow-complete", rename_all = "camelCase")]
    Complete { instance_id: String, data: FlowData },

    #[serde(rename = "flow-cancel", rename_all = "camelCase")]
    Cancel { instance_id: String },
}

impl FlowEvent {
    pub fn kind(&self) -> FlowEventKind {
        match self {
            Self::Start { .. } => FlowEventKind::Start,
            Self::StepEnter { .. } => FlowEventKind::StepEnter,
            Self::StepExit { .. } => FlowEventKind::StepExit,
            Self::StepChange { .. } => FlowEventKind::StepChange,
            Self::DataUpdate { .. } => FlowEventKind::DataUpdate,
            Self::ValidationError { .. } => FlowEventKind::ValidationError,
            Self::Pause { .. } => FlowEventKind::Pause,
            Self::Resume { .. } => FlowEventKind::Resume,
            Self::Complete { .. } => FlowEventKind::Complete,
            Self::Cancel { .. } => FlowEventKind::Cancel,
        }
    }

    pub fn instance_id(&self) -> &str {
        match self {
            Self::Start { instance_id, .. }
            | Self::StepEnter { instance_id, .. }
            | Self::StepExit { instance_id, .. }
            | Self::StepChange { instance_id, .. }
            | Self::DataUpdate { instance_id, .. }
            | Self::ValidationError { instance_id, .. }
            | Self::Pause { instance_id }
            | Self::Resume { instance_id }
            | Self::Complete { instance_id, .. }
            | Self::Cancel { instance_id } => instance_id,
        }
    }
}
