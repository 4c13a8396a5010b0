// Flowdeck Core - Error types
//
// Errors fall into two families. Configuration errors describe a flow that
// can never run (unknown id, no visible step, malformed definition).
// Operational errors describe a call that could not be applied to a live
// instance; the instance is left untouched when one is returned.

use thiserror::Error;

/// Result alias used across the Flowdeck crates
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors produced by the flow registry and engine
#[derive(Debug, Error)]
pub enum FlowError {
    /// Flow id is not registered
    #[error("flow not found: {0}")]
    FlowNotFound(String),

    /// No step of the flow is visible for the initial data
    #[error("flow '{0}' has no visible step for its initial data")]
    NoVisibleSteps(String),

    /// Flow definition failed validation
    #[error("invalid flow '{flow_id}': {reason}")]
    InvalidFlow { flow_id: String, reason: String },

    /// Generic configuration error (loading, parsing)
    #[error("configuration error: {0}")]
    Config(String),

    /// Instance id is unknown or already terminated
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Step id does not exist in the flow
    #[error("step '{step_id}' not found in flow '{flow_id}'")]
    StepNotFound { flow_id: String, step_id: String },

    /// Step exists but its condition hides it for the current data
    #[error("step '{0}' is not visible for the current data")]
    StepNotVisible(String),

    /// Back navigation requested at the first step
    #[error("instance '{0}' has no previous step")]
    NoHistory(String),

    /// Back navigation disabled by flow settings
    #[error("back navigation is disabled for flow '{0}'")]
    BackNavigationDisabled(String),

    /// Navigation attempted while the instance is paused
    #[error("instance '{0}' is paused")]
    Paused(String),

    /// A step hook or flow callback failed
    #[error("hook '{hook}' failed on step '{step_id}': {message}")]
    Hook {
        hook: String,
        step_id: String,
        message: String,
    },

    /// State store failure
    #[error("state store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_flow(flow_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFlow {
            flow_id: flow_id.into(),
            reason: reason.into(),
        }
    }

    pub fn hook(
        hook: impl Into<String>,
        step_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Hook {
            hook: hook.into(),
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// True for errors that make a flow unstartable
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::FlowNotFound(_)
                | Self::NoVisibleSteps(_)
                | Self::InvalidFlow { .. }
                | Self::Config(_)
                | Self::Yaml(_)
        )
    }

    /// True for errors reported against a live (or vanished) instance
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            Self::InstanceNotFound(_)
                | Self::StepNotFound { .. }
                | Self::StepNotVisible(_)
                | Self::NoHistory(_)
                | Self::BackNavigationDisabled(_)
                | Self::Paused(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(FlowError::FlowNotFound("f".into()).is_configuration());
        assert!(FlowError::NoVisibleSteps("f".into()).is_configuration());
        assert!(!FlowError::InstanceNotFound("i".into()).is_configuration());

        assert!(FlowError::InstanceNotFound("i".into()).is_operational());
        assert!(FlowError::Paused("i".into()).is_operational());
        assert!(!FlowError::hook("on_enter", "s1", "boom").is_operational());
    }

    #[test]
    fn test_error_display() {
        let err = FlowError::StepNotFound {
            flow_id: "onboarding".into(),
            step_id: "stepX".into(),
        };
        assert_eq!(err.to_string(), "step 'stepX' not found in flow 'onboarding'");

        let err = FlowError::hook("on_exit", "profile", "network down");
        assert_eq!(
            err.to_string(),
            "hook 'on_exit' failed on step 'profile': network down"
        );
    }
}
