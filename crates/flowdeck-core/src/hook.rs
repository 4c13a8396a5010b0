//! Step hooks, validators and flow callbacks
//!
//! Hooks are the only code a flow runs. They receive a snapshot of the
//! instance data and a cancellation token that fires when the instance is
//! cancelled while the hook is still running.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::state::{FlowData, ValidationResult};

/// Failure reported by a hook or callback
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<&str> for HookError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HookError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

pub type HookResult = Result<(), HookError>;

/// Everything a hook may look at
#[derive(Debug, Clone)]
pub struct HookContext {
    pub instance_id: String,
    pub step_id: String,
    pub data: FlowData,
    pub cancel: CancellationToken,
}

impl HookContext {
    /// Data stored under the step's own id, `null` when absent
    pub fn step_data(&self) -> Value {
        self.data.get(&self.step_id).cloned().unwrap_or(Value::Null)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Asynchronous step lifecycle hook (`on_enter` / `on_exit`)
#[async_trait]
pub trait StepHook: Send + Sync {
    async fn call(&self, ctx: &HookContext) -> HookResult;
}

/// Step validator, invoked before leaving a step forward
#[async_trait]
pub trait StepValidator: Send + Sync {
    async fn validate(&self, step_data: &Value, ctx: &HookContext)
        -> Result<ValidationResult, HookError>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F, Fut> StepHook for FnHook<F>
where
    F: Fn(HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = HookResult> + Send,
{
    async fn call(&self, ctx: &HookContext) -> HookResult {
        (self.0)(ctx.clone()).await
    }
}

/// Wrap an async closure as a step hook
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn StepHook>
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    Arc::new(FnHook(f))
}

struct FnValidator<F>(F);

#[async_trait]
impl<F> StepValidator for FnValidator<F>
where
    F: Fn(&Value, &FlowData) -> ValidationResult + Send + Sync,
{
    async fn validate(
        &self,
        step_data: &Value,
        ctx: &HookContext,
    ) -> Result<ValidationResult, HookError> {
        Ok((self.0)(step_data, &ctx.data))
    }
}

/// Wrap a synchronous `(step_data, instance_data)` closure as a validator
pub fn validator_fn<F>(f: F) -> Arc<dyn StepValidator>
where
    F: Fn(&Value, &FlowData) -> ValidationResult + Send + Sync + 'static,
{
    Arc::new(FnValidator(f))
}

/// Hooks attached to one step
#[derive(Clone, Default)]
pub struct StepHooks {
    pub on_enter: Option<Arc<dyn StepHook>>,
    pub on_exit: Option<Arc<dyn StepHook>>,
    pub on_validate: Option<Arc<dyn StepValidator>>,
}

impl fmt::Debug for StepHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepHooks")
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .field("on_validate", &self.on_validate.is_some())
            .finish()
    }
}

pub type CompleteCallback = Arc<dyn Fn(FlowData) -> BoxFuture<'static, HookResult> + Send + Sync>;
pub type CancelCallback = Arc<dyn Fn() + Send + Sync>;
/// Called with `(new_step_id, old_step_id)`
pub type StepChangeCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Flow-level lifecycle callbacks
#[derive(Clone, Default)]
pub struct FlowCallbacks {
    pub on_complete: Option<CompleteCallback>,
    pub on_cancel: Option<CancelCallback>,
    pub on_step_change: Option<StepChangeCallback>,
}

impl FlowCallbacks {
    pub fn on_complete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(FlowData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        self.on_complete = Some(Arc::new(move |data| -> BoxFuture<'static, HookResult> {
            Box::pin(f(data))
        }));
        self
    }

    pub fn on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_cancel = Some(Arc::new(f));
        self
    }

    pub fn on_step_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_step_change = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for FlowCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCallbacks")
            .field("on_complete", &self.on_complete.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .field("on_step_change", &self.on_step_change.is_some())
            .finish()
    }
}
