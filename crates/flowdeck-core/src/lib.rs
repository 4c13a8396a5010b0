// Flowdeck Core - Flow definitions, rule evaluation and branch resolution
//
// This crate holds everything about a flow that does not change while it
// runs: definitions, templates, conditions, expressions and the branch
// resolver. The engine that drives instances lives in flowdeck-runtime.

pub mod branch;
pub mod condition;
pub mod error;
pub mod event;
pub mod expression;
pub mod flow;
pub mod hook;
pub mod registry;
pub mod state;
pub mod step;
pub mod template;

pub use branch::{resolve_next_step, BranchCondition, FlowBranch, Predicate};
pub use condition::{evaluate_condition, is_step_visible, ConditionalRule, Logic, Operator};
pub use error::{FlowError, FlowResult};
pub use event::{FlowEvent, FlowEventKind};
pub use expression::{evaluate_expression, Expression, ExpressionError};
pub use flow::{Flow, FlowMode, FlowSettings};
pub use hook::{
    hook_fn, validator_fn, CancelCallback, CompleteCallback, FlowCallbacks, HookContext,
    HookError, HookResult, StepChangeCallback, StepHook, StepHooks, StepValidator,
};
pub use registry::{parse_definition, Definition, FlowRegistry, LoadedDefinition};
pub use state::{merge_data, FlowData, FlowState, ValidationIssue, ValidationResult};
pub use step::{
    Coordinates, FlowStep, NavigationTarget, StepGuidance, StepType, Transition,
};
pub use template::{FlowOverrides, FlowTemplate};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
