//! Branches and branch resolution
//!
//! A branch overrides sequential order when leaving a step. Branches leaving
//! the same step are tried by descending priority; equal priorities keep
//! declaration order. A branch only wins when its condition holds and its
//! target step exists and is visible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::condition::{evaluate_condition, ConditionalRule};
use crate::expression::evaluate_expression;
use crate::flow::Flow;
use crate::state::FlowData;
use crate::step::FlowStep;

/// Caller-supplied branch predicate
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&FlowData) -> bool + Send + Sync>);

impl Predicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&FlowData) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn test(&self, data: &FlowData) -> bool {
        (self.0)(data)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Condition under which a branch is taken
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BranchCondition {
    /// Rule tree evaluated by the condition evaluator
    Field { rule: ConditionalRule },

    /// Restricted expression, e.g. `data.score > 80 && data.tier == 'gold'`
    Expression { expression: String },

    /// In-process predicate; not representable in YAML
    #[serde(skip)]
    Custom(Predicate),
}

impl BranchCondition {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&FlowData) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Predicate::new(f))
    }

    pub fn evaluate(&self, data: &FlowData) -> bool {
        match self {
            Self::Field { rule } => evaluate_condition(rule, data),
            Self::Expression { expression } => evaluate_expression(expression, data),
            Self::Custom(predicate) => predicate.test(data),
        }
    }
}

fn generate_branch_id() -> String {
    format!("branch-{}", uuid::Uuid::new_v4().simple())
}

/// Conditional edge from one step to another
///
/// ```yaml
/// fromStepId: plan
/// targetStepId: sales-contact
/// priority: 10
/// condition:
///   type: expression
///   expression: data.seats > 100
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowBranch {
    #[serde(default = "generate_branch_id")]
    pub id: String,

    pub from_step_id: String,

    pub condition: BranchCondition,

    pub target_step_id: String,

    /// Higher is tried first
    #[serde(default)]
    pub priority: i32,
}

impl FlowBranch {
    pub fn new(
        id: impl Into<String>,
        from_step_id: impl Into<String>,
        target_step_id: impl Into<String>,
        condition: BranchCondition,
    ) -> Self {
        Self {
            id: id.into(),
            from_step_id: from_step_id.into(),
            condition,
            target_step_id: target_step_id.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Branches leaving `step_id`, highest priority first, declaration order within a priority
pub fn branches_from<'a>(flow: &'a Flow, step_id: &str) -> Vec<&'a FlowBranch> {
    let mut branches: Vec<&FlowBranch> = flow
        .branches
        .iter()
        .filter(|b| b.from_step_id == step_id)
        .collect();
    // sort_by is stable
    branches.sort_by(|a, b| b.priority.cmp(&a.priority));
    branches
}

/// First matching branch whose target exists and is visible, with the target's index
pub fn matching_branch<'a>(
    flow: &'a Flow,
    step_id: &str,
    data: &FlowData,
) -> Option<(&'a FlowBranch, usize, &'a FlowStep)> {
    for branch in branches_from(flow, step_id) {
        if !branch.condition.evaluate(data) {
            continue;
        }
        let target = flow
            .step_index(&branch.target_step_id)
            .map(|index| (index, &flow.steps[index]));
        match target {
            Some((index, target)) if target.is_visible(data) => {
                debug!(
                    "Branch '{}' taken: {} -> {}",
                    branch.id, step_id, branch.target_step_id
                );
                return Some((branch, index, target));
            }
            Some(_) => {
                debug!(
                    "Branch '{}' matched but target '{}' is hidden",
                    branch.id, branch.target_step_id
                );
            }
            None => {
                warn!(
                    "Branch '{}' targets unknown step '{}'",
                    branch.id, branch.target_step_id
                );
            }
        }
    }
    None
}

/// Step that follows `current_step_id` for `data` with its declaration index,
/// or `None` when the flow ends
///
/// Branches win over sequential order; without a matching branch the first
/// visible step declared after the current one is returned.
pub fn resolve_next_step<'a>(
    flow: &'a Flow,
    current_step_id: &str,
    data: &FlowData,
) -> Option<(usize, &'a FlowStep)> {
    if let Some((_, index, target)) = matching_branch(flow, current_step_id, data) {
        return Some((index, target));
    }

    let current = flow.step_index(current_step_id)?;
    flow.steps
        .iter()
        .enumerate()
        .skip(current + 1)
        .find(|(_, step)| step.is_visible(data))
}
