//! FlowEngine - instance lifecycle and step navigation
//!
//! The engine owns a registry, the live instances, an event bus and an
//! optional state store. Every transition follows the same order: validate
//! (forward only), exit the current step, pick the target, enter it, then
//! publish change and enter events. A failing hook rolls the transition back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use flowdeck_core::{
    merge_data, resolve_next_step, Flow, FlowData, FlowError, FlowEvent, FlowEventKind,
    FlowOverrides, FlowRegistry, FlowResult, FlowState, FlowStep, FlowTemplate, StepHook,
    ValidationResult,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Subscription};
use crate::instance::{FlowInstance, InstanceHandle, InstanceStore};
use crate::store::{StateStore, StoredInstance};

/// Outcome of a navigation call
#[derive(Debug, Clone, PartialEq)]
pub enum Navigation {
    /// The instance now sits on `to`
    Moved { from: String, to: String },
    /// There was no next step; the instance completed and is gone
    Completed,
    /// The current step failed validation and the instance did not move
    Invalid {
        step_id: String,
        result: ValidationResult,
    },
}

impl Navigation {
    pub fn current_step(&self) -> Option<&str> {
        match self {
            Self::Moved { to, .. } => Some(to.as_str()),
            Self::Invalid { step_id, .. } => Some(step_id.as_str()),
            Self::Completed => None,
        }
    }
}

/// Position of the current step among the visible steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// 1-based
    pub position: usize,
    pub total: usize,
}

#[derive(Clone, Copy)]
enum History {
    Push,
    Pop,
}

/// Flow orchestration engine
pub struct FlowEngine {
    registry: Arc<FlowRegistry>,
    instances: InstanceStore,
    bus: EventBus,
    state_store: Option<Arc<dyn StateStore>>,
    counter: AtomicU64,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowEngine {
    /// Engine with its own empty registry
    pub fn new() -> Self {
        Self::with_registry(Arc::new(FlowRegistry::new()))
    }

    /// Engine sharing an existing registry
    pub fn with_registry(registry: Arc<FlowRegistry>) -> Self {
        Self {
            registry,
            instances: InstanceStore::new(),
            bus: EventBus::new(),
            state_store: None,
            counter: AtomicU64::new(0),
        }
    }

    /// Persist instances of flows that set `persist_state`
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ----- registry shortcuts -----

    pub fn register_flow(&self, flow: Flow) -> Arc<Flow> {
        self.registry.register_flow(flow)
    }

    pub fn get_flow(&self, id: &str) -> Option<Arc<Flow>> {
        self.registry.get_flow(id)
    }

    pub fn register_template(&self, template: FlowTemplate) {
        self.registry.register_template(template)
    }

    pub fn create_flow_from_template(&self, id: &str, overrides: FlowOverrides) -> Option<Flow> {
        self.registry.create_flow_from_template(id, overrides)
    }

    // ----- events -----

    pub fn on<F>(&self, kind: FlowEventKind, handler: F) -> Subscription
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, handler)
    }

    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        self.bus.on_any(handler)
    }

    // ----- introspection -----

    /// Snapshot of an instance's state
    pub fn get_state(&self, instance_id: &str) -> Option<FlowState> {
        self.instances.get(instance_id).map(|h| h.snapshot())
    }

    /// The step an instance currently sits on
    pub fn current_step(&self, instance_id: &str) -> Option<FlowStep> {
        let handle = self.instances.get(instance_id)?;
        let state = handle.snapshot();
        handle.flow.step(&state.current_step_id).cloned()
    }

    /// Ids of live instances, sorted
    pub fn active_instances(&self) -> Vec<String> {
        self.instances.ids()
    }

    /// Position among the steps visible for the current data
    pub fn progress(&self, instance_id: &str) -> Option<Progress> {
        let handle = self.instances.get(instance_id)?;
        let state = handle.snapshot();
        let flow = &handle.flow;

        let total = flow.visible_steps(&state.data).count();
        let before = flow
            .steps
            .iter()
            .take(state.current_step_index)
            .filter(|s| s.is_visible(&state.data))
            .count();

        Some(Progress {
            position: before + 1,
            total: total.max(before + 1),
        })
    }

    // ----- lifecycle -----

    /// Start an instance of a registered flow
    ///
    /// `initial_data` is merged over the flow's own initial data.
    pub async fn start_flow(
        &self,
        flow_id: &str,
        initial_data: Option<FlowData>,
    ) -> FlowResult<String> {
        let flow = self
            .registry
            .get_flow(flow_id)
            .ok_or_else(|| FlowError::FlowNotFound(flow_id.to_string()))?;

        let mut data = flow.initial_data.clone();
        if let Some(extra) = initial_data {
            merge_data(&mut data, extra);
        }

        let (index, step) = flow
            .first_visible_step(&data)
            .ok_or_else(|| FlowError::NoVisibleSteps(flow_id.to_string()))?;
        let step_id = step.id.clone();

        let instance_id = self.generate_instance_id(flow_id);
        let handle = InstanceHandle::new(FlowInstance {
            id: instance_id.clone(),
            flow: flow.clone(),
            state: FlowState::new(flow_id, &step_id, index, data),
        });

        // Lock before publishing the handle so no caller sees a half-entered step
        let instance = handle.instance.clone().lock_owned().await;
        self.instances.insert(handle.clone());

        if let Err(e) = self
            .run_hook(&handle, &instance.state, step.hooks.on_enter.as_ref(), "on_enter", &step_id)
            .await
        {
            self.instances.remove(&instance_id);
            warn!("Could not start flow '{}': {}", flow_id, e);
            return Err(e);
        }

        info!("Started flow '{}' as instance {}", flow_id, instance_id);
        self.bus.publish(&FlowEvent::Start {
            instance_id: instance_id.clone(),
            flow_id: flow_id.to_string(),
            step_id: step_id.clone(),
        });
        self.bus.publish(&FlowEvent::StepEnter {
            instance_id: instance_id.clone(),
            step_id,
        });

        self.commit(&handle, &instance).await?;
        Ok(instance_id)
    }

    /// Shallow-merge `data` into the instance's data bag
    pub async fn update_instance_data(&self, instance_id: &str, data: FlowData) -> FlowResult<()> {
        let handle = self.handle(instance_id)?;
        let mut instance = handle.instance.lock().await;
        Self::ensure_live(&handle, &instance)?;

        merge_data(&mut instance.state.data, data.clone());
        self.bus.publish(&FlowEvent::DataUpdate {
            instance_id: instance_id.to_string(),
            data,
        });

        self.commit(&handle, &instance).await
    }

    pub async fn pause_flow(&self, instance_id: &str) -> FlowResult<()> {
        self.set_paused(instance_id, true).await
    }

    pub async fn resume_flow(&self, instance_id: &str) -> FlowResult<()> {
        self.set_paused(instance_id, false).await
    }

    async fn set_paused(&self, instance_id: &str, paused: bool) -> FlowResult<()> {
        let handle = self.handle(instance_id)?;
        let mut instance = handle.instance.lock().await;
        Self::ensure_live(&handle, &instance)?;

        instance.state.is_paused = paused;
        let event = if paused {
            FlowEvent::Pause {
                instance_id: instance_id.to_string(),
            }
        } else {
            FlowEvent::Resume {
                instance_id: instance_id.to_string(),
            }
        };
        debug!("Instance {} paused={}", instance_id, paused);
        self.bus.publish(&event);

        self.commit(&handle, &instance).await
    }

    /// Complete an instance regardless of where it is
    pub async fn complete_flow(&self, instance_id: &str) -> FlowResult<()> {
        let handle = self.handle(instance_id)?;
        let mut instance = handle.instance.lock().await;
        Self::ensure_live(&handle, &instance)?;
        self.finish(&handle, &mut instance).await
    }

    /// Cancel an instance without waiting for a running hook
    ///
    /// The hook's cancellation token fires; the call it belongs to fails with
    /// `InstanceNotFound` once it resumes.
    pub async fn cancel_flow(&self, instance_id: &str) -> FlowResult<()> {
        let Some(handle) = self.instances.remove(instance_id) else {
            warn!("Cannot cancel unknown instance {}", instance_id);
            return Err(FlowError::InstanceNotFound(instance_id.to_string()));
        };
        handle.cancel.cancel();

        if let Some(on_cancel) = &handle.flow.callbacks.on_cancel {
            on_cancel();
        }
        info!("Cancelled instance {}", instance_id);
        self.bus.publish(&FlowEvent::Cancel {
            instance_id: instance_id.to_string(),
        });

        self.forget(&handle).await;
        Ok(())
    }

    /// Rebuild a live instance from the state store
    ///
    /// No hooks run and no events are published; the instance continues
    /// from the saved step.
    pub async fn restore_instance(&self, instance_id: &str) -> FlowResult<FlowState> {
        let store = self
            .state_store
            .as_ref()
            .ok_or_else(|| FlowError::config("no state store configured"))?;
        if self.instances.contains(instance_id) {
            return Err(FlowError::config(format!(
                "instance {} is already active",
                instance_id
            )));
        }

        let record = store
            .load(instance_id)
            .await?
            .ok_or_else(|| FlowError::InstanceNotFound(instance_id.to_string()))?;
        let flow = self
            .registry
            .get_flow(&record.state.flow_id)
            .ok_or_else(|| FlowError::FlowNotFound(record.state.flow_id.clone()))?;

        let index = flow
            .step_index(&record.state.current_step_id)
            .ok_or_else(|| FlowError::StepNotFound {
                flow_id: flow.id.clone(),
                step_id: record.state.current_step_id.clone(),
            })?;

        let mut state = record.state;
        state.current_step_index = index;
        state.is_validating = false;

        self.instances.insert(InstanceHandle::new(FlowInstance {
            id: instance_id.to_string(),
            flow,
            state: state.clone(),
        }));
        info!("Restored instance {} at step '{}'", instance_id, state.current_step_id);
        Ok(state)
    }

    // ----- navigation -----

    /// Validate and leave the current step, then enter the resolved next step
    pub async fn next_step(&self, instance_id: &str) -> FlowResult<Navigation> {
        let handle = self.handle(instance_id)?;
        let mut instance = handle.instance.lock().await;
        Self::ensure_navigable(&handle, &instance)?;

        let flow = handle.flow.clone();
        let current_id = instance.state.current_step_id.clone();
        let step = Self::step_of(&flow, &current_id)?;

        if let Some(result) = self.validate(&handle, &mut instance, step).await? {
            return Ok(Navigation::Invalid {
                step_id: current_id,
                result,
            });
        }

        self.exit(&handle, &instance, step).await?;

        match resolve_next_step(&flow, &current_id, &instance.state.data) {
            Some((index, _)) => self.enter(&handle, &mut instance, index, History::Push).await,
            None => {
                debug!("No step after '{}', completing {}", current_id, instance_id);
                self.finish(&handle, &mut instance).await?;
                Ok(Navigation::Completed)
            }
        }
    }

    /// Return to the most recently visited step
    ///
    /// The step is entered even if its condition no longer holds.
    pub async fn previous_step(&self, instance_id: &str) -> FlowResult<Navigation> {
        let handle = self.handle(instance_id)?;
        let mut instance = handle.instance.lock().await;
        Self::ensure_navigable(&handle, &instance)?;

        let flow = handle.flow.clone();
        if !flow.settings.allow_back {
            warn!("Back navigation disabled for flow '{}'", flow.id);
            return Err(FlowError::BackNavigationDisabled(flow.id.clone()));
        }

        let Some(previous_id) = instance.state.visited_steps.last().cloned() else {
            warn!("Instance {} has no previous step", instance_id);
            return Err(FlowError::NoHistory(instance_id.to_string()));
        };
        let index = flow
            .step_index(&previous_id)
            .ok_or_else(|| FlowError::StepNotFound {
                flow_id: flow.id.clone(),
                step_id: previous_id.clone(),
            })?;

        let step = Self::step_of(&flow, &instance.state.current_step_id)?;
        self.exit(&handle, &instance, step).await?;
        self.enter(&handle, &mut instance, index, History::Pop).await
    }

    /// Jump to a visible step, bypassing branches and validation
    pub async fn go_to_step(&self, instance_id: &str, step_id: &str) -> FlowResult<Navigation> {
        let handle = self.handle(instance_id)?;
        let mut instance = handle.instance.lock().await;
        Self::ensure_navigable(&handle, &instance)?;

        let flow = handle.flow.clone();
        let Some(index) = flow.step_index(step_id) else {
            warn!("Step '{}' not found in flow '{}'", step_id, flow.id);
            return Err(FlowError::StepNotFound {
                flow_id: flow.id.clone(),
                step_id: step_id.to_string(),
            });
        };
        if !flow.steps[index].is_visible(&instance.state.data) {
            warn!("Step '{}' is not visible for instance {}", step_id, instance_id);
            return Err(FlowError::StepNotVisible(step_id.to_string()));
        }

        let current_id = instance.state.current_step_id.clone();
        if current_id == step_id {
            return Ok(Navigation::Moved {
                from: current_id.clone(),
                to: current_id,
            });
        }

        let step = Self::step_of(&flow, &current_id)?;
        self.exit(&handle, &instance, step).await?;
        self.enter(&handle, &mut instance, index, History::Push).await
    }

    // ----- internals -----

    fn generate_instance_id(&self, flow_id: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}-{}", flow_id, Utc::now().timestamp_millis(), n)
    }

    fn handle(&self, instance_id: &str) -> FlowResult<InstanceHandle> {
        self.instances.get(instance_id).ok_or_else(|| {
            warn!("Instance not found: {}", instance_id);
            FlowError::InstanceNotFound(instance_id.to_string())
        })
    }

    /// The handle may have been cancelled or completed while we waited for the lock
    fn ensure_live(handle: &InstanceHandle, instance: &FlowInstance) -> FlowResult<()> {
        if handle.is_cancelled() || instance.state.is_complete {
            return Err(FlowError::InstanceNotFound(handle.id.clone()));
        }
        Ok(())
    }

    fn ensure_navigable(handle: &InstanceHandle, instance: &FlowInstance) -> FlowResult<()> {
        Self::ensure_live(handle, instance)?;
        if instance.state.is_paused {
            warn!("Instance {} is paused; navigation refused", handle.id);
            return Err(FlowError::Paused(handle.id.clone()));
        }
        Ok(())
    }

    fn step_of<'a>(flow: &'a Flow, step_id: &str) -> FlowResult<&'a FlowStep> {
        flow.step(step_id).ok_or_else(|| FlowError::StepNotFound {
            flow_id: flow.id.clone(),
            step_id: step_id.to_string(),
        })
    }

    /// Run a step hook; cancellation while it runs wins over its result
    async fn run_hook(
        &self,
        handle: &InstanceHandle,
        state: &FlowState,
        hook: Option<&Arc<dyn StepHook>>,
        name: &str,
        step_id: &str,
    ) -> FlowResult<()> {
        let Some(hook) = hook else {
            return Ok(());
        };

        let ctx = handle.hook_context(state, step_id);
        let result = hook.call(&ctx).await;

        if handle.is_cancelled() {
            debug!("Instance {} cancelled during {} of '{}'", handle.id, name, step_id);
            return Err(FlowError::InstanceNotFound(handle.id.clone()));
        }
        result.map_err(|e| {
            warn!("Hook {} failed on step '{}': {}", name, step_id, e);
            FlowError::hook(name, step_id, e.0)
        })
    }

    /// Run the step's validator; `Some(result)` when it failed
    async fn validate(
        &self,
        handle: &InstanceHandle,
        instance: &mut FlowInstance,
        step: &FlowStep,
    ) -> FlowResult<Option<ValidationResult>> {
        let Some(validator) = &step.hooks.on_validate else {
            return Ok(None);
        };

        instance.state.is_validating = true;
        handle.publish_snapshot(&instance.state);

        let ctx = handle.hook_context(&instance.state, &step.id);
        let outcome = validator.validate(&ctx.step_data(), &ctx).await;

        instance.state.is_validating = false;
        if handle.is_cancelled() {
            return Err(FlowError::InstanceNotFound(handle.id.clone()));
        }

        match outcome {
            Ok(result) if result.is_valid => {
                instance.state.errors.remove(&step.id);
                handle.publish_snapshot(&instance.state);
                Ok(None)
            }
            Ok(result) => {
                debug!("Step '{}' failed validation on {}", step.id, handle.id);
                instance.state.errors.insert(step.id.clone(), result.clone());
                self.bus.publish(&FlowEvent::ValidationError {
                    instance_id: handle.id.clone(),
                    step_id: step.id.clone(),
                    result: result.clone(),
                });
                self.commit(handle, instance).await?;
                Ok(Some(result))
            }
            Err(e) => {
                handle.publish_snapshot(&instance.state);
                warn!("Validator failed on step '{}': {}", step.id, e);
                Err(FlowError::hook("on_validate", &step.id, e.0))
            }
        }
    }

    async fn exit(
        &self,
        handle: &InstanceHandle,
        instance: &FlowInstance,
        step: &FlowStep,
    ) -> FlowResult<()> {
        self.run_hook(handle, &instance.state, step.hooks.on_exit.as_ref(), "on_exit", &step.id)
            .await?;
        self.bus.publish(&FlowEvent::StepExit {
            instance_id: handle.id.clone(),
            step_id: step.id.clone(),
        });
        Ok(())
    }

    /// Make `flow.steps[index]` current and run its enter hook
    async fn enter(
        &self,
        handle: &InstanceHandle,
        instance: &mut FlowInstance,
        index: usize,
        history: History,
    ) -> FlowResult<Navigation> {
        let flow = handle.flow.clone();
        let target = &flow.steps[index];
        let state = &mut instance.state;

        let from = state.current_step_id.clone();
        let saved_index = state.current_step_index;
        let saved_visited = state.visited_steps.clone();

        match history {
            History::Push => state.visited_steps.push(from.clone()),
            History::Pop => {
                state.visited_steps.pop();
            }
        }
        state.current_step_id = target.id.clone();
        state.current_step_index = index;

        if let Err(e) = self
            .run_hook(handle, state, target.hooks.on_enter.as_ref(), "on_enter", &target.id)
            .await
        {
            state.current_step_id = from;
            state.current_step_index = saved_index;
            state.visited_steps = saved_visited;
            return Err(e);
        }

        self.bus.publish(&FlowEvent::StepChange {
            instance_id: handle.id.clone(),
            from_step_id: from.clone(),
            to_step_id: target.id.clone(),
        });
        self.bus.publish(&FlowEvent::StepEnter {
            instance_id: handle.id.clone(),
            step_id: target.id.clone(),
        });
        if let Some(on_step_change) = &flow.callbacks.on_step_change {
            on_step_change(&target.id, &from);
        }

        self.commit(handle, instance).await?;
        Ok(Navigation::Moved {
            from,
            to: target.id.clone(),
        })
    }

    /// Terminal completion; the instance is removed before callbacks run
    async fn finish(&self, handle: &InstanceHandle, instance: &mut FlowInstance) -> FlowResult<()> {
        if self.instances.remove(&handle.id).is_none() {
            return Err(FlowError::InstanceNotFound(handle.id.clone()));
        }

        instance.state.is_complete = true;
        instance.state.completed_at = Some(Utc::now());
        handle.publish_snapshot(&instance.state);

        if let Some(on_complete) = &handle.flow.callbacks.on_complete {
            if let Err(e) = on_complete(instance.state.data.clone()).await {
                warn!("on_complete failed for instance {}: {}", handle.id, e);
            }
        }

        info!("Completed instance {}", handle.id);
        self.bus.publish(&FlowEvent::Complete {
            instance_id: handle.id.clone(),
            data: instance.state.data.clone(),
        });

        self.forget(handle).await;
        Ok(())
    }

    /// Publish the new state to readers and the state store
    ///
    /// Fails with `InstanceNotFound` once the instance has been cancelled; a
    /// write still in flight at that point lands before the cancel's delete.
    async fn commit(&self, handle: &InstanceHandle, instance: &FlowInstance) -> FlowResult<()> {
        handle.publish_snapshot(&instance.state);

        if let Some(store) = self.store_for(&handle.flow) {
            let _guard = handle.persistence_guard().await;
            if !handle.is_cancelled() {
                let record = StoredInstance {
                    instance_id: handle.id.clone(),
                    persistence_key: handle.flow.persistence_key().to_string(),
                    state: instance.state.clone(),
                };
                if let Err(e) = store.save(&record).await {
                    warn!("Failed to persist instance {}: {}", handle.id, e);
                }
            }
        }

        if handle.is_cancelled() {
            debug!("Instance {} cancelled while committing", handle.id);
            return Err(FlowError::InstanceNotFound(handle.id.clone()));
        }
        Ok(())
    }

    async fn forget(&self, handle: &InstanceHandle) {
        if let Some(store) = self.store_for(&handle.flow) {
            let _guard = handle.persistence_guard().await;
            if let Err(e) = store.delete(&handle.id).await {
                warn!("Failed to delete persisted instance {}: {}", handle.id, e);
            }
        }
    }

    fn store_for(&self, flow: &Flow) -> Option<&Arc<dyn StateStore>> {
        if flow.settings.persist_state {
            self.state_store.as_ref()
        } else {
            None
        }
    }
}
