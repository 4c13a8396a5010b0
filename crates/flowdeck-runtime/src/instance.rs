//! Flow instances and the instance store
//!
//! Each live instance sits behind its own async mutex so calls on one
//! instance are serialized while different instances proceed independently.
//! A read-only snapshot of the state is kept beside the mutex; readers use it
//! without waiting for a hook to finish.

use std::sync::Arc;

use dashmap::DashMap;
use flowdeck_core::{Flow, FlowState, HookContext};
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// One running execution of a flow
#[derive(Debug)]
pub struct FlowInstance {
    pub id: String,
    pub flow: Arc<Flow>,
    pub state: FlowState,
}

/// Shared handle to a live instance
#[derive(Clone)]
pub struct InstanceHandle {
    pub id: String,
    pub flow: Arc<Flow>,
    /// Fires when the instance is cancelled
    pub cancel: CancellationToken,
    pub instance: Arc<Mutex<FlowInstance>>,
    snapshot: Arc<RwLock<FlowState>>,
    /// Held across every state store write and delete for this instance
    persist: Arc<Mutex<()>>,
}

impl InstanceHandle {
    pub fn new(instance: FlowInstance) -> Self {
        Self {
            id: instance.id.clone(),
            flow: instance.flow.clone(),
            cancel: CancellationToken::new(),
            snapshot: Arc::new(RwLock::new(instance.state.clone())),
            instance: Arc::new(Mutex::new(instance)),
            persist: Arc::new(Mutex::new(())),
        }
    }

    /// Last published copy of the state
    pub fn snapshot(&self) -> FlowState {
        self.snapshot.read().clone()
    }

    pub(crate) fn publish_snapshot(&self, state: &FlowState) {
        *self.snapshot.write() = state.clone();
    }

    /// Serializes store writes with the delete issued by cancel or completion
    pub(crate) async fn persistence_guard(&self) -> MutexGuard<'_, ()> {
        self.persist.lock().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context handed to a hook running on `step_id`
    pub fn hook_context(&self, state: &FlowState, step_id: &str) -> HookContext {
        HookContext {
            instance_id: self.id.clone(),
            step_id: step_id.to_string(),
            data: state.data.clone(),
            cancel: self.cancel.child_token(),
        }
    }
}

/// Live instances by id
#[derive(Default)]
pub struct InstanceStore {
    instances: DashMap<String, InstanceHandle>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: InstanceHandle) {
        self.instances.insert(handle.id.clone(), handle);
    }

    pub fn get(&self, id: &str) -> Option<InstanceHandle> {
        self.instances.get(id).map(|r| r.value().clone())
    }

    /// Remove an instance; only the first caller gets the handle back
    pub fn remove(&self, id: &str) -> Option<InstanceHandle> {
        self.instances.remove(id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    /// Sorted ids of live instances
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
