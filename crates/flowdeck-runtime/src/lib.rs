// Flowdeck Runtime - Flow instance lifecycle and step navigation
//
// Drives instances of the flows defined with flowdeck-core: starting them,
// moving between steps, running hooks, publishing events and persisting
// state snapshots.

pub mod bus;
pub mod engine;
pub mod instance;
pub mod store;

pub use bus::{EventBus, EventHandler, Subscription};
pub use engine::{FlowEngine, Navigation, Progress};
pub use instance::{FlowInstance, InstanceHandle, InstanceStore};
pub use store::{FileStateStore, InMemoryStateStore, StateStore, StoredInstance};

// Re-export core for convenience
pub use flowdeck_core;
