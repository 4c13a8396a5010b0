//! Navigation Integration Tests
//!
//! Drives FlowEngine through sequential, conditional and branched flows and
//! checks state, history and published events.

use std::sync::{Arc, Mutex};

use flowdeck_core::{
    BranchCondition, ConditionalRule, Flow, FlowBranch, FlowCallbacks, FlowData, FlowError,
    FlowEventKind, FlowSettings, FlowStep,
};
use flowdeck_runtime::{FlowEngine, Navigation, Progress};
use serde_json::{json, Value};

fn data(value: Value) -> FlowData {
    match value {
        Value::Object(map) => map,
        _ => FlowData::new(),
    }
}

fn sequential_flow(id: &str, steps: usize) -> Flow {
    let steps = (1..=steps)
        .map(|n| FlowStep::content(format!("step{}", n)))
        .collect();
    Flow::new(id, "Sequential", steps)
}

/// Records the kind of every event
fn record_events(engine: &FlowEngine) -> Arc<Mutex<Vec<String>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.on_any(move |event| sink.lock().unwrap().push(event.kind().to_string()));
    events
}

fn current(engine: &FlowEngine, id: &str) -> String {
    engine.get_state(id).unwrap().current_step_id
}

// ============================================================================
// Reference scenarios
// ============================================================================

#[tokio::test]
async fn test_sequential_flow_completes_with_accumulated_data() {
    let engine = FlowEngine::new();
    let completed = Arc::new(Mutex::new(None));
    let sink = completed.clone();

    let flow = sequential_flow("seq", 3).with_callbacks(FlowCallbacks::default().on_complete(
        move |data: FlowData| {
            let sink = sink.clone();
            async move {
                *sink.lock().unwrap() = Some(data);
                Ok(())
            }
        },
    ));
    engine.register_flow(flow);

    let id = engine
        .start_flow("seq", Some(data(json!({"name": "Ada"}))))
        .await
        .unwrap();
    assert_eq!(current(&engine, &id), "step1");

    engine
        .update_instance_data(&id, data(json!({"email": "ada@example.com"})))
        .await
        .unwrap();

    assert_eq!(
        engine.next_step(&id).await.unwrap(),
        Navigation::Moved {
            from: "step1".into(),
            to: "step2".into()
        }
    );
    assert_eq!(current(&engine, &id), "step2");
    engine.next_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step3");

    assert_eq!(engine.next_step(&id).await.unwrap(), Navigation::Completed);
    assert!(engine.get_state(&id).is_none());
    assert!(engine.active_instances().is_empty());

    let final_data = completed.lock().unwrap().clone().unwrap();
    assert_eq!(final_data, data(json!({"name": "Ada", "email": "ada@example.com"})));
}

#[tokio::test]
async fn test_hidden_step_is_skipped() {
    let engine = FlowEngine::new();
    let mut flow = sequential_flow("cond", 3);
    flow.steps[1].condition = Some(ConditionalRule::equals("wantsExtra", true));
    engine.register_flow(flow);

    let id = engine
        .start_flow("cond", Some(data(json!({"wantsExtra": false}))))
        .await
        .unwrap();
    engine.next_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step3");

    let id = engine
        .start_flow("cond", Some(data(json!({"wantsExtra": true}))))
        .await
        .unwrap();
    engine.next_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step2");
}

#[tokio::test]
async fn test_branch_overrides_sequential_order() {
    let engine = FlowEngine::new();
    let flow = sequential_flow("branchy", 3).with_branch(
        FlowBranch::new(
            "skip",
            "step1",
            "step3",
            BranchCondition::Expression {
                expression: "data.skip === true".into(),
            },
        )
        .with_priority(1),
    );
    engine.register_flow(flow);

    let id = engine
        .start_flow("branchy", Some(data(json!({"skip": true}))))
        .await
        .unwrap();
    engine.next_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step3");

    let id = engine.start_flow("branchy", None).await.unwrap();
    engine.next_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step2");
}

#[tokio::test]
async fn test_go_to_unknown_step_leaves_state() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 3));
    let id = engine.start_flow("seq", None).await.unwrap();
    let events = record_events(&engine);

    let err = engine.go_to_step(&id, "stepX").await.unwrap_err();
    assert!(matches!(err, FlowError::StepNotFound { .. }));
    assert!(err.is_operational());

    let state = engine.get_state(&id).unwrap();
    assert_eq!(state.current_step_id, "step1");
    assert!(state.visited_steps.is_empty());
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_instance_is_gone() {
    let engine = FlowEngine::new();
    let cancelled = Arc::new(Mutex::new(0));
    let counter = cancelled.clone();
    engine.register_flow(
        sequential_flow("seq", 3)
            .with_callbacks(FlowCallbacks::default().on_cancel(move || *counter.lock().unwrap() += 1)),
    );

    let id = engine.start_flow("seq", None).await.unwrap();
    let events = record_events(&engine);

    engine.cancel_flow(&id).await.unwrap();
    assert_eq!(*cancelled.lock().unwrap(), 1);
    assert_eq!(*events.lock().unwrap(), vec!["flow-cancel"]);

    let err = engine.next_step(&id).await.unwrap_err();
    assert!(matches!(err, FlowError::InstanceNotFound(_)));
    assert!(engine.get_state(&id).is_none());

    // No resurrection, no second cancel
    assert!(matches!(
        engine.cancel_flow(&id).await,
        Err(FlowError::InstanceNotFound(_))
    ));
    assert!(engine.complete_flow(&id).await.is_err());
    assert!(engine.update_instance_data(&id, FlowData::new()).await.is_err());
    assert_eq!(*cancelled.lock().unwrap(), 1);
    assert_eq!(events.lock().unwrap().len(), 1);
}

// ============================================================================
// Start
// ============================================================================

#[tokio::test]
async fn test_start_errors_are_configuration_errors() {
    let engine = FlowEngine::new();
    let err = engine.start_flow("missing", None).await.unwrap_err();
    assert!(matches!(err, FlowError::FlowNotFound(_)));
    assert!(err.is_configuration());

    let flow = Flow::new(
        "gated",
        "Gated",
        vec![FlowStep::content("only").with_condition(ConditionalRule::exists("token"))],
    );
    engine.register_flow(flow);

    let err = engine.start_flow("gated", None).await.unwrap_err();
    assert!(matches!(err, FlowError::NoVisibleSteps(_)));
    assert!(err.is_configuration());

    let id = engine
        .start_flow("gated", Some(data(json!({"token": "t"}))))
        .await
        .unwrap();
    assert_eq!(current(&engine, &id), "only");
}

#[tokio::test]
async fn test_start_begins_at_first_visible_step_and_merges_data() {
    let engine = FlowEngine::new();
    let mut flow = sequential_flow("seq", 3)
        .with_initial_data(data(json!({"plan": "free", "lang": "en"})));
    flow.steps[0].condition = Some(ConditionalRule::equals("plan", "pro"));
    engine.register_flow(flow);
    let events = record_events(&engine);

    let id = engine
        .start_flow("seq", Some(data(json!({"lang": "fr"}))))
        .await
        .unwrap();

    let state = engine.get_state(&id).unwrap();
    assert_eq!(state.current_step_id, "step2");
    assert_eq!(state.current_step_index, 1);
    assert_eq!(state.data, data(json!({"plan": "free", "lang": "fr"})));
    assert!(!state.is_complete && !state.is_paused);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["flow-start", "flow-step-enter"]
    );
}

#[tokio::test]
async fn test_instance_ids_are_unique() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 1));

    let a = engine.start_flow("seq", None).await.unwrap();
    let b = engine.start_flow("seq", None).await.unwrap();
    assert_ne!(a, b);
    assert!(a.starts_with("seq-"));
    assert_eq!(engine.active_instances().len(), 2);
}

// ============================================================================
// Navigation
// ============================================================================

#[tokio::test]
async fn test_transition_event_order() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 2));
    let id = engine.start_flow("seq", None).await.unwrap();
    let events = record_events(&engine);

    engine.next_step(&id).await.unwrap();
    engine.previous_step(&id).await.unwrap();
    engine.go_to_step(&id, "step2").await.unwrap();
    engine.next_step(&id).await.unwrap();

    let expected: Vec<&str> = [
        "flow-step-exit",
        "flow-step-change",
        "flow-step-enter",
    ]
    .iter()
    .cycle()
    .take(9)
    .copied()
    .chain(["flow-step-exit", "flow-complete"])
    .collect();
    assert_eq!(*events.lock().unwrap(), expected);
}

#[tokio::test]
async fn test_history_symmetry() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 5));
    let id = engine.start_flow("seq", None).await.unwrap();

    for _ in 0..4 {
        engine.next_step(&id).await.unwrap();
    }
    let state = engine.get_state(&id).unwrap();
    assert_eq!(state.current_step_id, "step5");
    assert_eq!(state.visited_steps, vec!["step1", "step2", "step3", "step4"]);

    for _ in 0..4 {
        engine.previous_step(&id).await.unwrap();
    }
    let state = engine.get_state(&id).unwrap();
    assert_eq!(state.current_step_id, "step1");
    assert_eq!(state.current_step_index, 0);
    assert!(state.visited_steps.is_empty());

    let err = engine.previous_step(&id).await.unwrap_err();
    assert!(matches!(err, FlowError::NoHistory(_)));
}

#[tokio::test]
async fn test_back_navigation_can_be_disabled() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 2).with_settings(FlowSettings {
        allow_back: false,
        ..Default::default()
    }));
    let id = engine.start_flow("seq", None).await.unwrap();
    engine.next_step(&id).await.unwrap();

    let err = engine.previous_step(&id).await.unwrap_err();
    assert!(matches!(err, FlowError::BackNavigationDisabled(_)));
    assert_eq!(current(&engine, &id), "step2");
}

#[tokio::test]
async fn test_back_onto_hidden_step_is_allowed() {
    let engine = FlowEngine::new();
    let mut flow = sequential_flow("cond", 3);
    flow.steps[1].condition = Some(ConditionalRule::equals("wantsExtra", true));
    engine.register_flow(flow);

    let id = engine
        .start_flow("cond", Some(data(json!({"wantsExtra": true}))))
        .await
        .unwrap();
    engine.next_step(&id).await.unwrap();
    engine.next_step(&id).await.unwrap();
    engine
        .update_instance_data(&id, data(json!({"wantsExtra": false})))
        .await
        .unwrap();

    engine.previous_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step2");

    // Forward from a hidden step still follows visibility
    engine.next_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step3");
}

#[tokio::test]
async fn test_go_to_step_rules() {
    let engine = FlowEngine::new();
    let mut flow = sequential_flow("seq", 4);
    flow.steps[2].condition = Some(ConditionalRule::exists("unlock"));
    engine.register_flow(flow);
    let id = engine.start_flow("seq", None).await.unwrap();

    let err = engine.go_to_step(&id, "step3").await.unwrap_err();
    assert!(matches!(err, FlowError::StepNotVisible(_)));

    engine.go_to_step(&id, "step4").await.unwrap();
    let state = engine.get_state(&id).unwrap();
    assert_eq!(state.current_step_id, "step4");
    assert_eq!(state.visited_steps, vec!["step1"]);

    // Jumping to the current step changes nothing
    let nav = engine.go_to_step(&id, "step4").await.unwrap();
    assert_eq!(nav.current_step(), Some("step4"));
    assert_eq!(engine.get_state(&id).unwrap().visited_steps, vec!["step1"]);

    engine.previous_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step1");
}

#[tokio::test]
async fn test_step_change_callback_gets_new_then_old() {
    let engine = FlowEngine::new();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    engine.register_flow(sequential_flow("seq", 3).with_callbacks(
        FlowCallbacks::default().on_step_change(move |new, old| {
            sink.lock().unwrap().push(format!("{}<-{}", new, old))
        }),
    ));

    let id = engine.start_flow("seq", None).await.unwrap();
    engine.next_step(&id).await.unwrap();
    engine.next_step(&id).await.unwrap();
    engine.previous_step(&id).await.unwrap();

    assert_eq!(
        *changes.lock().unwrap(),
        vec!["step2<-step1", "step3<-step2", "step2<-step3"]
    );
}

#[tokio::test]
async fn test_current_step_and_progress() {
    let engine = FlowEngine::new();
    let mut flow = sequential_flow("seq", 4);
    flow.steps[1].condition = Some(ConditionalRule::exists("extra"));
    engine.register_flow(flow);
    let id = engine.start_flow("seq", None).await.unwrap();

    assert_eq!(engine.current_step(&id).unwrap().id, "step1");
    assert_eq!(
        engine.progress(&id),
        Some(Progress {
            position: 1,
            total: 3
        })
    );

    engine.next_step(&id).await.unwrap();
    assert_eq!(engine.current_step(&id).unwrap().id, "step3");
    assert_eq!(engine.progress(&id).unwrap().position, 2);

    assert!(engine.current_step("nope").is_none());
    assert!(engine.progress("nope").is_none());
}

#[tokio::test]
async fn test_unsubscribed_handler_stops_receiving() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 3));
    let seen = Arc::new(Mutex::new(0));
    let counter = seen.clone();
    let sub = engine.on(FlowEventKind::StepEnter, move |_| *counter.lock().unwrap() += 1);

    let id = engine.start_flow("seq", None).await.unwrap();
    engine.next_step(&id).await.unwrap();
    assert!(sub.unsubscribe());
    engine.next_step(&id).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_panicking_handler_does_not_break_navigation() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 2));
    engine.on(FlowEventKind::StepChange, |_| panic!("renderer crashed"));
    let events = record_events(&engine);

    let id = engine.start_flow("seq", None).await.unwrap();
    engine.next_step(&id).await.unwrap();

    assert_eq!(current(&engine, &id), "step2");
    assert!(events
        .lock()
        .unwrap()
        .contains(&"flow-step-change".to_string()));
}

#[tokio::test]
async fn test_engines_are_independent() {
    let first = FlowEngine::new();
    let second = FlowEngine::new();
    first.register_flow(sequential_flow("seq", 2));

    let id = first.start_flow("seq", None).await.unwrap();
    assert!(second.get_state(&id).is_none());
    assert!(matches!(
        second.start_flow("seq", None).await,
        Err(FlowError::FlowNotFound(_))
    ));
    assert!(second.next_step(&id).await.is_err());
    assert_eq!(current(&first, &id), "step1");
}

#[tokio::test]
async fn test_reregistered_flow_does_not_affect_running_instance() {
    let engine = FlowEngine::new();
    engine.register_flow(sequential_flow("seq", 3));
    let id = engine.start_flow("seq", None).await.unwrap();

    engine.register_flow(sequential_flow("seq", 1));
    engine.next_step(&id).await.unwrap();
    assert_eq!(current(&engine, &id), "step2");

    let fresh = engine.start_flow("seq", None).await.unwrap();
    assert_eq!(engine.next_step(&fresh).await.unwrap(), Navigation::Completed);
}
