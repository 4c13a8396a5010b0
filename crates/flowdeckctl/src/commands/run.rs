//! `flowdeckctl run` - start a flow and walk it with a scripted sequence
//!
//! Every bus event is printed to stdout as one JSON line, followed by the
//! final state (or the terminal status once the instance is gone).

use anyhow::{anyhow, bail, Context, Result};
use flowdeck_core::{
    Definition, FlowData, FlowError, FlowEvent, FlowEventKind, FlowOverrides,
};
use flowdeck_runtime::{FileStateStore, FlowEngine, Navigation};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::load_definition;

const EVENT_BUFFER: usize = 256;

/// One scripted engine call
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    Next,
    Back,
    GoTo(String),
    Set(String, Value),
    Pause,
    Resume,
    Complete,
    Cancel,
}

impl fmt::Display for ScriptCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next => write!(f, "next"),
            Self::Back => write!(f, "back"),
            Self::GoTo(step) => write!(f, "goto:{}", step),
            Self::Set(key, value) => write!(f, "set:{}={}", key, value),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Complete => write!(f, "complete"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Parse `next,back,goto:review,set:plan=pro` into commands
///
/// Commas inside JSON values (`set:tags=["a","b"]`) do not split commands.
pub fn parse_script(script: &str) -> Result<Vec<ScriptCommand>> {
    split_commands(script)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let (verb, arg) = match item.split_once(':') {
                Some((verb, arg)) => (verb, Some(arg)),
                None => (item, None),
            };
            match (verb, arg) {
                ("next", None) => Ok(ScriptCommand::Next),
                ("back", None) => Ok(ScriptCommand::Back),
                ("pause", None) => Ok(ScriptCommand::Pause),
                ("resume", None) => Ok(ScriptCommand::Resume),
                ("complete", None) => Ok(ScriptCommand::Complete),
                ("cancel", None) => Ok(ScriptCommand::Cancel),
                ("goto", Some(step)) if !step.is_empty() => {
                    Ok(ScriptCommand::GoTo(step.to_string()))
                }
                ("set", Some(assignment)) => {
                    let (key, value) = parse_assignment(assignment)?;
                    Ok(ScriptCommand::Set(key, value))
                }
                _ => Err(anyhow!("Unknown script command '{}'", item)),
            }
        })
        .collect()
}

/// Split on commas outside brackets, braces and double-quoted strings
fn split_commands(script: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in script.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(&script[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&script[start..]);
    items
}

/// Parse `key=value`; the value is JSON when it parses as JSON, a string otherwise
pub fn parse_assignment(entry: &str) -> Result<(String, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", entry))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty key in '{}'", entry);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

pub async fn execute(
    file: &Path,
    data: &[String],
    script: &str,
    state_dir: Option<&Path>,
    output: &str,
) -> Result<()> {
    let commands = parse_script(script)?;
    let mut initial_data = FlowData::new();
    for entry in data {
        let (key, value) = parse_assignment(entry)?;
        initial_data.insert(key, value);
    }

    let flow = match load_definition(file)? {
        Definition::Flow(flow) => flow,
        Definition::Template(template) => template.instantiate(FlowOverrides::new()),
    };

    let mut engine = FlowEngine::new();
    if let Some(dir) = state_dir {
        let store = FileStateStore::new(dir)
            .await
            .with_context(|| format!("Failed to open state directory {}", dir.display()))?;
        engine = engine.with_state_store(Arc::new(store));
    }

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    engine.bus().forward_to(tx);

    let flow = engine.register_flow(flow);
    let instance_id = engine
        .start_flow(&flow.id, Some(initial_data))
        .await
        .with_context(|| format!("Failed to start flow '{}'", flow.id))?;
    info!("Running flow '{}' as {}", flow.id, instance_id);

    let mut terminal = drain_events(&mut rx)?;
    for command in &commands {
        if let Some(kind) = terminal {
            warn!("Instance already ended with '{}'; ignoring '{}'", kind, command);
            break;
        }

        match apply(&engine, &instance_id, command).await {
            Ok(Some(Navigation::Invalid { step_id, result })) => {
                print_line(&json!({
                    "command": command.to_string(),
                    "invalid": step_id,
                    "result": result,
                }))?;
            }
            Ok(_) => {}
            Err(e) => {
                print_line(&json!({
                    "command": command.to_string(),
                    "error": e.to_string(),
                }))?;
            }
        }
        terminal = drain_events(&mut rx)?;
    }

    match engine.get_state(&instance_id) {
        Some(state) => match output {
            "yaml" => print!("{}", serde_yaml::to_string(&state)?),
            "json" => println!("{}", serde_json::to_string_pretty(&state)?),
            other => bail!("Unsupported output format '{}'", other),
        },
        None => {
            let status = match terminal {
                Some(FlowEventKind::Cancel) => "cancelled",
                _ => "completed",
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "instanceId": instance_id,
                    "status": status,
                }))?
            );
        }
    }

    Ok(())
}

async fn apply(
    engine: &FlowEngine,
    instance_id: &str,
    command: &ScriptCommand,
) -> Result<Option<Navigation>, FlowError> {
    match command {
        ScriptCommand::Next => engine.next_step(instance_id).await.map(Some),
        ScriptCommand::Back => engine.previous_step(instance_id).await.map(Some),
        ScriptCommand::GoTo(step) => engine.go_to_step(instance_id, step).await.map(Some),
        ScriptCommand::Set(key, value) => {
            let mut update = FlowData::new();
            update.insert(key.clone(), value.clone());
            engine.update_instance_data(instance_id, update).await.map(|_| None)
        }
        ScriptCommand::Pause => engine.pause_flow(instance_id).await.map(|_| None),
        ScriptCommand::Resume => engine.resume_flow(instance_id).await.map(|_| None),
        ScriptCommand::Complete => engine.complete_flow(instance_id).await.map(|_| None),
        ScriptCommand::Cancel => engine.cancel_flow(instance_id).await.map(|_| None),
    }
}

/// Print pending events; returns the terminal kind if one was seen
fn drain_events(rx: &mut mpsc::Receiver<FlowEvent>) -> Result<Option<FlowEventKind>> {
    let mut terminal = None;
    while let Ok(event) = rx.try_recv() {
        print_line(&serde_json::to_value(&event)?)?;
        if event.kind().is_terminal() {
            terminal = Some(event.kind());
        }
    }
    Ok(terminal)
}

fn print_line(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
