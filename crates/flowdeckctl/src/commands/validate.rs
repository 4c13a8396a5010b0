use anyhow::Result;
use flowdeck_core::{Definition, Flow};
use std::path::Path;

use super::load_definition;

pub fn execute(file: &Path) -> Result<()> {
    match load_definition(file)? {
        Definition::Flow(flow) => {
            println!("✓ flow '{}' is valid ({})", flow.id, summary(&flow));
        }
        Definition::Template(template) => {
            println!(
                "✓ template '{}' is valid (flow '{}', {})",
                template.id,
                template.flow.id,
                summary(&template.flow)
            );
        }
    }
    Ok(())
}

fn summary(flow: &Flow) -> String {
    let conditional = flow.steps.iter().filter(|s| s.condition.is_some()).count();
    format!(
        "{} steps, {} conditional, {} branches",
        flow.steps.len(),
        conditional,
        flow.branches.len()
    )
}
