use anyhow::{Context, Result};
use flowdeck_core::FlowRegistry;
use std::path::Path;

/// Print flows and templates; a category filter hides flows
pub fn execute(dir: &Path, category: Option<&str>) -> Result<()> {
    let registry = FlowRegistry::new();
    registry
        .load_directory(dir)
        .with_context(|| format!("Failed to load definitions from {}", dir.display()))?;

    println!("{:<10} {:<28} {:<32} {:>5}  CATEGORY", "KIND", "ID", "NAME", "STEPS");

    if category.is_none() {
        for flow in registry.get_all_flows() {
            println!(
                "{:<10} {:<28} {:<32} {:>5}  -",
                "flow",
                flow.id,
                flow.name,
                flow.steps.len()
            );
        }
    }

    for template in registry.get_all_templates(category) {
        println!(
            "{:<10} {:<28} {:<32} {:>5}  {}",
            "template",
            template.id,
            template.name,
            template.flow.steps.len(),
            template.category.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
