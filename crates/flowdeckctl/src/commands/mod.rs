pub mod list;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use flowdeck_core::{parse_definition, Definition};
use std::path::Path;

/// Read and validate a flow or template file
pub fn load_definition(file: &Path) -> Result<Definition> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    parse_definition(&content).with_context(|| format!("Invalid definition in {}", file.display()))
}
