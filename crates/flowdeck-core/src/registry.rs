//! FlowRegistry - holds flow definitions and templates
//!
//! Definitions are registered programmatically or loaded from a directory of
//! YAML files. A document with a top-level `flow` key is a template; anything
//! else is a flow.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::flow::Flow;
use crate::template::{FlowOverrides, FlowTemplate};
use crate::{FlowError, FlowResult};

/// What a YAML file contained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedDefinition {
    Flow(String),
    Template(String),
}

/// Flow and template store, shared by reference with the engine
#[derive(Default)]
pub struct FlowRegistry {
    flows: DashMap<String, Arc<Flow>>,
    templates: DashMap<String, Arc<FlowTemplate>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flow, replacing any flow with the same id
    ///
    /// Instances already started keep the definition they were started with.
    pub fn register_flow(&self, flow: Flow) -> Arc<Flow> {
        let flow = Arc::new(flow);
        if self.flows.insert(flow.id.clone(), flow.clone()).is_some() {
            debug!("Replaced flow definition '{}'", flow.id);
        }
        flow
    }

    pub fn get_flow(&self, id: &str) -> Option<Arc<Flow>> {
        self.flows.get(id).map(|r| r.value().clone())
    }

    pub fn unregister_flow(&self, id: &str) -> Option<Arc<Flow>> {
        self.flows.remove(id).map(|(_, v)| v)
    }

    /// All registered flows, sorted by id
    pub fn get_all_flows(&self) -> Vec<Arc<Flow>> {
        let mut flows: Vec<_> = self.flows.iter().map(|r| r.value().clone()).collect();
        flows.sort_by(|a, b| a.id.cmp(&b.id));
        flows
    }

    pub fn register_template(&self, template: FlowTemplate) {
        self.templates
            .insert(template.id.clone(), Arc::new(template));
    }

    pub fn get_template(&self, id: &str) -> Option<Arc<FlowTemplate>> {
        self.templates.get(id).map(|r| r.value().clone())
    }

    /// Build a flow from a registered template; `None` for an unknown template
    ///
    /// The result is not registered.
    pub fn create_flow_from_template(&self, id: &str, overrides: FlowOverrides) -> Option<Flow> {
        let template = self.get_template(id)?;
        Some(template.instantiate(overrides))
    }

    /// Templates sorted by id, optionally restricted to one category
    pub fn get_all_templates(&self, category: Option<&str>) -> Vec<Arc<FlowTemplate>> {
        let mut templates: Vec<_> = self
            .templates
            .iter()
            .filter(|r| category.is_none() || r.value().category.as_deref() == category)
            .map(|r| r.value().clone())
            .collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        templates
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// Load every `.yaml`/`.yml` file in `dir`; bad files are logged and skipped
    pub fn load_directory(&self, dir: impl AsRef<Path>) -> FlowResult<usize> {
        let dir = dir.as_ref();

        if !dir.is_dir() {
            return Err(FlowError::config(format!(
                "flows directory does not exist: {}",
                dir.display()
            )));
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| FlowError::config(format!("failed to read flows directory: {}", e)))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.load_file(&path) {
                Ok(definition) => {
                    debug!("Loaded {:?} from {}", definition, path.display());
                    loaded += 1;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                }
            }
        }

        info!("Loaded {} definitions from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Load and register one flow or template file
    pub fn load_file(&self, path: impl AsRef<Path>) -> FlowResult<LoadedDefinition> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match parse_definition(&content)? {
            Definition::Flow(flow) => {
                let id = flow.id.clone();
                self.register_flow(flow);
                Ok(LoadedDefinition::Flow(id))
            }
            Definition::Template(template) => {
                let id = template.id.clone();
                self.register_template(template);
                Ok(LoadedDefinition::Template(id))
            }
        }
    }
}

/// Parsed and validated YAML document
#[derive(Debug)]
pub enum Definition {
    Flow(Flow),
    Template(FlowTemplate),
}

/// Parse a flow or template document and validate it
pub fn parse_definition(content: &str) -> FlowResult<Definition> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    let is_template = value
        .as_mapping()
        .map(|m| m.contains_key("flow"))
        .unwrap_or(false);

    if is_template {
        let template: FlowTemplate = serde_yaml::from_value(value)?;
        template.flow.validate()?;
        Ok(Definition::Template(template))
    } else {
        let flow: Flow = serde_yaml::from_value(value)?;
        flow.validate()?;
        Ok(Definition::Flow(flow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FlowData;
    use crate::step::FlowStep;
    use serde_json::json;
    use std::io::Write;

    fn simple_flow(id: &str) -> Flow {
        Flow::new(id, id, vec![FlowStep::content("only")])
    }

    #[test]
    fn test_register_and_get() {
        let registry = FlowRegistry::new();
        assert!(registry.get_flow("a").is_none());

        registry.register_flow(simple_flow("b"));
        registry.register_flow(simple_flow("a"));

        assert_eq!(registry.flow_count(), 2);
        let ids: Vec<_> = registry.get_all_flows().iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(registry.unregister_flow("a").is_some());
        assert!(registry.get_flow("a").is_none());
        assert!(registry.unregister_flow("a").is_none());
    }

    #[test]
    fn test_reregister_keeps_old_arc_alive() {
        let registry = FlowRegistry::new();
        let old = registry.register_flow(simple_flow("f"));

        let mut replacement = simple_flow("f");
        replacement.name = "Second".into();
        registry.register_flow(replacement);

        assert_eq!(old.name, "f");
        assert_eq!(registry.get_flow("f").unwrap().name, "Second");
    }

    #[test]
    fn test_templates_by_category() {
        let registry = FlowRegistry::new();
        registry.register_template(
            FlowTemplate::new("t1", "T1", simple_flow("x")).with_category("onboarding"),
        );
        registry.register_template(
            FlowTemplate::new("t2", "T2", simple_flow("y")).with_category("survey"),
        );
        registry.register_template(FlowTemplate::new("t3", "T3", simple_flow("z")));

        assert_eq!(registry.get_all_templates(None).len(), 3);
        let onboarding = registry.get_all_templates(Some("onboarding"));
        assert_eq!(onboarding.len(), 1);
        assert_eq!(onboarding[0].id, "t1");
        assert!(registry.get_all_templates(Some("other")).is_empty());
    }

    #[test]
    fn test_create_flow_from_template() {
        let registry = FlowRegistry::new();
        registry.register_template(FlowTemplate::new("t1", "T1", simple_flow("base")));

        let mut data = FlowData::new();
        data.insert("k".into(), json!(1));
        let flow = registry
            .create_flow_from_template("t1", FlowOverrides::new().id("derived").initial_data(data))
            .unwrap();
        assert_eq!(flow.id, "derived");
        assert_eq!(flow.initial_data["k"], json!(1));
        assert!(registry.get_flow("derived").is_none());

        assert!(registry
            .create_flow_from_template("missing", FlowOverrides::new())
            .is_none());
    }

    #[test]
    fn test_load_directory_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();

        let mut good = std::fs::File::create(dir.path().join("good.yaml")).unwrap();
        writeln!(
            good,
            "id: good\nname: Good\nsteps:\n  - id: s1\n    type: content\n"
        )
        .unwrap();

        let mut template = std::fs::File::create(dir.path().join("tpl.yml")).unwrap();
        writeln!(
            template,
            "id: tpl\nname: Tpl\ncategory: demo\nflow:\n  id: base\n  name: Base\n  steps:\n    - id: s1\n      type: content\n"
        )
        .unwrap();

        std::fs::write(dir.path().join("bad.yaml"), "id: bad\nname: Bad\nsteps: []\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = FlowRegistry::new();
        let loaded = registry.load_directory(dir.path()).unwrap();

        assert_eq!(loaded, 2);
        assert!(registry.get_flow("good").is_some());
        assert!(registry.get_flow("bad").is_none());
        assert!(registry.get_template("tpl").is_some());
    }

    #[test]
    fn test_load_directory_skips_deeply_nested_expression() {
        let dir = tempfile::tempdir().unwrap();
        let expression = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        std::fs::write(
            dir.path().join("nested.yaml"),
            format!(
                "id: nested\nname: Nested\nsteps:\n  - id: a\n    type: content\n  - id: b\n    type: content\nbranches:\n  - fromStepId: a\n    targetStepId: b\n    condition:\n      type: expression\n      expression: \"{}\"\n",
                expression
            ),
        )
        .unwrap();

        let registry = FlowRegistry::new();
        assert_eq!(registry.load_directory(dir.path()).unwrap(), 0);
        assert!(registry.get_flow("nested").is_none());
    }

    #[test]
    fn test_load_directory_missing() {
        let registry = FlowRegistry::new();
        let err = registry.load_directory("/nonexistent/flowdeck").unwrap_err();
        assert!(err.is_configuration());
    }
}
