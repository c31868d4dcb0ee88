//! Graph spec templates: named constructors registered explicitly at
//! manager startup. There is no runtime code loading — adding a template
//! means adding a `GraphTemplate` impl and registering it.

use std::collections::HashMap;
use std::sync::Arc;

use dropgraph_core::GraphSpec;
use serde_json::Value;

use crate::error::{ManagerError, Result};

#[derive(Debug, Clone)]
pub struct TemplateArg {
    pub name: &'static str,
    pub default: Option<Value>,
}

/// A named graph spec constructor.
pub trait GraphTemplate: Send + Sync {
    fn name(&self) -> &str;
    fn args(&self) -> &[TemplateArg];
    fn materialize(&self, params: &HashMap<String, Value>) -> Result<GraphSpec>;
}

/// Explicit name -> constructor registry, populated once at startup.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<dyn GraphTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in templates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ComplexGraphTemplate));
        registry.register(Arc::new(PipContImgPgTemplate));
        registry.register(Arc::new(ArchivingAppTemplate));
        registry
    }

    pub fn register(&mut self, template: Arc<dyn GraphTemplate>) {
        self.templates.insert(template.name().to_string(), template);
    }

    pub fn names(&self) -> Vec<(&str, &[TemplateArg])> {
        self.templates.values().map(|t| (t.name(), t.args())).collect()
    }

    pub fn materialize(&self, name: &str, params: &HashMap<String, Value>) -> Result<GraphSpec> {
        self.templates
            .get(name)
            .ok_or_else(|| ManagerError::NoTemplate(name.to_string()))?
            .materialize(params)
    }
}

fn string_param(params: &HashMap<String, Value>, key: &str, default: &str) -> String {
    params.get(key).and_then(Value::as_str).unwrap_or(default).to_string()
}

/// Mirrors the original's `repository.complex_graph`: a single barrier app
/// fed by one in-memory root, producing one in-memory output.
struct ComplexGraphTemplate;

impl GraphTemplate for ComplexGraphTemplate {
    fn name(&self) -> &str {
        "complex_graph"
    }

    fn args(&self) -> &[TemplateArg] {
        &[TemplateArg { name: "root_oid", default: None }]
    }

    fn materialize(&self, params: &HashMap<String, Value>) -> Result<GraphSpec> {
        let root = string_param(params, "root_oid", "root");
        let spec = serde_json::json!([
            {"oid": root, "type": "data", "dropType": "memory"},
            {"oid": format!("{root}-app"), "type": "app", "appType": "barrier", "inputs": [root], "outputs": [format!("{root}-out")]},
            {"oid": format!("{root}-out"), "type": "data", "dropType": "memory"},
        ]);
        serde_json::from_value(spec).map_err(|e| ManagerError::InvalidGraph(e.to_string()))
    }
}

/// Mirrors the original's `pip_cont_img_pg`: a container drop with a single
/// file-drop child, produced by an app.
struct PipContImgPgTemplate;

impl GraphTemplate for PipContImgPgTemplate {
    fn name(&self) -> &str {
        "pip_cont_img_pg"
    }

    fn args(&self) -> &[TemplateArg] {
        &[TemplateArg { name: "image_dir", default: Some(Value::String("/tmp/images".into())) }]
    }

    fn materialize(&self, params: &HashMap<String, Value>) -> Result<GraphSpec> {
        let dir = string_param(params, "image_dir", "/tmp/images");
        let spec = serde_json::json!([
            {"oid": "image", "type": "data", "dropType": "file", "filePath": format!("{dir}/out.fits")},
            {"oid": "producer", "type": "app", "appType": "barrier", "outputs": ["image"]},
            {"oid": "container", "type": "data", "dropType": "container"},
        ]);
        serde_json::from_value(spec).map_err(|e| ManagerError::InvalidGraph(e.to_string()))
    }
}

/// Mirrors the original's `archiving_app`: a streaming app that archives
/// whatever flows through a single streaming input.
struct ArchivingAppTemplate;

impl GraphTemplate for ArchivingAppTemplate {
    fn name(&self) -> &str {
        "archiving_app"
    }

    fn args(&self) -> &[TemplateArg] {
        &[TemplateArg { name: "source_oid", default: None }]
    }

    fn materialize(&self, params: &HashMap<String, Value>) -> Result<GraphSpec> {
        let source = string_param(params, "source_oid", "source");
        let spec = serde_json::json!([
            {"oid": source, "type": "data", "dropType": "memory"},
            {"oid": "archiver", "type": "app", "appType": "streaming", "streamingInputs": [source]},
        ]);
        serde_json::from_value(spec).map_err(|e| ManagerError::InvalidGraph(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_are_registered() {
        let registry = TemplateRegistry::with_builtins();
        let names: Vec<&str> = registry.names().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"complex_graph"));
        assert!(names.contains(&"pip_cont_img_pg"));
        assert!(names.contains(&"archiving_app"));
    }

    #[test]
    fn unknown_template_fails() {
        let registry = TemplateRegistry::with_builtins();
        assert!(registry.materialize("nope", &HashMap::new()).is_err());
    }

    #[test]
    fn materializes_complex_graph_with_default_oid() {
        let registry = TemplateRegistry::with_builtins();
        let spec = registry.materialize("complex_graph", &HashMap::new()).unwrap();
        assert_eq!(spec.len(), 3);
    }
}
