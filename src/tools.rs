//! Tool + Tool Registry (§3 "Tool", SPEC_FULL §10 laboratory tools)
//!
//! A `Tool` is a stateless value type: `{name, description, handler}`.
//! Handler failures are always value-returned, never unwound (§3). Each
//! agent owns a registry split into a standard set (usable directly in a
//! Plan) and a laboratory set (registered but requiring promotion), modeled
//! on the agency's `tools::mod::promote_tool` / laboratory-tools prompt
//! section.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Value;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub handler: ToolHandler,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            handler,
        }
    }

    pub async fn invoke(&self, params: Value) -> ToolOutcome {
        (self.handler)(params).await
    }
}

/// Per-agent tool registry: a standard set every Plan may use, and a
/// laboratory set surfaced in the prompt but not directly usable until
/// promoted. A successful invocation of a lab tool promotes it.
pub struct ToolRegistry {
    standard: RwLock<HashMap<String, Tool>>,
    laboratory: RwLock<HashMap<String, Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            standard: RwLock::new(HashMap::new()),
            laboratory: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_standard(&self, tool: Tool) {
        self.standard.write().unwrap().insert(tool.name.clone(), tool);
    }

    pub fn register_laboratory(&self, tool: Tool) {
        self.laboratory.write().unwrap().insert(tool.name.clone(), tool);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.standard.read().unwrap().contains_key(name)
            || self.laboratory.read().unwrap().contains_key(name)
    }

    pub fn is_standard(&self, name: &str) -> bool {
        self.standard.read().unwrap().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Tool> {
        self.standard
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .or_else(|| self.laboratory.read().unwrap().get(name).cloned())
    }

    /// Moves a laboratory tool into the standard set. Called by the tool
    /// executor after a successful invocation of a lab tool.
    pub fn promote(&self, name: &str) {
        let tool = self.laboratory.write().unwrap().remove(name);
        if let Some(tool) = tool {
            tracing::info!(tool = name, "promoting laboratory tool to standard set");
            self.standard.write().unwrap().insert(name.to_string(), tool);
        }
    }

    pub fn standard_catalog(&self) -> String {
        render_catalog(&self.standard.read().unwrap())
    }

    pub fn laboratory_catalog(&self) -> String {
        render_catalog(&self.laboratory.read().unwrap())
    }

    pub fn standard_names(&self) -> Vec<String> {
        self.standard.read().unwrap().keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn render_catalog(tools: &HashMap<String, Tool>) -> String {
    let mut names: Vec<&String> = tools.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|n| {
            let t = &tools[n];
            format!("- {}: {}", t.name, t.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
