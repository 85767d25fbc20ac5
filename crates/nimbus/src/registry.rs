use anyhow::Result;
use async_trait::async_trait;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};
use crate::schema;

/// The orchestrator's view of a tool executor: one-time discovery plus
/// invocation. Implemented by the stdio channel client and, for in-process
/// use, by `ToolRegistry` itself.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// List all tools the executor exposes. Called once at connection time.
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Invoke a named tool. Every tool-related failure is returned as an
    /// `AgentError` rather than a fatal error, so it can flow back to the
    /// model as a result payload.
    async fn call_tool(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}

/// A named group of tools with a shared handler
#[async_trait]
pub trait ToolSet: Send + Sync {
    /// Get the name of the tool set
    fn name(&self) -> &str;

    /// Get the tool set description
    fn description(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call a tool with already-validated arguments
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}

/// Owns the tool sets exposed by one executor process. Populated at startup
/// and read-only afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    toolsets: Vec<Box<dyn ToolSet>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool set. Tool names must be unique across the registry.
    pub fn register(&mut self, toolset: Box<dyn ToolSet>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for tool in toolset.tools() {
            if self.find(&tool.name).is_some() || !seen.insert(tool.name.clone()) {
                anyhow::bail!("Duplicate tool name: {}", tool.name);
            }
        }
        self.toolsets.push(toolset);
        Ok(())
    }

    /// Snapshot of all tool descriptors, in registration order
    pub fn tools(&self) -> Vec<Tool> {
        self.toolsets
            .iter()
            .flat_map(|toolset| toolset.tools().iter().cloned())
            .collect()
    }

    fn find(&self, name: &str) -> Option<(&dyn ToolSet, &Tool)> {
        for toolset in &self.toolsets {
            if let Some(tool) = toolset.tools().iter().find(|tool| tool.name == name) {
                return Some((toolset.as_ref(), tool));
            }
        }
        None
    }

    /// Resolve, validate, and run a single tool call. At most one handler
    /// runs per dispatch; there are no retries and no result caching.
    pub async fn dispatch(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let (toolset, tool) = self
            .find(&tool_call.name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_call.name.clone()))?;

        schema::validate(&tool.input_schema, &tool_call.arguments)?;

        toolset.call(tool_call).await
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.tools())
    }

    async fn call_tool(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        self.dispatch(tool_call).await
    }
}
