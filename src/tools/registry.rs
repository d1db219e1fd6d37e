//! Tool registry and per-turn tool session.

use std::sync::Arc;
use std::time::Instant;

use crate::agent::TurnContext;
use crate::tools::{Tool, ToolError, ToolOutput, ToolSchema};

/// One registered tool.
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    handler: Arc<dyn Tool>,
}

impl ToolEntry {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.parameters_schema(),
            handler: tool,
        }
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// The tool list, assembled once at startup. Dispatch is a lookup by name.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let entry = ToolEntry::new(tool);
        if let Some(existing) = self.entries.iter_mut().find(|e| e.name == entry.name) {
            tracing::warn!("Tool {} registered twice, replacing", entry.name);
            *existing = entry;
        } else {
            tracing::debug!("Registered tool {}", entry.name);
            self.entries.push(entry);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.entries.iter().map(ToolEntry::schema).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The tool surface handed to the reasoning engine for one turn.
pub struct ToolSession<'a> {
    registry: &'a ToolRegistry,
    ctx: TurnContext<'a>,
    calls: usize,
}

impl<'a> ToolSession<'a> {
    pub fn new(registry: &'a ToolRegistry, ctx: TurnContext<'a>) -> Self {
        Self {
            registry,
            ctx,
            calls: 0,
        }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.registry.schemas()
    }

    /// Whether the send-loop breaker has stopped this turn.
    pub fn is_halted(&self) -> bool {
        self.ctx.state.halted
    }

    /// Number of tool calls dispatched so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Run a tool by name. Once the turn is halted every call fails with
    /// [`ToolError::LoopHalted`].
    pub async fn dispatch(
        &mut self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        self.calls += 1;
        if self.ctx.state.halted {
            return Err(ToolError::LoopHalted {
                streak: self.ctx.state.breaker.streak(),
            });
        }
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let start = Instant::now();
        let result = entry.handler.execute(params, &mut self.ctx).await;
        match &result {
            Ok(_) => tracing::debug!(tool = %name, elapsed = ?start.elapsed(), "Tool call complete"),
            Err(e) if e.is_loop_halt() => {
                self.ctx.state.halted = true;
                tracing::warn!(tool = %name, "Tool call halted the turn");
            }
            Err(e) => tracing::info!(tool = %name, error = %e, "Tool call failed"),
        }
        result
    }
}
