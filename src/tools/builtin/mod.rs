//! Built-in tools that come with the agent.

mod blocks;
mod journal;
mod message;
mod schedule;

use std::sync::Arc;

use crate::tools::ToolRegistry;

pub use blocks::{
    CreateMemoryBlockTool, DeleteMemoryBlockTool, ListMemoryBlocksTool, UpdateMemoryBlockTool,
};
pub use journal::JournalTool;
pub use message::{ListMessagesTool, ReactTool, SendMessageTool, parse_window};
pub use schedule::{AddScheduleTool, ListSchedulesTool, RemoveScheduleTool};

/// Register every built-in tool.
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(SendMessageTool));
    registry.register(Arc::new(ListMessagesTool));
    registry.register(Arc::new(ReactTool));
    registry.register(Arc::new(JournalTool));
    registry.register(Arc::new(ListMemoryBlocksTool));
    registry.register(Arc::new(CreateMemoryBlockTool));
    registry.register(Arc::new(UpdateMemoryBlockTool));
    registry.register(Arc::new(DeleteMemoryBlockTool));
    registry.register(Arc::new(ListSchedulesTool));
    registry.register(Arc::new(AddScheduleTool));
    registry.register(Arc::new(RemoveScheduleTool));
}
