//! Tools the reasoning engine can call during a turn.
//!
//! Tools run inside the worker with a [`TurnContext`](crate::agent::TurnContext),
//! so they see the current event and share the turn's send-loop breaker.

pub mod builtin;
mod registry;
mod tool;

pub use registry::{ToolEntry, ToolRegistry, ToolSession};
pub use tool::{Tool, ToolError, ToolOutput, ToolSchema, optional_str, require_str};
