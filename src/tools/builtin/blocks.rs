//! Memory block tools.
//!
//! Blocks live in `blocks/<id>.yaml` and are rendered into every turn, so
//! changes show up on the next turn.

use std::time::Instant;

use async_trait::async_trait;

use crate::agent::TurnContext;
use crate::memory::{MemoryBlock, MemoryStore, slugify};
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_str, require_str};

/// Characters of block text shown by `list_memory_blocks`.
const PREVIEW_CHARS: usize = 10;

/// Read an optional integer parameter. Numeric strings are accepted.
fn optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, ToolError> {
    let invalid = || ToolError::InvalidParameters(format!("'{}' must be an integer", key));
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_i64().map(Some).ok_or_else(invalid),
        Some(serde_json::Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// First free id for `name`: its slug, then `<slug>-2`, `<slug>-3`, ...
async fn generate_block_id(memory: &dyn MemoryStore, name: &str) -> Result<String, ToolError> {
    let base = slugify(name);
    if memory.find_block(&base).await?.is_none() {
        return Ok(base);
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if memory.find_block(&candidate).await?.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Lists memory blocks with a short text preview.
#[derive(Debug, Default)]
pub struct ListMemoryBlocksTool;

#[async_trait]
impl Tool for ListMemoryBlocksTool {
    fn name(&self) -> &str {
        "list_memory_blocks"
    }

    fn description(&self) -> &str {
        "List memory blocks. Includes only the first 10 characters of each block's text."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object", "properties": {}})
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let blocks = ctx.memory.memory_blocks().await?;
        let rendered: Vec<serde_json::Value> = blocks
            .iter()
            .map(|block| {
                serde_json::json!({
                    "id": block.id,
                    "name": block.name,
                    "sort_order": block.sort_order,
                    "text_preview": block.text.chars().take(PREVIEW_CHARS).collect::<String>(),
                })
            })
            .collect();
        tracing::debug!(tool = "list_memory_blocks", count = rendered.len(), "Listed memory blocks");
        Ok(ToolOutput::success(
            serde_json::json!({ "blocks": rendered }),
            start.elapsed(),
        ))
    }
}

/// Creates a new memory block.
#[derive(Debug, Default)]
pub struct CreateMemoryBlockTool;

#[async_trait]
impl Tool for CreateMemoryBlockTool {
    fn name(&self) -> &str {
        "create_memory_block"
    }

    fn description(&self) -> &str {
        "Create a memory block. The id is derived from the name unless `block_id` is given."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "text": {"type": "string"},
                "sort_order": {"type": "integer", "default": 0},
                "block_id": {"type": "string"}
            },
            "required": ["name", "text"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let name = require_str(&params, "name")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ToolError::InvalidParameters("name is required".to_string()));
        }
        let text = require_str(&params, "text")?;
        let sort_order = optional_i64(&params, "sort_order")?.unwrap_or(0);

        let id = match optional_str(&params, "block_id") {
            Some(requested) => slugify(&requested),
            None => generate_block_id(ctx.memory, name).await?,
        };
        if ctx.memory.find_block(&id).await?.is_some() {
            return Ok(ToolOutput::text(
                format!("memory block '{}' already exists.", id),
                start.elapsed(),
            ));
        }

        let block = MemoryBlock {
            id,
            name: name.to_string(),
            sort_order,
            text,
        };
        ctx.memory.save_block(&block).await?;
        tracing::info!(tool = "create_memory_block", block = %block.id, "Memory block created");
        Ok(ToolOutput::text(
            format!("Created memory block '{}'.", block.id),
            start.elapsed(),
        ))
    }
}

/// Changes the name, text or sort order of a memory block.
#[derive(Debug, Default)]
pub struct UpdateMemoryBlockTool;

#[async_trait]
impl Tool for UpdateMemoryBlockTool {
    fn name(&self) -> &str {
        "update_memory_block"
    }

    fn description(&self) -> &str {
        "Update an existing memory block. Pass at least one of name, text, sort_order."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "block_id": {"type": "string"},
                "name": {"type": "string"},
                "text": {"type": "string"},
                "sort_order": {"type": "integer"}
            },
            "required": ["block_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let id = slugify(&require_str(&params, "block_id")?);
        let name = optional_str(&params, "name");
        let text = params
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let sort_order = optional_i64(&params, "sort_order")?;
        if name.is_none() && text.is_none() && sort_order.is_none() {
            return Err(ToolError::InvalidParameters(
                "No fields provided. Pass at least one of name, text, sort_order.".to_string(),
            ));
        }

        let Some(mut block) = ctx.memory.find_block(&id).await? else {
            return Ok(ToolOutput::text(
                format!("memory block '{}' not found.", id),
                start.elapsed(),
            ));
        };
        if let Some(name) = name {
            block.name = name;
        }
        if let Some(text) = text {
            block.text = text;
        }
        if let Some(sort_order) = sort_order {
            block.sort_order = sort_order;
        }
        ctx.memory.save_block(&block).await?;
        tracing::info!(tool = "update_memory_block", block = %id, "Memory block updated");
        Ok(ToolOutput::text(
            format!("Updated memory block '{}'.", id),
            start.elapsed(),
        ))
    }
}

/// Deletes a memory block.
#[derive(Debug, Default)]
pub struct DeleteMemoryBlockTool;

#[async_trait]
impl Tool for DeleteMemoryBlockTool {
    fn name(&self) -> &str {
        "delete_memory_block"
    }

    fn description(&self) -> &str {
        "Delete a memory block by id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"block_id": {"type": "string"}},
            "required": ["block_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &mut TurnContext<'_>,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let id = slugify(&require_str(&params, "block_id")?);
        let text = if ctx.memory.delete_block(&id).await? {
            tracing::info!(tool = "delete_memory_block", block = %id, "Memory block deleted");
            format!("Deleted memory block '{}'.", id)
        } else {
            format!("memory block '{}' not found.", id)
        };
        Ok(ToolOutput::text(text, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::testing::{FakeTransport, TurnHarness};

    fn harness() -> TurnHarness {
        TurnHarness::new(FakeTransport::ready(), Event::console("hi"))
    }

    async fn create(harness: &mut TurnHarness, params: serde_json::Value) -> String {
        CreateMemoryBlockTool
            .execute(params, &mut harness.ctx())
            .await
            .unwrap()
            .as_text()
    }

    #[test]
    fn test_optional_i64() {
        let params = serde_json::json!({"a": 3, "b": " -2 ", "c": "x", "d": 1.5, "e": null});
        assert_eq!(optional_i64(&params, "a").unwrap(), Some(3));
        assert_eq!(optional_i64(&params, "b").unwrap(), Some(-2));
        assert!(optional_i64(&params, "c").is_err());
        assert!(optional_i64(&params, "d").is_err());
        assert_eq!(optional_i64(&params, "e").unwrap(), None);
        assert_eq!(optional_i64(&params, "missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_derives_unique_ids() {
        let mut harness = harness();
        let out = create(
            &mut harness,
            serde_json::json!({"name": " Project Notes ", "text": "ship v2", "sort_order": 5}),
        )
        .await;
        assert_eq!(out, "Created memory block 'project-notes'.");

        let out = create(&mut harness, serde_json::json!({"name": "project notes", "text": "again"})).await;
        assert_eq!(out, "Created memory block 'project-notes-2'.");

        let out = create(
            &mut harness,
            serde_json::json!({"name": "Other", "text": "x", "block_id": "Project Notes"}),
        )
        .await;
        assert_eq!(out, "memory block 'project-notes' already exists.");

        let block = harness.memory.find_block("project-notes").await.unwrap().unwrap();
        assert_eq!(block.name, "Project Notes");
        assert_eq!(block.sort_order, 5);
        assert_eq!(block.text, "ship v2");
        assert!(harness.dir.path().join("blocks/project-notes-2.yaml").exists());
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let mut harness = harness();
        let result = CreateMemoryBlockTool
            .execute(serde_json::json!({"name": "  ", "text": "x"}), &mut harness.ctx())
            .await;
        assert!(matches!(result, Err(ToolError::InvalidParameters(_))));
        assert!(harness.memory.memory_blocks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_shows_preview_in_order() {
        let mut harness = harness();
        create(
            &mut harness,
            serde_json::json!({"name": "persona", "text": "calm and precise", "sort_order": 2}),
        )
        .await;
        create(&mut harness, serde_json::json!({"name": "goals", "text": "ship", "sort_order": 1})).await;

        let out = ListMemoryBlocksTool
            .execute(serde_json::json!({}), &mut harness.ctx())
            .await
            .unwrap();
        let blocks = out.result["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["id"], "goals");
        assert_eq!(blocks[1]["text_preview"], "calm and p");
        assert_eq!(blocks[1]["sort_order"], 2);
    }

    #[tokio::test]
    async fn test_update_changes_given_fields() {
        let mut harness = harness();
        create(&mut harness, serde_json::json!({"name": "persona", "text": "calm"})).await;

        let out = UpdateMemoryBlockTool
            .execute(
                serde_json::json!({"block_id": "Persona", "text": "", "sort_order": "7"}),
                &mut harness.ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out.as_text(), "Updated memory block 'persona'.");
        let block = harness.memory.find_block("persona").await.unwrap().unwrap();
        assert_eq!(block.name, "persona");
        assert_eq!(block.text, "");
        assert_eq!(block.sort_order, 7);

        let result = UpdateMemoryBlockTool
            .execute(serde_json::json!({"block_id": "persona"}), &mut harness.ctx())
            .await;
        assert!(matches!(result, Err(ToolError::InvalidParameters(_))));

        let out = UpdateMemoryBlockTool
            .execute(
                serde_json::json!({"block_id": "ghost", "text": "boo"}),
                &mut harness.ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out.as_text(), "memory block 'ghost' not found.");
    }

    #[tokio::test]
    async fn test_delete() {
        let mut harness = harness();
        create(&mut harness, serde_json::json!({"name": "scratch", "text": "tmp"})).await;

        let out = DeleteMemoryBlockTool
            .execute(serde_json::json!({"block_id": "scratch"}), &mut harness.ctx())
            .await
            .unwrap();
        assert_eq!(out.as_text(), "Deleted memory block 'scratch'.");
        assert!(!harness.dir.path().join("blocks/scratch.yaml").exists());

        let out = DeleteMemoryBlockTool
            .execute(serde_json::json!({"block_id": "scratch"}), &mut harness.ctx())
            .await
            .unwrap();
        assert_eq!(out.as_text(), "memory block 'scratch' not found.");
    }
}
