//! File-backed memory store.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::MemoryError;
use crate::memory::{JournalEntry, MemoryBlock, MemoryStore};

/// Journal and memory blocks stored under the agent home.
#[derive(Debug, Clone)]
pub struct FileMemoryStore {
    journal_path: PathBuf,
    blocks_dir: PathBuf,
    checkpoint_path: PathBuf,
}

impl FileMemoryStore {
    pub fn new(
        journal_path: impl Into<PathBuf>,
        blocks_dir: impl Into<PathBuf>,
        checkpoint_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            journal_path: journal_path.into(),
            blocks_dir: blocks_dir.into(),
            checkpoint_path: checkpoint_path.into(),
        }
    }

    /// Existing file for `id`, `.yaml` before `.yml`.
    async fn block_path(&self, id: &str) -> Result<Option<PathBuf>, MemoryError> {
        for extension in ["yaml", "yml"] {
            let path = self.blocks_dir.join(format!("{id}.{extension}"));
            if tokio::fs::try_exists(&path).await.map_err(io_error(&path))? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MemoryError + '_ {
    move |source| MemoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Deserialize)]
struct BlockFile {
    name: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default, alias = "sort")]
    sort_order: Option<serde_yaml::Value>,
}

#[derive(Debug, Serialize)]
struct BlockRecord<'a> {
    name: &'a str,
    sort_order: i64,
    text: &'a str,
}

fn sort_order(value: Option<serde_yaml::Value>) -> i64 {
    match value {
        Some(serde_yaml::Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(serde_yaml::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse one block file. Unreadable YAML is logged and skipped.
async fn read_block(path: &Path, id: &str) -> Result<Option<MemoryBlock>, MemoryError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(io_error(path))?;
    let parsed: BlockFile = match serde_yaml::from_str(&contents) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable memory block");
            return Ok(None);
        }
    };
    Ok(Some(MemoryBlock {
        id: id.to_string(),
        name: parsed.name.unwrap_or_else(|| id.to_string()),
        sort_order: sort_order(parsed.sort_order),
        text: parsed.text,
    }))
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn journal_tail(&self, count: usize) -> Result<Vec<JournalEntry>, MemoryError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let contents = match tokio::fs::read_to_string(&self.journal_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.journal_path)(e)),
        };

        let mut tail = VecDeque::with_capacity(count);
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => {
                    if tail.len() == count {
                        tail.pop_front();
                    }
                    tail.push_back(entry);
                }
                Err(e) => tracing::debug!("Skipping unreadable journal line: {}", e),
            }
        }
        Ok(tail.into())
    }

    async fn append_journal(&self, entry: &JournalEntry) -> Result<(), MemoryError> {
        if let Some(parent) = self.journal_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_error(parent))?;
        }
        let mut line = serde_json::to_string(entry).map_err(|e| MemoryError::Parse {
            path: self.journal_path.clone(),
            reason: e.to_string(),
        })?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await
            .map_err(io_error(&self.journal_path))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(io_error(&self.journal_path))?;
        file.flush().await.map_err(io_error(&self.journal_path))?;
        Ok(())
    }

    async fn memory_blocks(&self) -> Result<Vec<MemoryBlock>, MemoryError> {
        let mut dir = match tokio::fs::read_dir(&self.blocks_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.blocks_dir)(e)),
        };

        let mut blocks = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(io_error(&self.blocks_dir))? {
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if !is_yaml {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(block) = read_block(&path, id).await? {
                blocks.push(block);
            }
        }

        blocks.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
        Ok(blocks)
    }

    async fn find_block(&self, id: &str) -> Result<Option<MemoryBlock>, MemoryError> {
        match self.block_path(id).await? {
            Some(path) => read_block(&path, id).await,
            None => Ok(None),
        }
    }

    async fn save_block(&self, block: &MemoryBlock) -> Result<(), MemoryError> {
        let path = match self.block_path(&block.id).await? {
            Some(path) => path,
            None => {
                tokio::fs::create_dir_all(&self.blocks_dir)
                    .await
                    .map_err(io_error(&self.blocks_dir))?;
                self.blocks_dir.join(format!("{}.yaml", block.id))
            }
        };
        let record = BlockRecord {
            name: &block.name,
            sort_order: block.sort_order,
            text: &block.text,
        };
        let contents = serde_yaml::to_string(&record).map_err(|e| MemoryError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(io_error(&path))?;
        tracing::debug!(block = %block.id, path = %path.display(), "Memory block saved");
        Ok(())
    }

    async fn delete_block(&self, id: &str) -> Result<bool, MemoryError> {
        let Some(path) = self.block_path(id).await? else {
            return Ok(false);
        };
        tokio::fs::remove_file(&path)
            .await
            .map_err(io_error(&path))?;
        tracing::debug!(block = %id, path = %path.display(), "Memory block deleted");
        Ok(true)
    }

    async fn checkpoint(&self) -> Result<String, MemoryError> {
        match tokio::fs::read_to_string(&self.checkpoint_path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(io_error(&self.checkpoint_path)(e)),
        }
    }
}
