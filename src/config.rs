//! Configuration for roost.
//!
//! Settings come from `config.yaml` in the agent home. `<home>/.env` is
//! loaded into the process environment first, without overriding variables
//! that are already set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::agent::BreakerConfig;
use crate::error::ConfigError;

const DEFAULT_CONFIG: &str = "\
model: default
journal_entries_in_prompt: 90
messages_in_prompt: 10
always_respond_bot_ids: []
api_port: 0
git_sync_after_turn: false
forced_reply: silent
";

const DEFAULT_SCHEDULER: &str = "jobs: []\n";

const DEFAULT_CHECKPOINT: &str = "\
When you write a journal entry, think through:
- What did the user want, exactly?
- What did you do?
- What prediction do you have about how the user will react?
- What should you do differently next time?
";

/// Paths inside the agent home.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    pub home: PathBuf,
}

impl RepoLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.yaml")
    }

    pub fn scheduler_file(&self) -> PathBuf {
        self.home.join("scheduler.yaml")
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.home.join("checkpoint.md")
    }

    pub fn env_file(&self) -> PathBuf {
        self.home.join(".env")
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.home.join("blocks")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.home.join("state")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn events_log(&self) -> PathBuf {
        self.logs_dir().join("events.jsonl")
    }

    pub fn journal_log(&self) -> PathBuf {
        self.logs_dir().join("journal.jsonl")
    }

    /// Create missing directories and default files. Existing files are
    /// never touched.
    pub fn bootstrap(&self) -> Result<(), ConfigError> {
        for dir in [self.state_dir(), self.blocks_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| ConfigError::Read {
                path: dir.clone(),
                source,
            })?;
        }
        write_if_missing(&self.config_file(), DEFAULT_CONFIG)?;
        write_if_missing(&self.scheduler_file(), DEFAULT_SCHEDULER)?;
        write_if_missing(&self.checkpoint_file(), DEFAULT_CHECKPOINT)?;
        Ok(())
    }
}

fn write_if_missing(path: &Path, contents: &str) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    tracing::info!("Writing default {}", path.display());
    std::fs::write(path, contents).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// What to do when an allow-listed bot gets no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForcedReplyPolicy {
    /// Nothing extra is sent.
    #[default]
    Silent,
    /// Send the engine's final text, or a short acknowledgement.
    Fallback,
}

/// Subprocess reasoning engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: 600,
        }
    }
}

impl EngineSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: String,
    pub journal_entries_in_prompt: usize,
    #[serde(alias = "discord_messages_in_prompt")]
    pub messages_in_prompt: usize,
    /// Bot authors whose messages are processed and always answered.
    #[serde(deserialize_with = "id_list")]
    pub always_respond_bot_ids: HashSet<String>,
    /// Loopback API port. 0 disables the API.
    pub api_port: u16,
    pub git_sync_after_turn: bool,
    pub forced_reply: ForcedReplyPolicy,
    pub send_loop: BreakerConfig,
    pub engine: EngineSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            journal_entries_in_prompt: 90,
            messages_in_prompt: 10,
            always_respond_bot_ids: HashSet::new(),
            api_port: 0,
            git_sync_after_turn: false,
            forced_reply: ForcedReplyPolicy::Silent,
            send_loop: BreakerConfig::default(),
            engine: EngineSection::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` and `config.yaml` from the agent home.
    pub fn load(layout: &RepoLayout) -> Result<Self, ConfigError> {
        let env_file = layout.env_file();
        if env_file.exists() {
            if let Err(e) = dotenvy::from_path(&env_file) {
                tracing::warn!("Failed to load {}: {}", env_file.display(), e);
            }
        }

        let path = layout.config_file();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        Self::parse(&contents, &path)
    }

    /// Parse config file contents. An empty file means defaults.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: AppConfig =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if config.model.trim().is_empty() {
            config.model = "default".to_string();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let breaker = &self.send_loop;
        if breaker.soft_limit == 0 || breaker.hard_limit < breaker.soft_limit {
            return Err(ConfigError::InvalidValue {
                key: "send_loop".to_string(),
                message: format!(
                    "need 0 < soft_limit <= hard_limit, got {} and {}",
                    breaker.soft_limit, breaker.hard_limit
                ),
            });
        }
        if !(0.0..=1.0).contains(&breaker.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "send_loop.similarity_threshold".to_string(),
                message: format!("{} is outside 0.0..=1.0", breaker.similarity_threshold),
            });
        }
        Ok(())
    }

    pub fn should_respond_to_bot(&self, author_id: Option<&str>) -> bool {
        author_id.is_some_and(|id| self.always_respond_bot_ids.contains(id))
    }
}

/// Accepts a YAML list (strings or numbers), a comma-separated string, or null.
fn id_list<'de, D>(deserializer: D) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn scalar(value: &serde_yaml::Value) -> Option<String> {
        match value {
            serde_yaml::Value::String(s) => Some(s.trim().to_string()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    let value = serde_yaml::Value::deserialize(deserializer)?;
    let ids: Vec<String> = match &value {
        serde_yaml::Value::Null => Vec::new(),
        serde_yaml::Value::Sequence(items) => items.iter().filter_map(scalar).collect(),
        serde_yaml::Value::String(s) => s.split(',').map(|id| id.trim().to_string()).collect(),
        other => scalar(other).into_iter().collect(),
    };
    Ok(ids.into_iter().filter(|id| !id.is_empty()).collect())
}
