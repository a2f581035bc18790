use crate::agent::PollPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const RELAY_DIR: &str = ".relay";

const API_KEY_VARS: &[&str] = &["RELAY_API_KEY", "OPENAI_API_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: String,
    pub base_url: Option<String>,
    pub assistant_id: String,
    pub turn_timeout_secs: u64,
    pub max_transport_retries: u32,
    pub max_concurrent_tools: usize,
    #[serde(default)]
    pub poll: PollPolicy,
    /// Enables the e-mail tools over a [`crate::tools::DirMailbox`] rooted here.
    pub mailbox_dir: Option<PathBuf>,
    /// Enables the calendar tools over a [`crate::tools::FileCalendar`] file.
    pub calendar_file: Option<PathBuf>,
    #[serde(skip)]
    pub workspace_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_key: String::new(),
            base_url: None,
            assistant_id: String::new(),
            turn_timeout_secs: 120,
            max_transport_retries: 5,
            max_concurrent_tools: 4,
            poll: PollPolicy::default(),
            mailbox_dir: None,
            calendar_file: None,
            workspace_dir: get_relay_dir().join("workspace"),
        }
    }
}

pub fn get_relay_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(RELAY_DIR)
}

pub fn get_config_path() -> PathBuf {
    get_relay_dir().join("config.toml")
}

pub fn ensure_relay_dir() -> Result<PathBuf> {
    let relay_dir = get_relay_dir();

    if !relay_dir.exists() {
        std::fs::create_dir_all(&relay_dir).with_context(|| {
            format!("Failed to create relay directory at {}", relay_dir.display())
        })?;
    }

    Ok(relay_dir)
}

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let mut config = if config_exists() {
            load_config()?
        } else {
            Config::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    /// Environment values win over the file. `lookup` is injectable for tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = API_KEY_VARS
            .iter()
            .filter_map(|var| lookup(var))
            .find(|v| !v.trim().is_empty())
        {
            self.api_key = key;
        }
        if let Some(assistant_id) = lookup("RELAY_ASSISTANT_ID").filter(|v| !v.trim().is_empty())
        {
            self.assistant_id = assistant_id;
        }
        if let Some(base_url) = lookup("RELAY_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = Some(base_url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!(
                "No API key configured. Set RELAY_API_KEY or OPENAI_API_KEY, or add api_key to {}",
                get_config_path().display()
            );
        }
        if self.assistant_id.trim().is_empty() {
            anyhow::bail!(
                "No assistant configured. Set RELAY_ASSISTANT_ID or add assistant_id to {}",
                get_config_path().display()
            );
        }
        Ok(())
    }
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path();

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config from {}", config_path.display()))?;

    let mut config = parse_config(&content)
        .with_context(|| format!("Failed to parse config from {}", config_path.display()))?;

    config.workspace_dir = get_relay_dir().join("workspace");

    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

pub fn save_config(config: &Config) -> Result<()> {
    ensure_relay_dir()?;

    let config_path = get_config_path();
    let content =
        toml::to_string_pretty(config).with_context(|| "Failed to serialize config to TOML")?;

    std::fs::write(&config_path, content)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    Ok(())
}

pub fn config_exists() -> bool {
    get_config_path().exists()
}
