//! Relay configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/linkrelay/config.toml`
//! - Windows: `%APPDATA%/linkrelay/config.toml`
//!
//! Telegram credentials may also come from `LINKRELAY_BOT_TOKEN` and
//! `LINKRELAY_CHAT_ID`, which override the file and are never written back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use linkrelay_file_ops::{DEFAULT_STAGING_ROOT, StagingRoot};
use linkrelay_relay::{DEFAULT_CAPTION, EmptyObjectPolicy, RelaySettings};
use linkrelay_transfer::DEFAULT_CHUNK_SIZE_LIMIT;
use serde::{Deserialize, Serialize};

const TOKEN_ENV: &str = "LINKRELAY_BOT_TOKEN";
const CHAT_ENV: &str = "LINKRELAY_CHAT_ID";

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding per-job staging directories.
    #[serde(default = "default_staging_root")]
    pub staging_root: String,

    /// Files larger than this many bytes are split into parts.
    #[serde(default = "default_chunk_size_limit")]
    pub chunk_size_limit: u64,

    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,

    /// Fetch deadline in seconds (0 = none).
    #[serde(default)]
    pub fetch_timeout_secs: u64,

    /// Per-upload deadline in seconds (0 = none).
    #[serde(default)]
    pub upload_timeout_secs: u64,

    #[serde(default)]
    pub empty_objects: EmptyObjectPolicy,

    /// Caption for files relayed as-is.
    #[serde(default = "default_caption")]
    pub caption: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Storage gateway the links are resolved through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
}

/// Telegram Bot API destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub bot_token: String,

    #[serde(default)]
    pub chat_id: String,
}

fn default_staging_root() -> String {
    DEFAULT_STAGING_ROOT.into()
}

fn default_chunk_size_limit() -> u64 {
    DEFAULT_CHUNK_SIZE_LIMIT
}

fn default_progress_interval() -> u64 {
    1000
}

fn default_caption() -> String {
    DEFAULT_CAPTION.into()
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_api_base() -> String {
    "https://api.telegram.org".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            bot_token: String::new(),
            chat_id: String::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            chunk_size_limit: default_chunk_size_limit(),
            progress_interval_ms: default_progress_interval(),
            fetch_timeout_secs: 0,
            upload_timeout_secs: 0,
            empty_objects: EmptyObjectPolicy::default(),
            caption: default_caption(),
            gateway: GatewayConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default), creating
    /// a default file if none exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        let mut config = Self::load_from(&path)?;
        config.apply_overrides(
            std::env::var(TOKEN_ENV).ok(),
            std::env::var(CHAT_ENV).ok(),
        );
        Ok(config)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_overrides(&mut self, bot_token: Option<String>, chat_id: Option<String>) {
        if let Some(token) = bot_token.filter(|t| !t.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(chat) = chat_id.filter(|c| !c.is_empty()) {
            self.telegram.chat_id = chat;
        }
    }

    /// Fails unless the Telegram destination is fully configured.
    pub fn require_credentials(&self) -> anyhow::Result<()> {
        if self.telegram.bot_token.is_empty() {
            anyhow::bail!("telegram.bot_token is not set (config file or {TOKEN_ENV})");
        }
        if self.telegram.chat_id.is_empty() {
            anyhow::bail!("telegram.chat_id is not set (config file or {CHAT_ENV})");
        }
        Ok(())
    }

    pub fn staging_root(&self) -> StagingRoot {
        StagingRoot::new(&self.staging_root)
    }

    pub fn relay_settings(&self) -> RelaySettings {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        RelaySettings {
            chunk_size_limit: self.chunk_size_limit,
            progress_interval: Duration::from_millis(self.progress_interval_ms.max(1)),
            fetch_timeout: secs(self.fetch_timeout_secs),
            upload_timeout: secs(self.upload_timeout_secs),
            empty_objects: self.empty_objects,
            caption: self.caption.clone(),
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("linkrelay")
            .join("config.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("linkrelay").join("config.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/linkrelay/config.toml"))
    }
}
