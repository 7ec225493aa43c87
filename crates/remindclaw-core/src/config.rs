//! RemindClaw configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RemindClawError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemindClawConfig {
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl RemindClawConfig {
    /// Load config from the default path (~/.remindclaw/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RemindClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RemindClawError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| RemindClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Secrets may come from the environment instead of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("REMINDCLAW_ROSTER_API_KEY") {
            self.roster.api_key = key;
        }
        if let Ok(url) = std::env::var("REMINDCLAW_ROSTER_URL") {
            self.roster.base_url = url;
        }
        if let Ok(user) = std::env::var("REMINDCLAW_ADMIN_USERNAME") {
            self.gateway.admin_username = user;
        }
        if let Ok(pass) = std::env::var("REMINDCLAW_ADMIN_PASSWORD") {
            self.gateway.admin_password = pass;
        }
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the RemindClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".remindclaw")
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn bool_true() -> bool { true }

/// Roster provider (HTTP) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_roster_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_roster_path")]
    pub path: String,
    #[serde(default = "default_roster_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_allowed_statuses")]
    pub allowed_statuses: Vec<String>,
}

fn default_roster_url() -> String { "http://localhost:8080".into() }
fn default_roster_path() -> String { "/enrolled".into() }
fn default_roster_timeout() -> u64 { 30 }
fn default_allowed_statuses() -> Vec<String> {
    vec!["Ativo", "EmRecuperacao", "Atencao"]
        .into_iter().map(String::from).collect()
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            base_url: default_roster_url(),
            api_key: String::new(),
            path: default_roster_path(),
            timeout_secs: default_roster_timeout(),
            allowed_statuses: default_allowed_statuses(),
        }
    }
}

/// WhatsApp bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_bridge_url() -> String { "ws://127.0.0.1:8085/bridge".into() }
fn default_connect_timeout() -> u64 { 20 }

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Reconnection policy for the messaging session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_banned_cooldown")]
    pub banned_cooldown_secs: u64,
    #[serde(default = "default_logout_timeout")]
    pub logout_timeout_secs: u64,
}

fn default_base_delay() -> u64 { 5000 }
fn default_max_retries() -> u32 { 5 }
fn default_banned_cooldown() -> u64 { 1800 }
fn default_logout_timeout() -> u64 { 10 }

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_retries: default_max_retries(),
            banned_cooldown_secs: default_banned_cooldown(),
            logout_timeout_secs: default_logout_timeout(),
        }
    }
}

/// Dispatch loop limits and message template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_hourly_cap")]
    pub hourly_cap: u32,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_ledger_timeout")]
    pub ledger_timeout_secs: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_template")]
    pub message_template: String,
}

fn default_hourly_cap() -> u32 { 100 }
fn default_send_timeout() -> u64 { 10 }
fn default_ledger_timeout() -> u64 { 5 }
fn default_min_delay() -> u64 { 20_000 }
fn default_max_delay() -> u64 { 40_000 }
fn default_template() -> String {
    "Hi {first_name}! 🚀 Reminder of your weekly session with {agent}, {day_label}. Can I count on you? 👇\n{link}".into()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            hourly_cap: default_hourly_cap(),
            send_timeout_secs: default_send_timeout(),
            ledger_timeout_secs: default_ledger_timeout(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            message_template: default_template(),
        }
    }
}

/// Ledger (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
}

fn default_ledger_path() -> String { "~/.remindclaw/ledger.db".into() }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { path: default_ledger_path() }
    }
}

/// HTTP control surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "bool_true")]
    pub require_login: bool,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 5000 }
fn default_admin_username() -> String { "admin".into() }
fn default_heartbeat() -> u64 { 30 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_username: default_admin_username(),
            admin_password: String::new(),
            cors_origins: Vec::new(),
            heartbeat_secs: default_heartbeat(),
            require_login: true,
        }
    }
}
