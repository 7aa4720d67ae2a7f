//! Blastline configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BlastlineError, Result};
use crate::types::Platform;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlastlineConfig {
    /// Path to the campaign database. Empty = `~/.blastline/blastline.db`.
    #[serde(default)]
    pub database_path: String,
    /// Seconds between scheduler sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for BlastlineConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            sweep_interval_secs: default_sweep_interval(),
            gateway: GatewayConfig::default(),
            dispatcher: DispatcherConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl BlastlineConfig {
    /// Load config from the default path (~/.blastline/config.toml).
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
            .map_err(|e| BlastlineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BlastlineError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BlastlineError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Blastline home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".blastline")
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        if self.database_path.is_empty() {
            Self::home_dir().join("blastline.db")
        } else {
            PathBuf::from(&self.database_path)
        }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    7610
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Dispatcher retry and rate-budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Max send attempts per task (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay before the second attempt, doubled per retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Timeout per send attempt; expiry counts as a transient error.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Per-platform budget overrides.
    #[serde(default)]
    pub budgets: Vec<RateBudgetConfig>,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    10_000
}
fn default_send_timeout_secs() -> u64 {
    20
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            budgets: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    /// Rate budget for a platform: configured override or platform default.
    pub fn budget_for(&self, platform: Platform) -> RateBudgetConfig {
        self.budgets
            .iter()
            .find(|b| b.platform == platform)
            .cloned()
            .unwrap_or_else(|| RateBudgetConfig::default_for(platform))
    }
}

/// Per-(platform, sending identity) rate budget. Platforms throttle or ban
/// accounts that send too fast, so both knobs default conservatively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateBudgetConfig {
    pub platform: Platform,
    /// Max concurrent in-flight sends.
    pub max_in_flight: usize,
    /// Minimum gap between send starts.
    pub min_send_gap_ms: u64,
}

impl RateBudgetConfig {
    pub fn default_for(platform: Platform) -> Self {
        let (max_in_flight, min_send_gap_ms) = match platform {
            Platform::WhatsApp => (8, 100),
            Platform::Telegram => (16, 50),
            Platform::Instagram | Platform::Facebook => (8, 100),
        };
        Self {
            platform,
            max_in_flight,
            min_send_gap_ms,
        }
    }
}

/// Channel credentials per platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub meta: Option<MetaConfig>,
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Facebook Graph API access token.
    pub access_token: String,
    /// WhatsApp Phone Number ID — the sending identity.
    pub phone_number_id: String,
    /// Webhook verify token (for incoming receipts).
    #[serde(default)]
    pub webhook_verify_token: String,
}

/// Telegram Bot API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

/// Meta Graph credentials, shared by Facebook Messenger and Instagram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaConfig {
    pub page_access_token: String,
    /// Instagram business account id bound to the page.
    #[serde(default)]
    pub instagram_account_id: String,
    #[serde(default)]
    pub webhook_verify_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BlastlineConfig::default();
        assert_eq!(cfg.sweep_interval_secs, 60);
        assert_eq!(cfg.dispatcher.max_attempts, 3);
        assert_eq!(cfg.gateway.port, 7610);
    }

    #[test]
    fn test_budget_override() {
        let mut cfg = DispatcherConfig::default();
        assert_eq!(cfg.budget_for(Platform::Telegram).max_in_flight, 16);
        cfg.budgets.push(RateBudgetConfig {
            platform: Platform::Telegram,
            max_in_flight: 2,
            min_send_gap_ms: 1000,
        });
        assert_eq!(cfg.budget_for(Platform::Telegram).max_in_flight, 2);
        // other platforms keep their defaults
        assert_eq!(cfg.budget_for(Platform::WhatsApp).max_in_flight, 8);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let cfg: BlastlineConfig = toml::from_str(
            r#"
            sweep_interval_secs = 30

            [channel.telegram]
            bot_token = "123:abc"

            [[dispatcher.budgets]]
            platform = "whatsapp"
            max_in_flight = 4
            min_send_gap_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sweep_interval_secs, 30);
        assert_eq!(cfg.channel.telegram.unwrap().bot_token, "123:abc");
        assert_eq!(cfg.dispatcher.budget_for(Platform::WhatsApp).max_in_flight, 4);
    }
}
