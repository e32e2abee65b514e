//! Service configuration: a TOML file with per-field defaults, then
//! environment overrides.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! day_offset_minutes = 180
//!
//! [telegram]
//! channel = "@readearn"
//!
//! [rewards]
//! spin_max = 400
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::policy::RewardPolicy;

/// Path to the TOML file.
pub const ENV_CONFIG_PATH: &str = "READEARN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {var}: {reason}")]
    Env { var: &'static str, reason: String },
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token. Without it Telegram login, membership checks and
    /// notifications are off.
    pub bot_token: Option<String>,
    /// Channel users must join for the Telegram follow task.
    pub channel: Option<String>,
    /// Web-app URL attached to spin notifications.
    pub spin_url: Option<String>,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            channel: None,
            spin_url: None,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub spin_sweep_interval_secs: u64,
    pub spin_sweep_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            spin_sweep_interval_secs: 900,
            spin_sweep_limit: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: String,

    /// Hex Ed25519 key for capability tokens. Generated per process if absent.
    pub signing_key: Option<String>,

    /// Quiz day boundary, minutes east of UTC.
    pub day_offset_minutes: i32,

    /// Upper bound for every store call.
    pub store_timeout_ms: u64,

    pub access_token_ttl_secs: i64,

    /// Shared secret the companion bot sends in `x-bot-key`.
    pub bot_api_key: Option<String>,

    /// bcrypt cost for email account passwords.
    pub password_hash_cost: u32,

    pub telegram: TelegramConfig,
    pub scheduler: SchedulerConfig,
    pub rewards: RewardPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:8080".to_string(),
            signing_key: None,
            day_offset_minutes: 0,
            store_timeout_ms: 5_000,
            access_token_ttl_secs: crate::crypto::ACCESS_TOKEN_TTL_SECS,
            bot_api_key: None,
            password_hash_cost: crate::password::DEFAULT_PASSWORD_COST,
            telegram: TelegramConfig::default(),
            scheduler: SchedulerConfig::default(),
            rewards: RewardPolicy::default(),
        }
    }
}

impl Config {
    /// File named by `READEARN_CONFIG` (defaults when unset), then process env.
    pub fn load() -> Result<Config, ConfigError> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => load_from_file(path.trim())?,
            _ => Config::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Overrides fields from `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("READEARN_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = get("READEARN_SIGNING_KEY") {
            self.signing_key = Some(v);
        }
        if let Some(v) = get("READEARN_DAY_OFFSET_MINUTES") {
            self.day_offset_minutes = v.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Env {
                    var: "READEARN_DAY_OFFSET_MINUTES",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(v) = get("READEARN_STORE_TIMEOUT_MS") {
            self.store_timeout_ms = v.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Env {
                    var: "READEARN_STORE_TIMEOUT_MS",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(v) = get("READEARN_PASSWORD_COST") {
            self.password_hash_cost = v.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Env {
                    var: "READEARN_PASSWORD_COST",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHANNEL") {
            self.telegram.channel = Some(v);
        }
        if let Some(v) = get("SPIN_URL") {
            self.telegram.spin_url = Some(v);
        }
        if let Some(v) = get("BOT_API_KEY") {
            self.bot_api_key = Some(v);
        }
        Ok(())
    }
}

/// Load config from a TOML file path. Missing keys take their defaults.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let def = Config::default();
        assert_eq!(def.store_timeout_ms, 5_000);
        assert_eq!(def.scheduler.spin_sweep_limit, 3000);
        assert_eq!(def.rewards, RewardPolicy::default());
        assert_eq!(def.password_hash_cost, 10);
    }

    #[test]
    fn test_load_from_file_partial() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            bind_addr = "0.0.0.0:9000"
            day_offset_minutes = 180

            [telegram]
            channel = "@readearn"

            [rewards]
            spin_max = 400
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");
        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.day_offset_minutes, 180);
        assert_eq!(cfg.telegram.channel.as_deref(), Some("@readearn"));
        assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
        assert_eq!(cfg.rewards.spin_max, 400);
        assert_eq!(cfg.rewards.spin_min, 100);
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let err = load_from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("READEARN_BIND_ADDR", "0.0.0.0:1"),
            ("READEARN_DAY_OFFSET_MINUTES", "-300"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("READEARN_PASSWORD_COST", "12"),
            ("BOT_API_KEY", "   "),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).expect("apply");
        assert_eq!(cfg.bind_addr, "0.0.0.0:1");
        assert_eq!(cfg.day_offset_minutes, -300);
        assert_eq!(cfg.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(cfg.password_hash_cost, 12);
        assert_eq!(cfg.bot_api_key, None);
    }

    #[test]
    fn test_env_bad_number() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|k| (k == "READEARN_STORE_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "READEARN_STORE_TIMEOUT_MS",
                ..
            }
        ));
    }
}
