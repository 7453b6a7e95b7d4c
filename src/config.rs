//! Configuration for the Telegram client, the bot and the collector
//!
//! Loads configuration from config.yml file

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default constants (fallback if config.yml not found)
pub const SESSION_NAME: &str = "collector_session";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_REQUESTS: usize = 50;
pub const DEFAULT_MESSAGE_SCAN_LIMIT: usize = 500;
pub const DEFAULT_COMMENT_SCAN_LIMIT: usize = 200;
pub const DEFAULT_REACTION_SCAN_LIMIT: usize = 50;
pub const DEFAULT_MAX_PARTICIPANTS: usize = 1000;
pub const DEFAULT_FLOOD_MAX_RETRIES: u32 = 5;
pub const DEFAULT_FLOOD_MAX_WAIT_SECS: u32 = 900;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    telegram: Option<TelegramConfig>,
    bot: Option<BotConfig>,
    collector: Option<CollectorConfig>,
    cache: Option<CacheConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    api_id: Option<String>,
    api_hash: Option<String>,
    phone: Option<String>,
    session_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BotConfig {
    token: Option<String>,
    #[serde(default)]
    admin_ids: Vec<i64>,
    data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CollectorConfig {
    batch_size: Option<usize>,
    request_delay_ms: Option<u64>,
    max_requests_per_channel: Option<usize>,
    message_scan_limit: Option<usize>,
    comment_scan_limit: Option<usize>,
    reaction_scan_limit: Option<usize>,
    max_participants: Option<usize>,
    flood_max_retries: Option<u32>,
    flood_max_wait_secs: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheConfig {
    enabled: Option<bool>,
    ttl_secs: Option<u64>,
    path: Option<String>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Limits and pacing of the collection engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSettings {
    pub batch_size: usize,
    pub request_delay: Duration,
    pub max_requests_per_channel: usize,
    pub message_scan_limit: usize,
    pub comment_scan_limit: usize,
    pub reaction_scan_limit: usize,
    pub max_participants: usize,
    pub flood_max_retries: u32,
    pub flood_max_wait_secs: u32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            max_requests_per_channel: DEFAULT_MAX_REQUESTS,
            message_scan_limit: DEFAULT_MESSAGE_SCAN_LIMIT,
            comment_scan_limit: DEFAULT_COMMENT_SCAN_LIMIT,
            reaction_scan_limit: DEFAULT_REACTION_SCAN_LIMIT,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            flood_max_retries: DEFAULT_FLOOD_MAX_RETRIES,
            flood_max_wait_secs: DEFAULT_FLOOD_MAX_WAIT_SECS,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub phone: String,
    pub api_id: i32,
    pub api_hash: String,
    pub session_name: String,
    pub bot_token: String,
    pub admin_ids: Vec<i64>,
    pub data_dir: PathBuf,
    pub collector: CollectorSettings,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    /// Environment variables take precedence over config.yml values
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| Self::from_yaml(YamlConfig::default()))
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> String {
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder_name(v) {
                if let Ok(env_val) = std::env::var(var_name) {
                    return env_val;
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return env_val;
        }
        match value {
            Some(v) if placeholder_name(&v).is_some() => String::new(),
            Some(v) => v,
            None => String::new(),
        }
    }

    /// Resolve an integer value from string config or env var.
    /// A literal number in YAML wins over the environment.
    fn resolve_env_i32(value: Option<String>, env_key: &str) -> i32 {
        if let Some(ref v) = value {
            if let Some(var_name) = placeholder_name(v) {
                if let Some(parsed) = std::env::var(var_name).ok().and_then(|s| s.parse().ok()) {
                    return parsed;
                }
            }
            if let Ok(parsed) = v.parse::<i32>() {
                return parsed;
            }
        }
        std::env::var(env_key)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Parse a comma separated id list such as `ADMIN_IDS=1,2,3`
    fn parse_id_list(raw: &str) -> Vec<i64> {
        raw.split(',')
            .filter_map(|id| id.trim().parse::<i64>().ok())
            .collect()
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let yaml: YamlConfig = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(Self::from_yaml(yaml))
    }

    fn from_yaml(yaml: YamlConfig) -> Self {
        let telegram = yaml.telegram.unwrap_or_default();
        let bot = yaml.bot.unwrap_or_default();
        let limits = yaml.collector.unwrap_or_default();
        let cache = yaml.cache.unwrap_or_default();

        let mut admin_ids = bot.admin_ids;
        if let Ok(raw) = std::env::var("ADMIN_IDS") {
            for id in Self::parse_id_list(&raw) {
                if !admin_ids.contains(&id) {
                    admin_ids.push(id);
                }
            }
        }

        let data_dir = PathBuf::from(bot.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()));
        let defaults = CollectorSettings::default();

        Self {
            api_id: Self::resolve_env_i32(telegram.api_id, "TELEGRAM_API_ID"),
            api_hash: Self::resolve_env_string(telegram.api_hash, "TELEGRAM_API_HASH"),
            phone: Self::resolve_env_string(telegram.phone, "TELEGRAM_PHONE"),
            session_name: telegram
                .session_name
                .unwrap_or_else(|| SESSION_NAME.to_string()),
            bot_token: Self::resolve_env_string(bot.token, "BOT_TOKEN"),
            admin_ids,
            collector: CollectorSettings {
                batch_size: limits.batch_size.unwrap_or(defaults.batch_size).max(1),
                request_delay: limits
                    .request_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.request_delay),
                max_requests_per_channel: limits
                    .max_requests_per_channel
                    .unwrap_or(defaults.max_requests_per_channel),
                message_scan_limit: limits
                    .message_scan_limit
                    .unwrap_or(defaults.message_scan_limit),
                comment_scan_limit: limits
                    .comment_scan_limit
                    .unwrap_or(defaults.comment_scan_limit),
                reaction_scan_limit: limits
                    .reaction_scan_limit
                    .unwrap_or(defaults.reaction_scan_limit),
                max_participants: limits.max_participants.unwrap_or(defaults.max_participants),
                flood_max_retries: limits.flood_max_retries.unwrap_or(defaults.flood_max_retries),
                flood_max_wait_secs: limits
                    .flood_max_wait_secs
                    .unwrap_or(defaults.flood_max_wait_secs),
            },
            cache_enabled: cache.enabled.unwrap_or(true),
            cache_ttl: Duration::from_secs(cache.ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            cache_path: cache
                .path
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("cache").join("results.json")),
            data_dir,
        }
    }

    /// Path of the grammers session file
    pub fn session_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.session", self.session_name))
    }

    /// Path of the lock file guarding the session
    pub fn lock_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.lock", self.session_name))
    }

    /// JSON store for users, subscriptions and jobs
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("store.json")
    }

    /// Directory where export files are written
    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Check the values required to talk to Telegram at all
    pub fn validate_telegram(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.api_id == 0 {
            missing.push("TELEGRAM_API_ID");
        }
        if self.api_hash.is_empty() {
            missing.push("TELEGRAM_API_HASH");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!("not set: {}", missing.join(", "))))
        }
    }
}

fn placeholder_name(value: &str) -> Option<&str> {
    if value.starts_with("${") && value.ends_with('}') && value.len() > 3 {
        Some(&value[2..value.len() - 1])
    } else {
        None
    }
}
