use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serenity::all::{ChannelId, RoleId};
use std::fmt;
use std::path::{Path, PathBuf};

/// Trigger used when `FORWARD_PATTERN` is not set.
pub const DEFAULT_PATTERN: &str = r"/(?:911|admin)\b";

/// Text placed in front of every forwarded message.
pub const DEFAULT_ALARM_PREFIX: &str = "🚨 **MEDIC CALL** 🚨\n";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// A required value is absent or blank.
    Missing(&'static str),
    /// A channel or role id is not a valid snowflake.
    InvalidId { key: &'static str, value: String },
    /// A boolean switch could not be parsed.
    InvalidFlag { key: &'static str, value: String },
    /// Invalid regex pattern.
    InvalidRegex { pattern: String, source: regex::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Missing(key) => write!(f, "{} is not set", key),
            Self::InvalidId { key, value } => {
                write!(f, "{} must be a numeric Discord id, got '{}'", key, value)
            }
            Self::InvalidFlag { key, value } => {
                write!(f, "{} must be true or false, got '{}'", key, value)
            }
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid regex pattern '{}': {}", pattern, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Missing(_)
            | Self::InvalidId { .. }
            | Self::InvalidFlag { .. }
            | Self::Validation(_) => None,
        }
    }
}

/// Snowflakes may be written as JSON numbers or strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Snowflake {
    Number(u64),
    Text(String),
}

impl Snowflake {
    fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

/// On-disk shape of the optional JSON config. Every field can be overridden
/// by the matching environment variable.
#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    bot_token: Option<String>,
    game_chat_channel_id: Option<Snowflake>,
    medics_channel_id: Option<Snowflake>,
    forward_pattern: Option<String>,
    medic_role_id: Option<Snowflake>,
    forward_threads: Option<bool>,
    forward_embeds: Option<bool>,
    alarm_prefix: Option<String>,
    log_channel_id: Option<Snowflake>,
    log_dir: Option<String>,
}

pub struct Config {
    pub bot_token: String,
    /// Channel whose messages are inspected.
    pub source_channel: ChannelId,
    /// Channel that receives the alarm.
    pub destination_channel: ChannelId,
    /// Trigger, always compiled case-insensitive.
    pub pattern: Regex,
    pub role_id: Option<RoleId>,
    /// Also accept threads whose parent is the source channel.
    pub include_threads: bool,
    /// Scan embed titles, descriptions, fields and footers.
    pub scan_embeds: bool,
    pub alarm_prefix: String,
    /// Channel mirroring the bot's own log lines.
    pub log_channel: Option<ChannelId>,
    /// Directory for the append-only log file.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Build the config from the process environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load a JSON config file and apply environment overrides on top.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path, source: e })?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup, with no file.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_sources(ConfigFile::default(), lookup)
    }

    fn from_sources<F>(file: ConfigFile, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = var("BOT_TOKEN")
            .or(file.bot_token)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let source_channel = var("GAME_CHAT_CHANNEL_ID")
            .or(file.game_chat_channel_id.map(Snowflake::into_string))
            .ok_or(ConfigError::Missing("GAME_CHAT_CHANNEL_ID"))
            .and_then(|v| parse_id("GAME_CHAT_CHANNEL_ID", &v))
            .map(ChannelId::new)?;

        let destination_channel = var("MEDICS_CHANNEL_ID")
            .or(file.medics_channel_id.map(Snowflake::into_string))
            .ok_or(ConfigError::Missing("MEDICS_CHANNEL_ID"))
            .and_then(|v| parse_id("MEDICS_CHANNEL_ID", &v))
            .map(ChannelId::new)?;

        if source_channel == destination_channel {
            return Err(ConfigError::Validation(format!(
                "GAME_CHAT_CHANNEL_ID and MEDICS_CHANNEL_ID are both {}",
                source_channel
            )));
        }

        let pattern_source = var("FORWARD_PATTERN")
            .or(file.forward_pattern)
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string());
        let pattern = RegexBuilder::new(&pattern_source)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidRegex { pattern: pattern_source, source: e })?;

        let role_id = var("MEDIC_ROLE_ID")
            .or(file.medic_role_id.map(Snowflake::into_string))
            .map(|v| parse_id("MEDIC_ROLE_ID", &v).map(RoleId::new))
            .transpose()?;

        let include_threads = match var("FORWARD_THREADS") {
            Some(v) => parse_flag("FORWARD_THREADS", &v)?,
            None => file.forward_threads.unwrap_or(false),
        };
        let scan_embeds = match var("FORWARD_EMBEDS") {
            Some(v) => parse_flag("FORWARD_EMBEDS", &v)?,
            None => file.forward_embeds.unwrap_or(true),
        };

        // The prefix is taken verbatim so trailing spaces and newlines survive.
        let alarm_prefix = lookup("ALARM_PREFIX")
            .filter(|v| !v.is_empty())
            .or(file.alarm_prefix)
            .unwrap_or_else(|| DEFAULT_ALARM_PREFIX.to_string());

        let log_channel = var("LOG_CHANNEL_ID")
            .or(file.log_channel_id.map(Snowflake::into_string))
            .map(|v| parse_id("LOG_CHANNEL_ID", &v).map(ChannelId::new))
            .transpose()?;

        let log_dir = var("LOG_DIR").or(file.log_dir).map(PathBuf::from);

        Ok(Self {
            bot_token,
            source_channel,
            destination_channel,
            pattern,
            role_id,
            include_threads,
            scan_embeds,
            alarm_prefix,
            log_channel,
            log_dir,
        })
    }

    /// Token safe for logging: first few characters only.
    pub fn masked_token(&self) -> String {
        mask(&self.bot_token)
    }
}

fn mask(secret: &str) -> String {
    let head: String = secret.chars().take(8).collect();
    format!("{head}...")
}

fn parse_id(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(id) if id != 0 => Ok(id),
        _ => Err(ConfigError::InvalidId { key, value: value.to_string() }),
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { key, value: value.to_string() }),
    }
}
