//! Environment-backed runtime configuration for `roomchat-smoke`.

use std::{env, error::Error, fmt};

use backend_core::{Identity, RetryPolicy};
use backend_room::{DEFAULT_FEED_LIMIT, DEFAULT_PAGE_SIZE, RoomSessionConfig};

const DEFAULT_ROOM: &str = "general";
const DEFAULT_USER_EMAIL: &str = "smoke@roomchat.local";
const DEFAULT_RESUBSCRIBE_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

/// Runtime configuration used by the smoke app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Room opened by the smoke run.
    pub room: String,
    /// Rooms listed by the directory refresh. Always contains `room`.
    pub known_rooms: Vec<String>,
    /// Initial feed batch size.
    pub feed_limit: u16,
    /// History page size sent with every `LoadOlder`.
    pub page_size: u16,
    /// Resubscribe attempts after a recoverable feed failure.
    pub resubscribe_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    /// Identity signed in to the in-memory backend.
    pub user_email: String,
    pub user_name: Option<String>,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let room = optional_trimmed_env("ROOMCHAT_ROOM", &mut lookup)
            .unwrap_or_else(|| DEFAULT_ROOM.to_owned());

        let mut known_rooms: Vec<String> = optional_trimmed_env("ROOMCHAT_KNOWN_ROOMS", &mut lookup)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        if !known_rooms.contains(&room) {
            known_rooms.push(room.clone());
        }

        let feed_limit = parse_optional_u16("ROOMCHAT_FEED_LIMIT", &mut lookup)?
            .unwrap_or(DEFAULT_FEED_LIMIT);
        let page_size = parse_optional_u16("ROOMCHAT_PAGE_SIZE", &mut lookup)?
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let resubscribe_attempts = parse_optional_u32("ROOMCHAT_RESUBSCRIBE_ATTEMPTS", &mut lookup)?
            .unwrap_or(DEFAULT_RESUBSCRIBE_ATTEMPTS);
        let retry_base_ms = parse_optional_u64("ROOMCHAT_RETRY_BASE_MS", &mut lookup)?
            .unwrap_or(DEFAULT_RETRY_BASE_MS);
        let retry_max_ms = parse_optional_u64("ROOMCHAT_RETRY_MAX_MS", &mut lookup)?
            .unwrap_or(DEFAULT_RETRY_MAX_MS);

        let user_email = optional_trimmed_env("ROOMCHAT_USER_EMAIL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_USER_EMAIL.to_owned());
        let user_name = optional_trimmed_env("ROOMCHAT_USER_NAME", &mut lookup);

        for (key, value) in [("ROOMCHAT_FEED_LIMIT", feed_limit), ("ROOMCHAT_PAGE_SIZE", page_size)] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
        }
        if page_size < 2 {
            return Err(ConfigError::InvalidValue {
                key: "ROOMCHAT_PAGE_SIZE",
                value: page_size.to_string(),
                reason: "must leave room for the boundary message".to_owned(),
            });
        }
        if retry_max_ms < retry_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "ROOMCHAT_RETRY_MAX_MS",
                value: retry_max_ms.to_string(),
                reason: format!("must be at least ROOMCHAT_RETRY_BASE_MS ({retry_base_ms})"),
            });
        }

        Ok(Self {
            room,
            known_rooms,
            feed_limit,
            page_size,
            resubscribe_attempts,
            retry_base_ms,
            retry_max_ms,
            user_email,
            user_name,
        })
    }

    pub fn session_config(&self) -> RoomSessionConfig {
        RoomSessionConfig::new(self.room.clone())
            .with_feed_limit(self.feed_limit)
            .with_page_size(self.page_size)
            .with_resubscribe(
                self.resubscribe_attempts,
                RetryPolicy::new(self.retry_base_ms, self.retry_max_ms),
            )
    }

    pub fn identity(&self) -> Identity {
        Identity {
            email: self.user_email.clone(),
            display_name: self.user_name.clone(),
            avatar_ref: None,
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u16<F>(key: &'static str, lookup: &mut F) -> Result<Option<u16>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    parse_optional(key, lookup)
}

fn parse_optional_u32<F>(key: &'static str, lookup: &mut F) -> Result<Option<u32>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    parse_optional(key, lookup)
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    parse_optional(key, lookup)
}
