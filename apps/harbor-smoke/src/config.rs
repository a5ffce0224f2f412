//! Environment-backed runtime configuration for `harbor-smoke`.

use std::{env, error::Error, fmt};

use harbor_core::{AudienceTokens, SessionConfig, UserUid};

const DEFAULT_USER: &str = "u-alice";
const DEFAULT_AUDIENCE_TOKENS: &str = "@here,@channel";
const DEFAULT_TYPING_TTL_MS: u64 = 2_500;
const DEFAULT_TIMELINE_MAX_ENTRIES: usize = 1_200;
const DEFAULT_MAX_BODY_LEN: usize = 4_000;

/// Runtime configuration used by the smoke runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// UID the session runs as.
    pub user: String,
    /// Recognized audience mention tokens.
    pub audience_tokens: Vec<String>,
    /// Typing indicator TTL forwarded to the session.
    pub typing_ttl_ms: u64,
    /// Per-channel confirmed-entry retention cap.
    pub timeline_max_entries: usize,
    /// Outgoing message body size cap.
    pub max_body_len: usize,
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
        let user = lookup("HARBOR_USER")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_USER.to_owned());

        let audience_tokens = lookup("HARBOR_AUDIENCE_TOKENS")
            .unwrap_or_else(|| DEFAULT_AUDIENCE_TOKENS.to_owned())
            .split(',')
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>();
        if audience_tokens.iter().any(|token| !token.starts_with('@')) {
            return Err(ConfigError::InvalidValue {
                key: "HARBOR_AUDIENCE_TOKENS",
                value: audience_tokens.join(","),
                reason: "audience tokens must start with '@'".to_owned(),
            });
        }

        let typing_ttl_ms =
            parse_optional_u64("HARBOR_TYPING_TTL_MS", DEFAULT_TYPING_TTL_MS, &mut lookup)?;
        let timeline_max_entries = parse_optional_usize(
            "HARBOR_TIMELINE_MAX_ENTRIES",
            DEFAULT_TIMELINE_MAX_ENTRIES,
            &mut lookup,
        )?;
        let max_body_len =
            parse_optional_usize("HARBOR_MAX_BODY_LEN", DEFAULT_MAX_BODY_LEN, &mut lookup)?;

        if typing_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HARBOR_TYPING_TTL_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if timeline_max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HARBOR_TIMELINE_MAX_ENTRIES",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            user,
            audience_tokens,
            typing_ttl_ms,
            timeline_max_entries,
            max_body_len,
        })
    }

    /// Session configuration carrying these settings.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(UserUid::new(&self.user));
        config.audience_tokens = AudienceTokens::new(self.audience_tokens.iter().cloned());
        config.typing_ttl_ms = self.typing_ttl_ms;
        config.timeline_max_entries = self.timeline_max_entries;
        config.max_body_len = self.max_body_len;
        config
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
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

fn parse_optional_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config_from_pairs(&[]).expect("config should parse");
        assert_eq!(cfg.user, "u-alice");
        assert_eq!(cfg.audience_tokens, vec!["@here", "@channel"]);
        assert_eq!(cfg.typing_ttl_ms, DEFAULT_TYPING_TTL_MS);
        assert_eq!(cfg.timeline_max_entries, DEFAULT_TIMELINE_MAX_ENTRIES);
    }

    #[test]
    fn parses_capability_declared_audience_tokens() {
        let cfg = config_from_pairs(&[("HARBOR_AUDIENCE_TOKENS", "@here, @channel, @everyone")])
            .expect("config should parse");
        assert_eq!(cfg.audience_tokens, vec!["@here", "@channel", "@everyone"]);
    }

    #[test]
    fn rejects_audience_tokens_without_at_prefix() {
        let err = config_from_pairs(&[("HARBOR_AUDIENCE_TOKENS", "@here,everyone")])
            .expect_err("bare token should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "HARBOR_AUDIENCE_TOKENS",
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("HARBOR_TYPING_TTL_MS", "soon")])
            .expect_err("invalid ttl should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "HARBOR_TYPING_TTL_MS",
                ..
            }
        ));

        let err = config_from_pairs(&[("HARBOR_TIMELINE_MAX_ENTRIES", "0")])
            .expect_err("zero cap should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "HARBOR_TIMELINE_MAX_ENTRIES",
                ..
            }
        ));
    }
}
