// Moderation configuration, read from the environment.
//
// Values are kept as the raw strings an operator typed. The typed views
// (threshold, rate limit, id sets) are derived on demand so a bad value is
// reported where it is used instead of aborting the whole load.

use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_AGENTS_SYSTEM_PROMPT: &str = r#"You are a content moderation classifier.
Rate the user's message in four categories: Hate, Sexual, Violence and SelfHarm.
Use a severity from 0 (safe) to 6 (severe) for each category.
Answer with JSON only, in exactly this shape:
{"categoriesAnalysis":[{"category":"Hate","severity":0},{"category":"Sexual","severity":0},{"category":"Violence","severity":0},{"category":"SelfHarm","severity":0}]}"#;

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown moderator type: {0}")]
    UnknownBackend(String),

    #[error("required threshold configuration is unset")]
    ThresholdUnset,

    #[error("could not parse threshold value: '{value}'")]
    InvalidThreshold { value: String },

    #[error("{backend} moderator requires {field}")]
    MissingField {
        backend: &'static str,
        field: &'static str,
    },

    #[error("failed to build classifier: {0}")]
    Classifier(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Hosted content-safety text analysis.
    Azure,
    /// An OpenAI-compatible chat completion endpoint prompted to classify.
    Agents,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Azure => "azure",
            BackendKind::Agents => "agents",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AzureSettings {
    pub endpoint: String,
    pub api_key: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Default)]
pub struct AgentsSettings {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModerationConfig {
    pub enabled: bool,
    pub backend: String,
    pub azure: AzureSettings,
    pub agents: AgentsSettings,
    pub excluded_users: String,
    pub excluded_channels: String,
    pub exclude_direct_messages: bool,
    pub exclude_private_channels: bool,
    pub audit_logging: bool,
    pub rate_limit_per_minute: i64,
}

impl ModerationConfig {
    /// Load from the process environment. Call after `dotenv()`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let flag = |key: &str| {
            lookup(key)
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
                .unwrap_or(false)
        };

        let system_prompt = text("MODERATION_AGENTS_SYSTEM_PROMPT");

        Self {
            enabled: flag("MODERATION_ENABLED"),
            backend: text("MODERATION_TYPE").to_lowercase(),
            azure: AzureSettings {
                endpoint: text("MODERATION_AZURE_ENDPOINT"),
                api_key: text("MODERATION_AZURE_API_KEY"),
                threshold: text("MODERATION_AZURE_THRESHOLD"),
            },
            agents: AgentsSettings {
                endpoint: text("MODERATION_AGENTS_ENDPOINT"),
                api_key: text("MODERATION_AGENTS_API_KEY"),
                model: text("MODERATION_AGENTS_MODEL"),
                system_prompt: if system_prompt.is_empty() {
                    DEFAULT_AGENTS_SYSTEM_PROMPT.to_string()
                } else {
                    system_prompt
                },
                threshold: text("MODERATION_AGENTS_THRESHOLD"),
            },
            excluded_users: text("MODERATION_EXCLUDED_USERS"),
            excluded_channels: text("MODERATION_EXCLUDED_CHANNELS"),
            exclude_direct_messages: flag("MODERATION_EXCLUDE_DIRECT_MESSAGES"),
            exclude_private_channels: flag("MODERATION_EXCLUDE_PRIVATE_CHANNELS"),
            audit_logging: flag("MODERATION_AUDIT_LOGGING"),
            rate_limit_per_minute: text("MODERATION_RATE_LIMIT_PER_MINUTE")
                .parse()
                .unwrap_or(0),
        }
    }

    pub fn backend_kind(&self) -> Result<BackendKind, ConfigError> {
        match self.backend.as_str() {
            "azure" => Ok(BackendKind::Azure),
            "agents" => Ok(BackendKind::Agents),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }

    /// Severity threshold of the selected backend.
    pub fn threshold_value(&self) -> Result<i32, ConfigError> {
        let raw = match self.backend_kind()? {
            BackendKind::Azure => &self.azure.threshold,
            BackendKind::Agents => &self.agents.threshold,
        };

        if raw.is_empty() {
            return Err(ConfigError::ThresholdUnset);
        }

        raw.parse().map_err(|_| ConfigError::InvalidThreshold {
            value: raw.clone(),
        })
    }

    /// Classifier calls per minute; anything non-positive means the default.
    pub fn rate_limit_value(&self) -> u32 {
        if self.rate_limit_per_minute <= 0 {
            return DEFAULT_RATE_LIMIT_PER_MINUTE;
        }
        u32::try_from(self.rate_limit_per_minute).unwrap_or(u32::MAX)
    }

    pub fn excluded_user_set(&self) -> HashSet<u64> {
        parse_id_list(&self.excluded_users)
    }

    pub fn excluded_channel_set(&self) -> HashSet<u64> {
        parse_id_list(&self.excluded_channels)
    }

    /// Everything that must hold before the pipeline can start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kind = self.backend_kind()?;
        self.threshold_value()?;

        let missing = |field: &'static str| ConfigError::MissingField {
            backend: kind.as_str(),
            field,
        };

        match kind {
            BackendKind::Azure => {
                if self.azure.endpoint.is_empty() {
                    return Err(missing("an endpoint"));
                }
                if self.azure.api_key.is_empty() {
                    return Err(missing("an API key"));
                }
            }
            BackendKind::Agents => {
                if self.agents.endpoint.is_empty() {
                    return Err(missing("an endpoint"));
                }
                if self.agents.api_key.is_empty() {
                    return Err(missing("an API key"));
                }
                if self.agents.model.is_empty() {
                    return Err(missing("a model"));
                }
            }
        }
        Ok(())
    }
}

/// Comma-separated ids. Blank entries and anything that isn't an id are skipped.
fn parse_id_list(raw: &str) -> HashSet<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(value = item, "Ignoring invalid id in moderation exclusion list");
                None
            }
        })
        .collect()
}
