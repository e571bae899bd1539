use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::security::rate_limit::{RateLimitConfig, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(anyhow!("unknown environment '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    MongoDb,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mongodb" => Ok(StorageBackend::MongoDb),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude" => Ok(ProviderKind::Claude),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(anyhow!("unknown AI provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

const DEFAULT_DATABASE: &str = "chatrelay";

/// Connection settings shared by the server and the operator scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoSettings {
    pub uri: String,
    pub database: String,
}

impl MongoSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_values(env::var("MONGODB_URI").ok(), env::var("MONGODB_DATABASE").ok())
    }

    /// Blank values count as unset.
    pub fn from_values(uri: Option<String>, database: Option<String>) -> Result<Self> {
        let uri = uri
            .filter(|v| !v.trim().is_empty())
            .context("MONGODB_URI must be set when STORAGE_BACKEND is mongodb")?;
        let database = database
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        Ok(Self { uri, database })
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub storage: StorageBackend,
    /// Present when `storage` is `MongoDb`.
    pub mongodb: Option<MongoSettings>,
    pub provider: ProviderKind,
    pub model: ModelSettings,
    pub history_limit: usize,
    pub rate_limit: RateLimitConfig,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.parse::<T>()
        .map_err(|e| anyhow!("invalid value '{}' for {}: {}", raw, name, e))
}

impl Settings {
    /// Read settings from the process environment. Call `dotenvy::dotenv()`
    /// first to pick up a local `.env`.
    pub fn from_env() -> Result<Self> {
        let environment: Environment = parse_var("APP_ENV", "development")?;
        let storage: StorageBackend = parse_var("STORAGE_BACKEND", "mongodb")?;
        let provider: ProviderKind = parse_var("AI_PROVIDER", "gemini")?;

        let mongodb = match storage {
            StorageBackend::MongoDb => Some(MongoSettings::from_env()?),
            StorageBackend::Memory => None,
        };

        let model = match provider {
            ProviderKind::Claude => ModelSettings {
                api_key: env::var("ANTHROPIC_API_KEY")
                    .context("ANTHROPIC_API_KEY must be set when AI_PROVIDER is claude")?,
                model: var_or("CLAUDE_MODEL", "claude-3-5-sonnet-20241022"),
                max_tokens: parse_var("CLAUDE_MAX_TOKENS", "4096")?,
                temperature: parse_var("CLAUDE_TEMPERATURE", "1.0")?,
            },
            ProviderKind::Gemini => ModelSettings {
                api_key: env::var("GEMINI_API_KEY")
                    .context("GEMINI_API_KEY must be set when AI_PROVIDER is gemini")?,
                model: var_or("GEMINI_MODEL", "gemini-1.5-flash-latest"),
                max_tokens: parse_var("GEMINI_MAX_TOKENS", "4096")?,
                temperature: parse_var("GEMINI_TEMPERATURE", "1.0")?,
            },
        };

        let window_secs: u64 =
            parse_var("RATE_LIMIT_WINDOW_SECS", &DEFAULT_WINDOW.as_secs().to_string())?;
        if window_secs == 0 {
            bail!("RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }
        let max_requests: u32 =
            parse_var("RATE_LIMIT_MAX_REQUESTS", &DEFAULT_MAX_REQUESTS.to_string())?;

        Ok(Self {
            environment,
            host: var_or("HOST", "0.0.0.0"),
            port: parse_var("PORT", "3000")?,
            storage,
            mongodb,
            provider,
            model,
            history_limit: parse_var("CONVERSATION_HISTORY_LIMIT", "50")?,
            rate_limit: RateLimitConfig {
                window: Duration::from_secs(window_secs),
                max_requests,
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
