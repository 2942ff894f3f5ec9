use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants;
use crate::error::{CoachError, Result};

/// Runtime settings for the coach and its HTTP backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CoachConfig {
    pub api_url: String,
    pub preferred_model: Option<String>,
    pub user_id: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// When false the backend asks for one complete response instead of a stream.
    pub streaming: bool,
    pub stream_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            api_url: constants::DEFAULT_API_URL.to_string(),
            preferred_model: None,
            user_id: "current".to_string(),
            temperature: constants::DEFAULT_TEMPERATURE,
            max_tokens: constants::DEFAULT_MAX_TOKENS,
            streaming: true,
            stream_timeout: Duration::from_secs(constants::DEFAULT_STREAM_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(constants::DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| CoachError::Config(format!("{} has an invalid value '{}'", name, raw))),
        _ => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(CoachError::Config(format!("{} has an invalid value '{}'", name, raw))),
        },
        Err(_) => Ok(default),
    }
}

impl CoachConfig {
    /// Loads `.env` (if present) and reads `WHY_COACH_*` variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            api_url: constants::API_URL.trim_end_matches('/').to_string(),
            preferred_model: constants::PREFERRED_MODEL.clone(),
            user_id: constants::USER_ID.clone(),
            temperature: parse_var("WHY_COACH_TEMPERATURE", constants::DEFAULT_TEMPERATURE)?,
            max_tokens: parse_var("WHY_COACH_MAX_TOKENS", constants::DEFAULT_MAX_TOKENS)?,
            streaming: parse_bool("WHY_COACH_STREAMING", true)?,
            stream_timeout: Duration::from_secs(parse_var(
                "WHY_COACH_STREAM_TIMEOUT_SECS",
                constants::DEFAULT_STREAM_TIMEOUT_SECS,
            )?),
            request_timeout: Duration::from_secs(parse_var(
                "WHY_COACH_REQUEST_TIMEOUT_SECS",
                constants::DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        };
        config.validate()?;
        tracing::debug!(?config, "Loaded coach configuration");
        Ok(config)
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_preferred_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CoachError::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(CoachError::Config("max_tokens must be positive".to_string()));
        }
        if self.api_url.is_empty() {
            return Err(CoachError::Config("api url must not be empty".to_string()));
        }
        Ok(())
    }
}
