// Environment-backed defaults. Values are read once, after `.env` has been loaded
// by the binary (or by `CoachConfig::from_env`).

use std::env;

lazy_static::lazy_static! {
    pub static ref API_URL: String = env::var("WHY_COACH_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    // Preferred model name; the first available model is used when unset.
    pub static ref PREFERRED_MODEL: Option<String> = env::var("WHY_COACH_MODEL").ok().filter(|m| !m.trim().is_empty());
    pub static ref USER_ID: String = env::var("WHY_COACH_USER_ID").unwrap_or_else(|_| "current".to_string());
}

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8005";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

pub const MODELS_PATH: &str = "/api/v1/ai/providers/all-models";
pub const CHAT_PATH: &str = "/api/v1/ai/providers/chat";
pub const CONVERSATION_TYPE: &str = "whydetector";
