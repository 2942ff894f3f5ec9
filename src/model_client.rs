use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::CoachConfig;
use crate::constants;
use crate::error::{CoachError, Result};
use crate::prompts::PromptMessage;

/// A model offered by the chat-completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub provider_id: String,
    pub server_name: String,
    pub server_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: constants::DEFAULT_TEMPERATURE,
            max_tokens: constants::DEFAULT_MAX_TOKENS,
        }
    }
}

/// Everything needed for one model call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: ModelInfo,
    pub messages: Vec<PromptMessage>,
    pub params: SamplingParams,
}

/// The external chat-completion capability.
///
/// `stream_chat` pushes text fragments into `fragments` in arrival order and
/// returns once the response is complete. When `cancel` fires it must stop
/// sending and return promptly; returning `Ok(())` is fine in that case.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    async fn stream_chat(
        &self,
        request: ChatRequest,
        fragments: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Settings id the chat API expects for a provider.
pub fn provider_settings_id(provider: &str) -> String {
    match provider {
        "ollama" => "ollama_servers_settings",
        "anthropic" => "anthropic_api_settings",
        "openai" => "openai_api_settings",
        "openrouter" => "openrouter_api_settings",
        other => other,
    }
    .to_string()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Pulls the text out of a response payload from any of the supported provider formats.
///
/// Checked in order: plain string, OpenAI `choices[0].message.content` and
/// `choices[0].delta.content`, Ollama `message.content` and `response`, then
/// generic `content` and `text`. Unknown shapes yield an empty string.
pub fn extract_text(data: &Value) -> String {
    if let Some(text) = data.as_str() {
        return text.to_string();
    }

    let known = [
        "/choices/0/message/content",
        "/choices/0/delta/content",
        "/message/content",
        "/response",
    ];
    if let Some(text) = known.iter().find_map(|pointer| str_at(data, pointer)) {
        return text.to_string();
    }

    match data.get("content") {
        Some(Value::String(text)) if !text.is_empty() => return text.clone(),
        Some(Value::Null) | Some(Value::String(_)) | None => {}
        Some(other) => return other.to_string(),
    }

    str_at(data, "/text").unwrap_or_default().to_string()
}

/// Text carried by one line of a streamed response, if any.
///
/// Accepts SSE (`data: {...}`) and bare JSON lines. Blank lines, `[DONE]` and
/// unparseable payloads are skipped.
pub fn parse_stream_line(line: &str) -> Option<String> {
    let line = line.trim();
    let payload = line
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(line);

    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Some(extract_text(&value)).filter(|text| !text.is_empty()),
        Err(e) => {
            debug!(error = %e, "Skipping unparseable stream line");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawModel {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default, alias = "serverName")]
    server_name: Option<String>,
    #[serde(default, alias = "serverId")]
    server_id: Option<String>,
}

impl From<RawModel> for ModelInfo {
    fn from(raw: RawModel) -> Self {
        let provider = raw
            .provider
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "ollama".to_string());
        Self {
            name: raw.name.or(raw.id).unwrap_or_default(),
            provider_id: provider_settings_id(&provider),
            provider,
            server_name: raw.server_name.unwrap_or_else(|| "Unknown Server".to_string()),
            server_id: raw.server_id.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Reads the model list from `{models}`, `{data: {models}}` or a bare array.
pub fn parse_models(body: &Value) -> Vec<ModelInfo> {
    let list = body
        .get("models")
        .or_else(|| body.pointer("/data/models"))
        .or(Some(body))
        .and_then(Value::as_array);

    let Some(list) = list else {
        return Vec::new();
    };

    list.iter()
        .filter_map(|item| match serde_json::from_value::<RawModel>(item.clone()) {
            Ok(raw) => Some(ModelInfo::from(raw)),
            Err(e) => {
                debug!(error = %e, "Skipping malformed model entry");
                None
            }
        })
        .collect()
}

#[derive(Serialize)]
struct ChatBody<'a> {
    provider: &'a str,
    settings_id: &'a str,
    server_id: &'a str,
    model: &'a str,
    messages: &'a [PromptMessage],
    params: &'a SamplingParams,
    stream: bool,
    user_id: &'a str,
    conversation_type: &'static str,
}

/// [`ChatBackend`] talking to the provider-agnostic chat HTTP API.
#[derive(Clone)]
pub struct HttpChatBackend {
    client: Client,
    base_url: String,
    user_id: String,
    streaming: bool,
    stream_timeout: Duration,
    request_timeout: Duration,
}

impl HttpChatBackend {
    pub fn new(config: &CoachConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            streaming: config.streaming,
            stream_timeout: config.stream_timeout,
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn body<'a>(&'a self, request: &'a ChatRequest, stream: bool) -> ChatBody<'a> {
        let model = &request.model;
        ChatBody {
            provider: if model.provider.is_empty() {
                "ollama"
            } else {
                model.provider.as_str()
            },
            settings_id: if model.provider_id.is_empty() {
                "ollama_servers_settings"
            } else {
                model.provider_id.as_str()
            },
            server_id: &model.server_id,
            model: &model.name,
            messages: &request.messages,
            params: &request.params,
            stream,
            user_id: &self.user_id,
            conversation_type: constants::CONVERSATION_TYPE,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        error!(%status, %body, "Chat API request failed");
        Err(CoachError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Forwards the text of one raw line. Returns false once the receiver is gone.
    async fn forward_line(line: &[u8], fragments: &mpsc::Sender<String>) -> bool {
        let line = match std::str::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Skipping stream line with invalid UTF-8");
                return true;
            }
        };
        match parse_stream_line(line) {
            Some(text) => fragments.send(text).await.is_ok(),
            None => true,
        }
    }

    async fn stream_response(
        &self,
        request: &ChatRequest,
        fragments: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let send = self
            .client
            .post(self.url(constants::CHAT_PATH))
            .timeout(self.stream_timeout)
            .json(&self.body(request, true))
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            response = send => response?,
        };
        let response = Self::check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream cancelled, dropping connection");
                    return Ok(());
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        if !Self::forward_line(&line, &fragments).await {
                            return Ok(());
                        }
                    }
                }
                Some(Err(e)) => {
                    error!("Stream error: {}", e);
                    return Err(CoachError::Transport(e));
                }
                None => break,
            }
        }

        if !buffer.is_empty() {
            Self::forward_line(&buffer, &fragments).await;
        }
        Ok(())
    }

    async fn complete_response(
        &self,
        request: &ChatRequest,
        fragments: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let send = self
            .client
            .post(self.url(constants::CHAT_PATH))
            .timeout(self.request_timeout)
            .json(&self.body(request, false))
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            response = send => response?,
        };
        let body: Value = Self::check_status(response).await?.json().await?;

        let text = body
            .get("data")
            .map(extract_text)
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| extract_text(&body));

        if !text.is_empty() {
            let _ = fragments.send(text).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    #[instrument(skip(self))]
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.url(constants::MODELS_PATH))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body: Value = Self::check_status(response).await?.json().await?;
        let models = parse_models(&body);
        info!(count = models.len(), "Loaded models");
        Ok(models)
    }

    #[instrument(skip_all, fields(model = %request.model.name, messages = request.messages.len()))]
    async fn stream_chat(
        &self,
        request: ChatRequest,
        fragments: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.streaming {
            self.stream_response(&request, fragments, cancel).await
        } else {
            self.complete_response(&request, fragments, cancel).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_openai_formats() {
        assert_eq!(extract_text(&json!({"choices": [{"message": {"content": "full"}}]})), "full");
        assert_eq!(extract_text(&json!({"choices": [{"delta": {"content": "part"}}]})), "part");
    }

    #[test]
    fn test_extract_ollama_formats() {
        assert_eq!(extract_text(&json!({"message": {"role": "assistant", "content": "hi"}})), "hi");
        assert_eq!(extract_text(&json!({"response": "gen", "done": false})), "gen");
    }

    #[test]
    fn test_extract_generic_formats() {
        assert_eq!(extract_text(&json!("plain")), "plain");
        assert_eq!(extract_text(&json!({"content": "c"})), "c");
        assert_eq!(extract_text(&json!({"content": ["a", 1]})), "[\"a\",1]");
        assert_eq!(extract_text(&json!({"text": "t"})), "t");
        assert_eq!(extract_text(&json!({"other": 1})), "");
        assert_eq!(extract_text(&Value::Null), "");
    }

    #[test]
    fn test_extract_prefers_earlier_formats() {
        let value = json!({"choices": [{"delta": {"content": "delta"}}], "text": "text"});
        assert_eq!(extract_text(&value), "delta");
        // An empty delta (e.g. a role-only chunk) falls through to the next format.
        let value = json!({"choices": [{"delta": {"content": ""}}], "response": "r"});
        assert_eq!(extract_text(&value), "r");
    }

    #[test]
    fn test_parse_stream_line() {
        assert_eq!(
            parse_stream_line(r#"data: {"choices": [{"delta": {"content": "Hello"}}]}"#),
            Some("Hello".to_string())
        );
        assert_eq!(parse_stream_line(r#"{"response": "bare"}"#), Some("bare".to_string()));
        assert_eq!(parse_stream_line("data: [DONE]"), None);
        assert_eq!(parse_stream_line("   "), None);
        assert_eq!(parse_stream_line("data: {not json"), None);
        assert_eq!(parse_stream_line(r#"data: {"choices": [{"delta": {}}]}"#), None);
    }

    #[test]
    fn test_parse_models_shapes() {
        let wrapped = json!({"models": [{"name": "llama3", "provider": "ollama", "server_name": "Local", "server_id": "s1"}]});
        let nested = json!({"data": {"models": [{"id": "gpt-4o", "provider": "openai", "serverName": "Cloud", "serverId": "s2"}]}});
        let bare = json!([{"name": "mystery"}]);

        let models = parse_models(&wrapped);
        assert_eq!(
            models,
            vec![ModelInfo {
                name: "llama3".into(),
                provider: "ollama".into(),
                provider_id: "ollama_servers_settings".into(),
                server_name: "Local".into(),
                server_id: "s1".into(),
            }]
        );

        let models = parse_models(&nested);
        assert_eq!(models[0].name, "gpt-4o");
        assert_eq!(models[0].provider_id, "openai_api_settings");
        assert_eq!(models[0].server_name, "Cloud");
        assert_eq!(models[0].server_id, "s2");

        let models = parse_models(&bare);
        assert_eq!(models[0].provider, "ollama");
        assert_eq!(models[0].server_name, "Unknown Server");
        assert_eq!(models[0].server_id, "unknown");

        assert!(parse_models(&json!({"status": "ok"})).is_empty());
    }

    #[test]
    fn test_provider_settings_id_passthrough() {
        assert_eq!(provider_settings_id("anthropic"), "anthropic_api_settings");
        assert_eq!(provider_settings_id("openrouter"), "openrouter_api_settings");
        assert_eq!(provider_settings_id("custom"), "custom");
    }

    #[test]
    fn test_sampling_defaults() {
        let params = SamplingParams::default();
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, 2048);
    }
}
