use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use orderly_core::config::{AppConfig, ModelSpec};
use orderly_core::domain::message::{Message, ToolCall};

use crate::tools::ToolDefinition;

/// One chat-completion call: the rendered system prompt, the full message
/// history, and the tools the model may request.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produces the next assistant message.
    async fn complete(&self, request: CompletionRequest) -> Result<Message>;
}

#[derive(Debug, Error)]
enum ProviderError {
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("network failure: {0}")]
    Network(String),
    #[error("provider rejected credentials")]
    AuthenticationFailed,
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider unavailable ({status}): {body}")]
    Unavailable { status: StatusCode, body: String },
    #[error("provider rejected request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("could not parse provider response: {0}")]
    Parse(String),
}

impl ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network(_) | Self::RateLimited | Self::Unavailable { .. }
        )
    }
}

/// Client for any endpoint speaking the OpenAI chat-completions format
/// (OpenAI itself, Ollama's `/v1` compatibility layer).
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().context("building http client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            max_retries,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let spec = config.agent.model_spec()?;
        if spec.provider.requires_api_key() && config.llm.api_key.is_none() {
            anyhow::bail!(
                "model `{}` needs an API key; set ORDERLY_LLM_API_KEY or llm.api_key",
                config.agent.model
            );
        }

        Self::new(
            config.llm_base_url()?,
            config.llm.api_key.clone(),
            Duration::from_secs(config.llm.timeout_secs),
            config.llm.max_retries,
        )
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send_once(&self, body: &Value) -> Result<Message, ProviderError> {
        let mut request = self.client.post(self.completions_url()).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ProviderError::Timeout { timeout_secs: self.timeout.as_secs() }
            } else {
                ProviderError::Network(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::AuthenticationFailed,
                429 => ProviderError::RateLimited,
                500..=599 => ProviderError::Unavailable { status, body },
                _ => ProviderError::Rejected { status, body },
            });
        }

        let payload: ChatCompletionResponse =
            response.json().await.map_err(|error| ProviderError::Parse(error.to_string()))?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))?;

        Ok(choice.message.into_message())
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Message> {
        let model = match ModelSpec::parse(&request.model) {
            Ok(spec) => spec.model,
            Err(_) => request.model.clone(),
        };
        let body = chat_request_body(&model, &request);

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(message) => {
                    debug!(
                        event_name = "llm.completion.received",
                        model = %model,
                        attempt,
                        tool_calls = message.tool_calls().len(),
                        "completion received"
                    );
                    return Ok(message);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        event_name = "llm.completion.retry",
                        model = %model,
                        attempt,
                        error = %error,
                        "retrying completion"
                    );
                    sleep(Duration::from_millis(500 << attempt.min(6))).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}

fn chat_request_body(model: &str, request: &CompletionRequest) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(json!({ "role": "system", "content": request.system_prompt }));
    messages.extend(request.messages.iter().map(wire_message));

    let mut body = json!({ "model": model, "messages": messages });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    body
}

fn wire_message(message: &Message) -> Value {
    match message {
        Message::System { content } => json!({ "role": "system", "content": content }),
        Message::User { content } => json!({ "role": "user", "content": content }),
        Message::Assistant { content, tool_calls } => {
            let mut wire = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                wire["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            wire
        }
        Message::Tool { tool_call_id, content, .. } => {
            json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content })
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl ChatMessage {
    fn into_message(self) -> Message {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = if call.function.arguments.trim().is_empty() {
                    json!({})
                } else {
                    // Unparseable arguments are passed through and rejected by the handler.
                    serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::String(call.function.arguments))
                };
                ToolCall::new(call.id, call.function.name, arguments)
            })
            .collect::<Vec<_>>();
        let content = self.content.filter(|text| !text.is_empty());

        Message::Assistant { content, tool_calls }
    }
}

/// Replays canned assistant messages in order and records every request.
#[derive(Clone, Default)]
pub struct ScriptedLlmClient {
    responses: Arc<Mutex<VecDeque<Message>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: impl IntoIterator<Item = Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    pub fn push_response(&self, message: Message) {
        match self.responses.lock() {
            Ok(mut responses) => responses.push_back(message),
            Err(poisoned) => poisoned.into_inner().push_back(message),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        match self.responses.lock() {
            Ok(responses) => responses.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Message> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.ok_or_else(|| anyhow::anyhow!("scripted llm client has no responses left"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use orderly_core::domain::message::{Message, ToolCall};

    use super::{
        chat_request_body, ChatCompletionResponse, CompletionRequest, LlmClient, ScriptedLlmClient,
    };
    use crate::tools::declared_tools;

    fn request(messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            model: "openai/gpt-4o-mini".to_string(),
            system_prompt: "be helpful".to_string(),
            messages,
            tools: declared_tools(),
        }
    }

    #[test]
    fn request_body_uses_chat_completions_wire_format() {
        let body = chat_request_body(
            "gpt-4o-mini",
            &request(vec![
                Message::user("one big mac"),
                Message::assistant_tool_calls(vec![ToolCall::new(
                    "call-1",
                    "add_burger_to_cart_tool",
                    json!({ "purchase_burger_item": { "id": 7 } }),
                )]),
                Message::tool_result("call-1", Some("add_burger_to_cart_tool".to_string()), "ok"),
            ]),
        );

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0], json!({ "role": "system", "content": "be helpful" }));
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"purchase_burger_item":{"id":7}}"#
        );
        assert_eq!(
            body["messages"][3],
            json!({ "role": "tool", "tool_call_id": "call-1", "content": "ok" })
        );
        assert_eq!(body["tools"].as_array().map(Vec::len), Some(5));
        assert_eq!(body["tools"][0]["function"]["name"], "purchase_burger_items");
    }

    #[test]
    fn response_tool_call_arguments_are_decoded_from_text() {
        let payload: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {
                            "id": "call-9",
                            "type": "function",
                            "function": { "name": "suggest_burgers", "arguments": "" }
                        },
                        {
                            "id": "call-10",
                            "type": "function",
                            "function": {
                                "name": "add_burger_to_cart_tool",
                                "arguments": "{\"purchase_burger_item\":{\"id\":7}}"
                            }
                        }
                    ]
                }
            }]
        }))
        .expect("decode");

        let message = payload.choices.into_iter().next().expect("choice").message.into_message();
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, json!({}));
        assert_eq!(calls[1].arguments["purchase_burger_item"]["id"], 7);
        assert_eq!(message.text(), None);
    }

    #[tokio::test]
    async fn scripted_client_replays_and_records() {
        let client = ScriptedLlmClient::new([Message::assistant_text("hello")]);

        let reply = client.complete(request(vec![Message::user("hi")])).await.expect("reply");
        assert_eq!(reply.text(), Some("hello"));
        assert_eq!(client.requests().len(), 1);
        assert_eq!(client.remaining(), 0);

        assert!(client.complete(request(Vec::new())).await.is_err());
    }
}
