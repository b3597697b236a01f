//! Model gateway actor: chat completions against an OpenAI-compatible
//! endpoint.
//!
//! Agents never touch HTTP directly; they send a `GatewayMsg` and await the
//! reply channel. Tests swap the actor for a scripted responder task on the
//! same channel, which is what keeps the whole agent layer testable without
//! a model.

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::config::GatewayConfig;
use crate::protocol::{ChatMessage, TokenUsage};

/// Messages for the model gateway actor.
#[derive(Debug)]
pub enum GatewayMsg {
    ChatCompletion {
        request: CompletionRequest,
        respond_to: oneshot::Sender<Result<CompletionResponse, String>>,
    },
}

/// One chat completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the configured temperature when set.
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A completed (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Model gateway actor.
pub struct ModelGatewayActor {
    rx: mpsc::Receiver<GatewayMsg>,
    client: reqwest::Client,
    config: GatewayConfig,
}

impl ModelGatewayActor {
    pub fn new(rx: mpsc::Receiver<GatewayMsg>, config: GatewayConfig) -> Self {
        Self {
            rx,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Run the actor's message loop. Requests are served concurrently so
    /// parallel sub-questions do not serialize behind each other.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            let client = self.client.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                match msg {
                    GatewayMsg::ChatCompletion {
                        request,
                        respond_to,
                    } => {
                        let result = chat_completion(&client, &config, request).await;
                        let _ = respond_to.send(result);
                    }
                }
            });
        }

        println!("[ModelGateway] Stopped");
    }
}

async fn chat_completion(
    client: &reqwest::Client,
    config: &GatewayConfig,
    request: CompletionRequest,
) -> Result<CompletionResponse, String> {
    let url = format!(
        "{}/v1/chat/completions",
        config.base_url.trim_end_matches('/')
    );

    let mut body = json!({
        "model": config.model,
        "messages": request.messages,
        "stream": false,
        "temperature": request.temperature.unwrap_or(config.temperature),
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    let mut http_request = client.post(&url).json(&body);
    if let Some(api_key) = &config.api_key {
        http_request = http_request.bearer_auth(api_key);
    }

    let response = http_request
        .send()
        .await
        .map_err(|e| format!("Gateway request failed: {}", e))?;

    let status = response.status();
    if !status.is_success() {
        let err_text = response.text().await.unwrap_or_default();
        return Err(format!("Gateway returned {}: {}", status, err_text));
    }

    let parsed: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse gateway response: {}", e))?;

    let content = parsed["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| format!("Missing content in gateway response: {}", parsed))?
        .to_string();

    let usage = parsed.get("usage").map(|u| TokenUsage {
        prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
    });

    Ok(CompletionResponse { content, usage })
}

/// Send a completion through the gateway channel and await the reply.
pub async fn complete(
    gateway_tx: &mpsc::Sender<GatewayMsg>,
    request: CompletionRequest,
) -> Result<CompletionResponse, String> {
    let (tx, rx) = oneshot::channel();
    gateway_tx
        .send(GatewayMsg::ChatCompletion {
            request,
            respond_to: tx,
        })
        .await
        .map_err(|e| format!("Failed to send completion request: {}", e))?;
    rx.await
        .map_err(|_| "Model gateway actor died".to_string())?
}
