//! Ollama-backed chat provider.
//!
//! Talks to a locally hosted Ollama-compatible server. Model selection is
//! automatic: the first entry of a small priority list that the server has
//! installed wins, falling back to whatever is installed, then to a default
//! id so status lines always have something to show.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ChatModel, Message, ModelInfo, ProviderError, Role, StreamCallback, SYSTEM_PROMPT,
};
use crate::config::AiConfig;

/// Default base URL of the local model server.
pub const OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";

/// Timeout for availability and model listing probes.
const TAGS_TIMEOUT: Duration = Duration::from_secs(3);

/// Preferred models, best first.
const MODEL_PRIORITIES: &[(&str, &str)] = &[
    ("deepseek-coder:6.7b", "DeepSeek 6.7B"),
    ("llama3:8b", "Llama 3 8B"),
    ("deepseek-coder:latest", "DeepSeek"),
    ("llama3:latest", "Llama 3"),
    ("qwen2.5:7b", "Qwen 2.5 7B"),
];

/// Fallback when the server is unreachable or has nothing installed.
const DEFAULT_MODEL: (&str, &str) = ("deepseek-coder:6.7b", "DeepSeek Coder 6.7B");

/// Context message prepended when the caller supplies project context.
const CONTEXT_PREAMBLE: &str =
    "You are Galaxy AI, a senior full-stack engineer. Focus on clean code. Context: \n\n";

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model_override: Option<String>,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self::from_config(&AiConfig::default())
    }

    pub fn from_config(config: &AiConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_override: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// List the model ids the server has installed.
    async fn installed_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(TAGS_TIMEOUT)
            .send()
            .await
            .map_err(|_| ProviderError::Unreachable(self.base_url.clone()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Api(format!(
                "listing models failed with status {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn resolve_model(&self) -> ModelInfo {
        if let Some(id) = &self.model_override {
            return ModelInfo {
                id: id.clone(),
                name: id.split(':').next().unwrap_or(id).to_string(),
            };
        }
        match self.installed_models().await {
            Ok(installed) => pick_model(&installed),
            Err(err) => {
                debug!(%err, "model listing failed, using default");
                ModelInfo {
                    id: DEFAULT_MODEL.0.to_string(),
                    name: DEFAULT_MODEL.1.to_string(),
                }
            }
        }
    }

    /// Full message list for a request: the assistant system prompt, then
    /// the project context (if any), then the conversation.
    fn build_messages(&self, messages: &[Message], project_context: Option<&str>) -> Vec<Message> {
        let mut all = Vec::with_capacity(messages.len() + 2);
        all.push(Message::system(SYSTEM_PROMPT));
        if let Some(ctx) = project_context {
            if !ctx.trim().is_empty() {
                all.push(Message::system(format!("{CONTEXT_PREAMBLE}{ctx}")));
            }
        }
        all.extend_from_slice(messages);
        all
    }

    async fn post_chat(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|_| ProviderError::Unreachable(self.base_url.clone()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(text.chars().take(100).collect()).into());
        }
        Ok(response)
    }

    /// Short single-shot code completion for the given prefix.
    pub async fn predict(&self, code_prefix: &str) -> Result<String> {
        let model = self.resolve_model().await;
        let prompt = format!(
            "Complete this code (provide only the code completion, no explanation):\n\n{code_prefix}"
        );
        let request = GenerateRequest {
            model: &model.id,
            prompt: &prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: 20,
                temperature: 0.1,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|_| ProviderError::Unreachable(self.base_url.clone()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(text.chars().take(100).collect()).into());
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(body.response)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for OllamaProvider {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn is_available(&self) -> bool {
        self.installed_models().await.is_ok()
    }

    async fn model_info(&self) -> ModelInfo {
        self.resolve_model().await
    }

    async fn chat(&self, messages: &[Message], project_context: Option<&str>) -> Result<Message> {
        let model = self.resolve_model().await;
        debug!(model = %model.id, "chat request");
        let all = self.build_messages(messages, project_context);
        let request = ChatRequest {
            model: &model.id,
            messages: &all,
            stream: false,
        };

        let response = self.post_chat(&request).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow::Error::from(ProviderError::InvalidResponse(e.to_string())))?;
        Ok(body.message)
    }

    async fn chat_streaming(
        &self,
        messages: &[Message],
        project_context: Option<&str>,
        mut callback: StreamCallback,
    ) -> Result<Message> {
        let model = self.resolve_model().await;
        debug!(model = %model.id, "streaming chat request");
        let all = self.build_messages(messages, project_context);
        let request = ChatRequest {
            model: &model.id,
            messages: &all,
            stream: true,
        };

        let response = self.post_chat(&request).await?;
        let mut stream = response.bytes_stream();
        let mut pending = String::new();
        let mut content = String::new();

        'outer: while let Some(item) = stream.next().await {
            let bytes = item.map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
            pending.push_str(&String::from_utf8_lossy(&bytes));

            for line in drain_complete_lines(&mut pending) {
                let chunk: ChatStreamChunk = match serde_json::from_str(&line) {
                    Ok(chunk) => chunk,
                    Err(_) => continue,
                };
                if let Some(message) = chunk.message {
                    if !message.content.is_empty() {
                        content.push_str(&message.content);
                        if !callback(&message.content)? {
                            break 'outer;
                        }
                    }
                }
                if chunk.done {
                    break 'outer;
                }
            }
        }

        Ok(Message {
            role: Role::Assistant,
            content,
        })
    }
}

/// Pick the best installed model by priority, falling back to the first
/// installed model, then to the default id.
fn pick_model(installed: &[String]) -> ModelInfo {
    for (id, label) in MODEL_PRIORITIES {
        if installed.iter().any(|m| m == id) {
            return ModelInfo {
                id: id.to_string(),
                name: label.to_string(),
            };
        }
    }
    if let Some(first) = installed.first() {
        return ModelInfo {
            id: first.clone(),
            name: first.split(':').next().unwrap_or("Local Model").to_string(),
        };
    }
    ModelInfo {
        id: DEFAULT_MODEL.0.to_string(),
        name: DEFAULT_MODEL.1.to_string(),
    }
}

/// Remove and return every complete newline-terminated line from `pending`,
/// leaving any partial trailing line in place.
fn drain_complete_lines(pending: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = pending.find('\n') {
        let line: String = pending.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Message,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    done: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}
