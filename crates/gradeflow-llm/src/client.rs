// HTTP clients for the supported model providers.
//
// Each client sends one non-streaming chat request and returns the reply
// text. `LlmClient` dispatches over the provider kinds and `LlmGrader` wraps
// it into a `GradingProvider` (prompt in, parsed `GradeResult` out).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use gradeflow_core::config::{Credential, ProviderEndpoints};
use gradeflow_core::{GradeResult, ProviderKind};

use crate::parse::parse_grade_response;
use crate::prompt;
use crate::provider::{GradingProvider, GradingRequest, ProviderError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_VERSION: &str = "2023-06-01";
const TEMPERATURE: f64 = 0.2;
/// Error bodies are cut to this many characters before being surfaced.
const MAX_ERROR_BODY: usize = 300;

// ---------------------------------------------------------------------------
// AnthropicClient
// ---------------------------------------------------------------------------

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: reqwest::Client,
    url: String,
    api_key: Credential,
    model: String,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, url: String, api_key: Credential, model: String) -> Self {
        Self {
            http,
            url,
            api_key,
            model,
        }
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": TEMPERATURE,
            "system": system,
            "messages": [{ "role": "user", "content": user }]
        });

        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let value = read_json(response).await?;
        parse_anthropic_text(&value)
            .ok_or_else(|| ProviderError::Malformed("reply has no text content".into()))
    }
}

// ---------------------------------------------------------------------------
// OpenAiCompatibleClient
// ---------------------------------------------------------------------------

/// Client for OpenAI-style `/chat/completions` endpoints (OpenAI, OpenRouter).
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Credential,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: Credential, model: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": TEMPERATURE,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        let value = read_json(response).await?;
        parse_chat_completion_text(&value)
            .ok_or_else(|| ProviderError::Malformed("reply has no choices[0].message.content".into()))
    }
}

// ---------------------------------------------------------------------------
// OllamaClient
// ---------------------------------------------------------------------------

/// Client for a local Ollama server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(http: reqwest::Client, base_url: String, model: String) -> Self {
        Self {
            http,
            base_url,
            model,
        }
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "options": { "temperature": TEMPERATURE, "num_predict": max_tokens },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let response = self.http.post(url).json(&body).send().await?;
        let value = read_json(response).await?;
        parse_ollama_text(&value)
            .ok_or_else(|| ProviderError::Malformed("reply has no message.content".into()))
    }
}

/// Check whether an Ollama server answers at `base_url`.
pub async fn probe_ollama(http: &reqwest::Client, base_url: &str, timeout: Duration) -> bool {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    match http.get(&url).timeout(timeout).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!("Ollama probe at {url} failed: {e}");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// A configured client for whichever provider is selected.
pub enum LlmClient {
    Ollama(OllamaClient),
    OpenAi(OpenAiCompatibleClient),
    OpenRouter(OpenAiCompatibleClient),
    Anthropic(AnthropicClient),
}

impl LlmClient {
    /// Build the client for `kind`.
    ///
    /// Fails with `MissingCredential` when the provider needs a key and none
    /// was given.
    pub fn for_provider(
        kind: ProviderKind,
        model: &str,
        credential: Option<Credential>,
        endpoints: &ProviderEndpoints,
        http: reqwest::Client,
    ) -> Result<Self, ProviderError> {
        let model = model.to_string();
        let key = || credential.clone().ok_or(ProviderError::MissingCredential(kind));
        let client = match kind {
            ProviderKind::Ollama => {
                LlmClient::Ollama(OllamaClient::new(http, endpoints.ollama_url.clone(), model))
            }
            ProviderKind::OpenAi => LlmClient::OpenAi(OpenAiCompatibleClient::new(
                http,
                endpoints.openai_url.clone(),
                key()?,
                model,
            )),
            ProviderKind::OpenRouter => LlmClient::OpenRouter(OpenAiCompatibleClient::new(
                http,
                endpoints.openrouter_url.clone(),
                key()?,
                model,
            )),
            ProviderKind::Anthropic => LlmClient::Anthropic(AnthropicClient::new(
                http,
                endpoints.anthropic_url.clone(),
                key()?,
                model,
            )),
        };
        Ok(client)
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            LlmClient::Ollama(_) => ProviderKind::Ollama,
            LlmClient::OpenAi(_) => ProviderKind::OpenAi,
            LlmClient::OpenRouter(_) => ProviderKind::OpenRouter,
            LlmClient::Anthropic(_) => ProviderKind::Anthropic,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmClient::Ollama(c) => &c.model,
            LlmClient::OpenAi(c) | LlmClient::OpenRouter(c) => &c.model,
            LlmClient::Anthropic(c) => &c.model,
        }
    }

    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        match self {
            LlmClient::Ollama(c) => c.complete(system, user, max_tokens).await,
            LlmClient::OpenAi(c) | LlmClient::OpenRouter(c) => {
                c.complete(system, user, max_tokens).await
            }
            LlmClient::Anthropic(c) => c.complete(system, user, max_tokens).await,
        }
    }
}

// ---------------------------------------------------------------------------
// LlmGrader
// ---------------------------------------------------------------------------

/// Grades submissions by prompting a model directly.
pub struct LlmGrader {
    client: LlmClient,
    max_tokens: u32,
}

impl LlmGrader {
    pub fn new(client: LlmClient, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }
}

#[async_trait]
impl GradingProvider for LlmGrader {
    fn name(&self) -> String {
        format!("{}/{}", self.client.kind(), self.client.model())
    }

    async fn grade(&self, request: &GradingRequest) -> Result<GradeResult, ProviderError> {
        let system = prompt::system_prompt(&request.rubric, request.syllabus.as_deref());
        let user = prompt::submission_prompt(request);
        debug!(
            "Grading submission {} with {} ({} prompt chars)",
            request.submission_id,
            self.name(),
            system.len() + user.len()
        );
        let reply = self.client.complete(&system, &user, self.max_tokens).await?;
        Ok(parse_grade_response(&reply))
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

async fn read_json(response: reqwest::Response) -> Result<Value, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Concatenate the `text` blocks of a Messages API reply.
///
/// Expected shape: `{ "content": [ { "type": "text", "text": "..." } ] }`
pub(crate) fn parse_anthropic_text(v: &Value) -> Option<String> {
    let blocks = v.get("content")?.as_array()?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Expected shape: `{ "choices": [ { "message": { "content": "..." } } ] }`
pub(crate) fn parse_chat_completion_text(v: &Value) -> Option<String> {
    v.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// Expected shape: `{ "message": { "role": "assistant", "content": "..." } }`
pub(crate) fn parse_ollama_text(v: &Value) -> Option<String> {
    v.get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
