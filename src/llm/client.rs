//! LLM client for API communication

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Response from LLM
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated content
    pub content: String,
}

/// Anything that can turn a prompt into a completion
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the prompt
    async fn complete(&self, prompt: &str) -> Result<LlmResponse>;

    /// Model identifier for logs and stored summaries
    fn model_name(&self) -> &str;
}

/// Configuration for LLM client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// API key (optional)
    pub api_key: Option<String>,
    /// Maximum tokens for response
    pub max_tokens: usize,
    /// Temperature for generation
    pub temperature: f32,
    /// Additional attempts after a failed request
    pub max_retries: usize,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            max_tokens: 4096,
            temperature: 0.1,
            max_retries: 2,
            timeout: Duration::from_secs(120),
        }
    }
}

impl LlmConfig {
    fn is_ollama(&self) -> bool {
        self.endpoint.contains("11434")
    }
}

/// LLM client for Ollama and OpenAI-compatible endpoints
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { config, client })
    }

    /// Check if the LLM service is available
    pub async fn is_available(&self) -> bool {
        let url = if self.config.is_ollama() {
            format!("{}/api/tags", self.config.endpoint)
        } else {
            format!("{}/v1/models", self.config.endpoint)
        };

        matches!(
            self.client.get(&url).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    /// Generate a single completion without retrying
    async fn complete_once(&self, prompt: &str) -> Result<LlmResponse> {
        if self.config.is_ollama() {
            self.complete_ollama(prompt).await
        } else {
            self.complete_openai(prompt).await
        }
    }

    /// Generate completion using Ollama API
    async fn complete_ollama(&self, prompt: &str) -> Result<LlmResponse> {
        let url = format!("{}/api/generate", self.config.endpoint);

        let request = OllamaGenerateRequest {
            model: &self.config.model,
            prompt,
            system: super::prompts::SYSTEM_PROMPT,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens as i32,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama request failed: {} - {}", status, body);
        }

        let result: OllamaGenerateResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(LlmResponse {
            content: result.response,
        })
    }

    /// Generate completion using OpenAI-compatible API
    async fn complete_openai(&self, prompt: &str) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);

        let request = OpenAIChatRequest {
            model: &self.config.model,
            messages: [
                OpenAIMessage {
                    role: "system",
                    content: super::prompts::SYSTEM_PROMPT,
                },
                OpenAIMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut req_builder = self.client.post(&url).json(&request);

        if let Some(ref key) = self.config.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder
            .send()
            .await
            .context("Failed to send request to OpenAI-compatible API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI request failed: {} - {}", status, body);
        }

        let result: OpenAIChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;

        let content = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("OpenAI response contained no choices")?;

        Ok(LlmResponse { content })
    }

    /// Generate completion, retrying with linear back-off
    async fn complete_with_retry(&self, prompt: &str, max_retries: usize) -> Result<LlmResponse> {
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match self.complete_once(prompt).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!("LLM request failed (attempt {}): {:#}", attempt + 1, e);
                    last_error = Some(e);

                    if attempt < max_retries {
                        tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
    }
}

#[async_trait::async_trait]
impl LlmProvider for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        self.complete_with_retry(prompt, self.config.max_retries).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Wire types, limited to the fields micacheck sends or reads

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: [OpenAIMessage<'a>; 2],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIReply,
}

#[derive(Deserialize)]
struct OpenAIReply {
    content: String,
}

/// Mock LLM client for testing
///
/// Queued responses are served first, in order. After that the first
/// substring rule matching the prompt wins, falling back to an empty array.
pub struct MockLlmClient {
    rules: Vec<(String, std::result::Result<String, String>)>,
    queue: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            queue: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Add a mock response
    pub fn add_response(&mut self, prompt_contains: &str, response: &str) {
        self.rules
            .push((prompt_contains.to_string(), Ok(response.to_string())));
    }

    /// Fail every prompt containing the substring
    pub fn add_failure(&mut self, prompt_contains: &str, message: &str) {
        self.rules
            .push((prompt_contains.to_string(), Err(message.to_string())));
    }

    /// Queue a response for the next call
    pub fn push_response(&self, response: &str) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Ok(response.to_string()));
        }
    }

    /// Sleep before answering each prompt
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn answer(&self, prompt: &str) -> std::result::Result<String, String> {
        if let Some(queued) = self.queue.lock().ok().and_then(|mut q| q.pop_front()) {
            return queued;
        }

        self.rules
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Ok("[]".to_string()))
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockLlmClient {
    async fn complete(&self, prompt: &str) -> Result<LlmResponse> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.answer(prompt) {
            Ok(content) => Ok(LlmResponse { content }),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
