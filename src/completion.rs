// src/completion.rs
//! Completion interface: provider abstraction + throttling + rate-limit retry.
//!
//! The pipeline never talks to a model vendor directly; it consumes this
//! trait. Absence of credentials is not an error: the disabled client returns
//! an empty `content` and callers fall back to their empty-result sentinel,
//! so an unconfigured deployment still produces a valid (under-populated)
//! import record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Result of one completion call. `content` is the raw model text (expected
/// to be a strict JSON object); `error` carries a non-fatal diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Completion {
    pub fn empty(error: impl Into<String>) -> Self {
        Self {
            content: None,
            error: Some(error.into()),
        }
    }
}

/// Trait object used by extraction and resolution.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one system+user exchange. Must request deterministic
    /// (temperature 0), strict-JSON-object output. Never returns Err;
    /// failures surface as `Completion::empty(...)`.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Completion;

    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynCompletionClient = Arc<dyn CompletionClient>;

/// Factory: build a client from the environment.
///
/// * If `IMPORT_TEST_MODE=mock`, a deterministic mock client.
/// * Else if `OPENAI_API_KEY` is set, the OpenAI-compatible provider wrapped
///   with throttling + retry.
/// * Else a disabled client (safe empty sentinel).
pub fn build_completion_client() -> DynCompletionClient {
    if std::env::var("IMPORT_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockCompletion::fixed(r#"{"facts": []}"#));
    }
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => {
            Arc::new(ThrottledClient::new(OpenAiCompletion::new(key, None), ThrottleParams::default()))
        }
        _ => Arc::new(DisabledCompletion),
    }
}

// ------------------------------------------------------------
// Concrete providers
// ------------------------------------------------------------

/// Always returns the empty sentinel; used when no credentials exist.
pub struct DisabledCompletion;

#[async_trait]
impl CompletionClient for DisabledCompletion {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Completion {
        Completion::empty("completion disabled: no credentials")
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Scripted mock for tests: returns canned responses in order, repeating the
/// last one when the script runs out.
pub struct MockCompletion {
    script: std::sync::Mutex<Vec<String>>,
    last: String,
}

impl MockCompletion {
    pub fn fixed(response: &str) -> Self {
        Self {
            script: std::sync::Mutex::new(Vec::new()),
            last: response.to_string(),
        }
    }

    pub fn scripted(responses: Vec<String>) -> Self {
        let last = responses.last().cloned().unwrap_or_default();
        let mut script = responses;
        script.reverse(); // pop() from the front
        Self {
            script: std::sync::Mutex::new(script),
            last,
        }
    }
}

#[async_trait]
impl CompletionClient for MockCompletion {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Completion {
        let next = self
            .script
            .lock()
            .expect("poisoned mock script")
            .pop()
            .unwrap_or_else(|| self.last.clone());
        Completion {
            content: Some(next),
            error: None,
        }
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// OpenAI-compatible chat provider. Requests temperature 0 and a strict JSON
/// object response.
pub struct OpenAiCompletion {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiCompletion {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("advance-import/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: model_override.unwrap_or("gpt-4o-mini").to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Custom base URL for integration testing.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn call_once(&self, system_prompt: &str, user_prompt: &str) -> Result<String, CallError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat<'a>,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system_prompt,
                },
                Msg {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let hint = retry_after_hint(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::RateLimited {
                hint: hint.or_else(|| parse_retry_after_text(&body)),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::Transport(format!("HTTP {status}: {body}")));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CallError::Transport("empty choices".to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
enum CallError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rate limited")]
    RateLimited { hint: Option<Duration> },
}

fn retry_after_hint(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Providers also say things like "Please retry after 7 seconds" in the body.
fn parse_retry_after_text(body: &str) -> Option<Duration> {
    static RE: Lazy<regex::Regex> =
        Lazy::new(|| regex::Regex::new(r"(?i)(?:retry|try\s+again).{0,20}?(\d+(?:\.\d+)?)\s*s").unwrap());
    RE.captures(body)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|s| Duration::from_millis((s * 1000.0) as u64))
}

// ------------------------------------------------------------
// Throttling + retry wrapper
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ThrottleParams {
    /// Minimum spacing between calls.
    pub min_interval: Duration,
    /// Base delay for the exponential rate-limit backoff.
    pub retry_base: Duration,
    /// Rate-limit retries before giving up.
    pub max_retries: usize,
}

impl Default for ThrottleParams {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            retry_base: Duration::from_secs(2),
            max_retries: 3,
        }
    }
}

/// Wraps a provider with minimum inter-call spacing and exponential backoff
/// (with jitter) on rate-limit responses, honoring provider retry-after
/// hints when present.
pub struct ThrottledClient {
    inner: OpenAiCompletion,
    params: ThrottleParams,
    last_call: Mutex<Option<Instant>>,
}

impl ThrottledClient {
    pub fn new(inner: OpenAiCompletion, params: ThrottleParams) -> Self {
        Self {
            inner,
            params,
            last_call: Mutex::new(None),
        }
    }

    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.params.min_interval {
                tokio::time::sleep(self.params.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl CompletionClient for ThrottledClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Completion {
        self.pace().await;

        // Backoff schedule: base, 2*base, 4*base... with jitter, capped.
        let mut schedule = ExponentialBackoff::from_millis(2)
            .factor(self.params.retry_base.as_millis() as u64 / 2)
            .max_delay(Duration::from_secs(60))
            .map(jitter)
            .take(self.params.max_retries);

        loop {
            match self.inner.call_once(system_prompt, user_prompt).await {
                Ok(content) => {
                    return Completion {
                        content: Some(content),
                        error: None,
                    }
                }
                Err(CallError::RateLimited { hint }) => {
                    let Some(backoff) = schedule.next() else {
                        tracing::warn!("rate limit retries exhausted");
                        return Completion::empty("rate limit retries exhausted");
                    };
                    let delay = hint.unwrap_or(backoff);
                    tracing::info!(delay_ms = delay.as_millis() as u64, "rate limited; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e @ CallError::Transport(_)) => {
                    tracing::warn!(error = %e, "completion call failed");
                    return Completion::empty(e.to_string());
                }
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
