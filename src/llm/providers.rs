// src/llm/providers.rs
//! Concrete chat providers. Each returns the provider's raw SSE body; turning
//! that into client frames is the relay's job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use tracing::debug;

use super::{ByteStream, ChatMessage, ChatProvider};
use crate::error::ProviderError;
use crate::rubric::RUBRIC_TITLES;

const USER_AGENT: &str = concat!("readme-rubric-validator/", env!("CARGO_PKG_VERSION"));

fn http_client() -> Result<reqwest::Client, ProviderError> {
    // No overall timeout: the body is a long-lived stream.
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ProviderError::Request(e.to_string()))
}

async fn post_streaming<B: Serialize + ?Sized>(
    http: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<ByteStream, ProviderError> {
    let resp = http
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| ProviderError::Request(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: body.chars().take(300).collect(),
        });
    }

    Ok(Box::pin(
        resp.bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProviderError::Stream(e.to_string()))),
    ))
}

// ------------------------------------------------------------
// Cloudflare Workers AI
// ------------------------------------------------------------

/// Workers AI REST API (`/accounts/{id}/ai/run/{model}`), events carry `response`.
pub struct WorkersAiProvider {
    http: reqwest::Client,
    api_key: String,
    account_id: String,
    base_url: String,
}

impl WorkersAiProvider {
    pub fn new(
        api_key: String,
        account_id: String,
        base_url: Option<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client()?,
            api_key,
            account_id,
            base_url: base_url
                .unwrap_or_else(|| "https://api.cloudflare.com/client/v4".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

impl ChatProvider for WorkersAiProvider {
    fn open_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Req<'a> {
                messages: &'a [ChatMessage],
                stream: bool,
            }
            let url = format!(
                "{}/accounts/{}/ai/run/{}",
                self.base_url, self.account_id, model
            );
            debug!(%url, messages = messages.len(), "opening Workers AI stream");
            post_streaming(
                &self.http,
                &url,
                &self.api_key,
                &Req {
                    messages,
                    stream: true,
                },
            )
            .await
        })
    }

    fn name(&self) -> &'static str {
        "workers-ai"
    }
}

// ------------------------------------------------------------
// OpenAI-compatible chat completions
// ------------------------------------------------------------

/// Chat Completions API with `stream: true`; events carry `choices[0].delta.content`.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client()?,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

impl ChatProvider for OpenAiProvider {
    fn open_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(ProviderError::Request("missing OpenAI API key".to_string()));
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: &'a [ChatMessage],
                stream: bool,
            }
            let url = format!("{}/chat/completions", self.base_url);
            post_streaming(
                &self.http,
                &url,
                &self.api_key,
                &Req {
                    model,
                    messages,
                    stream: true,
                },
            )
            .await
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled + mock
// ------------------------------------------------------------

/// Never opens a stream; used when AI is disabled in config.
pub struct DisabledProvider;

impl ChatProvider for DisabledProvider {
    fn open_stream<'a>(
        &'a self,
        _model: &'a str,
        _messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ProviderError>> + Send + 'a>> {
        Box::pin(async { Err(ProviderError::Disabled) })
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Scripted provider for tests/local runs. Fails the first `failures` opens,
/// then streams `tokens` in Workers AI framing followed by `[DONE]`.
pub struct MockProvider {
    tokens: Vec<String>,
    failures: usize,
    calls: AtomicUsize,
    last_messages: std::sync::Mutex<Vec<ChatMessage>>,
}

impl MockProvider {
    pub fn new<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            failures: 0,
            calls: AtomicUsize::new(0),
            last_messages: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `n` attempts to open a stream.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.failures = n;
        self
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::<String>::new()).failing_first(usize::MAX)
    }

    /// Deterministic reply: a full six-line checklist, every item passing.
    pub fn canned_validation() -> Self {
        let mut tokens = vec!["## Assignment Validation Results\n\n".to_string()];
        for title in RUBRIC_TITLES {
            tokens.push(format!("- [x] **{title}**: "));
            tokens.push("mock evidence\n".to_string());
        }
        Self::new(tokens)
    }

    /// Number of `open_stream` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages passed on the most recent call (system prompt included).
    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.last_messages
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    fn frames(&self) -> Vec<Result<Bytes, ProviderError>> {
        let mut out: Vec<Result<Bytes, ProviderError>> = self
            .tokens
            .iter()
            .map(|t| {
                let json = serde_json::json!({ "response": t });
                Ok(Bytes::from(format!("data: {json}\n\n")))
            })
            .collect();
        out.push(Ok(Bytes::from_static(b"data: [DONE]\n\n")));
        out
    }
}

impl ChatProvider for MockProvider {
    fn open_stream<'a>(
        &'a self,
        _model: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut g) = self.last_messages.lock() {
                *g = messages.to_vec();
            }
            if n < self.failures {
                return Err(ProviderError::Request(format!("mock failure #{}", n + 1)));
            }
            let s: ByteStream = Box::pin(stream::iter(self.frames()));
            Ok(s)
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
