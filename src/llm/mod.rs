// src/llm/mod.rs
//! Model invocation layer: chat message types, the provider abstraction,
//! and the retrying invoker that prepends the rubric system prompt.

pub mod invoke;
pub mod providers;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::error::ProviderError;

pub use invoke::ModelInvoker;
pub use providers::{DisabledProvider, MockProvider, OpenAiProvider, WorkersAiProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Raw provider response body: server-sent events, arbitrarily chunked.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Low-level provider: opens one streaming completion. Separated from the
/// invoker so the same retry + prompt logic runs against real and fake backends.
pub trait ChatProvider: Send + Sync + 'static {
    fn open_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, ProviderError>> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynChatProvider = Arc<dyn ChatProvider>;

/// Factory: build a provider according to config.
///
/// * `provider = "mock"` (also forced by `AI_TEST_MODE=mock`) returns the canned mock.
/// * `enabled = false` returns a provider that never opens a stream.
/// * Otherwise Workers AI or OpenAI.
pub fn build_provider(cfg: &ModelConfig) -> Result<DynChatProvider, ProviderError> {
    if cfg.provider == "mock" {
        return Ok(Arc::new(MockProvider::canned_validation()));
    }
    if !cfg.enabled {
        return Ok(Arc::new(DisabledProvider));
    }
    match cfg.provider.as_str() {
        "workers-ai" => {
            let account = cfg.account_id.clone().ok_or_else(|| {
                ProviderError::Request("workers-ai needs an account id".to_string())
            })?;
            Ok(Arc::new(WorkersAiProvider::new(
                cfg.api_key.clone(),
                account,
                cfg.base_url.clone(),
            )?))
        }
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            cfg.api_key.clone(),
            cfg.base_url.clone(),
        )?)),
        other => Err(ProviderError::Request(format!("unsupported provider '{other}'"))),
    }
}
