// src/llm/invoke.rs
use metrics::counter;
use tracing::{info, warn};

use super::{ByteStream, ChatMessage, DynChatProvider, Role};
use crate::error::{ModelInvocationError, ProviderError};
use crate::retry::first_success;
use crate::rubric::ConversationMode;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Opens model streams with a bounded number of attempts.
///
/// Only the *opening* of a stream is retried; once tokens flow, a broken
/// stream is the relay's problem.
#[derive(Clone)]
pub struct ModelInvoker {
    provider: DynChatProvider,
    max_attempts: u32,
}

impl ModelInvoker {
    pub fn new(provider: DynChatProvider, max_attempts: u32) -> Self {
        Self {
            provider,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Prepend the mode's system prompt, then open the stream.
    pub async fn invoke(
        &self,
        messages: &[ChatMessage],
        mode: ConversationMode,
        model: &str,
    ) -> Result<ByteStream, ModelInvocationError> {
        let outgoing = with_system_prompt(messages, mode);
        let provider = &self.provider;

        let res = first_success(1..=self.max_attempts, |attempt| {
            let outgoing = &outgoing;
            async move {
                counter!("model_invoke_attempts_total").increment(1);
                match provider.open_stream(model, outgoing).await {
                    Ok(s) => Ok(s),
                    Err(e) => {
                        warn!(attempt, provider = provider.name(), error = %e, "model stream failed to open");
                        Err(e)
                    }
                }
            }
        })
        .await;

        match res {
            Ok(stream) => {
                info!(provider = provider.name(), model, ?mode, "model stream opened");
                Ok(stream)
            }
            Err(exhausted) => {
                counter!("model_invoke_failures_total").increment(1);
                Err(ModelInvocationError {
                    attempts: exhausted.attempts,
                    source: exhausted
                        .last
                        .unwrap_or_else(|| ProviderError::Request("Problem with model".to_string())),
                })
            }
        }
    }
}

/// Outgoing sequence: the mode's system prompt followed by `messages`.
pub fn with_system_prompt(messages: &[ChatMessage], mode: ConversationMode) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::new(Role::System, mode.system_prompt()));
    out.extend_from_slice(messages);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::rubric::{FOLLOW_UP_PROMPT, VALIDATION_PROMPT};
    use std::sync::Arc;

    fn user(text: &str) -> ChatMessage {
        ChatMessage::new(Role::User, text)
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let mock = Arc::new(MockProvider::new(["ok"]).failing_first(2));
        let inv = ModelInvoker::new(mock.clone(), DEFAULT_MAX_ATTEMPTS);
        let res = inv
            .invoke(&[user("hi")], ConversationMode::Validation, "m")
            .await;
        assert!(res.is_ok());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let mock = Arc::new(MockProvider::always_failing());
        let inv = ModelInvoker::new(mock.clone(), DEFAULT_MAX_ATTEMPTS);
        let err = inv
            .invoke(&[user("hi")], ConversationMode::FollowUp, "m")
            .await
            .err()
            .expect("must fail");
        assert_eq!(err.attempts, 3);
        assert_eq!(mock.calls(), 3);
        assert!(err.to_string().contains("mock failure #3"));
    }

    #[tokio::test]
    async fn system_prompt_is_prepended_by_mode() {
        let mock = Arc::new(MockProvider::new(["ok"]));
        let inv = ModelInvoker::new(mock.clone(), 1);

        let history = [user("GITHUB_URL: x")];
        inv.invoke(&history, ConversationMode::Validation, "m")
            .await
            .unwrap();
        let sent = mock.last_messages();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent[0].content, VALIDATION_PROMPT);
        assert_eq!(sent[1], history[0]);

        inv.invoke(&history, ConversationMode::FollowUp, "m")
            .await
            .unwrap();
        assert_eq!(mock.last_messages()[0].content, FOLLOW_UP_PROMPT);
    }
}
