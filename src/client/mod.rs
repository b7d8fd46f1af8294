// src/client/mod.rs
//! HTTP client for the validator API: drives a full validation (fetch, poll,
//! stream the rubric reply, persist the conversation), follow-up questions, and
//! reopening a stored conversation.

pub mod poll;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::checklist::ValidationReport;
use crate::error::ClientError;
use crate::fetcher::FetchResult;
use crate::llm::{ChatMessage, Role};
use crate::relay::{FrameAccumulator, SseDecoder};
use crate::rubric::{
    is_validation_reply, is_validation_request, validation_request, ConversationMode,
};
use crate::store::StoredMessage;
use crate::workflow::{WorkflowState, WorkflowStatus};

pub use poll::{poll_until_complete, spawn_poll, PollPolicy, PollTask, StatusSource};

/// Shown instead of an assistant reply when a follow-up chat fails.
pub const CHAT_FAILURE_REPLY: &str = "Sorry, there was an error processing your request.";

/// Result of [`ValidatorClient::validate`].
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub reply: String,
    pub report: ValidationReport,
}

/// A stored conversation reopened by [`ValidatorClient::resume`].
#[derive(Debug, Clone, Default)]
pub struct ResumedConversation {
    /// Re-parsed rubric reply, when the conversation holds one.
    pub report: Option<ValidationReport>,
    /// Follow-up turns in stored order, validation request and reply excluded.
    pub turns: Vec<ChatMessage>,
}

/// Conversation id for a repository: its last path segment, `"unknown"` when empty.
pub fn conversation_id_for(repository_url: &str) -> String {
    repository_url
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[derive(Clone)]
pub struct ValidatorClient {
    http: reqwest::Client,
    base: String,
    model: Option<String>,
    policy: PollPolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchBody<'a> {
    repository_url: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchStarted {
    workflow_id: Uuid,
}

#[derive(Deserialize)]
struct StatusBody {
    status: WorkflowState,
    #[serde(default)]
    result: Option<FetchResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct ChatConfigBody<'a> {
    model: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    messages: &'a [ChatMessage],
    mode: ConversationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ChatConfigBody<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveBody<'a> {
    conversation_id: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct MessagesBody {
    messages: Vec<StoredMessage>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl ValidatorClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .build()?;
        Ok(Self {
            http,
            base: base_url.into().trim_end_matches('/').to_string(),
            model: None,
            policy: PollPolicy::default(),
        })
    }

    /// Model to request; the server default is used otherwise.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Turn non-2xx responses into [`ClientError::Rejected`] carrying the `{error}` text.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn start_fetch(&self, repository_url: &str) -> Result<Uuid, ClientError> {
        let resp = self
            .http
            .post(self.url("/fetch-readme"))
            .json(&FetchBody { repository_url })
            .send()
            .await?;
        let started: FetchStarted = Self::check(resp).await?.json().await?;
        info!(workflow = %started.workflow_id, repository_url, "fetch workflow started");
        Ok(started.workflow_id)
    }

    /// One status request. Malformed bodies surface as [`ClientError::Workflow`].
    pub async fn status(&self, id: Uuid) -> Result<WorkflowStatus, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/fetch-readme/status/{id}")))
            .send()
            .await?;
        let body: StatusBody = Self::check(resp).await?.json().await?;
        match (body.status, body.result, body.error) {
            (WorkflowState::Running, _, _) => Ok(WorkflowStatus::Running),
            (WorkflowState::Completed, Some(r), _) => Ok(WorkflowStatus::Completed(r)),
            (WorkflowState::Errored, _, e) => Ok(WorkflowStatus::Errored(
                e.unwrap_or_else(|| "workflow errored".to_string()),
            )),
            (WorkflowState::Completed, None, _) => Err(ClientError::Workflow(
                "completed workflow without a result".to_string(),
            )),
        }
    }

    /// Send a chat turn and collect the streamed reply.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        mode: ConversationMode,
    ) -> Result<String, ClientError> {
        let body = ChatBody {
            messages,
            mode,
            config: self.model.as_deref().map(|model| ChatConfigBody { model }),
        };
        let resp = self.http.post(self.url("/chat")).json(&body).send().await?;
        let resp = Self::check(resp).await?;

        let mut decoder = SseDecoder::new();
        let mut acc = FrameAccumulator::new();
        let mut chunks = resp.bytes_stream();
        'read: while let Some(chunk) = chunks.next().await {
            for data in decoder.feed(&chunk?) {
                if acc.push_data(&data) {
                    break 'read;
                }
            }
        }
        if !acc.is_done() {
            for data in decoder.finish() {
                acc.push_data(&data);
            }
        }
        Ok(acc.into_text())
    }

    pub async fn load_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/messages/{conversation_id}")))
            .send()
            .await?;
        let body: MessagesBody = Self::check(resp).await?.json().await?;
        Ok(body.messages.iter().map(StoredMessage::to_chat).collect())
    }

    pub async fn save_history(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(self.url("/messages"))
            .json(&SaveBody {
                conversation_id,
                messages,
            })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn clear(&self, conversation_id: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(self.url(&format!("/messages/{conversation_id}")))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Fetch the README, run the rubric, and store `[user, assistant]` as the
    /// conversation. Fetch and poll failures abort before any chat request.
    pub async fn validate(
        &self,
        conversation_id: &str,
        repository_url: &str,
    ) -> Result<ValidationOutcome, ClientError> {
        let id = self.start_fetch(repository_url).await?;
        let readme = spawn_poll(Arc::new(self.clone()), id, self.policy)
            .join()
            .await?;

        let messages = vec![ChatMessage::new(
            Role::User,
            validation_request(repository_url, &readme),
        )];
        let reply = self.chat(&messages, ConversationMode::Validation).await?;
        let report = ValidationReport::from_text(&reply);
        info!(
            repository_url,
            passed = report.passed_count(),
            total = report.total(),
            "validation finished"
        );

        let mut history = messages;
        history.push(ChatMessage::new(Role::Assistant, reply.clone()));
        self.save_history(conversation_id, &history).await?;

        Ok(ValidationOutcome { reply, report })
    }

    /// Reopen a stored conversation. An unknown id gives no report and no turns.
    pub async fn resume(&self, conversation_id: &str) -> Result<ResumedConversation, ClientError> {
        let history = self.load_history(conversation_id).await?;
        let resumed = ResumedConversation::from_history(history);
        info!(
            conversation_id,
            has_report = resumed.report.is_some(),
            turns = resumed.turns.len(),
            "conversation resumed"
        );
        Ok(resumed)
    }

    /// Ask a follow-up in an existing conversation. A failed chat yields
    /// [`CHAT_FAILURE_REPLY`] and leaves the stored history untouched.
    pub async fn follow_up(&self, conversation_id: &str, question: &str) -> Result<String, ClientError> {
        let mut history = self.load_history(conversation_id).await?;
        history.push(ChatMessage::new(Role::User, question));

        match self.chat(&history, ConversationMode::FollowUp).await {
            Ok(reply) => {
                history.push(ChatMessage::new(Role::Assistant, reply.clone()));
                self.save_history(conversation_id, &history).await?;
                Ok(reply)
            }
            Err(e) => {
                warn!(error = %e, conversation_id, "follow-up chat failed");
                Ok(CHAT_FAILURE_REPLY.to_string())
            }
        }
    }
}

impl ResumedConversation {
    /// Split stored history into the rubric reply and the follow-up turns.
    /// The first non-request message that looks like a rubric reply is the report.
    pub fn from_history(history: Vec<ChatMessage>) -> Self {
        let mut out = Self::default();
        for m in history {
            if is_validation_request(&m.content) {
                continue;
            }
            if is_validation_reply(&m.content) {
                if out.report.is_none() {
                    out.report = Some(ValidationReport::from_text(&m.content));
                }
                continue;
            }
            out.turns.push(m);
        }
        out
    }
}

#[async_trait::async_trait]
impl StatusSource for ValidatorClient {
    async fn status(&self, id: Uuid) -> Result<WorkflowStatus, ClientError> {
        ValidatorClient::status(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_the_repository_name() {
        assert_eq!(conversation_id_for("https://github.com/acme/cf_ai_demo"), "cf_ai_demo");
        assert_eq!(conversation_id_for("https://github.com/acme/cf_ai_demo/"), "cf_ai_demo");
        assert_eq!(conversation_id_for(""), "unknown");
    }

    #[test]
    fn history_splits_into_report_and_turns() {
        let history = vec![
            ChatMessage::new(Role::User, validation_request("u", "- [ ] readme todo")),
            ChatMessage::new(Role::Assistant, "- [x] **LLM/AI Engine**: Llama 3.3"),
            ChatMessage::new(Role::User, "What is D1?"),
            ChatMessage::new(Role::Assistant, "A SQL database."),
        ];
        let resumed = ResumedConversation::from_history(history);
        let report = resumed.report.expect("report");
        assert_eq!(report.total(), 1);
        assert!(report.all_passed());
        assert_eq!(
            resumed.turns,
            vec![
                ChatMessage::new(Role::User, "What is D1?"),
                ChatMessage::new(Role::Assistant, "A SQL database."),
            ]
        );
    }

    #[test]
    fn plain_chat_has_no_report() {
        let resumed =
            ResumedConversation::from_history(vec![ChatMessage::new(Role::User, "hello")]);
        assert!(resumed.report.is_none());
        assert_eq!(resumed.turns.len(), 1);
    }
}
