// src/fetcher.rs
//! README content fetcher: repository URL -> raw README text.
//!
//! Tries `<raw>/<owner>/<repo>/main/README.md`, then `.../master/README.md`.
//! Every failure is folded into [`FetchResult::Failed`]; nothing escapes.

use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::FetcherConfig;
use crate::error::FetchError;
use crate::retry::first_success;

/// Branches tried in order. No other names are attempted.
pub const BRANCHES: [&str; 2] = ["main", "master"];

const USER_AGENT: &str = concat!("readme-rubric-validator/", env!("CARGO_PKG_VERSION"));

/// Terminal outcome of one fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "FetchResultWire", try_from = "FetchResultWire")]
pub enum FetchResult {
    Fetched { content: String, source_url: String },
    Failed { error: String },
}

impl FetchResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, FetchResult::Fetched { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            FetchResult::Fetched { content, .. } => Some(content),
            FetchResult::Failed { .. } => None,
        }
    }
}

/// JSON shape: `{content, sourceUrl, succeeded, error}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FetchResultWire {
    content: Option<String>,
    source_url: Option<String>,
    succeeded: bool,
    error: Option<String>,
}

impl From<FetchResult> for FetchResultWire {
    fn from(r: FetchResult) -> Self {
        match r {
            FetchResult::Fetched {
                content,
                source_url,
            } => Self {
                content: Some(content),
                source_url: Some(source_url),
                succeeded: true,
                error: None,
            },
            FetchResult::Failed { error } => Self {
                content: None,
                source_url: None,
                succeeded: false,
                error: Some(error),
            },
        }
    }
}

impl TryFrom<FetchResultWire> for FetchResult {
    type Error = String;

    fn try_from(w: FetchResultWire) -> Result<Self, Self::Error> {
        match w {
            FetchResultWire {
                succeeded: true,
                content: Some(content),
                source_url: Some(source_url),
                ..
            } => Ok(FetchResult::Fetched {
                content,
                source_url,
            }),
            FetchResultWire {
                succeeded: false,
                error: Some(error),
                content: None,
                source_url: None,
            } => Ok(FetchResult::Failed { error }),
            _ => Err("inconsistent fetch result".to_string()),
        }
    }
}

/// Anything that can turn a repository URL into a [`FetchResult`].
#[async_trait::async_trait]
pub trait ReadmeSource: Send + Sync {
    async fn fetch(&self, repository_url: &str) -> FetchResult;
}

/// Derive the raw README URL for `branch`.
///
/// The host must be the configured repository host; `blob` and empty path
/// segments are dropped.
pub fn raw_readme_url(cfg: &FetcherConfig, repository_url: &str, branch: &str) -> Result<String, FetchError> {
    let invalid = |reason: &str| FetchError::InvalidUrl {
        url: repository_url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(repository_url.trim()).map_err(|e| invalid(&e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| invalid("missing host"))?
        .to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host != cfg.repository_host {
        return Err(invalid(&format!("expected host {}", cfg.repository_host)));
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty() && *seg != "blob").collect())
        .unwrap_or_default();
    if segments.is_empty() {
        return Err(invalid("missing repository path"));
    }

    Ok(format!(
        "{}/{}/{}/README.md",
        cfg.raw_base,
        segments.join("/"),
        branch
    ))
}

/// HTTP-backed fetcher.
#[derive(Clone)]
pub struct ReadmeFetcher {
    cfg: FetcherConfig,
    http: reqwest::Client,
}

impl ReadmeFetcher {
    pub fn new(cfg: FetcherConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self { cfg, http })
    }

    async fn get_text(&self, url: String) -> Result<(String, String), FetchError> {
        counter!("readme_fetch_attempts_total").increment(1);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            debug!(%url, status = status.as_u16(), "README candidate rejected");
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|e| FetchError::Network {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok((body, url))
    }
}

#[async_trait::async_trait]
impl ReadmeSource for ReadmeFetcher {
    async fn fetch(&self, repository_url: &str) -> FetchResult {
        let candidates: Result<Vec<String>, FetchError> = BRANCHES
            .iter()
            .map(|b| raw_readme_url(&self.cfg, repository_url, b))
            .collect();

        let candidates = match candidates {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "README fetch rejected");
                counter!("readme_fetch_total", "outcome" => "invalid_url").increment(1);
                return FetchResult::Failed {
                    error: e.to_string(),
                };
            }
        };

        match first_success(candidates, |url| self.get_text(url)).await {
            Ok((content, source_url)) => {
                info!(%source_url, bytes = content.len(), "README fetched");
                counter!("readme_fetch_total", "outcome" => "fetched").increment(1);
                FetchResult::Fetched {
                    content,
                    source_url,
                }
            }
            Err(exhausted) => {
                let detail = exhausted
                    .last
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no candidate URLs".to_string());
                warn!(attempts = exhausted.attempts, %detail, "README fetch failed");
                counter!("readme_fetch_total", "outcome" => "failed").increment(1);
                FetchResult::Failed {
                    error: format!("Failed to fetch README content ({detail})"),
                }
            }
        }
    }
}
