//! Provider adapters and the capability traits the pipeline is written against.

pub mod brave;
pub mod elevenlabs;
pub mod gmail;
pub mod oauth;
pub mod openai;
pub mod spotify;
pub mod youtube;

use crate::progress::{JobError, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const BODY_SNIPPET_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} rate limited")]
    RateLimited {
        provider: &'static str,
        retry_after: Option<Duration>,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} rejected the credentials: {body}")]
    Unauthorized { provider: &'static str, body: String },

    /// The provider's own daily budget is spent; nothing more runs until it resets.
    #[error("{provider} quota exceeded ({reason})")]
    QuotaExceeded {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider}: {what} not found")]
    NotFound { provider: &'static str, what: String },

    #[error("{provider} returned an unexpected response: {detail}")]
    Malformed {
        provider: &'static str,
        detail: String,
    },

    #[error("{provider} is not configured: {detail}")]
    NotConfigured {
        provider: &'static str,
        detail: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn http(provider: &'static str, source: reqwest::Error) -> Self {
        Self::Http { provider, source }
    }

    pub fn malformed(provider: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            detail: detail.into(),
        }
    }

    pub fn not_found(provider: &'static str, what: impl Into<String>) -> Self {
        Self::NotFound {
            provider,
            what: what.into(),
        }
    }

    /// Whether the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source, .. } => !source.is_decode() && !source.is_builder(),
            Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408,
            Self::Io(_) => true,
            Self::Unauthorized { .. }
            | Self::QuotaExceeded { .. }
            | Self::NotFound { .. }
            | Self::Malformed { .. }
            | Self::NotConfigured { .. } => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<ProviderError> for JobError {
    fn from(err: ProviderError) -> Self {
        if let ProviderError::QuotaExceeded { .. } = err {
            JobError::Exhausted(err.to_string())
        } else if err.is_retryable() {
            JobError::Transient {
                retry_after: err.retry_after(),
                reason: err.to_string(),
            }
        } else {
            JobError::Permanent(err.to_string())
        }
    }
}

pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

fn parse_retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    errors: Vec<GoogleErrorReason>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorReason {
    #[serde(default)]
    reason: String,
}

/// `error.errors[].reason` values from a Google-style error body.
fn error_reasons(body: &str) -> Vec<String> {
    serde_json::from_str::<GoogleErrorBody>(body)
        .map(|b| b.error.errors.into_iter().map(|e| e.reason).collect())
        .unwrap_or_default()
}

/// Classifies a 403 body: quota and rate-limit reasons are not credential problems.
fn classify_forbidden(provider: &'static str, body: &str) -> ProviderError {
    for reason in error_reasons(body) {
        if matches!(reason.as_str(), "quotaExceeded" | "dailyLimitExceeded") {
            return ProviderError::QuotaExceeded { provider, reason };
        }
        if matches!(reason.as_str(), "rateLimitExceeded" | "userRateLimitExceeded") {
            return ProviderError::RateLimited {
                provider,
                retry_after: None,
            };
        }
    }
    ProviderError::Unauthorized {
        provider,
        body: snippet(body),
    }
}

/// Maps non-success responses onto `ProviderError`.
pub(crate) async fn check_response(
    provider: &'static str,
    resp: Response,
) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited {
            provider,
            retry_after: parse_retry_after(&resp),
        });
    }

    let body = resp
        .text()
        .await
        .map_err(|e| ProviderError::http(provider, e))?;
    Err(error_for_status(provider, status, &body))
}

fn error_for_status(provider: &'static str, status: StatusCode, body: &str) -> ProviderError {
    match status {
        StatusCode::FORBIDDEN => classify_forbidden(provider, body),
        StatusCode::UNAUTHORIZED => ProviderError::Unauthorized {
            provider,
            body: snippet(body),
        },
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            provider,
            what: snippet(body),
        },
        _ => ProviderError::Status {
            provider,
            status: status.as_u16(),
            body: snippet(body),
        },
    }
}

/// Retries `call` on retryable errors with the policy's backoff, honoring
/// provider `Retry-After` hints. Used for calls made outside the runner.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, err.retry_after());
                tracing::info!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying provider call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: Option<DateTime<Utc>>,
    pub body: String,
    pub snippet: String,
    /// Newsletter sender filter that matched this message.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub uri: String,
    pub name: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVideo {
    pub video_id: String,
    pub url: String,
}

impl UploadedVideo {
    pub fn from_id(video_id: impl Into<String>) -> Self {
        let video_id = video_id.into();
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        Self { video_id, url }
    }
}

#[async_trait]
pub trait EmailSource: Send + Sync {
    async fn fetch_unread(&self, since: NaiveDate) -> Result<Vec<Email>, ProviderError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Returns the model's raw output text.
    async fn summarize(&self, prompt: &str, content: &str) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns encoded audio (mp3).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError>;
}

#[async_trait]
pub trait VideoHost: Send + Sync {
    async fn upload(
        &self,
        video: Vec<u8>,
        meta: &VideoMetadata,
    ) -> Result<UploadedVideo, ProviderError>;
    async fn set_thumbnail(&self, video_id: &str, image: Vec<u8>) -> Result<(), ProviderError>;
    /// Case-insensitive title match over the account's playlists.
    async fn find_playlist(&self, name: &str) -> Result<Option<String>, ProviderError>;
    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        privacy_status: &str,
    ) -> Result<String, ProviderError>;
    async fn add_to_playlist(&self, playlist_id: &str, video_id: &str)
        -> Result<(), ProviderError>;
}

#[async_trait]
pub trait MusicCatalog: Send + Sync {
    async fn search_artist(&self, name: &str) -> Result<Option<String>, ProviderError>;
    async fn top_tracks(
        &self,
        artist_id: &str,
        market: &str,
        limit: usize,
    ) -> Result<Vec<Track>, ProviderError>;
    async fn create_playlist(&self, name: &str, description: &str)
        -> Result<String, ProviderError>;
    /// Appends up to 100 track URIs.
    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Best-match YouTube video id for the query, if any.
    async fn search_video(&self, query: &str) -> Result<Option<String>, ProviderError>;
}

pub(crate) fn http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(concat!("digest-reels/", env!("CARGO_PKG_VERSION")))
        .gzip(true)
        .connect_timeout(Duration::from_secs(20))
        .build()
        .map_err(|e| ProviderError::http("http", e))
}
