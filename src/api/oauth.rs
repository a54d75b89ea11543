use super::{check_response, ProviderError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Refresh a token this long before it actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// Client id/secret sent in the form body (Google).
    Form,
    /// Client id/secret sent as HTTP Basic (Spotify).
    Basic,
}

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl OAuthCredentials {
    pub fn new(client_id: &str, client_secret: &str, refresh_token: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            refresh_token: refresh_token.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Refresh-token backed access token, refreshed on demand.
pub struct OAuthSession {
    provider: &'static str,
    token_url: String,
    auth: ClientAuth,
    credentials: OAuthCredentials,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthSession {
    pub fn new(
        provider: &'static str,
        token_url: impl Into<String>,
        auth: ClientAuth,
        credentials: OAuthCredentials,
        client: Client,
    ) -> Self {
        Self {
            provider,
            token_url: token_url.into(),
            auth,
            credentials,
            client,
            cached: Mutex::new(None),
        }
    }

    pub fn google(provider: &'static str, credentials: OAuthCredentials, client: Client) -> Self {
        Self::new(provider, GOOGLE_TOKEN_URL, ClientAuth::Form, credentials, client)
    }

    pub fn spotify(credentials: OAuthCredentials, client: Client) -> Self {
        Self::new("spotify", SPOTIFY_TOKEN_URL, ClientAuth::Basic, credentials, client)
    }

    /// A token valid for at least the expiry margin.
    pub async fn access_token(&self) -> Result<String, ProviderError> {
        let mut guard = self.cached.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn refresh(&self) -> Result<CachedToken, ProviderError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ];
        let mut req = self.client.post(&self.token_url);
        match self.auth {
            ClientAuth::Form => {
                form.push(("client_id", self.credentials.client_id.as_str()));
                form.push(("client_secret", self.credentials.client_secret.as_str()));
            }
            ClientAuth::Basic => {
                let pair = format!(
                    "{}:{}",
                    self.credentials.client_id, self.credentials.client_secret
                );
                req = req.header(
                    reqwest::header::AUTHORIZATION,
                    format!("Basic {}", STANDARD.encode(pair)),
                );
            }
        }

        let resp = req
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::http(self.provider, e))?;
        let resp = check_response(self.provider, resp).await?;
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::malformed(self.provider, e.to_string()))?;

        tracing::debug!(provider = self.provider, expires_in = token.expires_in, "Access token refreshed");
        Ok(CachedToken {
            value: token.access_token,
            expires_at: expiry_from(Utc::now(), token.expires_in),
        })
    }
}

fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    let usable = (expires_in - EXPIRY_MARGIN_SECS).max(0);
    now + ChronoDuration::seconds(usable)
}
