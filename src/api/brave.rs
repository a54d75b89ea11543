use super::{check_response, ProviderError, WebSearch};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

const PROVIDER: &str = "brave";
const SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:youtube\.com/watch\?(?:[^#]*&)?v=|youtu\.be/)([A-Za-z0-9_-]{11})")
        .expect("static regex")
});

#[derive(Debug, Deserialize)]
struct SearchResponse {
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    url: String,
}

/// Video id from a YouTube watch or short link.
pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Query restricted to YouTube watch pages.
pub fn video_query(terms: &str) -> String {
    format!("site:youtube.com/watch {terms} official")
}

pub struct BraveSearch {
    client: Client,
    api_key: String,
}

impl BraveSearch {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl WebSearch for BraveSearch {
    #[tracing::instrument(skip(self))]
    async fn search_video(&self, query: &str) -> Result<Option<String>, ProviderError> {
        let resp = self
            .client
            .get(SEARCH_URL)
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .query(&[
                ("q", video_query(query).as_str()),
                ("count", "1"),
                ("safesearch", "moderate"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;
        let resp = check_response(PROVIDER, resp).await?;
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;

        Ok(body
            .web
            .into_iter()
            .flat_map(|web| web.results)
            .find_map(|hit| extract_video_id(&hit.url)))
    }
}
