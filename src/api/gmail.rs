use super::oauth::OAuthSession;
use super::{check_response, Email, EmailSource, ProviderError};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

const PROVIDER: &str = "gmail";
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    #[serde(default)]
    snippet: String,
    payload: MessagePart,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    data: Option<String>,
}

impl MessagePart {
    fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .unwrap_or("")
    }

    /// First `text/plain` body, depth first; a single-part message falls back
    /// to its own body.
    fn plain_text(&self) -> Option<String> {
        if self.parts.is_empty() {
            return self.body.data.as_deref().and_then(decode_body);
        }
        for part in &self.parts {
            if part.mime_type == "text/plain" {
                if let Some(text) = part.body.data.as_deref().and_then(decode_body) {
                    return Some(text);
                }
            }
            if !part.parts.is_empty() {
                if let Some(text) = part.plain_text() {
                    return Some(text);
                }
            }
        }
        None
    }
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn search_query(sender: &str, since: NaiveDate) -> String {
    format!("from:{} after:{}", sender, since.format("%Y/%m/%d"))
}

pub struct GmailClient {
    client: Client,
    session: OAuthSession,
    senders: Vec<String>,
    max_results: u32,
}

impl GmailClient {
    pub fn new(client: Client, session: OAuthSession, senders: Vec<String>, max_results: u32) -> Self {
        Self {
            client,
            session,
            senders,
            max_results,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let token = self.session.access_token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;
        let resp = check_response(PROVIDER, resp).await?;
        resp.json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))
    }

    #[tracing::instrument(skip(self), fields(sender = %sender))]
    async fn fetch_from(&self, sender: &str, since: NaiveDate) -> Result<Vec<Email>, ProviderError> {
        let list: MessageList = self
            .get_json(
                &format!("{API_BASE}/messages"),
                &[
                    ("q", search_query(sender, since)),
                    ("maxResults", self.max_results.to_string()),
                ],
            )
            .await?;

        let mut emails = Vec::with_capacity(list.messages.len());
        for message in list.messages {
            let full: Message = self
                .get_json(
                    &format!("{API_BASE}/messages/{}", message.id),
                    &[("format", "full".to_string())],
                )
                .await?;
            emails.push(to_email(full, sender));
        }
        tracing::info!(count = emails.len(), "Fetched newsletter emails");
        Ok(emails)
    }
}

fn to_email(message: Message, source: &str) -> Email {
    let payload = &message.payload;
    let date = DateTime::parse_from_rfc2822(payload.header("Date"))
        .ok()
        .map(|d| d.with_timezone(&Utc));
    Email {
        subject: payload.header("Subject").to_string(),
        sender: payload.header("From").to_string(),
        body: payload.plain_text().unwrap_or_default(),
        date,
        id: message.id,
        snippet: message.snippet,
        source: source.to_string(),
    }
}

#[async_trait]
impl EmailSource for GmailClient {
    async fn fetch_unread(&self, since: NaiveDate) -> Result<Vec<Email>, ProviderError> {
        let mut all = Vec::new();
        for sender in &self.senders {
            all.extend(self.fetch_from(sender, since).await?);
        }
        all.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn test_search_query_format() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(search_query("news@smol.ai", day), "from:news@smol.ai after:2025/03/07");
    }

    #[test]
    fn test_extracts_first_plain_part_from_nested_message() {
        let raw = serde_json::json!({
            "id": "m1",
            "snippet": "AI news",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [
                    {"name": "Subject", "value": "[AINews] Today"},
                    {"name": "From", "value": "smol <news@smol.ai>"},
                    {"name": "Date", "value": "Fri, 07 Mar 2025 10:00:00 +0000"}
                ],
                "parts": [
                    {
                        "mimeType": "multipart/alternative",
                        "parts": [
                            {"mimeType": "text/plain", "body": {"data": encode("plain body ✓")}},
                            {"mimeType": "text/html", "body": {"data": encode("<p>html</p>")}}
                        ]
                    }
                ]
            }
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        let email = to_email(message, "news@smol.ai");
        assert_eq!(email.body, "plain body ✓");
        assert_eq!(email.subject, "[AINews] Today");
        assert_eq!(email.sender, "smol <news@smol.ai>");
        assert!(email.date.is_some());
    }

    #[test]
    fn test_single_part_body_with_padding() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode("hi");
        let raw = serde_json::json!({
            "id": "m2",
            "payload": {"mimeType": "text/plain", "body": {"data": padded}}
        });
        let message: Message = serde_json::from_value(raw).unwrap();
        let email = to_email(message, "x");
        assert_eq!(email.body, "hi");
        assert_eq!(email.date, None);
    }
}
