use super::{check_response, snippet, ProviderError, SpeechSynthesizer, Summarizer};
use crate::config::OpenAiConfig;
use crate::{logi, logw};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;

const PROVIDER: &str = "openai";
const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";
const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

const MAX_CONTENT_BYTES: usize = 200_000;
/// Content is never shrunk below this when the model rejects its length.
const MIN_CONTENT_BYTES: usize = 8_000;
const SHRINK_ROUNDS: usize = 2;
const SUMMARY_TIMEOUT: Duration = Duration::from_secs(600);

pub(crate) fn trim_copy_utf8_safe(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }

    let mut cut = max_bytes.min(input.len());
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    input[..cut].to_string()
}

fn openai_extract_output_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error").filter(|e| !e.is_null()) {
        for field in ["message", "type", "code"] {
            if let Some(value) = err.get(field).and_then(|v| v.as_str()) {
                logw(format!("OpenAI error {}: {}", field, value));
            }
        }
        return None;
    }

    root.get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
        .flatten()
        .find(|entry| entry.get("type").and_then(|v| v.as_str()) == Some("output_text"))
        .and_then(|entry| entry.get("text").and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// True when the model rejected the request because the input is too long.
fn openai_resp_is_context_overflow(resp_json: &str) -> bool {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(resp_json) else {
        return false;
    };
    let Some(err) = root.get("error") else {
        return false;
    };

    let code = err
        .get("code")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase();
    if code == "context_length_exceeded" || code.contains("context") {
        return true;
    }

    let msg = err
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase();
    [
        "too large",
        "message is too long",
        "maximum context length",
        "context length",
        "request is too large",
    ]
    .iter()
    .any(|t| msg.contains(t))
}

pub struct OpenAiClient {
    client: Client,
    cfg: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(client: Client, cfg: OpenAiConfig) -> Self {
        Self { client, cfg }
    }

    async fn request_summary(&self, prompt: &str, content: &str) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.cfg.summary_model,
            "input": [
                {"role": "system", "content": "You are a helpful assistant designed to output JSON."},
                {"role": "user", "content": format!("{prompt}\n\n{content}")},
            ],
            "text": {"format": {"type": "json_object"}},
        });

        let resp = self
            .client
            .post(RESPONSES_URL)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .timeout(SUMMARY_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;

        let status = resp.status();
        if status != StatusCode::BAD_REQUEST && !status.is_success() {
            logw(format!("OpenAI HTTP {}", status.as_u16()));
        }
        let resp = if status == StatusCode::BAD_REQUEST {
            resp
        } else {
            check_response(PROVIDER, resp).await?
        };
        let raw = resp
            .text()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;

        if status == StatusCode::BAD_REQUEST {
            logw(format!("OpenAI HTTP 400: {}", snippet(&raw)));
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: status.as_u16(),
                body: raw,
            });
        }

        openai_extract_output_text(&raw).ok_or_else(|| {
            ProviderError::malformed(PROVIDER, format!("no output_text in {}", snippet(&raw)))
        })
    }
}

#[async_trait]
impl Summarizer for OpenAiClient {
    #[tracing::instrument(skip_all, fields(model = %self.cfg.summary_model, bytes = content.len()))]
    async fn summarize(&self, prompt: &str, content: &str) -> Result<String, ProviderError> {
        let mut content = trim_copy_utf8_safe(content, MAX_CONTENT_BYTES);

        for round in 0..=SHRINK_ROUNDS {
            match self.request_summary(prompt, &content).await {
                Err(ProviderError::Status { status: 400, body, .. })
                    if round < SHRINK_ROUNDS
                        && content.len() > MIN_CONTENT_BYTES
                        && openai_resp_is_context_overflow(&body) =>
                {
                    let smaller = (content.len() / 2).max(MIN_CONTENT_BYTES);
                    logi(format!(
                        "OpenAI rejected {} bytes of input; retrying with {}",
                        content.len(),
                        smaller
                    ));
                    content = trim_copy_utf8_safe(&content, smaller);
                }
                Err(ProviderError::Status {
                    provider,
                    status,
                    body,
                }) => {
                    return Err(ProviderError::Status {
                        provider,
                        status,
                        body: snippet(&body),
                    });
                }
                other => return other,
            }
        }
        Err(ProviderError::malformed(PROVIDER, "input could not be shrunk to fit"))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    #[tracing::instrument(skip_all, fields(voice = %self.cfg.voice, chars = text.len()))]
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let body = json!({
            "model": self.cfg.tts_model,
            "voice": self.cfg.voice,
            "input": text,
            "instructions": self.cfg.instructions,
            "response_format": "mp3",
        });
        let resp = self
            .client
            .post(SPEECH_URL)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;
        let resp = check_response(PROVIDER, resp).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;
        if bytes.is_empty() {
            return Err(ProviderError::malformed(PROVIDER, "empty audio response"));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_respects_char_boundaries() {
        let text = "héllo";
        assert_eq!(trim_copy_utf8_safe(text, 2), "h");
        assert_eq!(trim_copy_utf8_safe(text, 3), "hé");
        assert_eq!(trim_copy_utf8_safe(text, 100), "héllo");
    }

    #[test]
    fn test_extract_output_text() {
        let raw = r#"{"output":[
            {"type":"reasoning","content":[]},
            {"type":"message","content":[{"type":"output_text","text":"{\"title\":\"x\"}"}]}
        ]}"#;
        assert_eq!(openai_extract_output_text(raw).as_deref(), Some(r#"{"title":"x"}"#));
        assert_eq!(
            openai_extract_output_text(r#"{"error":{"message":"bad key","code":"invalid_api_key"}}"#),
            None
        );
        assert_eq!(openai_extract_output_text("not json"), None);
    }

    #[test]
    fn test_context_overflow_detection() {
        assert!(openai_resp_is_context_overflow(
            r#"{"error":{"code":"context_length_exceeded","message":"..."}}"#
        ));
        assert!(openai_resp_is_context_overflow(
            r#"{"error":{"message":"This model's maximum context length is 128000 tokens"}}"#
        ));
        assert!(!openai_resp_is_context_overflow(
            r#"{"error":{"code":"invalid_api_key","message":"Incorrect API key"}}"#
        ));
        assert!(!openai_resp_is_context_overflow(""));
    }
}
