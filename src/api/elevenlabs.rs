use super::{check_response, ProviderError, SpeechSynthesizer};
use crate::config::ElevenLabsConfig;
use async_trait::async_trait;
use reqwest::Client;

const PROVIDER: &str = "elevenlabs";

pub struct ElevenLabsClient {
    client: Client,
    cfg: ElevenLabsConfig,
}

impl ElevenLabsClient {
    pub fn new(client: Client, cfg: ElevenLabsConfig) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    #[tracing::instrument(skip_all, fields(voice = %self.cfg.voice_id, chars = text.len()))]
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=mp3_44100_128",
            self.cfg.voice_id
        );

        let body = serde_json::json!({
            "text": text,
            "model_id": self.cfg.model_id,
        });

        let resp = self
            .client
            .post(url)
            .header("xi-api-key", &self.cfg.api_key)
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
