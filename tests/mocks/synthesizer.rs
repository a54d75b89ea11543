use async_trait::async_trait;
use digest_reels::api::{ProviderError, SpeechSynthesizer};
use std::sync::{Arc, Mutex};

/// Returns the text itself as "audio"; texts containing `fail_on` are
/// rejected, permanently unless `flaky` (then with a 503 every time).
#[derive(Clone, Default)]
pub struct MockSynthesizer {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_on: Option<String>,
    pub flaky: bool,
}

impl MockSynthesizer {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_string()),
            ..Self::default()
        }
    }

    pub fn unavailable_on(needle: &str) -> Self {
        Self {
            flaky: true,
            ..Self::failing_on(needle)
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(needle) = &self.fail_on {
            if text.contains(needle.as_str()) {
                let status = if self.flaky { 503 } else { 400 };
                return Err(ProviderError::Status {
                    provider: "mock-tts",
                    status,
                    body: "input rejected".to_string(),
                });
            }
        }
        Ok(format!("[{text}]").into_bytes())
    }
}
