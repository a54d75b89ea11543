use async_trait::async_trait;
use digest_reels::narration::AudioMixer;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;

/// Byte-level stand-in for ffmpeg: normalize copies, silence writes `_`.
#[derive(Clone, Default)]
pub struct MockMixer {
    pub concats: Arc<Mutex<Vec<Vec<PathBuf>>>>,
    pub silences: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl AudioMixer for MockMixer {
    async fn normalize(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        fs::copy(input, output).await?;
        Ok(())
    }

    async fn silence(&self, duration: Duration, output: &Path) -> anyhow::Result<()> {
        self.silences.lock().unwrap().push(duration);
        fs::write(output, b"_").await?;
        Ok(())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> anyhow::Result<()> {
        self.concats.lock().unwrap().push(inputs.to_vec());
        let mut joined = Vec::new();
        for input in inputs {
            joined.extend(fs::read(input).await?);
        }
        fs::write(output, joined).await?;
        Ok(())
    }
}
