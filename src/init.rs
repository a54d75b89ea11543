use crate::config::PathsConfig;
use crate::logi;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

pub async fn ensure_directories(paths: &PathsConfig) -> Result<()> {
    for dir in [&paths.state_dir, &paths.work_dir, &paths.output_dir] {
        if fs::metadata(dir).await.is_err() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

async fn tool_available(program: &str) -> bool {
    match tokio::process::Command::new(program)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

pub async fn check_ffmpeg() -> bool {
    tool_available("ffmpeg").await
}

/// Missing input files named by the video section.
pub async fn missing_video_inputs(thumbnail: &Path, music: Option<&Path>) -> Vec<String> {
    let mut missing = Vec::new();
    for path in std::iter::once(thumbnail).chain(music) {
        if fs::metadata(path).await.is_err() {
            missing.push(path.display().to_string());
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_configured_directories() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            state_dir: dir.path().join("state"),
            work_dir: dir.path().join("work/nested"),
            output_dir: dir.path().join("output"),
        };
        ensure_directories(&paths).await.unwrap();
        ensure_directories(&paths).await.unwrap();
        assert!(paths.state_dir.is_dir());
        assert!(paths.work_dir.is_dir());
        assert!(paths.output_dir.is_dir());
    }

    #[tokio::test]
    async fn test_reports_missing_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let thumb = dir.path().join("thumb.png");
        fs::write(&thumb, b"png").await.unwrap();
        let music = dir.path().join("missing.mp3");
        let missing = missing_video_inputs(&thumb, Some(&music)).await;
        assert_eq!(missing, vec![music.display().to_string()]);
        assert!(missing_video_inputs(&thumb, None).await.is_empty());
    }
}
