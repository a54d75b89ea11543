use crate::api::youtube::cost;
use crate::api::{UploadedVideo, VideoHost, VideoMetadata};
use crate::progress::{
    idempotency_key, ItemStatus, Job, JobError, JobExecutor, ProgressStore, ResumableRunner,
    RetryPolicy, RunStop, RunSummary,
};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum YoutubeOp {
    Upload {
        video: PathBuf,
        meta: VideoMetadata,
    },
    Thumbnail {
        video_id: String,
        image: PathBuf,
    },
    /// Looks the playlist up by name and creates it when allowed.
    EnsurePlaylist(PlaylistTarget),
    AddToPlaylist {
        playlist_id: String,
        video_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistTarget {
    pub name: String,
    pub description: String,
    pub privacy_status: String,
    pub create_if_missing: bool,
}

pub fn playlist_job(target: PlaylistTarget) -> Job<YoutubeOp> {
    Job::new(
        idempotency_key(&["youtube-playlist", &target.name]),
        cost::PLAYLIST_LIST + cost::PLAYLIST_CREATE,
        YoutubeOp::EnsurePlaylist(target),
    )
}

pub fn add_to_playlist_job(playlist_id: &str, video_id: &str) -> Job<YoutubeOp> {
    Job::new(
        idempotency_key(&["playlist-add", playlist_id, video_id]),
        cost::PLAYLIST_ADD,
        YoutubeOp::AddToPlaylist {
            playlist_id: playlist_id.to_string(),
            video_id: video_id.to_string(),
        },
    )
}

/// Runs `YoutubeOp`s against a video host. Successful uploads and playlist
/// lookups record the resulting id as the item output.
pub struct YoutubeExecutor<'h, H> {
    host: &'h H,
}

impl<'h, H: VideoHost> YoutubeExecutor<'h, H> {
    pub fn new(host: &'h H) -> Self {
        Self { host }
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>, JobError> {
    fs::read(path)
        .await
        .map_err(|e| JobError::permanent(format!("cannot read {}: {e}", path.display())))
}

#[async_trait]
impl<H: VideoHost> JobExecutor<YoutubeOp> for YoutubeExecutor<'_, H> {
    async fn execute(&self, job: &Job<YoutubeOp>) -> Result<Option<String>, JobError> {
        match &job.payload {
            YoutubeOp::Upload { video, meta } => {
                let bytes = read_file(video).await?;
                let uploaded = self.host.upload(bytes, meta).await?;
                Ok(Some(uploaded.video_id))
            }
            YoutubeOp::Thumbnail { video_id, image } => {
                let bytes = read_file(image).await?;
                self.host.set_thumbnail(video_id, bytes).await?;
                Ok(None)
            }
            YoutubeOp::EnsurePlaylist(target) => {
                if let Some(id) = self.host.find_playlist(&target.name).await? {
                    return Ok(Some(id));
                }
                if !target.create_if_missing {
                    return Err(JobError::permanent(format!(
                        "playlist {:?} not found and creation is disabled",
                        target.name
                    )));
                }
                let id = self
                    .host
                    .create_playlist(&target.name, &target.description, &target.privacy_status)
                    .await?;
                Ok(Some(id))
            }
            YoutubeOp::AddToPlaylist {
                playlist_id,
                video_id,
            } => {
                self.host.add_to_playlist(playlist_id, video_id).await?;
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Identifies the digest; the same run id never uploads twice.
    pub run_id: String,
    pub video: PathBuf,
    pub thumbnail: Option<PathBuf>,
    pub meta: VideoMetadata,
    pub playlist: Option<PlaylistTarget>,
}

#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Published {
        video: UploadedVideo,
        playlist_id: Option<String>,
        /// Non-fatal follow-up steps that did not complete.
        warnings: Vec<String>,
    },
    /// Stopped on quota or cancellation; rerun to continue.
    Deferred(Box<RunSummary>),
}

pub struct Publisher<'s, 'h, H> {
    store: &'s ProgressStore,
    host: &'h H,
    policy: RetryPolicy,
    cancel: CancellationToken,
    retry_failed: bool,
}

impl<'s, 'h, H: VideoHost> Publisher<'s, 'h, H> {
    pub fn new(store: &'s ProgressStore, host: &'h H, policy: RetryPolicy) -> Self {
        Self {
            store,
            host,
            policy,
            cancel: CancellationToken::new(),
            retry_failed: false,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry_failed(mut self, yes: bool) -> Self {
        self.retry_failed = yes;
        self
    }

    async fn run_pass(&self, jobs: &[Job<YoutubeOp>]) -> Result<RunSummary> {
        let runner = ResumableRunner::new(
            self.store,
            YoutubeExecutor::new(self.host),
            self.policy.clone(),
        )
        .with_cancellation(self.cancel.clone())
        .retry_failed(self.retry_failed);
        runner.run(jobs).await.context("Failed to persist publish progress")
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishOutcome> {
        let upload = Job::new(
            idempotency_key(&["upload", &request.run_id]),
            cost::UPLOAD,
            YoutubeOp::Upload {
                video: request.video.clone(),
                meta: request.meta.clone(),
            },
        );
        let upload_key = upload.key.clone();

        logi(format!("Uploading {} to YouTube...", request.video.display()));
        let summary = self.run_pass(std::slice::from_ref(&upload)).await?;
        if summary.stop != RunStop::Completed {
            return Ok(PublishOutcome::Deferred(Box::new(summary)));
        }
        let item = self
            .store
            .item(&upload_key)
            .context("Upload finished without a progress record")?;
        if item.status == ItemStatus::Failed {
            anyhow::bail!(
                "YouTube upload failed: {} (rerun with --retry-failed to try again)",
                item.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        let video_id = item
            .output
            .context("Upload finished without a recorded video id")?;
        let video = UploadedVideo::from_id(video_id);
        logok(format!("Uploaded: {}", video.url));

        let mut follow_up = Vec::new();
        if let Some(image) = request.thumbnail.clone() {
            follow_up.push(Job::new(
                idempotency_key(&["thumbnail", &video.video_id]),
                cost::THUMBNAIL,
                YoutubeOp::Thumbnail {
                    video_id: video.video_id.clone(),
                    image,
                },
            ));
        }
        let playlist_key = request.playlist.clone().map(|target| {
            let job = playlist_job(target);
            let key = job.key.clone();
            follow_up.push(job);
            key
        });

        let mut warnings = Vec::new();
        let summary = self.run_pass(&follow_up).await?;
        warnings.extend(summary.failed.iter().map(|f| f.reason.clone()));
        if summary.stop != RunStop::Completed {
            return Ok(PublishOutcome::Deferred(Box::new(summary)));
        }

        let playlist_id = playlist_key.and_then(|key| self.store.output_of(&key));
        if let Some(pid) = playlist_id.as_deref() {
            let summary = self
                .run_pass(&[add_to_playlist_job(pid, &video.video_id)])
                .await?;
            warnings.extend(summary.failed.iter().map(|f| f.reason.clone()));
            if summary.stop != RunStop::Completed {
                return Ok(PublishOutcome::Deferred(Box::new(summary)));
            }
            logok(format!("Added to playlist {}", pid));
        }

        for warning in &warnings {
            logw(format!("Publish step skipped: {}", warning));
        }
        Ok(PublishOutcome::Published {
            video,
            playlist_id,
            warnings,
        })
    }
}
