//! Newsletter emails (or given text) to a narrated video, optionally uploaded.

use crate::api::elevenlabs::ElevenLabsClient;
use crate::api::gmail::GmailClient;
use crate::api::oauth::{OAuthCredentials, OAuthSession};
use crate::api::openai::OpenAiClient;
use crate::api::youtube::YoutubeClient;
use crate::api::{http_client, with_retry, EmailSource, SpeechSynthesizer, Summarizer, UploadedVideo, VideoMetadata};
use crate::config::{Config, NarrationProvider, VideoConfig};
use crate::ffmpeg::{ffmpeg_render_still, ffmpeg_thumbnail, FfmpegMixer, ThumbnailText};
use crate::init::missing_video_inputs;
use crate::narration::{NarrationRequest, Narrator, Pauses};
use crate::progress::{idempotency_key, ProgressStore, RunSummary, SnapshotOrigin};
use crate::publish::{PlaylistTarget, PublishOutcome, PublishRequest, Publisher};
use crate::summary::{build_summary_input, load_prompt, wrap_content, DigestSummary};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

pub const NARRATION_PROGRESS_FILE: &str = "narration.progress.json";
pub const YOUTUBE_PROGRESS_FILE: &str = "youtube.progress.json";

const YOUTUBE_TITLE_MAX_CHARS: usize = 100;
const YOUTUBE_DESCRIPTION_MAX_CHARS: usize = 5_000;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub upload: bool,
    pub retry_failed: bool,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct TextInput {
    pub text: String,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug)]
pub enum UploadStatus {
    Skipped,
    Uploaded {
        video: UploadedVideo,
        playlist_id: Option<String>,
        warnings: Vec<String>,
    },
    Deferred(Box<RunSummary>),
}

#[derive(Debug)]
pub struct DigestReport {
    pub run_id: String,
    pub title: String,
    pub video: PathBuf,
    pub upload: UploadStatus,
    pub elapsed: Duration,
}

impl fmt::Display for DigestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Digest {}: {}", self.run_id, self.title)?;
        writeln!(f, "  video: {}", self.video.display())?;
        match &self.upload {
            UploadStatus::Skipped => writeln!(f, "  youtube: not uploaded")?,
            UploadStatus::Uploaded {
                video,
                playlist_id,
                warnings,
            } => {
                writeln!(f, "  youtube: {}", video.url)?;
                if let Some(pid) = playlist_id {
                    writeln!(f, "  playlist: {pid}")?;
                }
                for warning in warnings {
                    writeln!(f, "  warning: {warning}")?;
                }
            }
            UploadStatus::Deferred(summary) => {
                writeln!(f, "  youtube: deferred, run again to continue")?;
                writeln!(f, "{summary}")?;
            }
        }
        write!(f, "  elapsed: {:.1}s", self.elapsed.as_secs_f64())
    }
}

pub fn today_in(cfg: &Config) -> Result<NaiveDate> {
    Ok(Utc::now().with_timezone(&cfg.reset_timezone()?).date_naive())
}

/// Opens a ledger under the state directory, telling the operator when an
/// unreadable snapshot was set aside.
pub fn open_progress(cfg: &Config, file: &str, limit: u64) -> Result<ProgressStore> {
    let path = cfg.paths.state_dir.join(file);
    let store = ProgressStore::open(&path, limit, cfg.reset_schedule()?)
        .with_context(|| format!("Failed to open progress file {}", path.display()))?;
    if let SnapshotOrigin::DiscardedCorrupt { moved_to, reason } = store.origin() {
        logw(format!(
            "{} was unreadable ({}); kept as {} and starting fresh",
            path.display(),
            reason,
            moved_to.display()
        ));
    }
    Ok(store)
}

/// Title, date and watermark for the generated thumbnail.
pub fn thumbnail_text(video: &VideoConfig, date: NaiveDate) -> ThumbnailText {
    ThumbnailText {
        title: video.thumbnail_title.clone(),
        date_label: date.format("%b - %d - %y").to_string(),
        watermark: video.watermark.clone(),
    }
}

/// Dated thumbnail for the run, generated once from the template. Falls back
/// to the bare template when ffmpeg cannot draw it.
async fn prepare_thumbnail(cfg: &Config, run_id: &str, date: NaiveDate) -> Option<PathBuf> {
    let template = &cfg.video.thumbnail;
    if fs::metadata(template).await.is_err() {
        logw(format!("Thumbnail template missing: {}", template.display()));
        return None;
    }
    let out = cfg.paths.output_dir.join(format!("{run_id}.thumbnail.png"));
    if fs::metadata(&out).await.is_ok() {
        return Some(out);
    }
    let text = thumbnail_text(&cfg.video, date);
    match ffmpeg_thumbnail(template, &text, cfg.video.font.as_deref(), &out).await {
        Ok(()) => {
            logok(format!("Thumbnail: {}", out.display()));
            Some(out)
        }
        Err(e) => {
            logw(format!("Thumbnail generation failed, uploading the template: {e:#}"));
            Some(template.clone())
        }
    }
}

const RUN_ID_SLUG_MAX_CHARS: usize = 60;

/// Lowercase alphanumeric title words joined by `-`, then a short hash of the
/// text so different texts under one title never share outputs.
pub fn run_id_for_title(title: &str, text: &str) -> String {
    let slug = title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    let hash = idempotency_key(&["text", text]);
    if slug.is_empty() {
        return hash[..12].to_string();
    }
    let slug: String = slug.chars().take(RUN_ID_SLUG_MAX_CHARS).collect();
    format!("{}-{}", slug.trim_end_matches('-'), &hash[..8])
}

fn clip_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub async fn clear_directory_contents(dir_path: &Path) -> Result<()> {
    if fs::metadata(dir_path).await.is_err() {
        return Ok(());
    }
    for entry in WalkDir::new(dir_path).min_depth(1).contents_first(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir_path.display()))?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path).await.ok();
        } else {
            fs::remove_file(path).await.ok();
        }
    }
    Ok(())
}

fn summary_cache_path(cfg: &Config, run_id: &str) -> PathBuf {
    cfg.paths.output_dir.join(format!("{run_id}.summary.json"))
}

async fn load_cached_summary(path: &Path) -> Option<DigestSummary> {
    let text = fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&text) {
        Ok(summary) => Some(summary),
        Err(e) => {
            logw(format!("Ignoring unreadable summary {}: {}", path.display(), e));
            None
        }
    }
}

async fn summarize_emails(
    cfg: &Config,
    client: &Client,
    date: NaiveDate,
    cancel: &CancellationToken,
) -> Result<DigestSummary> {
    let gmail = cfg.require_gmail()?;
    let openai = cfg.require_openai()?;
    let policy = cfg.retry_policy();

    let session = OAuthSession::google(
        "gmail",
        OAuthCredentials::new(&gmail.client_id, &gmail.client_secret, &gmail.refresh_token),
        client.clone(),
    );
    let source = GmailClient::new(
        client.clone(),
        session,
        cfg.summary.senders.clone(),
        cfg.summary.max_emails_per_sender,
    );
    logi(format!("Fetching newsletter emails since {}...", date));
    let emails = with_retry(&policy, "gmail fetch", || source.fetch_unread(date))
        .await
        .context("Failed to fetch emails")?;
    if emails.is_empty() {
        anyhow::bail!(
            "No emails found from {} since {}",
            cfg.summary.senders.join(", "),
            date
        );
    }
    logok(format!("Fetched {} emails", emails.len()));
    if cancel.is_cancelled() {
        anyhow::bail!("Cancelled before summarizing");
    }

    let input = build_summary_input(&emails, cfg.summary.body_char_limit);
    let prompt = load_prompt(cfg.summary.prompt_path.as_deref()).await?;
    let content = wrap_content(&input, date);
    let summarizer = OpenAiClient::new(client.clone(), openai.clone());
    logi("Summarizing...");
    let raw = with_retry(&policy, "summarize", || summarizer.summarize(&prompt, &content))
        .await
        .context("Summarization failed")?;
    DigestSummary::from_json(&raw)
}

async fn narrate_with<S: SpeechSynthesizer>(
    cfg: &Config,
    synth: S,
    run_id: &str,
    transcript: &str,
    work_dir: &Path,
    output: &Path,
    opts: &RunOptions,
) -> Result<PathBuf> {
    let store = open_progress(cfg, NARRATION_PROGRESS_FILE, cfg.quota.narration_daily_calls)?;
    let pauses = Pauses {
        section: Duration::from_millis(cfg.narration.section_pause_ms),
        item: Duration::from_millis(cfg.narration.item_pause_ms),
    };
    let narrator = Narrator::new(&store, synth, FfmpegMixer, cfg.retry_policy())
        .with_cancellation(opts.cancel.clone())
        .retry_failed(opts.retry_failed);
    let path = narrator
        .narrate(NarrationRequest {
            run_id,
            transcript,
            work_dir,
            output,
            pauses,
        })
        .await
        .context("Narration failed")?;
    Ok(path)
}

async fn narrate(
    cfg: &Config,
    client: &Client,
    run_id: &str,
    transcript: &str,
    work_dir: &Path,
    output: &Path,
    opts: &RunOptions,
) -> Result<PathBuf> {
    cfg.require_narration()?;
    match cfg.narration.provider {
        NarrationProvider::Openai => {
            let synth = OpenAiClient::new(client.clone(), cfg.openai.clone());
            narrate_with(cfg, synth, run_id, transcript, work_dir, output, opts).await
        }
        NarrationProvider::Elevenlabs => {
            let synth = ElevenLabsClient::new(client.clone(), cfg.elevenlabs.clone());
            narrate_with(cfg, synth, run_id, transcript, work_dir, output, opts).await
        }
    }
}

async fn render(
    cfg: &Config,
    client: &Client,
    run_id: &str,
    summary: &DigestSummary,
    opts: &RunOptions,
) -> Result<PathBuf> {
    let video_out = cfg.paths.output_dir.join(format!("{run_id}.mp4"));
    if fs::metadata(&video_out).await.is_ok() {
        logi(format!("Skipping render ({} already exists)", video_out.display()));
        return Ok(video_out);
    }

    let missing = missing_video_inputs(&cfg.video.thumbnail, cfg.video.background_music.as_deref()).await;
    if !missing.is_empty() {
        anyhow::bail!("Video inputs not found: {}", missing.join(", "));
    }

    let work_dir = cfg.paths.work_dir.join(run_id);
    fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create {}", work_dir.display()))?;
    let narration = narrate(
        cfg,
        client,
        run_id,
        &summary.transcript,
        &work_dir,
        &work_dir.join("narration.wav"),
        opts,
    )
    .await?;
    logok(format!("Narration ready: {}", narration.display()));

    fs::create_dir_all(&cfg.paths.output_dir).await?;
    let partial = cfg.paths.output_dir.join(format!("{run_id}.part.mp4"));
    logi("Rendering video...");
    ffmpeg_render_still(&cfg.video.thumbnail, &narration, &cfg.video, &partial).await?;
    fs::rename(&partial, &video_out)
        .await
        .with_context(|| format!("Failed to move video into {}", video_out.display()))?;
    logok(format!("Rendered: {}", video_out.display()));

    clear_directory_contents(&work_dir).await?;
    fs::remove_dir(&work_dir).await.ok();
    Ok(video_out)
}

async fn upload(
    cfg: &Config,
    client: &Client,
    run_id: &str,
    date: NaiveDate,
    summary: &DigestSummary,
    video: &Path,
    opts: &RunOptions,
) -> Result<UploadStatus> {
    let yt = cfg.require_youtube()?;
    let session = OAuthSession::google(
        "youtube",
        OAuthCredentials::new(&yt.client_id, &yt.client_secret, &yt.refresh_token),
        client.clone(),
    );
    let host = YoutubeClient::new(client.clone(), session);
    let store = open_progress(cfg, YOUTUBE_PROGRESS_FILE, cfg.quota.youtube_daily_units)?;
    let thumbnail = prepare_thumbnail(cfg, run_id, date).await;
    let request = PublishRequest {
        run_id: run_id.to_string(),
        video: video.to_path_buf(),
        thumbnail,
        meta: VideoMetadata {
            title: clip_chars(&summary.title, YOUTUBE_TITLE_MAX_CHARS),
            description: clip_chars(&summary.description, YOUTUBE_DESCRIPTION_MAX_CHARS),
            tags: yt.tags.clone(),
            category_id: yt.category_id.clone(),
            privacy_status: yt.privacy_status.clone(),
        },
        playlist: yt.playlist.clone().map(|name| PlaylistTarget {
            description: format!("{name} uploads"),
            name,
            privacy_status: yt.playlist_privacy_status.clone(),
            create_if_missing: yt.create_playlist_if_not_exists,
        }),
    };

    let publisher = Publisher::new(&store, &host, cfg.retry_policy())
        .with_cancellation(opts.cancel.clone())
        .retry_failed(opts.retry_failed);
    Ok(match publisher.publish(request).await? {
        PublishOutcome::Published {
            video,
            playlist_id,
            warnings,
        } => UploadStatus::Uploaded {
            video,
            playlist_id,
            warnings,
        },
        PublishOutcome::Deferred(summary) => {
            logw(format!("Upload deferred:\n{}", summary));
            UploadStatus::Deferred(summary)
        }
    })
}

async fn produce(
    cfg: &Config,
    client: &Client,
    run_id: String,
    date: NaiveDate,
    summary: DigestSummary,
    opts: &RunOptions,
    started: Instant,
) -> Result<DigestReport> {
    let video = render(cfg, client, &run_id, &summary, opts).await?;
    let upload = if opts.upload {
        upload(cfg, client, &run_id, date, &summary, &video, opts).await?
    } else {
        UploadStatus::Skipped
    };
    Ok(DigestReport {
        run_id,
        title: summary.title,
        video,
        upload,
        elapsed: started.elapsed(),
    })
}

/// Daily digest for `date` (today in the quota time zone when `None`).
pub async fn run_digest(cfg: &Config, date: Option<NaiveDate>, opts: &RunOptions) -> Result<DigestReport> {
    let started = Instant::now();
    let date = match date {
        Some(date) => date,
        None => today_in(cfg)?,
    };
    let run_id = date.format("%Y-%m-%d").to_string();
    let client = http_client()?;

    let cache = summary_cache_path(cfg, &run_id);
    let summary = match load_cached_summary(&cache).await {
        Some(summary) => {
            logi(format!("Reusing summary from {}", cache.display()));
            summary
        }
        None => {
            let summary = summarize_emails(cfg, &client, date, &opts.cancel).await?;
            fs::create_dir_all(&cfg.paths.output_dir).await?;
            fs::write(&cache, serde_json::to_vec_pretty(&summary)?)
                .await
                .with_context(|| format!("Failed to write {}", cache.display()))?;
            summary
        }
    };
    logok(format!("Summary: {}", summary.title));
    produce(cfg, &client, run_id, date, summary, opts, started).await
}

/// Same pipeline from caller-provided text; markers in the text are honored.
pub async fn run_text(cfg: &Config, input: TextInput, opts: &RunOptions) -> Result<DigestReport> {
    let started = Instant::now();
    if input.text.trim().is_empty() {
        anyhow::bail!("Text is empty");
    }
    let run_id = run_id_for_title(&input.title, &input.text);
    let summary = DigestSummary {
        title: input.title,
        description: input.description.unwrap_or_default(),
        transcript: input.text,
    };
    let client = http_client()?;
    let date = today_in(cfg)?;
    produce(cfg, &client, run_id, date, summary, opts, started).await
}
