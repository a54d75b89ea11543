use crate::progress::{ResetSchedule, RetryPolicy};
use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
    #[serde(default)]
    pub narration: NarrationConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub brave: BraveConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Progress snapshots and their locks.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Per-run scratch: segments, intermediates.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            work_dir: default_work_dir(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default = "default_tts_instructions")]
    pub instructions: String,
}

fn default_summary_model() -> String {
    "gpt-4.1".to_string()
}

fn default_tts_model() -> String {
    "gpt-4o-mini-tts".to_string()
}

fn default_tts_voice() -> String {
    "sage".to_string()
}

fn default_tts_instructions() -> String {
    "Speak clearly and naturally with a professional tone.".to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            summary_model: default_summary_model(),
            tts_model: default_tts_model(),
            voice: default_tts_voice(),
            instructions: default_tts_instructions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElevenLabsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
}

fn default_voice_id() -> String {
    "JBFqnCBsd6RMkjVDRZzb".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: default_voice_id(),
            model_id: default_model_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationProvider {
    #[default]
    Openai,
    Elevenlabs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NarrationConfig {
    #[serde(default)]
    pub provider: NarrationProvider,
    #[serde(default = "default_section_pause_ms")]
    pub section_pause_ms: u64,
    #[serde(default = "default_item_pause_ms")]
    pub item_pause_ms: u64,
}

fn default_section_pause_ms() -> u64 {
    1_000
}

fn default_item_pause_ms() -> u64 {
    500
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            provider: NarrationProvider::default(),
            section_pause_ms: default_section_pause_ms(),
            item_pause_ms: default_item_pause_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummaryConfig {
    /// Newsletter senders searched in the mailbox.
    #[serde(default = "default_senders")]
    pub senders: Vec<String>,
    #[serde(default = "default_max_emails")]
    pub max_emails_per_sender: u32,
    /// Email bodies longer than this are cut and suffixed with `...`.
    #[serde(default = "default_body_char_limit")]
    pub body_char_limit: usize,
    /// Replaces the built-in summarization prompt.
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
}

fn default_senders() -> Vec<String> {
    vec!["news@smol.ai".to_string()]
}

fn default_max_emails() -> u32 {
    10
}

fn default_body_char_limit() -> usize {
    2_000
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            senders: default_senders(),
            max_emails_per_sender: default_max_emails(),
            body_char_limit: default_body_char_limit(),
            prompt_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoConfig {
    #[serde(default = "default_thumbnail")]
    pub thumbnail: PathBuf,
    /// Looped under the narration when present.
    #[serde(default)]
    pub background_music: Option<PathBuf>,
    #[serde(default = "default_music_volume")]
    pub music_volume: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Headline drawn on the generated YouTube thumbnail; `\n` breaks lines.
    #[serde(default = "default_thumbnail_title")]
    pub thumbnail_title: String,
    #[serde(default = "default_watermark")]
    pub watermark: String,
    /// TrueType font for thumbnail text; fontconfig's `Sans` when unset.
    #[serde(default)]
    pub font: Option<PathBuf>,
}

fn default_thumbnail() -> PathBuf {
    PathBuf::from("resources/thumbnail.png")
}

fn default_thumbnail_title() -> String {
    "UltraSummary\nAI Recap".to_string()
}

fn default_watermark() -> String {
    "[OFA]".to_string()
}

fn default_music_volume() -> f64 {
    0.025
}

fn default_fps() -> u32 {
    24
}

fn default_video_bitrate() -> String {
    "1000k".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_preset() -> String {
    "ultrafast".to_string()
}

fn default_threads() -> u32 {
    2
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            thumbnail: default_thumbnail(),
            background_music: None,
            music_volume: default_music_volume(),
            fps: default_fps(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            preset: default_preset(),
            threads: default_threads(),
            thumbnail_title: default_thumbnail_title(),
            watermark: default_watermark(),
            font: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YoutubeConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Playlist every uploaded digest is added to.
    #[serde(default)]
    pub playlist: Option<String>,
    #[serde(default = "default_true")]
    pub create_playlist_if_not_exists: bool,
    #[serde(default = "default_privacy")]
    pub privacy_status: String,
    #[serde(default = "default_privacy")]
    pub playlist_privacy_status: String,
    #[serde(default = "default_category_id")]
    pub category_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_privacy() -> String {
    "private".to_string()
}

fn default_category_id() -> String {
    "22".to_string()
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            playlist: None,
            create_playlist_if_not_exists: true,
            privacy_status: default_privacy(),
            playlist_privacy_status: default_privacy(),
            category_id: default_category_id(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GmailConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_market")]
    pub market: String,
    #[serde(default = "default_tracks_per_artist")]
    pub tracks_per_artist: usize,
}

fn default_market() -> String {
    "US".to_string()
}

fn default_tracks_per_artist() -> usize {
    5
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            market: default_market(),
            tracks_per_artist: default_tracks_per_artist(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BraveConfig {
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts per item before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_call_timeout_secs() -> u64 {
    120
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            call_timeout: Duration::from_secs(cfg.call_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    #[serde(default = "default_youtube_daily_units")]
    pub youtube_daily_units: u64,
    #[serde(default = "default_narration_daily_calls")]
    pub narration_daily_calls: u64,
    /// IANA zone whose midnight starts a new quota period.
    #[serde(default = "default_reset_timezone")]
    pub reset_timezone: String,
}

fn default_youtube_daily_units() -> u64 {
    10_000
}

fn default_narration_daily_calls() -> u64 {
    500
}

fn default_reset_timezone() -> String {
    "America/Los_Angeles".to_string()
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            youtube_daily_units: default_youtube_daily_units(),
            narration_daily_calls: default_narration_daily_calls(),
            reset_timezone: default_reset_timezone(),
        }
    }
}

const PRIVACY_VALUES: &[&str] = &["private", "unlisted", "public"];

fn require_field(value: &str, field: &str, env: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("config.json: {field} missing (or set {env})");
    }
    Ok(())
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let mut config = Self::parse(&content)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parses and validates; no environment lookups.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(content).context("config.json: invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Fills secrets left empty in the file from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let slots: [(&mut String, &str); 12] = [
            (&mut self.openai.api_key, "OPENAI_API_KEY"),
            (&mut self.elevenlabs.api_key, "ELEVENLABS_API_KEY"),
            (&mut self.gmail.client_id, "GMAIL_CLIENT_ID"),
            (&mut self.gmail.client_secret, "GMAIL_CLIENT_SECRET"),
            (&mut self.gmail.refresh_token, "GMAIL_REFRESH_TOKEN"),
            (&mut self.youtube.client_id, "YOUTUBE_CLIENT_ID"),
            (&mut self.youtube.client_secret, "YOUTUBE_CLIENT_SECRET"),
            (&mut self.youtube.refresh_token, "YOUTUBE_REFRESH_TOKEN"),
            (&mut self.spotify.client_id, "SPOTIFY_CLIENT_ID"),
            (&mut self.spotify.client_secret, "SPOTIFY_CLIENT_SECRET"),
            (&mut self.spotify.refresh_token, "SPOTIFY_REFRESH_TOKEN"),
            (&mut self.brave.api_key, "BRAVE_SEARCH_API_KEY"),
        ];
        for (slot, name) in slots {
            if slot.is_empty() {
                if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                    *slot = value;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            bail!("config.json: retry.max_attempts must be at least 1");
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            bail!("config.json: retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if retry.call_timeout_secs == 0 {
            bail!("config.json: retry.call_timeout_secs must be positive");
        }

        self.reset_schedule()?;
        if self.quota.youtube_daily_units == 0 {
            bail!("config.json: quota.youtube_daily_units must be positive");
        }
        if self.quota.narration_daily_calls == 0 {
            bail!("config.json: quota.narration_daily_calls must be positive");
        }

        let video = &self.video;
        if !(0.0..=1.0).contains(&video.music_volume) {
            bail!("config.json: video.music_volume must be between 0 and 1");
        }
        if video.fps == 0 || video.fps > 120 {
            bail!("config.json: video.fps must be between 1 and 120");
        }
        if video.threads == 0 {
            bail!("config.json: video.threads must be positive");
        }

        for (field, value) in [
            ("youtube.privacy_status", &self.youtube.privacy_status),
            (
                "youtube.playlist_privacy_status",
                &self.youtube.playlist_privacy_status,
            ),
        ] {
            if !PRIVACY_VALUES.contains(&value.as_str()) {
                bail!("config.json: {field} must be one of {PRIVACY_VALUES:?}, got {value:?}");
            }
        }

        if self.summary.senders.iter().all(|s| s.trim().is_empty()) {
            bail!("config.json: summary.senders needs at least one sender");
        }
        if self.summary.body_char_limit == 0 {
            bail!("config.json: summary.body_char_limit must be positive");
        }
        if self.spotify.tracks_per_artist == 0 {
            bail!("config.json: spotify.tracks_per_artist must be positive");
        }
        if self.narration.section_pause_ms > 60_000 || self.narration.item_pause_ms > 60_000 {
            bail!("config.json: narration pauses must not exceed 60000 ms");
        }
        Ok(())
    }

    pub fn reset_timezone(&self) -> Result<Tz> {
        self.quota.reset_timezone.parse::<Tz>().map_err(|_| {
            anyhow::anyhow!(
                "config.json: quota.reset_timezone {:?} is not an IANA time zone",
                self.quota.reset_timezone
            )
        })
    }

    pub fn reset_schedule(&self) -> Result<ResetSchedule> {
        Ok(ResetSchedule::new(self.reset_timezone()?))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    pub fn require_openai(&self) -> Result<&OpenAiConfig> {
        require_field(&self.openai.api_key, "openai.api_key", "OPENAI_API_KEY")?;
        Ok(&self.openai)
    }

    pub fn require_elevenlabs(&self) -> Result<&ElevenLabsConfig> {
        require_field(
            &self.elevenlabs.api_key,
            "elevenlabs.api_key",
            "ELEVENLABS_API_KEY",
        )?;
        Ok(&self.elevenlabs)
    }

    pub fn require_gmail(&self) -> Result<&GmailConfig> {
        require_field(&self.gmail.client_id, "gmail.client_id", "GMAIL_CLIENT_ID")?;
        require_field(
            &self.gmail.client_secret,
            "gmail.client_secret",
            "GMAIL_CLIENT_SECRET",
        )?;
        require_field(
            &self.gmail.refresh_token,
            "gmail.refresh_token",
            "GMAIL_REFRESH_TOKEN",
        )?;
        Ok(&self.gmail)
    }

    pub fn require_youtube(&self) -> Result<&YoutubeConfig> {
        require_field(&self.youtube.client_id, "youtube.client_id", "YOUTUBE_CLIENT_ID")?;
        require_field(
            &self.youtube.client_secret,
            "youtube.client_secret",
            "YOUTUBE_CLIENT_SECRET",
        )?;
        require_field(
            &self.youtube.refresh_token,
            "youtube.refresh_token",
            "YOUTUBE_REFRESH_TOKEN",
        )?;
        Ok(&self.youtube)
    }

    pub fn require_spotify(&self) -> Result<&SpotifyConfig> {
        require_field(&self.spotify.client_id, "spotify.client_id", "SPOTIFY_CLIENT_ID")?;
        require_field(
            &self.spotify.client_secret,
            "spotify.client_secret",
            "SPOTIFY_CLIENT_SECRET",
        )?;
        require_field(
            &self.spotify.refresh_token,
            "spotify.refresh_token",
            "SPOTIFY_REFRESH_TOKEN",
        )?;
        Ok(&self.spotify)
    }

    pub fn require_brave(&self) -> Result<&BraveConfig> {
        require_field(&self.brave.api_key, "brave.api_key", "BRAVE_SEARCH_API_KEY")?;
        Ok(&self.brave)
    }

    /// Credentials for whichever narration provider is selected.
    pub fn require_narration(&self) -> Result<()> {
        match self.narration.provider {
            NarrationProvider::Openai => self.require_openai().map(|_| ()),
            NarrationProvider::Elevenlabs => self.require_elevenlabs().map(|_| ()),
        }
    }
}
