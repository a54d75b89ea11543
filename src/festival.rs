//! Festival lineup to Spotify and YouTube playlists.

use crate::api::brave::BraveSearch;
use crate::api::oauth::{OAuthCredentials, OAuthSession};
use crate::api::spotify::{SpotifyClient, ADD_BATCH};
use crate::api::youtube::{cost, YoutubeClient};
use crate::api::{http_client, MusicCatalog, Track, VideoHost, WebSearch};
use crate::config::Config;
use crate::pipeline::{open_progress, YOUTUBE_PROGRESS_FILE};
use crate::progress::{
    idempotency_key, ItemStatus, Job, JobError, JobExecutor, ProgressStore, ResumableRunner,
    RetryPolicy, RunStop, RunSummary,
};
use crate::publish::{playlist_job, PlaylistTarget, YoutubeExecutor};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FestivalOptions {
    pub playlist_name: String,
    pub market: String,
    pub tracks_per_artist: usize,
    /// Skip the YouTube half entirely.
    pub spotify_only: bool,
    pub youtube_privacy_status: String,
}

#[derive(Debug, Clone)]
pub struct TrackPayload {
    pub track: Track,
    pub playlist_id: String,
}

/// Finds a video for the track and appends it to the YouTube playlist.
pub struct TrackExecutor<'a, W, H> {
    search: &'a W,
    host: &'a H,
}

#[async_trait]
impl<W: WebSearch, H: VideoHost> JobExecutor<TrackPayload> for TrackExecutor<'_, W, H> {
    async fn execute(&self, job: &Job<TrackPayload>) -> Result<Option<String>, JobError> {
        let track = &job.payload.track;
        let query = format!("{} - {}", track.artist, track.name);
        let Some(video_id) = self.search.search_video(&query).await? else {
            return Err(JobError::permanent(format!("no YouTube video found for {query:?}")));
        };
        self.host
            .add_to_playlist(&job.payload.playlist_id, &video_id)
            .await?;
        logok(format!("Added to YouTube playlist: {} ({})", track.name, video_id));
        Ok(Some(video_id))
    }
}

/// Appends one batch of track URIs to a Spotify playlist.
pub struct SpotifyBatchExecutor<'a, C> {
    catalog: &'a C,
    playlist_id: String,
}

#[async_trait]
impl<C: MusicCatalog> JobExecutor<Vec<String>> for SpotifyBatchExecutor<'_, C> {
    async fn execute(&self, job: &Job<Vec<String>>) -> Result<Option<String>, JobError> {
        self.catalog
            .add_tracks(&self.playlist_id, &job.payload)
            .await?;
        Ok(None)
    }
}

pub fn track_key(track: &Track, playlist_name: &str) -> String {
    idempotency_key(&[&track.artist, &track.name, playlist_name])
}

fn spotify_track_key(playlist_id: &str, uri: &str) -> String {
    idempotency_key(&["spotify-track", playlist_id, uri])
}

fn spotify_meta_key(playlist_name: &str) -> String {
    format!("spotify_playlist:{playlist_name}")
}

fn youtube_meta_key(playlist_name: &str) -> String {
    format!("youtube_playlist:{playlist_name}")
}

#[derive(Debug, Clone)]
pub struct FestivalReport {
    pub tracks: usize,
    pub artists_missing: Vec<String>,
    pub spotify_playlist_id: String,
    pub spotify: RunSummary,
    pub youtube_playlist_id: Option<String>,
    pub youtube: Option<RunSummary>,
    /// The YouTube half could not start (quota or cancellation).
    pub youtube_deferred: bool,
}

impl FestivalReport {
    /// True when either half stopped early and must be resumed later.
    pub fn needs_rerun(&self) -> bool {
        let stopped = |s: &RunSummary| s.stop != RunStop::Completed;
        stopped(&self.spotify) || self.youtube_deferred || self.youtube.as_ref().is_some_and(stopped)
    }
}

impl fmt::Display for FestivalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tracks collected: {}", self.tracks)?;
        if !self.artists_missing.is_empty() {
            writeln!(f, "Artists not found: {}", self.artists_missing.join(", "))?;
        }
        writeln!(f, "Spotify playlist: {}", self.spotify_playlist_id)?;
        writeln!(f, "{}", self.spotify)?;
        match (&self.youtube_playlist_id, &self.youtube) {
            (Some(pid), Some(summary)) => {
                writeln!(f, "YouTube playlist: https://www.youtube.com/playlist?list={pid}")?;
                write!(f, "{summary}")
            }
            _ if self.youtube_deferred => write!(f, "YouTube playlist: deferred, run again to continue"),
            _ => write!(f, "YouTube playlist: not built"),
        }
    }
}

/// Artist names from a JSON array file, blanks dropped.
pub async fn load_artists(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read artist list: {}", path.display()))?;
    let artists: Vec<String> = serde_json::from_str(&text)
        .with_context(|| format!("{} must be a JSON array of artist names", path.display()))?;
    let artists: Vec<String> = artists
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if artists.is_empty() {
        anyhow::bail!("{} lists no artists", path.display());
    }
    Ok(artists)
}

/// Builds both playlists with clients configured from `cfg`. Progress shares
/// the YouTube ledger with the digest uploader.
pub async fn run_festival(
    cfg: &Config,
    artists: &[String],
    opts: &FestivalOptions,
    cancel: CancellationToken,
    retry_failed: bool,
) -> Result<FestivalReport> {
    let sp = cfg.require_spotify()?;
    if !opts.spotify_only {
        cfg.require_youtube()?;
        cfg.require_brave()?;
    }
    let client = http_client()?;
    let policy = cfg.retry_policy();

    let catalog = SpotifyClient::new(
        client.clone(),
        OAuthSession::spotify(
            OAuthCredentials::new(&sp.client_id, &sp.client_secret, &sp.refresh_token),
            client.clone(),
        ),
        policy.clone(),
    );
    let yt = &cfg.youtube;
    let host = YoutubeClient::new(
        client.clone(),
        OAuthSession::google(
            "youtube",
            OAuthCredentials::new(&yt.client_id, &yt.client_secret, &yt.refresh_token),
            client.clone(),
        ),
    );
    let search = BraveSearch::new(client, cfg.brave.api_key.clone());
    let store = open_progress(cfg, YOUTUBE_PROGRESS_FILE, cfg.quota.youtube_daily_units)?;

    FestivalBuilder::new(&store, &catalog, &search, &host, policy)
        .with_cancellation(cancel)
        .retry_failed(retry_failed)
        .build(artists, opts)
        .await
}

pub struct FestivalBuilder<'a, C, W, H> {
    store: &'a ProgressStore,
    catalog: &'a C,
    search: &'a W,
    host: &'a H,
    policy: RetryPolicy,
    cancel: CancellationToken,
    retry_failed: bool,
}

impl<'a, C, W, H> FestivalBuilder<'a, C, W, H>
where
    C: MusicCatalog,
    W: WebSearch,
    H: VideoHost,
{
    pub fn new(
        store: &'a ProgressStore,
        catalog: &'a C,
        search: &'a W,
        host: &'a H,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            search,
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

    /// Top tracks for every artist found, in lineup order.
    pub async fn collect_tracks(
        &self,
        artists: &[String],
        opts: &FestivalOptions,
    ) -> Result<(Vec<Track>, Vec<String>)> {
        let mut tracks: Vec<Track> = Vec::new();
        let mut missing = Vec::new();
        for artist in artists {
            if self.cancel.is_cancelled() {
                anyhow::bail!("Cancelled while collecting tracks");
            }
            logi(format!("Processing: {}", artist));
            let Some(artist_id) = self
                .catalog
                .search_artist(artist)
                .await
                .with_context(|| format!("Spotify artist search failed for {artist}"))?
            else {
                logw(format!("Artist not found: {}", artist));
                missing.push(artist.clone());
                continue;
            };
            let found = self
                .catalog
                .top_tracks(&artist_id, &opts.market, opts.tracks_per_artist)
                .await
                .with_context(|| format!("Spotify top tracks failed for {artist}"))?;
            logi(format!("Found {} tracks for {}", found.len(), artist));
            for track in found {
                if !tracks.iter().any(|t| t.uri == track.uri) {
                    tracks.push(track);
                }
            }
        }
        Ok((tracks, missing))
    }

    async fn ensure_spotify_playlist(&self, name: &str) -> Result<String> {
        if let Some(id) = self.store.meta(&spotify_meta_key(name)) {
            return Ok(id);
        }
        let id = self
            .catalog
            .create_playlist(name, &format!("Playlist created from festival lineup: {name}"))
            .await
            .context("Failed to create Spotify playlist")?;
        self.store.set_meta(&spotify_meta_key(name), &id)?;
        Ok(id)
    }

    /// Adds the tracks not yet recorded in the playlist, in batches. Each
    /// track is recorded on its own, so a changed lineup never re-adds one.
    async fn fill_spotify(&self, playlist_id: &str, tracks: &[Track]) -> Result<RunSummary> {
        let pending: Vec<&Track> = tracks
            .iter()
            .filter(|t| {
                self.store.status_of(&spotify_track_key(playlist_id, &t.uri))
                    != Some(ItemStatus::Done)
            })
            .collect();
        let jobs: Vec<Job<Vec<String>>> = pending
            .chunks(ADD_BATCH)
            .map(|chunk| {
                let uris: Vec<String> = chunk.iter().map(|t| t.uri.clone()).collect();
                let mut parts = vec!["spotify-add", playlist_id];
                parts.extend(uris.iter().map(String::as_str));
                Job::new(idempotency_key(&parts), 0, uris)
            })
            .collect();
        let runner = ResumableRunner::new(
            self.store,
            SpotifyBatchExecutor {
                catalog: self.catalog,
                playlist_id: playlist_id.to_string(),
            },
            self.policy.clone(),
        )
        .with_cancellation(self.cancel.clone())
        .retry_failed(self.retry_failed);
        let summary = runner.run(&jobs).await?;

        let added: Vec<String> = jobs
            .iter()
            .filter(|job| self.store.status_of(&job.key) == Some(ItemStatus::Done))
            .flat_map(|job| job.payload.iter().map(|uri| spotify_track_key(playlist_id, uri)))
            .collect();
        self.store.mark_all_done(added.iter().map(String::as_str))?;
        Ok(summary)
    }

    async fn ensure_youtube_playlist(&self, opts: &FestivalOptions) -> Result<Option<String>> {
        let name = &opts.playlist_name;
        if let Some(id) = self.store.meta(&youtube_meta_key(name)) {
            return Ok(Some(id));
        }
        let job = playlist_job(PlaylistTarget {
            name: name.clone(),
            description: format!("Playlist created from festival lineup: {name}"),
            privacy_status: opts.youtube_privacy_status.clone(),
            create_if_missing: true,
        });
        let runner = ResumableRunner::new(self.store, YoutubeExecutor::new(self.host), self.policy.clone())
            .with_cancellation(self.cancel.clone())
            .retry_failed(self.retry_failed);
        let summary = runner.run(std::slice::from_ref(&job)).await?;
        match summary.stop {
            RunStop::QuotaExhausted { reset_at } => {
                logw(format!(
                    "YouTube quota exhausted before the playlist could be created; run again after {}",
                    reset_at.to_rfc3339()
                ));
                return Ok(None);
            }
            RunStop::Cancelled => return Ok(None),
            RunStop::Completed | RunStop::RejectedInput(_) => {}
        }
        match self.store.item(&job.key) {
            Some(item) if item.status == ItemStatus::Done => {
                let id = item.output.context("Playlist step recorded no id")?;
                self.store.set_meta(&youtube_meta_key(name), &id)?;
                Ok(Some(id))
            }
            Some(item) if item.status == ItemStatus::Failed => anyhow::bail!(
                "YouTube playlist step failed: {}",
                item.last_error.unwrap_or_default()
            ),
            _ => Ok(None),
        }
    }

    pub async fn build(&self, artists: &[String], opts: &FestivalOptions) -> Result<FestivalReport> {
        let (tracks, artists_missing) = self.collect_tracks(artists, opts).await?;
        if tracks.is_empty() {
            anyhow::bail!("No tracks found to add to the Spotify playlist");
        }

        let spotify_playlist_id = self.ensure_spotify_playlist(&opts.playlist_name).await?;
        let spotify = self.fill_spotify(&spotify_playlist_id, &tracks).await?;
        logok(format!(
            "Spotify playlist {}: {} tracks, {} batches this run",
            spotify_playlist_id,
            tracks.len(),
            spotify.total
        ));

        let mut report = FestivalReport {
            tracks: tracks.len(),
            artists_missing,
            spotify_playlist_id,
            spotify,
            youtube_playlist_id: None,
            youtube: None,
            youtube_deferred: false,
        };
        if opts.spotify_only {
            return Ok(report);
        }

        let Some(playlist_id) = self.ensure_youtube_playlist(opts).await? else {
            report.youtube_deferred = true;
            return Ok(report);
        };
        let jobs: Vec<Job<TrackPayload>> = tracks
            .iter()
            .map(|track| {
                Job::new(
                    track_key(track, &opts.playlist_name),
                    cost::PLAYLIST_ADD,
                    TrackPayload {
                        track: track.clone(),
                        playlist_id: playlist_id.clone(),
                    },
                )
            })
            .collect();
        let runner = ResumableRunner::new(
            self.store,
            TrackExecutor {
                search: self.search,
                host: self.host,
            },
            self.policy.clone(),
        )
        .with_cancellation(self.cancel.clone())
        .retry_failed(self.retry_failed);
        let youtube = runner.run(&jobs).await?;
        if let RunStop::QuotaExhausted { reset_at } = &youtube.stop {
            logw(format!(
                "Reached the daily YouTube quota. Progress saved; run again after {}",
                reset_at.to_rfc3339()
            ));
        }

        report.youtube_playlist_id = Some(playlist_id);
        report.youtube = Some(youtube);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_artists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artists.json");
        fs::write(&path, r#"["Tame Impala", "  ", " Bicep "]"#).await.unwrap();
        assert_eq!(load_artists(&path).await.unwrap(), vec!["Tame Impala", "Bicep"]);

        fs::write(&path, r#"{"artists": []}"#).await.unwrap();
        assert!(load_artists(&path).await.is_err());
        fs::write(&path, "[]").await.unwrap();
        assert!(load_artists(&path).await.is_err());
    }

    #[test]
    fn test_track_key_depends_on_playlist() {
        let track = Track {
            uri: "spotify:track:1".into(),
            name: "Let It Happen".into(),
            artist: "Tame Impala".into(),
        };
        assert_eq!(track_key(&track, "Friday"), track_key(&track, "Friday"));
        assert_ne!(track_key(&track, "Friday"), track_key(&track, "Saturday"));
    }
}
