use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use digest_reels::config::Config;
use digest_reels::festival::{self, FestivalOptions};
use digest_reels::init;

#[derive(Parser, Debug)]
#[command(name = "fest-playlists", version, about = "Festival lineup to Spotify and YouTube playlists")]
struct Args {
    /// JSON array of artist names.
    #[arg(long, default_value = "artists.json")]
    artists: PathBuf,

    #[arg(long, env = "FEST_PLAYLIST_NAME")]
    playlist_name: String,

    /// Spotify market; the config value when omitted.
    #[arg(long)]
    market: Option<String>,

    #[arg(long)]
    tracks_per_artist: Option<usize>,

    /// Only build the Spotify playlist.
    #[arg(long)]
    skip_youtube: bool,

    #[arg(long)]
    retry_failed: bool,

    #[arg(long, env = "DIGEST_REELS_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    digest_reels::init_tracing();
    let args = Args::parse();

    let cfg = Config::load(&args.config).await?;
    init::ensure_directories(&cfg.paths).await?;
    let artists = festival::load_artists(&args.artists).await?;

    let opts = FestivalOptions {
        playlist_name: args.playlist_name,
        market: args.market.unwrap_or_else(|| cfg.spotify.market.clone()),
        tracks_per_artist: args.tracks_per_artist.unwrap_or(cfg.spotify.tracks_per_artist),
        spotify_only: args.skip_youtube,
        youtube_privacy_status: cfg.youtube.playlist_privacy_status.clone(),
    };

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping after the current track");
            token.cancel();
        }
    });

    let report = festival::run_festival(&cfg, &artists, &opts, cancel, args.retry_failed).await?;
    println!("{report}");
    if report.needs_rerun() {
        std::process::exit(2);
    }
    Ok(())
}
