use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use digest_reels::config::Config;
use digest_reels::init;
use digest_reels::pipeline::{self, RunOptions, TextInput, UploadStatus};
use digest_reels::progress::{ItemStatus, ProgressStore};

#[derive(Parser, Debug)]
#[command(name = "digest-reels", version, about = "Newsletter digest to narrated video")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "DIGEST_REELS_CONFIG", default_value = "config.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize the day's newsletters into a video.
    Run {
        /// Emails since this date (YYYY-MM-DD); today by default.
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        upload: bool,
        /// Give items that failed in earlier runs another chance.
        #[arg(long)]
        retry_failed: bool,
    },
    /// Narrate the given text into a video.
    Text {
        #[arg(long)]
        text: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        upload: bool,
        #[arg(long)]
        retry_failed: bool,
    },
    /// Print quota and item counts of a progress file.
    Status {
        #[arg(long)]
        progress: PathBuf,
    },
    /// Remove a lock left by a run that was killed.
    Unlock {
        #[arg(long)]
        progress: PathBuf,
    },
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing the current item before stopping");
            token.cancel();
        }
    });
    cancel
}

async fn prepare(config: &Path) -> Result<Config> {
    let cfg = Config::load(config).await?;
    init::ensure_directories(&cfg.paths).await?;
    if !init::check_ffmpeg().await {
        tracing::warn!("FFmpeg not found in PATH. Please install FFmpeg.");
    }
    Ok(cfg)
}

fn status(progress: &Path) -> Result<()> {
    let Some(snapshot) = ProgressStore::peek(progress)
        .with_context(|| format!("Failed to read {}", progress.display()))?
    else {
        println!("{}: no progress recorded", progress.display());
        return Ok(());
    };
    let count = |status: ItemStatus| snapshot.items.iter().filter(|i| i.status == status).count();
    let quota = &snapshot.quota;
    println!("{}", progress.display());
    println!(
        "  quota: {}/{} used, resets at {}",
        quota.used(),
        quota.limit(),
        quota.reset_at().to_rfc3339()
    );
    println!(
        "  items: done={} failed={} pending={}",
        count(ItemStatus::Done),
        count(ItemStatus::Failed),
        count(ItemStatus::Pending)
    );
    for item in snapshot.items.iter().filter(|i| i.status == ItemStatus::Failed) {
        println!(
            "  failed {}: {}",
            item.key.get(..12).unwrap_or(&item.key),
            item.last_error.as_deref().unwrap_or("")
        );
    }
    for (key, value) in &snapshot.meta {
        println!("  {key} = {value}");
    }
    Ok(())
}

fn exit_code(upload: &UploadStatus) -> i32 {
    match upload {
        UploadStatus::Deferred(_) => 2,
        _ => 0,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    digest_reels::init_tracing();
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Status { progress } => return status(&progress),
        Command::Unlock { progress } => {
            if ProgressStore::break_lock(&progress)? {
                println!("Removed lock for {}", progress.display());
            } else {
                println!("{} was not locked", progress.display());
            }
            return Ok(());
        }
        Command::Run {
            date,
            upload,
            retry_failed,
        } => {
            let cfg = prepare(&cli.config).await?;
            let opts = RunOptions {
                upload,
                retry_failed,
                cancel: cancel_on_ctrl_c(),
            };
            pipeline::run_digest(&cfg, date, &opts).await?
        }
        Command::Text {
            text,
            title,
            description,
            upload,
            retry_failed,
        } => {
            let cfg = prepare(&cli.config).await?;
            let opts = RunOptions {
                upload,
                retry_failed,
                cancel: cancel_on_ctrl_c(),
            };
            let input = TextInput {
                text,
                title,
                description,
            };
            pipeline::run_text(&cfg, input, &opts).await?
        }
    };

    println!("{report}");
    std::process::exit(exit_code(&report.upload));
}
