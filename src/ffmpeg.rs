use crate::config::VideoConfig;
use crate::narration::stitch::AudioMixer;
use crate::logi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

/// Intermediate format every narration piece is converted to before concat.
pub const STITCH_SAMPLE_RATE: u32 = 44_100;
const LOUDNORM: &str = "loudnorm=I=-16:TP=-1.5:LRA=11";

fn base_args() -> Vec<String> {
    ["ffmpeg", "-y", "-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn push_all(args: &mut Vec<String>, more: &[&str]) {
    args.extend(more.iter().map(|s| s.to_string()));
}

async fn run_cmd(args: &[String]) -> Result<()> {
    let Some((program, rest)) = args.split_first() else {
        return Ok(());
    };

    let output = Command::new(program)
        .args(rest)
        .output()
        .await
        .with_context(|| format!("Command execution failed: {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let start = stderr
            .char_indices()
            .rev()
            .nth(599)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        anyhow::bail!("Command failed ({}): {:?}\n{}", output.status, args, &stderr[start..]);
    }
    Ok(())
}

async fn ensure_output(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .await
        .with_context(|| format!("ffmpeg produced no output at {}", path.display()))?;
    if meta.len() == 0 {
        anyhow::bail!("ffmpeg produced an empty file at {}", path.display());
    }
    Ok(())
}

/// Loudness-normalized mono PCM WAV.
pub async fn ffmpeg_normalize_audio(input: &Path, output: &Path) -> Result<()> {
    let mut args = base_args();
    push_all(&mut args, &["-i"]);
    args.push(input.display().to_string());
    push_all(
        &mut args,
        &["-af", LOUDNORM, "-ar", &STITCH_SAMPLE_RATE.to_string(), "-ac", "1", "-c:a", "pcm_s16le"],
    );
    args.push(output.display().to_string());
    run_cmd(&args).await?;
    ensure_output(output).await
}

/// Silence in the same format `ffmpeg_normalize_audio` produces.
pub async fn ffmpeg_silence(duration: Duration, output: &Path) -> Result<()> {
    let mut args = base_args();
    push_all(
        &mut args,
        &[
            "-f",
            "lavfi",
            "-i",
            &format!("anullsrc=r={STITCH_SAMPLE_RATE}:cl=mono"),
            "-t",
            &format!("{:.3}", duration.as_secs_f64()),
            "-c:a",
            "pcm_s16le",
        ],
    );
    args.push(output.display().to_string());
    run_cmd(&args).await?;
    ensure_output(output).await
}

/// Writes a concat-demuxer list with paths relative to the list file.
pub async fn write_concat_list(list_txt: &Path, inputs: &[PathBuf]) -> Result<()> {
    let base = list_txt.parent().unwrap_or_else(|| Path::new("."));
    let base_abs = std::path::absolute(base).context("Failed to resolve concat list dir")?;
    let mut body = String::new();
    for input in inputs {
        let abs = std::path::absolute(input)
            .with_context(|| format!("Failed to resolve {}", input.display()))?;
        let rel = pathdiff::diff_paths(&abs, &base_abs).unwrap_or(abs);
        let escaped = rel.display().to_string().replace('\'', "'\\''");
        body.push_str(&format!("file '{escaped}'\n"));
    }
    fs::write(list_txt, body)
        .await
        .with_context(|| format!("Failed to write {}", list_txt.display()))
}

pub async fn ffmpeg_concat_audio(list_txt: &Path, out_audio: &Path) -> Result<()> {
    let mut args = base_args();
    push_all(&mut args, &["-f", "concat", "-safe", "0", "-i"]);
    args.push(list_txt.display().to_string());
    push_all(&mut args, &["-c", "copy"]);
    args.push(out_audio.display().to_string());
    run_cmd(&args).await?;
    ensure_output(out_audio).await
}

/// Still image + narration, with optional music looped under it.
pub async fn ffmpeg_render_still(
    image: &Path,
    narration: &Path,
    cfg: &VideoConfig,
    out_mp4: &Path,
) -> Result<()> {
    let fps = cfg.fps.to_string();
    let mut args = base_args();
    push_all(&mut args, &["-loop", "1", "-framerate", &fps, "-i"]);
    args.push(image.display().to_string());
    args.push("-i".to_string());
    args.push(narration.display().to_string());

    match cfg.background_music.as_deref() {
        Some(music) => {
            push_all(&mut args, &["-stream_loop", "-1", "-i"]);
            args.push(music.display().to_string());
            let filter = format!(
                "[2:a]volume={:.4}[bg];[1:a][bg]amix=inputs=2:duration=first:dropout_transition=2:normalize=0[a]",
                cfg.music_volume
            );
            push_all(&mut args, &["-filter_complex", &filter, "-map", "0:v", "-map", "[a]"]);
            logi(format!("Mixing background music: {}", music.display()));
        }
        None => push_all(&mut args, &["-map", "0:v", "-map", "1:a"]),
    }

    push_all(
        &mut args,
        &[
            "-vf",
            "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            "-c:v",
            "libx264",
            "-tune",
            "stillimage",
            "-preset",
            &cfg.preset,
            "-b:v",
            &cfg.video_bitrate,
            "-r",
            &fps,
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            &cfg.audio_bitrate,
            "-threads",
            &cfg.threads.to_string(),
            "-shortest",
            "-movflags",
            "+faststart",
        ],
    );
    args.push(out_mp4.display().to_string());
    run_cmd(&args).await?;
    ensure_output(out_mp4).await
}

pub const THUMBNAIL_WIDTH: u32 = 1280;
pub const THUMBNAIL_HEIGHT: u32 = 720;
const TITLE_FONT_SIZE: u32 = 120;
const DATE_FONT_SIZE: u32 = 70;
const WATERMARK_FONT_SIZE: u32 = 80;
const TEXT_MARGIN: u32 = 60;

/// Text drawn over the thumbnail template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailText {
    pub title: String,
    pub date_label: String,
    pub watermark: String,
}

/// Escapes a drawtext option value for both the option and filtergraph levels.
fn escape_filter_value(value: &str) -> String {
    let mut option = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            option.push('\\');
        }
        option.push(c);
    }
    let mut graph = String::with_capacity(option.len());
    for c in option.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph.push('\\');
        }
        graph.push(c);
    }
    graph
}

fn drawtext(text: &str, font: Option<&Path>, size: u32, x: &str, y: &str) -> String {
    let face = match font {
        Some(path) => format!("fontfile={}", escape_filter_value(&path.display().to_string())),
        None => "font=Sans".to_string(),
    };
    format!(
        "drawtext={face}:text={}:expansion=none:fontsize={size}:fontcolor=white:\
         shadowcolor=black:shadowx=3:shadowy=3:x={x}:y={y}",
        escape_filter_value(text)
    )
}

/// 1280x720 letterboxed template with the title and date top-left and the
/// watermark bottom-right.
pub fn thumbnail_args(
    template: &Path,
    text: &ThumbnailText,
    font: Option<&Path>,
    out_png: &Path,
) -> Vec<String> {
    let title_lines = text.title.lines().count().max(1) as u32;
    let date_y = TEXT_MARGIN + title_lines * TITLE_FONT_SIZE * 6 / 5 + 50;
    let margin = TEXT_MARGIN.to_string();
    let filter = [
        format!(
            "scale={THUMBNAIL_WIDTH}:{THUMBNAIL_HEIGHT}:force_original_aspect_ratio=decrease"
        ),
        format!("pad={THUMBNAIL_WIDTH}:{THUMBNAIL_HEIGHT}:(ow-iw)/2:(oh-ih)/2:black"),
        drawtext(&text.title, font, TITLE_FONT_SIZE, &margin, &margin),
        drawtext(&text.date_label, font, DATE_FONT_SIZE, &margin, &date_y.to_string()),
        drawtext(&text.watermark, font, WATERMARK_FONT_SIZE, "w-tw-40", "h-120"),
    ]
    .join(",");

    let mut args = base_args();
    push_all(&mut args, &["-i"]);
    args.push(template.display().to_string());
    push_all(&mut args, &["-vf", &filter, "-frames:v", "1"]);
    args.push(out_png.display().to_string());
    args
}

pub async fn ffmpeg_thumbnail(
    template: &Path,
    text: &ThumbnailText,
    font: Option<&Path>,
    out_png: &Path,
) -> Result<()> {
    run_cmd(&thumbnail_args(template, text, font, out_png)).await?;
    ensure_output(out_png).await
}

/// `AudioMixer` backed by the ffmpeg binary on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMixer;

#[async_trait]
impl AudioMixer for FfmpegMixer {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<()> {
        ffmpeg_normalize_audio(input, output).await
    }

    async fn silence(&self, duration: Duration, output: &Path) -> Result<()> {
        ffmpeg_silence(duration, output).await
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let list = output.with_extension("concat.txt");
        write_concat_list(&list, inputs).await?;
        let result = ffmpeg_concat_audio(&list, output).await;
        let _ = fs::remove_file(&list).await;
        result
    }
}
