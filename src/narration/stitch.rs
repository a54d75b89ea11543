use super::segment::SegmentKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("no narration segments to stitch")]
    Empty,

    /// A segment in the middle (or end) of the sequence has no audio. Partial
    /// narration is never produced.
    #[error("narration segment {order} of {expected} is missing; refusing to stitch partial audio")]
    MissingSegment { order: usize, expected: usize },

    #[error("narration segment {order} was supplied more than once")]
    DuplicateSegment { order: usize },

    #[error("segment {order} is outside the expected range 0..{expected}")]
    UnexpectedSegment { order: usize, expected: usize },

    #[error("audio for segment {order} not found at {path}")]
    MissingAudio { order: usize, path: PathBuf },

    #[error("audio processing failed: {0:#}")]
    Mixer(anyhow::Error),
}

/// Synthesized audio owned by one segment until it is stitched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentAudio {
    pub order: usize,
    pub kind: SegmentKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pauses {
    /// Between opening, item block and closing.
    pub section: Duration,
    /// Between two consecutive items.
    pub item: Duration,
}

impl Default for Pauses {
    fn default() -> Self {
        Self {
            section: Duration::from_millis(1_000),
            item: Duration::from_millis(500),
        }
    }
}

impl Pauses {
    fn between(&self, prev: SegmentKind, next: SegmentKind) -> Duration {
        if prev == SegmentKind::Item && next == SegmentKind::Item {
            self.item
        } else {
            self.section
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StitchPart {
    Segment { order: usize, path: PathBuf },
    Pause(Duration),
}

/// Validated, ordered layout of the composite track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchPlan {
    pub parts: Vec<StitchPart>,
}

impl StitchPlan {
    /// Orders `audio` by segment order and checks that exactly
    /// `0..expected` is present before interleaving pauses.
    pub fn build(
        expected: usize,
        audio: Vec<SegmentAudio>,
        pauses: Pauses,
    ) -> Result<Self, StitchError> {
        if expected == 0 {
            return Err(StitchError::Empty);
        }

        let mut by_order: BTreeMap<usize, SegmentAudio> = BTreeMap::new();
        for entry in audio {
            if entry.order >= expected {
                return Err(StitchError::UnexpectedSegment {
                    order: entry.order,
                    expected,
                });
            }
            let order = entry.order;
            if by_order.insert(order, entry).is_some() {
                return Err(StitchError::DuplicateSegment { order });
            }
        }
        if let Some(order) = (0..expected).find(|o| !by_order.contains_key(o)) {
            return Err(StitchError::MissingSegment { order, expected });
        }

        let mut parts = Vec::with_capacity(expected * 2);
        let mut prev: Option<SegmentKind> = None;
        for (order, entry) in by_order {
            if let Some(prev_kind) = prev {
                let pause = pauses.between(prev_kind, entry.kind);
                if !pause.is_zero() {
                    parts.push(StitchPart::Pause(pause));
                }
            }
            prev = Some(entry.kind);
            parts.push(StitchPart::Segment {
                order,
                path: entry.path,
            });
        }
        Ok(Self { parts })
    }

    pub fn segment_orders(&self) -> Vec<usize> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                StitchPart::Segment { order, .. } => Some(*order),
                StitchPart::Pause(_) => None,
            })
            .collect()
    }
}

/// Low-level audio operations the stitcher needs.
#[async_trait]
pub trait AudioMixer: Send + Sync {
    /// Loudness-normalizes `input` into the common intermediate format.
    async fn normalize(&self, input: &Path, output: &Path) -> anyhow::Result<()>;
    /// Writes silence of `duration` in the same intermediate format.
    async fn silence(&self, duration: Duration, output: &Path) -> anyhow::Result<()>;
    /// Concatenates `inputs` in order into `output`.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> anyhow::Result<()>;
}

pub struct Stitcher<M> {
    mixer: M,
    scratch_dir: PathBuf,
}

impl<M: AudioMixer> Stitcher<M> {
    pub fn new(mixer: M, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            mixer,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Renders `plan` into `output`. On success the segment audio files and
    /// all intermediates are deleted; the composite owns the narration.
    pub async fn stitch(&self, plan: &StitchPlan, output: &Path) -> Result<PathBuf, StitchError> {
        for part in &plan.parts {
            if let StitchPart::Segment { order, path } = part {
                if fs::metadata(path).await.is_err() {
                    return Err(StitchError::MissingAudio {
                        order: *order,
                        path: path.clone(),
                    });
                }
            }
        }

        fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| StitchError::Mixer(e.into()))?;

        let mut rendered: Vec<PathBuf> = Vec::with_capacity(plan.parts.len());
        let mut intermediates: Vec<PathBuf> = Vec::new();
        for part in &plan.parts {
            match part {
                StitchPart::Segment { order, path } => {
                    let normalized = self.scratch_dir.join(format!("norm_{order:03}.wav"));
                    self.mixer
                        .normalize(path, &normalized)
                        .await
                        .map_err(StitchError::Mixer)?;
                    intermediates.push(normalized.clone());
                    rendered.push(normalized);
                }
                StitchPart::Pause(duration) => {
                    let silence = self
                        .scratch_dir
                        .join(format!("silence_{}ms.wav", duration.as_millis()));
                    if !intermediates.contains(&silence) {
                        self.mixer
                            .silence(*duration, &silence)
                            .await
                            .map_err(StitchError::Mixer)?;
                        intermediates.push(silence.clone());
                    }
                    rendered.push(silence);
                }
            }
        }

        self.mixer
            .concat(&rendered, output)
            .await
            .map_err(StitchError::Mixer)?;

        for path in intermediates {
            let _ = fs::remove_file(&path).await;
        }
        for part in &plan.parts {
            if let StitchPart::Segment { path, .. } = part {
                let _ = fs::remove_file(path).await;
            }
        }
        tracing::info!(
            output = %output.display(),
            segments = plan.segment_orders().len(),
            "Narration stitched"
        );
        Ok(output.to_path_buf())
    }
}
