//! Transcript to narration audio: segment, synthesize each piece through the
//! resumable runner, then stitch the pieces in order.

pub mod segment;
pub mod stitch;

use crate::api::SpeechSynthesizer;
use crate::progress::{
    idempotency_key, ItemStatus, Job, JobError, JobExecutor, ProgressStore, ResumableRunner,
    RetryPolicy, RunStop, RunSummary, StoreError,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;

pub use segment::{segment, ScriptSegment, SegmentError, SegmentKind};
pub use stitch::{AudioMixer, Pauses, SegmentAudio, StitchError, StitchPlan, Stitcher};

/// Each synthesis call reserves one unit of the narration ledger.
pub const SYNTHESIS_COST: u64 = 1;

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stitch(#[from] StitchError),

    /// Synthesis stopped before every segment was attempted.
    #[error("narration incomplete:\n{0}")]
    Interrupted(Box<RunSummary>),
}

#[derive(Debug, Clone)]
pub struct SegmentPayload {
    pub order: usize,
    pub kind: SegmentKind,
    pub text: String,
    pub path: PathBuf,
}

/// Writes synthesized audio for one segment to its payload path.
pub struct SynthesisExecutor<S> {
    synth: S,
}

impl<S> SynthesisExecutor<S> {
    pub fn new(synth: S) -> Self {
        Self { synth }
    }
}

#[async_trait]
impl<S: SpeechSynthesizer> JobExecutor<SegmentPayload> for SynthesisExecutor<S> {
    async fn execute(&self, job: &Job<SegmentPayload>) -> Result<Option<String>, JobError> {
        let payload = &job.payload;
        let audio = self.synth.synthesize(&payload.text).await?;

        if let Some(parent) = payload.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| JobError::transient(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = payload.path.with_extension("part");
        fs::write(&tmp, &audio)
            .await
            .map_err(|e| JobError::transient(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &payload.path)
            .await
            .map_err(|e| JobError::transient(format!("rename {}: {e}", tmp.display())))?;

        tracing::debug!(order = payload.order, bytes = audio.len(), "Segment synthesized");
        Ok(Some(payload.path.display().to_string()))
    }
}

/// One job per segment, keyed by run, position and text.
pub fn synthesis_jobs(
    run_id: &str,
    segments: &[ScriptSegment],
    segments_dir: &Path,
) -> Vec<Job<SegmentPayload>> {
    segments
        .iter()
        .map(|seg| {
            let key = idempotency_key(&["narration", run_id, &seg.order.to_string(), &seg.text]);
            let path = segments_dir.join(format!("{:03}_{}.mp3", seg.order, &key[..12]));
            Job::new(
                key,
                SYNTHESIS_COST,
                SegmentPayload {
                    order: seg.order,
                    kind: seg.kind,
                    text: seg.text.clone(),
                    path,
                },
            )
        })
        .collect()
}

/// Records the finished narration of one transcript; segment audio is gone
/// once this is done.
fn stitched_key(run_id: &str, transcript: &str) -> String {
    idempotency_key(&["narration-stitched", run_id, transcript])
}

/// Segments recorded as done whose audio has since disappeared are
/// synthesized again.
async fn forget_lost_audio(
    store: &ProgressStore,
    jobs: &[Job<SegmentPayload>],
) -> Result<usize, StoreError> {
    let mut lost = 0;
    for job in jobs {
        if store.status_of(&job.key) == Some(ItemStatus::Done)
            && fs::metadata(&job.payload.path).await.is_err()
        {
            tracing::warn!(
                order = job.payload.order,
                path = %job.payload.path.display(),
                "Synthesized audio missing; segment will be regenerated"
            );
            store.forget(&job.key)?;
            lost += 1;
        }
    }
    Ok(lost)
}

pub struct NarrationRequest<'a> {
    pub run_id: &'a str,
    pub transcript: &'a str,
    pub work_dir: &'a Path,
    pub output: &'a Path,
    pub pauses: Pauses,
}

pub struct Narrator<'s, S, M> {
    store: &'s ProgressStore,
    synth: S,
    mixer: M,
    policy: RetryPolicy,
    cancel: CancellationToken,
    retry_failed: bool,
}

impl<'s, S, M> Narrator<'s, S, M>
where
    S: SpeechSynthesizer,
    M: AudioMixer,
{
    pub fn new(store: &'s ProgressStore, synth: S, mixer: M, policy: RetryPolicy) -> Self {
        Self {
            store,
            synth,
            mixer,
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

    /// Produces `request.output` from the transcript. A segment that failed
    /// permanently makes the whole narration fail; nothing partial is written.
    pub async fn narrate(self, request: NarrationRequest<'_>) -> Result<PathBuf, NarrationError> {
        let stitched_key = stitched_key(request.run_id, request.transcript);
        if self.store.status_of(&stitched_key) == Some(ItemStatus::Done) {
            if fs::metadata(request.output).await.is_ok() {
                tracing::info!(output = %request.output.display(), "Narration already stitched");
                return Ok(request.output.to_path_buf());
            }
            self.store.forget(&stitched_key)?;
        }

        let segments = segment(request.transcript)?;
        let segments_dir = request.work_dir.join("segments");
        let jobs = synthesis_jobs(request.run_id, &segments, &segments_dir);
        tracing::info!(segments = jobs.len(), run_id = request.run_id, "Narrating transcript");

        forget_lost_audio(self.store, &jobs).await?;

        let runner = ResumableRunner::new(self.store, SynthesisExecutor::new(self.synth), self.policy)
            .with_cancellation(self.cancel)
            .retry_failed(self.retry_failed);
        let summary = runner.run(&jobs).await?;
        match summary.stop {
            RunStop::Completed => {}
            RunStop::QuotaExhausted { .. } | RunStop::Cancelled | RunStop::RejectedInput(_) => {
                return Err(NarrationError::Interrupted(Box::new(summary)));
            }
        }

        let audio: Vec<SegmentAudio> = jobs
            .iter()
            .filter(|job| self.store.status_of(&job.key) == Some(ItemStatus::Done))
            .map(|job| SegmentAudio {
                order: job.payload.order,
                kind: job.payload.kind,
                path: job.payload.path.clone(),
            })
            .collect();
        for failed in &summary.failed {
            tracing::error!(key = %failed.key, reason = %failed.reason, "Narration segment failed");
        }

        let plan = StitchPlan::build(jobs.len(), audio, request.pauses)?;
        let stitcher = Stitcher::new(self.mixer, request.work_dir.join("stitch"));
        let path = stitcher.stitch(&plan, request.output).await?;
        self.store
            .mark_done(&stitched_key, Some(path.display().to_string()))?;
        Ok(path)
    }
}
