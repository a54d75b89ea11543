#![allow(dead_code)]

pub mod catalog;
pub mod clock;
pub mod executor;
pub mod mixer;
pub mod search;
pub mod synthesizer;
pub mod video_host;

use digest_reels::progress::{ProgressStore, ResetSchedule, RetryPolicy};
use std::path::Path;
use std::time::Duration;

/// Retries without sleeping.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        call_timeout: Duration::from_secs(5),
    }
}

pub fn open_store(dir: &Path, limit: u64) -> ProgressStore {
    ProgressStore::open(dir.join("progress.json"), limit, ResetSchedule::default()).unwrap()
}
