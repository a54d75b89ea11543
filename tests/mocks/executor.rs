use async_trait::async_trait;
use digest_reels::progress::{Job, JobError, JobExecutor};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Succeeds unless a key has scripted errors queued; records every call.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub scripted: Arc<Mutex<HashMap<String, VecDeque<JobError>>>>,
    pub cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedExecutor {
    pub fn fail(self, key: &str, errors: Vec<JobError>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(key.to_string(), errors.into());
        self
    }

    /// Cancels `token` once `calls` executions have happened.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| *k == key).count()
    }
}

#[async_trait]
impl JobExecutor<String> for ScriptedExecutor {
    async fn execute(&self, job: &Job<String>) -> Result<Option<String>, JobError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(job.key.clone());
            calls.len()
        };
        if let Some((limit, token)) = &self.cancel_after {
            if count >= *limit {
                token.cancel();
            }
        }
        let next = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&job.key)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(err) => Err(err),
            None => Ok(Some(format!("out:{}", job.payload))),
        }
    }
}
