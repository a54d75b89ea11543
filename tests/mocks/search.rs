use async_trait::async_trait;
use digest_reels::api::{ProviderError, WebSearch};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Finds a video for every query except those listed in `no_match`.
#[derive(Clone, Default)]
pub struct MockSearch {
    pub queries: Arc<Mutex<Vec<String>>>,
    pub no_match: HashSet<String>,
}

impl MockSearch {
    pub fn without(queries: &[&str]) -> Self {
        Self {
            no_match: queries.iter().map(|q| q.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl WebSearch for MockSearch {
    async fn search_video(&self, query: &str) -> Result<Option<String>, ProviderError> {
        let mut queries = self.queries.lock().unwrap();
        queries.push(query.to_string());
        if self.no_match.contains(query) {
            return Ok(None);
        }
        Ok(Some(format!("yt{}", queries.len())))
    }
}
