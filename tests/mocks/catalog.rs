use async_trait::async_trait;
use digest_reels::api::{MusicCatalog, ProviderError, Track};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Every known artist has `tracks_each` tracks named `<artist> song N`.
#[derive(Clone, Default)]
pub struct MockCatalog {
    pub artists: HashMap<String, String>,
    pub tracks_each: usize,
    pub created: Arc<Mutex<Vec<String>>>,
    pub added: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockCatalog {
    pub fn new(artists: &[&str], tracks_each: usize) -> Self {
        Self {
            artists: artists
                .iter()
                .enumerate()
                .map(|(i, a)| (a.to_string(), format!("artist{i}")))
                .collect(),
            tracks_each,
            ..Self::default()
        }
    }

    fn name_of(&self, artist_id: &str) -> Option<&str> {
        self.artists
            .iter()
            .find(|(_, id)| id.as_str() == artist_id)
            .map(|(name, _)| name.as_str())
    }
}

#[async_trait]
impl MusicCatalog for MockCatalog {
    async fn search_artist(&self, name: &str) -> Result<Option<String>, ProviderError> {
        Ok(self.artists.get(name).cloned())
    }

    async fn top_tracks(
        &self,
        artist_id: &str,
        _market: &str,
        limit: usize,
    ) -> Result<Vec<Track>, ProviderError> {
        let artist = self
            .name_of(artist_id)
            .ok_or_else(|| ProviderError::not_found("mock-spotify", artist_id))?;
        Ok((1..=self.tracks_each.min(limit))
            .map(|n| Track {
                uri: format!("spotify:track:{artist_id}-{n}"),
                name: format!("{artist} song {n}"),
                artist: artist.to_string(),
            })
            .collect())
    }

    async fn create_playlist(&self, name: &str, _description: &str) -> Result<String, ProviderError> {
        let mut created = self.created.lock().unwrap();
        created.push(name.to_string());
        Ok(format!("sp{}", created.len()))
    }

    async fn add_tracks(&self, _playlist_id: &str, uris: &[String]) -> Result<(), ProviderError> {
        self.added.lock().unwrap().push(uris.to_vec());
        Ok(())
    }
}
