use async_trait::async_trait;
use digest_reels::api::{ProviderError, UploadedVideo, VideoHost, VideoMetadata};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockVideoHost {
    pub uploads: Arc<Mutex<Vec<String>>>,
    pub thumbnails: Arc<Mutex<Vec<String>>>,
    /// (name, id) of playlists on the account.
    pub playlists: Arc<Mutex<Vec<(String, String)>>>,
    pub created: Arc<Mutex<Vec<String>>>,
    pub added: Arc<Mutex<Vec<(String, String)>>>,
    pub reject_thumbnail: bool,
    /// Uploads fail with a provider quota error.
    pub upload_quota_exceeded: bool,
    /// Playlist additions start failing with a quota error after this many.
    pub quota_after_adds: Option<usize>,
}

fn quota_exceeded() -> ProviderError {
    ProviderError::QuotaExceeded {
        provider: "mock-youtube",
        reason: "quotaExceeded".to_string(),
    }
}

impl MockVideoHost {
    pub fn with_playlist(self, name: &str, id: &str) -> Self {
        self.playlists
            .lock()
            .unwrap()
            .push((name.to_string(), id.to_string()));
        self
    }
}

#[async_trait]
impl VideoHost for MockVideoHost {
    async fn upload(
        &self,
        _video: Vec<u8>,
        meta: &VideoMetadata,
    ) -> Result<UploadedVideo, ProviderError> {
        if self.upload_quota_exceeded {
            return Err(quota_exceeded());
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(meta.title.clone());
        Ok(UploadedVideo::from_id(format!("vid{}", uploads.len())))
    }

    async fn set_thumbnail(&self, video_id: &str, _image: Vec<u8>) -> Result<(), ProviderError> {
        if self.reject_thumbnail {
            return Err(ProviderError::Unauthorized {
                provider: "mock-youtube",
                body: "account not verified".to_string(),
            });
        }
        self.thumbnails.lock().unwrap().push(video_id.to_string());
        Ok(())
    }

    async fn find_playlist(&self, name: &str) -> Result<Option<String>, ProviderError> {
        Ok(self
            .playlists
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, id)| id.clone()))
    }

    async fn create_playlist(
        &self,
        name: &str,
        _description: &str,
        _privacy_status: &str,
    ) -> Result<String, ProviderError> {
        let id = format!("PL{}", name.replace(' ', ""));
        self.created.lock().unwrap().push(name.to_string());
        self.playlists
            .lock()
            .unwrap()
            .push((name.to_string(), id.clone()));
        Ok(id)
    }

    async fn add_to_playlist(&self, playlist_id: &str, video_id: &str) -> Result<(), ProviderError> {
        let mut added = self.added.lock().unwrap();
        if self.quota_after_adds.is_some_and(|limit| added.len() >= limit) {
            return Err(quota_exceeded());
        }
        added.push((playlist_id.to_string(), video_id.to_string()));
        Ok(())
    }
}
