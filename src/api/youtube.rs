use super::oauth::OAuthSession;
use super::{check_response, ProviderError, UploadedVideo, VideoHost, VideoMetadata};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const PROVIDER: &str = "youtube";
const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/youtube/v3";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(1_800);
/// Upper bound on playlist pages read while looking a title up.
const MAX_PLAYLIST_PAGES: usize = 20;

/// Quota units charged by the Data API per call.
pub mod cost {
    pub const UPLOAD: u64 = 1_600;
    pub const THUMBNAIL: u64 = 50;
    pub const PLAYLIST_LIST: u64 = 1;
    pub const PLAYLIST_CREATE: u64 = 50;
    pub const PLAYLIST_ADD: u64 = 50;
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistPage {
    #[serde(default)]
    items: Vec<PlaylistEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    id: String,
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
}

fn match_playlist(page: &PlaylistPage, name: &str) -> Option<String> {
    let wanted = name.to_lowercase();
    page.items
        .iter()
        .find(|p| p.snippet.title.to_lowercase() == wanted)
        .map(|p| p.id.clone())
}

fn image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else {
        "image/jpeg"
    }
}

pub struct YoutubeClient {
    client: Client,
    session: OAuthSession,
}

impl YoutubeClient {
    pub fn new(client: Client, session: OAuthSession) -> Self {
        Self { client, session }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let token = self.session.access_token().await?;
        let resp = req
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;
        check_response(PROVIDER, resp).await
    }

    async fn json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ProviderError> {
        resp.json()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))
    }
}

#[async_trait]
impl VideoHost for YoutubeClient {
    #[tracing::instrument(skip(self, video, meta), fields(title = %meta.title, bytes = video.len()))]
    async fn upload(
        &self,
        video: Vec<u8>,
        meta: &VideoMetadata,
    ) -> Result<UploadedVideo, ProviderError> {
        let body = json!({
            "snippet": {
                "title": meta.title,
                "description": meta.description,
                "tags": meta.tags,
                "categoryId": meta.category_id,
            },
            "status": {
                "privacyStatus": meta.privacy_status,
                "selfDeclaredMadeForKids": false,
            },
        });

        let session = self
            .send(
                self.client
                    .post(format!("{UPLOAD_BASE}/videos"))
                    .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
                    .header("X-Upload-Content-Type", "video/*")
                    .header("X-Upload-Content-Length", video.len().to_string())
                    .json(&body),
            )
            .await?;
        let location = session
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::malformed(PROVIDER, "upload session has no Location"))?;

        let resp = self
            .send(
                self.client
                    .put(location)
                    .header(reqwest::header::CONTENT_TYPE, "video/*")
                    .timeout(UPLOAD_TIMEOUT)
                    .body(video),
            )
            .await?;
        let created: IdOnly = Self::json(resp).await?;
        tracing::info!(video_id = %created.id, "Video uploaded");
        Ok(UploadedVideo::from_id(created.id))
    }

    async fn set_thumbnail(&self, video_id: &str, image: Vec<u8>) -> Result<(), ProviderError> {
        self.send(
            self.client
                .post(format!("{UPLOAD_BASE}/thumbnails/set"))
                .query(&[("videoId", video_id)])
                .header(reqwest::header::CONTENT_TYPE, image_mime(&image))
                .body(image),
        )
        .await?;
        Ok(())
    }

    async fn find_playlist(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_PLAYLIST_PAGES {
            let mut req = self.client.get(format!("{API_BASE}/playlists")).query(&[
                ("part", "snippet"),
                ("mine", "true"),
                ("maxResults", "50"),
            ]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let page: PlaylistPage = Self::json(self.send(req).await?).await?;
            if let Some(id) = match_playlist(&page, name) {
                return Ok(Some(id));
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(None),
            }
        }
        tracing::warn!(name, pages = MAX_PLAYLIST_PAGES, "Playlist lookup stopped at page limit");
        Ok(None)
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        privacy_status: &str,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "snippet": {"title": name, "description": description},
            "status": {"privacyStatus": privacy_status},
        });
        let resp = self
            .send(
                self.client
                    .post(format!("{API_BASE}/playlists"))
                    .query(&[("part", "snippet,status")])
                    .json(&body),
            )
            .await?;
        let created: IdOnly = Self::json(resp).await?;
        tracing::info!(playlist_id = %created.id, name, "Created YouTube playlist");
        Ok(created.id)
    }

    async fn add_to_playlist(
        &self,
        playlist_id: &str,
        video_id: &str,
    ) -> Result<(), ProviderError> {
        let body = json!({
            "snippet": {
                "playlistId": playlist_id,
                "resourceId": {"kind": "youtube#video", "videoId": video_id},
            }
        });
        self.send(
            self.client
                .post(format!("{API_BASE}/playlistItems"))
                .query(&[("part", "snippet")])
                .json(&body),
        )
        .await?;
        Ok(())
    }
}
