use super::oauth::OAuthSession;
use super::{check_response, with_retry, MusicCatalog, ProviderError, Track};
use crate::progress::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const PROVIDER: &str = "spotify";
const API_BASE: &str = "https://api.spotify.com/v1";
/// Items accepted by one add-tracks call.
pub const ADD_BATCH: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    artists: Option<ArtistPage>,
}

#[derive(Debug, Deserialize)]
struct ArtistPage {
    #[serde(default)]
    items: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TopTracks {
    #[serde(default)]
    tracks: Vec<RawTrack>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    uri: String,
    name: String,
    #[serde(default)]
    artists: Vec<ArtistName>,
}

#[derive(Debug, Deserialize)]
struct ArtistName {
    name: String,
}

fn to_tracks(top: TopTracks, limit: usize) -> Vec<Track> {
    top.tracks
        .into_iter()
        .take(limit)
        .map(|t| Track {
            artist: t.artists.into_iter().next().map(|a| a.name).unwrap_or_default(),
            uri: t.uri,
            name: t.name,
        })
        .collect()
}

pub struct SpotifyClient {
    client: Client,
    session: OAuthSession,
    policy: RetryPolicy,
}

impl SpotifyClient {
    pub fn new(client: Client, session: OAuthSession, policy: RetryPolicy) -> Self {
        Self {
            client,
            session,
            policy,
        }
    }

    async fn send_once<T: serde::de::DeserializeOwned>(
        &self,
        build: &(impl Fn(&Client) -> reqwest::RequestBuilder + Sync),
    ) -> Result<T, ProviderError> {
        let token = self.session.access_token().await?;
        let resp = build(&self.client)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::http(PROVIDER, e))?;
        let resp = check_response(PROVIDER, resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))
    }

    /// Read-style calls retried in place; safe to repeat.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
        build: impl Fn(&Client) -> reqwest::RequestBuilder + Sync,
    ) -> Result<T, ProviderError> {
        let build = &build;
        with_retry(&self.policy, what, move || self.send_once(build)).await
    }

    async fn current_user_id(&self) -> Result<String, ProviderError> {
        let me: IdOnly = self
            .call("me", |c| c.get(format!("{API_BASE}/me")))
            .await?;
        Ok(me.id)
    }
}

#[async_trait]
impl MusicCatalog for SpotifyClient {
    async fn search_artist(&self, name: &str) -> Result<Option<String>, ProviderError> {
        let found: SearchResponse = self
            .call("search artist", |c| {
                c.get(format!("{API_BASE}/search"))
                    .query(&[("q", name), ("type", "artist"), ("limit", "1")])
            })
            .await?;
        Ok(found
            .artists
            .and_then(|page| page.items.into_iter().next())
            .map(|artist| artist.id))
    }

    async fn top_tracks(
        &self,
        artist_id: &str,
        market: &str,
        limit: usize,
    ) -> Result<Vec<Track>, ProviderError> {
        let top: TopTracks = self
            .call("top tracks", |c| {
                c.get(format!("{API_BASE}/artists/{artist_id}/top-tracks"))
                    .query(&[("market", market)])
            })
            .await?;
        Ok(to_tracks(top, limit))
    }

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
    ) -> Result<String, ProviderError> {
        let user_id = self.current_user_id().await?;
        let body = json!({"name": name, "public": true, "description": description});
        let created: IdOnly = self
            .call("create playlist", |c| {
                c.post(format!("{API_BASE}/users/{user_id}/playlists"))
                    .json(&body)
            })
            .await?;
        tracing::info!(playlist_id = %created.id, name, "Created Spotify playlist");
        Ok(created.id)
    }

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<(), ProviderError> {
        if uris.len() > ADD_BATCH {
            return Err(ProviderError::malformed(
                PROVIDER,
                format!("{} tracks exceed the batch size of {ADD_BATCH}", uris.len()),
            ));
        }
        // Appending is not idempotent; the caller's runner owns retries.
        let body = json!({"uris": uris});
        let _: serde_json::Value = self
            .send_once(&|c: &Client| {
                c.post(format!("{API_BASE}/playlists/{playlist_id}/tracks"))
                    .json(&body)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_tracks_are_limited_and_keep_primary_artist() {
        let top: TopTracks = serde_json::from_value(json!({
            "tracks": [
                {"uri": "spotify:track:1", "name": "One", "artists": [{"name": "A"}, {"name": "B"}]},
                {"uri": "spotify:track:2", "name": "Two", "artists": [{"name": "A"}]},
                {"uri": "spotify:track:3", "name": "Three", "artists": []}
            ]
        }))
        .unwrap();
        let tracks = to_tracks(top, 2);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].artist, "A");
        assert_eq!(tracks[1].uri, "spotify:track:2");
    }

    #[test]
    fn test_search_without_artists_section() {
        let found: SearchResponse = serde_json::from_value(json!({})).unwrap();
        assert!(found.artists.is_none());
    }
}
