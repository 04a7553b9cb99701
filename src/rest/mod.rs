//! Track resolution over a node's HTTP port.

use std::time::Duration;

use serde::Deserialize;

use crate::common::errors::Result;
use crate::config::NodeOptions;

/// Thin client for a node's REST surface, authenticated with the same
/// shared secret as the WebSocket session.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    password: String,
}

impl RestClient {
    pub fn new(options: &NodeOptions) -> Result<Self> {
        let scheme = if options.secure { "https" } else { "http" };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("{scheme}://{}:{}", options.host, options.port),
            password: options.password.clone(),
        })
    }

    /// Resolves `identifier` (a URL or a `scsearch:`/`ytsearch:` query) to
    /// playable track descriptors.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadTracksResponse> {
        let response = self
            .http
            .get(format!("{}/loadtracks", self.base_url))
            .header("Authorization", &self.password)
            .query(&[("identifier", identifier)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTracksResponse {
    pub load_type: LoadType,
    #[serde(default)]
    pub playlist_info: Option<PlaylistInfo>,
    #[serde(default)]
    pub tracks: Vec<TrackDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    NoMatches,
    LoadFailed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub selected_track: Option<i64>,
}

/// One playable track: the opaque encoded blob the node expects back in a
/// play command, plus human-readable metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackDescriptor {
    pub track: String,
    pub info: TrackInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    pub length: u64,
    pub is_stream: bool,
    pub position: u64,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_response_deserializes() {
        let payload = serde_json::json!({
            "loadType": "SEARCH_RESULT",
            "playlistInfo": {},
            "tracks": [{
                "track": "QAAAjQIAJU5ldmVyIEdvbm5h",
                "info": {
                    "identifier": "dQw4w9WgXcQ",
                    "isSeekable": true,
                    "author": "Rick Astley",
                    "length": 212000,
                    "isStream": false,
                    "position": 0,
                    "title": "Never Gonna Give You Up",
                    "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                }
            }]
        });

        let response: LoadTracksResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(response.load_type, LoadType::SearchResult);
        let track = &response.tracks[0];
        assert_eq!(track.info.title, "Never Gonna Give You Up");
        assert_eq!(track.info.length, 212000);
        assert_eq!(track.info.source_name, None);
    }

    #[test]
    fn no_matches_response_has_empty_tracks() {
        let response: LoadTracksResponse = serde_json::from_value(serde_json::json!({
            "loadType": "NO_MATCHES",
            "playlistInfo": {},
            "tracks": [],
        }))
        .unwrap();
        assert_eq!(response.load_type, LoadType::NoMatches);
        assert!(response.tracks.is_empty());
    }
}
