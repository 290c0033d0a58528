//! Implements `SourceProvider` for Spotify links.
//!
//! Spotify only supplies metadata. Each track is re-resolved against YouTube Music
//! and streamed from there.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::Utc;
use regex::Regex;
use reqwest::header;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    PlaylistData, ResolutionResult, SourceError, SourceProvider, SourceResult, StreamOutput, TrackInfo,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::{fetch_json, rebase};
use crate::utils::ytdlp::YtDlp;
use crate::utils::ytmusic::{SongCatalog, cross_resolve};

static SPOTIFY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://open\.spotify\.com/(track|album|playlist)/([a-zA-Z0-9]+)").unwrap()
});

/// Tokens are treated as expired this long before Spotify says so.
const EXPIRY_MARGIN_MS: i64 = 30_000;

/// Hosts used by the provider. Overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct SpotifyEndpoints {
    pub api: String,
    pub accounts: String,
    pub open: String,
}

impl Default for SpotifyEndpoints {
    fn default() -> Self {
        Self {
            api: "https://api.spotify.com/v1".to_string(),
            accounts: "https://accounts.spotify.com".to_string(),
            open: "https://open.spotify.com".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at_ms: i64,
}

impl AccessToken {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Response of the client credentials flow.
#[derive(Debug, Deserialize)]
struct CredentialsToken {
    access_token: String,
    expires_in: i64,
}

/// Response of the anonymous web player token endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebPlayerToken {
    access_token: String,
    access_token_expiration_timestamp_ms: i64,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    #[serde(default)]
    external_urls: ExternalUrls,
}

impl SpotifyTrack {
    fn author(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn to_track(&self, identifier: String) -> TrackInfo {
        TrackInfo {
            title: self.name.clone(),
            author: self.author(),
            identifier,
            uri: String::new(),
            length: 0,
            is_stream: false,
        }
    }

    /// Collection entries are keyed by their own track URL. Local files have none and are skipped.
    fn to_collection_track(&self) -> Option<TrackInfo> {
        let url = self.external_urls.spotify.clone()?;
        Some(self.to_track(url))
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    name: String,
    tracks: Paging<T>,
}

/// A single entry of an album or playlist page.
trait CollectionItem {
    fn into_spotify_track(self) -> Option<SpotifyTrack>;
}

impl CollectionItem for SpotifyTrack {
    fn into_spotify_track(self) -> Option<SpotifyTrack> {
        Some(self)
    }
}

impl CollectionItem for PlaylistItem {
    fn into_spotify_track(self) -> Option<SpotifyTrack> {
        self.track
    }
}

pub struct SpotifyPlusSource {
    client: reqwest::Client,
    endpoints: SpotifyEndpoints,
    credentials: Option<(String, String)>,
    token: RwLock<Option<AccessToken>>,
    catalog: Arc<dyn SongCatalog>,
    ytdlp: YtDlp,
}

impl SpotifyPlusSource {
    pub fn new(config: &SourcesConfig, catalog: Arc<dyn SongCatalog>) -> Self {
        Self::with_endpoints(config, catalog, SpotifyEndpoints::default())
    }

    pub fn with_endpoints(config: &SourcesConfig, catalog: Arc<dyn SongCatalog>, endpoints: SpotifyEndpoints) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            endpoints,
            credentials: config
                .spotify_credentials()
                .map(|(id, secret)| (id.to_string(), secret.to_string())),
            token: RwLock::new(None),
            catalog,
            ytdlp: YtDlp::new(&config.ytdlp_path),
        }
    }

    pub fn is_spotify_url(url: &str) -> bool {
        SPOTIFY_REGEX.is_match(url)
    }

    /// Returns the cached token, fetching a new one when it is missing or expired.
    /// Concurrent callers that all see an expired token each fetch their own.
    async fn access_token(&self) -> SourceResult<String> {
        let now = Utc::now().timestamp_millis();
        if let Some(token) = self.token.read().await.as_ref().filter(|t| !t.is_expired(now)) {
            return Ok(token.value.clone());
        }

        let token = self.fetch_token(now).await?;
        let value = token.value.clone();
        *self.token.write().await = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self, now_ms: i64) -> SourceResult<AccessToken> {
        if let Some((client_id, client_secret)) = &self.credentials {
            debug!("Requesting Spotify token with client credentials");
            let auth = BASE64_STANDARD.encode(format!("{}:{}", client_id, client_secret));
            let request = self
                .client
                .post(format!("{}/api/token", self.endpoints.accounts))
                .header(header::AUTHORIZATION, format!("Basic {}", auth))
                .form(&[("grant_type", "client_credentials")]);
            let token: CredentialsToken = fetch_json(request, "Spotify token").await?;
            return Ok(AccessToken {
                value: token.access_token,
                expires_at_ms: now_ms + token.expires_in * 1000 - EXPIRY_MARGIN_MS,
            });
        }

        debug!("Requesting anonymous Spotify web player token");
        let request = self
            .client
            .get(format!("{}/get_access_token", self.endpoints.open))
            .query(&[("reason", "transport"), ("productType", "web_player")]);
        let token: WebPlayerToken = fetch_json(request, "Spotify token").await?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at_ms: token.access_token_expiration_timestamp_ms,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> SourceResult<T> {
        let token = self.access_token().await?;
        let request = self
            .client
            .get(rebase(url, &self.endpoints.api_origin()))
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        fetch_json(request, "Spotify API").await
    }

    /// Loads a collection and every following page of its tracks.
    async fn collection<T>(&self, kind: &str, id: &str) -> SourceResult<(String, Vec<TrackInfo>)>
    where
        T: CollectionItem + serde::de::DeserializeOwned + Send,
    {
        let collection: Collection<T> = self
            .get(&format!("{}/{}s/{}", self.endpoints.api, kind, id))
            .await?;

        let mut tracks = Vec::new();
        let mut page = collection.tracks;
        loop {
            tracks.extend(
                page.items
                    .into_iter()
                    .filter_map(T::into_spotify_track)
                    .filter_map(|t| t.to_collection_track()),
            );
            let Some(next) = page.next else { break };
            debug!("Following Spotify page {}", next);
            page = self.get(&next).await?;
        }

        Ok((collection.name, tracks))
    }
}

impl SpotifyEndpoints {
    /// Origin of the API host, for rebasing `next` links Spotify hands back.
    fn api_origin(&self) -> String {
        url::Url::parse(&self.api)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| self.api.clone())
    }
}

#[async_trait]
impl SourceProvider for SpotifyPlusSource {
    fn source(&self) -> &'static str {
        "spotify+"
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        search.is_none() && Self::is_spotify_url(resource)
    }

    async fn initialize(&self) -> SourceResult<()> {
        self.catalog.initialize().await
    }

    async fn resolve(&self, resource: &str, _search: Option<&str>) -> SourceResult<ResolutionResult> {
        let caps = SPOTIFY_REGEX
            .captures(resource)
            .ok_or_else(|| SourceError::Unsupported(resource.to_string()))?;
        let (kind, id) = (&caps[1], &caps[2]);
        info!("Resolving Spotify {} {}", kind, id);

        let (tracks, pl_data) = match kind {
            "track" => {
                let track: SpotifyTrack = self.get(&format!("{}/tracks/{}", self.endpoints.api, id)).await?;
                (vec![track.to_track(resource.to_string())], None)
            }
            "album" => {
                let (name, tracks) = self.collection::<SpotifyTrack>("album", id).await?;
                (tracks, Some(name))
            }
            _ => {
                let (name, tracks) = self.collection::<PlaylistItem>("playlist", id).await?;
                (tracks, Some(name))
            }
        };

        let entries = cross_resolve(
            self.catalog.as_ref(),
            tracks,
            |t| format!("{} by {} , OFFICIAL", t.title, t.author),
            |t, song| {
                t.uri = song.watch_url();
                t.length = song.length_ms();
            },
        )
        .await?;

        Ok(match pl_data {
            Some(name) => ResolutionResult::collection(
                entries,
                PlaylistData {
                    name,
                    selected_track: Some(0),
                },
            ),
            None => ResolutionResult::tracks(entries),
        })
    }

    async fn stream(&self, track: &TrackInfo, using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        self.ytdlp.stream(uri, using_fallback_decode)
    }
}
