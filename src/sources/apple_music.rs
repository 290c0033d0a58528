//! Implements `SourceProvider` for Apple Music through the public iTunes Search API.
//!
//! The API only exposes 30-second previews, so every `uri` produced here points at a
//! preview clip while `length` still carries the full track duration.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    PlaylistData, ResolutionResult, SEARCH_LIMIT, SourceError, SourceProvider, SourceResult,
    StreamOutput, TrackInfo,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::{fetch_json, open_stream};

const DEFAULT_API_BASE: &str = "https://itunes.apple.com";

/// Album or artist page, optionally pointing at one album track with `?i=`.
static APPLE_MUSIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://music\.apple\.com/[^/]+/(album|artist)/[^/]+/(\d+)(?:\?i=(\d+))?$")
        .unwrap()
});

/// What a matched Apple Music URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppleMusicLink {
    Album(String),
    AlbumTrack { album: String, track: String },
    Artist(String),
}

impl AppleMusicLink {
    pub fn parse(url: &str) -> Option<Self> {
        let caps = APPLE_MUSIC_REGEX.captures(url)?;
        let id = caps.get(2)?.as_str().to_string();
        match (&caps[1], caps.get(3)) {
            ("album", Some(track)) => Some(AppleMusicLink::AlbumTrack {
                album: id,
                track: track.as_str().to_string(),
            }),
            ("album", None) => Some(AppleMusicLink::Album(id)),
            _ => Some(AppleMusicLink::Artist(id)),
        }
    }

    /// The id handed to the lookup endpoint.
    fn lookup_id(&self) -> &str {
        match self {
            AppleMusicLink::Album(id) | AppleMusicLink::Artist(id) => id,
            AppleMusicLink::AlbumTrack { track, .. } => track,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItunesResponse {
    #[serde(default)]
    results: Vec<ItunesItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItunesItem {
    wrapper_type: Option<String>,
    track_id: Option<u64>,
    track_name: Option<String>,
    artist_name: Option<String>,
    collection_name: Option<String>,
    preview_url: Option<String>,
    track_time_millis: Option<u64>,
}

impl ItunesItem {
    fn is_track(&self) -> bool {
        self.wrapper_type.as_deref().is_none_or(|w| w == "track")
    }

    fn into_track(self) -> SourceResult<TrackInfo> {
        let track_id = self
            .track_id
            .ok_or_else(|| SourceError::extraction("iTunes track without trackId"))?;
        Ok(TrackInfo {
            title: self.track_name.unwrap_or_else(|| "Unknown track".to_string()),
            author: self.artist_name.unwrap_or_else(|| "Unknown artist".to_string()),
            identifier: track_id.to_string(),
            uri: self.preview_url.unwrap_or_default(),
            length: self.track_time_millis.unwrap_or(0),
            is_stream: false,
        })
    }
}

/// Maps a search response to descriptors, capped at [`SEARCH_LIMIT`].
fn map_search(response: ItunesResponse) -> SourceResult<ResolutionResult> {
    let entries = response
        .results
        .into_iter()
        .filter(ItunesItem::is_track)
        .take(SEARCH_LIMIT)
        .map(ItunesItem::into_track)
        .collect::<SourceResult<Vec<_>>>()?;
    Ok(ResolutionResult::tracks(entries))
}

/// Maps a lookup response. Album lookups also name the collection.
fn map_lookup(link: &AppleMusicLink, response: ItunesResponse) -> SourceResult<ResolutionResult> {
    let album_name = response
        .results
        .iter()
        .find(|item| item.wrapper_type.as_deref() == Some("collection"))
        .and_then(|item| item.collection_name.clone());

    let entries = response
        .results
        .into_iter()
        .filter(|item| item.wrapper_type.as_deref() == Some("track"))
        .map(ItunesItem::into_track)
        .collect::<SourceResult<Vec<_>>>()?;

    Ok(match (link, album_name) {
        (AppleMusicLink::Album(_), Some(name)) => ResolutionResult::collection(
            entries,
            PlaylistData {
                name,
                selected_track: None,
            },
        ),
        _ => ResolutionResult::tracks(entries),
    })
}

pub struct AppleMusicSource {
    client: reqwest::Client,
    api_base: String,
    country: String,
}

impl AppleMusicSource {
    pub fn new(config: &SourcesConfig) -> Self {
        Self::with_api_base(config, DEFAULT_API_BASE)
    }

    pub fn with_api_base(config: &SourcesConfig, api_base: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            country: config.itunes_country.clone(),
        }
    }

    pub fn is_apple_music_url(url: &str) -> bool {
        APPLE_MUSIC_REGEX.is_match(url)
    }

    async fn search(&self, terms: &str) -> SourceResult<ResolutionResult> {
        let limit = SEARCH_LIMIT.to_string();
        let request = self.client.get(format!("{}/search", self.api_base)).query(&[
            ("term", terms),
            ("country", self.country.as_str()),
            ("entity", "song"),
            ("limit", limit.as_str()),
        ]);
        let response: ItunesResponse = fetch_json(request, "iTunes search").await?;
        debug!("iTunes search returned {} rows", response.results.len());
        map_search(response)
    }

    async fn lookup(&self, link: &AppleMusicLink) -> SourceResult<ResolutionResult> {
        let limit = SEARCH_LIMIT.to_string();
        let request = self.client.get(format!("{}/lookup", self.api_base)).query(&[
            ("id", link.lookup_id()),
            ("entity", "song"),
            ("limit", limit.as_str()),
        ]);
        let response: ItunesResponse = fetch_json(request, "iTunes lookup").await?;
        map_lookup(link, response)
    }
}

#[async_trait]
impl SourceProvider for AppleMusicSource {
    fn source(&self) -> &'static str {
        "itunes"
    }

    fn search_shorts(&self) -> &'static [&'static str] {
        &["am"]
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        self.is_own_search(search) || (search.is_none() && Self::is_apple_music_url(resource))
    }

    async fn resolve(&self, resource: &str, search: Option<&str>) -> SourceResult<ResolutionResult> {
        if self.is_own_search(search) {
            info!("Searching Apple Music for {:?}", resource);
            return self.search(resource).await;
        }

        let link = AppleMusicLink::parse(resource)
            .ok_or_else(|| SourceError::Unsupported(resource.to_string()))?;
        info!("Looking up Apple Music {:?}", link);
        self.lookup(&link).await
    }

    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        Ok(StreamOutput::untyped(open_stream(&self.client, uri).await?))
    }
}
