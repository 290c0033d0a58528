//! Implements `SourceProvider` for Deezer by reading the application state Deezer
//! embeds in its pages.
//!
//! The state is the last `<script>` inside `div#naboo_content`, itself inside
//! `div#dzr-app`, and starts with `window.__DZR_APP_STATE__ = `.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::{
    PlaylistData, ResolutionResult, SEARCH_LIMIT, SourceError, SourceProvider, SourceResult,
    StreamOutput, TrackInfo, seconds_to_ms,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::{
    fetch_text, lenient_f64, open_stream, parse_json, rebase, string_or_number,
};

const DEFAULT_PAGE_BASE: &str = "https://www.deezer.com";
const STATE_PREFIX: &str = "window.__DZR_APP_STATE__ = ";

static DEEZER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.deezer\.com/\w+/(track|album|artist)/(\d+)$").unwrap()
});

static APP_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"body div[id="dzr-app"]"#).unwrap());
static CONTENT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[id="naboo_content"]"#).unwrap());
static SCRIPT_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

#[derive(Debug, Clone, Deserialize)]
struct DeezerMedia {
    #[serde(rename = "TYPE")]
    kind: Option<String>,
    #[serde(rename = "HREF")]
    href: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DeezerTrack {
    #[serde(rename = "SNG_ID", deserialize_with = "string_or_number")]
    id: String,
    #[serde(rename = "SNG_TITLE")]
    title: String,
    #[serde(rename = "ART_NAME")]
    artist: String,
    #[serde(rename = "DURATION", deserialize_with = "lenient_f64", default)]
    duration: f64,
    #[serde(rename = "MEDIA", default)]
    media: Vec<DeezerMedia>,
}

impl DeezerTrack {
    fn to_track(&self) -> TrackInfo {
        TrackInfo {
            title: self.title.clone(),
            author: self.artist.clone(),
            identifier: self.id.clone(),
            uri: format!("https://www.deezer.com/us/track/{}", self.id),
            length: seconds_to_ms(self.duration),
            is_stream: false,
        }
    }

    /// First full-length media entry, else whatever comes first.
    fn playable_media(&self) -> Option<&DeezerMedia> {
        self.media
            .iter()
            .find(|m| m.kind.as_deref() != Some("preview"))
            .or_else(|| self.media.first())
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    data: Vec<DeezerTrack>,
}

#[derive(Debug, Deserialize)]
struct AppState {
    #[serde(rename = "QUERY")]
    query: Option<Value>,
    #[serde(rename = "DATA")]
    data: Option<Value>,
    #[serde(rename = "TRACK")]
    track: Option<Listing>,
    #[serde(rename = "SONGS")]
    songs: Option<Listing>,
    #[serde(rename = "TOP")]
    top: Option<Listing>,
}

/// A page state classified by its discriminator.
#[derive(Debug)]
enum DeezerPage {
    Search(Vec<DeezerTrack>),
    Song(DeezerTrack),
    Album { title: String, tracks: Vec<DeezerTrack> },
    Artist(Vec<DeezerTrack>),
}

fn listing(listing: Option<Listing>, what: &str) -> SourceResult<Vec<DeezerTrack>> {
    listing
        .map(|l| l.data)
        .ok_or_else(|| SourceError::Extraction(format!("Deezer {} listing missing", what)))
}

impl DeezerPage {
    fn classify(state: AppState) -> SourceResult<Self> {
        let has_query = state
            .query
            .as_ref()
            .is_some_and(|q| !q.is_null() && q.as_str() != Some(""));
        if has_query {
            return Ok(DeezerPage::Search(listing(state.track, "search")?));
        }

        let data = state
            .data
            .ok_or_else(|| SourceError::extraction("Deezer state has neither DATA nor QUERY"))?;
        match data["__TYPE__"].as_str() {
            Some("song") => {
                let track = serde_json::from_value(data).map_err(|e| {
                    SourceError::Extraction(format!("invalid Deezer song: {}", e))
                })?;
                Ok(DeezerPage::Song(track))
            }
            Some("album") => Ok(DeezerPage::Album {
                title: data["ALB_TITLE"].as_str().unwrap_or_default().to_string(),
                tracks: listing(state.songs, "album")?,
            }),
            Some("artist") => Ok(DeezerPage::Artist(listing(state.top, "artist")?)),
            other => Err(SourceError::UnsupportedKind(format!(
                "Deezer page type {:?}",
                other.unwrap_or("none")
            ))),
        }
    }

    fn into_result(self) -> ResolutionResult {
        match self {
            DeezerPage::Search(tracks) => ResolutionResult::tracks(map_tracks(&tracks, SEARCH_LIMIT)),
            DeezerPage::Song(track) => ResolutionResult::tracks(vec![track.to_track()]),
            DeezerPage::Album { title, tracks } => ResolutionResult::collection(
                map_tracks(&tracks, usize::MAX),
                PlaylistData {
                    name: title,
                    selected_track: None,
                },
            ),
            DeezerPage::Artist(tracks) => ResolutionResult::tracks(map_tracks(&tracks, usize::MAX)),
        }
    }
}

fn map_tracks(tracks: &[DeezerTrack], limit: usize) -> Vec<TrackInfo> {
    tracks.iter().take(limit).map(DeezerTrack::to_track).collect()
}

/// Locates and parses the embedded state of a Deezer page.
fn parse_state(html: &str) -> SourceResult<AppState> {
    let document = Html::parse_document(html);
    let script = document
        .select(&APP_SELECTOR)
        .next()
        .and_then(|app| app.select(&CONTENT_SELECTOR).next())
        .and_then(|content| content.select(&SCRIPT_SELECTOR).last())
        .ok_or_else(|| SourceError::extraction("Deezer state script not found"))?;

    let text: String = script.text().collect();
    let json = text
        .trim()
        .strip_prefix(STATE_PREFIX)
        .ok_or_else(|| SourceError::extraction("Deezer state script has unexpected prefix"))?
        .trim_end()
        .trim_end_matches(';');

    let state: AppState = parse_json(json, "Deezer state")?;
    if state.data.is_none() && state.query.is_none() {
        return Err(SourceError::extraction("Deezer state has neither DATA nor QUERY"));
    }
    Ok(state)
}

pub struct DeezerSource {
    client: reqwest::Client,
    page_base: String,
}

impl DeezerSource {
    pub fn new(_config: &SourcesConfig) -> Self {
        Self::with_page_base(DEFAULT_PAGE_BASE)
    }

    pub fn with_page_base(page_base: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            page_base: page_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn is_deezer_url(url: &str) -> bool {
        DEEZER_REGEX.is_match(url)
    }

    fn search_url(&self, terms: &str) -> SourceResult<String> {
        let mut url = Url::parse(&self.page_base)
            .map_err(|e| SourceError::Config(format!("invalid Deezer base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Config("Deezer base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .push("search")
            .push(terms);
        Ok(url.to_string())
    }

    async fn fetch_page(&self, url: &str) -> SourceResult<DeezerPage> {
        debug!("Fetching Deezer page {}", url);
        let html = fetch_text(self.client.get(url), "Deezer").await?;
        DeezerPage::classify(parse_state(&html)?)
    }
}

#[async_trait]
impl SourceProvider for DeezerSource {
    fn source(&self) -> &'static str {
        "deezer"
    }

    fn search_shorts(&self) -> &'static [&'static str] {
        &["dz"]
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        self.is_own_search(search) || (search.is_none() && Self::is_deezer_url(resource))
    }

    async fn resolve(&self, resource: &str, search: Option<&str>) -> SourceResult<ResolutionResult> {
        let url = if self.is_own_search(search) {
            info!("Searching Deezer for {:?}", resource);
            self.search_url(resource)?
        } else if Self::is_deezer_url(resource) {
            info!("Resolving Deezer URL {}", resource);
            rebase(resource, &self.page_base)
        } else {
            return Err(SourceError::Unsupported(resource.to_string()));
        };

        Ok(self.fetch_page(&url).await?.into_result())
    }

    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        let page = self.fetch_page(&rebase(uri, &self.page_base)).await?;
        let DeezerPage::Song(song) = page else {
            return Err(SourceError::extraction("Deezer track page is not a song"));
        };
        let media = song
            .playable_media()
            .ok_or_else(|| SourceError::extraction("Deezer song has no media"))?;

        Ok(StreamOutput::untyped(open_stream(&self.client, &media.href).await?))
    }
}
