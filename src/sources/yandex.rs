//! Yandex video pages. Metadata lives in the `data-state` attribute; only clips hosted
//! on ok.ru can be streamed, through the player options embedded in the ok.ru page.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    ResolutionResult, SourceError, SourceProvider, SourceResult, StreamOutput, TrackInfo, seconds_to_ms,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::html::attribute_json;
use crate::utils::http::{
    fetch_text, lenient_f64, open_stream, parse_json, rebase, string_or_number,
};

const OK_RU_HOST: &str = "ok.ru";

static USABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://(?:music\.)?yandex\.ru/(?:users|video)").unwrap());
static DATA_STATE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"data-state="([^"]+)""#).unwrap());
static DATA_OPTIONS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-options="([^"]+)""#).unwrap());
static EMBEDDED_METADATA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""metadataEmbedded":.+?",""#).unwrap());

#[derive(Debug, Deserialize)]
struct Clip {
    clear_title: String,
    #[serde(rename = "clipHost")]
    clip_host: String,
    #[serde(rename = "filmId", deserialize_with = "string_or_number")]
    film_id: String,
    url: String,
    #[serde(deserialize_with = "lenient_f64", default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct InitialProps {
    current: Clip,
}

#[derive(Debug, Deserialize)]
struct PageState {
    #[serde(rename = "initialProps")]
    initial_props: InitialProps,
}

impl From<Clip> for TrackInfo {
    fn from(clip: Clip) -> Self {
        TrackInfo {
            title: clip.clear_title,
            author: clip.clip_host,
            identifier: clip.film_id,
            uri: clip.url,
            length: seconds_to_ms(clip.duration),
            is_stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlashVars {
    metadata: String,
}

#[derive(Debug, Deserialize)]
struct PlayerOptions {
    flashvars: FlashVars,
}

#[derive(Debug, Deserialize)]
struct OkVideo {
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct OkMetadata {
    #[serde(default)]
    videos: Vec<OkVideo>,
}

/// Drops every backslash not followed by two more.
fn strip_escapes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| c != '\\' || (chars.get(i + 1) == Some(&'\\') && chars.get(i + 2) == Some(&'\\')))
        .map(|(_, &c)| c)
        .collect()
}

/// Picks the media URL out of an ok.ru player page.
fn ok_ru_video_url(html: &str) -> SourceResult<String> {
    let options: PlayerOptions = attribute_json(html, &DATA_OPTIONS_REGEX, "ok.ru player options")?;
    let unescaped = strip_escapes(&options.flashvars.metadata);
    let metadata = EMBEDDED_METADATA_REGEX.replace(&unescaped, "\"");
    let metadata: OkMetadata = parse_json(&metadata, "ok.ru metadata")?;

    let mut videos = metadata.videos;
    let index = videos.iter().position(|v| v.name == "low").unwrap_or(0);
    if videos.is_empty() {
        return Err(SourceError::extraction("ok.ru metadata lists no videos"));
    }
    Ok(videos.swap_remove(index).url)
}

pub struct YandexSource {
    client: reqwest::Client,
    /// Replaces the origin of every fetched page when set.
    origin_override: Option<String>,
}

impl YandexSource {
    pub fn new(_config: &SourcesConfig) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            origin_override: None,
        }
    }

    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            origin_override: Some(origin.into()),
        }
    }

    async fn fetch_page(&self, url: &str) -> SourceResult<String> {
        let url = match &self.origin_override {
            Some(origin) => rebase(url, origin),
            None => url.to_string(),
        };
        debug!("Fetching {}", url);
        fetch_text(self.client.get(url), "Yandex").await
    }
}

#[async_trait]
impl SourceProvider for YandexSource {
    fn source(&self) -> &'static str {
        "yandex"
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        search.is_none() && USABLE_REGEX.is_match(resource)
    }

    async fn resolve(&self, resource: &str, _search: Option<&str>) -> SourceResult<ResolutionResult> {
        if !USABLE_REGEX.is_match(resource) {
            return Err(SourceError::Unsupported(resource.to_string()));
        }
        info!("Resolving Yandex page {}", resource);

        let html = self.fetch_page(resource).await?;
        let state: PageState = attribute_json(&html, &DATA_STATE_REGEX, "Yandex state")?;
        Ok(ResolutionResult::tracks(vec![state.initial_props.current.into()]))
    }

    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        if track.author != OK_RU_HOST {
            return Err(SourceError::UnsupportedKind(format!(
                "Yandex clips hosted on {} cannot be streamed",
                track.author
            )));
        }

        let html = self.fetch_page(uri).await?;
        let url = ok_ru_video_url(&html)?;
        Ok(StreamOutput::untyped(open_stream(&self.client, &url).await?))
    }
}
