//! NicoNico watch pages. Metadata comes from the JSON the page embeds for its player;
//! the media itself is fetched through yt-dlp.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{
    ResolutionResult, SourceError, SourceProvider, SourceResult, StreamOutput, TrackInfo, seconds_to_ms,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::{fetch_text, lenient_f64, parse_json, rebase};
use crate::utils::ytdlp::YtDlp;

const DEFAULT_BASE: &str = "https://www.nicovideo.jp";

static WATCH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|secure\.|sp\.)?nicovideo\.jp/watch/(?P<id>(?:[a-z]{2})?[0-9]+)$")
        .unwrap()
});

static SERVER_RESPONSE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="server-response"]"#).unwrap());
static API_DATA_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[data-api-data]").unwrap());

#[derive(Debug, Deserialize)]
struct NicoVideo {
    id: String,
    title: String,
    #[serde(deserialize_with = "lenient_f64", default)]
    duration: f64,
}

#[derive(Debug, Deserialize)]
struct NicoNamed {
    #[serde(alias = "name")]
    nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WatchData {
    video: NicoVideo,
    owner: Option<NicoNamed>,
    channel: Option<NicoNamed>,
}

impl WatchData {
    fn into_track(self) -> SourceResult<TrackInfo> {
        // Channel uploads carry no owner.
        let author = [self.owner, self.channel]
            .into_iter()
            .flatten()
            .find_map(|named| named.nickname)
            .ok_or_else(|| SourceError::extraction("NicoNico video has no owner"))?;

        Ok(TrackInfo {
            uri: watch_url(&self.video.id),
            identifier: self.video.id,
            title: self.video.title,
            author,
            length: seconds_to_ms(self.video.duration),
            is_stream: false,
        })
    }
}

fn watch_url(id: &str) -> String {
    format!("https://www.nicovideo.jp/watch/{}", id)
}

/// Reads the player data from a watch page, trying the current layout before the legacy one.
fn parse_watch_page(html: &str) -> SourceResult<WatchData> {
    let document = Html::parse_document(html);

    if let Some(content) = document
        .select(&SERVER_RESPONSE_SELECTOR)
        .next()
        .and_then(|meta| meta.value().attr("content"))
    {
        let mut payload: Value = parse_json(content, "NicoNico server response")?;
        let response = payload
            .pointer_mut("/data/response")
            .map(Value::take)
            .ok_or_else(|| SourceError::extraction("NicoNico server response has no data"))?;
        return serde_json::from_value(response)
            .map_err(|e| SourceError::Extraction(format!("invalid NicoNico watch data: {}", e)));
    }

    let api_data = document
        .select(&API_DATA_SELECTOR)
        .next()
        .and_then(|el| el.value().attr("data-api-data"))
        .ok_or_else(|| SourceError::extraction("NicoNico watch data not found in page"))?;
    parse_json(api_data, "NicoNico api data")
}

pub struct NicoNicoSource {
    client: reqwest::Client,
    base: String,
    ytdlp: YtDlp,
}

impl NicoNicoSource {
    pub fn new(config: &SourcesConfig) -> Self {
        Self::with_base(config, DEFAULT_BASE)
    }

    pub fn with_base(config: &SourcesConfig, base: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            base: base.into().trim_end_matches('/').to_string(),
            ytdlp: YtDlp::new(&config.ytdlp_path),
        }
    }

    pub fn video_id(url: &str) -> Option<&str> {
        WATCH_REGEX.captures(url).and_then(|c| c.name("id")).map(|m| m.as_str())
    }
}

#[async_trait]
impl SourceProvider for NicoNicoSource {
    fn source(&self) -> &'static str {
        "nicovideo"
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        search.is_none() && WATCH_REGEX.is_match(resource)
    }

    async fn resolve(&self, resource: &str, _search: Option<&str>) -> SourceResult<ResolutionResult> {
        let id = Self::video_id(resource).ok_or_else(|| SourceError::Unsupported(resource.to_string()))?;
        info!("Resolving NicoNico video {}", id);

        let url = rebase(&watch_url(id), &self.base);
        let html = fetch_text(self.client.get(url), "NicoNico").await?;
        let track = parse_watch_page(&html)?.into_track()?;
        Ok(ResolutionResult::tracks(vec![track]))
    }

    /// NicoNico serves no opus track, so the host always probes what yt-dlp picks.
    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        self.ytdlp.stream(uri, true)
    }
}
