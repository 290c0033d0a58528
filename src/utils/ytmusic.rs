//! YouTube Music search, used to find a playable video for tracks whose metadata
//! comes from another service.

use std::sync::LazyLock;

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use reqwest::header;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::http::{fetch_json, fetch_text};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::sources::{SourceError, SourceResult, TrackInfo};

const DEFAULT_BASE_URL: &str = "https://music.youtube.com";
/// Search `params` value that restricts results to the "Songs" shelf.
const SONGS_FILTER: &str = "Eg-KAQwIARAAGAAgACgAMABqChAEEAMQCRAFEAo%3D";

static API_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#).unwrap());
static CLIENT_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""INNERTUBE_CLIENT_VERSION"\s*:\s*"([^"]+)""#).unwrap());
static VISITOR_DATA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""VISITOR_DATA"\s*:\s*"([^"]+)""#).unwrap());

/// One song hit from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSong {
    pub video_id: String,
    pub name: String,
    pub artists: Vec<String>,
    /// Duration in whole seconds, when listed.
    pub duration_secs: Option<u64>,
}

impl CatalogSong {
    pub fn watch_url(&self) -> String {
        format!("https://youtube.com/watch?v={}", self.video_id)
    }

    pub fn length_ms(&self) -> u64 {
        self.duration_secs.unwrap_or(0) * 1000
    }
}

/// A searchable song catalog that yields playable video ids.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SongCatalog: Send + Sync {
    /// One-time session setup. Searches before it fail with `Uninitialized`.
    async fn initialize(&self) -> SourceResult<()>;

    /// Song hits for free text, best match first.
    async fn search_songs(&self, query: &str) -> SourceResult<Vec<CatalogSong>>;
}

/// Client settings scraped from the YouTube Music landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InnertubeConfig {
    api_key: String,
    client_version: String,
    visitor_data: Option<String>,
}

/// Innertube-backed [`SongCatalog`].
pub struct YtMusicClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    session: OnceCell<InnertubeConfig>,
}

impl YtMusicClient {
    pub fn new(config: &SourcesConfig) -> Self {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(config: &SourcesConfig, base_url: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            session: OnceCell::new(),
        }
    }
}

#[async_trait]
impl SongCatalog for YtMusicClient {
    async fn initialize(&self) -> SourceResult<()> {
        if self.session.get().is_some() {
            return Ok(());
        }

        info!("Initializing YouTube Music session");
        let request = self
            .client
            .get(format!("{}/", self.base_url))
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .header(header::COOKIE, "CONSENT=YES+1");
        let html = fetch_text(request, "YouTube Music").await?;
        let config = parse_innertube_config(&html)?;
        debug!("YouTube Music client version {}", config.client_version);

        // A concurrent initializer may have won; either config is fine.
        let _ = self.session.set(config);
        Ok(())
    }

    async fn search_songs(&self, query: &str) -> SourceResult<Vec<CatalogSong>> {
        let config = self
            .session
            .get()
            .ok_or(SourceError::Uninitialized("ytmusic"))?;

        debug!("Searching YouTube Music for {:?}", query);
        let body = json!({
            "context": {
                "client": {
                    "clientName": "WEB_REMIX",
                    "clientVersion": config.client_version,
                    "hl": "en",
                    "gl": "US",
                    "visitorData": config.visitor_data,
                }
            },
            "query": query,
            "params": SONGS_FILTER,
        });

        let request = self
            .client
            .post(format!("{}/youtubei/v1/search", self.base_url))
            .query(&[("key", config.api_key.as_str()), ("prettyPrint", "false")])
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ORIGIN, &self.base_url)
            .json(&body);
        let response: Value = fetch_json(request, "YouTube Music search").await?;

        Ok(parse_search_songs(&response))
    }
}

fn parse_innertube_config(html: &str) -> SourceResult<InnertubeConfig> {
    let capture = |re: &Regex| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    Ok(InnertubeConfig {
        api_key: capture(&API_KEY_REGEX)
            .ok_or_else(|| SourceError::extraction("YouTube Music API key not found"))?,
        client_version: capture(&CLIENT_VERSION_REGEX)
            .ok_or_else(|| SourceError::extraction("YouTube Music client version not found"))?,
        visitor_data: capture(&VISITOR_DATA_REGEX),
    })
}

/// Pulls every song row out of a search response, in display order.
fn parse_search_songs(response: &Value) -> Vec<CatalogSong> {
    let mut renderers = Vec::new();
    collect_list_items(response, &mut renderers);
    renderers.into_iter().filter_map(parse_song).collect()
}

fn collect_list_items<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "musicResponsiveListItemRenderer" {
                    out.push(child);
                } else {
                    collect_list_items(child, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_list_items(item, out)),
        _ => {}
    }
}

fn column_runs(renderer: &Value, column: usize) -> &[Value] {
    renderer["flexColumns"][column]
        .pointer("/musicResponsiveListItemFlexColumnRenderer/text/runs")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn parse_song(renderer: &Value) -> Option<CatalogSong> {
    let video_id = renderer
        .pointer("/playlistItemData/videoId")
        .or_else(|| {
            renderer.pointer(
                "/overlay/musicItemThumbnailOverlayRenderer/content/musicPlayButtonRenderer/playNavigationEndpoint/watchEndpoint/videoId",
            )
        })
        .and_then(Value::as_str)?
        .to_string();

    let name = column_runs(renderer, 0)
        .first()
        .and_then(|run| run["text"].as_str())?
        .to_string();

    let details = column_runs(renderer, 1);
    let texts: Vec<&str> = details
        .iter()
        .filter_map(|run| run["text"].as_str())
        .filter(|text| text.trim() != "•" && !text.trim().is_empty())
        .collect();

    let mut artists: Vec<String> = details
        .iter()
        .filter(|run| {
            run.pointer("/navigationEndpoint/browseEndpoint/browseId")
                .and_then(Value::as_str)
                .is_some_and(|id| id.starts_with("UC"))
        })
        .filter_map(|run| run["text"].as_str().map(str::to_string))
        .collect();
    if artists.is_empty() {
        artists.extend(texts.first().map(|s| s.to_string()));
    }

    let duration_secs = texts.iter().rev().find_map(|text| parse_duration(text));

    Some(CatalogSong {
        video_id,
        name,
        artists,
        duration_secs,
    })
}

/// Parses `M:SS` or `H:MM:SS` into seconds.
fn parse_duration(text: &str) -> Option<u64> {
    let parts: Vec<&str> = text.trim().split(':').collect();

    match parts.len() {
        // MM:SS format
        2 => {
            let minutes = parts[0].parse::<u64>().ok()?;
            let seconds = parts[1].parse::<u64>().ok()?;
            Some(minutes * 60 + seconds)
        }
        // HH:MM:SS format
        3 => {
            let hours = parts[0].parse::<u64>().ok()?;
            let minutes = parts[1].parse::<u64>().ok()?;
            let seconds = parts[2].parse::<u64>().ok()?;
            Some(hours * 3600 + minutes * 60 + seconds)
        }
        _ => None,
    }
}

/// Re-resolves every track against `catalog`, taking the first hit unconditionally.
///
/// Lookups settle independently: a track whose search fails or finds nothing is
/// dropped with a warning instead of failing the batch. Order is preserved.
/// An uninitialized catalog fails the whole batch.
pub async fn cross_resolve<Q, A>(
    catalog: &dyn SongCatalog,
    tracks: Vec<TrackInfo>,
    query: Q,
    apply: A,
) -> SourceResult<Vec<TrackInfo>>
where
    Q: Fn(&TrackInfo) -> String,
    A: Fn(&mut TrackInfo, &CatalogSong),
{
    let apply = &apply;
    let lookups = tracks.into_iter().map(|mut track| {
        let search = query(&track).trim().to_string();
        async move {
            let hits = catalog.search_songs(&search).await?;
            let first = hits.first().ok_or_else(|| {
                SourceError::Extraction(format!("no catalog match for {:?}", search))
            })?;
            apply(&mut track, first);
            Ok::<_, SourceError>(track)
        }
    });

    let mut resolved = Vec::new();
    for settled in join_all(lookups).await {
        match settled {
            Ok(track) => resolved.push(track),
            Err(e @ SourceError::Uninitialized(_)) => return Err(e),
            Err(e) => warn!("Dropping track from cross-resolution: {}", e),
        }
    }
    Ok(resolved)
}
