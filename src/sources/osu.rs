//! osu! beatmap sets. The beatmap page only names the song; the playable media is
//! found by searching YouTube Music for it.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::info;

use super::{ResolutionResult, SourceError, SourceProvider, SourceResult, StreamOutput, TrackInfo};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::{fetch_text, rebase};
use crate::utils::ytdlp::YtDlp;
use crate::utils::ytmusic::{SongCatalog, cross_resolve};

const BEATMAPSET_PREFIX: &str = "https://osu.ppy.sh/beatmapsets/";
const DEFAULT_BASE: &str = "https://osu.ppy.sh";
/// Length of the site prefix in front of `Artist - Title` in the page description.
const DESCRIPTION_PREFIX_CHARS: usize = 18;

static DESCRIPTION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());

/// Extracts `(artist, title)` from a beatmap set page.
fn parse_beatmap_page(html: &str) -> SourceResult<(String, String)> {
    let not_supported = || SourceError::extraction("osu! beatmap page has no song description");

    let document = Html::parse_document(html);
    let content = document
        .select(&DESCRIPTION_SELECTOR)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .ok_or_else(not_supported)?;

    let song: String = content.chars().skip(DESCRIPTION_PREFIX_CHARS).collect();
    let (artist, title) = song.split_once(" - ").ok_or_else(not_supported)?;
    Ok((artist.to_string(), title.to_string()))
}

pub struct OsuSource {
    client: reqwest::Client,
    base: String,
    catalog: Arc<dyn SongCatalog>,
    ytdlp: YtDlp,
}

impl OsuSource {
    pub fn new(config: &SourcesConfig, catalog: Arc<dyn SongCatalog>) -> Self {
        Self::with_base(config, catalog, DEFAULT_BASE)
    }

    pub fn with_base(config: &SourcesConfig, catalog: Arc<dyn SongCatalog>, base: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            base: base.into().trim_end_matches('/').to_string(),
            catalog,
            ytdlp: YtDlp::new(&config.ytdlp_path),
        }
    }
}

#[async_trait]
impl SourceProvider for OsuSource {
    fn source(&self) -> &'static str {
        "osu-songs"
    }

    // Registered for the host, but only beatmap links are resolved.
    fn search_shorts(&self) -> &'static [&'static str] {
        &["os"]
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        search.is_none() && resource.starts_with(BEATMAPSET_PREFIX)
    }

    async fn initialize(&self) -> SourceResult<()> {
        self.catalog.initialize().await
    }

    async fn resolve(&self, resource: &str, search: Option<&str>) -> SourceResult<ResolutionResult> {
        if search.is_some() || !resource.starts_with(BEATMAPSET_PREFIX) {
            return Err(SourceError::Unsupported(resource.to_string()));
        }
        info!("Resolving osu! beatmap set {}", resource);

        let html = fetch_text(self.client.get(rebase(resource, &self.base)), "osu!").await?;
        let (artist, title) = parse_beatmap_page(&html)?;
        let track = TrackInfo {
            title,
            author: artist,
            identifier: resource.to_string(),
            uri: String::new(),
            length: 0,
            is_stream: false,
        };

        let entries = cross_resolve(
            self.catalog.as_ref(),
            vec![track],
            |t| format!("{} by {}", t.title, t.author),
            |t, song| {
                t.uri = song.watch_url();
                t.length = song.length_ms();
                if !song.artists.is_empty() {
                    t.author = song.artists.join(" ");
                }
            },
        )
        .await?;
        Ok(ResolutionResult::tracks(entries))
    }

    async fn stream(&self, track: &TrackInfo, using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        self.ytdlp.stream(uri, using_fallback_decode)
    }
}
