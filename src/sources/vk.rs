//! VK playlists, scraped from the `data-audio` tuples embedded in the page.
//!
//! Tuple layout (positional, undocumented): 2 media URL, 3 title, 4 artist,
//! 5 duration in seconds, 26 full track id. Everything else is ignored.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    PlaylistData, ResolutionResult, SourceError, SourceProvider, SourceResult, StreamOutput, TrackInfo,
    seconds_to_ms,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::html::decode_entities;
use crate::utils::http::{fetch_text, open_stream, parse_json, rebase};

const DEFAULT_BASE: &str = "https://vk.com";

static USABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://vk\.com/(?:music/playlist/-?|audio-)\d+_\d+").unwrap());
static PLAYLIST_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/music/playlist").unwrap());
static AUDIO_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-audio="(.+?\])"[ >]"#).unwrap());
static PLAYLIST_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"audioPlaylist__title">([^<]+)</div>"#).unwrap());

const BROWSER_HEADERS: [(&str, &str); 7] = [
    ("dnt", "1"),
    ("pragma", "no-cache"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "same-site"),
    ("sec-fetch-user", "?1"),
    ("upgrade-insecure-requests", "1"),
];

/// One `data-audio` tuple.
#[derive(Debug)]
struct AudioTuple(Vec<Value>);

impl AudioTuple {
    fn text(&self, index: usize) -> String {
        match self.0.get(index) {
            Some(Value::String(s)) => decode_entities(s),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    fn to_track(&self, playlist_url: &str) -> TrackInfo {
        let track_id = self.text(26);
        let uri = format!("https://vk.com/audio{}", track_id);
        TrackInfo {
            title: self.text(3),
            author: self.text(4),
            // Tracks without an id have no page of their own.
            identifier: if track_id.is_empty() {
                playlist_url.to_string()
            } else {
                uri.clone()
            },
            uri,
            length: seconds_to_ms(self.0.get(5).and_then(Value::as_f64).unwrap_or_default()),
            is_stream: false,
        }
    }

    /// The direct media URL, when VK exposes a usable one.
    fn media_url(&self) -> SourceResult<String> {
        let url = self.text(2);
        if url.is_empty() || url.contains("audio_api_unavailable") {
            return Err(SourceError::UnsupportedKind("VK did not expose the audio URL".to_string()));
        }
        if url.contains(".m3u8") {
            return Err(SourceError::UnsupportedKind("VK HLS audio is not supported".to_string()));
        }
        Ok(url)
    }
}

fn parse_tuples(html: &str) -> SourceResult<Vec<AudioTuple>> {
    AUDIO_REGEX
        .captures_iter(html)
        .map(|caps| parse_json::<Vec<Value>>(&decode_entities(&caps[1]), "VK audio").map(AudioTuple))
        .collect()
}

fn parse_playlist(html: &str, playlist_url: &str) -> SourceResult<ResolutionResult> {
    let entries = parse_tuples(html)?
        .iter()
        .map(|tuple| tuple.to_track(playlist_url))
        .collect();

    Ok(match PLAYLIST_NAME_REGEX.captures(html) {
        Some(caps) => ResolutionResult::collection(
            entries,
            PlaylistData {
                name: decode_entities(&caps[1]).trim().to_string(),
                selected_track: Some(0),
            },
        ),
        None => ResolutionResult::tracks(entries),
    })
}

pub struct VkSource {
    client: reqwest::Client,
    base: String,
    headers: HeaderMap,
}

impl VkSource {
    pub fn new(config: &SourcesConfig) -> Self {
        Self::with_base(config, DEFAULT_BASE)
    }

    pub fn with_base(config: &SourcesConfig, base: impl Into<String>) -> Self {
        let mut headers: HeaderMap = BROWSER_HEADERS
            .iter()
            .map(|&(name, value)| (HeaderName::from_static(name), HeaderValue::from_static(value)))
            .collect();
        match HeaderValue::from_str(&config.user_agent) {
            Ok(agent) => {
                headers.insert(USER_AGENT, agent);
            }
            Err(e) => warn!("Ignoring invalid user agent for VK: {}", e),
        }

        Self {
            client: HTTP_CLIENT.clone(),
            base: base.into().trim_end_matches('/').to_string(),
            headers,
        }
    }

    async fn fetch_page(&self, url: &str) -> SourceResult<String> {
        debug!("Fetching VK page {}", url);
        let request = self
            .client
            .get(rebase(url, &self.base))
            .headers(self.headers.clone());
        fetch_text(request, "VK").await
    }
}

#[async_trait]
impl SourceProvider for VkSource {
    fn source(&self) -> &'static str {
        "vkontakte"
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        search.is_none() && USABLE_REGEX.is_match(resource)
    }

    async fn resolve(&self, resource: &str, _search: Option<&str>) -> SourceResult<ResolutionResult> {
        if !USABLE_REGEX.is_match(resource) {
            return Err(SourceError::Unsupported(resource.to_string()));
        }
        if !PLAYLIST_REGEX.is_match(resource) {
            return Err(SourceError::UnsupportedKind("VK can only extract playlists".to_string()));
        }
        info!("Resolving VK playlist {}", resource);

        let html = self.fetch_page(resource).await?;
        parse_playlist(&html, resource)
    }

    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        let html = self.fetch_page(uri).await?;
        let url = parse_tuples(&html)?
            .first()
            .ok_or_else(|| SourceError::extraction("VK audio page has no audio data"))?
            .media_url()?;

        Ok(StreamOutput::untyped(open_stream(&self.client, &url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tuple(url: &str, title: &str, artist: &str, duration: u64, id: &str) -> String {
        let mut fields = vec![json!(""); 28];
        fields[0] = json!(456239017);
        fields[1] = json!(-2000);
        fields[2] = json!(url);
        fields[3] = json!(title);
        fields[4] = json!(artist);
        fields[5] = json!(duration);
        fields[26] = json!(id);
        html_escape::encode_double_quoted_attribute(&Value::Array(fields).to_string()).into_owned()
    }

    fn playlist_page() -> String {
        format!(
            r#"<div class="audioPlaylist__title">Summer &amp; Chill </div>
            <div class="audio_row" data-audio="{}" data-full-id="1"></div>
            <div class="audio_row" data-audio="{}">x</div>"#,
            tuple("", "Tom &amp; Jerry", "Band", 201, "-2000_456239017"),
            tuple("", "No Id", "Band", 60, ""),
        )
    }

    #[rstest]
    #[case("https://vk.com/music/playlist/-2000_123", true)]
    #[case("https://vk.com/audio-2000_456239017", true)]
    #[case("https://vk.com/wall-1_2", false)]
    #[case("https://m.vk.com/music/playlist/1_2", false)]
    fn test_can_be_used(#[case] url: &str, #[case] expected: bool) {
        let source = VkSource::new(&SourcesConfig::default());
        assert_eq!(source.can_be_used(url, None), expected);
    }

    #[test]
    fn test_parse_playlist() {
        let url = "https://vk.com/music/playlist/-2000_123";
        let result = parse_playlist(&playlist_page(), url).unwrap();

        assert_eq!(
            result.pl_data,
            Some(PlaylistData {
                name: "Summer & Chill".into(),
                selected_track: Some(0)
            })
        );
        assert_eq!(
            result.entries[0],
            TrackInfo {
                title: "Tom & Jerry".into(),
                author: "Band".into(),
                identifier: "https://vk.com/audio-2000_456239017".into(),
                uri: "https://vk.com/audio-2000_456239017".into(),
                length: 201_000,
                is_stream: false,
            }
        );
        assert_eq!(result.entries[1].identifier, url);
    }

    #[rstest]
    #[case("")]
    #[case("https://vk.com/mp3/audio_api_unavailable.mp3?extra=abc")]
    #[case("https://cs1.vkuseraudio.net/s/v1/ac/index.m3u8")]
    fn test_unusable_media_urls(#[case] url: &str) {
        let tuples = parse_tuples(&format!(r#"<div data-audio="{}">"#, tuple(url, "t", "a", 1, "1_2"))).unwrap();
        assert_matches!(tuples[0].media_url(), Err(SourceError::UnsupportedKind(_)));
    }

    #[tokio::test]
    async fn test_single_track_is_rejected() {
        let source = VkSource::new(&SourcesConfig::default());
        let err = source
            .resolve("https://vk.com/audio-2000_456239017", None)
            .await
            .unwrap_err();
        assert_matches!(err, SourceError::UnsupportedKind(ref msg) if msg.contains("can only extract playlists"));
    }

    #[tokio::test]
    async fn test_resolve_sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/music/playlist/-2000_123"))
            .and(header("Sec-Fetch-Mode", "navigate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(playlist_page()))
            .mount(&server)
            .await;

        let source = VkSource::with_base(&SourcesConfig::default(), server.uri());
        let result = source
            .resolve("https://vk.com/music/playlist/-2000_123", None)
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_reads_media_url_from_audio_page() {
        let server = MockServer::start().await;
        let media = format!("{}/media/track.mp3", server.uri());
        Mock::given(method("GET"))
            .and(path("/audio-2000_456239017"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<div data-audio="{}">"#,
                tuple(&media, "t", "a", 1, "-2000_456239017")
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/track.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"id3".to_vec()))
            .mount(&server)
            .await;

        let source = VkSource::with_base(&SourcesConfig::default(), server.uri());
        let track = TrackInfo {
            title: "t".into(),
            author: "a".into(),
            identifier: "https://vk.com/audio-2000_456239017".into(),
            uri: "https://vk.com/audio-2000_456239017".into(),
            length: 1_000,
            is_stream: false,
        };
        let output = source.stream(&track, false).await.unwrap();
        assert_eq!(output.collect_bytes().await.unwrap(), b"id3");
    }
}
