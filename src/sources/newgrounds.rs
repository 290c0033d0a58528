//! Newgrounds audio portal. Listen pages resolve through the portal's JSON endpoint;
//! search scrapes the results page and resolves each hit.

use std::sync::LazyLock;

use async_trait::async_trait;
use futures::future::try_join_all;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    ResolutionResult, SEARCH_LIMIT, SourceError, SourceProvider, SourceResult, StreamOutput,
    TrackInfo, seconds_to_ms,
};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::{fetch_json, fetch_text, lenient_f64, open_stream};

const DEFAULT_BASE: &str = "https://www.newgrounds.com";

static LISTEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://www\.newgrounds\.com/audio/listen/(\d+)$").unwrap());

static RESULTS_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[id^="search_results_container_"]"#).unwrap());
static ITEM_LIST_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.itemlist.spaced").unwrap());
static SUBMISSION_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.item-audiosubmission").unwrap());

#[derive(Debug, Deserialize)]
struct AudioSource {
    src: String,
}

/// Payload of the `audio/load/<id>/3` endpoint.
#[derive(Debug, Deserialize)]
struct AudioLoad {
    title: String,
    author: String,
    #[serde(deserialize_with = "lenient_f64", default)]
    duration: f64,
    #[serde(default)]
    sources: Vec<AudioSource>,
}

impl AudioLoad {
    fn into_track(self, id: &str) -> SourceResult<TrackInfo> {
        let uri = self
            .sources
            .into_iter()
            .next()
            .map(|s| s.src)
            .ok_or_else(|| SourceError::Extraction(format!("Newgrounds audio {} has no source", id)))?;

        Ok(TrackInfo {
            title: self.title,
            author: self.author,
            identifier: id.to_string(),
            uri,
            length: seconds_to_ms(self.duration),
            is_stream: false,
        })
    }
}

/// Collects submission ids from a search results page, in page order.
fn search_result_ids(html: &str) -> SourceResult<Vec<String>> {
    let document = Html::parse_document(html);
    let item_list = document
        .select(&RESULTS_SELECTOR)
        .next()
        .and_then(|container| container.select(&ITEM_LIST_SELECTOR).next())
        .ok_or_else(|| SourceError::extraction("Newgrounds search results not found"))?;

    let ids = item_list
        .children()
        .filter_map(ElementRef::wrap)
        // Entries with an id are ads and separators.
        .filter(|item| item.value().id().is_none_or(str::is_empty))
        .filter_map(|item| {
            let href = item.select(&SUBMISSION_SELECTOR).next()?.value().attr("href")?;
            Some(LISTEN_REGEX.captures(href)?[1].to_string())
        })
        .take(SEARCH_LIMIT)
        .collect();
    Ok(ids)
}

pub struct NewgroundsSource {
    client: reqwest::Client,
    base: String,
}

impl NewgroundsSource {
    pub fn new(_config: &SourcesConfig) -> Self {
        Self::with_base(DEFAULT_BASE)
    }

    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn is_newgrounds_url(url: &str) -> bool {
        LISTEN_REGEX.is_match(url)
    }

    async fn load(&self, id: &str) -> SourceResult<TrackInfo> {
        debug!("Loading Newgrounds audio {}", id);
        let request = self
            .client
            .get(format!("{}/audio/load/{}/3", self.base, id))
            .header("X-Requested-With", "XMLHttpRequest");
        let payload: AudioLoad = fetch_json(request, "Newgrounds").await?;
        payload.into_track(id)
    }

    async fn search(&self, terms: &str) -> SourceResult<Vec<TrackInfo>> {
        info!("Searching Newgrounds for {:?}", terms);
        let request = self
            .client
            .get(format!("{}/search/conduct/audio", self.base))
            .query(&[("suitables", "etm"), ("c", "3"), ("terms", terms)]);
        let html = fetch_text(request, "Newgrounds search").await?;
        let ids = search_result_ids(&html)?;
        debug!("Newgrounds search found {} submissions", ids.len());

        try_join_all(ids.iter().map(|id| self.load(id))).await
    }
}

#[async_trait]
impl SourceProvider for NewgroundsSource {
    fn source(&self) -> &'static str {
        "newgrounds"
    }

    fn search_shorts(&self) -> &'static [&'static str] {
        &["ng"]
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        self.is_own_search(search) || (search.is_none() && Self::is_newgrounds_url(resource))
    }

    async fn resolve(&self, resource: &str, search: Option<&str>) -> SourceResult<ResolutionResult> {
        if self.is_own_search(search) {
            return Ok(ResolutionResult::tracks(self.search(resource).await?));
        }

        let id = LISTEN_REGEX
            .captures(resource)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| SourceError::Unsupported(resource.to_string()))?;
        Ok(ResolutionResult::tracks(vec![self.load(&id).await?]))
    }

    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        Ok(StreamOutput::untyped(open_stream(&self.client, uri).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SEARCH_PAGE: &str = r#"<html><body>
        <div id="search_results_container_audio">
          <ul class="itemlist spaced">
            <li><a class="item-audiosubmission " href="https://www.newgrounds.com/audio/listen/101">a</a></li>
            <li id="ad-slot"><a class="item-audiosubmission " href="https://www.newgrounds.com/audio/listen/999">ad</a></li>
            <li><a class="item-audiosubmission " href="https://www.newgrounds.com/portal/view/5">game</a></li>
            <li><a class="item-audiosubmission " href="https://www.newgrounds.com/audio/listen/102">b</a></li>
          </ul>
        </div>
        </body></html>"#;

    fn load_body(title: &str, src: &str) -> serde_json::Value {
        json!({ "title": title, "author": "Composer", "duration": 61.4, "sources": [{ "src": src }] })
    }

    #[rstest]
    #[case("https://www.newgrounds.com/audio/listen/467339", None, true)]
    #[case("https://www.newgrounds.com/audio/listen/abc", None, false)]
    #[case("https://newgrounds.com/audio/listen/1", None, false)]
    #[case("anything", Some("ng"), true)]
    #[case("anything", Some("dz"), false)]
    fn test_can_be_used(#[case] resource: &str, #[case] search: Option<&str>, #[case] expected: bool) {
        let source = NewgroundsSource::new(&SourcesConfig::default());
        assert_eq!(source.can_be_used(resource, search), expected);
    }

    #[test]
    fn test_search_result_ids_skip_ads_and_foreign_links() {
        assert_eq!(search_result_ids(SEARCH_PAGE).unwrap(), vec!["101", "102"]);
    }

    #[test]
    fn test_search_page_without_container() {
        assert_matches!(
            search_result_ids("<html><body><ul class=\"itemlist spaced\"></ul></body></html>"),
            Err(SourceError::Extraction(_))
        );
    }

    #[test]
    fn test_load_without_sources() {
        let load: AudioLoad = serde_json::from_value(json!({ "title": "t", "author": "a", "duration": 1 })).unwrap();
        assert_matches!(load.into_track("1"), Err(SourceError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_search_loads_every_submission() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/conduct/audio"))
            .and(query_param("terms", "chill beats"))
            .and(query_param("suitables", "etm"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_PAGE))
            .mount(&server)
            .await;
        for (id, title) in [("101", "First"), ("102", "Second")] {
            Mock::given(method("GET"))
                .and(path(format!("/audio/load/{}/3", id)))
                .and(header("X-Requested-With", "XMLHttpRequest"))
                .respond_with(ResponseTemplate::new(200).set_body_json(load_body(title, "https://audio.ngfiles.com/x.mp3")))
                .mount(&server)
                .await;
        }

        let source = NewgroundsSource::with_base(server.uri());
        let result = source.resolve("chill beats", Some("ng")).await.unwrap();

        let titles: Vec<_> = result.entries.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
        assert_eq!(result.entries[0].identifier, "101");
        assert_eq!(result.entries[0].length, 61_400);
    }

    #[tokio::test]
    async fn test_search_fails_when_any_lookup_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/conduct/audio"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SEARCH_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/audio/load/101/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(load_body("First", "https://x/1.mp3")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/audio/load/102/3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = NewgroundsSource::with_base(server.uri());
        assert_matches!(
            source.resolve("chill beats", Some("ng")).await,
            Err(SourceError::ExternalApi(_))
        );
    }

    #[tokio::test]
    async fn test_resolve_listen_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/audio/load/467339/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(load_body("Song", "https://audio.ngfiles.com/467339.mp3")))
            .mount(&server)
            .await;

        let source = NewgroundsSource::with_base(server.uri());
        let result = source
            .resolve("https://www.newgrounds.com/audio/listen/467339", None)
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].uri, "https://audio.ngfiles.com/467339.mp3");
        assert_eq!(result.pl_data, None);
    }
}
