use std::sync::Arc;

use assert_matches::assert_matches;
use futures::StreamExt;
use mockall::predicate::eq;
use pretty_assertions::assert_eq;
use source_plugins::sources::apple_music::AppleMusicSource;
use source_plugins::sources::deezer::DeezerSource;
use source_plugins::sources::spotify_plus::{SpotifyEndpoints, SpotifyPlusSource};
use source_plugins::sources::twitter::TwitterSource;
use source_plugins::sources::vk::VkSource;
use source_plugins::sources::SEARCH_LIMIT;
use source_plugins::{Query, SourceError, SourceProvider, SourceRegistry, SourcesConfig};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::fixtures::{deezer_page, deezer_song, itunes_search, spotify_track};
use crate::common::mocks::{MockCatalog, catalog_song};
use crate::common::{mount_page, persisted};
use crate::test_utils;

fn registry(providers: Vec<Arc<dyn SourceProvider>>) -> SourceRegistry {
    test_utils::init();
    SourceRegistry::new(providers)
}

#[tokio::test]
async fn tagged_apple_music_search_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("term", "test song"))
        .respond_with(ResponseTemplate::new(200).set_body_json(itunes_search(15)))
        .expect(1)
        .mount(&server)
        .await;

    let config = SourcesConfig::default();
    let registry = registry(vec![
        Arc::new(AppleMusicSource::with_api_base(&config, server.uri())),
        Arc::new(DeezerSource::with_page_base(server.uri())),
    ]);

    let (source, result) = registry.resolve(&Query::parse("amsearch:test song")).await.unwrap();

    assert_eq!(source, "itunes");
    assert_eq!(result.entries.len(), SEARCH_LIMIT);
    for track in &result.entries {
        assert!(!track.title.is_empty());
        assert!(!track.author.is_empty());
        assert!(!track.identifier.is_empty());
        assert!(!track.is_stream);
    }
}

#[tokio::test]
async fn deezer_descriptor_streams_after_restart() {
    let server = MockServer::start().await;
    let media = format!("{}/media/3135556.mp3", server.uri());
    mount_page(
        &server,
        "/us/track/3135556",
        deezer_page(&serde_json::json!({ "DATA": deezer_song("3135556", "Harder Better", &media) })),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/media/3135556.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xFB, 0x90, 0x00]))
        .mount(&server)
        .await;

    let registry = registry(vec![Arc::new(DeezerSource::with_page_base(server.uri()))]);
    let url = "https://www.deezer.com/us/track/3135556";

    let (source, first) = registry.resolve(&Query::resource(url)).await.unwrap();
    let (_, second) = registry.resolve(&Query::resource(url)).await.unwrap();
    assert_eq!(first.entries[0].identifier, second.entries[0].identifier);
    assert_eq!(first.entries[0].uri, second.entries[0].uri);

    let track = persisted(&first.entries[0]);
    let mut output = registry.stream(source, &track, false).await.unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = output.stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(body, vec![0xFF, 0xFB, 0x90, 0x00]);
}

#[tokio::test]
async fn vk_single_track_is_rejected_not_passed_on() {
    let server = MockServer::start().await;
    let config = SourcesConfig::default();
    let registry = registry(vec![
        Arc::new(VkSource::with_base(&config, server.uri())),
        Arc::new(AppleMusicSource::with_api_base(&config, server.uri())),
    ]);

    let err = registry
        .resolve(&Query::resource("https://vk.com/audio-2000_456239017"))
        .await
        .unwrap_err();

    assert_matches!(err, SourceError::UnsupportedKind(ref msg) if msg.contains("can only extract playlists"));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn spotify_track_without_catalog_match_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "token",
            "accessTokenExpirationTimestampMs": i64::MAX
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tracks/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(spotify_track("Song", "Artist")))
        .mount(&server)
        .await;

    let mut catalog = MockCatalog::new();
    catalog.expect_initialize().times(1).returning(|| Ok(()));
    catalog
        .expect_search_songs()
        .with(eq("Song by Artist , OFFICIAL"))
        .times(1)
        .returning(|_| Ok(vec![]));

    let endpoints = SpotifyEndpoints {
        api: format!("{}/v1", server.uri()),
        accounts: server.uri(),
        open: server.uri(),
    };
    let registry = registry(vec![Arc::new(SpotifyPlusSource::with_endpoints(
        &SourcesConfig::default(),
        Arc::new(catalog),
        endpoints,
    ))]);

    assert_eq!(registry.initialize_all().await, 1);
    let (source, result) = registry
        .resolve(&Query::resource("https://open.spotify.com/track/abc"))
        .await
        .unwrap();

    assert_eq!(source, "spotify+");
    assert!(result.entries.is_empty());
}

#[tokio::test]
async fn spotify_track_takes_catalog_uri_and_length() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "token",
            "accessTokenExpirationTimestampMs": i64::MAX
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/tracks/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(spotify_track("Song", "Artist")))
        .mount(&server)
        .await;

    let mut catalog = MockCatalog::new();
    catalog
        .expect_search_songs()
        .returning(|_| Ok(vec![catalog_song("dQw4w9WgXcQ", 212)]));

    let endpoints = SpotifyEndpoints {
        api: format!("{}/v1", server.uri()),
        accounts: server.uri(),
        open: server.uri(),
    };
    let registry = registry(vec![Arc::new(SpotifyPlusSource::with_endpoints(
        &SourcesConfig::default(),
        Arc::new(catalog),
        endpoints,
    ))]);

    let (_, result) = registry
        .resolve(&Query::resource("https://open.spotify.com/track/abc"))
        .await
        .unwrap();

    assert_eq!(result.entries.len(), 1);
    let track = &result.entries[0];
    assert_eq!(track.title, "Song");
    assert_eq!(track.uri, "https://youtube.com/watch?v=dQw4w9WgXcQ");
    assert_eq!(track.length, 212_000);
}

#[tokio::test]
async fn failed_initialization_leaves_source_uninitialized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1.1/guest/activate.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let registry = registry(vec![Arc::new(TwitterSource::with_api_base(
        &SourcesConfig::default(),
        server.uri(),
    ))]);

    assert_eq!(registry.initialize_all().await, 0);
    let result = registry
        .resolve(&Query::resource("https://twitter.com/someone/status/1"))
        .await;
    assert_matches!(result, Err(SourceError::Uninitialized("twitter")));
}

#[cfg(feature = "midi")]
mod midi {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::common::fixtures::MIDI_ONE_NOTE;
    use source_plugins::StreamKind;
    use source_plugins::sources::midi::MidiSource;

    async fn serve(server: &MockServer, route: &str, content_type: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", content_type)
                    .set_body_bytes(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn midi_is_the_last_resort_for_web_urls() {
        let server = MockServer::start().await;
        serve(&server, "/song.mid", "audio/midi", MIDI_ONE_NOTE.to_vec()).await;
        serve(&server, "/page.html", "text/html", b"<html></html>".to_vec()).await;

        let config = SourcesConfig::default();
        let registry = registry(vec![
            Arc::new(DeezerSource::with_page_base(server.uri())),
            Arc::new(MidiSource::new(&config)),
        ]);

        let url = format!("{}/song.mid", server.uri());
        let (source, result) = registry.resolve(&Query::resource(&url)).await.unwrap();
        assert_eq!(source, "midi");
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].identifier, url);
        assert_eq!(result.entries[0].length, 0);
        assert!(result.entries[0].is_stream);

        let (_, other) = registry
            .resolve(&Query::resource(format!("{}/page.html", server.uri())))
            .await
            .unwrap();
        assert!(other.entries.is_empty());

        let output = registry.stream("midi", &result.entries[0], false).await.unwrap();
        assert_eq!(output.kind, Some(StreamKind::Raw));
        let wav = output.collect_bytes().await.unwrap();
        assert_eq!(&wav[8..12], b"WAVE");
    }

    #[tokio::test]
    async fn unknown_deezer_page_type_is_not_handed_to_midi() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/us/track/1",
            deezer_page(&serde_json::json!({ "DATA": { "__TYPE__": "episode" } })),
        )
        .await;

        let config = SourcesConfig::default();
        let registry = registry(vec![
            Arc::new(DeezerSource::with_page_base(server.uri())),
            Arc::new(MidiSource::new(&config)),
        ]);

        let err = registry
            .resolve(&Query::resource("https://www.deezer.com/us/track/1"))
            .await
            .unwrap_err();
        assert_matches!(err, SourceError::UnsupportedKind(ref msg) if msg.contains("episode"));
    }
}
