//! Sample upstream payloads shaped like the real services return them

use serde_json::{Value, json};

/// Wraps a Deezer app state the way deezer.com embeds it.
pub fn deezer_page(state: &Value) -> String {
    format!(
        r#"<!DOCTYPE html><html><body>
        <div id="page_loader"></div>
        <div id="dzr-app">
          <div id="naboo_content">
            <script>window.__DZR_LANG__ = "us";</script>
            <script>window.__DZR_APP_STATE__ = {};</script>
          </div>
        </div>
        </body></html>"#,
        state
    )
}

pub fn deezer_song(id: &str, title: &str, media_href: &str) -> Value {
    json!({
        "__TYPE__": "song",
        "SNG_ID": id,
        "SNG_TITLE": title,
        "ART_NAME": "Daft Punk",
        "DURATION": "320",
        "MEDIA": [
            { "TYPE": "preview", "HREF": "https://cdnt-preview.dzcdn.net/preview.mp3" },
            { "TYPE": "full", "HREF": media_href }
        ]
    })
}

/// An iTunes Search API response with `count` song rows.
pub fn itunes_search(count: u64) -> Value {
    let results: Vec<Value> = (1..=count)
        .map(|i| {
            json!({
                "wrapperType": "track",
                "kind": "song",
                "trackId": 1_000 + i,
                "trackName": format!("Test Song {i}"),
                "artistName": "Test Artist",
                "collectionName": "Tests",
                "previewUrl": format!("https://audio-ssl.itunes.apple.com/{i}.m4a"),
                "trackTimeMillis": 180_000 + i
            })
        })
        .collect();
    json!({ "resultCount": count, "results": results })
}

pub fn spotify_track(name: &str, artist: &str) -> Value {
    json!({
        "name": name,
        "artists": [{ "name": artist }],
        "external_urls": { "spotify": "https://open.spotify.com/track/abc" }
    })
}

/// One middle C quarter note at 120 bpm.
pub const MIDI_ONE_NOTE: &[u8] = &[
    0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x60, //
    0x4D, 0x54, 0x72, 0x6B, 0x00, 0x00, 0x00, 0x13, //
    0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, //
    0x00, 0x90, 0x3C, 0x64, //
    0x60, 0x80, 0x3C, 0x40, //
    0x00, 0xFF, 0x2F, 0x00,
];
