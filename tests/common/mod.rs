//! Common test utilities, fixtures, and mocks
//! This module contains shared functionality used across the integration tests

pub mod fixtures;
pub mod mocks;

use source_plugins::TrackInfo;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves `body` as HTML for GET requests to `route`.
pub async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// Simulates a descriptor persisted by the host and read back after a restart.
pub fn persisted(track: &TrackInfo) -> TrackInfo {
    let json = serde_json::to_string(track).expect("descriptor serializes");
    serde_json::from_str(&json).expect("descriptor deserializes")
}
