//! Twitter/X statuses carrying a video. Requires a guest session opened by `initialize`.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{StatusCode, header};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{ResolutionResult, SourceError, SourceProvider, SourceResult, StreamOutput, TrackInfo};
use crate::HTTP_CLIENT;
use crate::config::SourcesConfig;
use crate::utils::http::{ensure_success, fetch_json, open_stream, parse_json};

const DEFAULT_API_BASE: &str = "https://api.twitter.com";
const NO_DESCRIPTION: &str = "No tweet description";

static STATUS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https://(?:twitter|x)\.com/([^/]+)/status/(\d+)").unwrap());
static SHORT_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https://t\.co/\w+").unwrap());

#[derive(Debug, Deserialize)]
struct GuestActivation {
    guest_token: String,
}

#[derive(Debug, Deserialize)]
struct VideoVariant {
    content_type: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    variants: Vec<VideoVariant>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "type")]
    kind: String,
    video_info: Option<VideoInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtendedEntities {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(alias = "text")]
    full_text: Option<String>,
    #[serde(default)]
    extended_entities: ExtendedEntities,
}

/// Strips `t.co` links from the status text.
fn describe(text: Option<&str>) -> String {
    let cleaned = SHORT_LINK_REGEX.replace_all(text.unwrap_or_default(), "");
    match cleaned.trim() {
        "" => NO_DESCRIPTION.to_string(),
        title => title.to_string(),
    }
}

fn status_to_track(status: Status, user: &str, status_id: &str) -> SourceResult<TrackInfo> {
    let video = status
        .extended_entities
        .media
        .iter()
        .find(|m| m.kind == "video")
        .ok_or_else(|| SourceError::UnsupportedKind("Twitter status has no video".to_string()))?;

    let mp4 = video
        .video_info
        .iter()
        .flat_map(|info| info.variants.iter())
        .find(|v| v.content_type == "video/mp4")
        .ok_or_else(|| SourceError::extraction("No mp4 URLs from link"))?;

    Ok(TrackInfo {
        title: describe(status.full_text.as_deref()),
        author: user.to_string(),
        identifier: status_id.to_string(),
        uri: mp4.url.clone(),
        length: 0,
        is_stream: false,
    })
}

pub struct TwitterSource {
    client: reqwest::Client,
    api_base: String,
    bearer_token: String,
    guest_token: RwLock<Option<String>>,
}

impl TwitterSource {
    pub fn new(config: &SourcesConfig) -> Self {
        Self::with_api_base(config, DEFAULT_API_BASE)
    }

    pub fn with_api_base(config: &SourcesConfig, api_base: impl Into<String>) -> Self {
        Self {
            client: HTTP_CLIENT.clone(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bearer_token: config.twitter_bearer_token.clone(),
            guest_token: RwLock::new(None),
        }
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.bearer_token)
    }

    /// Opens a new guest session and stores its token.
    async fn activate(&self) -> SourceResult<String> {
        debug!("Activating Twitter guest session");
        let request = self
            .client
            .post(format!("{}/1.1/guest/activate.json", self.api_base))
            .header(header::AUTHORIZATION, self.authorization());
        let activation: GuestActivation = fetch_json(request, "Twitter").await?;
        *self.guest_token.write().await = Some(activation.guest_token.clone());
        Ok(activation.guest_token)
    }

    async fn show_status(&self, status_id: &str, guest_token: &str) -> SourceResult<reqwest::Response> {
        let response = self
            .client
            .get(format!("{}/1.1/statuses/show.json", self.api_base))
            .query(&[("id", status_id), ("tweet_mode", "extended")])
            .header(header::AUTHORIZATION, self.authorization())
            .header("x-guest-token", guest_token)
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl SourceProvider for TwitterSource {
    fn source(&self) -> &'static str {
        "twitter"
    }

    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool {
        search.is_none() && STATUS_REGEX.is_match(resource)
    }

    async fn initialize(&self) -> SourceResult<()> {
        if self.guest_token.read().await.is_none() {
            self.activate().await?;
        }
        Ok(())
    }

    async fn resolve(&self, resource: &str, _search: Option<&str>) -> SourceResult<ResolutionResult> {
        let guest_token = self
            .guest_token
            .read()
            .await
            .clone()
            .ok_or(SourceError::Uninitialized("twitter"))?;
        let caps = STATUS_REGEX
            .captures(resource)
            .ok_or_else(|| SourceError::Unsupported(resource.to_string()))?;
        let (user, status_id) = (&caps[1], &caps[2]);
        info!("Resolving tweet {} by {}", status_id, user);

        let mut response = self.show_status(status_id, &guest_token).await?;
        // Guest tokens expire after a few hours.
        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            info!("Twitter rejected the guest token, opening a new session");
            let renewed = self.activate().await?;
            response = self.show_status(status_id, &renewed).await?;
        }
        let body = ensure_success(response, "Twitter").await?.text().await?;
        let status: Status = parse_json(&body, "Twitter")?;

        Ok(ResolutionResult::tracks(vec![status_to_track(status, user, status_id)?]))
    }

    async fn stream(&self, track: &TrackInfo, _using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        let uri = track.usable_uri().ok_or(SourceError::MissingUri)?;
        Ok(StreamOutput::untyped(open_stream(&self.client, uri).await?))
    }
}
