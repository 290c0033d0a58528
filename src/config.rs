//! Runtime configuration, read from the environment (optionally seeded from a `.env` file).

use std::env;

use tracing::debug;

/// Browser-like user agent; several scraped sites serve different markup to unknown clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Bearer token shipped with the public Twitter web client. Guest sessions are opened with it.
pub const DEFAULT_TWITTER_BEARER: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcesConfig {
    /// Spotify application credentials. When both are set the client-credentials flow is
    /// used, otherwise the anonymous web-player token.
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    /// Storefront used for iTunes searches.
    pub itunes_country: String,
    /// Path or name of the `yt-dlp` executable.
    pub ytdlp_path: String,
    pub twitter_bearer_token: String,
    pub user_agent: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            spotify_client_id: None,
            spotify_client_secret: None,
            itunes_country: "US".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            twitter_bearer_token: DEFAULT_TWITTER_BEARER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SourcesConfig {
    /// Loads `.env` if present, then reads every variable, falling back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            spotify_client_id: get("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: get("SPOTIFY_CLIENT_SECRET"),
            itunes_country: get("ITUNES_COUNTRY").unwrap_or(defaults.itunes_country),
            ytdlp_path: get("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            twitter_bearer_token: get("TWITTER_BEARER_TOKEN")
                .unwrap_or(defaults.twitter_bearer_token),
            user_agent: get("SOURCES_USER_AGENT").unwrap_or(defaults.user_agent),
        };

        debug!(
            spotify_credentials = config.spotify_credentials().is_some(),
            ytdlp = %config.ytdlp_path,
            "Loaded sources configuration"
        );
        config
    }

    /// Both Spotify credentials, or `None` if either is missing.
    pub fn spotify_credentials(&self) -> Option<(&str, &str)> {
        match (&self.spotify_client_id, &self.spotify_client_secret) {
            (Some(id), Some(secret)) => Some((id, secret)),
            _ => None,
        }
    }
}
