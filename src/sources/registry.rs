//! Host-side routing: providers are kept in an explicit priority order and tried
//! by linear scan.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::apple_music::AppleMusicSource;
use super::deezer::DeezerSource;
#[cfg(feature = "midi")]
use super::midi::MidiSource;
use super::newgrounds::NewgroundsSource;
use super::niconico::NicoNicoSource;
use super::osu::OsuSource;
use super::spotify_plus::SpotifyPlusSource;
use super::twitter::TwitterSource;
use super::vk::VkSource;
use super::yandex::YandexSource;
use super::{
    ResolutionResult, SourceError, SourceProvider, SourceResult, StreamOutput, TrackInfo,
};
use crate::config::SourcesConfig;
use crate::utils::ytmusic::YtMusicClient;

/// A parsed host input: either a locator or free text tagged with a short code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub resource: String,
    pub search: Option<String>,
}

impl Query {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            search: None,
        }
    }

    pub fn search(code: impl Into<String>, terms: impl Into<String>) -> Self {
        Self {
            resource: terms.into(),
            search: Some(code.into()),
        }
    }

    /// Parses `"<code>search:<terms>"` (e.g. `dzsearch:daft punk`) into a tagged search.
    /// Anything else, URLs included, is a plain resource.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Some((prefix, terms)) = input.split_once(':') {
            if let Some(code) = prefix.strip_suffix("search") {
                let valid_code =
                    !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric());
                if valid_code && !terms.starts_with("//") {
                    return Self::search(code, terms.trim());
                }
            }
        }
        Self::resource(input)
    }
}

/// Ordered collection of providers. Earlier providers win when patterns overlap.
pub struct SourceRegistry {
    providers: Vec<Arc<dyn SourceProvider>>,
}

impl SourceRegistry {
    pub fn new(providers: Vec<Arc<dyn SourceProvider>>) -> Self {
        Self { providers }
    }

    /// Every built-in provider, in routing priority. The MIDI source accepts any http(s)
    /// URL, so it goes last.
    #[allow(unused_mut)]
    pub fn with_defaults(config: &SourcesConfig) -> Self {
        // osu! and Spotify+ share one YouTube Music session.
        let catalog = Arc::new(YtMusicClient::new(config));
        let mut providers: Vec<Arc<dyn SourceProvider>> = vec![
            Arc::new(AppleMusicSource::new(config)),
            Arc::new(DeezerSource::new(config)),
            Arc::new(NewgroundsSource::new(config)),
            Arc::new(NicoNicoSource::new(config)),
            Arc::new(OsuSource::new(config, catalog.clone())),
            Arc::new(SpotifyPlusSource::new(config, catalog)),
            Arc::new(TwitterSource::new(config)),
            Arc::new(VkSource::new(config)),
            Arc::new(YandexSource::new(config)),
        ];
        #[cfg(feature = "midi")]
        providers.push(Arc::new(MidiSource::new(config)));

        Self::new(providers)
    }

    /// Provider ids in the order they are tried.
    pub fn priority(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    pub fn get(&self, source: &str) -> Option<&Arc<dyn SourceProvider>> {
        self.providers.iter().find(|p| p.source() == source)
    }

    /// Runs every provider's setup. A failing provider is logged and stays
    /// uninitialized; returns how many succeeded.
    pub async fn initialize_all(&self) -> usize {
        let mut ready = 0;
        for provider in &self.providers {
            match provider.initialize().await {
                Ok(()) => {
                    debug!("Initialized source {}", provider.source());
                    ready += 1;
                }
                Err(e) => warn!("Failed to initialize source {}: {}", provider.source(), e),
            }
        }
        info!("{}/{} sources ready", ready, self.providers.len());
        ready
    }

    /// First provider accepting the input.
    pub fn find(&self, resource: &str, search: Option<&str>) -> Option<&Arc<dyn SourceProvider>> {
        self.providers
            .iter()
            .find(|p| p.can_be_used(resource, search))
    }

    /// Resolves through the first accepting provider. A provider that answers
    /// `Unsupported` hands the input to the next accepting one.
    pub async fn resolve(&self, query: &Query) -> SourceResult<(&'static str, ResolutionResult)> {
        let search = query.search.as_deref();
        for provider in self
            .providers
            .iter()
            .filter(|p| p.can_be_used(&query.resource, search))
        {
            info!("Resolving {:?} with source {}", query.resource, provider.source());
            match provider.resolve(&query.resource, search).await {
                Err(e) if e.is_unsupported() => {
                    debug!("Source {} passed on input: {}", provider.source(), e);
                }
                Err(e) => return Err(e),
                Ok(result) => return Ok((provider.source(), result)),
            }
        }

        Err(SourceError::Unsupported(query.resource.clone()))
    }

    pub async fn stream(
        &self,
        source: &str,
        track: &TrackInfo,
        using_fallback_decode: bool,
    ) -> SourceResult<StreamOutput> {
        let provider = self
            .get(source)
            .ok_or_else(|| SourceError::Unsupported(format!("no source named {source}")))?;
        provider.stream(track, using_fallback_decode).await
    }
}
