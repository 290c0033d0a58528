//! This module defines the provider contract shared by every source and the
//! registry that routes host requests across them.

/// Apple Music, via the public iTunes search/lookup API.
pub mod apple_music;
/// Deezer, via the app state embedded in its pages.
pub mod deezer;
/// `SourceError` and `SourceResult`.
mod error;
/// Direct MIDI files, rendered to WAV.
#[cfg(feature = "midi")]
pub mod midi;
/// Newgrounds audio portal.
pub mod newgrounds;
/// NicoNico video.
pub mod niconico;
/// osu! beatmap sets, cross-resolved on YouTube Music.
pub mod osu;
/// Ordered provider collection used by the host.
mod registry;
/// Spotify metadata, cross-resolved on YouTube Music.
pub mod spotify_plus;
mod stream;
mod track;
/// Twitter/X video statuses.
pub mod twitter;
/// VK audio playlists.
pub mod vk;
/// Yandex video pages and their ok.ru embeds.
pub mod yandex;

use async_trait::async_trait;

pub use error::{SourceError, SourceResult};
pub use registry::{Query, SourceRegistry};
pub use stream::{ByteStream, StreamKind, StreamOutput};
pub use track::{PlaylistData, ResolutionResult, SEARCH_LIMIT, TrackInfo, seconds_to_ms};

/// Capability set every source provider exposes to the host.
///
/// The host calls [`can_be_used`](SourceProvider::can_be_used), then
/// [`resolve`](SourceProvider::resolve), and later, possibly in another process,
/// [`stream`](SourceProvider::stream) with a descriptor `resolve` produced.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Stable provider id, stored alongside every track it produces.
    fn source(&self) -> &'static str;

    /// Short codes that tag a free-text search for this provider (e.g. `"dz"`).
    fn search_shorts(&self) -> &'static [&'static str] {
        &[]
    }

    /// Pure, synchronous check of whether this provider should take the input.
    ///
    /// `search` is `Some(code)` for tagged free-text queries and `None` for locators.
    fn can_be_used(&self, resource: &str, search: Option<&str>) -> bool;

    /// One-time asynchronous setup. Calls made before it completes fail with
    /// [`SourceError::Uninitialized`].
    async fn initialize(&self) -> SourceResult<()> {
        Ok(())
    }

    /// Resolves an accepted input into track descriptors.
    async fn resolve(&self, resource: &str, search: Option<&str>)
    -> SourceResult<ResolutionResult>;

    /// Opens the media stream for a previously resolved descriptor.
    async fn stream(
        &self,
        track: &TrackInfo,
        using_fallback_decode: bool,
    ) -> SourceResult<StreamOutput>;

    /// Whether `search` is one of this provider's own short codes.
    fn is_own_search(&self, search: Option<&str>) -> bool {
        search.is_some_and(|code| self.search_shorts().contains(&code))
    }
}
