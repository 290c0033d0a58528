//! Source-provider plugins for a Lavalink-style audio node.
//!
//! Each provider turns a URL or tagged search query into playable track descriptors
//! and later opens a byte stream for one of them. The host side lives in
//! [`sources::SourceRegistry`], which routes requests across providers in a fixed
//! priority order.

pub mod config;
pub mod sources;
pub mod utils;

use std::sync::LazyLock;

pub use config::SourcesConfig;
pub use sources::{
    ByteStream, PlaylistData, Query, ResolutionResult, SourceError, SourceProvider,
    SourceRegistry, SourceResult, StreamKind, StreamOutput, TrackInfo,
};

/// Shared HTTP client used by every provider unless one is injected.
pub static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .user_agent(config::DEFAULT_USER_AGENT)
        .build()
        .unwrap_or_default()
});
