//! This module aggregates the helpers shared between providers.

/// HTML attribute and entity helpers for scraped pages.
pub mod html;
/// Request helpers: status checks, typed JSON parsing, streaming bodies.
pub mod http;
/// Streaming media through the `yt-dlp` executable.
pub mod ytdlp;
/// YouTube Music search client and the cross-resolution helper built on it.
pub mod ytmusic;
