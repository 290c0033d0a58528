//! Defines `TrackInfo`, the descriptor exchanged with the host, and the collection
//! wrapper every resolution returns.

use serde::{Deserialize, Serialize};

/// Upper bound on entries returned by any search path.
pub const SEARCH_LIMIT: usize = 10;

/// Canonical metadata for one playable track.
///
/// `identifier` and `uri` must be enough to open a stream later without resolving again,
/// since the host may persist descriptors across restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    /// Display title, possibly a placeholder.
    pub title: String,
    /// Creator or uploader, possibly a placeholder.
    pub author: String,
    /// Provider-defined key, stable for the same underlying resource.
    pub identifier: String,
    /// Media or canonical page location. Empty until a secondary lookup fills it in.
    pub uri: String,
    /// Duration in milliseconds; 0 when unknown or endless.
    pub length: u64,
    /// Whether the media has no fixed duration.
    pub is_stream: bool,
}

impl TrackInfo {
    /// Returns the `uri` when it is present and non-blank.
    pub fn usable_uri(&self) -> Option<&str> {
        let uri = self.uri.trim();
        (!uri.is_empty()).then_some(uri)
    }
}

/// Collection metadata for album and playlist lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub name: String,
    /// Index into `entries` the host should treat as the default selection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_track: Option<usize>,
}

/// Output of a single `resolve` call. Entry order is significant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResolutionResult {
    pub entries: Vec<TrackInfo>,
    #[serde(rename = "plData", skip_serializing_if = "Option::is_none")]
    pub pl_data: Option<PlaylistData>,
}

impl ResolutionResult {
    pub fn tracks(entries: Vec<TrackInfo>) -> Self {
        Self {
            entries,
            pl_data: None,
        }
    }

    pub fn collection(entries: Vec<TrackInfo>, pl_data: PlaylistData) -> Self {
        Self {
            entries,
            pl_data: Some(pl_data),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Converts a duration in (possibly fractional) seconds to whole milliseconds.
pub fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
