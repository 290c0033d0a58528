//! Byte streams handed to the host, plus the decode hint that may accompany them.

use std::fmt;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use super::SourceResult;

/// Owned media stream. The provider never reads from it after handing it over.
pub type ByteStream = BoxStream<'static, SourceResult<Bytes>>;

/// Container/encoding hint the host uses to pick a decode path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Arbitrary,
    Raw,
    OggOpus,
    WebmOpus,
    Opus,
}

pub struct StreamOutput {
    pub stream: ByteStream,
    pub kind: Option<StreamKind>,
}

impl StreamOutput {
    /// A stream with no decode hint; the host probes it.
    pub fn untyped(stream: ByteStream) -> Self {
        Self { stream, kind: None }
    }

    pub fn typed(stream: ByteStream, kind: StreamKind) -> Self {
        Self {
            stream,
            kind: Some(kind),
        }
    }

    /// Wraps an already-buffered payload as a single-chunk stream.
    pub fn from_bytes(payload: Bytes, kind: Option<StreamKind>) -> Self {
        Self {
            stream: stream::once(async move { Ok(payload) }).boxed(),
            kind,
        }
    }

    /// Drains the stream into memory.
    pub async fn collect_bytes(mut self) -> SourceResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl fmt::Debug for StreamOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOutput")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
