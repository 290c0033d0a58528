//! Streams media through `yt-dlp`, for hosts whose media URLs need a real extractor
//! (YouTube, NicoNico).

use std::io;
use std::process::Stdio;

use bytes::Bytes;
use futures::{StreamExt, stream};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::sources::{SourceError, SourceResult, StreamKind, StreamOutput};

/// Opus audio in a WebM container; what the host can pass through without transcoding.
const OPUS_FORMAT: &str = "bestaudio[acodec=opus][ext=webm]";
/// Any audio, left for the host's fallback decoder to probe.
const FALLBACK_FORMAT: &str = "bestaudio/best";

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for writing the selected format of `url` to stdout.
    pub fn stream_args(url: &str, using_fallback_decode: bool) -> Vec<String> {
        let format = if using_fallback_decode {
            FALLBACK_FORMAT
        } else {
            OPUS_FORMAT
        };
        [
            "-f",
            format,
            "--no-playlist", // Never expand a playlist into one stream
            "--quiet",
            "-o",
            "-",
            url,
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    /// Spawns `yt-dlp` and exposes its stdout. The child is killed when the stream is dropped.
    ///
    /// Once stdout ends the exit status is checked; a failed run ends the stream with an
    /// `ExternalApi` error carrying what yt-dlp printed to stderr.
    pub fn stream(&self, url: &str, using_fallback_decode: bool) -> SourceResult<StreamOutput> {
        info!("Streaming {} through {}", url, self.program);
        let args = Self::stream_args(url, using_fallback_decode);
        debug!("yt-dlp args: {:?}", args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Config(format!("Failed to run {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::extraction("yt-dlp produced no stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SourceError::extraction("yt-dlp produced no stderr"))?;

        // Drained alongside stdout so a chatty child never blocks on a full pipe.
        let diagnostics = tokio::spawn(async move {
            let mut message = String::new();
            stderr.read_to_string(&mut message).await.map(|_| message)
        });

        let exit = stream::once(check_exit(child, self.program.clone(), diagnostics))
            .filter_map(|settled| async move { settled.transpose() });

        let stream = ReaderStream::new(stdout)
            .map(|chunk| chunk.map_err(SourceError::from))
            .chain(exit)
            .boxed();

        Ok(if using_fallback_decode {
            StreamOutput::untyped(stream)
        } else {
            StreamOutput::typed(stream, StreamKind::WebmOpus)
        })
    }
}

/// Waits for the child; a non-zero exit becomes the final item of the stream.
async fn check_exit(
    mut child: Child,
    program: String,
    diagnostics: JoinHandle<io::Result<String>>,
) -> SourceResult<Option<Bytes>> {
    let status = child.wait().await?;
    if status.success() {
        return Ok(None);
    }

    let message = diagnostics.await.ok().and_then(Result::ok).unwrap_or_default();
    warn!("{} exited with {}", program, status);
    Err(SourceError::ExternalApi(format!(
        "{} exited with {}: {}",
        program,
        status,
        message.trim()
    )))
}
