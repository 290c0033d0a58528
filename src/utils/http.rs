use futures::TryStreamExt;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;
use url::Url;

use crate::sources::{ByteStream, SourceError, SourceResult};

/// Turns a non-2xx response into `ExternalApi`, keeping the body for the message.
pub async fn ensure_success(response: Response, what: &str) -> SourceResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Cannot read response".to_string());
    Err(SourceError::ExternalApi(format!(
        "{} error: {} - {}",
        what, status, text
    )))
}

/// Sends the request and returns the body as text.
pub async fn fetch_text(request: RequestBuilder, what: &str) -> SourceResult<String> {
    let response = ensure_success(request.send().await?, what).await?;
    Ok(response.text().await?)
}

/// Sends the request and parses the body into `T`. Shape mismatches are extraction failures.
pub async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> SourceResult<T> {
    let text = fetch_text(request, what).await?;
    parse_json(&text, what)
}

pub fn parse_json<T: DeserializeOwned>(text: &str, what: &str) -> SourceResult<T> {
    serde_json::from_str(text)
        .map_err(|e| SourceError::Extraction(format!("invalid {} payload: {}", what, e)))
}

/// Opens a GET request (redirects followed) and hands back its body as a stream.
pub async fn open_stream(client: &reqwest::Client, url: &str) -> SourceResult<ByteStream> {
    debug!("Opening media stream {}", url);
    let response = ensure_success(client.get(url).send().await?, "Media host").await?;
    Ok(Box::pin(response.bytes_stream().map_err(SourceError::from)))
}

/// Replaces the scheme and host of `url` with `base`, keeping path and query.
/// Unparseable input is returned unchanged.
pub fn rebase(url: &str, base: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let mut out = base.trim_end_matches('/').to_string();
    out.push_str(parsed.path());
    if let Some(query) = parsed.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Accepts a JSON string or number and yields it as a string.
pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Accepts a JSON number or numeric string and yields it as `f64`. Missing or empty is 0.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => Ok(n.as_f64().unwrap_or_default()),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(0.0),
        serde_json::Value::String(s) => s.trim().parse().map_err(D::Error::custom),
        serde_json::Value::Null => Ok(0.0),
        other => Err(D::Error::custom(format!("expected number, got {}", other))),
    }
}
