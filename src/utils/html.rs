use regex::Regex;
use serde::de::DeserializeOwned;

use super::http::parse_json;
use crate::sources::{SourceError, SourceResult};

/// Decodes HTML character references (`&quot;`, `&#39;`, ...).
pub fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Finds the first capture of `pattern` in `html`, entity-decodes it and parses it as JSON.
/// Used for state blobs smuggled through attributes such as `data-state="..."`.
pub fn attribute_json<T: DeserializeOwned>(
    html: &str,
    pattern: &Regex,
    what: &str,
) -> SourceResult<T> {
    let raw = pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .ok_or_else(|| SourceError::Extraction(format!("{} not found in page", what)))?;
    parse_json(&decode_entities(raw.as_str()), what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("Tom &amp; Jerry &#39;s &quot;x&quot;"), "Tom & Jerry 's \"x\"");
    }

    #[test]
    fn test_attribute_json() {
        let pattern = Regex::new(r#"data-state="([^"]+)""#).unwrap();
        let html = r#"<div data-state="{&quot;a&quot;:1}"></div>"#;

        let value: Value = attribute_json(html, &pattern, "state").unwrap();
        assert_eq!(value["a"], 1);

        let missing: SourceResult<Value> = attribute_json("<div></div>", &pattern, "state");
        assert_matches!(missing, Err(SourceError::Extraction(_)));
    }
}
