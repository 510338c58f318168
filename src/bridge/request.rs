//! Turning HTTP requests into node request contexts.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

use crate::core::Payload;

/// Header carrying the caller's identity hash, hex encoded.
pub const IDENTITY_HEADER: &str = "X-Remote-Identity";

/// Upper bound on a request body.
pub const MAX_BODY: u64 = 1024 * 1024;

/// Split a request URL into its decoded path and raw query.
pub fn split_url(url: &str) -> (String, Option<&str>) {
    let url = url.split('#').next().unwrap_or_default();
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    let path = percent_decode_str(path).decode_utf8_lossy().into_owned();
    (path, query.filter(|q| !q.is_empty()))
}

/// Parse `a=1&b=two+words` form encoding.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Payload from the query string or, failing that, the body.
///
/// A JSON object body becomes a mapping (non-string values keep their JSON
/// text); any other non-empty body is passed through as bytes.
pub fn payload_from(query: Option<&str>, body: Vec<u8>) -> Payload {
    if let Some(query) = query {
        return Payload::Map(parse_query(query));
    }
    if body.is_empty() {
        return Payload::None;
    }

    match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(&body) {
        Ok(object) => Payload::Map(
            object
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect(),
        ),
        Err(_) => Payload::Bytes(body),
    }
}

/// Decode the identity header value. Malformed values count as anonymous.
pub fn parse_identity(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    hex::decode(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("/page/index.mu"), ("/page/index.mu".to_owned(), None));
        assert_eq!(
            split_url("/page/a%20b.mu?field_x=1#top"),
            ("/page/a b.mu".to_owned(), Some("field_x=1"))
        );
        assert_eq!(split_url("/page/x?"), ("/page/x".to_owned(), None));
    }

    #[test]
    fn test_parse_query() {
        let map = parse_query("field_name=Jane+Doe&var_q=%2Fx&flag&&");
        assert_eq!(map["field_name"], "Jane Doe");
        assert_eq!(map["var_q"], "/x");
        assert_eq!(map["flag"], "");
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_payload_from_json_object() {
        let body = br#"{"field_a": "x", "var_n": 3}"#.to_vec();
        let Payload::Map(map) = payload_from(None, body) else {
            panic!("expected a mapping payload");
        };
        assert_eq!(map["field_a"], "x");
        assert_eq!(map["var_n"], "3");
    }

    #[test]
    fn test_payload_from_other_bodies() {
        assert_eq!(payload_from(None, Vec::new()), Payload::None);
        assert_eq!(payload_from(None, b"[1,2]".to_vec()), Payload::Bytes(b"[1,2]".to_vec()));
        assert_eq!(payload_from(None, b"raw".to_vec()), Payload::Bytes(b"raw".to_vec()));
        assert!(matches!(payload_from(Some("a=1"), b"raw".to_vec()), Payload::Map(_)));
    }

    #[test]
    fn test_parse_identity() {
        assert_eq!(parse_identity("ab01"), Some(vec![0xab, 0x01]));
        assert_eq!(parse_identity(" "), None);
        assert_eq!(parse_identity("zz"), None);
    }
}
