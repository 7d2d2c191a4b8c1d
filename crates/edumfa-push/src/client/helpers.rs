//! Pure helpers: URL building and body parsing (no HTTP, no status logic).

use url::Url;

use crate::crypto::strip_newlines;
use crate::error::{PushError, PushResult};
use crate::types::{EnrollmentResponse, PollEnvelope};

/// Query parameters owned by the poll request.
const POLL_PARAMS: [&str; 3] = ["serial", "timestamp", "signature"];

/// Callback URL with `serial`, `timestamp` and `signature` set, replacing any
/// existing parameters of the same names.
pub(crate) fn poll_url(callback: &Url, serial: &str, timestamp: &str, signature: &str) -> Url {
    let kept: Vec<(String, String)> = callback
        .query_pairs()
        .filter(|(key, _)| !POLL_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = callback.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept);
        pairs.append_pair("serial", serial);
        pairs.append_pair("timestamp", timestamp);
        pairs.append_pair("signature", signature);
    }
    url
}

/// Extract `detail.public_key` from the enrollment response, newlines removed.
pub(crate) fn parse_server_public_key(body: &str) -> PushResult<String> {
    let response: EnrollmentResponse = serde_json::from_str(body).map_err(|e| {
        PushError::invalid_response(format!("failed to parse enrollment response: {}", e))
    })?;
    let key = strip_newlines(&response.detail.public_key);
    if key.trim().is_empty() {
        return Err(PushError::invalid_response(
            "enrollment response carries an empty public key",
        ));
    }
    Ok(key)
}

/// Raw challenge records from `result.value`; missing levels mean none.
pub(crate) fn parse_poll_body(body: &str) -> PushResult<Vec<serde_json::Value>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let envelope: PollEnvelope = serde_json::from_str(body)
        .map_err(|e| PushError::invalid_response(format!("failed to parse poll response: {}", e)))?;
    Ok(envelope
        .result
        .and_then(|result| result.value)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_url_sets_params() {
        let callback = Url::parse("https://mfa.example.org/ttype/push").unwrap();
        let url = poll_url(&callback, "S1", "2024-01-01T00:00:00.000Z", "ABC=");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("serial".to_string(), "S1".to_string()),
                ("timestamp".to_string(), "2024-01-01T00:00:00.000Z".to_string()),
                ("signature".to_string(), "ABC=".to_string()),
            ]
        );
        assert_eq!(url.path(), "/ttype/push");
    }

    #[test]
    fn test_poll_url_replaces_existing_params() {
        let callback = Url::parse("https://mfa.example.org/push?realm=staff&serial=old").unwrap();
        let url = poll_url(&callback, "S1", "t", "sig");
        let serials: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "serial")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(serials, vec!["S1".to_string()]);
        assert!(url.query_pairs().any(|(k, v)| k == "realm" && v == "staff"));
    }

    #[test]
    fn test_parse_server_public_key() {
        let body = r#"{"detail": {"public_key": "-----BEGIN PUBLIC KEY-----\nMIIB\nCgKC\n-----END PUBLIC KEY-----\n"}}"#;
        let key = parse_server_public_key(body).unwrap();
        assert_eq!(key, "-----BEGIN PUBLIC KEY-----MIIBCgKC-----END PUBLIC KEY-----");
    }

    #[test]
    fn test_parse_server_public_key_errors() {
        assert!(parse_server_public_key("not json").is_err());
        assert!(parse_server_public_key(r#"{"detail": {}}"#).is_err());
        assert!(parse_server_public_key(r#"{"result": {"status": true}}"#).is_err());
        assert!(parse_server_public_key(r#"{"detail": {"public_key": "\n"}}"#).is_err());
    }

    #[test]
    fn test_parse_poll_body_shapes() {
        assert!(parse_poll_body("").unwrap().is_empty());
        assert!(parse_poll_body("{}").unwrap().is_empty());
        assert!(parse_poll_body(r#"{"result": {"status": true}}"#).unwrap().is_empty());
        let records = parse_poll_body(r#"{"result": {"value": [{"nonce": "a"}, {"nonce": "b"}]}}"#).unwrap();
        assert_eq!(records.len(), 2);
        assert!(parse_poll_body("<html>").is_err());
    }
}
