//! Minimal transport for OpenAI-compatible JSON endpoints.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAIClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POSTs `body` to `path` and decodes a successful response as `T`.
    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T> {
        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::generation(format!("failed to read response from {}: {}", url, e)))?;

        if !status.is_success() {
            return Err(http_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::generation(format!("malformed response from {}: {}", url, e)))
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> Error {
    if err.is_connect() {
        Error::generation(format!("cannot connect to {}: {}", url, err))
    } else if err.is_timeout() {
        Error::generation(format!("request to {} timed out", url))
    } else {
        Error::generation(err.to_string())
    }
}

/// Maps a non-success HTTP status and its body to a generation error,
/// preferring the structured `error.message` when the body carries one.
pub fn http_error(status: u16, body: &str) -> Error {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|r| r.error);

    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| body.trim().to_string());

    let kind = match status {
        401 | 403 => "authentication failed",
        404 => "model or endpoint not found",
        429 => "rate limited or quota exceeded",
        500..=599 => "server error",
        _ => "request rejected",
    };

    match detail.and_then(|d| d.kind) {
        Some(api_kind) => Error::generation(format!(
            "{} (HTTP {}, {}): {}",
            kind, status, api_kind, message
        )),
        None => Error::generation(format!("{} (HTTP {}): {}", kind, status, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let client = OpenAIClient::new("https://api.openai.com/v1/", "key");
        assert_eq!(
            client.endpoint("/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_http_error_uses_structured_message() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota"}}"#;
        let err = http_error(429, body);
        let text = err.to_string();
        assert!(matches!(err, Error::Generation(_)));
        assert!(text.contains("quota exceeded"));
        assert!(text.contains("You exceeded your current quota"));
        assert!(text.contains("insufficient_quota"));
    }

    #[test]
    fn test_http_error_falls_back_to_body() {
        let err = http_error(502, "Bad Gateway\n");
        assert_eq!(err.to_string(), "generation failed: server error (HTTP 502): Bad Gateway");
    }
}
