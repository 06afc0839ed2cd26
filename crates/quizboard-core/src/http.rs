// Request/response capability used for every non-streaming backend call.
//
// Everything above this layer talks to the backend through the `Fetch`
// trait, so tests substitute in-memory doubles and the real client stays a
// thin reqwest wrapper.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

pub use reqwest::Method;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("request to {path} failed: {message}")]
    Transport { path: String, message: String },

    #[error("{path} returned status {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error("failed to encode request body for {path}: {message}")]
    Encode { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Fetch capability
// ---------------------------------------------------------------------------

/// `fetch(method, path, body) -> JSON`. `path` is relative to the API root.
/// An empty response body is returned as `Value::Null`.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, HttpError>;
}

/// Deserialize a fetched JSON value into a typed response.
pub fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, HttpError> {
    serde_json::from_value(value).map_err(|e| HttpError::Decode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Serialize a typed request body.
pub fn encode<T: Serialize>(path: &str, body: &T) -> Result<Value, HttpError> {
    serde_json::to_value(body).map_err(|e| HttpError::Encode {
        path: path.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// HttpClient
// ---------------------------------------------------------------------------

/// reqwest-backed [`Fetch`] implementation.
///
/// The per-request timeout is applied to `fetch` only; requests built with
/// [`HttpClient::request`] carry no timeout so they can back long-lived
/// streams.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    api_root: String,
    access_token: Option<String>,
    timeout: std::time::Duration,
}

impl HttpClient {
    pub fn new(
        api_root: impl Into<String>,
        access_token: Option<String>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_root: api_root.into().trim_end_matches('/').to_string(),
            access_token,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.server.api_root(),
            config.credentials.access_token.clone(),
            config.server.request_timeout(),
        )
    }

    /// Absolute URL for an API-relative path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }

    /// Request builder with the bearer token attached, no timeout.
    pub fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl Fetch for HttpClient {
    async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, HttpError> {
        debug!(%method, path, "backend request");

        let mut request = self.request(method, path).timeout(self.timeout);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let transport = |e: reqwest::Error| HttpError::Transport {
            path: path.to_string(),
            message: e.to_string(),
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(HttpError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| HttpError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request text.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            request
        });
        (format!("http://{addr}/api/v1"), handle)
    }

    /// Read headers plus a `Content-Length` body.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_lowercase();
                        let value = lower.strip_prefix("content-length:")?.trim().parse::<usize>();
                        value.ok()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }

    #[tokio::test]
    async fn fetch_returns_json_and_sends_token() {
        let (root, server) = serve_once(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 27\r\n",
            "Connection: close\r\n",
            "\r\n",
            "[{\"user_id\":\"u\",\"score\":1}]",
        ))
        .await;

        let client = HttpClient::new(root, Some("tok".into()), Duration::from_secs(5));
        let value = client
            .fetch(Method::GET, "/leaderboards/q1", None)
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!([{"user_id": "u", "score": 1}]));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/v1/leaderboards/q1 "));
        assert!(request.to_lowercase().contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn empty_body_is_null() {
        let (root, server) = serve_once(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Length: 0\r\n",
            "Connection: close\r\n",
            "\r\n",
        ))
        .await;

        let client = HttpClient::new(root, None, Duration::from_secs(5));
        let value = client
            .fetch(
                Method::POST,
                "/leaderboards/q1/score",
                Some(serde_json::json!({"score": 2})),
            )
            .await
            .unwrap();
        assert_eq!(value, Value::Null);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/v1/leaderboards/q1/score "));
        assert!(request.contains("{\"score\":2}"));
        assert!(!request.to_lowercase().contains("authorization"));
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let (root, server) = serve_once(concat!(
            "HTTP/1.1 422 Unprocessable Entity\r\n",
            "Content-Length: 7\r\n",
            "Connection: close\r\n",
            "\r\n",
            "invalid",
        ))
        .await;

        let client = HttpClient::new(root, None, Duration::from_secs(5));
        let err = client
            .fetch(Method::PATCH, "/quiz-sessions/s/score", None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HttpError::Status {
                path: "/quiz-sessions/s/score".into(),
                status: 422,
                body: "invalid".into(),
            }
        );
        let _ = server.await;
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClient::new(format!("http://{addr}"), None, Duration::from_secs(2));
        let err = client.fetch(Method::GET, "/quizzes/x", None).await.unwrap_err();
        assert!(matches!(err, HttpError::Transport { .. }));
    }

    #[test]
    fn decode_maps_type_mismatch() {
        let err = decode::<Vec<u32>>("/p", serde_json::json!({"a": 1})).unwrap_err();
        assert!(matches!(err, HttpError::Decode { path, .. } if path == "/p"));
    }

    #[test]
    fn encode_reports_unserializable_body() {
        let mut body = std::collections::BTreeMap::new();
        body.insert(vec![1u8], 1u8);
        let err = encode("/p", &body).unwrap_err();
        assert!(matches!(err, HttpError::Encode { path, .. } if path == "/p"));
    }

    #[test]
    fn url_joins_root_and_path() {
        let client = HttpClient::new("http://h/api/v1/", None, Duration::from_secs(1));
        assert_eq!(client.url("/quizzes/1"), "http://h/api/v1/quizzes/1");
    }
}
