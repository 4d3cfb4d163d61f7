//! Single-shot REST binding: one POST to `/run`, no challenge step.

use crate::config::Config;
use crate::credentials::CredentialSet;
use crate::error::{Error, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::time::Duration;
use url::Url;

/// Connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pull a readable message out of an error body.
///
/// Handles `{"detail": "..."}`, `{"detail": [{"msg": "..."}, ...]}`,
/// `{"error": {"message": "..."}}`, `{"error": "..."}` and `{"message": "..."}`.
/// Anything else is returned as-is.
#[must_use]
pub fn format_error_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| extract_error_message(&json))
        .unwrap_or_else(|| body.trim().to_string())
}

fn extract_error_message(json: &serde_json::Value) -> Option<String> {
    if let Some(detail) = json.get("detail") {
        if let Some(msg) = detail.as_str() {
            return Some(msg.to_string());
        }
        // Validation errors: a list of {"loc": [...], "msg": "..."}
        if let Some(items) = detail.as_array() {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            if !msgs.is_empty() {
                return Some(msgs.join("; "));
            }
        }
    }

    if let Some(error) = json.get("error") {
        if let Some(msg) = error.get("message").and_then(|v| v.as_str()) {
            return Some(msg.to_string());
        }
        if let Some(msg) = error.as_str() {
            return Some(msg.to_string());
        }
    }

    json.get("message")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
}

/// HTTP client for the `/run` endpoint.
#[derive(Debug)]
pub struct RunClient {
    client: reqwest::Client,
    url: Url,
}

impl RunClient {
    pub fn new(url: Url, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, url }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.run_url()?, config.request_timeout()))
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    /// POST the credential set and return whatever JSON comes back.
    pub async fn run(&self, params: &CredentialSet) -> Result<serde_json::Value> {
        params.validate()?;
        tracing::debug!(url = %self.url, "Submitting run");

        let response = self
            .client
            .post(self.url.clone())
            .headers(Self::build_headers())
            .json(params)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(Error::Rejected(format!(
                "HTTP {status}: {}",
                format_error_body(&text)
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("Failed to parse response: {e}\nBody: {text}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread::JoinHandle;

    #[derive(Debug)]
    struct Captured {
        method: String,
        path: String,
        accept: Option<String>,
        content_type: Option<String>,
        body: String,
    }

    /// Serve exactly one request with the given status and body.
    fn serve_once(status: u16, body: &'static str) -> (Url, JoinHandle<Captured>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();

        let handle = std::thread::spawn(move || {
            let mut request = server.recv().unwrap();
            let mut received = String::new();
            request.as_reader().read_to_string(&mut received).unwrap();

            let header = |name: &str| {
                request
                    .headers()
                    .iter()
                    .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
                    .map(|h| h.value.as_str().to_string())
            };
            let captured = Captured {
                method: request.method().to_string(),
                path: request.url().to_string(),
                accept: header("Accept"),
                content_type: header("Content-Type"),
                body: received,
            };

            request
                .respond(tiny_http::Response::from_string(body).with_status_code(status))
                .unwrap();
            captured
        });

        let url = Url::parse(&format!("http://127.0.0.1:{port}/run")).unwrap();
        (url, handle)
    }

    fn sample() -> CredentialSet {
        CredentialSet::new("a@b.com", "p", "engineer", "remote").unwrap()
    }

    #[tokio::test]
    async fn test_posts_credentials_as_json() {
        let (url, server) = serve_once(200, r#"{"status":"queued"}"#);
        let client = RunClient::new(url, Duration::from_secs(5));

        let response = client.run(&sample()).await.unwrap();
        assert_eq!(response, serde_json::json!({"status": "queued"}));

        let captured = server.join().unwrap();
        assert_eq!(captured.method, "POST");
        assert_eq!(captured.path, "/run");
        assert_eq!(captured.accept.as_deref(), Some("application/json"));
        assert_eq!(captured.content_type.as_deref(), Some("application/json"));
        let body: CredentialSet = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(body, sample());
    }

    #[tokio::test]
    async fn test_any_json_value_is_accepted() {
        let (url, server) = serve_once(200, "null");
        let client = RunClient::new(url, Duration::from_secs(5));
        assert_eq!(client.run(&sample()).await.unwrap(), serde_json::Value::Null);
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_unparseable_response() {
        let (url, server) = serve_once(200, "<html>ok</html>");
        let client = RunClient::new(url, Duration::from_secs(5));
        assert!(matches!(
            client.run(&sample()).await,
            Err(Error::Protocol(_))
        ));
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_rejection() {
        let (url, server) = serve_once(
            422,
            r#"{"detail":[{"loc":["body","where"],"msg":"field required"}]}"#,
        );
        let client = RunClient::new(url, Duration::from_secs(5));
        match client.run(&sample()).await {
            Err(Error::Rejected(message)) => {
                assert!(message.starts_with("HTTP 422"));
                assert!(message.ends_with("field required"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[tokio::test]
    async fn test_blank_field_not_sent() {
        let client = RunClient::new(
            Url::parse("http://127.0.0.1:1/run").unwrap(),
            Duration::from_secs(1),
        );
        let mut params = sample();
        params.what.clear();
        assert!(matches!(
            client.run(&params).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_format_detail_string() {
        assert_eq!(format_error_body(r#"{"detail":"Not Found"}"#), "Not Found");
    }

    #[test]
    fn test_format_nested_error() {
        assert_eq!(
            format_error_body(r#"{"error":{"message":"webdriver crashed"}}"#),
            "webdriver crashed"
        );
        assert_eq!(format_error_body(r#"{"error":"busy"}"#), "busy");
        assert_eq!(format_error_body(r#"{"message":"try later"}"#), "try later");
    }

    #[test]
    fn test_format_plain_text() {
        assert_eq!(format_error_body("Internal Server Error\n"), "Internal Server Error");
        assert_eq!(format_error_body(r#"{"other":1}"#), r#"{"other":1}"#);
    }
}
