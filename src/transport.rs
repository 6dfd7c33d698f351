//! Raw HTTP access to the GitHub API.
//!
//! `Transport` is the seam between the metric logic and the network: it sends one request and
//! hands back the status, headers of interest and body without interpreting them. Status
//! handling, retries and schema validation live in [`crate::github::GitHubClient`].

use crate::error::{MetricsError, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Method, Request};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use octocrab::service::middleware::retry::RetryConfig;
use octocrab::Octocrab;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Username sent with basic auth. GitHub only looks at the password (the API key).
pub const BASIC_AUTH_USER: &str = "user";

/// A response as seen by the client layer.
#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Relations from the `Link` header, keyed by `rel`.
    pub links: HashMap<String, String>,
    /// Value of `x-ratelimit-remaining`.
    pub rate_limit_remaining: Option<u64>,
    /// Value of `retry-after`, in seconds.
    pub retry_after: Option<u64>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Self::default()
        }
    }

    fn from_parts(status: u16, headers: &HeaderMap, body: String) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        Self {
            status,
            body,
            links: header("link").map(parse_link_header).unwrap_or_default(),
            rate_limit_remaining: header("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            retry_after: header("retry-after").and_then(|v| v.parse().ok()),
        }
    }

    pub fn with_link(mut self, rel: &str, url: &str) -> Self {
        self.links.insert(rel.to_string(), url.to_string());
        self
    }

    pub fn next_link(&self) -> Option<&str> {
        self.links.get("next").map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 429, or a 403 carrying GitHub's rate-limit signals (primary or secondary limit).
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
            || (self.status == 403
                && (self.rate_limit_remaining == Some(0) || self.retry_after.is_some()))
    }
}

/// Sends single requests to the API. Implementations must not retry or interpret status codes.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpResponse>> + Send;

    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<HttpResponse>> + Send;
}

/// `Transport` backed by an Octocrab client.
///
/// Requests go through `build_request`/`execute` so that pagination links and status codes stay
/// visible to the caller. Octocrab only attaches its own credentials to relative URIs, and every
/// URL here is absolute (including server-supplied `next` links), so the `Authorization` header
/// is set on each request directly. Octocrab's retry layer is disabled; retrying belongs to
/// [`crate::github::GitHubClient`].
#[derive(Clone)]
pub struct OctocrabTransport {
    octocrab: Octocrab,
    authorization: Option<HeaderValue>,
}

impl OctocrabTransport {
    pub fn new(api_key: Option<&str>, base_url: &str, timeout: Duration) -> Result<Self> {
        let octocrab = Octocrab::builder()
            .base_uri(base_url)
            .map_err(|e| MetricsError::Config(format!("invalid API url {base_url}: {e}")))?
            .add_retry_config(RetryConfig::None)
            .set_connect_timeout(Some(timeout))
            .set_read_timeout(Some(timeout))
            .build()
            .map_err(|e| MetricsError::Config(format!("failed to build GitHub client: {e}")))?;

        Ok(Self {
            octocrab,
            authorization: api_key.map(basic_auth).transpose()?,
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse> {
        let mut builder = Request::builder().method(method).uri(url);
        if let Some(authorization) = &self.authorization {
            builder = builder.header(AUTHORIZATION, authorization.clone());
        }
        let request = self
            .octocrab
            .build_request(builder, body)
            .map_err(|e| transport_error(url, e))?;

        let response = self
            .octocrab
            .execute(request)
            .await
            .map_err(|e| transport_error(url, e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = self
            .octocrab
            .body_to_string(response)
            .await
            .map_err(|e| transport_error(url, e))?;

        Ok(HttpResponse::from_parts(status, &headers, body))
    }
}

impl Transport for OctocrabTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.send(Method::GET, url, None).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        self.send(Method::POST, url, Some(body)).await
    }
}

/// `Authorization` value for basic auth with the API key as password.
fn basic_auth(api_key: &str) -> Result<HeaderValue> {
    let credentials = BASE64_STANDARD.encode(format!("{BASIC_AUTH_USER}:{api_key}"));
    let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))
        .map_err(|e| MetricsError::Config(format!("API key is not a valid header value: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

fn transport_error(url: &str, source: octocrab::Error) -> MetricsError {
    MetricsError::Transport {
        url: url.to_string(),
        source: Box::new(source),
    }
}

/// Parses an RFC 8288 `Link` header into a map of relation to URL.
///
/// `<https://api.github.com/x?page=2>; rel="next", <https://api.github.com/x?page=5>; rel="last"`
pub fn parse_link_header(value: &str) -> HashMap<String, String> {
    let mut links = HashMap::new();

    for part in value.split(',') {
        let mut segments = part.split(';');
        let Some(url) = segments
            .next()
            .map(str::trim)
            .and_then(|s| s.strip_prefix('<'))
            .and_then(|s| s.strip_suffix('>'))
        else {
            continue;
        };

        for param in segments {
            let Some((key, rels)) = param.split_once('=') else {
                continue;
            };
            if key.trim() != "rel" {
                continue;
            }
            for rel in rels.trim().trim_matches('"').split_whitespace() {
                links.insert(rel.to_string(), url.to_string());
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::Router;
    use std::sync::{Arc, Mutex};

    type SeenAuthorization = Arc<Mutex<Vec<Option<String>>>>;

    /// Serves `status` for every request and records the `Authorization` header of each.
    async fn serve(status: StatusCode) -> (String, SeenAuthorization) {
        let seen = SeenAuthorization::default();
        let recorder = seen.clone();
        let app = Router::new().fallback(move |headers: HeaderMap| {
            let recorder = recorder.clone();
            async move {
                let authorization = headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                recorder.lock().unwrap().push(authorization);
                (status, "{}")
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), seen)
    }

    fn transport(api_key: Option<&str>, base: &str) -> OctocrabTransport {
        OctocrabTransport::new(api_key, base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_octocrab_transport_sends_basic_auth() {
        let (base, seen) = serve(StatusCode::OK).await;
        let transport = transport(Some("SECRET"), &base);

        let response = transport
            .get(&format!("{base}/repos/octo/demo/contributors"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let response = transport
            .post_json(&format!("{base}/graphql"), &serde_json::json!({"query": "{}"}))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        // base64("user:SECRET")
        let expected = Some("Basic dXNlcjpTRUNSRVQ=".to_string());
        assert_eq!(*seen.lock().unwrap(), vec![expected.clone(), expected]);
    }

    #[tokio::test]
    async fn test_octocrab_transport_without_key_is_anonymous() {
        let (base, seen) = serve(StatusCode::OK).await;

        transport(None, &base)
            .get(&format!("{base}/repos/octo/demo/issues"))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_octocrab_transport_sends_one_request_per_call() {
        let (base, seen) = serve(StatusCode::SERVICE_UNAVAILABLE).await;

        let response = transport(Some("SECRET"), &base)
            .get(&format!("{base}/repos/octo/demo/commits?page=0"))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_link_header_github_style() {
        let header = r#"<https://api.github.com/repositories/1/issues?state=all&page=2>; rel="next", <https://api.github.com/repositories/1/issues?state=all&page=9>; rel="last""#;
        let links = parse_link_header(header);

        assert_eq!(links.len(), 2);
        assert_eq!(
            links["next"],
            "https://api.github.com/repositories/1/issues?state=all&page=2"
        );
        assert_eq!(
            links["last"],
            "https://api.github.com/repositories/1/issues?state=all&page=9"
        );
    }

    #[test]
    fn test_parse_link_header_without_next() {
        let header = r#"<https://api.github.com/x?page=1>; rel="prev", <https://api.github.com/x?page=1>; rel="first""#;
        let links = parse_link_header(header);

        assert!(!links.contains_key("next"));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_parse_link_header_ignores_garbage() {
        assert!(parse_link_header("").is_empty());
        assert!(parse_link_header("not a link").is_empty());
        assert!(parse_link_header("<https://x>; title=\"a\"").is_empty());
    }

    #[test]
    fn test_parse_link_header_multiple_rels() {
        let links = parse_link_header(r#"<https://x/2>; rel="next last""#);
        assert_eq!(links["next"], "https://x/2");
        assert_eq!(links["last"], "https://x/2");
    }

    #[test]
    fn test_from_parts_reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("link", r#"<https://x/2>; rel="next""#.parse().unwrap());
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("retry-after", "7".parse().unwrap());

        let response = HttpResponse::from_parts(403, &headers, "{}".to_string());

        assert_eq!(response.next_link(), Some("https://x/2"));
        assert_eq!(response.rate_limit_remaining, Some(0));
        assert_eq!(response.retry_after, Some(7));
        assert!(response.is_rate_limited());
    }

    #[test]
    fn test_plain_forbidden_is_not_rate_limited() {
        let response = HttpResponse::new(403, "{}");
        assert!(!response.is_rate_limited());
        assert!(HttpResponse::new(429, "").is_rate_limited());
    }
}
