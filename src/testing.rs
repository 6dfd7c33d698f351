//! In-memory transport for unit tests.

use crate::config::AppConfig;
use crate::error::Result;
use crate::github::GitHubClient;
use crate::transport::{HttpResponse, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const BASE: &str = "https://api.test";

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// Replays canned responses per URL (in order) and records every request it sees.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, url: &str, response: HttpResponse) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn on_json(self, url: &str, body: serde_json::Value) -> Self {
        self.on(url, HttpResponse::new(200, body.to_string()))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&self, method: &'static str, url: &str, body: Option<&serde_json::Value>) -> HttpResponse {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });
        self.responses
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no scripted response left for {method} {url}"))
    }
}

impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        Ok(self.respond("GET", url, None))
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        Ok(self.respond("POST", url, Some(body)))
    }
}

/// Configuration pointing at [`BASE`] with instant retries.
pub fn test_config() -> AppConfig {
    AppConfig {
        github_api_url: BASE.to_string(),
        retry_base_delay_ms: 0,
        ..AppConfig::default()
    }
}

pub fn test_client(transport: ScriptedTransport) -> GitHubClient<ScriptedTransport> {
    GitHubClient::new(transport, &test_config())
}
