//! HTTP driver for Slipstream scenarios, built on [reqwest].
//!
//! The driver resolves its base URL from the `BASE_URL` environment variable so the same
//! scenario binary can be pointed at local, staging or CI targets without a rebuild.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use slipstream_runner::prelude::{Outcome, ProtocolDriver};

const BASE_URL_ENV: &str = "BASE_URL";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Where the driver sends its traffic: `$BASE_URL`, or a local default.
pub fn base_url() -> String {
    std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

/// One HTTP request against the target, addressed by path relative to the base URL.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl HttpRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Attach a JSON body, setting the content-type and accept headers.
    pub fn json(mut self, body: &impl Serialize) -> anyhow::Result<Self> {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.body = Some(serde_json::to_vec(body).context("Failed to serialise body")?.into());
        Ok(self)
    }

    /// Attach a bearer token.
    pub fn bearer(mut self, token: &str) -> anyhow::Result<Self> {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("Token is not a valid header value")?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    #[cfg(test)]
    fn header(&self, name: reqwest::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// HTTP realization of [ProtocolDriver]. One driver is shared by all VUs of a run; reqwest
/// pools connections internally, which mirrors how real clients reuse keep-alive sockets.
#[derive(Clone, Debug)]
pub struct HttpDriver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDriver {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(base_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl ProtocolDriver for HttpDriver {
    type Request = HttpRequest;

    async fn invoke(&self, request: HttpRequest) -> anyhow::Result<Outcome> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // Read the full body so latency covers the complete exchange.
                let payload = response.bytes().await.unwrap_or_default();
                Ok(Outcome {
                    status,
                    latency: started.elapsed(),
                    payload,
                    error: None,
                })
            }
            Err(e) => Ok(Outcome {
                status: 0,
                latency: started.elapsed(),
                payload: Bytes::new(),
                error: Some(e.to_string()),
            }),
        }
    }
}

/// A unique throwaway account email for registration flows.
pub fn random_email() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("loadtest_{millis}_{suffix}@test.slipstream.dev")
}

/// A password that satisfies common complexity rules.
pub fn random_password() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("Test!{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_request_carries_content_headers() {
        let request = HttpRequest::post("/api/v1/auth/login")
            .json(&serde_json::json!({"email": "a@b.c", "password": "pw"}))
            .unwrap();

        assert_eq!(request.header(CONTENT_TYPE), Some("application/json"));
        assert_eq!(request.header(ACCEPT), Some("application/json"));
        let body = request.body.unwrap();
        assert!(std::str::from_utf8(&body).unwrap().contains("a@b.c"));
    }

    #[test]
    fn bearer_sets_authorization_header() {
        let request = HttpRequest::get("/api/v1/devices")
            .bearer("tok123")
            .unwrap();
        assert_eq!(request.header(AUTHORIZATION), Some("Bearer tok123"));
    }

    #[test]
    fn bearer_rejects_unprintable_tokens() {
        assert!(HttpRequest::get("/").bearer("bad\ntoken").is_err());
    }

    #[test]
    fn random_credentials_look_plausible() {
        let email = random_email();
        assert!(email.starts_with("loadtest_"));
        assert!(email.ends_with("@test.slipstream.dev"));
        assert_ne!(random_email(), random_email());

        let password = random_password();
        assert!(password.starts_with("Test!"));
        assert_eq!(password.len(), 17);
    }
}
