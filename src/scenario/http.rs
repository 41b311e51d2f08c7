//! HTTP steps executed with a shared `reqwest` client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::WorkItem;

use super::template::{self, Context};
use super::{PriorResults, Step, StepConfig, StepFailure};

const POOL_MAX_IDLE_PER_HOST: usize = 256;

/// Client plus base URL shared by every step of a run.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTarget {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a client with JSON content type, optional bearer auth and the
    /// configured timeout.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = build_client(
            config.auth_token.as_ref(),
            config.request_timeout,
            POOL_MAX_IDLE_PER_HOST,
        )?;
        Ok(Self::new(client, &config.base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn build_client(
    token: Option<&SecretString>,
    timeout: Duration,
    pool_size: usize,
) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| Error::Config("auth token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .pool_max_idle_per_host(pool_size)
        .build()?)
}

/// One templated HTTP call.
#[derive(Debug, Clone)]
pub struct HttpStep {
    name: String,
    method: Method,
    path: String,
    body: Option<Value>,
    expect: Vec<u16>,
    critical: bool,
    capture: Vec<String>,
    headers: HeaderMap,
    target: HttpTarget,
}

impl HttpStep {
    pub fn from_config(config: StepConfig, target: HttpTarget) -> Result<Self> {
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes()).map_err(|_| {
            Error::Scenario(format!("step {}: bad method {}", config.name, config.method))
        })?;

        Ok(Self {
            headers: parse_headers(&config.name, &config.headers)?,
            name: config.name,
            method,
            path: config.path,
            body: config.body,
            expect: config.expect,
            critical: config.critical,
            capture: config.capture,
            target,
        })
    }
}

fn parse_headers(step: &str, raw: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in raw {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Scenario(format!("step {step}: bad header name {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::Scenario(format!("step {step}: bad value for header {name}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Step for HttpStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        self.critical
    }

    async fn execute(
        &self,
        item: &WorkItem,
        prior: &PriorResults,
    ) -> std::result::Result<Value, StepFailure> {
        let ctx = Context::new(item, prior);
        let path = template::render_str(&self.path, &ctx)
            .map_err(|e| StepFailure::error(e.to_string()))?;
        let body = self
            .body
            .as_ref()
            .map(|b| template::render_value(b, &ctx))
            .transpose()
            .map_err(|e| StepFailure::error(e.to_string()))?;

        let mut request = self
            .target
            .client
            .request(self.method.clone(), self.target.url(&path))
            .headers(self.headers.clone());
        if let Some(ref body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StepFailure::error(format!("{} failed: {e}", self.name)))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StepFailure::status(status, format!("{} failed: {e}", self.name)))?;

        if !self.expect.contains(&status) {
            return Err(StepFailure::status(
                status,
                format!("{} failed: {status}", self.name),
            ));
        }

        // Non-JSON bodies are fine; they just can't be chained.
        Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn capture(&self, response: &Value) -> Option<Value> {
        self.capture
            .iter()
            .filter_map(|pointer| response.pointer(pointer))
            .find(|v| !v.is_null())
            .cloned()
    }
}
