//! HTTP transport abstraction over the outbound provider call

use crate::error::{Result, ValuationError};
use crate::sourcing::types::{HttpMethod, HttpRequest, HttpResponse, ProviderQuota};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Sends one request and hands back whatever the provider answered.
/// Non-2xx statuses are returned as responses, not errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, source_id: &str, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Header pairs providers use to report their rate limit, most specific first
const QUOTA_HEADERS: [(&str, &str); 3] = [
    ("x-ratelimit-requests-limit", "x-ratelimit-requests-remaining"),
    ("x-ratelimit-limit", "x-ratelimit-remaining"),
    ("ratelimit-limit", "ratelimit-remaining"),
];

/// Extract `{limit, remaining}` from lower-cased response headers, if present
pub fn provider_quota(headers: &HashMap<String, String>) -> Option<ProviderQuota> {
    QUOTA_HEADERS.iter().find_map(|(limit_key, remaining_key)| {
        let limit = headers.get(*limit_key)?.trim().parse::<u64>().ok()?;
        let remaining = headers.get(*remaining_key)?.trim().parse::<u64>().ok()?;
        Some(ProviderQuota { limit, remaining })
    })
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ValuationError::Transport {
                source_id: "client".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, source_id: &str, request: &HttpRequest) -> Result<HttpResponse> {
        debug!("Calling {} at {}", source_id, request.url);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let transport_error = |e: reqwest::Error| ValuationError::Transport {
            source_id: source_id.to_string(),
            message: e.to_string(),
        };

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();

        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(transport_error)?.to_vec();
        debug!("{} answered HTTP {} ({} bytes)", source_id, status, body.len());

        Ok(HttpResponse {
            status,
            quota: provider_quota(&headers),
            headers,
            body,
        })
    }
}
