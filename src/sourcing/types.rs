//! Data types shared by the cache, quota ledger and orchestrator

use crate::valuation::types::CompSource;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cache TTL class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    Property, // comps, point estimates
    Location, // schools, walk score, noise
    Market,   // market rates
}

/// What kind of payload a source serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    #[default]
    Comps,
    Estimate,
    Location,
    Market,
}

impl Feed {
    pub fn data_class(&self) -> DataClass {
        match self {
            Feed::Comps | Feed::Estimate => DataClass::Property,
            Feed::Location => DataClass::Location,
            Feed::Market => DataClass::Market,
        }
    }

    /// Cache key namespace
    pub fn namespace(&self) -> &'static str {
        match self {
            Feed::Comps => "comps",
            Feed::Estimate => "estimate",
            Feed::Location => "location",
            Feed::Market => "market",
        }
    }
}

/// Quota tracking period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    #[default]
    Monthly,
    Daily,
}

impl Period {
    /// Counter key for the period containing `now`, e.g. "2025-11" or "2025-11-03"
    pub fn key(&self, now: DateTime<Utc>) -> String {
        match self {
            Period::Monthly => now.format("%Y-%m").to_string(),
            Period::Daily => now.format("%Y-%m-%d").to_string(),
        }
    }

    /// How long a period's counters are kept around
    pub fn retention(&self) -> Duration {
        match self {
            Period::Monthly => Duration::days(32),
            Period::Daily => Duration::days(2),
        }
    }
}

/// One external data source, listed in default priority order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub feed: Feed,
    /// Calls allowed per period
    pub limit: u64,
    #[serde(default)]
    pub period: Period,
    /// Overrides the global block threshold
    #[serde(default)]
    pub threshold_percent: Option<f64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Tier assigned to comps that don't carry their own source tag
    #[serde(default)]
    pub comp_tier: CompSource,
}

/// Limit/remaining as reported by a provider alongside a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderQuota {
    pub limit: u64,
    pub remaining: u64,
}

/// Usage of one source in one period, whether counted locally or reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub source: String,
    pub period_key: String,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub percentage: f64,
    pub timestamp: DateTime<Utc>,
    /// True when the figures came from provider headers
    pub reported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source: String,
    pub available: bool,
    pub usage: UsageRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Overrides the transport default
    pub timeout: Option<std::time::Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
    pub quota: Option<ProviderQuota>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Snapshot stored on successful fetch; superseded, never edited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub data_class: DataClass,
}

/// Payload handed back by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub data: T,
    pub source: String,
    pub from_cache: bool,
    pub freshness: Freshness,
    pub fetched_at: DateTime<Utc>,
}
