//! Source orchestrator - cache first, then quota-ordered fallback across
//! providers, recording usage for every response received

use crate::error::{Result, ValuationError};
use crate::sourcing::cache::{freshness, should_refresh, CacheKey, CacheStore};
use crate::sourcing::parse::{parse_comps, parse_estimate, parse_location_signals};
use crate::sourcing::quota::QuotaLedger;
use crate::sourcing::retry::{retry_with_backoff, RetryPolicy};
use crate::sourcing::transport::HttpTransport;
use crate::sourcing::types::{
    DataClass, Feed, Freshness, HttpRequest, HttpResponse, SourceConfig, Sourced,
};
use crate::valuation::comps::retain_zip;
use crate::valuation::types::{ComparableSale, CompSource, LocationSignals, PropertyDescriptor};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SourceOrchestrator {
    transport: Arc<dyn HttpTransport>,
    ledger: Arc<QuotaLedger>,
    cache: Arc<CacheStore>,
    retry: RetryPolicy,
}

/// Plain GET carrying the subject's address as query parameters
pub fn default_request(source: &SourceConfig, property: &PropertyDescriptor) -> HttpRequest {
    let mut request = HttpRequest::get(source.url.clone());
    request.query = vec![
        ("address".to_string(), property.address.clone()),
        ("city".to_string(), property.city.clone()),
        ("state".to_string(), property.state.clone()),
        ("zip".to_string(), property.zip.clone()),
    ];
    request.headers = source.headers.clone();
    request
}

impl SourceOrchestrator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        ledger: Arc<QuotaLedger>,
        cache: Arc<CacheStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            ledger,
            cache,
            retry,
        }
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// Serve `key` from cache unless it is expired or `force_refresh` is set,
    /// otherwise walk the call order until one source answers with a payload
    /// `parse` accepts. Only accepted payloads are cached.
    pub async fn fetch<T, B, P>(
        &self,
        feed: Feed,
        key: &CacheKey,
        preferred: Option<&str>,
        force_refresh: bool,
        build: B,
        parse: P,
    ) -> Result<Sourced<T>>
    where
        B: Fn(&SourceConfig) -> HttpRequest + Send + Sync,
        P: Fn(&Value, &str) -> Result<T> + Send + Sync,
    {
        let class = feed.data_class();
        if let Some(hit) = self.cached(key, class, force_refresh, &parse).await? {
            return Ok(hit);
        }

        let order = self.ledger.call_order(feed, preferred).await?;
        self.walk(key, class, &order.candidates, order.blocked, &build, &parse)
            .await
    }

    /// A cached entry that no longer parses counts as a miss
    async fn cached<T, P>(
        &self,
        key: &CacheKey,
        class: DataClass,
        force_refresh: bool,
        parse: &P,
    ) -> Result<Option<Sourced<T>>>
    where
        P: Fn(&Value, &str) -> Result<T> + Send + Sync,
    {
        if force_refresh {
            return Ok(None);
        }

        let now = Utc::now();
        let ttl = self.cache.ttl(class);
        let entry = match self.cache.get::<Value>(key).await? {
            Some(entry) if !should_refresh(Some(&entry), false, ttl, now) => entry,
            _ => return Ok(None),
        };

        let data = match parse(&entry.data, &entry.source) {
            Ok(data) => data,
            Err(e) => {
                warn!("Ignoring cached {} from {}: {}", key, entry.source, e);
                return Ok(None);
            }
        };

        let freshness = freshness(&entry, ttl, now);
        debug!("Serving {} from cache ({:?}, {})", key, freshness, entry.source);
        Ok(Some(Sourced {
            data,
            source: entry.source,
            from_cache: true,
            freshness,
            fetched_at: entry.timestamp,
        }))
    }

    /// Try each candidate in turn and cache the first payload that parses
    async fn walk<T, B, P>(
        &self,
        key: &CacheKey,
        class: DataClass,
        candidates: &[SourceConfig],
        mut blocked: Vec<String>,
        build: &B,
        parse: &P,
    ) -> Result<Sourced<T>>
    where
        B: Fn(&SourceConfig) -> HttpRequest + Send + Sync,
        P: Fn(&Value, &str) -> Result<T> + Send + Sync,
    {
        let mut failed = Vec::new();

        for source in candidates {
            let outcome = self
                .call_source(source, build)
                .await
                .and_then(|raw| parse(&raw, &source.id).map(|data| (raw, data)));

            match outcome {
                Ok((raw, data)) => {
                    let entry = self.cache.set(key, raw, &source.id, class).await?;
                    info!("Fetched {} from {}", key, source.id);
                    return Ok(Sourced {
                        data,
                        source: entry.source,
                        from_cache: false,
                        freshness: Freshness::Fresh,
                        fetched_at: entry.timestamp,
                    });
                }
                Err(e @ ValuationError::Store(_)) => return Err(e),
                Err(ValuationError::SourceUnavailable { .. }) => {
                    warn!("Source {} hit its quota mid-retry, trying next", source.id);
                    blocked.push(source.id.clone());
                }
                Err(e) => {
                    warn!("Source {} failed, trying next: {}", source.id, e);
                    failed.push(source.id.clone());
                }
            }
        }

        warn!(
            "No source available for {} (blocked: {:?}, failed: {:?})",
            key, blocked, failed
        );
        Err(ValuationError::SourceUnavailable { blocked, failed })
    }

    /// One source, with retries. Usage is recorded for every response,
    /// successful or not, and a retry never goes out once the source is blocked.
    async fn call_source<B>(&self, source: &SourceConfig, build: &B) -> Result<Value>
    where
        B: Fn(&SourceConfig) -> HttpRequest + Send + Sync,
    {
        let transport = &self.transport;
        let ledger = &self.ledger;

        let response: HttpResponse = retry_with_backoff(&self.retry, &source.id, |attempt| {
            let request = build(source);
            async move {
                if attempt > 1 && !ledger.status(&source.id).await?.available {
                    return Err(ValuationError::SourceUnavailable {
                        blocked: vec![source.id.clone()],
                        failed: Vec::new(),
                    });
                }

                debug!("Calling {} (attempt {})", source.id, attempt);
                let response = transport.send(&source.id, &request).await?;
                ledger.record_call(&source.id, response.quota).await?;

                if response.is_success() {
                    Ok(response)
                } else {
                    Err(ValuationError::Http {
                        source_id: source.id.clone(),
                        status: response.status,
                    })
                }
            }
        })
        .await?;

        serde_json::from_slice(&response.body)
            .map_err(|e| ValuationError::Parse(format!("{} sent invalid JSON: {}", source.id, e)))
    }

    fn comp_tier(&self, source_id: &str) -> CompSource {
        self.ledger
            .sources()
            .iter()
            .find(|s| s.id == source_id)
            .map(|s| s.comp_tier)
            .unwrap_or_default()
    }

    /// Comparable sales for the subject. Cached comps outside the subject's
    /// zip are dropped.
    pub async fn fetch_comps(
        &self,
        property: &PropertyDescriptor,
        preferred: Option<&str>,
        force_refresh: bool,
    ) -> Result<Sourced<Vec<ComparableSale>>> {
        let key = CacheKey::property(Feed::Comps.namespace(), property);
        let mut sourced = self
            .fetch(
                Feed::Comps,
                &key,
                preferred,
                force_refresh,
                |source| default_request(source, property),
                |data, source_id| parse_comps(data, self.comp_tier(source_id)),
            )
            .await?;

        if sourced.from_cache {
            let before = sourced.data.len();
            sourced.data = retain_zip(sourced.data, &property.zip);
            if sourced.data.len() < before {
                warn!(
                    "Dropped {} cached comps outside zip {}",
                    before - sourced.data.len(),
                    property.zip
                );
            }
        }

        Ok(sourced)
    }

    /// One estimate per available estimate source, each cached separately.
    /// Estimates are blended rather than substituted, so there is no fallback
    /// between these sources and failures are skipped.
    pub async fn fetch_estimates(
        &self,
        property: &PropertyDescriptor,
        force_refresh: bool,
    ) -> Result<Vec<(String, f64)>> {
        let class = Feed::Estimate.data_class();
        let order = self.ledger.call_order(Feed::Estimate, None).await?;
        let build = |s: &SourceConfig| default_request(s, property);
        let parse = |data: &Value, source_id: &str| parse_estimate(data, source_id, 0.0);
        let mut estimates = Vec::new();

        for source in &order.candidates {
            let namespace = format!("{}:{}", Feed::Estimate.namespace(), source.id);
            let key = CacheKey::property(&namespace, property);

            let sourced = match self.cached(&key, class, force_refresh, &parse).await? {
                Some(hit) => Ok(hit),
                None => {
                    self.walk(&key, class, std::slice::from_ref(source), Vec::new(), &build, &parse)
                        .await
                }
            };

            match sourced {
                Ok(s) => estimates.push((s.data.source, s.data.value)),
                Err(e @ ValuationError::Store(_)) => return Err(e),
                Err(e) => warn!("Skipping estimate from {}: {}", source.id, e),
            }
        }

        Ok(estimates)
    }

    /// Location signals, cached per zip
    pub async fn fetch_location(
        &self,
        property: &PropertyDescriptor,
        preferred: Option<&str>,
        force_refresh: bool,
    ) -> Result<Sourced<LocationSignals>> {
        let key = CacheKey::zip(Feed::Location.namespace(), &property.zip);
        self.fetch(
            Feed::Location,
            &key,
            preferred,
            force_refresh,
            |source| default_request(source, property),
            |data, _| parse_location_signals(data),
        )
        .await
    }
}
