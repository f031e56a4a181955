//! Quota ledger - per-source usage counters, block thresholds and call order
//!
//! Counters live in the shared key/value store under
//! `quota:{source}:{period}:{field}`, so they roll over on their own when the
//! period key changes. A source that crosses its threshold gets a `blocked`
//! marker for the rest of the period, which keeps the decision monotonic even
//! if a provider later reports a lower figure.

use crate::error::{Result, ValuationError};
use crate::sourcing::store::KeyValueStore;
use crate::sourcing::types::{Feed, ProviderQuota, SourceConfig, SourceStatus, UsageRecord};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Ordered sources to try for one request
#[derive(Debug, Clone, PartialEq)]
pub struct CallOrder {
    pub candidates: Vec<SourceConfig>,
    /// Sources skipped because they are over threshold
    pub blocked: Vec<String>,
}

pub struct QuotaLedger {
    store: Arc<dyn KeyValueStore>,
    sources: Vec<SourceConfig>,
    threshold_percent: f64,
    /// `{source}:{period}` pairs already warned about
    warned: Mutex<HashSet<String>>,
}

fn quota_key(source: &str, period_key: &str, field: &str) -> String {
    format!("quota:{}:{}:{}", source, period_key, field)
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, sources: Vec<SourceConfig>, threshold_percent: f64) -> Self {
        Self {
            store,
            sources,
            threshold_percent,
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    fn source(&self, id: &str) -> Result<&SourceConfig> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ValuationError::input("source", format!("unknown source '{}'", id)))
    }

    fn threshold_for(&self, source: &SourceConfig) -> f64 {
        source.threshold_percent.unwrap_or(self.threshold_percent)
    }

    /// Current usage for the period containing `now`
    pub async fn usage_at(&self, source_id: &str, now: DateTime<Utc>) -> Result<UsageRecord> {
        let source = self.source(source_id)?;
        let period_key = source.period.key(now);

        let used = self
            .store
            .get(&quota_key(&source.id, &period_key, "used"))
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            .max(0) as u64;

        let reported_limit = self
            .store
            .get(&quota_key(&source.id, &period_key, "limit"))
            .await?
            .and_then(|v| v.parse::<u64>().ok());

        let timestamp = self
            .store
            .get(&quota_key(&source.id, &period_key, "updated"))
            .await?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now);

        let limit = reported_limit.unwrap_or(source.limit);
        let percentage = if limit == 0 {
            100.0
        } else {
            used as f64 * 100.0 / limit as f64
        };

        Ok(UsageRecord {
            source: source.id.clone(),
            period_key,
            limit,
            used,
            remaining: limit.saturating_sub(used),
            percentage,
            timestamp,
            reported: reported_limit.is_some(),
        })
    }

    /// Usage plus the availability decision. Crossing the threshold pins the
    /// source as blocked until the period rolls over or it is reset.
    pub async fn status_at(&self, source_id: &str, now: DateTime<Utc>) -> Result<SourceStatus> {
        let source = self.source(source_id)?;
        let usage = self.usage_at(source_id, now).await?;
        let blocked_key = quota_key(&source.id, &usage.period_key, "blocked");

        let marked = self.store.get(&blocked_key).await?.is_some();
        let over_threshold = usage.percentage >= self.threshold_for(source);

        if over_threshold && !marked {
            self.store
                .set(&blocked_key, "1", Some(source.period.retention()))
                .await?;
        }

        let blocked = marked || over_threshold;
        if blocked && self.note_blocked(&source.id, &usage.period_key) {
            warn!(
                "{} blocked for {}: {}/{} calls ({:.1}%, threshold {:.0}%)",
                source.id,
                usage.period_key,
                usage.used,
                usage.limit,
                usage.percentage,
                self.threshold_for(source)
            );
        }

        Ok(SourceStatus {
            source: source.id.clone(),
            available: !blocked,
            usage,
        })
    }

    /// Returns true the first time a source is seen blocked in a period
    fn note_blocked(&self, source_id: &str, period_key: &str) -> bool {
        let mut warned = self.warned.lock().unwrap_or_else(|e| e.into_inner());
        warned.insert(format!("{}:{}", source_id, period_key))
    }

    /// Record one call. Provider-reported figures replace the local count;
    /// otherwise the local counter is incremented.
    pub async fn record_call_at(
        &self,
        source_id: &str,
        reported: Option<ProviderQuota>,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord> {
        let source = self.source(source_id)?;
        let period_key = source.period.key(now);
        let retention = Some(source.period.retention());

        match reported {
            Some(quota) => {
                let used = quota.limit.saturating_sub(quota.remaining);
                self.store
                    .set(&quota_key(&source.id, &period_key, "used"), &used.to_string(), retention)
                    .await?;
                self.store
                    .set(
                        &quota_key(&source.id, &period_key, "limit"),
                        &quota.limit.to_string(),
                        retention,
                    )
                    .await?;
            }
            None => {
                self.store
                    .increment(&quota_key(&source.id, &period_key, "used"), 1, retention)
                    .await?;
            }
        }

        self.store
            .set(
                &quota_key(&source.id, &period_key, "updated"),
                &now.to_rfc3339(),
                retention,
            )
            .await?;

        let status = self.status_at(source_id, now).await?;
        debug!(
            "{} usage {}/{} ({:.1}%)",
            source.id, status.usage.used, status.usage.limit, status.usage.percentage
        );
        Ok(status.usage)
    }

    /// Sources for `feed` to try in order: the preferred one first, then the
    /// rest in default priority, minus anything blocked. "auto" or an unknown
    /// preference yields the default order.
    pub async fn call_order_at(
        &self,
        feed: Feed,
        preferred: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CallOrder> {
        let serving: Vec<&SourceConfig> = self.sources.iter().filter(|s| s.feed == feed).collect();

        let preferred = preferred
            .filter(|p| !p.eq_ignore_ascii_case("auto"))
            .and_then(|p| serving.iter().position(|s| s.id == p));

        let mut ordered = serving.clone();
        if let Some(idx) = preferred {
            let first = ordered.remove(idx);
            ordered.insert(0, first);
        }

        let mut candidates = Vec::new();
        let mut blocked = Vec::new();
        for source in ordered {
            if self.status_at(&source.id, now).await?.available {
                candidates.push(source.clone());
            } else {
                blocked.push(source.id.clone());
            }
        }

        Ok(CallOrder { candidates, blocked })
    }

    /// Clear a source's counters for the current period
    pub async fn reset_at(&self, source_id: &str, now: DateTime<Utc>) -> Result<()> {
        let source = self.source(source_id)?;
        let period_key = source.period.key(now);

        for field in ["used", "limit", "updated", "blocked"] {
            self.store.delete(&quota_key(&source.id, &period_key, field)).await?;
        }

        self.warned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&format!("{}:{}", source.id, period_key));

        info!("Reset quota for {} ({})", source.id, period_key);
        Ok(())
    }

    /// Status of every configured source, in priority order
    pub async fn report_at(&self, now: DateTime<Utc>) -> Result<Vec<SourceStatus>> {
        let mut report = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            report.push(self.status_at(&source.id, now).await?);
        }
        Ok(report)
    }

    pub async fn usage(&self, source_id: &str) -> Result<UsageRecord> {
        self.usage_at(source_id, Utc::now()).await
    }

    pub async fn status(&self, source_id: &str) -> Result<SourceStatus> {
        self.status_at(source_id, Utc::now()).await
    }

    pub async fn record_call(&self, source_id: &str, reported: Option<ProviderQuota>) -> Result<UsageRecord> {
        self.record_call_at(source_id, reported, Utc::now()).await
    }

    pub async fn call_order(&self, feed: Feed, preferred: Option<&str>) -> Result<CallOrder> {
        self.call_order_at(feed, preferred, Utc::now()).await
    }

    pub async fn reset(&self, source_id: &str) -> Result<()> {
        self.reset_at(source_id, Utc::now()).await
    }

    pub async fn report(&self) -> Result<Vec<SourceStatus>> {
        self.report_at(Utc::now()).await
    }
}
