//! Configuration - immutable settings passed explicitly into each component

use crate::sourcing::types::{DataClass, SourceConfig};
use anyhow::{Context, Result};
use chrono::Duration;
use std::env;

/// Every tunable the pipeline reads, with documented defaults
#[derive(Debug, Clone)]
pub struct Settings {
    pub quota: QuotaSettings,
    pub cache: CacheSettings,
    pub comps: CompsSettings,
    pub valuation: ValuationSettings,
    pub retry: RetrySettings,
    /// External sources in default priority order
    pub sources: Vec<SourceConfig>,
    pub http_timeout: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct QuotaSettings {
    /// Usage percentage at which a source is blocked (default 90)
    pub threshold_percent: f64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Comps and point estimates (default 7 days)
    pub property_ttl: Duration,
    /// Schools, walk score, noise (default 30 days)
    pub location_ttl: Duration,
    /// Market rates (default 1 day)
    pub market_ttl: Duration,
}

impl CacheSettings {
    pub fn ttl_for(&self, class: DataClass) -> Duration {
        match class {
            DataClass::Property => self.property_ttl,
            DataClass::Location => self.location_ttl,
            DataClass::Market => self.market_ttl,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompsSettings {
    pub lookback_months: u32,
    /// Relative square-footage tolerance (0.20 = ±20%)
    pub sqft_tolerance: f64,
    pub beds_tolerance: f64,
    pub baths_tolerance: f64,
    /// Below this many similar comps, fall back to the recency-filtered set
    pub min_similar: usize,
}

#[derive(Debug, Clone)]
pub struct ValuationSettings {
    pub renovation_premium_cap: f64,
    /// Applied when only unremodeled comps exist
    pub unremodeled_premium: f64,
    /// Applied to the all-comps fallback tier
    pub fallback_premium: f64,
    /// Default blend weight of the comps-derived figure
    pub comps_weight: f64,
    /// Default blend weights for the first, second, ... external estimates
    pub estimate_weights: Vec<f64>,
    /// Historical deviation flag threshold, in percent
    pub deviation_threshold_percent: f64,
    pub default_appreciation_rate: f64,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: std::time::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            quota: QuotaSettings {
                threshold_percent: 90.0,
            },
            cache: CacheSettings {
                property_ttl: Duration::days(7),
                location_ttl: Duration::days(30),
                market_ttl: Duration::days(1),
            },
            comps: CompsSettings {
                lookback_months: 24,
                sqft_tolerance: 0.20,
                beds_tolerance: 1.0,
                baths_tolerance: 1.0,
                min_similar: 3,
            },
            valuation: ValuationSettings {
                renovation_premium_cap: 0.25,
                unremodeled_premium: 0.25,
                fallback_premium: 0.20,
                comps_weight: 0.50,
                estimate_weights: vec![0.25, 0.25],
                deviation_threshold_percent: 15.0,
                default_appreciation_rate: 0.04,
            },
            retry: RetrySettings {
                max_attempts: 3,
                base_delay: std::time::Duration::from_secs(1),
            },
            sources: Vec::new(),
            http_timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl Settings {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(v) = env_parse::<f64>("QUOTA_THRESHOLD_PERCENT")? {
            settings.quota.threshold_percent = v;
        }
        if let Some(v) = env_parse::<u32>("COMPS_LOOKBACK_MONTHS")? {
            settings.comps.lookback_months = v;
        }
        if let Some(v) = env_parse::<f64>("RENOVATION_PREMIUM_CAP")? {
            settings.valuation.renovation_premium_cap = v;
        }
        if let Some(v) = env_parse::<f64>("HISTORICAL_DEVIATION_PERCENT")? {
            settings.valuation.deviation_threshold_percent = v;
        }
        if let Some(v) = env_parse::<u32>("RETRY_MAX_ATTEMPTS")? {
            settings.retry.max_attempts = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("RETRY_BASE_DELAY_MS")? {
            settings.retry.base_delay = std::time::Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("HTTP_TIMEOUT_SECS")? {
            settings.http_timeout = std::time::Duration::from_secs(v);
        }
        if let Ok(raw) = env::var("VALUATION_SOURCES") {
            settings.sources = serde_json::from_str(&raw)
                .context("VALUATION_SOURCES must be a JSON array of source configs")?;
        }

        Ok(settings)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} must be a valid number", key)),
        Err(_) => Ok(None),
    }
}
