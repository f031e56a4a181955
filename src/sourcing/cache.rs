//! TTL cache over a key/value store, with per-class durations and
//! freshness classification

use crate::config::CacheSettings;
use crate::error::Result;
use crate::sourcing::store::KeyValueStore;
use crate::sourcing::types::{CacheEntry, DataClass, Freshness};
use crate::valuation::types::PropertyDescriptor;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Deterministic cache key built from normalized address parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

fn normalize(part: &str) -> String {
    part.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl CacheKey {
    /// Full-address key, for property-specific data
    pub fn property(namespace: &str, property: &PropertyDescriptor) -> Self {
        CacheKey(format!(
            "cache:{}:{}|{}|{}|{}",
            namespace,
            normalize(&property.address),
            normalize(&property.city),
            normalize(&property.state),
            normalize(&property.zip)
        ))
    }

    pub fn zip(namespace: &str, zip: &str) -> Self {
        CacheKey(format!("cache:{}:zip:{}", namespace, normalize(zip)))
    }

    pub fn city(namespace: &str, city: &str, state: &str) -> Self {
        CacheKey(format!(
            "cache:{}:city:{}|{}",
            namespace,
            normalize(city),
            normalize(state)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn age<T>(entry: &CacheEntry<T>, now: DateTime<Utc>) -> Duration {
    (now - entry.timestamp).max(Duration::zero())
}

/// Entry is usable while `age <= ttl`
pub fn is_valid<T>(entry: &CacheEntry<T>, ttl: Duration, now: DateTime<Utc>) -> bool {
    age(entry, now) <= ttl
}

/// Fresh up to half the TTL, stale until the TTL, expired after
pub fn freshness<T>(entry: &CacheEntry<T>, ttl: Duration, now: DateTime<Utc>) -> Freshness {
    let age = age(entry, now);
    if age > ttl {
        Freshness::Expired
    } else if age > ttl / 2 {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// Refresh when forced or expired. Stale entries are still served.
pub fn should_refresh<T>(
    entry: Option<&CacheEntry<T>>,
    force_refresh: bool,
    ttl: Duration,
    now: DateTime<Utc>,
) -> bool {
    if force_refresh {
        return true;
    }
    match entry {
        Some(entry) => freshness(entry, ttl, now) == Freshness::Expired,
        None => true,
    }
}

pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    settings: CacheSettings,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: CacheSettings) -> Self {
        Self { store, settings }
    }

    pub fn ttl(&self, class: DataClass) -> Duration {
        self.settings.ttl_for(class)
    }

    /// Read an entry regardless of age. Unreadable entries count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<CacheEntry<T>>> {
        let Some(raw) = self.store.get(key.as_str()).await? else {
            debug!("Cache miss: {}", key);
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Store a new snapshot, superseding any previous one
    pub async fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        data: T,
        source: &str,
        class: DataClass,
    ) -> Result<CacheEntry<T>> {
        let entry = CacheEntry {
            data,
            timestamp: Utc::now(),
            source: source.to_string(),
            data_class: class,
        };

        // Keep expired entries readable for a while so they classify as
        // expired rather than vanishing as misses
        let retention = self.ttl(class) * 2;
        let raw = serde_json::to_string(&entry)?;
        self.store.set(key.as_str(), &raw, Some(retention)).await?;

        debug!("Cached {} from {}", key, source);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::sourcing::store::MemoryStore;

    fn entry_aged(age: Duration, now: DateTime<Utc>) -> CacheEntry<u32> {
        CacheEntry {
            data: 1,
            timestamp: now - age,
            source: "test".to_string(),
            data_class: DataClass::Property,
        }
    }

    fn property() -> PropertyDescriptor {
        PropertyDescriptor {
            address: "  10  Smith St ".to_string(),
            city: "Austin".to_string(),
            state: "TX".to_string(),
            zip: "78701".to_string(),
            sqft: None,
            beds: None,
            baths: None,
            purchase_price: None,
        }
    }

    #[test]
    fn test_keys_are_normalized() {
        let mut other = property();
        other.address = "10 smith st".to_string();
        other.city = "AUSTIN ".to_string();

        assert_eq!(
            CacheKey::property("comps", &property()),
            CacheKey::property("comps", &other)
        );
        assert_eq!(
            CacheKey::property("comps", &property()).as_str(),
            "cache:comps:10 smith st|austin|tx|78701"
        );
        assert_eq!(CacheKey::zip("location", " 78701 ").as_str(), "cache:location:zip:78701");
        assert_eq!(
            CacheKey::city("market", "Austin", "TX").as_str(),
            "cache:market:city:austin|tx"
        );
        assert_ne!(
            CacheKey::property("comps", &property()),
            CacheKey::property("estimate", &property())
        );
    }

    #[test]
    fn test_freshness_classes() {
        let now = Utc::now();
        let ttl = Duration::days(7);

        assert_eq!(freshness(&entry_aged(Duration::zero(), now), ttl, now), Freshness::Fresh);
        assert_eq!(freshness(&entry_aged(ttl / 2, now), ttl, now), Freshness::Fresh);
        assert_eq!(
            freshness(&entry_aged(ttl / 2 + Duration::seconds(1), now), ttl, now),
            Freshness::Stale
        );
        assert_eq!(freshness(&entry_aged(ttl, now), ttl, now), Freshness::Stale);
        assert_eq!(
            freshness(&entry_aged(ttl + Duration::seconds(1), now), ttl, now),
            Freshness::Expired
        );
    }

    #[test]
    fn test_is_valid() {
        let now = Utc::now();
        let ttl = Duration::days(1);

        assert!(is_valid(&entry_aged(Duration::hours(23), now), ttl, now));
        assert!(is_valid(&entry_aged(ttl, now), ttl, now));
        assert!(!is_valid(&entry_aged(Duration::hours(25), now), ttl, now));
    }

    #[test]
    fn test_should_refresh() {
        let now = Utc::now();
        let ttl = Duration::days(7);
        let fresh = entry_aged(Duration::days(1), now);
        let stale = entry_aged(Duration::days(5), now);
        let expired = entry_aged(Duration::days(8), now);

        assert!(!should_refresh(Some(&fresh), false, ttl, now));
        assert!(!should_refresh(Some(&stale), false, ttl, now));
        assert!(should_refresh(Some(&expired), false, ttl, now));
        assert!(should_refresh(Some(&fresh), true, ttl, now));
        assert!(should_refresh::<u32>(None, false, ttl, now));
    }

    #[tokio::test]
    async fn test_cache_store_roundtrip() {
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), Settings::default().cache);
        let key = CacheKey::zip("location", "78701");

        assert!(cache.get::<Vec<u32>>(&key).await.unwrap().is_none());

        cache.set(&key, vec![1u32, 2, 3], "walkscore", DataClass::Location).await.unwrap();
        let entry = cache.get::<Vec<u32>>(&key).await.unwrap().unwrap();

        assert_eq!(entry.data, vec![1, 2, 3]);
        assert_eq!(entry.source, "walkscore");
        assert_eq!(entry.data_class, DataClass::Location);
        assert_eq!(cache.ttl(entry.data_class), Duration::days(30));
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheStore::new(store.clone(), Settings::default().cache);
        let key = CacheKey::zip("comps", "78701");

        store.set(key.as_str(), "{not json", None).await.unwrap();

        assert!(cache.get::<Vec<u32>>(&key).await.unwrap().is_none());
    }
}
