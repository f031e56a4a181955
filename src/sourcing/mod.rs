//! Sourcing module - decides which external provider may be called for a
//! request, and whether it needs to be called at all
//!
//! - `cache`: TTL snapshots keyed by normalized address
//! - `quota`: per-source usage counters and call order
//! - `orchestrator`: cache first, then quota-aware fallback with retries

pub mod cache;
pub mod orchestrator;
pub mod parse;
pub mod quota;
pub mod retry;
pub mod store;
pub mod transport;
pub mod types;

pub use cache::{CacheKey, CacheStore};
pub use orchestrator::SourceOrchestrator;
pub use quota::{CallOrder, QuotaLedger};
pub use retry::RetryPolicy;
pub use store::{KeyValueStore, MemoryStore, PgStore};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::*;
