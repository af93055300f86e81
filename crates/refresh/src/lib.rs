//! Standings cache with single-flight background refresh.

pub mod cache;
pub mod clock;
pub mod coordinator;
pub mod stats;

pub use cache::CacheEntry;
pub use clock::{Clock, SystemClock};
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use stats::RefreshStats;
