//! Quota subsystem (tiered request ceilings per caller).
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (caller IP + optional authenticated user)
//!     → tier.rs (pick endpoint override / seller / authenticated / public)
//!     → tracker.rs (hit the counter store, admit or reject)
//!     → store.rs | redis_store.rs (atomic read-and-increment with expiry)
//! ```
//!
//! # Design Decisions
//! - Fixed windows anchored at the first hit; expired counters reset on read
//! - Counter update and admit/reject decision come from one atomic store call
//! - A failing shared store degrades to the local memory store
//! - Tier policy is swapped atomically on config reload

pub mod identity;
pub mod redis_store;
pub mod store;
pub mod tier;
pub mod tracker;

pub use identity::{AuthenticatedUser, CallerClass, CallerIdentity};
pub use redis_store::RedisStore;
pub use store::{CounterStore, Hit, MemoryStore, StoreError};
pub use tier::{QuotaTier, TierPolicy};
pub use tracker::{Admission, QuotaTracker, RateLimited};
