//! Persistence backends
//!
//! `InMemoryStore` for tests and unconfigured runs, `RestStore` for a
//! PostgREST/Supabase database.

pub mod errors;
pub mod memory;
pub mod rest;
pub mod test_utils;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use rest::RestStore;
pub use traits::{AlertLogStore, DetectorStateStore, SharedStore, Store, WatchlistStore};
