//! Hot path - code that runs once per task
//!
//! - Bounded LRU cache consulted on every task
//! - Worker loop and the handler trait

pub mod cache;
pub mod worker;

pub use cache::{BoundedCache, CacheError, EvictionPolicy};
pub use worker::{CacheByPayload, TaskHandler, WorkerState};
