//! Core types shared by every component
//!
//! - Task, TaskId, TaskResult, TaskError: the unit of work and its outcome
//! - OnceInit: fallible one-time initialization with sticky failure

pub mod once;
pub mod task;

pub use once::{InitPhase, OnceInit, Poisoned};
pub use task::{Task, TaskError, TaskId, TaskResult};
