//! Oxide CI Core
//!
//! Domain types, traits, and error handling for the stage scheduler.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the scheduler, its callers, and its runners.

pub mod context;
pub mod error;
pub mod events;
pub mod filter;
pub mod ids;
pub mod ports;
pub mod runner;
pub mod stage;

pub use context::CallContext;
pub use error::{Error, Result};
pub use filter::{CapabilityProfile, Filter};
pub use ids::*;
pub use runner::{Runner, RunnerStatus};
pub use stage::{BuildStatus, Stage};
