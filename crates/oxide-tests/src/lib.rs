//! Integration test infrastructure for the Oxide CI scheduler.
//!
//! This crate provides an in-process scheduler wired to an event
//! subscription, plus fixtures and polling helpers for end-to-end
//! dispatch tests.
//!
//! # Usage
//!
//! ```ignore
//! use oxide_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let mut ctx = TestContext::new();
//!     // Use ctx.scheduler, ctx.events, ctx.spawn_request(..), etc.
//! }
//! ```

pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,oxide_scheduler=debug,oxide_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
