//! Common test infrastructure
//!
//! Tests build an [`EventSystem`] over a SQLite file in a temporary directory,
//! driven by a [`ManualClock`] so that schedules and backoffs can be stepped
//! through without sleeping.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{ScriptedHandler, TestSystem};
//!
//! #[tokio::test]
//! async fn test_processes_event() {
//!     let ts = TestSystem::new();
//!     ts.system.register(ScriptedHandler::succeeding(), Default::default());
//!     ts.emit_expired("f1", 0);
//!     assert_eq!(ts.system.process_once().await, 1);
//! }
//! ```

mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{expired_payload, t0, ScriptedHandler, TestSystem};
