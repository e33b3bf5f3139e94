//! # mirrordb Testkit
//!
//! Test utilities for mirrordb.
//!
//! This crate provides:
//! - A recording application model and a scripted remote
//! - A store factory wrapper that injects open, delete and commit faults
//! - Deterministic clocks for heartbeat tests
//! - Record fixtures and store/metadata seeding helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirrordb_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn hydrates() {
//!     let env = TestEnv::new();
//!     let engine = env.engine();
//!     let report = engine.start_session().await.unwrap();
//!     // ... assertions on env.model / env.remote
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod model;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use crate::remote::*;
}

pub use clock::*;
pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
pub use model::*;
pub use remote::*;
