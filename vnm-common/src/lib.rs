//! # vnm Common
//!
//! Shared utilities for the vnm driver components.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use vnm_common::init_logging;
//!
//! // RUST_LOG takes precedence over the level given here
//! init_logging("info").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
