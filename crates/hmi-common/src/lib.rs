//! HMI Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the HMI telemetry ingest workspace.
//!
//! - **Checksums**: content fingerprints used to deduplicate imports
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Errors**: the shared [`HmiError`] type
//!
//! # Example
//!
//! ```
//! use hmi_common::checksum::content_hash;
//!
//! let hash = content_hash(b"{\"hours\": []}");
//! assert_eq!(hash.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

pub use error::{HmiError, Result};
