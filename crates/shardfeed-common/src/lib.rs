//! shardfeed common library
//!
//! Shared pieces of the shardfeed workspace:
//!
//! - **Types**: the [`CanonicalRecord`] sent to the indexing sink and the
//!   [`Watermark`] used as a per-shard resume point
//! - **Logging**: `tracing` subscriber bootstrap
//! - **Errors**: [`CommonError`] and its result alias
//!
//! # Example
//!
//! ```
//! use shardfeed_common::Watermark;
//!
//! let mark = Watermark::parse("2024-01-18T09:00:00Z").unwrap();
//! assert!(mark > Watermark::epoch());
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

pub use error::{CommonError, Result};
pub use types::{CanonicalRecord, Identifier, IdentifierKind, Watermark};
