// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Trackshop API Library
//!
//! HTTP surface for the purchase ledger: payment webhooks in, download links
//! and purchase history out.

pub mod catalog;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use catalog::TrackCatalog;
pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
