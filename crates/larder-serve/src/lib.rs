//! Larder Serve - HTTP API for recipe submission
//!
//! This crate provides the REST surface in front of the larder ingestion
//! pipeline. Submissions are deduplicated, durably buffered, and
//! acknowledged immediately; the commit to the remote dataset happens in
//! the background.
//!
//! # Authentication
//!
//! All `/api/v1` endpoints require Bearer token authentication. Tokens are
//! configured via environment variables (typically in a `.env` file).
//!
//! # Architecture
//!
//! - **AppState**: Shared application state (ingestion pipeline, configuration)
//! - **Auth**: Bearer token middleware for request authentication
//! - **Routes**: Submission, health, and stats handlers

mod auth;
mod error;
mod routes;
mod state;

pub use self::auth::require_auth;
pub use self::error::ApiError;
pub use self::routes::router;
pub use self::state::{AppState, Config};
