//! Shared types for the larder recipe pipeline.
//!
//! This crate holds the pieces every larder component needs:
//!
//! - [`Recipe`] - the validated record type flowing through the pipeline
//! - [`Error`] / [`Result`] - core error handling
//! - [`metrics`] - Prometheus recorder setup and metric descriptions

pub mod error;
pub mod metrics;
pub mod recipe;

pub use error::{Error, Result};
pub use recipe::Recipe;
