//! # Data Retrieval Module
//!
//! HTTP plumbing used by the polling transport.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: a single-attempt `ApiClient` built on `reqwest` that
//!   returns the raw body with its status, leaving decoding and retry cadence
//!   to the caller.

/// Single-attempt HTTP client with base-URL joining and bearer auth.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
