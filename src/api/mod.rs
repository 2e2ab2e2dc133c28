//! HTTP API Module
//!
//! Provides the replication server endpoints.

mod http;

pub use http::{AppState, HttpServer};
