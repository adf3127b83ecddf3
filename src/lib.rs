//! Task status gate
//!
//! Tracks the lifecycle of asynchronously processed tasks in a TTL-bounded
//! in-memory store, and authenticates callers with bearer tokens verified
//! against keys fetched from the issuer's JSON Web Key Set.

pub mod app_state;
pub mod config;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
