//! Migration job telemetry
//!
//! This library keeps a live, locally cached view of data-migration jobs: it
//! pulls authoritative job snapshots from the control API, merges streamed
//! telemetry deltas on top of them, and exposes filtered, display-ready rows
//! to a presentation layer.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
