//! Image task worker
//!
//! Drains image-transform tasks from a Redis queue within a bounded time
//! budget: each task's source image is downloaded from S3-compatible storage,
//! run through the configured transforms and the results uploaded back.

pub mod app_state;
pub mod config;
pub mod models;
pub mod services;
pub mod telemetry;
pub mod worker;
