//! HTTP gateway for Blastline.
//!
//! Thin Axum surface over the store and engine: campaign submission,
//! status polling, cancellation, webhook intake, and a manual sweep
//! trigger for external cron setups.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
