//! # rtc-server
//!
//! HTTP and WebSocket front end for the rtc-relay presence and
//! call-signaling relay.

pub mod api;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use cli::Cli;
pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
