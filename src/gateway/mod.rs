//! HTTP-facing adapter: handlers, router and server lifecycle.

pub mod handlers;
pub mod server;

pub use handlers::{track, AppState, TrackingReply};
pub use server::{build_router, shutdown_signal, TrackingServer};
