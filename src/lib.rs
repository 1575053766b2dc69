//! # BOL Tracking - Core Library Crate
//!
//! Shipment (bill of lading) tracking lookups behind a small HTTP API.
//!
//! A code is resolved through a fixed chain: the carrier's tracking API
//! first, then a published spreadsheet whose answers are cached in Redis,
//! including "not found" answers. Both sources are normalized into the same
//! [`ShipmentRecord`] shape.
//!
//! ## Module layout
//! - [`caching`]: key-value stores, the JSON cache client and the
//!   cache-aside resolver with negative caching
//! - [`lookup`]: shipment codes, business tables, the vendor and
//!   spreadsheet sources and the lookup strategy
//! - [`gateway`]: axum handlers, router and server lifecycle
//! - [`core`]: configuration and error types
//! - [`observability`]: logging setup

/// Configuration and error types
pub mod core;

/// Key-value cache access and cache-aside resolution
pub mod caching;

/// Tracking sources and the lookup strategy
pub mod lookup;

/// HTTP-facing adapter
pub mod gateway;

/// Structured logging
pub mod observability;

pub use crate::core::config::AppConfig;
pub use crate::core::error::{TrackingError, TrackingResult};

pub use caching::{CacheAsideResolver, CacheClient, CacheStore, InMemoryCache, RedisCache};

pub use lookup::{
    LookupOutcome, LookupPath, ShipmentCode, ShipmentRecord, TrackingEvent, TrackingLookup,
};

pub use gateway::{build_router, track, AppState, TrackingReply, TrackingServer};
