//! # Tracking Lookup
//!
//! Resolves a shipment code to a [`ShipmentRecord`] by trying sources in a
//! fixed order:
//!
//! ```text
//! primary (vendor API, uncached)
//!   ├─ found ─────────────────────────────────────────► Primary
//!   └─ miss or error
//!        └─ cache check  <prefix><CODE>
//!             ├─ record ──────────────────────────────► SecondaryCacheHit
//!             ├─ {} ──────────────────────────────────► SecondaryNegativeCacheHit
//!             └─ absent ─► spreadsheet
//!                          ├─ row ─► cache record ────► SecondaryFetched
//!                          └─ none ─► cache {} ───────► SecondaryNotFound
//! ```
//!
//! Primary failures are logged and treated as a miss. Secondary failures are
//! returned to the caller and nothing is cached. Events later than the
//! resolution instant are removed from whatever record is returned, so a
//! cached record reveals its later events as time passes.

pub mod catalog;
pub mod models;
pub mod sheet;
pub mod timeline;
pub mod vendor;

pub use catalog::{parse_extra_services, ServiceCategory, ShipmentStatus, SERVICE_CATEGORIES};
pub use models::{ExtraService, ShipmentRecord, TrackingEvent};
pub use sheet::{SheetClient, SheetSchema, SheetShipment};
pub use vendor::{ClientSession, VendorClient};

use crate::caching::{CacheAsideResolver, Resolution};
use crate::core::config::LookupConfig;
use crate::core::error::{TrackingError, TrackingResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CODE_LENGTH: std::ops::RangeInclusive<usize> = 6..=20;

/// A validated, upper-cased shipment code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShipmentCode(String);

impl ShipmentCode {
    /// Trim, upper-case and validate a raw code
    pub fn parse(raw: &str) -> TrackingResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TrackingError::invalid_code(raw, "code is required"));
        }
        // checked before upper-casing, which maps some non-ASCII letters to ASCII
        let well_formed = CODE_LENGTH.contains(&trimmed.len())
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric());
        if !well_formed {
            return Err(TrackingError::invalid_code(
                raw,
                "expected 6 to 20 letters or digits",
            ));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShipmentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ShipmentCode {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Live source consulted first, without caching
#[async_trait]
pub trait PrimarySource: Send + Sync {
    async fn fetch(&self, code: &ShipmentCode) -> TrackingResult<Option<ShipmentRecord>>;
}

/// Fallback source whose answers are cached
#[async_trait]
pub trait SecondarySource: Send + Sync {
    async fn fetch(&self, code: &ShipmentCode) -> TrackingResult<Option<ShipmentRecord>>;
}

/// Which branch of the lookup produced the answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupPath {
    Primary,
    SecondaryCacheHit,
    SecondaryNegativeCacheHit,
    SecondaryFetched,
    SecondaryNotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LookupOutcome {
    pub record: Option<ShipmentRecord>,
    pub path: LookupPath,
}

impl LookupOutcome {
    pub fn found(&self) -> bool {
        self.record.is_some()
    }
}

/// The lookup strategy: primary source, then the cached secondary source
pub struct TrackingLookup {
    primary: Option<Arc<dyn PrimarySource>>,
    secondary: Arc<dyn SecondarySource>,
    resolver: CacheAsideResolver,
    key_prefix: String,
    ttl: Duration,
}

impl TrackingLookup {
    pub fn new(
        primary: Option<Arc<dyn PrimarySource>>,
        secondary: Arc<dyn SecondarySource>,
        resolver: CacheAsideResolver,
        config: &LookupConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            resolver,
            key_prefix: config.key_prefix.clone(),
            ttl: config.ttl,
        }
    }

    /// Cache key of the secondary result for `code`
    pub fn cache_key(&self, code: &ShipmentCode) -> String {
        format!("{}{}", self.key_prefix, code)
    }

    pub fn resolver(&self) -> &CacheAsideResolver {
        &self.resolver
    }

    pub async fn lookup(&self, code: &ShipmentCode) -> TrackingResult<LookupOutcome> {
        self.lookup_at(code, Utc::now()).await
    }

    /// Look up `code`, hiding events later than `now`
    pub async fn lookup_at(
        &self,
        code: &ShipmentCode,
        now: DateTime<Utc>,
    ) -> TrackingResult<LookupOutcome> {
        if let Some(primary) = &self.primary {
            match primary.fetch(code).await {
                Ok(Some(record)) => {
                    debug!("Primary source answered for {}", code);
                    return Ok(LookupOutcome {
                        record: Some(record.visible_at(now)),
                        path: LookupPath::Primary,
                    });
                }
                Ok(None) => debug!("Primary source has no order {}", code),
                Err(e) => warn!("Primary source failed for {}, falling back: {}", code, e),
            }
        }

        let key = self.cache_key(code);
        let resolution = self
            .resolver
            .resolve(&key, self.ttl, || self.secondary.fetch(code))
            .await?;

        let (record, path) = match resolution {
            Resolution::Hit(record) => (Some(record), LookupPath::SecondaryCacheHit),
            Resolution::NegativeHit => (None, LookupPath::SecondaryNegativeCacheHit),
            Resolution::Fetched(record) => (Some(record), LookupPath::SecondaryFetched),
            Resolution::FetchedNone => (None, LookupPath::SecondaryNotFound),
        };
        debug!("Resolved {} via {:?}", code, path);

        Ok(LookupOutcome {
            record: record.map(|record: ShipmentRecord| record.visible_at(now)),
            path,
        })
    }

    /// Forget the cached secondary result for `code`
    pub async fn invalidate(&self, code: &ShipmentCode) -> bool {
        let removed = self.resolver.client().del(&self.cache_key(code)).await;
        info!("Invalidated cached tracking for {} ({} key removed)", code, removed);
        removed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_normalization() {
        let code = ShipmentCode::parse("  abc123456 ").unwrap();
        assert_eq!(code.as_str(), "ABC123456");
        assert_eq!("sp0001".parse::<ShipmentCode>().unwrap().to_string(), "SP0001");
    }

    #[test]
    fn test_invalid_codes() {
        for raw in ["", "   ", "ABC12", "ABC-123456", "ÀBC123456", "A23456789012345678901"] {
            let err = ShipmentCode::parse(raw).unwrap_err();
            assert!(matches!(err, TrackingError::InvalidCode { .. }), "{raw}");
        }
        assert!(ShipmentCode::parse("A2345678901234567890").is_ok());
    }

    #[test]
    fn test_non_ascii_letters_do_not_fold_into_codes() {
        for raw in ["abc\u{131}def1", "\u{17f}bc123456", "abc12345\u{212a}"] {
            assert!(ShipmentCode::parse(raw).is_err(), "{raw}");
        }
    }
}
