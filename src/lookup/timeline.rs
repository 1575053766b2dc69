//! Synthetic tracking events for sources without event history.
//!
//! The spreadsheet only records a start date, an optional end date and the
//! current status. Events are laid out at fixed offsets from the start date
//! (see [`TimelineConfig`]); every status up to and including the current one
//! gets an event. The result depends only on its input.

use super::catalog::ShipmentStatus;
use super::models::TrackingEvent;
use crate::core::config::TimelineConfig;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use std::time::Duration;

const DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Parse a timestamp. Values without an explicit offset are read in `offset`.
pub fn parse_local_datetime(raw: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed);
    }

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    offset.from_local_datetime(&naive).single()
}

/// Everything the timeline needs to know about one shipment
#[derive(Debug, Clone, Copy)]
pub struct TimelineInput<'a> {
    pub code: &'a str,
    pub status: ShipmentStatus,
    pub start: DateTime<FixedOffset>,
    pub end: Option<DateTime<FixedOffset>>,
    pub origin: &'a str,
    pub destination: &'a str,
    pub operator: &'a str,
    pub reasons: &'a [String],
}

fn shifted(start: DateTime<FixedOffset>, by: Duration) -> DateTime<FixedOffset> {
    i64::try_from(by.as_secs())
        .ok()
        .and_then(|secs| start.checked_add_signed(chrono::Duration::seconds(secs)))
        .unwrap_or(start)
}

/// Offset of the out-for-delivery event, picked from the code so the same
/// shipment always gets the same value. Minute resolution.
pub fn delivery_offset(code: &str, config: &TimelineConfig) -> Duration {
    let span_minutes = config
        .delivery_after_max
        .saturating_sub(config.delivery_after_min)
        .as_secs()
        / 60;

    // FNV-1a
    let hash = code.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
    });

    config.delivery_after_min + Duration::from_secs((hash % (span_minutes + 1)) * 60)
}

/// Build the event list for the shipment's current status, oldest first
pub fn synthesize_events(input: &TimelineInput<'_>, config: &TimelineConfig) -> Vec<TrackingEvent> {
    let mut events = vec![TrackingEvent {
        time: input.start,
        location: input.origin.to_string(),
        status: ShipmentStatus::New.title().to_string(),
        notes: String::new(),
    }];

    if input.status >= ShipmentStatus::Transfer {
        events.push(TrackingEvent {
            time: shifted(input.start, config.transfer_after),
            location: input.origin.to_string(),
            status: ShipmentStatus::Transfer.title().to_string(),
            notes: String::new(),
        });
    }

    if input.status >= ShipmentStatus::Delivery {
        let out_for_delivery = shifted(input.start, delivery_offset(input.code, config));
        events.push(TrackingEvent {
            time: out_for_delivery,
            location: input.destination.to_string(),
            status: ShipmentStatus::Delivery.title().to_string(),
            notes: input.operator.to_string(),
        });

        if input.status.is_final() {
            let finished = input
                .end
                .unwrap_or_else(|| shifted(input.start, config.completion_after))
                .max(out_for_delivery);

            events.push(TrackingEvent {
                time: finished,
                location: input.destination.to_string(),
                status: input.status.title().to_string(),
                notes: input.reasons.join(", "),
            });
        }
    }

    events
}
