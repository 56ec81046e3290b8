//! Types and utilities shared across the Murmur crates.
//!
//! Everything here is small and dependency-light so that the fetch side
//! (`murmur-social`), the publish side (`murmur-bus`) and the binary can all
//! agree on what a fetched post and a search window look like.
//!
//! # Overview
//!
//! - [`Item`]: one post returned by a search, immutable once fetched
//! - [`TimeWindow`]: the closed historical slice `[start, end]` an invocation covers
//! - [`observability`]: centralised tracing/logging initialisation
//!
//! # Examples
//!
//! Deriving the window an invocation at 12:00:30 covers:
//!
//! ```rust
//! use murmur_common::TimeWindow;
//! use time::macros::datetime;
//! use time::Duration;
//!
//! let now = datetime!(2024-05-01 12:00:30.250 UTC);
//! let window = TimeWindow::trailing(now, Duration::minutes(1), Duration::minutes(1)).unwrap();
//! assert_eq!(window.start(), datetime!(2024-05-01 11:58:30 UTC));
//! assert_eq!(window.end(), datetime!(2024-05-01 11:59:30 UTC));
//! ```
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime, UtcOffset};

pub mod observability;

/// A single post fetched from the search API.
///
/// Only the three fields the relay needs survive the trip from the wire
/// format; `text` becomes the outbound message payload verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub text: String,
}

impl Item {
    pub fn new(id: impl Into<String>, created_at: OffsetDateTime, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at,
            text: text.into(),
        }
    }
}

/// Closed time range `[start, end]` in UTC, truncated to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: OffsetDateTime,
    end: OffsetDateTime,
}

impl TimeWindow {
    /// Build a window from explicit bounds. Returns `None` when `end < start`.
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Option<Self> {
        let start = whole_seconds_utc(start);
        let end = whole_seconds_utc(end);
        (start <= end).then_some(Self { start, end })
    }

    /// The window of `width` ending `lag` before `now`.
    ///
    /// Negative durations are treated as zero. Returns `None` when either
    /// bound falls outside the representable date range.
    pub fn trailing(now: OffsetDateTime, lag: Duration, width: Duration) -> Option<Self> {
        let lag = lag.max(Duration::ZERO);
        let width = width.max(Duration::ZERO);
        let end = whole_seconds_utc(now).checked_sub(lag)?;
        let start = end.checked_sub(width)?;
        Some(Self { start, end })
    }

    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    pub fn end(&self) -> OffsetDateTime {
        self.end
    }

    pub fn width(&self) -> Duration {
        self.end - self.start
    }

    /// RFC 3339 rendering of both bounds, e.g. `2024-05-01T11:58:30Z`.
    pub fn to_rfc3339(&self) -> Result<(String, String), time::error::Format> {
        Ok((self.start.format(&Rfc3339)?, self.end.format(&Rfc3339)?))
    }
}

fn whole_seconds_utc(t: OffsetDateTime) -> OffsetDateTime {
    let t = t.to_offset(UtcOffset::UTC);
    t - Duration::nanoseconds(i64::from(t.nanosecond()))
}
