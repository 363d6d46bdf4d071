//! Time utilities for escrowd
//!
//! Every timeout in the escrow lifecycle is measured against wall-clock UTC
//! time taken at call time. Nothing is scheduled in the background.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `ESCROW_MOCK_TIME` environment variable can be set
//! to shift the service clock. The clock keeps advancing at the real rate
//! from the given starting point, which makes refund and dispute windows
//! easy to exercise by hand.
//!
//! Format: `YYYY-MM-DD HH:MM:SS`, interpreted as UTC (e.g., `2025-12-25 14:30:00`)
//!
//! Example:
//! ```bash
//! ESCROW_MOCK_TIME="2025-12-25 14:30:00" escrowd
//! ```

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "ESCROW_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between mock time and real time, computed once per process.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Utc::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) {
                    Ok(naive_dt) => {
                        let mock_dt = Utc.from_utc_datetime(&naive_dt);
                        let offset = mock_dt.signed_duration_since(Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = MOCK_TIME_FORMAT,
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current UTC time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Utc> {
    let real_now = Utc::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// The instant `after` has elapsed since `start`.
///
/// Returns `None` when the result is not representable; such a deadline is
/// never reached.
pub fn deadline(start: DateTime<Utc>, after: Duration) -> Option<DateTime<Utc>> {
    let after = chrono::Duration::from_std(after).ok()?;
    start.checked_add_signed(after)
}

/// Whether `now` is at or past `start + after`.
pub fn has_elapsed(start: DateTime<Utc>, after: Duration, now: DateTime<Utc>) -> bool {
    deadline(start, after).is_some_and(|d| now >= d)
}

/// Format a duration as "1h 5m 3s" style text.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
