//! Time-Window Gate (C4)
//!
//! Computes `(inWindow, wait)` for a business-hours window expressed as
//! `(startHHMM, endHHMM, IANA tz)`, including windows that straddle
//! midnight (§4.4). Spec §9 permits substituting a proper IANA tz library
//! for hand-rolled DST convergence; this uses `chrono-tz`, which carries
//! the full IANA database and handles offset conversion directly.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("unknown IANA timezone: {0}")]
    UnknownTimezone(String),
    #[error("malformed HH:MM value: {0}")]
    MalformedTime(String),
}

/// Business-hours window (§3 `ScheduleWindow` made concrete for gate
/// evaluation). `start`/`end` of `None` means 24/7.
#[derive(Debug, Clone)]
pub struct TimeWindow {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub tz: Tz,
}

impl TimeWindow {
    pub fn parse(start_hhmm: Option<&str>, end_hhmm: Option<&str>, timezone: &str) -> Result<Self, WindowError> {
        let tz = Tz::from_str(timezone).map_err(|_| WindowError::UnknownTimezone(timezone.to_string()))?;
        Ok(Self {
            start: start_hhmm.map(parse_hhmm).transpose()?,
            end: end_hhmm.map(parse_hhmm).transpose()?,
            tz,
        })
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, WindowError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| WindowError::MalformedTime(s.to_string()))
}

/// Result of a gate evaluation (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCheck {
    pub in_window: bool,
    pub wait: Duration,
}

/// Evaluate the gate at `now` (§4.4). Null start/end means unrestricted.
pub fn check(window: &TimeWindow, now: DateTime<Utc>) -> WindowCheck {
    let (start, end) = match (window.start, window.end) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return WindowCheck {
                in_window: true,
                wait: Duration::ZERO,
            }
        }
    };

    let local = now.with_timezone(&window.tz);
    let local_time = local.time();

    let in_window = if end >= start {
        local_time >= start && local_time <= end
    } else {
        // Window wraps midnight.
        local_time >= start || local_time <= end
    };

    if in_window {
        return WindowCheck {
            in_window: true,
            wait: Duration::ZERO,
        };
    }

    // Not in window: wait until today's start if we're before it, or
    // tomorrow's start if we're past today's end.
    let next_start_local = if local_time < start {
        local.date_naive().and_time(start)
    } else {
        (local.date_naive() + chrono::Duration::days(1)).and_time(start)
    };

    let next_start_utc = window
        .tz
        .from_local_datetime(&next_start_local)
        .earliest()
        .expect("local wall-clock time constructed from a calendar date is unambiguous in practice")
        .with_timezone(&Utc);

    let wait = (next_start_utc - now).to_std().unwrap_or(Duration::ZERO);

    WindowCheck {
        in_window: false,
        wait,
    }
}
