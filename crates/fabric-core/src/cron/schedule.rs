//! Cron expression parsing and next-fire computation (component G).
//!
//! Standard 5-field cron (`minute hour day-of-month month day-of-week`).
//! The `cron` crate's grammar is seconds-first, so a literal `"0 "` is
//! prepended before parsing — this crate only ever deals in minute
//! resolution, matching the rest of the design (60 s tick cadence,
//! heartbeat intervals rounded to the minute).

use std::str::FromStr;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{FabricError, Result};

fn to_seconds_first(expr: &str) -> String {
    format!("0 {expr}")
}

/// Parse a 5-field cron expression, validating it without computing a
/// next-fire time.
pub fn parse(expr: &str) -> Result<Schedule> {
    Schedule::from_str(&to_seconds_first(expr))
        .map_err(|e| FabricError::InvalidSchedule(format!("{expr}: {e}")))
}

/// The earliest instant strictly after now matching `expr`, interpreted in
/// the named IANA timezone `tz` (e.g. `"UTC"`, `"America/New_York"`).
/// Returns milliseconds since the Unix epoch.
pub fn next_run_ms(expr: &str, tz: &str) -> Result<i64> {
    let schedule = parse(expr)?;
    let zone = Tz::from_str(tz).map_err(|_| {
        FabricError::InvalidSchedule(format!("unknown timezone: {tz}"))
    })?;
    let now = Utc::now().with_timezone(&zone);
    schedule
        .after(&now)
        .next()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .ok_or_else(|| FabricError::InvalidSchedule(format!("{expr}: no future occurrence")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_minute_parses_and_is_in_the_future() {
        let now = Utc::now().timestamp_millis();
        let next = next_run_ms("*/1 * * * *", "UTC").unwrap();
        assert!(next > now);
        assert!(next - now <= 60_000);
    }

    #[test]
    fn invalid_expression_is_rejected() {
        let err = next_run_ms("not a cron expr", "UTC").unwrap_err();
        assert_eq!(err.code(), "invalid_schedule");
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let err = next_run_ms("*/1 * * * *", "Neverland/Nowhere").unwrap_err();
        assert_eq!(err.code(), "invalid_schedule");
    }

    #[test]
    fn named_timezone_is_honored() {
        let next_utc = next_run_ms("0 12 * * *", "UTC").unwrap();
        let next_ny = next_run_ms("0 12 * * *", "America/New_York").unwrap();
        // Noon in New York is later in absolute UTC ms than noon UTC
        // (except exactly at a DST boundary coincidence), so they should
        // at minimum both parse to valid, distinct-schedule instants.
        assert_ne!(next_utc, 0);
        assert_ne!(next_ny, 0);
    }
}
