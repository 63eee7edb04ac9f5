//! Schedule expressions
//!
//! Three forms are accepted:
//!
//! - a cron expression with a seconds field (6 or 7 fields),
//!   e.g. `0 0 1 * * *` for 01:00:00 UTC every day
//! - a predefined macro: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
//! - a fixed interval: `@every 10s`, `@every 1m30s`, `@every 250ms`

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

static EVERY_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+(?:ms|h|m|s))+$").expect("valid regex"));

static EVERY_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(ms|h|m|s)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid schedule '{expression}': {reason}")]
pub struct ScheduleError {
    pub expression: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    kind: ScheduleKind,
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        let error = |reason: String| ScheduleError {
            expression: expression.to_string(),
            reason,
        };

        let kind = match expression.strip_prefix("@every") {
            Some(rest) => ScheduleKind::Every(parse_every(rest.trim()).map_err(error)?),
            None => {
                let schedule =
                    cron::Schedule::from_str(expression).map_err(|e| error(e.to_string()))?;
                ScheduleKind::Cron(Box::new(schedule))
            }
        };

        Ok(Self {
            expression: expression.to_string(),
            kind,
        })
    }

    /// The first fire strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            ScheduleKind::Cron(schedule) => schedule.after(&after).next(),
            ScheduleKind::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.checked_add_signed(period)
            }
        }
    }

    /// The fixed period of an `@every` schedule
    pub fn period(&self) -> Option<Duration> {
        match self.kind {
            ScheduleKind::Every(period) => Some(period),
            ScheduleKind::Cron(_) => None,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_every(value: &str) -> Result<Duration, String> {
    if !EVERY_FORMAT.is_match(value) {
        return Err(format!(
            "expected a duration such as 10s or 1m30s, got '{value}'"
        ));
    }

    let too_large = || format!("interval '{value}' is too large");

    let mut total = Duration::ZERO;
    for part in EVERY_PART.captures_iter(value) {
        let amount: u64 = part[1]
            .parse()
            .map_err(|e| format!("invalid amount '{}': {e}", &part[1]))?;
        let unit = match &part[2] {
            "ms" => Some(Duration::from_millis(amount)),
            "s" => Some(Duration::from_secs(amount)),
            "m" => amount.checked_mul(60).map(Duration::from_secs),
            _ => amount.checked_mul(3600).map(Duration::from_secs),
        };
        total = unit
            .and_then(|unit| total.checked_add(unit))
            .ok_or_else(too_large)?;
    }

    if total.is_zero() {
        return Err("interval must be positive".to_string());
    }

    // Fire times are computed in chrono, which has a narrower range
    chrono::Duration::from_std(total).map_err(|_| too_large())?;

    Ok(total)
}
