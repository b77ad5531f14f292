// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Five-field cron expression evaluator.
//!
//! Parses `minute hour day-of-month month day-of-week` expressions into five
//! match sets and answers two questions about them: does a timestamp match,
//! and when is the next match. No state, no I/O.
//!
//! Supported syntax per field: `*`, a bare value, `lo-hi` ranges, `*/n` and
//! `range/n` steps, and comma lists combining any of these. Day-of-week `7`
//! is normalized to `0` at parse time (both mean Sunday), including inside
//! lists and ranges. Matching is a pure conjunction of the five membership
//! tests; the classic vixie "dom OR dow" rule is not applied.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

/// How far [`Schedule::next_match`] scans before giving up. Expressions like
/// `0 0 30 2 *` never match and must still terminate.
const HORIZON_DAYS: i64 = 731;

/// Errors from parsing a cron expression.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CronError {
    /// The expression does not have exactly five fields.
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    /// A token could not be parsed as a number, range, or step.
    #[error("invalid token '{token}' in {field} field")]
    InvalidToken {
        /// Field the token appeared in.
        field: &'static str,
        /// The offending token.
        token: String,
    },

    /// A value falls outside the field's range.
    #[error("value {value} out of range {lo}-{hi} in {field} field")]
    OutOfRange {
        /// Field the value appeared in.
        field: &'static str,
        /// The offending value.
        value: u32,
        /// Lowest allowed value.
        lo: u32,
        /// Highest allowed value.
        hi: u32,
    },

    /// A range has its bounds reversed.
    #[error("reversed range {from}-{to} in {field} field")]
    ReversedRange {
        /// Field the range appeared in.
        field: &'static str,
        /// Range start.
        from: u32,
        /// Range end.
        to: u32,
    },

    /// A step of zero was given.
    #[error("step must be at least 1 in {0} field")]
    ZeroStep(&'static str),
}

/// A parsed cron expression: one match set per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days: BTreeSet<u32>,
    months: BTreeSet<u32>,
    weekdays: BTreeSet<u32>,
}

/// Per-field parse parameters.
struct FieldSpec {
    name: &'static str,
    lo: u32,
    hi: u32,
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", lo: 0, hi: 59 },
    FieldSpec { name: "hour", lo: 0, hi: 23 },
    FieldSpec { name: "day-of-month", lo: 1, hi: 31 },
    FieldSpec { name: "month", lo: 1, hi: 12 },
    // 7 is accepted and folded onto 0 after range expansion.
    FieldSpec { name: "day-of-week", lo: 0, hi: 7 },
];

impl Schedule {
    /// Parse a five-field cron expression.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut sets = Vec::with_capacity(5);
        for (spec, raw) in FIELDS.iter().zip(&fields) {
            sets.push(parse_field(spec, raw)?);
        }

        let mut weekdays = sets.pop().unwrap_or_default();
        // Both 0 and 7 mean Sunday.
        if weekdays.remove(&7) {
            weekdays.insert(0);
        }

        let months = sets.pop().unwrap_or_default();
        let days = sets.pop().unwrap_or_default();
        let hours = sets.pop().unwrap_or_default();
        let minutes = sets.pop().unwrap_or_default();

        Ok(Self { minutes, hours, days, months, weekdays })
    }

    /// Whether `t` (seconds ignored) matches all five fields.
    pub fn matches(&self, t: NaiveDateTime) -> bool {
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.days.contains(&t.day())
            && self.months.contains(&t.month())
            && self.weekdays.contains(&t.weekday().num_days_from_sunday())
    }

    /// The first matching minute strictly after `after`, or `None` if no
    /// minute within the scan horizon matches.
    pub fn next_match(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = truncate_to_minute(after) + Duration::minutes(1);
        let horizon = t + Duration::days(HORIZON_DAYS);

        while t < horizon {
            if !self.months.contains(&t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.days.contains(&t.day())
                || !self.weekdays.contains(&t.weekday().num_days_from_sunday())
            {
                t = midnight_of_next_day(t)?;
                continue;
            }
            if !self.hours.contains(&t.hour()) {
                t = start_of_next_hour(t);
                continue;
            }
            if self.minutes.contains(&t.minute()) {
                return Some(t);
            }
            t += Duration::minutes(1);
        }
        None
    }
}

/// Parse one field into its match set.
fn parse_field(spec: &FieldSpec, raw: &str) -> Result<BTreeSet<u32>, CronError> {
    let mut set = BTreeSet::new();
    for part in raw.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step_str)) => {
                let step: u32 = step_str.parse().map_err(|_| CronError::InvalidToken {
                    field: spec.name,
                    token: part.to_string(),
                })?;
                if step == 0 {
                    return Err(CronError::ZeroStep(spec.name));
                }
                (base, step)
            }
            None => (part, 1),
        };

        let (from, to) = if base == "*" {
            (spec.lo, spec.hi)
        } else if let Some((a, b)) = base.split_once('-') {
            let from = parse_value(spec, a, part)?;
            let to = parse_value(spec, b, part)?;
            if from > to {
                return Err(CronError::ReversedRange { field: spec.name, from, to });
            }
            (from, to)
        } else {
            let v = parse_value(spec, base, part)?;
            // A bare value with a step (`5/15`) runs to the end of the field.
            if step > 1 { (v, spec.hi) } else { (v, v) }
        };

        let mut v = from;
        while v <= to {
            set.insert(v);
            v += step;
        }
    }
    Ok(set)
}

/// Parse a single numeric value and range-check it.
fn parse_value(spec: &FieldSpec, text: &str, token: &str) -> Result<u32, CronError> {
    let value: u32 = text.parse().map_err(|_| CronError::InvalidToken {
        field: spec.name,
        token: token.to_string(),
    })?;
    if value < spec.lo || value > spec.hi {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            lo: spec.lo,
            hi: spec.hi,
        });
    }
    Ok(value)
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?)
}

fn midnight_of_next_day(t: NaiveDateTime) -> Option<NaiveDateTime> {
    Some(t.date().succ_opt()?.and_hms_opt(0, 0, 0)?)
}

fn start_of_next_hour(t: NaiveDateTime) -> NaiveDateTime {
    truncate_to_minute(t) + Duration::minutes(60 - t.minute() as i64)
}
