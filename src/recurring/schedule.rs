//! # Cron schedule wrapper.
//!
//! Accepts standard 5-field cron expressions (`minute hour dom month dow`
//! with `*`, `,`, `-`, `/`; day-of-week `0` = Sunday) and computes fire
//! times strictly after a given instant.
//!
//! The `cron` crate wants a seconds field and numbers its weekdays its own
//! way, so parsing normalizes: a `0` seconds field is prepended and numeric
//! day-of-week tokens are rewritten to `SUN`..`SAT` names, which mean the
//! same thing in every numbering.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::EngineError;

/// A parsed, validated cron expression.
#[derive(Clone, Debug)]
pub(crate) struct RecurringSchedule {
    schedule: Schedule,
    expression: String,
}

impl RecurringSchedule {
    /// Parses a 5-field cron expression.
    pub(crate) fn parse(expression: &str) -> Result<Self, EngineError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(EngineError::bad_request(format!(
                "cron expression '{expression}' must have 5 fields (minute hour dom month dow)"
            )));
        }

        let normalized = format!(
            "0 {} {} {} {} {}",
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            rewrite_dow(fields[4]),
        );
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            EngineError::bad_request(format!("invalid cron expression '{expression}': {e}"))
        })?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// The original 5-field expression.
    pub(crate) fn expression(&self) -> &str {
        &self.expression
    }

    /// The first fire time strictly after `after`.
    pub(crate) fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Rewrites numeric day-of-week tokens (0/7 = Sunday) to weekday names,
/// preserving `*`, lists, ranges, and step suffixes.
fn rewrite_dow(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let mapped = match range.split_once('-') {
                Some((lo, hi)) => format!("{}-{}", dow_name(lo), dow_name(hi)),
                None => dow_name(range),
            };
            match step {
                Some(step) => format!("{mapped}/{step}"),
                None => mapped,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn dow_name(token: &str) -> String {
    match token {
        "0" | "7" => "SUN",
        "1" => "MON",
        "2" => "TUE",
        "3" => "WED",
        "4" => "THU",
        "5" => "FRI",
        "6" => "SAT",
        other => return other.to_string(),
    }
    .to_string()
}
