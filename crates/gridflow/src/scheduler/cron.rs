use chrono::{DateTime, Datelike, Duration, DurationRound, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    expression: String,
    reason: String,
}

/// A five-field cron expression evaluated in UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldBounds {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldBounds = FieldBounds { name: "minute", min: 0, max: 59 };
const HOUR: FieldBounds = FieldBounds { name: "hour", min: 0, max: 23 };
const DAY_OF_MONTH: FieldBounds = FieldBounds { name: "day-of-month", min: 1, max: 31 };
const MONTH: FieldBounds = FieldBounds { name: "month", min: 1, max: 12 };
const DAY_OF_WEEK: FieldBounds = FieldBounds { name: "day-of-week", min: 0, max: 7 };

// Roughly five years of day-level steps; covers Feb 29 schedules.
const SEARCH_LIMIT: usize = 5 * 366 * 24 * 2;

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fail = |reason: String| CronError {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(fail(format!("expected 5 fields, found {}", fields.len())));
        };

        let mut days_of_week = parse_field(dow, &DAY_OF_WEEK).map_err(&fail)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: expression.trim().to_string(),
            minutes: parse_field(minute, &MINUTE).map_err(&fail)?,
            hours: parse_field(hour, &HOUR).map_err(&fail)?,
            days_of_month: parse_field(dom, &DAY_OF_MONTH).map_err(&fail)?,
            months: parse_field(month, &MONTH).map_err(&fail)?,
            days_of_week,
            dom_restricted: dom != "*",
            dow_restricted: dow != "*",
        })
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        bit(self.minutes, at.minute())
            && bit(self.hours, at.hour())
            && bit(self.months, at.month())
            && self.day_matches(at.date_naive())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = after.duration_trunc(Duration::minutes(1)).ok()? + Duration::minutes(1);

        for _ in 0..SEARCH_LIMIT {
            if !bit(self.months, candidate.month()) || !self.day_matches(candidate.date_naive()) {
                let next_day = candidate.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?;
                candidate = Utc.from_utc_datetime(&next_day);
                continue;
            }
            if !bit(self.hours, candidate.hour()) {
                candidate = candidate.duration_trunc(Duration::hours(1)).ok()? + Duration::hours(1);
                continue;
            }
            match (candidate.minute()..60).find(|minute| bit(self.minutes, *minute)) {
                Some(minute) => return candidate.with_minute(minute),
                None => {
                    candidate =
                        candidate.duration_trunc(Duration::hours(1)).ok()? + Duration::hours(1);
                }
            }
        }
        None
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn parse_field(raw: &str, bounds: &FieldBounds) -> Result<u64, String> {
    let mut mask = 0u64;
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid {} step '{step}'", bounds.name))?;
                if step == 0 {
                    return Err(format!("{} step must be positive", bounds.name));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (bounds.min, bounds.max)
        } else if let Some((start, end)) = range.split_once('-') {
            (value(start, bounds)?, value(end, bounds)?)
        } else {
            let single = value(range, bounds)?;
            // `5/15` means from 5 to the end of the range.
            if part.contains('/') {
                (single, bounds.max)
            } else {
                (single, single)
            }
        };

        if start > end {
            return Err(format!("{} range {start}-{end} is reversed", bounds.name));
        }
        for v in (start..=end).step_by(step as usize) {
            mask |= 1 << v;
        }
    }
    Ok(mask)
}

fn value(raw: &str, bounds: &FieldBounds) -> Result<u32, String> {
    let parsed: u32 = raw
        .parse()
        .map_err(|_| format!("invalid {} value '{raw}'", bounds.name))?;
    if parsed < bounds.min || parsed > bounds.max {
        return Err(format!(
            "{} value {parsed} outside {}-{}",
            bounds.name, bounds.min, bounds.max
        ));
    }
    Ok(parsed)
}
