// src/iter/cycle.rs

//! Time cycles: contiguous `[begin, end)` intervals generated once from the
//! `[cycles]` section of the workflow configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{Months, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

use crate::errors::{Result, WoomError};

/// Format used for tokens, labels and `WOOM_CYCLE_*_DATE` variables.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One interval of the cycle sequence.
///
/// `prev`/`next` are indices into the owning [`CycleSeq`], `None` at the
/// sequence boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub index: usize,
    pub begin: NaiveDateTime,
    pub end: NaiveDateTime,
    pub token: String,
    pub label: String,
    pub is_first: bool,
    pub is_last: bool,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl Cycle {
    fn new(index: usize, begin: NaiveDateTime, end: NaiveDateTime) -> Self {
        let b = begin.format(DATE_FORMAT).to_string();
        let e = end.format(DATE_FORMAT).to_string();
        let duration = format_duration(end - begin);
        Self {
            index,
            begin,
            end,
            token: format!("{b}-{e}"),
            label: format!("{b} -> {e} ({duration})"),
            is_first: false,
            is_last: false,
            prev: None,
            next: None,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.begin
    }

    pub fn begin_str(&self) -> String {
        self.begin.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }

    pub fn duration_str(&self) -> String {
        format_duration(self.duration())
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Ordered, immutable sequence of cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSeq {
    cycles: Vec<Cycle>,
}

impl CycleSeq {
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Cycle> {
        self.cycles.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cycle> {
        self.cycles.iter()
    }

    pub fn prev(&self, cycle: &Cycle) -> Option<&Cycle> {
        cycle.prev.and_then(|i| self.cycles.get(i))
    }

    pub fn next(&self, cycle: &Cycle) -> Option<&Cycle> {
        cycle.next.and_then(|i| self.cycles.get(i))
    }

    /// Find a cycle by token or by label.
    pub fn find(&self, token_or_label: &str) -> Option<&Cycle> {
        self.cycles
            .iter()
            .find(|c| c.token == token_or_label || c.label == token_or_label)
    }
}

/// Cycle frequency, parsed from strings like `"6h"`, `"1D"`, `"2W"`, `"1M"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freq {
    Fixed(TimeDelta),
    Months(u32),
}

impl Freq {
    fn advance(&self, date: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Freq::Fixed(delta) => date.checked_add_signed(*delta),
            Freq::Months(n) => date.checked_add_months(Months::new(*n)),
        }
    }
}

impl FromStr for Freq {
    type Err = WoomError;

    fn from_str(s: &str) -> Result<Self> {
        let (count, unit) = split_count_unit(s)?;
        if count <= 0 {
            return Err(WoomError::config(format!(
                "cycle frequency must be positive (got '{s}')"
            )));
        }
        match unit {
            "M" | "MS" | "mo" | "month" | "months" => u32::try_from(count)
                .map(Freq::Months)
                .map_err(|_| WoomError::config(format!("cycle frequency out of range: '{s}'"))),
            _ => Ok(Freq::Fixed(parse_unit(count, unit, s)?)),
        }
    }
}

/// Parse a duration string such as `"500ms"`, `"10s"`, `"1h"` or `"2D"`.
pub fn parse_duration(s: &str) -> Result<TimeDelta> {
    let (count, unit) = split_count_unit(s)?;
    if unit == "ms" {
        return TimeDelta::try_milliseconds(count)
            .ok_or_else(|| WoomError::config(format!("duration out of range: '{s}'")));
    }
    parse_unit(count, unit, s)
}

fn split_count_unit(s: &str) -> Result<(i64, &str)> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let count = if num.is_empty() {
        1
    } else {
        num.parse::<i64>()
            .map_err(|_| WoomError::config(format!("invalid duration '{s}'")))?
    };
    Ok((count, unit.trim()))
}

fn parse_unit(count: i64, unit: &str, original: &str) -> Result<TimeDelta> {
    let delta = match unit {
        "s" | "S" | "sec" => TimeDelta::try_seconds(count),
        "min" | "T" | "m" => TimeDelta::try_minutes(count),
        "h" | "H" => TimeDelta::try_hours(count),
        "D" | "d" => TimeDelta::try_days(count),
        "W" | "w" => TimeDelta::try_weeks(count),
        _ => {
            return Err(WoomError::config(format!(
                "invalid duration unit in '{original}'"
            )));
        }
    };
    delta.ok_or_else(|| WoomError::config(format!("duration out of range: '{original}'")))
}

/// Parse a date given as `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS]` or RFC 3339.
///
/// Timezone-aware inputs are converted to UTC; naive inputs are taken as-is.
pub fn parse_date(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for fmt in [DATE_FORMAT, "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| WoomError::config(format!("invalid date '{s}'")))
}

/// Floor a date to a multiple of `granularity` (counted from midnight for
/// sub-daily granularities, from the Unix epoch otherwise).
pub fn round_date(date: NaiveDateTime, granularity: TimeDelta) -> NaiveDateTime {
    let step = granularity.num_seconds();
    if step <= 0 {
        return date;
    }
    let secs = if step < 86_400 {
        date.num_seconds_from_midnight() as i64
    } else {
        date.and_utc().timestamp()
    };
    let floored = secs - secs.rem_euclid(step);
    date.with_nanosecond(0).unwrap_or(date) - TimeDelta::seconds(secs - floored)
}

/// Inputs for [`gen_cycles`].
#[derive(Debug, Clone, Default)]
pub struct CycleSpec {
    pub begin: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub freq: Option<Freq>,
    pub ncycles: Option<usize>,
    pub round: Option<TimeDelta>,
}

/// Generate the ordered cycle sequence covering `[begin, end)`.
///
/// - `end` + `freq`: consecutive steps of `freq`; the last cycle is clipped
///   to `end`.
/// - `end` + `ncycles`: `ncycles` equal intervals.
/// - `end` alone: a single cycle.
/// - `freq` + `ncycles` without `end`: `ncycles` steps of `freq`.
pub fn gen_cycles(spec: &CycleSpec) -> Result<CycleSeq> {
    let round = |d: NaiveDateTime| match spec.round {
        Some(g) => round_date(d, g),
        None => d,
    };
    let begin = round(
        spec.begin
            .ok_or_else(|| WoomError::config("cycles need a begin date"))?,
    );
    if spec.ncycles == Some(0) {
        return Err(WoomError::config("ncycles must be >= 1"));
    }

    let mut dates = vec![begin];
    match (spec.end.map(round), spec.freq, spec.ncycles) {
        (Some(end), freq, ncycles) => {
            if begin >= end {
                return Err(WoomError::config(format!(
                    "cycle begin date {begin} must be before end date {end}"
                )));
            }
            if let Some(n) = ncycles {
                let parts = i32::try_from(n)
                    .map_err(|_| WoomError::config(format!("too many cycles: {n}")))?;
                let step = (end - begin) / parts;
                if step <= TimeDelta::zero() {
                    return Err(WoomError::config(format!(
                        "cannot split [{begin}, {end}) into {n} cycles"
                    )));
                }
                for i in 1..parts {
                    dates.push(begin + step * i);
                }
            } else if let Some(freq) = freq {
                let mut current = begin;
                loop {
                    let next = freq
                        .advance(current)
                        .ok_or_else(|| WoomError::config("cycle date overflow"))?;
                    if next <= current {
                        return Err(WoomError::config("cycle frequency must be positive"));
                    }
                    if next >= end {
                        break;
                    }
                    dates.push(next);
                    current = next;
                }
            }
            dates.push(end);
        }
        (None, Some(freq), Some(n)) => {
            let mut current = begin;
            for _ in 0..n {
                current = freq
                    .advance(current)
                    .ok_or_else(|| WoomError::config("cycle date overflow"))?;
                dates.push(current);
            }
        }
        _ => {
            return Err(WoomError::config(
                "cycles need an end date, or both freq and ncycles",
            ));
        }
    }

    let mut cycles: Vec<Cycle> = dates
        .windows(2)
        .enumerate()
        .map(|(i, w)| Cycle::new(i, w[0], w[1]))
        .collect();

    let n = cycles.len();
    for (i, cycle) in cycles.iter_mut().enumerate() {
        cycle.is_first = i == 0;
        cycle.is_last = i + 1 == n;
        cycle.prev = i.checked_sub(1);
        cycle.next = (i + 1 < n).then_some(i + 1);
    }

    Ok(CycleSeq { cycles })
}

/// Human readable duration such as `1 days 06:00:00`.
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds();
    let days = total.div_euclid(86_400);
    let rem = total.rem_euclid(86_400);
    format!(
        "{days} days {:02}:{:02}:{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}
