//! C1: the cronodate matcher.
//!
//! A `Cronodate` holds, per calendar unit (second, minute, hour,
//! month-day, month, year, weekday), a set of values that unit is
//! allowed to take. A broken-down time matches the whole `Cronodate`
//! when every unit's current value is a member of that unit's set.
//! `next` finds the soonest future broken-down time that matches,
//! advancing unit-by-unit the way a grandfather clock's date wheels
//! would: an out-of-set unit jumps to the next allowed value for that
//! unit, carrying into the unit above it, and every unit below it
//! resets to its minimum.
//!
//! Grounded on `examples/original_source/src/common/libutil/cronodate.c`;
//! the per-unit value sets there are libidset `idset`s, reimplemented
//! here as `BTreeSet<u32>` since the sets are small and ordered
//! iteration (`range`, `first`) is all the algorithm needs.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use cron_kernel::CronError;

/// A calendar unit a [`Cronodate`] can constrain.
///
/// The ordering matters: it is the order `match`/`next` walk units in,
/// and it is what "the next higher unit" means when a unit overflows
/// (month overflow increments year; day overflow increments month; and
/// so on). Weekday is deliberately last — it never participates in
/// carry arithmetic the way the others do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum TmUnit {
    Sec = 0,
    Min = 1,
    Hour = 2,
    Mday = 3,
    Mon = 4,
    Year = 5,
    Wday = 6,
}

pub const TM_MAX_ITEM: usize = 7;
const ALL_UNITS: [TmUnit; TM_MAX_ITEM] = [
    TmUnit::Sec,
    TmUnit::Min,
    TmUnit::Hour,
    TmUnit::Mday,
    TmUnit::Mon,
    TmUnit::Year,
    TmUnit::Wday,
];

/// The year 3000 expressed as `tm_year` (years since 1900), the upper
/// bound the original matcher imposes on the year unit.
const YEAR_MAX_OFFSET: i32 = 3000 - 1900;

impl TmUnit {
    pub fn min(self) -> i32 {
        match self {
            TmUnit::Mday => 1,
            _ => 0,
        }
    }

    pub fn max(self) -> i32 {
        match self {
            TmUnit::Sec => 60, // leap second
            TmUnit::Min => 59,
            TmUnit::Hour => 23,
            TmUnit::Mday => 31,
            TmUnit::Mon => 11,
            TmUnit::Wday => 6,
            TmUnit::Year => YEAR_MAX_OFFSET,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TmUnit::Sec => "second",
            TmUnit::Min => "minute",
            TmUnit::Hour => "hour",
            TmUnit::Mday => "mday",
            TmUnit::Mon => "month",
            TmUnit::Wday => "weekday",
            TmUnit::Year => "year",
        }
    }

    /// The unit one step up the carry chain, for the five units that
    /// participate in carry (year does not carry anywhere; weekday is
    /// handled specially and never consulted here).
    fn next_up(self) -> Option<TmUnit> {
        match self {
            TmUnit::Sec => Some(TmUnit::Min),
            TmUnit::Min => Some(TmUnit::Hour),
            TmUnit::Hour => Some(TmUnit::Mday),
            TmUnit::Mday => Some(TmUnit::Mon),
            TmUnit::Mon => Some(TmUnit::Year),
            TmUnit::Year | TmUnit::Wday => None,
        }
    }
}

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Case-insensitive *prefix* match against the weekday name table, the
/// shortest unambiguous abbreviation onward (`"mon"`, `"Mo"`, and
/// `"MONDAY"` all resolve to Monday).
pub fn string_to_weekday(s: &str) -> Option<i32> {
    let lower = s.to_ascii_lowercase();
    WEEKDAYS
        .iter()
        .position(|name| name.to_ascii_lowercase().starts_with(&lower))
        .map(|i| i as i32)
}

pub fn weekday_to_string(w: i32) -> Option<&'static str> {
    WEEKDAYS.get(w as usize).copied()
}

/// Case-insensitive *prefix* match against the month name table.
pub fn string_to_month(s: &str) -> Option<i32> {
    let lower = s.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|name| name.to_ascii_lowercase().starts_with(&lower))
        .map(|i| i as i32)
}

pub fn month_to_string(m: i32) -> Option<&'static str> {
    MONTHS.get(m as usize).copied()
}

/// A broken-down time, the Rust stand-in for `struct tm`.
///
/// `year` is years-since-1900 and `mon` is zero-based, matching the
/// original's fields exactly so the cronodate algorithm reads the same
/// way in both languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokenDownTime {
    pub sec: i32,
    pub min: i32,
    pub hour: i32,
    pub mday: i32,
    pub mon: i32,
    pub year: i32,
    pub wday: i32,
}

impl BrokenDownTime {
    fn get(self, unit: TmUnit) -> i32 {
        match unit {
            TmUnit::Sec => self.sec,
            TmUnit::Min => self.min,
            TmUnit::Hour => self.hour,
            TmUnit::Mday => self.mday,
            TmUnit::Mon => self.mon,
            TmUnit::Year => self.year,
            TmUnit::Wday => self.wday,
        }
    }

    fn set(&mut self, unit: TmUnit, val: i32) {
        match unit {
            TmUnit::Sec => self.sec = val,
            TmUnit::Min => self.min = val,
            TmUnit::Hour => self.hour = val,
            TmUnit::Mday => self.mday = val,
            TmUnit::Mon => self.mon = val,
            TmUnit::Year => self.year = val,
            TmUnit::Wday => self.wday = val,
        }
    }

    fn incr(&mut self, unit: TmUnit) {
        let v = self.get(unit);
        self.set(unit, v + 1);
    }

    /// Reset every unit below `unit` (in carry order) to its minimum.
    fn reset_below(&mut self, unit: TmUnit) {
        for u in [TmUnit::Mon, TmUnit::Mday, TmUnit::Hour, TmUnit::Min, TmUnit::Sec] {
            if u < unit {
                self.set(u, u.min());
            }
        }
    }

    /// Renormalize out-of-range fields (e.g. `mday = 32`) the way
    /// `mktime` does, and compute the wall-clock weekday for the
    /// result. Interprets fields in the local timezone, as the
    /// original's `mktime`/`localtime_r` pair does.
    fn normalize(self) -> Result<Self, CronError> {
        let base_year = 1900 + self.year;
        let base = NaiveDate::from_ymd_opt(base_year, 1, 1)
            .ok_or(CronError::Overflow)?;
        let date = base
            .checked_add_months(Months::new(self.mon.max(0) as u32))
            .and_then(|d| d.checked_add_days(Days::new((self.mday - 1).max(0) as u64)))
            .ok_or(CronError::Overflow)?;
        let time = NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is always valid");
        let base_dt = NaiveDateTime::new(date, time);
        let extra = chrono::Duration::seconds(
            i64::from(self.hour) * 3600 + i64::from(self.min) * 60 + i64::from(self.sec),
        );
        let dt = base_dt
            .checked_add_signed(extra)
            .ok_or(CronError::Overflow)?;
        let local = chrono::Local
            .from_local_datetime(&dt)
            .single()
            .unwrap_or_else(|| chrono::Local.from_utc_datetime(&dt));
        Ok(BrokenDownTime {
            sec: local.second() as i32,
            min: local.minute() as i32,
            hour: local.hour() as i32,
            mday: local.day() as i32,
            mon: local.month0() as i32,
            year: local.year() - 1900,
            wday: local.weekday().num_days_from_sunday() as i32,
        })
    }

    /// Converts an already-[`normalize`](Self::normalize)d time (so
    /// `sec` is guaranteed in `0..=59`) to epoch seconds.
    fn to_epoch_seconds(self) -> Result<f64, CronError> {
        let base_year = 1900 + self.year;
        let date = NaiveDate::from_ymd_opt(base_year, (self.mon + 1) as u32, self.mday as u32)
            .ok_or(CronError::Overflow)?;
        let time = NaiveTime::from_hms_opt(self.hour as u32, self.min as u32, self.sec as u32)
            .ok_or(CronError::Overflow)?;
        let dt = NaiveDateTime::new(date, time);
        let local = chrono::Local
            .from_local_datetime(&dt)
            .single()
            .unwrap_or_else(|| chrono::Local.from_utc_datetime(&dt));
        Ok(local.timestamp() as f64)
    }

    /// Build a broken-down time from epoch seconds, in local time, the
    /// way `localtime_r` does.
    pub fn from_epoch_seconds(now: f64) -> Result<Self, CronError> {
        let secs = now.floor() as i64;
        let local = chrono::Local
            .timestamp_opt(secs, 0)
            .single()
            .ok_or(CronError::Overflow)?;
        Ok(BrokenDownTime {
            sec: local.second() as i32,
            min: local.minute() as i32,
            hour: local.hour() as i32,
            mday: local.day() as i32,
            mon: local.month0() as i32,
            year: local.year() - 1900,
            wday: local.weekday().num_days_from_sunday() as i32,
        })
    }
}

/// Per-unit allowed-value sets, the engine behind one trigger's
/// schedule (C1).
#[derive(Debug, Clone)]
pub struct Cronodate {
    items: [BTreeSet<u32>; TM_MAX_ITEM],
}

impl Default for Cronodate {
    fn default() -> Self {
        Self::new()
    }
}

impl Cronodate {
    /// An empty matcher: every unit's set starts empty, matching
    /// nothing until filled or explicitly set.
    pub fn new() -> Self {
        Cronodate {
            items: Default::default(),
        }
    }

    /// Every unit's set is the full legal range for that unit —
    /// matches every broken-down time.
    pub fn fillset(&mut self) {
        for unit in ALL_UNITS {
            self.items[unit as usize] = (unit.min()..=unit.max()).map(|v| v as u32).collect();
        }
    }

    /// Clears every unit's set.
    pub fn emptyset(&mut self) {
        for unit in ALL_UNITS {
            self.items[unit as usize].clear();
        }
    }

    /// Replace one unit's set by parsing a range expression:
    /// comma-separated list of `*`, a single value (integer or, for
    /// month/weekday, a case-insensitive name prefix), or an
    /// inclusive `lo-hi` range, each optionally suffixed `/stride`.
    pub fn set(&mut self, unit: TmUnit, range: &str) -> Result<(), CronError> {
        let mut parsed = BTreeSet::new();
        for token in range.split(',') {
            let (body, stride) = match token.split_once('/') {
                Some((b, s)) => (
                    b,
                    s.parse::<i64>()
                        .map_err(|_| CronError::SemanticParse(format!("bad stride {s:?}")))?,
                ),
                None => (token, 1),
            };
            let (lo, hi) = parse_range(body, unit)?;
            if stride <= 0 {
                return Err(CronError::SemanticParse(format!("bad stride {stride}")));
            }
            let mut v = lo;
            while v <= hi {
                parsed.insert(v as u32);
                v += stride;
            }
        }
        self.items[unit as usize] = parsed;
        Ok(())
    }

    /// Replace one unit's set with exactly one value.
    pub fn set_integer(&mut self, unit: TmUnit, value: i32) -> Result<(), CronError> {
        if value < unit.min() || value > unit.max() {
            return Err(CronError::SemanticParse(format!(
                "{value} out of range for {}",
                unit.name()
            )));
        }
        self.items[unit as usize] = BTreeSet::from([value as u32]);
        Ok(())
    }

    /// Re-encode a unit's set back into a minimal comma-separated
    /// range list, for round-tripping through serialization.
    pub fn get(&self, unit: TmUnit) -> String {
        encode_ranges(&self.items[unit as usize])
    }

    /// Does this broken-down time satisfy every unit's set?
    pub fn matches(&self, tm: &BrokenDownTime) -> bool {
        ALL_UNITS
            .iter()
            .all(|&unit| self.items[unit as usize].contains(&(tm.get(unit) as u32)))
    }

    /// Find the next broken-down time, strictly after `tm`, that
    /// matches. Mutates `tm` in place. Errors with
    /// [`CronError::Overflow`] if no match is found within two years.
    pub fn next(&self, tm: &mut BrokenDownTime) -> Result<(), CronError> {
        tm.sec += 1;
        *tm = tm.normalize()?;
        let now = tm.to_epoch_seconds()?;

        'outer: loop {
            for unit in ALL_UNITS {
                let set = &self.items[unit as usize];
                if set.is_empty() {
                    return Err(CronError::Overflow);
                }
                let cur = tm.get(unit) as u32;
                if !set.contains(&cur) {
                    let next_val = set
                        .range(cur + 1..)
                        .next()
                        .copied()
                        .unwrap_or_else(|| *set.iter().next().expect("checked non-empty"));
                    advance(tm, unit, next_val as i32)?;
                    *tm = tm.normalize()?;
                    let t = tm.to_epoch_seconds()?;
                    if (t - now) > 2.0 * 60.0 * 60.0 * 24.0 * 365.0 {
                        return Err(CronError::Overflow);
                    }
                    continue 'outer;
                }
            }
            return Ok(());
        }
    }

    /// Seconds from `now` until the next match, or
    /// [`CronError::Overflow`] if none is found within the search
    /// horizon.
    pub fn remaining(&self, now: f64) -> Result<f64, CronError> {
        let mut tm = BrokenDownTime::from_epoch_seconds(now)?;
        self.next(&mut tm)?;
        let t = tm.to_epoch_seconds()?;
        Ok(t - now)
    }
}

/// Advance `tm`'s `unit` field to `val`, carrying into the unit above
/// and resetting everything below, exactly as the original's
/// `tm_advance` does.
fn advance(tm: &mut BrokenDownTime, unit: TmUnit, val: i32) -> Result<(), CronError> {
    match unit {
        TmUnit::Sec | TmUnit::Min | TmUnit::Hour | TmUnit::Mday | TmUnit::Mon => {
            if tm.get(unit) > val {
                if let Some(up) = unit.next_up() {
                    tm.incr(up);
                }
            }
            tm.set(unit, val);
            tm.reset_below(unit);
        }
        TmUnit::Year => {
            tm.year = val;
            tm.reset_below(TmUnit::Year);
        }
        TmUnit::Wday => {
            if tm.wday > val {
                tm.mday += (7 - tm.wday) + val;
            } else {
                tm.mday += val - tm.wday;
            }
            tm.reset_below(TmUnit::Mday);
        }
    }
    Ok(())
}

fn parse_int_or_name(s: &str, unit: TmUnit) -> Option<i32> {
    if let Ok(n) = s.trim().parse::<i32>() {
        return Some(n);
    }
    match unit {
        TmUnit::Wday => string_to_weekday(s),
        TmUnit::Mon => string_to_month(s),
        _ => None,
    }
}

fn parse_range(r: &str, unit: TmUnit) -> Result<(i32, i32), CronError> {
    if r == "*" {
        return Ok((unit.min(), unit.max()));
    }
    if let Some((lo_s, hi_s)) = r.split_once('-') {
        let lo = parse_int_or_name(lo_s, unit)
            .ok_or_else(|| CronError::SemanticParse(format!("bad range bound {lo_s:?}")))?;
        let hi = parse_int_or_name(hi_s, unit)
            .ok_or_else(|| CronError::SemanticParse(format!("bad range bound {hi_s:?}")))?;
        Ok((lo, hi))
    } else {
        let v = parse_int_or_name(r, unit)
            .ok_or_else(|| CronError::SemanticParse(format!("bad value {r:?}")))?;
        Ok((v, v))
    }
}

fn encode_ranges(set: &BTreeSet<u32>) -> String {
    let mut parts = Vec::new();
    let mut iter = set.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if next == end + 1 {
                end = next;
                iter.next();
            } else {
                break;
            }
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(",")
}

impl fmt::Display for Cronodate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for unit in ALL_UNITS {
            write!(f, "{}={} ", unit.name(), self.get(unit))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_prefix_matching_is_case_insensitive() {
        assert_eq!(string_to_weekday("mon"), Some(1));
        assert_eq!(string_to_weekday("Mo"), Some(1));
        assert_eq!(string_to_weekday("MONDAY"), Some(1));
        assert_eq!(string_to_weekday("sun"), Some(0));
    }

    #[test]
    fn month_prefix_prefers_first_table_entry() {
        // "m" is a prefix of both March and May; March comes first.
        assert_eq!(string_to_month("m"), Some(2));
        assert_eq!(string_to_month("may"), Some(4));
    }

    #[test]
    fn set_wildcard_fills_full_range() {
        let mut d = Cronodate::new();
        d.set(TmUnit::Hour, "*").unwrap();
        assert_eq!(d.get(TmUnit::Hour), "0-23");
    }

    #[test]
    fn set_parses_list_and_ranges() {
        let mut d = Cronodate::new();
        d.set(TmUnit::Min, "0,15,30,45").unwrap();
        assert_eq!(d.get(TmUnit::Min), "0,15,30,45");
    }

    #[test]
    fn set_parses_stride() {
        let mut d = Cronodate::new();
        d.set(TmUnit::Min, "0-59/15").unwrap();
        assert_eq!(d.get(TmUnit::Min), "0,15,30,45");
    }

    #[test]
    fn set_integer_rejects_out_of_range() {
        let mut d = Cronodate::new();
        assert!(d.set_integer(TmUnit::Hour, 24).is_err());
        assert!(d.set_integer(TmUnit::Mday, 0).is_err());
    }

    #[test]
    fn fillset_matches_everything() {
        let mut d = Cronodate::new();
        d.fillset();
        let tm = BrokenDownTime {
            sec: 30,
            min: 12,
            hour: 8,
            mday: 15,
            mon: 5,
            year: 124,
            wday: 3,
        };
        assert!(d.matches(&tm));
    }

    #[test]
    fn emptyset_matches_nothing() {
        let mut d = Cronodate::new();
        d.fillset();
        d.emptyset();
        let tm = BrokenDownTime {
            sec: 0,
            min: 0,
            hour: 0,
            mday: 1,
            mon: 0,
            year: 124,
            wday: 0,
        };
        assert!(!d.matches(&tm));
    }

    #[test]
    fn next_on_every_minute_advances_one_minute() {
        let mut d = Cronodate::new();
        d.fillset();
        d.set(TmUnit::Sec, "0").unwrap();
        let mut tm = BrokenDownTime {
            sec: 30,
            min: 10,
            hour: 8,
            mday: 15,
            mon: 5,
            year: 124,
            wday: 3,
        };
        d.next(&mut tm).unwrap();
        assert_eq!(tm.sec, 0);
        assert_eq!(tm.min, 11);
    }

    #[test]
    fn next_overflows_when_set_is_empty() {
        let d = Cronodate::new();
        let mut tm = BrokenDownTime::from_epoch_seconds(1_700_000_000.0).unwrap();
        assert!(matches!(d.next(&mut tm), Err(CronError::Overflow)));
    }

    #[test]
    fn next_weekly_monday_8am_from_mid_week_lands_on_the_following_monday() {
        // §8 scenario 3: {second:"0", minute:"0", hour:"8", weekday:"1"}
        // starting 2016-06-01 10:45:00 (a Wednesday) lands on
        // 2016-06-06 08:00:00, then the subsequent call lands a week later.
        let mut d = Cronodate::new();
        d.fillset();
        d.set(TmUnit::Sec, "0").unwrap();
        d.set(TmUnit::Min, "0").unwrap();
        d.set(TmUnit::Hour, "8").unwrap();
        d.set(TmUnit::Wday, "1").unwrap();

        let mut tm = BrokenDownTime {
            sec: 0,
            min: 45,
            hour: 10,
            mday: 1,
            mon: 5,
            year: 116,
            wday: 3,
        };
        d.next(&mut tm).unwrap();
        assert_eq!((tm.year, tm.mon, tm.mday, tm.hour, tm.min, tm.sec), (116, 5, 6, 8, 0, 0));
        assert_eq!(tm.wday, 1);

        tm.sec += 1;
        d.next(&mut tm).unwrap();
        assert_eq!((tm.year, tm.mon, tm.mday, tm.hour, tm.min, tm.sec), (116, 5, 13, 8, 0, 0));
    }

    #[test]
    fn next_rolls_minute_59_into_the_next_hour() {
        let mut d = Cronodate::new();
        d.fillset();
        let mut tm = BrokenDownTime {
            sec: 59,
            min: 59,
            hour: 10,
            mday: 15,
            mon: 5,
            year: 124,
            wday: 3,
        };
        d.next(&mut tm).unwrap();
        assert_eq!((tm.hour, tm.min, tm.sec), (11, 0, 0));
    }

    #[test]
    fn next_rolls_year_boundary_on_dec_31() {
        let mut d = Cronodate::new();
        d.fillset();
        d.set(TmUnit::Mon, "0").unwrap();
        d.set(TmUnit::Mday, "1").unwrap();
        let mut tm = BrokenDownTime {
            sec: 59,
            min: 59,
            hour: 23,
            mday: 31,
            mon: 11,
            year: 124,
            wday: 2,
        };
        d.next(&mut tm).unwrap();
        assert_eq!(tm.year, 125);
        assert_eq!(tm.mon, 0);
        assert_eq!(tm.mday, 1);
        assert_eq!((tm.hour, tm.min, tm.sec), (0, 0, 0));
    }

    #[test]
    fn remaining_is_positive_for_a_future_match() {
        let mut d = Cronodate::new();
        d.fillset();
        // Only match a second value five seconds ahead of "now" isn't
        // deterministic across the minute boundary, so instead assert
        // the basic invariant: remaining() for a fully wild schedule
        // is small (within a second, since every second matches).
        let now = 1_700_000_000.0;
        let rem = d.remaining(now).unwrap();
        assert!(rem >= 1.0 && rem < 2.0);
    }
}
