use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::to_f64;
use crate::diagnostics::Diagnostics;

/// How far ahead to look for a matching day. Eight years always contains a
/// 29 February.
const SEARCH_DAYS: u64 = 8 * 366;

/// Calendar components a repeating trigger fires on, evaluated in UTC.
///
/// Components finer than the finest one given default to zero and coarser
/// ones are free, so `{hour: 8}` fires daily at 08:00 and `{minute: 30}`
/// fires hourly at half past. `weekday` counts from 1 (Monday) to 7.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl CalendarMatch {
    /// Reads an `every` object. Returns `None`, with a diagnostic, when a
    /// component is out of range or nothing matchable is left.
    pub fn from_value(raw: &Map<String, Value>, diags: &mut Diagnostics) -> Option<Self> {
        let mut rule = CalendarMatch::default();
        for (key, value) in raw {
            let (min, max): (u32, u32) = match key.as_str() {
                "minute" => (0, 59),
                "hour" => (0, 23),
                "day" => (1, 31),
                "weekday" => (1, 7),
                "month" => (1, 12),
                "year" => (1970, 9999),
                other => {
                    diags.warn(
                        "trigger.every",
                        format!("matching on `{other}` is not supported, ignored"),
                    );
                    continue;
                }
            };
            let component = to_f64(value)
                .filter(|n| n.fract() == 0.0 && (f64::from(min)..=f64::from(max)).contains(n));
            let Some(component) = component else {
                diags.warn(
                    "trigger.every",
                    format!("`{key}` must be a whole number in {min}..={max}, scheduling once"),
                );
                return None;
            };
            let component = component as u32;
            match key.as_str() {
                "minute" => rule.minute = Some(component),
                "hour" => rule.hour = Some(component),
                "day" => rule.day = Some(component),
                "weekday" => rule.weekday = Some(component),
                "month" => rule.month = Some(component),
                _ => rule.year = Some(component as i32),
            }
        }
        if rule == CalendarMatch::default() {
            diags.warn("trigger.every", "no calendar component to match, scheduling once");
            return None;
        }
        Some(rule)
    }

    fn has_date_part(&self) -> bool {
        self.day.is_some() || self.weekday.is_some() || self.month.is_some() || self.year.is_some()
    }

    fn effective_hour(&self) -> Option<u32> {
        self.hour.or_else(|| self.has_date_part().then_some(0))
    }

    fn effective_minute(&self) -> Option<u32> {
        self.minute
            .or_else(|| (self.hour.is_some() || self.has_date_part()).then_some(0))
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        self.day.map_or(true, |day| date.day() == day)
            && self.month.map_or(true, |month| date.month() == month)
            && self.year.map_or(true, |year| date.year() == year)
            && self
                .weekday
                .map_or(true, |weekday| date.weekday().number_from_monday() == weekday)
    }

    fn first_time_on(&self, floor: Option<NaiveTime>) -> Option<NaiveTime> {
        let hours = self.effective_hour().map_or(0..=23, |hour| hour..=hour);
        for hour in hours {
            let minutes = self.effective_minute().map_or(0..=59, |minute| minute..=minute);
            for minute in minutes {
                let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                if floor.map_or(true, |floor| time >= floor) {
                    return Some(time);
                }
            }
        }
        None
    }

    /// First matching instant at or after `from` (epoch seconds). `None` when
    /// the rule can never match again, e.g. a past `year`.
    pub fn next_at_or_after(&self, from: i64) -> Option<i64> {
        let from = from.checked_add(59)?.div_euclid(60) * 60;
        let start = DateTime::from_timestamp(from, 0)?;
        let first_day = start.date_naive();

        for offset in 0..SEARCH_DAYS {
            let date = first_day.checked_add_days(Days::new(offset))?;
            if self.year.is_some_and(|year| date.year() > year) {
                return None;
            }
            if !self.matches_date(date) {
                continue;
            }
            let floor = (offset == 0).then(|| start.time());
            if let Some(time) = self.first_time_on(floor) {
                return Some(date.and_time(time).and_utc().timestamp());
            }
        }
        None
    }
}
