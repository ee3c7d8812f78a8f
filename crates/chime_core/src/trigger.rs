use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coerce::{aliases_for, first_non_null, to_bool, to_epoch_seconds, to_f64};
use crate::diagnostics::Diagnostics;
use crate::matcher::CalendarMatch;

pub const DEFAULT_RADIUS_METERS: f64 = 5.0;
pub const DEFAULT_REPEAT_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown time unit `{0}`")]
pub struct UnknownTimeUnit(pub String);

impl FromStr for TimeUnit {
    type Err = UnknownTimeUnit;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(TimeUnit::Second),
            "minute" => Ok(TimeUnit::Minute),
            "hour" => Ok(TimeUnit::Hour),
            "day" => Ok(TimeUnit::Day),
            "week" => Ok(TimeUnit::Week),
            "month" => Ok(TimeUnit::Month),
            "quarter" => Ok(TimeUnit::Quarter),
            "year" => Ok(TimeUnit::Year),
            _ => Err(UnknownTimeUnit(raw.to_string())),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Quarter => "quarter",
            TimeUnit::Year => "year",
        };
        f.write_str(name)
    }
}

impl TimeUnit {
    fn fixed_seconds(self) -> Option<i64> {
        match self {
            TimeUnit::Second => Some(1),
            TimeUnit::Minute => Some(60),
            TimeUnit::Hour => Some(3_600),
            TimeUnit::Day => Some(86_400),
            TimeUnit::Week => Some(604_800),
            TimeUnit::Month | TimeUnit::Quarter | TimeUnit::Year => None,
        }
    }

    fn months(self) -> u32 {
        match self {
            TimeUnit::Quarter => 3,
            TimeUnit::Year => 12,
            _ => 1,
        }
    }

    /// Moves `from` (epoch seconds) forward by `steps` units. Month based units
    /// follow the calendar, clamping to the last day of shorter months.
    pub fn advance(self, from: i64, steps: u32) -> Option<i64> {
        if let Some(seconds) = self.fixed_seconds() {
            return from.checked_add(seconds.checked_mul(i64::from(steps))?);
        }
        let start = DateTime::from_timestamp(from, 0)?;
        let months = self.months().checked_mul(steps)?;
        start
            .checked_add_months(Months::new(months))
            .map(|date| date.timestamp())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repeat {
    pub unit: TimeUnit,
    pub count: u32,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub interval: u32,
}

fn one() -> u32 {
    1
}

fn is_one(value: &u32) -> bool {
    *value == 1
}

/// Canonical trigger. Relative delays never reach this type; they are
/// resolved into `Calendar` against the clock at construction time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Calendar {
        at: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repeat: Option<Repeat>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<i64>,
    },
    /// Repeats on calendar components, first firing at or after `after`.
    Match {
        after: i64,
        rule: CalendarMatch,
        count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<i64>,
    },
    Location {
        center: [f64; 2],
        radius: f64,
        notify_on_entry: bool,
        notify_on_exit: bool,
        single: bool,
    },
}

impl Trigger {
    pub fn at(at: i64) -> Self {
        Trigger::Calendar {
            at,
            repeat: None,
            before: None,
        }
    }

    pub fn is_repeating(&self) -> bool {
        matches!(
            self,
            Trigger::Calendar {
                repeat: Some(_),
                ..
            } | Trigger::Match { .. }
        )
    }

    /// Whether the trigger can fire after its first delivery. Location
    /// triggers fire on every crossing unless `single`.
    pub fn fires_again(&self) -> bool {
        match self {
            Trigger::Location { single, .. } => !single,
            _ => self.is_repeating(),
        }
    }

    pub fn first_fire_at(&self) -> Option<i64> {
        match self {
            Trigger::Calendar { at, .. } => Some(*at),
            Trigger::Match { after, rule, .. } => rule.next_at_or_after(*after),
            Trigger::Location { .. } => None,
        }
    }

    /// Every fire time of a time-based trigger, bounded by `count` and `before`.
    pub fn occurrences(&self) -> Vec<i64> {
        match self {
            Trigger::Calendar {
                at,
                repeat: None,
                before,
            } => Some(*at).filter(within(*before)).into_iter().collect(),
            Trigger::Calendar {
                at,
                repeat: Some(repeat),
                before,
            } => (0..repeat.count)
                .map_while(|index| repeat.unit.advance(*at, index.checked_mul(repeat.interval)?))
                .take_while(within(*before))
                .collect(),
            Trigger::Match {
                after,
                rule,
                count,
                before,
            } => std::iter::successors(rule.next_at_or_after(*after), |previous| {
                rule.next_at_or_after(previous.checked_add(60)?)
            })
            .take(*count as usize)
            .take_while(within(*before))
            .collect(),
            Trigger::Location { .. } => Vec::new(),
        }
    }
}

fn within(before: Option<i64>) -> impl Fn(&i64) -> bool {
    move |time| before.map_or(true, |limit| *time < limit)
}

/// The ways a request can express when it should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Date,
    Timespan,
    Interval,
    Match,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveContext {
    pub now: i64,
    pub default_repeat_count: u32,
}

impl ResolveContext {
    pub fn new(now: i64) -> Self {
        Self {
            now,
            default_repeat_count: DEFAULT_REPEAT_COUNT,
        }
    }

    pub fn default_count_for(&self, _unit: TimeUnit) -> u32 {
        self.default_repeat_count.max(1)
    }
}

pub fn classify(raw_trigger: &Map<String, Value>, raw_options: &Map<String, Value>) -> TriggerKind {
    let is_location = first_non_null(raw_trigger, &["center"]).is_some()
        || raw_trigger.get("type").and_then(Value::as_str) == Some("location");
    if is_location {
        TriggerKind::Location
    } else if first_non_null(raw_trigger, &["in"]).is_some() {
        TriggerKind::Timespan
    } else {
        match raw_every(raw_trigger, raw_options) {
            Some(Value::Object(_)) => TriggerKind::Match,
            Some(_) => TriggerKind::Interval,
            None => TriggerKind::Date,
        }
    }
}

fn raw_every<'m>(
    raw_trigger: &'m Map<String, Value>,
    raw_options: &'m Map<String, Value>,
) -> Option<&'m Value> {
    first_non_null(raw_trigger, &["every"]).or_else(|| first_non_null(raw_options, &["every"]))
}

pub fn resolve_trigger(
    raw_trigger: &Map<String, Value>,
    raw_options: &Map<String, Value>,
    ctx: &ResolveContext,
    diags: &mut Diagnostics,
) -> Trigger {
    match classify(raw_trigger, raw_options) {
        TriggerKind::Location => resolve_location(raw_trigger, diags),
        TriggerKind::Timespan => resolve_timespan(raw_trigger, ctx, diags),
        TriggerKind::Match => resolve_match(raw_trigger, raw_options, ctx, diags),
        TriggerKind::Date | TriggerKind::Interval => {
            let at = resolve_at(raw_trigger, raw_options, ctx, diags);
            let before = first_non_null(raw_trigger, &["before"])
                .and_then(|value| to_epoch_seconds(value, diags));
            let repeat = resolve_repeat(raw_trigger, raw_options, ctx, diags);
            Trigger::Calendar { at, repeat, before }
        }
    }
}

fn resolve_at(
    raw_trigger: &Map<String, Value>,
    raw_options: &Map<String, Value>,
    ctx: &ResolveContext,
    diags: &mut Diagnostics,
) -> i64 {
    first_non_null(raw_trigger, &["at", "firstAt"])
        .or_else(|| first_non_null(raw_options, aliases_for("at")))
        .and_then(|value| to_epoch_seconds(value, diags))
        .unwrap_or(ctx.now)
}

fn resolve_repeat(
    raw_trigger: &Map<String, Value>,
    raw_options: &Map<String, Value>,
    ctx: &ResolveContext,
    diags: &mut Diagnostics,
) -> Option<Repeat> {
    let every = raw_every(raw_trigger, raw_options)?;

    let (unit, interval) = match every {
        Value::String(name) => (parse_unit(name, diags)?, 1),
        Value::Number(_) => {
            let unit = match first_non_null(raw_trigger, &["unit"]) {
                Some(Value::String(name)) => parse_unit(name, diags)?,
                _ => TimeUnit::Second,
            };
            let ticks = to_f64(every).unwrap_or(0.0).trunc();
            if ticks < 1.0 {
                diags.warn("trigger.every", format!("interval {ticks} is not positive, using 1"));
            }
            (unit, ticks.clamp(1.0, f64::from(u32::MAX)) as u32)
        }
        other => {
            diags.warn(
                "trigger.every",
                format!("unsupported repeat specification {other}, scheduling once"),
            );
            return None;
        }
    };

    Some(Repeat {
        unit,
        count: resolve_count(raw_trigger, ctx.default_count_for(unit), diags),
        interval,
    })
}

fn resolve_count(raw_trigger: &Map<String, Value>, default: u32, diags: &mut Diagnostics) -> u32 {
    match first_non_null(raw_trigger, &["count"]).and_then(to_f64) {
        Some(count) if count >= 1.0 => count.trunc().min(f64::from(u32::MAX)) as u32,
        Some(count) => {
            diags.warn("trigger.count", format!("count {count} is below 1, using 1"));
            1
        }
        None => default,
    }
}

fn resolve_match(
    raw_trigger: &Map<String, Value>,
    raw_options: &Map<String, Value>,
    ctx: &ResolveContext,
    diags: &mut Diagnostics,
) -> Trigger {
    let after = resolve_at(raw_trigger, raw_options, ctx, diags);
    let before = first_non_null(raw_trigger, &["before"])
        .and_then(|value| to_epoch_seconds(value, diags));
    let rule = match raw_every(raw_trigger, raw_options) {
        Some(Value::Object(components)) => CalendarMatch::from_value(components, diags),
        _ => None,
    };
    let Some(rule) = rule else {
        return Trigger::Calendar {
            at: after,
            repeat: None,
            before,
        };
    };
    Trigger::Match {
        after,
        rule,
        count: resolve_count(raw_trigger, ctx.default_repeat_count.max(1), diags),
        before,
    }
}

fn parse_unit(name: &str, diags: &mut Diagnostics) -> Option<TimeUnit> {
    match name.parse::<TimeUnit>() {
        Ok(unit) => Some(unit),
        Err(err) => {
            diags.warn("trigger.every", format!("{err}, scheduling once"));
            None
        }
    }
}

fn resolve_timespan(
    raw_trigger: &Map<String, Value>,
    ctx: &ResolveContext,
    diags: &mut Diagnostics,
) -> Trigger {
    let unit = match first_non_null(raw_trigger, &["unit"]) {
        Some(Value::String(name)) => name.parse::<TimeUnit>().unwrap_or_else(|err| {
            diags.warn("trigger.unit", format!("{err}, using seconds"));
            TimeUnit::Second
        }),
        _ => TimeUnit::Second,
    };
    let amount = first_non_null(raw_trigger, &["in"])
        .and_then(to_f64)
        .unwrap_or_else(|| {
            diags.warn("trigger.in", "delay is not a number, firing now");
            0.0
        });
    let at = if amount < 0.0 {
        diags.warn("trigger.in", format!("negative delay {amount}, firing now"));
        ctx.now
    } else if let Some(seconds) = unit.fixed_seconds() {
        let delay = (amount * seconds as f64).round() as i64;
        ctx.now.checked_add(delay).unwrap_or(ctx.now)
    } else {
        if amount.fract() != 0.0 {
            diags.warn("trigger.in", format!("fractional {unit} delay {amount} truncated"));
        }
        let steps = amount.trunc().min(f64::from(u32::MAX)) as u32;
        unit.advance(ctx.now, steps).unwrap_or(ctx.now)
    };
    let before = first_non_null(raw_trigger, &["before"])
        .and_then(|value| to_epoch_seconds(value, diags));
    Trigger::Calendar {
        at,
        repeat: None,
        before,
    }
}

fn resolve_location(raw_trigger: &Map<String, Value>, diags: &mut Diagnostics) -> Trigger {
    let center = match raw_trigger.get("center") {
        Some(Value::Array(coords)) if coords.len() == 2 => {
            match (to_f64(&coords[0]), to_f64(&coords[1])) {
                (Some(lat), Some(lon)) => [lat, lon],
                _ => invalid_center(diags),
            }
        }
        _ => invalid_center(diags),
    };
    let radius = match first_non_null(raw_trigger, &["radius"]).map(to_f64) {
        None => DEFAULT_RADIUS_METERS,
        Some(Some(radius)) if radius > 0.0 => radius,
        Some(_) => {
            diags.warn("trigger.radius", "radius must be a positive number");
            DEFAULT_RADIUS_METERS
        }
    };
    Trigger::Location {
        center,
        radius,
        notify_on_entry: to_bool(raw_trigger.get("notifyOnEntry"), false),
        notify_on_exit: to_bool(raw_trigger.get("notifyOnExit"), false),
        single: to_bool(raw_trigger.get("single"), false),
    }
}

fn invalid_center(diags: &mut Diagnostics) -> [f64; 2] {
    diags.warn("trigger.center", "center must be a [lat, lon] pair");
    [0.0, 0.0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const NOW: i64 = 1_762_506_000;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn resolve(trigger: Value, options: Value) -> (Trigger, Diagnostics) {
        let mut diags = Diagnostics::new();
        let trigger = resolve_trigger(
            &object(trigger),
            &object(options),
            &ResolveContext::new(NOW),
            &mut diags,
        );
        (trigger, diags)
    }

    #[test]
    fn every_produces_bounded_repeat() {
        let (trigger, _) = resolve(json!({ "every": "minute" }), json!({}));
        match trigger {
            Trigger::Calendar {
                at,
                repeat: Some(repeat),
                ..
            } => {
                assert_eq!(at, NOW);
                assert_eq!(repeat.unit, TimeUnit::Minute);
                assert!(repeat.count >= 1);
            }
            other => panic!("unexpected trigger {other:?}"),
        }
    }

    #[test]
    fn zero_count_is_clamped() {
        let (trigger, diags) = resolve(json!({ "every": "day", "count": 0 }), json!({}));
        let Trigger::Calendar {
            repeat: Some(repeat),
            ..
        } = trigger
        else {
            panic!("expected repeating calendar trigger");
        };
        assert_eq!(repeat.count, 1);
        assert_eq!(diags.for_field("trigger.count").count(), 1);
    }

    #[test]
    fn center_yields_location_with_default_radius() {
        let (trigger, diags) = resolve(json!({ "center": [0, 0] }), json!({}));
        assert_eq!(
            trigger,
            Trigger::Location {
                center: [0.0, 0.0],
                radius: 5.0,
                notify_on_entry: false,
                notify_on_exit: false,
                single: false,
            }
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn empty_trigger_fires_now() {
        let (trigger, _) = resolve(json!({}), json!({}));
        assert_eq!(trigger, Trigger::at(NOW));
    }

    #[test]
    fn legacy_top_level_fields_are_honoured() {
        let (trigger, _) = resolve(json!({}), json!({ "firstAt": NOW + 60, "every": "hour" }));
        assert!(trigger.is_repeating());
        assert_eq!(trigger.first_fire_at(), Some(NOW + 60));
    }

    #[test]
    fn trigger_at_wins_over_legacy_date() {
        let (trigger, _) = resolve(json!({ "at": NOW + 5 }), json!({ "date": NOW + 99 }));
        assert_eq!(trigger.first_fire_at(), Some(NOW + 5));
    }

    #[test]
    fn relative_delay_becomes_calendar() {
        let (trigger, _) = resolve(json!({ "in": 2, "unit": "hour" }), json!({}));
        assert_eq!(trigger, Trigger::at(NOW + 7_200));
    }

    #[test]
    fn fractional_delay_keeps_its_seconds() {
        let (trigger, diags) = resolve(json!({ "in": 1.5, "unit": "hour" }), json!({}));
        assert_eq!(trigger, Trigger::at(NOW + 5_400));
        assert!(diags.is_empty());
    }

    #[test]
    fn fractional_month_delay_is_reported() {
        let (_, diags) = resolve(json!({ "in": 1.5, "unit": "month" }), json!({}));
        assert_eq!(diags.for_field("trigger.in").count(), 1);
    }

    #[test]
    fn every_object_becomes_a_calendar_match() {
        // NOW is 2025-11-07 09:00 UTC
        let (trigger, diags) = resolve(json!({ "every": { "hour": 8, "minute": 0 } }), json!({}));
        assert!(diags.is_empty());
        assert!(trigger.is_repeating());
        let first = Utc.with_ymd_and_hms(2025, 11, 8, 8, 0, 0).unwrap().timestamp();
        assert_eq!(trigger.first_fire_at(), Some(first));
        let occurrences = trigger.occurrences();
        assert_eq!(occurrences.len(), DEFAULT_REPEAT_COUNT as usize);
        assert_eq!(occurrences[1], first + 86_400);
    }

    #[test]
    fn calendar_match_honours_count_and_before() {
        let first = Utc.with_ymd_and_hms(2025, 11, 8, 8, 0, 0).unwrap().timestamp();
        let (trigger, _) = resolve(
            json!({ "every": { "hour": 8 }, "count": 10, "before": first + 2 * 86_400 }),
            json!({}),
        );
        assert_eq!(trigger.occurrences(), vec![first, first + 86_400]);
    }

    #[test]
    fn invalid_calendar_match_schedules_once() {
        let (trigger, diags) = resolve(json!({ "every": { "hour": 99 } }), json!({}));
        assert_eq!(trigger, Trigger::at(NOW));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn single_location_does_not_fire_again() {
        let (single, _) = resolve(json!({ "center": [1, 2], "single": true }), json!({}));
        let (repeating, _) = resolve(json!({ "center": [1, 2] }), json!({}));
        assert!(!single.fires_again());
        assert!(repeating.fires_again());
    }

    #[test]
    fn past_dates_are_kept() {
        let (trigger, _) = resolve(json!({ "at": 1_000 }), json!({}));
        assert_eq!(trigger, Trigger::at(1_000));
    }

    #[test]
    fn unknown_unit_schedules_once() {
        let (trigger, diags) = resolve(json!({ "every": "fortnight" }), json!({}));
        assert!(!trigger.is_repeating());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn numeric_every_uses_unit_ticks() {
        let (trigger, _) = resolve(json!({ "every": 15, "unit": "minute", "count": 3 }), json!({}));
        assert_eq!(trigger.occurrences(), vec![NOW, NOW + 900, NOW + 1_800]);
    }

    #[test]
    fn monthly_occurrences_follow_the_calendar() {
        let at = Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap().timestamp();
        let trigger = Trigger::Calendar {
            at,
            repeat: Some(Repeat {
                unit: TimeUnit::Month,
                count: 2,
                interval: 1,
            }),
            before: None,
        };
        let feb = Utc.with_ymd_and_hms(2025, 2, 28, 9, 0, 0).unwrap().timestamp();
        assert_eq!(trigger.occurrences(), vec![at, feb]);
    }

    #[test]
    fn before_cuts_occurrences_short() {
        let (trigger, _) = resolve(
            json!({ "at": NOW, "every": "day", "count": 10, "before": NOW + 2 * 86_400 }),
            json!({}),
        );
        assert_eq!(trigger.occurrences(), vec![NOW, NOW + 86_400]);
    }

    #[test]
    fn canonical_form_round_trips_through_json() {
        let trigger = Trigger::Calendar {
            at: NOW,
            repeat: Some(Repeat {
                unit: TimeUnit::Week,
                count: 5,
                interval: 1,
            }),
            before: None,
        };
        let encoded = serde_json::to_value(&trigger).unwrap();
        assert_eq!(
            encoded,
            json!({ "type": "calendar", "at": NOW, "repeat": { "unit": "week", "count": 5 } })
        );
        let decoded: Trigger = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, trigger);
    }
}
