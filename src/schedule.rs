//! Recurring event definitions and the arithmetic for when they fire next.
//!
//! All wall-clock values are UTC.

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeDelta, Utc, Weekday};
use serenity::all::{ChannelId, GuildId};
use std::{collections::HashMap, fmt, str::FromStr};

/// Durable definitions keyed by event id
pub type EventTable = HashMap<String, EventDefinition>;

/// Longest allowed interval, in minutes
const MAX_INTERVAL_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum ScheduleError {
    #[display("Missing `{}`", field)]
    MissingField { field: &'static str },
    #[display("Invalid mode `{}`, choose `weekly` or `interval`", mode)]
    InvalidMode { mode: String },
    #[display("Invalid day of week `{}`", day)]
    InvalidDay { day: String },
    #[display("Invalid time `{}`, use 24-hour HH:MM", time)]
    InvalidTime { time: String },
    #[display("Invalid interval `{}`, must be a whole number from 1 minute up to 365 days", value)]
    InvalidInterval { value: String },
    #[display("Next firing is past the representable date range")]
    OutOfRange,
    #[display("Invalid interval unit `{}`, choose `minutes`, `hours` or `days`", unit)]
    InvalidUnit { unit: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    fn minutes(self) -> i64 {
        match self {
            IntervalUnit::Minutes => 1,
            IntervalUnit::Hours => 60,
            IntervalUnit::Days => 60 * 24,
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minute" | "minutes" => Ok(IntervalUnit::Minutes),
            "hour" | "hours" => Ok(IntervalUnit::Hours),
            "day" | "days" => Ok(IntervalUnit::Days),
            _ => Err(ScheduleError::InvalidUnit { unit: s.to_owned() }),
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::Days => "days",
        })
    }
}

/// How an event recurs, as persisted.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Schedule {
    Weekly {
        #[serde(with = "weekday_name")]
        day_of_week: Weekday,
        hour: u32,
        minute: u32,
    },
    Interval {
        interval_value: u32,
        interval_unit: IntervalUnit,
        /// First occurrence.  Restores keep firing on multiples of the interval from here.
        start_time: NaiveDateTime,
    },
}

/// Everything needed to rebuild a live job after a restart
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EventDefinition {
    pub channel_id: ChannelId,
    pub message: String,
    #[serde(flatten)]
    pub schedule: Schedule,
}

/// When a schedule fires, independent of how it is persisted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Weekly {
        day: Weekday,
        time: NaiveTime,
    },
    Interval {
        period: TimeDelta,
        anchor: DateTime<Utc>,
    },
}

impl Trigger {
    /// The first firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match *self {
            Trigger::Weekly { day, time } => {
                let today = now.date_naive();
                let days_ahead = (7 + i64::from(day.num_days_from_monday())
                    - i64::from(today.weekday().num_days_from_monday()))
                    % 7;
                let candidate = today
                    .checked_add_signed(TimeDelta::days(days_ahead))
                    .ok_or(ScheduleError::OutOfRange)?
                    .and_time(time)
                    .and_utc();
                if candidate > now {
                    Ok(candidate)
                } else {
                    candidate
                        .checked_add_signed(TimeDelta::weeks(1))
                        .ok_or(ScheduleError::OutOfRange)
                }
            }
            Trigger::Interval { period, anchor } => {
                if now < anchor {
                    return Ok(anchor);
                }
                // Count whole periods since the anchor instead of adding a period to `now`, so a
                // restart doesn't shift the phase.
                let period_ms = period.num_milliseconds().max(1);
                let elapsed_ms = (now - anchor).num_milliseconds();
                let periods = elapsed_ms / period_ms + 1;
                period_ms
                    .checked_mul(periods)
                    .and_then(TimeDelta::try_milliseconds)
                    .and_then(|offset| anchor.checked_add_signed(offset))
                    .ok_or(ScheduleError::OutOfRange)
            }
        }
    }
}

impl Schedule {
    pub fn trigger(&self) -> Result<Trigger, ScheduleError> {
        match *self {
            Schedule::Weekly {
                day_of_week,
                hour,
                minute,
            } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
                    ScheduleError::InvalidTime {
                        time: format!("{hour:02}:{minute:02}"),
                    }
                })?;
                Ok(Trigger::Weekly {
                    day: day_of_week,
                    time,
                })
            }
            Schedule::Interval {
                interval_value,
                interval_unit,
                start_time,
            } => {
                let minutes = i64::from(interval_value) * interval_unit.minutes();
                if !(1..=MAX_INTERVAL_MINUTES).contains(&minutes) {
                    return Err(ScheduleError::InvalidInterval {
                        value: format!("{} {}", interval_value, interval_unit),
                    });
                }
                Ok(Trigger::Interval {
                    period: TimeDelta::minutes(minutes),
                    anchor: start_time.and_utc(),
                })
            }
        }
    }

    /// Human readable summary for listings
    pub fn describe(&self) -> String {
        match self {
            Schedule::Weekly {
                day_of_week,
                hour,
                minute,
            } => format!(
                "Every {} at {:02}:{:02} UTC",
                weekday_name::full(*day_of_week),
                hour,
                minute
            ),
            Schedule::Interval {
                interval_value,
                interval_unit,
                start_time,
            } => format!(
                "Every {} {} from {} UTC",
                interval_value,
                interval_unit,
                start_time.format("%Y-%m-%d %H:%M")
            ),
        }
    }
}

impl EventDefinition {
    /// Build a definition from command arguments following the event name:
    ///
    /// - `weekly <day> <HH:MM> <message...>`
    /// - `interval <value> <unit> <HH:MM> <message...>`
    ///
    /// An interval's `HH:MM` is the first occurrence: today if still ahead, else tomorrow.
    pub fn from_args(
        args: &[&str],
        channel_id: ChannelId,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let arg = |i: usize, field: &'static str| {
            args.get(i)
                .copied()
                .ok_or(ScheduleError::MissingField { field })
        };
        let message = |from: usize| {
            let message = args.get(from..).unwrap_or_default().join(" ");
            if message.trim().is_empty() {
                Err(ScheduleError::MissingField { field: "message" })
            } else {
                Ok(message)
            }
        };

        let mode = arg(0, "mode")?;
        let schedule = match mode.to_ascii_lowercase().as_str() {
            "weekly" => {
                let day = arg(1, "day_of_week")?;
                let day_of_week = Weekday::from_str(day)
                    .map_err(|_| ScheduleError::InvalidDay { day: day.to_owned() })?;
                let time = parse_hh_mm(arg(2, "time")?)?;
                Schedule::Weekly {
                    day_of_week,
                    hour: time.hour,
                    minute: time.minute,
                }
            }
            "interval" => {
                let value = arg(1, "interval_value")?;
                let interval_value = value
                    .parse::<u32>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| ScheduleError::InvalidInterval {
                        value: value.to_owned(),
                    })?;
                let interval_unit = arg(2, "interval_unit")?.parse()?;
                let start = parse_hh_mm(arg(3, "start_time")?)?;
                Schedule::Interval {
                    interval_value,
                    interval_unit,
                    start_time: first_occurrence(start, now),
                }
            }
            _ => {
                return Err(ScheduleError::InvalidMode {
                    mode: mode.to_owned(),
                })
            }
        };

        let message_from = match schedule {
            Schedule::Weekly { .. } => 3,
            Schedule::Interval { .. } => 4,
        };

        // Reject intervals that parse but can't be armed
        schedule.trigger()?;

        Ok(Self {
            channel_id,
            message: message(message_from)?,
            schedule,
        })
    }
}

#[derive(Clone, Copy)]
struct HourMinute {
    hour: u32,
    minute: u32,
}

fn parse_hh_mm(s: &str) -> Result<HourMinute, ScheduleError> {
    let invalid = || ScheduleError::InvalidTime { time: s.to_owned() };
    let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(HourMinute { hour, minute })
}

fn first_occurrence(at: HourMinute, now: DateTime<Utc>) -> NaiveDateTime {
    let today = now
        .date_naive()
        .and_hms_opt(at.hour, at.minute, 0)
        .unwrap_or_else(|| now.naive_utc());
    if today < now.naive_utc() {
        today + TimeDelta::days(1)
    } else {
        today
    }
}

/// Event ids are `<guild id>_<event name>` so one server can't touch another's events.
pub fn event_id(guild_id: GuildId, name: &str) -> String {
    format!("{}{}", guild_prefix(guild_id), name)
}

pub fn guild_prefix(guild_id: GuildId) -> String {
    format!("{}_", guild_id)
}

pub fn event_name(event_id: &str) -> &str {
    event_id
        .split_once('_')
        .map(|(_, name)| name)
        .unwrap_or(event_id)
}

/// Serialize weekdays as lowercase full names; accept anything chrono parses (`mon`, `Monday`...)
mod weekday_name {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn full(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "monday",
            Weekday::Tue => "tuesday",
            Weekday::Wed => "wednesday",
            Weekday::Thu => "thursday",
            Weekday::Fri => "friday",
            Weekday::Sat => "saturday",
            Weekday::Sun => "sunday",
        }
    }

    pub fn serialize<S: Serializer>(day: &Weekday, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(full(*day))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weekday, D::Error> {
        let s = String::deserialize(deserializer)?;
        Weekday::from_str(&s).map_err(|_| serde::de::Error::custom(format!("bad weekday `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn channel() -> ChannelId {
        ChannelId::new(42)
    }

    #[test]
    fn interval_restore_keeps_phase() {
        let anchor = utc(2024, 1, 1, 0, 0);
        let trigger = Trigger::Interval {
            period: TimeDelta::hours(2),
            anchor,
        };

        // restored at 05:10, the next run is 06:00 rather than 07:10
        assert_eq!(
            trigger.next_after(utc(2024, 1, 1, 5, 10)).unwrap(),
            utc(2024, 1, 1, 6, 0)
        );
    }

    #[test]
    fn interval_two_and_a_half_periods_in_fires_at_third() {
        let anchor = utc(2024, 3, 10, 12, 0);
        let period = TimeDelta::minutes(40);
        let trigger = Trigger::Interval { period, anchor };

        let now = anchor + TimeDelta::minutes(100);
        assert_eq!(trigger.next_after(now).unwrap(), anchor + period * 3);
    }

    #[test]
    fn interval_next_is_strictly_future() {
        let anchor = utc(2024, 1, 1, 0, 0);
        let trigger = Trigger::Interval {
            period: TimeDelta::hours(1),
            anchor,
        };

        // exactly on a boundary skips to the following one
        assert_eq!(
            trigger.next_after(utc(2024, 1, 1, 3, 0)).unwrap(),
            utc(2024, 1, 1, 4, 0)
        );
        // before the anchor, the anchor is next
        assert_eq!(trigger.next_after(utc(2023, 12, 31, 22, 0)).unwrap(), anchor);
    }

    #[test]
    fn weekly_next_is_exact() {
        // 2024-01-01 is a Monday
        let trigger = Trigger::Weekly {
            day: Weekday::Wed,
            time: NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
        };

        assert_eq!(
            trigger.next_after(utc(2024, 1, 1, 9, 0)).unwrap(),
            utc(2024, 1, 3, 18, 30)
        );
        assert_eq!(
            trigger.next_after(utc(2024, 1, 3, 18, 29)).unwrap(),
            utc(2024, 1, 3, 18, 30)
        );
        assert_eq!(
            trigger.next_after(utc(2024, 1, 3, 18, 30)).unwrap(),
            utc(2024, 1, 10, 18, 30)
        );
        // weeks later, still Wednesday 18:30
        assert_eq!(
            trigger.next_after(utc(2024, 5, 17, 1, 2)).unwrap(),
            utc(2024, 5, 22, 18, 30)
        );
    }

    #[test]
    fn parse_weekly() {
        let def = EventDefinition::from_args(
            &["weekly", "Friday", "20:15", "Game", "night!"],
            channel(),
            utc(2024, 1, 1, 0, 0),
        )
        .unwrap();

        assert_eq!(
            def,
            EventDefinition {
                channel_id: channel(),
                message: "Game night!".to_owned(),
                schedule: Schedule::Weekly {
                    day_of_week: Weekday::Fri,
                    hour: 20,
                    minute: 15,
                },
            }
        );
    }

    #[test]
    fn parse_interval_start_rolls_to_tomorrow() {
        let now = utc(2024, 1, 1, 12, 0);

        let later = EventDefinition::from_args(&["interval", "2", "hours", "13:00", "hi"], channel(), now)
            .unwrap();
        let earlier =
            EventDefinition::from_args(&["interval", "2", "hours", "11:00", "hi"], channel(), now)
                .unwrap();

        let start = |def: &EventDefinition| match def.schedule {
            Schedule::Interval { start_time, .. } => start_time.and_utc(),
            _ => panic!("not an interval"),
        };
        assert_eq!(start(&later), utc(2024, 1, 1, 13, 0));
        assert_eq!(start(&earlier), utc(2024, 1, 2, 11, 0));
    }

    #[test]
    fn parse_rejects_incomplete_and_invalid() {
        let now = utc(2024, 1, 1, 0, 0);
        let parse = |args: &[&str]| EventDefinition::from_args(args, channel(), now).unwrap_err();

        assert_eq!(parse(&[]), ScheduleError::MissingField { field: "mode" });
        assert_eq!(
            parse(&["monthly"]),
            ScheduleError::InvalidMode {
                mode: "monthly".to_owned()
            }
        );
        assert_eq!(
            parse(&["weekly", "monday"]),
            ScheduleError::MissingField { field: "time" }
        );
        assert_eq!(
            parse(&["weekly", "someday", "10:00", "x"]),
            ScheduleError::InvalidDay {
                day: "someday".to_owned()
            }
        );
        assert_eq!(
            parse(&["weekly", "monday", "24:00", "x"]),
            ScheduleError::InvalidTime {
                time: "24:00".to_owned()
            }
        );
        assert_eq!(
            parse(&["weekly", "monday", "10:00"]),
            ScheduleError::MissingField { field: "message" }
        );
        assert_eq!(
            parse(&["interval", "0", "hours", "10:00", "x"]),
            ScheduleError::InvalidInterval {
                value: "0".to_owned()
            }
        );
        assert_eq!(
            parse(&["interval", "3", "weeks", "10:00", "x"]),
            ScheduleError::InvalidUnit {
                unit: "weeks".to_owned()
            }
        );
    }

    #[test]
    fn persisted_shape() {
        let def = EventDefinition {
            channel_id: channel(),
            message: "ping".to_owned(),
            schedule: Schedule::Interval {
                interval_value: 2,
                interval_unit: IntervalUnit::Hours,
                start_time: utc(2024, 1, 1, 0, 0).naive_utc(),
            },
        };
        let json = serde_json::to_value(&def).unwrap();

        assert_eq!(json["mode"], "interval");
        assert_eq!(json["interval_unit"], "hours");
        assert_eq!(json["start_time"], "2024-01-01T00:00:00");
        assert_eq!(serde_json::from_value::<EventDefinition>(json).unwrap(), def);
    }

    #[test]
    fn weekly_accepts_short_day_names_on_load() {
        let json = serde_json::json!({
            "mode": "weekly",
            "channel_id": "42",
            "day_of_week": "tue",
            "hour": 7,
            "minute": 5,
            "message": "standup",
        });
        let def: EventDefinition = serde_json::from_value(json).unwrap();

        assert_eq!(
            def.schedule,
            Schedule::Weekly {
                day_of_week: Weekday::Tue,
                hour: 7,
                minute: 5
            }
        );
        assert_eq!(def.schedule.describe(), "Every tuesday at 07:05 UTC");
    }

    #[test]
    fn parse_rejects_intervals_longer_than_a_year() {
        let now = utc(2024, 1, 1, 12, 0);
        let parse = |args: &[&str]| EventDefinition::from_args(args, channel(), now);

        assert_eq!(
            parse(&["interval", "4294967295", "days", "13:00", "hi"]).unwrap_err(),
            ScheduleError::InvalidInterval {
                value: "4294967295 days".to_owned()
            }
        );
        assert_eq!(
            parse(&["interval", "366", "days", "13:00", "hi"]).unwrap_err(),
            ScheduleError::InvalidInterval {
                value: "366 days".to_owned()
            }
        );
        assert!(parse(&["interval", "365", "days", "13:00", "hi"]).is_ok());
    }

    #[test]
    fn stored_oversized_interval_cannot_be_armed() {
        let json = serde_json::json!({
            "mode": "interval",
            "channel_id": "42",
            "interval_value": 4294967295u32,
            "interval_unit": "days",
            "start_time": "2024-01-01T13:00:00",
            "message": "hi",
        });
        let def: EventDefinition = serde_json::from_value(json).unwrap();

        assert!(matches!(
            def.schedule.trigger(),
            Err(ScheduleError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn next_firing_past_the_calendar_is_an_error() {
        let anchor = DateTime::<Utc>::MAX_UTC - TimeDelta::days(400);
        let trigger = Trigger::Interval {
            period: TimeDelta::days(365),
            anchor,
        };

        assert_eq!(
            trigger.next_after(anchor).unwrap(),
            anchor + TimeDelta::days(365)
        );
        assert_eq!(
            trigger.next_after(anchor + TimeDelta::days(365)),
            Err(ScheduleError::OutOfRange)
        );

        let weekly = Trigger::Weekly {
            day: Weekday::Mon,
            time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        };
        assert_eq!(
            weekly.next_after(DateTime::<Utc>::MAX_UTC),
            Err(ScheduleError::OutOfRange)
        );
    }

    #[test]
    fn event_ids_are_scoped_by_guild() {
        let id = event_id(GuildId::new(99), "raid_night");
        assert_eq!(id, "99_raid_night");
        assert!(id.starts_with(&guild_prefix(GuildId::new(99))));
        assert_eq!(event_name(&id), "raid_night");
    }
}
