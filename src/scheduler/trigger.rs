use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::schedule_entry;

/// When a schedule entry fires: either every fixed number of seconds, or
/// once a day at a wall-clock time (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Interval { seconds: i64 },
    Daily { hour: u32, minute: u32 },
}

impl Trigger {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Trigger::Interval { seconds } if *seconds < 1 => {
                Err("interval must be at least one second".to_string())
            }
            Trigger::Daily { hour, minute } if *hour > 23 || *minute > 59 => {
                Err(format!("invalid daily trigger time {hour:02}:{minute:02}"))
            }
            _ => Ok(()),
        }
    }

    /// The next instant strictly after `after` at which this trigger fires.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Interval { seconds } => after + Duration::seconds((*seconds).max(1)),
            Trigger::Daily { hour, minute } => {
                let today = after
                    .date_naive()
                    .and_hms_opt(*hour, *minute, 0)
                    .expect("validated trigger time");
                let candidate = Utc.from_utc_datetime(&today);
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
        }
    }

    /// Flattened persistence form: (trigger_kind, interval, hour, minute).
    pub fn columns(&self) -> (&'static str, Option<i64>, Option<i32>, Option<i32>) {
        match self {
            Trigger::Interval { seconds } => ("interval", Some(*seconds), None, None),
            Trigger::Daily { hour, minute } => {
                ("daily", None, Some(*hour as i32), Some(*minute as i32))
            }
        }
    }

    pub fn from_entry(entry: &schedule_entry::Model) -> Result<Trigger, String> {
        let trigger = match entry.trigger_kind.as_str() {
            "interval" => {
                let seconds = entry
                    .interval_seconds
                    .ok_or_else(|| "interval entry without interval_seconds".to_string())?;
                Trigger::Interval { seconds }
            }
            "daily" => match (entry.daily_hour, entry.daily_minute) {
                (Some(h), Some(m)) if h >= 0 && m >= 0 => {
                    Trigger::Daily { hour: h as u32, minute: m as u32 }
                }
                _ => return Err("daily entry without valid hour/minute".to_string()),
            },
            other => return Err(format!("unknown trigger kind '{other}'")),
        };
        trigger.validate()?;
        Ok(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_advances_by_exactly_one_period() {
        let trigger = Trigger::Interval { seconds: 300 };
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(t0),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 5, 0).unwrap()
        );
    }

    #[test]
    fn daily_fires_later_the_same_day() {
        let trigger = Trigger::Daily { hour: 22, minute: 30 };
        let morning = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(morning),
            Utc.with_ymd_and_hms(2025, 6, 1, 22, 30, 0).unwrap()
        );
    }

    #[test]
    fn daily_rolls_over_to_the_next_day() {
        let trigger = Trigger::Daily { hour: 3, minute: 0 };
        let evening = Utc.with_ymd_and_hms(2025, 6, 1, 23, 45, 0).unwrap();
        assert_eq!(
            trigger.next_after(evening),
            Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn daily_at_the_exact_fire_time_schedules_tomorrow() {
        let trigger = Trigger::Daily { hour: 3, minute: 0 };
        let exactly = Utc.with_ymd_and_hms(2025, 6, 1, 3, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(exactly),
            Utc.with_ymd_and_hms(2025, 6, 2, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn validation_rejects_nonsense() {
        assert!(Trigger::Interval { seconds: 0 }.validate().is_err());
        assert!(Trigger::Daily { hour: 24, minute: 0 }.validate().is_err());
        assert!(Trigger::Daily { hour: 23, minute: 59 }.validate().is_ok());
    }
}
