use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronExpr;
use flashclaw_core::types::ScheduleType;

use crate::error::{Result, SchedulerError};

/// Validates `schedule_value` against `schedule_type` (§4.7 "task create must
/// validate the cron/interval/once value before insertion").
pub fn validate(schedule_type: ScheduleType, schedule_value: &str) -> Result<()> {
    match schedule_type {
        ScheduleType::Cron => parse_cron(schedule_value).map(|_| ()),
        ScheduleType::Interval => parse_interval(schedule_value).map(|_| ()),
        ScheduleType::Once => parse_once(schedule_value).map(|_| ()),
    }
}

/// Computes the next run time strictly after `from`, per §4.6:
/// - `cron`: next occurrence via the `cron` crate (configured TZ; UTC here).
/// - `interval`: `from + value_ms`.
/// - `once`: the parsed instant if it's still in the future, else `None`
///   (the caller transitions the task to `completed`).
pub fn next_run_after(
    schedule_type: ScheduleType,
    schedule_value: &str,
    from: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match schedule_type {
        ScheduleType::Cron => {
            let expr = parse_cron(schedule_value)?;
            Ok(expr.after(&from).next())
        }
        ScheduleType::Interval => {
            let ms = parse_interval(schedule_value)?;
            Ok(Some(from + chrono::Duration::milliseconds(ms as i64)))
        }
        ScheduleType::Once => {
            let at = parse_once(schedule_value)?;
            Ok(if at > from { Some(at) } else { None })
        }
    }
}

fn parse_cron(value: &str) -> Result<CronExpr> {
    CronExpr::from_str(value).map_err(|e| SchedulerError::InvalidSchedule(format!("cron: {e}")))
}

fn parse_interval(value: &str) -> Result<u64> {
    let ms: i64 = value
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("not an integer: {value}")))?;
    if ms <= 0 {
        return Err(SchedulerError::InvalidSchedule(
            "interval must be > 0".to_string(),
        ));
    }
    Ok(ms as u64)
}

fn parse_once(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::InvalidSchedule(format!("not ISO-8601: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn interval_advances_by_value() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = next_run_after(ScheduleType::Interval, "60000", from)
            .unwrap()
            .unwrap();
        assert_eq!(next, from + chrono::Duration::milliseconds(60_000));
    }

    #[test]
    fn once_in_the_past_yields_none() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let past = from - chrono::Duration::seconds(1);
        let next = next_run_after(ScheduleType::Once, &past.to_rfc3339(), from).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn once_in_the_future_yields_that_instant() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let future = from + chrono::Duration::seconds(5);
        let next = next_run_after(ScheduleType::Once, &future.to_rfc3339(), from)
            .unwrap()
            .unwrap();
        assert_eq!(next, future);
    }

    #[test]
    fn cron_rejects_garbage() {
        assert!(validate(ScheduleType::Cron, "not a cron expr").is_err());
    }

    #[test]
    fn cron_every_minute_advances() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 30).unwrap();
        let next = next_run_after(ScheduleType::Cron, "0 * * * * * *", from)
            .unwrap()
            .unwrap();
        assert!(next > from);
    }

    #[test]
    fn interval_rejects_zero() {
        assert!(validate(ScheduleType::Interval, "0").is_err());
    }
}
