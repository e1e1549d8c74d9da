//! Wall-clock schedules for the recurring jobs.
//!
//! Times are interpreted in the configured local offset. The daily reminder
//! fires at 16:30; the monthly report fires at 23:00 on the last day of each
//! month.

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc};
use tracing::{error, info};

/// Local time of the daily reminder run.
#[must_use]
pub fn daily_reminder_time() -> NaiveTime { NaiveTime::from_hms_opt(16, 30, 0).unwrap_or_default() }

/// Local time of the monthly report run.
#[must_use]
pub fn monthly_report_time() -> NaiveTime { NaiveTime::from_hms_opt(23, 0, 0).unwrap_or_default() }

/// Whether tomorrow is the first of a month.
#[must_use]
pub fn is_last_day_of_month(day: NaiveDate) -> bool { day.succ_opt().is_some_and(|next| next.day() == 1) }

fn at_local(day: NaiveDate, at: NaiveTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let utc = day.and_time(at) - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// The first `at` strictly after `now`.
#[must_use]
pub fn next_daily_run(now: DateTime<FixedOffset>, at: NaiveTime) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let today = at_local(now.date_naive(), at, offset);
    if today > now {
        today
    } else {
        at_local(now.date_naive() + Days::new(1), at, offset)
    }
}

/// The first `at` on a last-of-month day strictly after `now`.
#[must_use]
pub fn next_month_end_run(now: DateTime<FixedOffset>, at: NaiveTime) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let mut day = now.date_naive();
    loop {
        if is_last_day_of_month(day) {
            let candidate = at_local(day, at, offset);
            if candidate > now {
                return candidate;
            }
        }
        day = day + Days::new(1);
    }
}

/// Run `task` forever at the instants produced by `next`.
///
/// Failures are logged and the schedule continues.
pub async fn run_schedule<N, F, Fut>(name: &'static str, offset: FixedOffset, next: N, mut task: F)
where
    N: Fn(DateTime<FixedOffset>) -> DateTime<FixedOffset>,
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    loop {
        let now = Utc::now().with_timezone(&offset);
        let due = next(now);
        info!(job = name, at = %due, "next run scheduled");
        tokio::time::sleep((due - now).to_std().unwrap_or_default()).await;
        match task().await {
            Ok(()) => info!(job = name, "scheduled run finished"),
            Err(err) => error!(job = name, error = %format!("{err:#}"), "scheduled run failed"),
        }
    }
}
