//! # Digest: Daily Consultation Summary
//!
//! Once a day the sales team gets a mail counting consultation requests in
//! the SALT and KT sheets: yesterday, this week (Monday to Sunday) and
//! all-time. Counting is by the timestamp in column B, read as KST wall-clock
//! time; rows without a parseable timestamp only count toward the total when
//! column B is non-empty.
//!
//! The schedule is a wall-clock hour in a fixed UTC offset (7:00 at -5 by
//! default, the sales office's morning).

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::calendar::{self, format_kst_date};
use crate::ledger::{Ledger, Sheet};
use crate::notify::{Notification, Notifier};

/// Timestamp column shared by the consultation sheets.
const TIMESTAMP_COLUMN: usize = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub salt_total: u32,
    pub kt_total: u32,
    pub salt_yesterday: u32,
    pub kt_yesterday: u32,
    pub salt_this_week: u32,
    pub kt_this_week: u32,
    /// `2026. 10. 18.`
    pub yesterday_label: String,
    /// `2026. 10. 19. - 2026. 10. 25.`
    pub week_label: String,
    pub generated_at: DateTime<Utc>,
}

/// Inclusive KST date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    first: NaiveDate,
    last: NaiveDate,
}

impl Window {
    fn contains(&self, d: NaiveDate) -> bool {
        d >= self.first && d <= self.last
    }
}

fn week_of(today: NaiveDate) -> Window {
    let monday = today - ChronoDuration::days(today.weekday().num_days_from_monday() as i64);
    Window {
        first: monday,
        last: monday + ChronoDuration::days(6),
    }
}

fn timestamp(row: &[String]) -> Option<&str> {
    row.get(TIMESTAMP_COLUMN)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn count_in(rows: &[Vec<String>], window: Window) -> u32 {
    rows.iter()
        .filter_map(|r| timestamp(r))
        .filter_map(calendar::parse_kst)
        .filter(|ts| window.contains(ts.date()))
        .count() as u32
}

fn count_stamped(rows: &[Vec<String>]) -> u32 {
    rows.iter().filter(|r| timestamp(r).is_some()).count() as u32
}

/// Count SALT and KT rows relative to `now`'s KST date.
pub fn compute_stats(salt: &[Vec<String>], kt: &[Vec<String>], now: DateTime<Utc>) -> DailyStats {
    let today = now.with_timezone(&calendar::kst()).date_naive();
    let yesterday = today - ChronoDuration::days(1);
    let yesterday_window = Window {
        first: yesterday,
        last: yesterday,
    };
    let week = week_of(today);
    DailyStats {
        salt_total: count_stamped(salt),
        kt_total: count_stamped(kt),
        salt_yesterday: count_in(salt, yesterday_window),
        kt_yesterday: count_in(kt, yesterday_window),
        salt_this_week: count_in(salt, week),
        kt_this_week: count_in(kt, week),
        yesterday_label: format_kst_date(yesterday),
        week_label: format!("{} - {}", format_kst_date(week.first), format_kst_date(week.last)),
        generated_at: now,
    }
}

/// Read both consultation sheets and mail the summary.
pub async fn send_digest(ledger: &dyn Ledger, notifier: &dyn Notifier) -> Result<DailyStats> {
    let salt = ledger.read_rows(Sheet::Salt).await?;
    let kt = ledger.read_rows(Sheet::Kt).await?;
    let stats = compute_stats(&salt, &kt, Utc::now());
    notifier
        .send(&Notification::DailyDigest(stats.clone()))
        .await?;
    Ok(stats)
}

/// Next instant strictly after `now` at `hour:00` in the given offset.
pub fn next_run(now: DateTime<Utc>, hour: u32, utc_offset_hours: i32) -> Option<DateTime<Utc>> {
    let offset = FixedOffset::east_opt(utc_offset_hours.checked_mul(3600)?)?;
    let local = now.with_timezone(&offset);
    let mut date = local.date_naive();
    loop {
        let candidate = offset
            .from_local_datetime(&date.and_hms_opt(hour, 0, 0)?)
            .single()?
            .with_timezone(&Utc);
        if candidate > now {
            return Some(candidate);
        }
        date = date.succ_opt()?;
    }
}

/// Send the digest every day until `cancel` fires. Failures are logged and
/// the next day's run proceeds.
pub async fn run_scheduler(
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    hour: u32,
    utc_offset_hours: i32,
    cancel: CancellationToken,
) {
    loop {
        let now = Utc::now();
        let Some(at) = next_run(now, hour, utc_offset_hours) else {
            warn!(hour, utc_offset_hours, "invalid digest schedule; daily digest disabled");
            return;
        };
        let wait = (at - now).to_std().unwrap_or_default();
        info!(next_run = %at, "daily digest scheduled");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
        match send_digest(ledger.as_ref(), notifier.as_ref()).await {
            Ok(stats) => info!(
                salt_yesterday = stats.salt_yesterday,
                kt_yesterday = stats.kt_yesterday,
                "daily digest sent"
            ),
            Err(e) => warn!(error = %e, "daily digest failed"),
        }
    }
}
