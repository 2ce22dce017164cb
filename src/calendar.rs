//! # Calendar: Business Days, Appointment Slots, Korean Time
//!
//! Appointments are booked in Korea Standard Time. A date is bookable when
//! it is a weekday, not one of the fixed public holidays, and no earlier
//! than two business days after today. Slots are half-hour marks from 8am
//! to 5:30pm, split into a morning and an afternoon group.
//!
//! Also owns the `ko-KR` renderings used in spreadsheet rows and email
//! bodies (`2026. 2. 13. 오후 3:05:09`), plus the inverse parser the daily
//! digest uses to count rows.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc,
    Weekday,
};
use serde::Serialize;

/// Month-day pairs closed every year.
const FIXED_HOLIDAYS: [(u32, u32); 8] = [
    (1, 1),
    (3, 1),
    (5, 5),
    (6, 6),
    (8, 15),
    (10, 3),
    (10, 9),
    (12, 25),
];

pub const MORNING_SLOTS: [&str; 8] = [
    "8am", "8:30am", "9am", "9:30am", "10am", "10:30am", "11am", "11:30am",
];

pub const AFTERNOON_SLOTS: [&str; 12] = [
    "12pm", "12:30pm", "1pm", "1:30pm", "2pm", "2:30pm", "3pm", "3:30pm", "4pm", "4:30pm",
    "5pm", "5:30pm",
];

/// Business days between today and the earliest bookable date.
pub const LEAD_BUSINESS_DAYS: u32 = 2;

/// UTC+9, no daylight saving.
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("+09:00 is a valid offset")
}

pub fn now_kst() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&kst())
}

pub fn today_kst() -> NaiveDate {
    now_kst().date_naive()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_holiday(date: NaiveDate) -> bool {
    FIXED_HOLIDAYS.contains(&(date.month(), date.day()))
}

pub fn is_business_day(date: NaiveDate) -> bool {
    !is_weekend(date) && !is_holiday(date)
}

/// Earliest bookable date: walk forward from `today` until two business
/// days have been counted. `today` itself never counts.
pub fn minimum_date(today: NaiveDate) -> NaiveDate {
    let mut date = today;
    let mut added = 0;
    while added < LEAD_BUSINESS_DAYS {
        date += Duration::days(1);
        if is_business_day(date) {
            added += 1;
        }
    }
    date
}

pub fn is_bookable(date: NaiveDate, today: NaiveDate) -> bool {
    date >= minimum_date(today) && is_business_day(date)
}

pub fn is_valid_slot(slot: &str) -> bool {
    MORNING_SLOTS.contains(&slot) || AFTERNOON_SLOTS.contains(&slot)
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSlots {
    pub morning: Vec<&'static str>,
    pub afternoon: Vec<&'static str>,
}

pub fn time_slots() -> TimeSlots {
    TimeSlots {
        morning: MORNING_SLOTS.to_vec(),
        afternoon: AFTERNOON_SLOTS.to_vec(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCell {
    pub date: NaiveDate,
    pub day: u32,
    /// 0 = Sunday, matching the grid's column order.
    pub weekday: u32,
    pub is_holiday: bool,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    /// Empty cells before the 1st in a Sunday-first grid.
    pub leading_blanks: u32,
    pub minimum_date: NaiveDate,
    pub days: Vec<DayCell>,
}

/// Availability for every day of a month. `None` for an invalid month.
pub fn month_grid(year: i32, month: u32, today: NaiveDate) -> Option<MonthGrid> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let min = minimum_date(today);
    let days = first
        .iter_days()
        .take_while(|d| d.month() == month)
        .map(|date| DayCell {
            date,
            day: date.day(),
            weekday: date.weekday().num_days_from_sunday(),
            is_holiday: is_holiday(date),
            is_available: date >= min && is_business_day(date),
        })
        .collect();
    Some(MonthGrid {
        year,
        month,
        leading_blanks: first.weekday().num_days_from_sunday(),
        minimum_date: min,
        days,
    })
}

// ── ko-KR rendering ─────────────────────────────────────────────

/// `2026. 2. 13.`
pub fn format_kst_date(date: NaiveDate) -> String {
    format!("{}. {}. {}.", date.year(), date.month(), date.day())
}

fn format_clock(time: NaiveTime) -> String {
    let (pm, hour12) = time.hour12();
    format!(
        "{} {}:{:02}:{:02}",
        if pm { "오후" } else { "오전" },
        hour12,
        time.minute(),
        time.second()
    )
}

/// `2026. 2. 13. 오후 3:05:09` in Korea Standard Time.
pub fn format_kst(ts: DateTime<Utc>) -> String {
    let local = ts.with_timezone(&kst()).naive_local();
    format!("{} {}", format_kst_date(local.date()), format_clock(local.time()))
}

/// `오후 3:05` style, used for chat transcript lines.
pub fn format_kst_time(ts: DateTime<Utc>) -> String {
    let local = ts.with_timezone(&kst()).time();
    let (pm, hour12) = local.hour12();
    format!(
        "{} {:02}:{:02}",
        if pm { "오후" } else { "오전" },
        hour12,
        local.minute()
    )
}

/// Inverse of [`format_kst`], yielding the local (KST) wall-clock time.
/// Accepts the date-only form too, at midnight.
pub fn parse_kst(s: &str) -> Option<NaiveDateTime> {
    let parts: Vec<&str> = s
        .split(|c: char| c == '.' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 3 {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
    )?;
    if parts.len() == 3 {
        return date.and_hms_opt(0, 0, 0);
    }
    let (meridiem, clock) = match parts.len() {
        5 => (parts[3], parts[4]),
        4 => ("", parts[3]),
        _ => return None,
    };
    let mut fields = clock.split(':');
    let mut hour: u32 = fields.next()?.parse().ok()?;
    let minute: u32 = fields.next()?.parse().ok()?;
    let second: u32 = fields.next().map(|s| s.parse().ok()).unwrap_or(Some(0))?;
    match meridiem {
        "오전" if hour == 12 => hour = 0,
        "오후" if hour < 12 => hour += 12,
        "오전" | "오후" | "" => {}
        _ => return None,
    }
    date.and_hms_opt(hour, minute, second)
}
