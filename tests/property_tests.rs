//! Property-based tests for the pure lead-handling rules.
//!
//! # Prerequisites
//!
//! - No database or network access required.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test property_tests
//!
//! # Increase case count for thorough testing (default is 256):
//! PROPTEST_CASES=10000 cargo test --test property_tests
//! ```
//!
//! Properties are grouped by module: pricing, phone normalisation, the
//! booking calendar, chat session ids and the digest scheduler.

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use proptest::prelude::*;
use saltleads::calendar::{self, format_kst, is_business_day, minimum_date, month_grid, parse_kst};
use saltleads::chat::validate_session_id;
use saltleads::digest::next_run;
use saltleads::pricing::{self, Quote, MAX_PRICED_CAMERAS, MIN_CAMERAS};
use saltleads::wizard::normalize_phone;

fn any_date() -> impl Strategy<Value = NaiveDate> {
    (2024i32..2030, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

// == Pricing ===================================================================

proptest! {
    /// Quotes depend only on the total, never on the indoor/outdoor split.
    #[test]
    fn prop_quote_depends_on_total(indoor in 0u32..40, outdoor in 0u32..40) {
        let total = indoor + outdoor;
        match pricing::quote(indoor, outdoor) {
            Err(_) => prop_assert!(total < MIN_CAMERAS),
            Ok(Quote::Monthly(p)) => {
                prop_assert!((MIN_CAMERAS..=MAX_PRICED_CAMERAS).contains(&total));
                prop_assert_eq!(Some(p), pricing::monthly_price(total));
                prop_assert_eq!(pricing::quote(total, 0).unwrap(), Quote::Monthly(p));
            }
            Ok(Quote::Manual) => prop_assert!(total > MAX_PRICED_CAMERAS),
        }
    }

    /// One more camera never costs less.
    #[test]
    fn prop_price_increases_with_cameras(n in MIN_CAMERAS..MAX_PRICED_CAMERAS) {
        let here = pricing::monthly_price(n).unwrap();
        let next = pricing::monthly_price(n + 1).unwrap();
        prop_assert!(next > here);
    }

    #[test]
    fn prop_no_price_outside_table(
        n in prop_oneof![0u32..MIN_CAMERAS, (MAX_PRICED_CAMERAS + 1)..1000],
    ) {
        prop_assert_eq!(pricing::monthly_price(n), None);
    }
}

// == Phone numbers =============================================================

proptest! {
    /// Eight subscriber digits always come out as `010-XXXX-XXXX`, whatever
    /// separators or prefix the caller typed.
    #[test]
    fn prop_phone_canonical_form(
        prefix in "01[0-9]",
        body in "[0-9]{8}",
        sep in prop_oneof![Just(""), Just("-"), Just(" "), Just(".")],
    ) {
        let raw = format!("{}{}{}{}{}", prefix, sep, &body[..4], sep, &body[4..]);
        let normalized = normalize_phone(&raw).unwrap();
        prop_assert_eq!(&normalized, &format!("010-{}-{}", &body[..4], &body[4..]));
        prop_assert_eq!(normalize_phone(&normalized), Some(normalized.clone()));
    }

    #[test]
    fn prop_phone_wrong_length_rejected(body in "[0-9]{0,7}|[0-9]{9,12}") {
        prop_assert_eq!(normalize_phone(&format!("010{}", body)), None);
    }
}

// == Booking calendar ==========================================================

proptest! {
    /// The earliest bookable date is a business day, strictly after today,
    /// with exactly two business days in (today, min].
    #[test]
    fn prop_minimum_date_two_business_days(today in any_date()) {
        let min = minimum_date(today);
        prop_assert!(min > today);
        prop_assert!(is_business_day(min));
        let counted = today
            .iter_days()
            .skip(1)
            .take_while(|d| *d <= min)
            .filter(|d| is_business_day(*d))
            .count();
        prop_assert_eq!(counted as u32, calendar::LEAD_BUSINESS_DAYS);
        prop_assert!(min - today <= Duration::days(14));
    }

    /// Every day of the month appears once and availability agrees with
    /// `is_bookable`.
    #[test]
    fn prop_month_grid_consistent(today in any_date(), month in 1u32..=12) {
        let year = today.year();
        let grid = month_grid(year, month, today).unwrap();
        let next_first = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
        };
        let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        prop_assert_eq!(grid.days.len() as i64, (next_first - first).num_days());
        prop_assert!(grid.leading_blanks < 7);
        for cell in &grid.days {
            prop_assert_eq!(cell.is_available, calendar::is_bookable(cell.date, today));
        }
    }

    #[test]
    fn prop_invalid_month_has_no_grid(month in prop_oneof![Just(0u32), 13u32..100]) {
        let today = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        prop_assert!(month_grid(2026, month, today).is_none());
    }

    /// Ledger timestamps read back as the same KST wall-clock second.
    #[test]
    fn prop_kst_timestamp_readable(secs in 1_700_000_000i64..1_900_000_000) {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        let parsed = parse_kst(&format_kst(ts)).unwrap();
        prop_assert_eq!(parsed, ts.with_timezone(&calendar::kst()).naive_local());
    }
}

// == Chat session ids ==========================================================

proptest! {
    #[test]
    fn prop_url_safe_session_ids_accepted(id in "[A-Za-z0-9_-]{1,128}") {
        prop_assert!(validate_session_id(&id).is_ok());
    }

    #[test]
    fn prop_session_ids_with_other_chars_rejected(
        head in "[A-Za-z0-9_-]{0,20}",
        bad in "[^A-Za-z0-9_-]",
        tail in "[A-Za-z0-9_-]{0,20}",
    ) {
        let id = format!("{}{}{}", head, bad, tail);
        prop_assert!(validate_session_id(&id).is_err());
    }
}

// == Digest scheduling =========================================================

proptest! {
    /// The next run is within a day, strictly in the future, on the hour.
    #[test]
    fn prop_next_run_within_a_day(
        secs in 1_700_000_000i64..1_900_000_000,
        hour in 0u32..24,
        offset in -12i32..=14,
    ) {
        let now = Utc.timestamp_opt(secs, 0).unwrap();
        let next = next_run(now, hour, offset).unwrap();
        prop_assert!(next > now);
        prop_assert!(next - now <= Duration::hours(24));
        let local = next.with_timezone(&chrono::FixedOffset::east_opt(offset * 3600).unwrap());
        prop_assert_eq!(local.hour(), hour);
        prop_assert_eq!(local.minute(), 0);
    }
}
