//! # Wizard: Estimate Flow and Submission Validation
//!
//! The customer-facing estimate is a five-step flow:
//!
//! ```text
//! Selecting ──show_price──▶ PriceShown ──proceed──▶ ContactForm ──submit──▶ Scheduling ──confirm──▶ Submitted
//!     ▲                        │
//!     └──────── restart ───────┘   (emits a non-converted quick estimate)
//! ```
//!
//! [`Wizard`] drives that flow on the client side and yields the
//! [`Submission`] payloads to post. The server never trusts them: the
//! `validate_*` functions re-check phone, counts and appointment against the
//! server's own clock and recompute the price from the table.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::error::ApiError;
use crate::pricing::{self, Quote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateKind {
    /// Mirrored to the 간편견적 sheet.
    #[default]
    Quick,
    /// Full consultation, mirrored to SALT 상담신청.
    Full,
}

impl EstimateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimateKind::Quick => "quick",
            EstimateKind::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(EstimateKind::Quick),
            "full" => Some(EstimateKind::Full),
            _ => None,
        }
    }
}

fn default_camera_type() -> String {
    pricing::DEFAULT_CAMERA_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default = "default_camera_type")]
    pub camera_type: String,
    #[serde(default)]
    pub indoor_count: u32,
    #[serde(default)]
    pub outdoor_count: u32,
    #[serde(default)]
    pub iot_options: Vec<String>,
    #[serde(default)]
    pub special_options: Vec<String>,
}

impl Default for Selection {
    fn default() -> Self {
        Selection {
            camera_type: default_camera_type(),
            indoor_count: 0,
            outdoor_count: 0,
            iot_options: Vec::new(),
            special_options: Vec::new(),
        }
    }
}

impl Selection {
    pub fn total(&self) -> u32 {
        self.indoor_count.saturating_add(self.outdoor_count)
    }

    /// Replace option keys with their display labels.
    pub fn with_labels(mut self) -> Self {
        self.iot_options = self
            .iot_options
            .iter()
            .map(|k| pricing::option_label(&pricing::IOT_OPTIONS, k).to_string())
            .collect();
        self.special_options = self
            .special_options
            .iter()
            .map(|k| pricing::option_label(&pricing::SPECIAL_OPTIONS, k).to_string())
            .collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location_type: String,
    /// One of 네 / 아니요 / CCTV와 함께 설치 희망, kept as free text.
    #[serde(default)]
    pub has_internet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<String>,
}

/// Wire payload for `POST /api/price-estimate` and `/quick`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(rename = "type", default)]
    pub kind: EstimateKind,
    #[serde(default)]
    pub converted: bool,
    #[serde(default)]
    pub initial_selection: Option<Selection>,
    pub current_selection: Selection,
    #[serde(default)]
    pub contact_info: ContactInfo,
    #[serde(default)]
    pub appointment: Appointment,
    #[serde(default)]
    pub price: Option<u32>,
    #[serde(default)]
    pub manual_quote: bool,
}

// ── Phone numbers ───────────────────────────────────────────────

/// Normalise to `010-XXXX-XXXX`: keep digits, force the `010` prefix over
/// the first three, and require exactly eleven digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.starts_with("010") {
        let rest = digits.get(3..).unwrap_or("").to_string();
        digits = format!("010{}", rest);
    }
    if digits.len() != 11 {
        return None;
    }
    Some(format!("010-{}-{}", &digits[3..7], &digits[7..11]))
}

// ── Client-side flow ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    Selecting,
    PriceShown,
    ContactForm,
    Scheduling,
    Submitted,
}

/// Contact step input, before normalisation.
#[derive(Debug, Clone, Default)]
pub struct ContactDraft {
    pub phone_number: String,
    pub address: String,
    pub location_type: String,
    pub has_internet: String,
    pub privacy_consent: bool,
}

/// The two payloads a confirmed wizard produces.
#[derive(Debug, Clone)]
pub struct Confirmed {
    pub full: Submission,
    /// Companion row for the quick sheet, marked converted.
    pub quick: Submission,
}

#[derive(Debug, Clone)]
pub struct Wizard {
    step: Step,
    selection: Selection,
    initial: Option<Selection>,
    quote: Option<Quote>,
    contact: Option<ContactInfo>,
}

impl Default for Wizard {
    fn default() -> Self {
        Self::new()
    }
}

impl Wizard {
    pub fn new() -> Self {
        Wizard {
            step: Step::Selecting,
            selection: Selection::default(),
            initial: None,
            quote: None,
            contact: None,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn quote(&self) -> Option<Quote> {
        self.quote
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    fn expect_step(&self, expected: Step) -> Result<(), ApiError> {
        if self.step != expected {
            return Err(ApiError::Conflict(format!(
                "estimate is at {:?}, expected {:?}",
                self.step, expected
            )));
        }
        Ok(())
    }

    /// Edit the selection. Allowed before the contact step.
    pub fn select(&mut self, selection: Selection) -> Result<(), ApiError> {
        match self.step {
            Step::Selecting | Step::PriceShown => {
                self.selection = selection;
                Ok(())
            }
            other => Err(ApiError::Conflict(format!(
                "selection is locked at {:?}",
                other
            ))),
        }
    }

    /// Price the current selection and capture it as the initial one.
    pub fn show_price(&mut self) -> Result<Quote, ApiError> {
        self.expect_step(Step::Selecting)?;
        let quote = pricing::quote(self.selection.indoor_count, self.selection.outdoor_count)?;
        self.initial = Some(self.selection.clone());
        self.quote = Some(quote);
        self.step = Step::PriceShown;
        Ok(quote)
    }

    /// Abandon after seeing the price. Emits a non-converted quick estimate
    /// with no contact or appointment and returns to `Selecting`.
    pub fn restart(&mut self) -> Result<Submission, ApiError> {
        self.expect_step(Step::PriceShown)?;
        let quote = self.quote.unwrap_or(Quote::Manual);
        let submission = Submission {
            kind: EstimateKind::Quick,
            converted: false,
            initial_selection: self.initial.clone(),
            current_selection: self.selection.clone().with_labels(),
            contact_info: ContactInfo::default(),
            appointment: Appointment::default(),
            price: quote.price(),
            manual_quote: quote.is_manual(),
        };
        self.reset();
        Ok(submission)
    }

    pub fn proceed_to_contact(&mut self) -> Result<(), ApiError> {
        self.expect_step(Step::PriceShown)?;
        self.step = Step::ContactForm;
        Ok(())
    }

    /// Validate the contact form, reporting every missing field at once.
    pub fn submit_contact(&mut self, draft: ContactDraft) -> Result<(), ApiError> {
        self.expect_step(Step::ContactForm)?;
        let mut problems = Vec::new();
        let contact = check_contact(
            ContactInfo {
                phone_number: draft.phone_number,
                address: draft.address,
                location_type: draft.location_type,
                has_internet: draft.has_internet,
            },
            &mut problems,
        );
        if !draft.privacy_consent {
            problems.push("privacyConsent is required".to_string());
        }
        if !problems.is_empty() {
            return Err(ApiError::Validation(problems));
        }
        self.contact = Some(contact);
        self.step = Step::Scheduling;
        Ok(())
    }

    /// Pick the appointment and produce the full + companion quick payloads.
    pub fn confirm(
        &mut self,
        date: NaiveDate,
        slot: &str,
        today: NaiveDate,
    ) -> Result<Confirmed, ApiError> {
        self.expect_step(Step::Scheduling)?;
        let mut problems = Vec::new();
        check_appointment(Some(date), Some(slot), today, &mut problems);
        if !problems.is_empty() {
            return Err(ApiError::Validation(problems));
        }
        let quote = self.quote.unwrap_or(Quote::Manual);
        let full = Submission {
            kind: EstimateKind::Full,
            converted: true,
            initial_selection: self.initial.clone(),
            current_selection: self.selection.clone().with_labels(),
            contact_info: self.contact.clone().unwrap_or_default(),
            appointment: Appointment {
                date: Some(date),
                time: Some(slot.to_string()),
            },
            price: quote.price(),
            manual_quote: quote.is_manual(),
        };
        let quick = Submission {
            kind: EstimateKind::Quick,
            ..full.clone()
        };
        self.step = Step::Submitted;
        Ok(Confirmed { full, quick })
    }

    /// Back to a blank selection.
    pub fn reset(&mut self) {
        *self = Wizard::new();
    }
}

// ── Server-side validation ──────────────────────────────────────

fn check_contact(mut contact: ContactInfo, problems: &mut Vec<String>) -> ContactInfo {
    match normalize_phone(&contact.phone_number) {
        Some(phone) => contact.phone_number = phone,
        None => problems.push("phoneNumber must be a valid 010-XXXX-XXXX number".to_string()),
    }
    contact.address = contact.address.trim().to_string();
    contact.location_type = contact.location_type.trim().to_string();
    contact.has_internet = contact.has_internet.trim().to_string();
    if contact.address.is_empty() {
        problems.push("address is required".to_string());
    }
    if contact.location_type.is_empty() {
        problems.push("locationType is required".to_string());
    }
    if contact.has_internet.is_empty() {
        problems.push("hasInternet is required".to_string());
    }
    contact
}

fn check_appointment(
    date: Option<NaiveDate>,
    slot: Option<&str>,
    today: NaiveDate,
    problems: &mut Vec<String>,
) {
    match date {
        None => problems.push("appointment.date is required".to_string()),
        Some(d) if d < calendar::minimum_date(today) => problems.push(format!(
            "appointment.date must be on or after {}",
            calendar::minimum_date(today)
        )),
        Some(d) if !calendar::is_business_day(d) => {
            problems.push("appointment.date must be a business day".to_string())
        }
        Some(_) => {}
    }
    match slot {
        Some(s) if calendar::is_valid_slot(s) => {}
        Some(s) if !s.is_empty() => {
            problems.push(format!("appointment.time '{}' is not a valid slot", s))
        }
        _ => problems.push("appointment.time is required".to_string()),
    }
}

fn check_counts(selection: &Selection, problems: &mut Vec<String>) -> Option<Quote> {
    match pricing::quote(selection.indoor_count, selection.outdoor_count) {
        Ok(q) => Some(q),
        Err(ApiError::Validation(mut p)) => {
            problems.append(&mut p);
            None
        }
        Err(e) => {
            problems.push(e.to_string());
            None
        }
    }
}

/// Server-side check of a full consultation. Forces `converted = true` and
/// replaces the client's price with the table price.
pub fn validate_full(sub: Submission, today: NaiveDate) -> Result<Submission, ApiError> {
    let mut problems = Vec::new();
    let quote = check_counts(&sub.current_selection, &mut problems);
    let contact = check_contact(sub.contact_info, &mut problems);
    check_appointment(
        sub.appointment.date,
        sub.appointment.time.as_deref(),
        today,
        &mut problems,
    );
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    let quote = quote.unwrap_or(Quote::Manual);
    Ok(Submission {
        kind: EstimateKind::Full,
        converted: true,
        initial_selection: sub.initial_selection,
        current_selection: sub.current_selection.with_labels(),
        contact_info: contact,
        appointment: sub.appointment,
        price: quote.price(),
        manual_quote: quote.is_manual(),
    })
}

/// Server-side check of a quick estimate. A converted one (the companion of
/// a full consultation) is held to the full contact rules; a restart keeps
/// only the selection.
pub fn validate_quick(sub: Submission, today: NaiveDate) -> Result<Submission, ApiError> {
    if sub.converted {
        let full = validate_full(sub, today)?;
        return Ok(Submission {
            kind: EstimateKind::Quick,
            ..full
        });
    }
    let mut problems = Vec::new();
    let quote = check_counts(&sub.current_selection, &mut problems);
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    let quote = quote.unwrap_or(Quote::Manual);
    Ok(Submission {
        kind: EstimateKind::Quick,
        converted: false,
        initial_selection: sub.initial_selection,
        current_selection: sub.current_selection.with_labels(),
        contact_info: ContactInfo::default(),
        appointment: Appointment::default(),
        price: quote.price(),
        manual_quote: quote.is_manual(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn selection(indoor: u32, outdoor: u32) -> Selection {
        Selection {
            indoor_count: indoor,
            outdoor_count: outdoor,
            iot_options: vec!["fire".into()],
            ..Default::default()
        }
    }

    fn good_draft() -> ContactDraft {
        ContactDraft {
            phone_number: "01012345678".into(),
            address: "서울시 강남구".into(),
            location_type: "사무실".into(),
            has_internet: "네".into(),
            privacy_consent: true,
        }
    }

    #[test]
    fn phone_normalisation() {
        assert_eq!(normalize_phone("010-1234-5678").as_deref(), Some("010-1234-5678"));
        assert_eq!(normalize_phone("01012345678").as_deref(), Some("010-1234-5678"));
        assert_eq!(normalize_phone("011 1234 5678").as_deref(), Some("010-1234-5678"));
        assert_eq!(normalize_phone("010-1234-567"), None);
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("010-1234-56789"), None);
    }

    #[test]
    fn show_price_requires_two_cameras() {
        let mut w = Wizard::new();
        w.select(selection(1, 0)).unwrap();
        assert!(matches!(w.show_price(), Err(ApiError::Validation(_))));
        assert_eq!(w.step(), Step::Selecting);
    }

    #[test]
    fn four_plus_three_prices_at_44000() {
        let mut w = Wizard::new();
        w.select(selection(4, 3)).unwrap();
        assert_eq!(w.show_price().unwrap(), Quote::Monthly(44000));
        assert_eq!(w.step(), Step::PriceShown);
    }

    #[test]
    fn restart_emits_unconverted_quick() {
        let mut w = Wizard::new();
        w.select(selection(2, 1)).unwrap();
        w.show_price().unwrap();
        let sub = w.restart().unwrap();
        assert_eq!(sub.kind, EstimateKind::Quick);
        assert!(!sub.converted);
        assert_eq!(sub.contact_info, ContactInfo::default());
        assert_eq!(sub.appointment, Appointment::default());
        assert_eq!(sub.price, Some(26000));
        assert_eq!(sub.current_selection.iot_options, vec!["화재 경보 센서"]);
        assert_eq!(w.step(), Step::Selecting);
    }

    #[test]
    fn contact_errors_are_aggregated() {
        let mut w = Wizard::new();
        w.select(selection(2, 0)).unwrap();
        w.show_price().unwrap();
        w.proceed_to_contact().unwrap();
        let err = w.submit_contact(ContactDraft::default()).unwrap_err();
        match err {
            ApiError::Validation(problems) => assert_eq!(problems.len(), 5),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(w.step(), Step::ContactForm);
    }

    #[test]
    fn confirm_yields_full_and_converted_companion() {
        let mut w = Wizard::new();
        w.select(selection(4, 3)).unwrap();
        w.show_price().unwrap();
        w.proceed_to_contact().unwrap();
        w.submit_contact(good_draft()).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
        let confirmed = w.confirm(date, "10:30am", today()).unwrap();
        assert_eq!(confirmed.full.kind, EstimateKind::Full);
        assert!(confirmed.full.converted);
        assert_eq!(confirmed.quick.kind, EstimateKind::Quick);
        assert!(confirmed.quick.converted);
        assert_eq!(confirmed.full.contact_info.phone_number, "010-1234-5678");
        assert_eq!(confirmed.full.price, Some(44000));
        assert_eq!(w.step(), Step::Submitted);
    }

    #[test]
    fn confirm_rejects_early_date_and_bad_slot() {
        let mut w = Wizard::new();
        w.select(selection(2, 0)).unwrap();
        w.show_price().unwrap();
        w.proceed_to_contact().unwrap();
        w.submit_contact(good_draft()).unwrap();
        let too_soon = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        assert!(w.confirm(too_soon, "9am", today()).is_err());
        let saturday = NaiveDate::from_ymd_opt(2026, 10, 24).unwrap();
        assert!(w.confirm(saturday, "9am", today()).is_err());
        let ok = NaiveDate::from_ymd_opt(2026, 10, 21).unwrap();
        assert!(w.confirm(ok, "7pm", today()).is_err());
        assert_eq!(w.step(), Step::Scheduling);
    }

    #[test]
    fn manual_quote_is_submittable() {
        let mut w = Wizard::new();
        w.select(selection(12, 8)).unwrap();
        assert_eq!(w.show_price().unwrap(), Quote::Manual);
        let sub = w.restart().unwrap();
        assert!(sub.manual_quote);
        assert_eq!(sub.price, None);
    }

    #[test]
    fn out_of_order_steps_conflict() {
        let mut w = Wizard::new();
        assert!(matches!(w.proceed_to_contact(), Err(ApiError::Conflict(_))));
        assert!(matches!(w.restart(), Err(ApiError::Conflict(_))));
    }

    #[test]
    fn server_recomputes_price_and_forces_converted() {
        let sub = Submission {
            kind: EstimateKind::Quick,
            converted: false,
            initial_selection: None,
            current_selection: selection(4, 3),
            contact_info: ContactInfo {
                phone_number: "010 9999 0000".into(),
                address: "부산".into(),
                location_type: "학원".into(),
                has_internet: "아니요".into(),
            },
            appointment: Appointment {
                date: NaiveDate::from_ymd_opt(2026, 10, 22),
                time: Some("2pm".into()),
            },
            price: Some(1),
            manual_quote: false,
        };
        let full = validate_full(sub, today()).unwrap();
        assert_eq!(full.kind, EstimateKind::Full);
        assert!(full.converted);
        assert_eq!(full.price, Some(44000));
        assert_eq!(full.contact_info.phone_number, "010-9999-0000");
    }

    #[test]
    fn unconverted_quick_drops_contact() {
        let sub = Submission {
            kind: EstimateKind::Full,
            converted: false,
            initial_selection: None,
            current_selection: selection(3, 0),
            contact_info: ContactInfo {
                phone_number: "garbage".into(),
                ..Default::default()
            },
            appointment: Appointment::default(),
            price: None,
            manual_quote: false,
        };
        let quick = validate_quick(sub, today()).unwrap();
        assert_eq!(quick.kind, EstimateKind::Quick);
        assert!(quick.contact_info.phone_number.is_empty());
        assert_eq!(quick.price, Some(26000));
    }

    fn converted_quick(phone: &str) -> Submission {
        Submission {
            kind: EstimateKind::Quick,
            converted: true,
            initial_selection: Some(selection(2, 2)),
            current_selection: selection(2, 2),
            contact_info: ContactInfo {
                phone_number: phone.into(),
                address: "대구".into(),
                location_type: "사무실".into(),
                has_internet: "네".into(),
            },
            appointment: Appointment {
                date: NaiveDate::from_ymd_opt(2026, 10, 22),
                time: Some("9am".into()),
            },
            price: None,
            manual_quote: false,
        }
    }

    #[test]
    fn converted_quick_keeps_contact_and_appointment() {
        let quick = validate_quick(converted_quick("010.5555.6666"), today()).unwrap();
        assert_eq!(quick.kind, EstimateKind::Quick);
        assert!(quick.converted);
        assert_eq!(quick.contact_info.phone_number, "010-5555-6666");
        assert_eq!(quick.appointment.time.as_deref(), Some("9am"));
        assert_eq!(quick.price, Some(30000));
    }

    #[test]
    fn converted_quick_with_bad_phone_rejected() {
        match validate_quick(converted_quick("12345"), today()) {
            Err(ApiError::Validation(problems)) => {
                assert!(problems.iter().any(|p| p.contains("phoneNumber")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn submission_uses_camel_case_wire_names() {
        let json = serde_json::json!({
            "currentSelection": {"indoorCount": 2, "outdoorCount": 0},
            "contactInfo": {"phoneNumber": "010-1111-2222"},
        });
        let sub: Submission = serde_json::from_value(json).unwrap();
        assert_eq!(sub.current_selection.camera_type, "210만");
        assert_eq!(sub.contact_info.phone_number, "010-1111-2222");
        let back = serde_json::to_value(&sub).unwrap();
        assert_eq!(back["type"], "quick");
        assert!(back.get("currentSelection").is_some());
    }
}
