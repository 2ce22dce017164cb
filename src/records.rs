//! # Records: Service Requests, Contact Forms, Estimate Status
//!
//! Field vocabularies, input validation, and the rules for who may change
//! what. The database layer (`db::service_requests`, `db::contact_forms`,
//! `db::estimates`) applies the changes these functions plan.
//!
//! ## Ownership
//!
//! Customers see and edit only their own records; employees see all of them.
//! An employee update may change `status`, `priority` and attach a `note`; a
//! customer update may change `subject`, `description` and `productInfo`.
//! Fields outside the caller's role are ignored.
//!
//! ## Audit trail
//!
//! Every employee mutation that changes the status or carries a note appends
//! exactly one `edit_history` entry. A status change without a note is still
//! recorded.
//!
//! ## Concurrency
//!
//! Updates carry the `version` the caller last read. The store only applies
//! the update if the version still matches, then bumps it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Actor;
use crate::calendar;
use crate::db::{ContactFormRow, EditHistoryRow, PriceEstimateRow, ServiceRequestRow};
use crate::error::ApiError;
use crate::wizard::{normalize_phone, Appointment, ContactInfo};

/// String-backed enum with `as_str`, `parse` and a list of accepted values.
macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

vocabulary!(ServiceStatus {
    Pending => "pending",
    InProgress => "in-progress",
    Resolved => "resolved",
    Closed => "closed",
});

vocabulary!(Category {
    Warranty => "warranty",
    Repair => "repair",
    Replacement => "replacement",
    Consultation => "consultation",
    Other => "other",
});

vocabulary!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

vocabulary!(ContactStatus {
    New => "new",
    Read => "read",
    InProgress => "in-progress",
    Resolved => "resolved",
});

vocabulary!(
    /// Sales pipeline state of a price estimate.
    EstimateStatus {
        Pending => "pending",
        Contacted => "contacted",
        Scheduled => "scheduled",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

/// Parse an optional vocabulary field, recording a problem when it is
/// present but not one of the accepted values.
fn parse_field<T>(
    field: &str,
    value: Option<&str>,
    parse: fn(&str) -> Option<T>,
    accepted: &[&str],
    problems: &mut Vec<String>,
) -> Option<T> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    let parsed = parse(value);
    if parsed.is_none() {
        problems.push(format!("{} must be one of: {}", field, accepted.join(", ")));
    }
    parsed
}

fn required(field: &str, value: &str, problems: &mut Vec<String>) -> String {
    let v = value.trim();
    if v.is_empty() {
        problems.push(format!("{} is required", field));
    }
    v.to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

pub fn can_view(actor: &Actor, owner: Uuid) -> bool {
    actor.is_employee() || actor.id == owner
}

pub fn check_version(current: i32, sent: i32) -> Result<(), ApiError> {
    if current == sent {
        Ok(())
    } else {
        Err(version_conflict(current, sent))
    }
}

pub fn version_conflict(current: i32, sent: i32) -> ApiError {
    ApiError::Conflict(format!(
        "Record was modified by someone else (current version {}, you sent {})",
        current, sent
    ))
}

// ── Edit history ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub edited_by: Uuid,
    pub edited_by_name: String,
    pub note: Option<String>,
    pub previous_status: String,
    pub new_status: String,
}

/// One entry when the status changes or a note is attached, else none.
pub fn history_entry(
    actor: &Actor,
    previous_status: &str,
    new_status: &str,
    note: Option<&str>,
) -> Option<HistoryEntry> {
    let note = non_empty(note);
    if previous_status == new_status && note.is_none() {
        return None;
    }
    Some(HistoryEntry {
        edited_by: actor.id,
        edited_by_name: actor.name.clone(),
        note,
        previous_status: previous_status.to_string(),
        new_status: new_status.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    pub status: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
}

/// Filters checked against the vocabularies so a typo is a 400, not an
/// empty list.
pub fn validate_service_filter(filter: &RecordFilter) -> Result<(), ApiError> {
    let mut problems = Vec::new();
    parse_field(
        "status",
        filter.status.as_deref(),
        ServiceStatus::parse,
        ServiceStatus::VALUES,
        &mut problems,
    );
    parse_field(
        "category",
        filter.category.as_deref(),
        Category::parse,
        Category::VALUES,
        &mut problems,
    );
    parse_field(
        "priority",
        filter.priority.as_deref(),
        Priority::parse,
        Priority::VALUES,
        &mut problems,
    );
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(problems))
    }
}

pub fn validate_contact_filter(filter: &RecordFilter) -> Result<(), ApiError> {
    let mut problems = Vec::new();
    parse_field(
        "status",
        filter.status.as_deref(),
        ContactStatus::parse,
        ContactStatus::VALUES,
        &mut problems,
    );
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(problems))
    }
}

// ── Service requests ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequestInput {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub product_info: Option<ProductInfo>,
}

#[derive(Debug, Clone)]
pub struct NewServiceRequest {
    pub subject: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub product_info: Option<ProductInfo>,
}

pub fn validate_service_request(
    input: &ServiceRequestInput,
) -> Result<NewServiceRequest, ApiError> {
    let mut problems = Vec::new();
    let subject = required("subject", &input.subject, &mut problems);
    let description = required("description", &input.description, &mut problems);
    let category = parse_field(
        "category",
        input.category.as_deref(),
        Category::parse,
        Category::VALUES,
        &mut problems,
    );
    let priority = parse_field(
        "priority",
        input.priority.as_deref(),
        Priority::parse,
        Priority::VALUES,
        &mut problems,
    );
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    Ok(NewServiceRequest {
        subject,
        description,
        category: category.unwrap_or(Category::Other),
        priority: priority.unwrap_or(Priority::Medium),
        product_info: input.product_info.clone(),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequestUpdate {
    pub version: i32,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub note: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub product_info: Option<ProductInfo>,
}

/// Column values to write; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceRequestChanges {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<ServiceStatus>,
    pub priority: Option<Priority>,
    pub product_info: Option<ProductInfo>,
    pub history: Option<HistoryEntry>,
}

/// Decide what an update may change, given who sends it and the record as
/// last stored. Ownership and version are checked here too.
pub fn plan_service_request_update(
    actor: &Actor,
    current: &ServiceRequestRow,
    update: &ServiceRequestUpdate,
) -> Result<ServiceRequestChanges, ApiError> {
    if !can_view(actor, current.customer_id) {
        return Err(ApiError::Forbidden("Not authorized to update this request".into()));
    }
    check_version(current.version, update.version)?;

    if !actor.is_employee() {
        return Ok(ServiceRequestChanges {
            subject: non_empty(update.subject.as_deref()),
            description: non_empty(update.description.as_deref()),
            product_info: update.product_info.clone(),
            ..Default::default()
        });
    }

    let mut problems = Vec::new();
    let status = parse_field(
        "status",
        update.status.as_deref(),
        ServiceStatus::parse,
        ServiceStatus::VALUES,
        &mut problems,
    );
    let priority = parse_field(
        "priority",
        update.priority.as_deref(),
        Priority::parse,
        Priority::VALUES,
        &mut problems,
    );
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    let new_status = status.map(|s| s.as_str()).unwrap_or(current.status.as_str());
    Ok(ServiceRequestChanges {
        status,
        priority,
        history: history_entry(actor, &current.status, new_status, update.note.as_deref()),
        ..Default::default()
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    pub id: i64,
    pub customer: CustomerRef,
    pub subject: String,
    pub description: String,
    pub category: String,
    pub status: String,
    pub priority: String,
    pub product_info: Option<ProductInfo>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edit_history: Vec<EditHistoryRow>,
}

impl ServiceRequest {
    pub fn from_rows(row: ServiceRequestRow, history: Vec<EditHistoryRow>) -> Self {
        let product_info = if row.product_name.is_some()
            || row.product_serial_number.is_some()
            || row.product_purchase_date.is_some()
        {
            Some(ProductInfo {
                name: row.product_name,
                serial_number: row.product_serial_number,
                purchase_date: row.product_purchase_date,
            })
        } else {
            None
        };
        ServiceRequest {
            id: row.id,
            customer: CustomerRef {
                id: row.customer_id,
                name: row.customer_name,
            },
            subject: row.subject,
            description: row.description,
            category: row.category,
            status: row.status,
            priority: row.priority,
            product_info,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            edit_history: history,
        }
    }
}

// ── Contact forms ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactFormInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct NewContactForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
}

pub fn validate_contact_form(input: &ContactFormInput) -> Result<NewContactForm, ApiError> {
    let mut problems = Vec::new();
    let name = required("name", &input.name, &mut problems);
    let email = required("email", &input.email, &mut problems);
    if !email.is_empty() && !email.contains('@') {
        problems.push("email must be a valid address".to_string());
    }
    let subject = required("subject", &input.subject, &mut problems);
    let message = required("message", &input.message, &mut problems);
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    Ok(NewContactForm {
        name,
        email,
        phone: non_empty(input.phone.as_deref()),
        subject,
        message,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactFormUpdate {
    pub version: i32,
    pub status: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactFormChanges {
    pub status: Option<ContactStatus>,
    pub history: Option<HistoryEntry>,
}

/// Employee-only; the route rejects customers before calling this.
pub fn plan_contact_form_update(
    actor: &Actor,
    current: &ContactFormRow,
    update: &ContactFormUpdate,
) -> Result<ContactFormChanges, ApiError> {
    check_version(current.version, update.version)?;
    let mut problems = Vec::new();
    let status = parse_field(
        "status",
        update.status.as_deref(),
        ContactStatus::parse,
        ContactStatus::VALUES,
        &mut problems,
    );
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    let new_status = status.map(|s| s.as_str()).unwrap_or(current.status.as_str());
    Ok(ContactFormChanges {
        status,
        history: history_entry(actor, &current.status, new_status, update.note.as_deref()),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactForm {
    pub id: i64,
    pub customer: CustomerRef,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub status: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edit_history: Vec<EditHistoryRow>,
}

impl ContactForm {
    pub fn from_rows(row: ContactFormRow, history: Vec<EditHistoryRow>) -> Self {
        ContactForm {
            id: row.id,
            customer: CustomerRef {
                id: row.customer_id,
                name: row.customer_name,
            },
            name: row.name,
            email: row.email,
            phone: row.phone,
            subject: row.subject,
            message: row.message,
            status: row.status,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            edit_history: history,
        }
    }
}

// ── Price estimates ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EstimateStatusUpdate {
    pub version: i32,
    pub status: String,
}

pub fn parse_estimate_status(value: &str) -> Result<EstimateStatus, ApiError> {
    EstimateStatus::parse(value.trim()).ok_or_else(|| {
        ApiError::validation(format!(
            "status must be one of: {}",
            EstimateStatus::VALUES.join(", ")
        ))
    })
}

/// Employee follow-up on an estimate. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateAnnotationInput {
    pub version: i32,
    pub memo: Option<String>,
    pub status: Option<String>,
    pub contact_info: Option<ContactInfo>,
    pub appointment: Option<Appointment>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstimateAnnotation {
    pub memo: Option<String>,
    pub status: Option<EstimateStatus>,
    pub contact_info: Option<ContactInfo>,
    pub appointment: Option<Appointment>,
}

impl EstimateAnnotation {
    pub fn is_empty(&self) -> bool {
        *self == EstimateAnnotation::default()
    }
}

/// A phone number, when given, is normalised; a time, when given, must be a
/// bookable slot. Employees may move an appointment to any date.
pub fn plan_estimate_annotation(
    input: EstimateAnnotationInput,
) -> Result<EstimateAnnotation, ApiError> {
    let mut problems = Vec::new();
    let status = parse_field(
        "status",
        input.status.as_deref(),
        EstimateStatus::parse,
        EstimateStatus::VALUES,
        &mut problems,
    );
    let contact_info = input.contact_info.map(|mut c| {
        if !c.phone_number.trim().is_empty() {
            match normalize_phone(&c.phone_number) {
                Some(p) => c.phone_number = p,
                None => problems.push(
                    "contactInfo.phoneNumber must be a valid 010-XXXX-XXXX number".to_string(),
                ),
            }
        }
        c.address = c.address.trim().to_string();
        c
    });
    if let Some(time) = input.appointment.as_ref().and_then(|a| a.time.as_deref()) {
        if !time.is_empty() && !calendar::is_valid_slot(time) {
            problems.push(format!("appointment.time '{}' is not a valid slot", time));
        }
    }
    if !problems.is_empty() {
        return Err(ApiError::Validation(problems));
    }
    Ok(EstimateAnnotation {
        memo: input.memo.map(|m| m.trim().to_string()),
        status,
        contact_info,
        appointment: input.appointment,
    })
}

/// Stored estimate as served to the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEstimate {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub converted: bool,
    pub initial_selection: Option<serde_json::Value>,
    pub current_selection: serde_json::Value,
    pub contact_info: serde_json::Value,
    pub appointment: Appointment,
    pub price: Option<i32>,
    pub manual_quote: bool,
    pub ip_address: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub status: String,
    pub memo: String,
    pub version: i32,
}

impl From<PriceEstimateRow> for PriceEstimate {
    fn from(row: PriceEstimateRow) -> Self {
        PriceEstimate {
            id: row.id,
            kind: row.kind,
            converted: row.converted,
            initial_selection: row.initial_selection,
            current_selection: row.current_selection,
            contact_info: row.contact_info,
            appointment: Appointment {
                date: row.appointment_date,
                time: row.appointment_time,
            },
            price: row.price,
            manual_quote: row.manual_quote,
            ip_address: row.ip_address,
            submitted_at: row.submitted_at,
            status: row.status,
            memo: row.memo,
            version: row.version,
        }
    }
}
