//! # Ledger: Spreadsheet Mirror of Leads and Questions
//!
//! The sales team works out of a shared spreadsheet, so every estimate and
//! customer question is mirrored into it. The spreadsheet is a second copy,
//! never the source of truth: writes are driven by outbox jobs
//! (`crate::outbox`) and failures retry there.
//!
//! ## Sheets
//!
//! | Sheet           | Columns | Written by                        |
//! |-----------------|---------|-----------------------------------|
//! | `간편견적`       | A..O    | quick estimates                   |
//! | `SALT 상담신청`  | A..N    | full consultations                |
//! | `KT 상담신청`    | A..N    | maintained by hand; read only     |
//! | `고객 질문`      | A..F    | customer questions                |
//!
//! New rows go to the top (sheet row 2, right under the header). That is an
//! insert followed by a write, two calls with no lock around them, so two
//! concurrent mirrors can interleave. Accepted: the rows still both land.
//!
//! Row indices in this module are 0-based *data* indices (header excluded);
//! the human-facing sheet row number is `index + 2`.
//!
//! ## Module Structure
//!
//! - [`sheets`]: Google Sheets v4 REST backend (`reqwest` + service-account JWT)
//! - [`memory`]: in-process backend for development and tests

mod memory;
mod sheets;

pub use memory::*;
pub use sheets::*;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::calendar::{format_kst, format_kst_date};
use crate::wizard::{EstimateKind, Submission};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sheet {
    Quick,
    Salt,
    Kt,
    Questions,
}

pub const QUICK_HEADER: [&str; 15] = [
    "IP 주소",
    "시간",
    "화소",
    "실내",
    "실외",
    "IoT",
    "특수공사",
    "전환(O/X)",
    "연락처",
    "주소",
    "타입",
    "인터넷",
    "희망날짜",
    "희망 시간",
    "메모",
];

pub const CONSULTATION_HEADER: [&str; 14] = [
    "IP 주소",
    "시간",
    "화소",
    "연락처",
    "주소",
    "타입",
    "실내",
    "실외",
    "IoT",
    "특수공사",
    "인터넷",
    "희망날짜",
    "희망 시간",
    "메모",
];

pub const QUESTION_HEADER: [&str; 6] =
    ["ID", "시간", "연락처", "질문", "읽음", "IP주소"];

/// Column E of the questions sheet.
const QUESTION_READ_COLUMN: usize = 4;

impl Sheet {
    pub const ALL: [Sheet; 4] = [Sheet::Quick, Sheet::Salt, Sheet::Kt, Sheet::Questions];

    pub fn title(&self) -> &'static str {
        match self {
            Sheet::Quick => "간편견적",
            Sheet::Salt => "SALT 상담신청",
            Sheet::Kt => "KT 상담신청",
            Sheet::Questions => "고객 질문",
        }
    }

    pub fn header(&self) -> &'static [&'static str] {
        match self {
            Sheet::Quick => &QUICK_HEADER,
            Sheet::Salt | Sheet::Kt => &CONSULTATION_HEADER,
            Sheet::Questions => &QUESTION_HEADER,
        }
    }

    pub fn width(&self) -> usize {
        self.header().len()
    }

    /// Column holding the contact number, for duplicate detection.
    pub fn phone_column(&self) -> usize {
        match self {
            Sheet::Quick => 8,
            Sheet::Salt | Sheet::Kt => 3,
            Sheet::Questions => 2,
        }
    }
}

/// `0 -> A`, `14 -> O`. Sheets here never exceed 26 columns.
pub fn column_letter(index: usize) -> char {
    (b'A' + (index.min(25) as u8)) as char
}

/// Row-level access to the spreadsheet.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Every data row below the header, cells as displayed.
    async fn read_rows(&self, sheet: Sheet) -> Result<Vec<Vec<String>>>;

    /// Insert `row` as the first data row, pushing the rest down.
    async fn insert_top(&self, sheet: Sheet, row: Vec<String>) -> Result<()>;

    async fn update_cell(
        &self,
        sheet: Sheet,
        index: usize,
        column: usize,
        value: String,
    ) -> Result<()>;

    async fn delete_row(&self, sheet: Sheet, index: usize) -> Result<()>;

    /// Create the sheet if missing and overwrite its header row.
    async fn write_header(&self, sheet: Sheet) -> Result<()>;
}

// ── Duplicate detection ─────────────────────────────────────────

/// Scan top to bottom; the first row whose IP or contact number matches
/// decides the memo. Empty when nothing matches or the sheet can't be read.
pub async fn find_duplicate(ledger: &dyn Ledger, sheet: Sheet, ip: &str, phone: &str) -> String {
    match ledger.read_rows(sheet).await {
        Ok(rows) => duplicate_memo(&rows, sheet.phone_column(), ip, phone),
        Err(e) => {
            warn!(error = %e, sheet = sheet.title(), "duplicate check skipped");
            String::new()
        }
    }
}

pub fn duplicate_memo(rows: &[Vec<String>], phone_column: usize, ip: &str, phone: &str) -> String {
    for (i, row) in rows.iter().enumerate() {
        let existing_ip = row.first().map(String::as_str).unwrap_or("");
        let existing_phone = row.get(phone_column).map(String::as_str).unwrap_or("");
        if !existing_ip.is_empty() && !ip.is_empty() && existing_ip == ip {
            return format!("중복 IP ({}번째 줄)", i + 2);
        }
        if !existing_phone.is_empty() && !phone.is_empty() && existing_phone == phone {
            return format!("중복 연락처 ({}번째 줄)", i + 2);
        }
    }
    String::new()
}

// ── Row layouts ─────────────────────────────────────────────────

fn join(options: &[String]) -> String {
    options.join(", ")
}

/// Layout of one estimate row for the quick or SALT sheet.
pub fn estimate_row(
    kind: EstimateKind,
    ip: &str,
    submitted_at: DateTime<Utc>,
    sub: &Submission,
    memo: String,
) -> Vec<String> {
    let sel = &sub.current_selection;
    let camera = if sel.camera_type.is_empty() {
        sub.initial_selection
            .as_ref()
            .map(|s| s.camera_type.clone())
            .unwrap_or_default()
    } else {
        sel.camera_type.clone()
    };
    let contact = &sub.contact_info;
    let date = sub.appointment.date.map(format_kst_date).unwrap_or_default();
    let time = sub.appointment.time.clone().unwrap_or_default();
    match kind {
        EstimateKind::Quick => vec![
            ip.to_string(),
            format_kst(submitted_at),
            camera,
            sel.indoor_count.to_string(),
            sel.outdoor_count.to_string(),
            join(&sel.iot_options),
            join(&sel.special_options),
            if sub.converted { "O" } else { "X" }.to_string(),
            contact.phone_number.clone(),
            contact.address.clone(),
            contact.location_type.clone(),
            contact.has_internet.clone(),
            date,
            time,
            memo,
        ],
        EstimateKind::Full => vec![
            ip.to_string(),
            format_kst(submitted_at),
            camera,
            contact.phone_number.clone(),
            contact.address.clone(),
            contact.location_type.clone(),
            sel.indoor_count.to_string(),
            sel.outdoor_count.to_string(),
            join(&sel.iot_options),
            join(&sel.special_options),
            contact.has_internet.clone(),
            date,
            time,
            memo,
        ],
    }
}

pub fn question_row(
    question_id: i64,
    created_at: DateTime<Utc>,
    phone: &str,
    question: &str,
    ip: &str,
) -> Vec<String> {
    vec![
        question_id.to_string(),
        format_kst(created_at),
        phone.to_string(),
        question.to_string(),
        "X".to_string(),
        ip.to_string(),
    ]
}

// ── Mirror operations (run by the outbox) ───────────────────────

pub async fn mirror_estimate(
    ledger: &dyn Ledger,
    kind: EstimateKind,
    ip: &str,
    submitted_at: DateTime<Utc>,
    sub: &Submission,
) -> Result<()> {
    let sheet = match kind {
        EstimateKind::Quick => Sheet::Quick,
        EstimateKind::Full => Sheet::Salt,
    };
    let memo = find_duplicate(ledger, sheet, ip, &sub.contact_info.phone_number).await;
    let row = estimate_row(kind, ip, submitted_at, sub, memo);
    ledger.insert_top(sheet, row).await?;
    info!(sheet = sheet.title(), "estimate mirrored");
    Ok(())
}

pub async fn mirror_question(
    ledger: &dyn Ledger,
    question_id: i64,
    created_at: DateTime<Utc>,
    phone: &str,
    question: &str,
    ip: &str,
) -> Result<()> {
    let row = question_row(question_id, created_at, phone, question, ip);
    ledger.insert_top(Sheet::Questions, row).await
}

async fn find_question(ledger: &dyn Ledger, question_id: i64) -> Result<Option<usize>> {
    let id = question_id.to_string();
    let rows = ledger.read_rows(Sheet::Questions).await?;
    Ok(rows
        .iter()
        .position(|row| row.first().map(String::as_str) == Some(id.as_str())))
}

/// False when the question has no row in the sheet.
pub async fn set_question_read(ledger: &dyn Ledger, question_id: i64, read: bool) -> Result<bool> {
    let Some(index) = find_question(ledger, question_id).await? else {
        return Ok(false);
    };
    let mark = if read { "O" } else { "X" };
    ledger
        .update_cell(Sheet::Questions, index, QUESTION_READ_COLUMN, mark.to_string())
        .await?;
    Ok(true)
}

pub async fn delete_question(ledger: &dyn Ledger, question_id: i64) -> Result<bool> {
    let Some(index) = find_question(ledger, question_id).await? else {
        return Ok(false);
    };
    ledger.delete_row(Sheet::Questions, index).await?;
    Ok(true)
}

pub async fn setup_headers(ledger: &dyn Ledger) -> Result<()> {
    for sheet in Sheet::ALL {
        ledger.write_header(sheet).await?;
        info!(sheet = sheet.title(), "header written");
    }
    Ok(())
}

// ── Read-back for the employee dashboard ────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetEntry {
    pub id: String,
    /// `quick` or `consultation`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub ip_address: String,
    pub submitted_at: String,
    pub camera_type: String,
    pub indoor_count: u32,
    pub outdoor_count: u32,
    pub iot_options: String,
    pub special_options: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted: Option<bool>,
    pub phone_number: String,
    pub address: String,
    pub location_type: String,
    pub has_internet: String,
    pub appointment_date: String,
    pub appointment_time: String,
    pub memo: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetEstimates {
    pub quick_estimates: Vec<SheetEntry>,
    pub salt_consultations: Vec<SheetEntry>,
    pub kt_consultations: Vec<SheetEntry>,
    pub total: usize,
}

/// `quick-010-1234-5678-2026. 2. 13. ...` with everything outside
/// `[A-Za-z0-9-]` replaced by `_`.
pub fn stable_id(prefix: &str, phone: &str, timestamp: &str) -> String {
    format!("{}-{}-{}", prefix, phone, timestamp)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn cell(row: &[String], i: usize) -> String {
    row.get(i).cloned().unwrap_or_default()
}

fn count(row: &[String], i: usize) -> u32 {
    row.get(i).and_then(|c| c.trim().parse().ok()).unwrap_or(0)
}

fn has_timestamp(row: &[String]) -> bool {
    row.get(1).is_some_and(|t| !t.is_empty())
}

pub fn parse_quick_rows(rows: &[Vec<String>]) -> Vec<SheetEntry> {
    rows.iter()
        .filter(|row| has_timestamp(row))
        .map(|row| {
            let timestamp = cell(row, 1);
            let phone = cell(row, 8);
            SheetEntry {
                id: stable_id("quick", &phone, &timestamp),
                kind: "quick",
                ip_address: cell(row, 0),
                submitted_at: timestamp,
                camera_type: cell(row, 2),
                indoor_count: count(row, 3),
                outdoor_count: count(row, 4),
                iot_options: cell(row, 5),
                special_options: cell(row, 6),
                converted: Some(cell(row, 7) == "O"),
                phone_number: phone,
                address: cell(row, 9),
                location_type: cell(row, 10),
                has_internet: cell(row, 11),
                appointment_date: cell(row, 12),
                appointment_time: cell(row, 13),
                memo: cell(row, 14),
            }
        })
        .collect()
}

pub fn parse_consultation_rows(rows: &[Vec<String>], prefix: &str) -> Vec<SheetEntry> {
    rows.iter()
        .filter(|row| has_timestamp(row))
        .map(|row| {
            let timestamp = cell(row, 1);
            let phone = cell(row, 3);
            SheetEntry {
                id: stable_id(prefix, &phone, &timestamp),
                kind: "consultation",
                ip_address: cell(row, 0),
                submitted_at: timestamp,
                camera_type: cell(row, 2),
                phone_number: phone,
                address: cell(row, 4),
                location_type: cell(row, 5),
                indoor_count: count(row, 6),
                outdoor_count: count(row, 7),
                iot_options: cell(row, 8),
                special_options: cell(row, 9),
                converted: None,
                has_internet: cell(row, 10),
                appointment_date: cell(row, 11),
                appointment_time: cell(row, 12),
                memo: cell(row, 13),
            }
        })
        .collect()
}

pub async fn read_sheet_estimates(ledger: &dyn Ledger) -> Result<SheetEstimates> {
    let quick = parse_quick_rows(&ledger.read_rows(Sheet::Quick).await?);
    let salt = parse_consultation_rows(&ledger.read_rows(Sheet::Salt).await?, "salt");
    let kt = parse_consultation_rows(&ledger.read_rows(Sheet::Kt).await?, "kt");
    Ok(SheetEstimates {
        total: quick.len() + salt.len() + kt.len(),
        quick_estimates: quick,
        salt_consultations: salt,
        kt_consultations: kt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wizard::{Appointment, ContactInfo, Selection};
    use chrono::{NaiveDate, TimeZone};

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn full_submission() -> Submission {
        Submission {
            kind: EstimateKind::Full,
            converted: true,
            initial_selection: None,
            current_selection: Selection {
                camera_type: "500만".into(),
                indoor_count: 4,
                outdoor_count: 3,
                iot_options: vec!["스마트 도어락".into(), "스마트 조명".into()],
                special_options: vec![],
            },
            contact_info: ContactInfo {
                phone_number: "010-1234-5678".into(),
                address: "서울시 강남구".into(),
                location_type: "매장".into(),
                has_internet: "네".into(),
            },
            appointment: Appointment {
                date: NaiveDate::from_ymd_opt(2026, 10, 21),
                time: Some("10am".into()),
            },
            price: Some(44000),
            manual_quote: false,
        }
    }

    #[test]
    fn duplicate_by_ip_reports_sheet_row() {
        let rows = vec![
            row(&["1.1.1.1", "t", "", "010-0000-0000"]),
            row(&["2.2.2.2", "t", "", "010-1111-1111"]),
        ];
        assert_eq!(duplicate_memo(&rows, 3, "2.2.2.2", "010-9"), "중복 IP (3번째 줄)");
    }

    #[test]
    fn duplicate_by_phone() {
        let rows = vec![row(&["1.1.1.1", "t", "", "010-0000-0000"])];
        assert_eq!(
            duplicate_memo(&rows, 3, "9.9.9.9", "010-0000-0000"),
            "중복 연락처 (2번째 줄)"
        );
    }

    #[test]
    fn first_matching_row_wins() {
        // Row 2 matches on phone before row 3 matches on IP.
        let rows = vec![
            row(&["1.1.1.1", "t", "", "010-5555-5555"]),
            row(&["9.9.9.9", "t", "", "010-0000-0000"]),
        ];
        assert_eq!(
            duplicate_memo(&rows, 3, "9.9.9.9", "010-5555-5555"),
            "중복 연락처 (2번째 줄)"
        );
    }

    #[test]
    fn empty_values_never_match() {
        let rows = vec![row(&["", "t", "", ""])];
        assert_eq!(duplicate_memo(&rows, 3, "", ""), "");
    }

    #[test]
    fn full_row_layout() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 0).unwrap();
        let r = estimate_row(EstimateKind::Full, "1.2.3.4", ts, &full_submission(), "memo".into());
        assert_eq!(r.len(), Sheet::Salt.width());
        assert_eq!(r[1], "2026. 10. 19. 오전 10:00:00");
        assert_eq!(r[3], "010-1234-5678");
        assert_eq!(r[6], "4");
        assert_eq!(r[8], "스마트 도어락, 스마트 조명");
        assert_eq!(r[11], "2026. 10. 21.");
        assert_eq!(r[13], "memo");
    }

    #[test]
    fn quick_row_layout() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 0).unwrap();
        let mut sub = full_submission();
        sub.kind = EstimateKind::Quick;
        let r = estimate_row(EstimateKind::Quick, "1.2.3.4", ts, &sub, String::new());
        assert_eq!(r.len(), Sheet::Quick.width());
        assert_eq!(r[3], "4");
        assert_eq!(r[7], "O");
        assert_eq!(r[8], "010-1234-5678");
        assert_eq!(r[14], "");
    }

    #[test]
    fn stable_ids_replace_punctuation() {
        assert_eq!(
            stable_id("salt", "010-1234-5678", "2026. 2. 13. 오후 3:05:09"),
            "salt-010-1234-5678-2026__2__13_____3_05_09"
        );
    }

    #[test]
    fn rows_without_timestamp_skipped() {
        let rows = vec![
            row(&["ip", "", "210만"]),
            row(&["ip", "2026. 2. 13.", "210만", "2", "1", "", "", "O", "010-1"]),
        ];
        let parsed = parse_quick_rows(&rows);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].indoor_count, 2);
        assert_eq!(parsed[0].converted, Some(true));
        assert_eq!(parsed[0].memo, "");
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), 'A');
        assert_eq!(column_letter(4), 'E');
        assert_eq!(column_letter(14), 'O');
    }

    #[tokio::test]
    async fn question_lifecycle_in_memory() {
        let ledger = MemoryLedger::new();
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 0).unwrap();
        mirror_question(&ledger, 7, ts, "010-1", "언제 오시나요?", "1.1.1.1").await.unwrap();
        mirror_question(&ledger, 8, ts, "010-2", "가격?", "1.1.1.2").await.unwrap();
        assert!(set_question_read(&ledger, 7, true).await.unwrap());
        let rows = ledger.rows(Sheet::Questions);
        assert_eq!(rows[0][0], "8");
        assert_eq!(rows[1][4], "O");
        assert!(delete_question(&ledger, 8).await.unwrap());
        assert!(!delete_question(&ledger, 8).await.unwrap());
        assert_eq!(ledger.rows(Sheet::Questions).len(), 1);
    }

    #[tokio::test]
    async fn mirror_annotates_duplicates() {
        let ledger = MemoryLedger::new();
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 1, 0, 0).unwrap();
        let sub = full_submission();
        mirror_estimate(&ledger, EstimateKind::Full, "1.2.3.4", ts, &sub).await.unwrap();
        mirror_estimate(&ledger, EstimateKind::Full, "5.6.7.8", ts, &sub).await.unwrap();
        let rows = ledger.rows(Sheet::Salt);
        assert_eq!(rows[0][13], "중복 연락처 (2번째 줄)");
        assert_eq!(rows[1][13], "");
    }

    #[tokio::test]
    async fn failing_ledger_gives_empty_memo() {
        let ledger = MemoryLedger::new();
        ledger.set_failing(true);
        assert_eq!(find_duplicate(&ledger, Sheet::Salt, "ip", "phone").await, "");
    }
}
