//! # Notify: Operator Email Notifications
//!
//! Every event the business wants to hear about becomes a [`Notification`].
//! Notifications are plain data (they travel through the outbox as JSON),
//! render to a `(subject, html)` pair, and are delivered by a [`Notifier`]:
//!
//! - [`SmtpNotifier`]: `lettre` over an authenticated SMTP relay
//! - [`LogNotifier`]: logs subject and recipients; used when SMTP is unset
//! - [`RecordingNotifier`]: keeps everything in memory for tests
//!
//! All interpolated text is HTML-escaped. Subjects carry the
//! `[Salt Renewal]` prefix so mail filters can route them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

use crate::calendar::{format_kst, format_kst_time};
use crate::config::SmtpConfig;
use crate::digest::DailyStats;
use crate::wizard::Submission;

pub const SUBJECT_PREFIX: &str = "[Salt Renewal]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    EmployeeRegistration {
        name: String,
        username: String,
        phone: String,
        requested_at: DateTime<Utc>,
    },
    SystemError {
        error_type: String,
        message: String,
        #[serde(default)]
        context: BTreeMap<String, String>,
        occurred_at: DateTime<Utc>,
    },
    NewEstimate {
        /// `quick` or `full`.
        kind: String,
        phone: String,
        address: String,
        camera_type: String,
        indoor: u32,
        outdoor: u32,
        price: Option<u32>,
        submitted_at: DateTime<Utc>,
    },
    NewChat {
        session_id: String,
        customer_name: String,
        requested_at: DateTime<Utc>,
    },
    NewQuestion {
        phone: String,
        question: String,
        asked_at: DateTime<Utc>,
    },
    ChatSummary {
        customer_name: String,
        accepted_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        ended_by: String,
        messages: Vec<TranscriptLine>,
    },
    DailyDigest(DailyStats),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub subject: String,
    pub html: String,
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `44000` -> `₩44,000`.
pub fn format_won(amount: u32) -> String {
    let digits = amount.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    format!("₩{}", out)
}

fn or_dash(s: &str) -> &str {
    if s.trim().is_empty() {
        "-"
    } else {
        s
    }
}

/// Two-column key/value table, values escaped.
fn table(rows: &[(&str, String)]) -> String {
    let mut html =
        String::from(r#"<table style="border-collapse:collapse; width:100%; margin-top:16px;">"#);
    for (label, value) in rows {
        html.push_str(&format!(
            r#"<tr><td style="padding:8px 12px; background:#f5f5f5; font-weight:bold;">{}</td><td style="padding:8px 12px;">{}</td></tr>"#,
            label,
            escape_html(value)
        ));
    }
    html.push_str("</table>");
    html
}

const FOOTER: &str = "<hr><p><small>Salt Renewal 자동 알림</small></p>";

impl Notification {
    pub fn new_estimate(sub: &Submission, submitted_at: DateTime<Utc>) -> Self {
        Notification::NewEstimate {
            kind: sub.kind.as_str().to_string(),
            phone: sub.contact_info.phone_number.clone(),
            address: sub.contact_info.address.clone(),
            camera_type: sub.current_selection.camera_type.clone(),
            indoor: sub.current_selection.indoor_count,
            outdoor: sub.current_selection.outdoor_count,
            price: sub.price,
            submitted_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::EmployeeRegistration { .. } => "employee_registration",
            Notification::SystemError { .. } => "system_error",
            Notification::NewEstimate { .. } => "new_estimate",
            Notification::NewChat { .. } => "new_chat",
            Notification::NewQuestion { .. } => "new_question",
            Notification::ChatSummary { .. } => "chat_summary",
            Notification::DailyDigest(_) => "daily_digest",
        }
    }

    pub fn render(&self) -> Rendered {
        match self {
            Notification::EmployeeRegistration {
                name,
                username,
                phone,
                requested_at,
            } => Rendered {
                subject: format!("{} 직원 가입 요청 - {} ({})", SUBJECT_PREFIX, name, username),
                html: format!(
                    "<h2>👤 직원 가입 요청</h2><p>새로운 직원 가입 요청이 들어왔습니다.</p>{}\
                     <p style=\"margin-top:20px;\">대시보드에서 <strong>가입 승인 또는 거절</strong> 하실 수 있습니다.</p>{}",
                    table(&[
                        ("이름", name.clone()),
                        ("아이디", username.clone()),
                        ("전화번호", phone.clone()),
                        ("요청 시간", format_kst(*requested_at)),
                    ]),
                    FOOTER
                ),
            },
            Notification::SystemError {
                error_type,
                message,
                context,
                occurred_at,
            } => {
                let mut rows = vec![
                    ("오류 유형", error_type.clone()),
                    ("메시지", message.clone()),
                    ("발생 시간", format_kst(*occurred_at)),
                ];
                for (k, v) in context {
                    rows.push((k.as_str(), v.clone()));
                }
                Rendered {
                    subject: format!("{} 시스템 오류 - {}", SUBJECT_PREFIX, error_type),
                    html: format!("<h2>🚨 시스템 오류 알림</h2>{}{}", table(&rows), FOOTER),
                }
            }
            Notification::NewEstimate {
                kind,
                phone,
                address,
                camera_type,
                indoor,
                outdoor,
                price,
                submitted_at,
            } => {
                let label = if kind == "quick" { "간편 신청" } else { "정식 상담 신청" };
                let heading = if kind == "quick" {
                    "📋 새 간편 신청 제출"
                } else {
                    "📝 새 정식 상담 신청 제출"
                };
                Rendered {
                    subject: format!("{} 새 {} - {}", SUBJECT_PREFIX, label, or_dash(phone)),
                    html: format!(
                        "<h2>{}</h2><p>{}</p>{}{}",
                        heading,
                        format_kst(*submitted_at),
                        table(&[
                            ("유형", label.to_string()),
                            ("전화번호", or_dash(phone).to_string()),
                            ("주소", or_dash(address).to_string()),
                            ("카메라 종류", or_dash(camera_type).to_string()),
                            ("실내/실외", format!("실내 {}대 / 실외 {}대", indoor, outdoor)),
                            (
                                "견적가",
                                price.map(format_won).unwrap_or_else(|| "별도 상담".to_string()),
                            ),
                        ]),
                        FOOTER
                    ),
                }
            }
            Notification::NewChat {
                session_id,
                customer_name,
                requested_at,
            } => Rendered {
                subject: format!("{} 새 채팅 요청 - {}", SUBJECT_PREFIX, customer_name),
                html: format!(
                    "<h2>💬 새 실시간 채팅 요청</h2><p>{}</p>{}\
                     <p style=\"margin-top:16px;\">대시보드 <strong>실시간 채팅</strong> 탭에서 확인하세요.</p>{}",
                    format_kst(*requested_at),
                    table(&[
                        ("고객명", customer_name.clone()),
                        ("세션 ID", session_id.clone()),
                    ]),
                    FOOTER
                ),
            },
            Notification::NewQuestion {
                phone,
                question,
                asked_at,
            } => Rendered {
                subject: format!("{} 새 문의 - {}", SUBJECT_PREFIX, phone),
                html: format!(
                    "<h2>❓ 새 고객 문의</h2><p>{}</p>{}\
                     <p style=\"margin-top:16px;\">대시보드 <strong>문의 탭</strong>에서 확인하세요.</p>{}",
                    format_kst(*asked_at),
                    table(&[("전화번호", phone.clone()), ("문의 내용", question.clone())]),
                    FOOTER
                ),
            },
            Notification::ChatSummary {
                customer_name,
                accepted_at,
                ended_at,
                ended_by,
                messages,
            } => {
                let when =
                    |ts: &Option<DateTime<Utc>>| ts.map(format_kst).unwrap_or_else(|| "-".into());
                let mut transcript =
                    String::from(r#"<table style="width:100%; border-collapse:collapse;">"#);
                for m in messages {
                    let employee = m.sender == "employee";
                    let label = if employee {
                        or_dash(ended_by).to_string()
                    } else {
                        customer_name.clone()
                    };
                    transcript.push_str(&format!(
                        r#"<tr><td style="padding:6px 12px; background:{};"><strong>{}</strong> <span style="color:#999; font-size:11px;">{}</span><br/>{}</td></tr>"#,
                        if employee { "#e3f2fd" } else { "#f5f5f5" },
                        escape_html(&label),
                        format_kst_time(m.timestamp),
                        escape_html(&m.text)
                    ));
                }
                transcript.push_str("</table>");
                Rendered {
                    subject: format!("{} 채팅 상담 요약 - {}", SUBJECT_PREFIX, customer_name),
                    html: format!(
                        "<h2>💬 채팅 상담 요약</h2>{}<h3>📝 대화 내용</h3>{}{}",
                        table(&[
                            ("고객명", customer_name.clone()),
                            ("상담 시작", when(accepted_at)),
                            ("상담 종료", when(ended_at)),
                            ("종료한 직원", or_dash(ended_by).to_string()),
                            ("메시지 수", format!("{}개", messages.len())),
                        ]),
                        transcript,
                        FOOTER
                    ),
                }
            }
            Notification::DailyDigest(stats) => Rendered {
                subject: format!("{} Daily Update on SALT/KT Contact Forms", SUBJECT_PREFIX),
                html: format!(
                    "<h2>📊 Daily Update on SALT/KT Contact Forms</h2>\
                     <h3>Total Current Entries</h3>{}\
                     <h3>Yesterday's Summary ({})</h3>{}\
                     <h3>This Week ({})</h3>{}\
                     <p><strong>Report Generated:</strong><br/>{} (한국시간)</p>{}",
                    table(&[
                        ("SALT 상담신청", stats.salt_total.to_string()),
                        ("KT 상담신청", stats.kt_total.to_string()),
                        ("Grand Total", (stats.salt_total + stats.kt_total).to_string()),
                    ]),
                    escape_html(&stats.yesterday_label),
                    table(&[
                        ("SALT 상담신청", stats.salt_yesterday.to_string()),
                        ("KT 상담신청", stats.kt_yesterday.to_string()),
                        (
                            "Total Yesterday",
                            (stats.salt_yesterday + stats.kt_yesterday).to_string(),
                        ),
                    ]),
                    escape_html(&stats.week_label),
                    table(&[
                        ("SALT 상담신청", stats.salt_this_week.to_string()),
                        ("KT 상담신청", stats.kt_this_week.to_string()),
                        (
                            "Total This Week",
                            (stats.salt_this_week + stats.kt_this_week).to_string(),
                        ),
                    ]),
                    format_kst(stats.generated_at),
                    FOOTER
                ),
            },
        }
    }
}

// ── Delivery ────────────────────────────────────────────────────

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// SMTP delivery to the configured admin list.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig, recipients: &[String]) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(std::time::Duration::from_secs(10)))
            .build();
        let from: Mailbox = config.from.parse()?;
        let to = recipients
            .iter()
            .map(|r| r.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()?;
        anyhow::ensure!(!to.is_empty(), "ADMIN_EMAILS is empty; nowhere to send mail");
        Ok(SmtpNotifier { transport, from, to })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let rendered = notification.render();
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(rendered.subject)
            .header(ContentType::TEXT_HTML);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let message = builder.body(rendered.html)?;
        self.transport.send(message).await?;
        info!(kind = notification.kind(), recipients = self.to.len(), "notification mailed");
        Ok(())
    }
}

/// Stand-in when SMTP is not configured.
pub struct LogNotifier {
    recipients: Vec<String>,
}

impl LogNotifier {
    pub fn new(recipients: Vec<String>) -> Self {
        LogNotifier { recipients }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let rendered = notification.render();
        info!(
            kind = notification.kind(),
            subject = %rendered.subject,
            recipients = ?self.recipients,
            "notification (smtp disabled)"
        );
        Ok(())
    }
}

/// Captures notifications in memory. Can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("notifier unavailable");
        }
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}
