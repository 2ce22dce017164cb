//! # Outbox: Reliable Side Effects
//!
//! A lead is only worth something if the sales team hears about it. Instead
//! of firing spreadsheet writes and emails from the request handler (and
//! losing them when the spreadsheet API hiccups), handlers write the record
//! and its [`Job`]s in one transaction. A background drain then executes due
//! jobs:
//!
//! ```text
//! handler ──tx──▶ record + outbox(pending)
//!                         │ claim (FOR UPDATE SKIP LOCKED)
//!                         ▼
//!                     in_flight ──ok──▶ done
//!                         │
//!                         └─err──▶ pending (+5s·2^n, ≤1h) ── n ≥ max ──▶ failed + SystemError mail
//! ```
//!
//! Jobs stuck `in_flight` (a crashed drain) are reclaimed after five minutes.
//! Execution is at-least-once; a spreadsheet row can be written twice if the
//! process dies between the write and `complete_job`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::db::{Database, OutboxRow};
use crate::ledger::{self, Ledger};
use crate::notify::{Notification, Notifier};
use crate::prom_metrics::{KindLabel, Metrics};
use crate::wizard::{EstimateKind, Submission};

pub const BASE_BACKOFF_SECS: u64 = 5;
pub const MAX_BACKOFF_SECS: u64 = 3600;
pub const STALE_IN_FLIGHT_SECS: i64 = 300;
pub const CLAIM_BATCH: i64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    Notify {
        notification: Notification,
    },
    MirrorEstimate {
        kind: EstimateKind,
        ip: String,
        submitted_at: DateTime<Utc>,
        submission: Submission,
    },
    MirrorQuestion {
        question_id: i64,
        created_at: DateTime<Utc>,
        phone: String,
        question: String,
        ip: String,
    },
    QuestionRead {
        question_id: i64,
        read: bool,
    },
    QuestionDelete {
        question_id: i64,
    },
}

impl Job {
    pub fn notify(notification: Notification) -> Self {
        Job::Notify { notification }
    }

    /// Stored in the `kind` column and used as the metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Notify { .. } => "notify",
            Job::MirrorEstimate { .. } => "mirror_estimate",
            Job::MirrorQuestion { .. } => "mirror_question",
            Job::QuestionRead { .. } => "question_read",
            Job::QuestionDelete { .. } => "question_delete",
        }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Delay before attempt `attempts + 1`: `5s · 2^attempts`, capped at an hour.
pub fn backoff(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 20) as u32;
    let secs = BASE_BACKOFF_SECS.saturating_mul(1u64 << exp);
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

/// Run one job against the side-effect sinks.
pub async fn execute(job: &Job, ledger: &dyn Ledger, notifier: &dyn Notifier) -> Result<()> {
    match job {
        Job::Notify { notification } => notifier.send(notification).await,
        Job::MirrorEstimate {
            kind,
            ip,
            submitted_at,
            submission,
        } => ledger::mirror_estimate(ledger, *kind, ip, *submitted_at, submission).await,
        Job::MirrorQuestion {
            question_id,
            created_at,
            phone,
            question,
            ip,
        } => ledger::mirror_question(ledger, *question_id, *created_at, phone, question, ip).await,
        Job::QuestionRead { question_id, read } => {
            if !ledger::set_question_read(ledger, *question_id, *read).await? {
                warn!(question_id, "question row not in sheet; read flag not mirrored");
            }
            Ok(())
        }
        Job::QuestionDelete { question_id } => {
            if !ledger::delete_question(ledger, *question_id).await? {
                warn!(question_id, "question row not in sheet; nothing to delete");
            }
            Ok(())
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub done: usize,
    pub retried: usize,
    pub failed: usize,
    pub reclaimed: u64,
    pub pruned: u64,
}

/// Everything a drain pass needs.
pub struct Drain<'a> {
    pub db: &'a Database,
    pub ledger: &'a dyn Ledger,
    pub notifier: &'a dyn Notifier,
    pub metrics: &'a Metrics,
    pub max_attempts: i32,
    /// Age after which `done` jobs are deleted.
    pub retention: Duration,
}

impl Drain<'_> {
    /// Reclaim stale claims, execute every due job once, then prune old
    /// finished jobs.
    pub async fn run_once(&self) -> Result<DrainReport> {
        let mut report = DrainReport {
            reclaimed: self.db.reclaim_stale_jobs(STALE_IN_FLIGHT_SECS).await?,
            ..Default::default()
        };
        if report.reclaimed > 0 {
            info!(count = report.reclaimed, "reclaimed stale outbox jobs");
        }
        loop {
            let batch = self.db.claim_due_jobs(CLAIM_BATCH).await?;
            if batch.is_empty() {
                break;
            }
            for row in batch {
                self.process(row, &mut report).await?;
            }
        }
        report.pruned = self.db.prune_done_jobs(self.retention).await?;
        if report.pruned > 0 {
            info!(count = report.pruned, "pruned finished outbox jobs");
        }
        let summary = self.db.outbox_summary().await?;
        self.metrics.outbox_pending.set(summary.pending);
        Ok(report)
    }

    async fn process(&self, row: OutboxRow, report: &mut DrainReport) -> Result<()> {
        let outcome = match serde_json::from_value::<Job>(row.payload.clone())
            .with_context(|| format!("outbox job {} has an unreadable payload", row.id))
        {
            Ok(job) => execute(&job, self.ledger, self.notifier).await,
            Err(e) => Err(e),
        };
        let err = match outcome {
            Ok(()) => {
                self.db.complete_job(row.id).await?;
                report.done += 1;
                return Ok(());
            }
            Err(e) => e,
        };

        self.metrics
            .outbox_failures
            .get_or_create(&KindLabel {
                kind: row.kind.clone(),
            })
            .inc();
        let message = format!("{:#}", err);
        // `attempts` was bumped by the claim.
        if row.attempts >= self.max_attempts {
            warn!(
                job_id = row.id,
                kind = %row.kind,
                attempts = row.attempts,
                error = %message,
                "outbox job failed permanently"
            );
            self.db.fail_job(row.id, &message).await?;
            report.failed += 1;
            self.report_failure(&row, &message).await;
        } else {
            let delay = backoff(row.attempts);
            warn!(
                job_id = row.id,
                kind = %row.kind,
                attempts = row.attempts,
                retry_in_secs = delay.as_secs(),
                error = %message,
                "outbox job failed; will retry"
            );
            self.db.retry_job(row.id, &message, delay).await?;
            report.retried += 1;
        }
        Ok(())
    }

    /// Tell the operators directly. Best effort: a failed report is logged.
    async fn report_failure(&self, row: &OutboxRow, message: &str) {
        let mut context = BTreeMap::new();
        context.insert("job_id".to_string(), row.id.to_string());
        context.insert("job_kind".to_string(), row.kind.clone());
        context.insert("attempts".to_string(), row.attempts.to_string());
        let notification = Notification::SystemError {
            error_type: format!("Outbox - {}", row.kind),
            message: message.to_string(),
            context,
            occurred_at: Utc::now(),
        };
        if let Err(e) = self.notifier.send(&notification).await {
            warn!(job_id = row.id, error = %e, "failure report could not be sent");
        }
    }
}
