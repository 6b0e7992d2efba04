//! Duplicate Report Intake
//!
//! Members flag books they believe duplicate another record. Reports are
//! never deduplicated and never merge anything by themselves; closing a
//! report and merging books are separate operator actions.

use crate::auth::{require_admin, AuthContext, OperatorId};
use crate::store::Store;
use crate::utils::retry_on_lock;
use rdtk_common::db::BookId;
use rdtk_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Report identifier
pub type ReportId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            other => Err(Error::InvalidInput(format!("unknown report status '{}'", other))),
        }
    }
}

/// How an operator closes a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Resolved,
    Dismissed,
}

impl From<Resolution> for ReportStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Resolved => ReportStatus::Resolved,
            Resolution::Dismissed => ReportStatus::Dismissed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub id: ReportId,
    pub book_id: BookId,
    pub reporter_id: OperatorId,
    pub reason: String,
    pub status: ReportStatus,
    pub reported_at: String,
    pub resolved_at: Option<String>,
    pub resolved_by: Option<OperatorId>,
}

#[derive(FromRow)]
struct ReportRow {
    id: ReportId,
    book_id: BookId,
    reporter_id: OperatorId,
    reason: String,
    status: String,
    reported_at: String,
    resolved_at: Option<String>,
    resolved_by: Option<OperatorId>,
}

impl TryFrom<ReportRow> for DuplicateReport {
    type Error = Error;

    fn try_from(row: ReportRow) -> Result<Self> {
        Ok(DuplicateReport {
            id: row.id,
            book_id: row.book_id,
            reporter_id: row.reporter_id,
            reason: row.reason,
            status: row.status.parse()?,
            reported_at: row.reported_at,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
        })
    }
}

/// Acknowledgement returned to every submitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAck {
    pub received: bool,
}

const REPORT_COLUMNS: &str =
    "id, book_id, reporter_id, reason, status, reported_at, resolved_at, resolved_by";

#[derive(Clone)]
pub struct DuplicateReports {
    store: Store,
}

impl DuplicateReports {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// File a suspected-duplicate report
    ///
    /// Open to every member and always acknowledged; storage failures are
    /// logged for operators and never shown to the submitter.
    pub async fn submit_report(
        &self,
        book_id: BookId,
        reporter_id: OperatorId,
        reason: &str,
    ) -> ReportAck {
        let pool = self.store.pool();
        let reason = reason.trim();

        let result = retry_on_lock(
            "reports::submit_report",
            self.store.max_lock_wait_ms(),
            || async move {
                let reported_at = chrono::Utc::now().to_rfc3339();
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO duplicate_reports (book_id, reporter_id, reason, status, reported_at)
                    VALUES (?, ?, ?, 'pending', ?)
                    "#,
                )
                .bind(book_id)
                .bind(reporter_id)
                .bind(reason)
                .bind(reported_at)
                .execute(pool)
                .await?;
                Ok::<_, Error>(inserted.last_insert_rowid())
            },
        )
        .await;

        match result {
            Ok(report_id) => {
                tracing::info!(report_id, book_id, reporter_id, "Duplicate report received");
            }
            Err(err) => {
                tracing::error!(book_id, reporter_id, error = %err, "Failed to store duplicate report");
            }
        }

        ReportAck { received: true }
    }

    /// Open reports, newest first
    pub async fn list_pending(&self) -> Result<Vec<DuplicateReport>> {
        let sql = format!(
            "SELECT {} FROM duplicate_reports WHERE status = 'pending' ORDER BY reported_at DESC, id DESC",
            REPORT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .fetch_all(self.store.pool())
            .await?;
        rows.into_iter().map(DuplicateReport::try_from).collect()
    }

    /// Every report filed against a book, newest first
    pub async fn reports_for_book(&self, book_id: BookId) -> Result<Vec<DuplicateReport>> {
        let sql = format!(
            "SELECT {} FROM duplicate_reports WHERE book_id = ? ORDER BY reported_at DESC, id DESC",
            REPORT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(book_id)
            .fetch_all(self.store.pool())
            .await?;
        rows.into_iter().map(DuplicateReport::try_from).collect()
    }

    /// Close a pending report
    ///
    /// Does not merge anything; `Conflict` when the report is already closed.
    pub async fn resolve_report(
        &self,
        auth: &dyn AuthContext,
        report_id: ReportId,
        resolution: Resolution,
    ) -> Result<DuplicateReport> {
        require_admin(auth, "resolve duplicate reports")?;
        let operator = auth.operator_id();
        let status = ReportStatus::from(resolution);

        let report = self
            .store
            .write("reports::resolve_report", |conn| {
                Box::pin(async move {
                    let sql = format!("SELECT {} FROM duplicate_reports WHERE id = ?", REPORT_COLUMNS);
                    let row = sqlx::query_as::<_, ReportRow>(&sql)
                        .bind(report_id)
                        .fetch_optional(&mut *conn)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("report {}", report_id)))?;

                    let mut report = DuplicateReport::try_from(row)?;
                    if report.status != ReportStatus::Pending {
                        return Err(Error::Conflict(format!(
                            "report {} is already {}",
                            report_id, report.status
                        )));
                    }

                    let resolved_at = chrono::Utc::now().to_rfc3339();
                    sqlx::query(
                        "UPDATE duplicate_reports SET status = ?, resolved_at = ?, resolved_by = ? WHERE id = ?",
                    )
                    .bind(status.as_str())
                    .bind(&resolved_at)
                    .bind(operator)
                    .bind(report_id)
                    .execute(&mut *conn)
                    .await?;

                    report.status = status;
                    report.resolved_at = Some(resolved_at);
                    report.resolved_by = Some(operator);
                    Ok(report)
                })
            })
            .await?;

        tracing::info!(report_id, operator, status = %status, "Duplicate report closed");
        Ok(report)
    }
}
