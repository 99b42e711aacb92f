//! On-duty (OD) requests: the records bulk operations act on.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::table::Table;
use crate::storage::traits::{Partition, PersistentStore, StorageError};

/// Item type used when queueing OD request mutations.
pub const OD_REQUEST_TYPE: &str = "od_request";

/// Students listed in [`RecordStats::top_students`].
pub const TOP_STUDENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OdStatus {
    Pending,
    Approved,
    Rejected,
}

impl OdStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for OdStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdRequest {
    pub id: String,
    pub student_id: String,
    pub register_number: String,
    pub student_name: String,
    /// Day the student is on duty
    pub date: DateTime<Utc>,
    /// Class periods missed
    pub periods: Vec<u8>,
    pub reason: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    pub status: OdStatus,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    /// Reviewer's note from the bulk action
    #[serde(default)]
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OdRequest {
    /// A fresh pending request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        student_id: impl Into<String>,
        register_number: impl Into<String>,
        student_name: impl Into<String>,
        date: DateTime<Utc>,
        periods: Vec<u8>,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            student_id: student_id.into(),
            register_number: register_number.into(),
            student_name: student_name.into(),
            date,
            periods,
            reason: reason.into(),
            attachment_url: None,
            status: OdStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            review_note: None,
            created_at,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == OdStatus::Pending
    }

    /// Submitted within the last day.
    #[must_use]
    pub fn is_recent(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at < Duration::hours(24)
    }

    pub fn approve(&mut self, reviewer: Option<&str>, note: &str, now: DateTime<Utc>) {
        self.status = OdStatus::Approved;
        self.approved_by = reviewer.map(str::to_string);
        self.approved_at = Some(now);
        self.review_note = Some(note.to_string());
        self.updated_at = Some(now);
    }

    pub fn reject(&mut self, reviewer: Option<&str>, reason: &str, now: DateTime<Utc>) {
        self.status = OdStatus::Rejected;
        self.approved_by = reviewer.map(str::to_string);
        self.approved_at = Some(now);
        self.rejection_reason = Some(reason.to_string());
        self.review_note = Some(reason.to_string());
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRequestCount {
    pub student_id: String,
    pub requests: usize,
}

/// Dashboard numbers over every local OD request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub total_requests: usize,
    /// Count per status name; statuses with no records are absent
    pub status_distribution: BTreeMap<String, usize>,
    /// Busiest students first, ties by student id
    pub top_students: Vec<StudentRequestCount>,
}

/// Local OD request storage.
#[derive(Clone)]
pub struct RecordStore {
    table: Table<OdRequest>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            table: Table::new(store, Partition::Records),
        }
    }

    pub async fn put(&self, record: &OdRequest) -> Result<(), StorageError> {
        self.table.put(&record.id, record).await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<OdRequest>, StorageError> {
        self.table.get(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.table.delete(id).await
    }

    /// Newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<OdStatus>) -> Result<Vec<OdRequest>, StorageError> {
        let mut records: Vec<OdRequest> = self
            .table
            .values()
            .await?
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// One student's requests, newest first.
    pub async fn list_by_student(&self, student_id: &str) -> Result<Vec<OdRequest>, StorageError> {
        let mut records = self.list(None).await?;
        records.retain(|r| r.student_id == student_id);
        Ok(records)
    }

    pub async fn stats(&self) -> Result<RecordStats, StorageError> {
        let records = self.table.values().await?;

        let mut status_distribution = BTreeMap::new();
        let mut per_student: HashMap<&str, usize> = HashMap::new();
        for record in &records {
            *status_distribution.entry(record.status.as_str().to_string()).or_insert(0) += 1;
            *per_student.entry(record.student_id.as_str()).or_insert(0) += 1;
        }

        let mut top_students: Vec<StudentRequestCount> = per_student
            .into_iter()
            .map(|(student_id, requests)| StudentRequestCount {
                student_id: student_id.to_string(),
                requests,
            })
            .collect();
        top_students.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.student_id.cmp(&b.student_id)));
        top_students.truncate(TOP_STUDENTS);

        Ok(RecordStats {
            total_requests: records.len(),
            status_distribution,
            top_students,
        })
    }
}
