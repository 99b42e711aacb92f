//! Types shared by the bulk orchestrator and its callers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::OdRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationType {
    Approval,
    Rejection,
    Export,
}

impl BulkOperationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Rejection => "rejection",
            Self::Export => "export",
        }
    }

    /// Approval and rejection must carry a non-empty reason.
    #[must_use]
    pub fn requires_reason(&self) -> bool {
        matches!(self, Self::Approval | Self::Rejection)
    }

    /// Export has no local side effect to reverse.
    #[must_use]
    pub fn is_undoable(&self) -> bool {
        !matches!(self, Self::Export)
    }
}

impl fmt::Display for BulkOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationStatus {
    Completed,
    /// Stopped early; counters cover only the items processed
    Cancelled,
}

impl BulkOperationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Orchestrator state machine.
///
/// `Idle → Validating → Executing → {Completed | Cancelled | Failed}`; the
/// next run starts again from `Validating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkState {
    Idle,
    Validating,
    Executing,
    Completed,
    Cancelled,
    Failed,
}

impl BulkState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Validating | Self::Executing)
    }
}

impl fmt::Display for BulkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(ValidationError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A rendered export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub format: ExportFormat,
    pub content: String,
    pub record_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub operation_id: String,
    pub operation_type: BulkOperationType,
    pub status: BulkOperationStatus,
    /// Number of ids requested, processed or not
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    /// One entry per failed item
    pub errors: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub can_undo: bool,
    #[serde(default)]
    pub export: Option<ExportDocument>,
}

impl BulkOperationResult {
    #[must_use]
    pub fn processed_items(&self) -> usize {
        self.successful_items + self.failed_items
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_items > 0
    }

    /// Wall time of the run, if it finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Short summary for a toast or status line.
    #[must_use]
    pub fn summary(&self) -> String {
        let verb = match self.operation_type {
            BulkOperationType::Approval => "approved",
            BulkOperationType::Rejection => "rejected",
            BulkOperationType::Export => "exported",
        };
        match (self.status, self.failed_items) {
            (BulkOperationStatus::Cancelled, _) => format!(
                "Cancelled after {} of {} items ({} {})",
                self.processed_items(),
                self.total_items,
                self.successful_items,
                verb
            ),
            (_, 0) => format!("{} of {} items {}", self.successful_items, self.total_items, verb),
            (_, failed) => format!(
                "{} of {} items {}, {} failed",
                self.successful_items, self.total_items, verb, failed
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationProgress {
    pub operation_id: String,
    /// Fraction done in `[0, 1]`
    pub progress: f64,
    pub processed_items: usize,
    pub total_items: usize,
    /// Id of the item just processed
    pub current_item: String,
    pub message: Option<String>,
}

impl BulkOperationProgress {
    #[must_use]
    pub fn new(operation_id: &str, processed: usize, total: usize, current_item: &str) -> Self {
        let progress = if total == 0 { 1.0 } else { processed as f64 / total as f64 };
        Self {
            operation_id: operation_id.to_string(),
            progress: progress.clamp(0.0, 1.0),
            processed_items: processed,
            total_items: total,
            current_item: current_item.to_string(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Prior state of every record a bulk run changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoSnapshot {
    pub operation_id: String,
    pub operation_type: BulkOperationType,
    pub created_at: DateTime<Utc>,
    pub prior: BTreeMap<String, OdRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(" JSON ".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(
            "pdf".parse::<ExportFormat>().unwrap_err(),
            ValidationError::UnsupportedFormat("pdf".into())
        );
    }

    #[test]
    fn test_progress_fraction() {
        let p = BulkOperationProgress::new("op", 1, 4, "b");
        assert_eq!(p.progress, 0.25);
        assert_eq!(BulkOperationProgress::new("op", 0, 0, "").progress, 1.0);
    }

    #[test]
    fn test_operation_type_rules() {
        assert!(BulkOperationType::Approval.requires_reason());
        assert!(!BulkOperationType::Export.requires_reason());
        assert!(!BulkOperationType::Export.is_undoable());
        assert!(BulkOperationType::Rejection.is_undoable());
    }

    #[test]
    fn test_summary() {
        let result = BulkOperationResult {
            operation_id: "op".into(),
            operation_type: BulkOperationType::Approval,
            status: BulkOperationStatus::Completed,
            total_items: 3,
            successful_items: 2,
            failed_items: 1,
            errors: vec!["b: not found".into()],
            start_time: Utc::now(),
            end_time: None,
            can_undo: true,
            export: None,
        };
        assert_eq!(result.summary(), "2 of 3 items approved, 1 failed");
        assert!(result.duration().is_none());
    }
}
