//! Export rendering for OD requests.
//!
//! CSV follows RFC 4180 quoting: fields containing a comma, quote or line
//! break are wrapped in quotes with inner quotes doubled. JSON is a
//! pretty-printed array of the records as stored.

use serde_json::Value;

use super::types::{ExportDocument, ExportFormat};
use crate::record::OdRequest;
use crate::storage::traits::StorageError;

const CSV_HEADER: [&str; 11] = [
    "id",
    "register_number",
    "student_name",
    "date",
    "periods",
    "reason",
    "status",
    "approved_by",
    "approved_at",
    "rejection_reason",
    "created_at",
];

pub fn render(format: ExportFormat, records: &[OdRequest]) -> Result<ExportDocument, StorageError> {
    let content = match format {
        ExportFormat::Csv => render_csv(records),
        ExportFormat::Json => render_json(records)?,
    };
    Ok(ExportDocument {
        format,
        content,
        record_count: records.len(),
    })
}

fn render_csv(records: &[OdRequest]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push_str("\r\n");

    for r in records {
        let periods = r
            .periods
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(";");
        let row = [
            r.id.clone(),
            r.register_number.clone(),
            r.student_name.clone(),
            r.date.format("%Y-%m-%d").to_string(),
            periods,
            r.reason.clone(),
            r.status.as_str().to_string(),
            r.approved_by.clone().unwrap_or_default(),
            r.approved_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            r.rejection_reason.clone().unwrap_or_default(),
            r.created_at.to_rfc3339(),
        ];
        let escaped: Vec<String> = row.iter().map(|f| escape_field(f)).collect();
        out.push_str(&escaped.join(","));
        out.push_str("\r\n");
    }
    out
}

fn render_json(records: &[OdRequest]) -> Result<String, StorageError> {
    let values: Vec<Value> = records
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    serde_json::to_string_pretty(&values).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
