//! Spreadsheet export of every lead record.
//!
//! The export is a transient CSV file. The caller sends it and deletes it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::ReportError;
use crate::store::{RecordStore, UserRecord};

const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A written export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub rows: usize,
    pub generated_at: DateTime<Utc>,
}

impl ExportArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("leads.csv")
            .to_string()
    }
}

/// Result of an export request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The store holds no records; no file was written.
    Empty,
    Written(ExportArtifact),
}

#[derive(Serialize)]
struct ExportRow<'a> {
    user_id: &'a str,
    display_name: Option<&'a str>,
    handle: Option<&'a str>,
    problem_category: Option<&'static str>,
    custom_problem_text: Option<&'a str>,
    contact_name: Option<&'a str>,
    age: Option<u32>,
    contact_handle: Option<&'a str>,
    created_at: String,
    completed_at: Option<String>,
}

impl<'a> From<&'a UserRecord> for ExportRow<'a> {
    fn from(record: &'a UserRecord) -> Self {
        Self {
            user_id: &record.user_id,
            display_name: record.display_name.as_deref(),
            handle: record.handle.as_deref(),
            problem_category: record.problem_category.map(|c| c.as_str()),
            custom_problem_text: record.custom_problem_text.as_deref(),
            contact_name: record.contact_name.as_deref(),
            age: record.age,
            contact_handle: record.contact_handle.as_deref(),
            created_at: record.created_at.format(CREATED_AT_FORMAT).to_string(),
            completed_at: record
                .completed_at
                .map(|t| t.format(CREATED_AT_FORMAT).to_string()),
        }
    }
}

/// Render records as CSV with a header row.
pub fn render_csv(records: &[UserRecord]) -> Result<Vec<u8>, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(ExportRow::from(record))?;
    }
    writer
        .into_inner()
        .map_err(|e| ReportError::Io(e.into_error()))
}

/// Export every record into `dir` as `leads_YYYYMMDD_HHMMSS.csv`.
pub async fn export_leads(
    store: &dyn RecordStore,
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<ExportOutcome, ReportError> {
    let records = store.export_all().await?;
    if records.is_empty() {
        return Ok(ExportOutcome::Empty);
    }

    let bytes = render_csv(&records)?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("leads_{}.csv", now.format("%Y%m%d_%H%M%S")));
    tokio::fs::write(&path, bytes).await?;

    info!(rows = records.len(), path = %path.display(), "Leads exported");
    Ok(ExportOutcome::Written(ExportArtifact {
        path,
        rows: records.len(),
        generated_at: now,
    }))
}
