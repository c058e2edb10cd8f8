//! CSV export of email logs.

use super::{EmailLog, EmailLogStore, LogFilter, LogStoreError};

/// Column header of the export.
pub const CSV_HEADER: [&str; 9] = [
    "ID",
    "Email ID",
    "To",
    "From",
    "Subject",
    "Status",
    "Response",
    "Created At",
    "Updated At",
];

/// Render rows as CSV. An empty slice renders as an empty string.
///
/// # Errors
///
/// Returns [`LogStoreError::Export`] if the writer fails.
pub fn logs_to_csv(logs: &[EmailLog]) -> Result<String, LogStoreError> {
    if logs.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .map_err(|e| LogStoreError::Export(e.to_string()))?;

    for log in logs {
        let id = log.id.to_string();
        writer
            .write_record([
                id.as_str(),
                log.provider_id.as_str(),
                log.to_email.as_str(),
                log.from_email.as_str(),
                log.subject.as_str(),
                log.status.as_str(),
                log.response.as_str(),
                log.created_at.as_str(),
                log.updated_at.as_str(),
            ])
            .map_err(|e| LogStoreError::Export(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| LogStoreError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| LogStoreError::Export(e.to_string()))
}

impl EmailLogStore {
    /// Export the rows matching `filter` as CSV.
    ///
    /// Returns an empty string when logging is disabled or nothing matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or the CSV writer fails.
    pub async fn export_csv(&self, filter: &LogFilter) -> Result<String, LogStoreError> {
        let logs = self.query(filter).await?;
        logs_to_csv(&logs)
    }
}
