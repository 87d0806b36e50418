use std::path::Path;

use thiserror::Error;

use crate::job::PrintJob;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const HEADER: [&str; 7] = ["Name", "Pages", "Size", "Template", "Status", "Message", "Path"];

/// Render the job list as CSV, one row per job.
///
/// Page count and size stay `0` and `-` until the job's document has been read.
pub fn jobs_to_csv(jobs: &[PrintJob]) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for job in jobs {
        let document = job.document();
        let pages = document.map_or(0, |info| info.page_count).to_string();
        let size = document.map_or_else(
            || "-".to_string(),
            |info| format!("{:.0}x{:.0} pt", info.page.width_pt, info.page.height_pt),
        );
        let path = job.file_path.display().to_string();
        writer.write_record([
            job.display_name().as_str(),
            pages.as_str(),
            size.as_str(),
            job.template_id.as_str(),
            job.status().as_str(),
            job.error_message().unwrap_or_default(),
            path.as_str(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write the job list to `path` as CSV
pub async fn export_csv(jobs: &[PrintJob], path: impl AsRef<Path>) -> Result<(), ExportError> {
    let contents = jobs_to_csv(jobs)?;
    tokio::fs::write(path.as_ref(), contents).await?;
    log::info!("Exported {} job(s) to {}", jobs.len(), path.as_ref().display());
    Ok(())
}
