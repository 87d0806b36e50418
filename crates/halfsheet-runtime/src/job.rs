use std::fmt;
use std::path::{Path, PathBuf};

use halfsheet_layout::{DEFAULT_TEMPLATE_ID, DocumentInfo};
use thiserror::Error;

use crate::collaborators::CollaboratorError;

/// Lifecycle of a print job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    /// Done or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Done => "Done",
            JobStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition the state machine does not allow
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot move job from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Why a single job failed. Recorded on the job; never stops the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("input error: {0}")]
    Input(String),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("worker task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for JobError {
    fn from(e: tokio::task::JoinError) -> Self {
        JobError::Join(e.to_string())
    }
}

/// One source document's placement and print attempt
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    pub file_path: PathBuf,
    pub template_id: String,
    status: JobStatus,
    error_message: Option<String>,
    document: Option<DocumentInfo>,
}

impl PrintJob {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            status: JobStatus::Pending,
            error_message: None,
            document: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Page count and placed page size, once the document has been read
    pub fn document(&self) -> Option<DocumentInfo> {
        self.document
    }

    pub(crate) fn record_document(&mut self, info: DocumentInfo) {
        self.document = Some(info);
    }

    /// File name for display, falling back to the full path
    pub fn display_name(&self) -> String {
        display_name(&self.file_path)
    }

    /// Pending → Running
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Pending, JobStatus::Running)?;
        self.error_message = None;
        Ok(())
    }

    /// Running → Done
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running, JobStatus::Done)
    }

    /// Running → Failed, keeping the message for inspection and export
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Running, JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Failed → Pending, only through an explicit retry.
    ///
    /// The previous error message stays visible until the job runs again.
    pub fn reset_for_retry(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed, JobStatus::Pending)
    }

    fn transition(&mut self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status != expected {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
