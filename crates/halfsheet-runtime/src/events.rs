use std::sync::Mutex;

use halfsheet_layout::Overflow;
use tokio::sync::mpsc;

use crate::job::{JobStatus, PrintJob};

/// Aggregate progress after a job finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub percent: u32,
}

impl Progress {
    /// `percent = floor(processed * 100 / total)`, 0 for an empty pass
    pub fn new(processed: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (processed.saturating_mul(100) / total) as u32
        };
        Self {
            processed,
            total,
            percent,
        }
    }
}

/// Status counts over the whole job list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    /// Set when the pass that produced this summary was cancelled
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a PrintJob>) -> Self {
        let mut summary = Self::default();
        for job in jobs {
            match job.status() {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Running => summary.running += 1,
                JobStatus::Done => summary.done += 1,
                JobStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.failed
    }
}

/// Notifications pushed to subscribers while a pass runs
#[derive(Debug, Clone, PartialEq)]
pub enum BatchUpdate {
    Started {
        total: usize,
        retry: bool,
    },
    JobStarted {
        index: usize,
        file_name: String,
    },
    JobFinished {
        index: usize,
        status: JobStatus,
        error: Option<String>,
    },
    /// Content exceeds the safe region. The job still prints.
    Overflow {
        index: usize,
        overflow: Overflow,
    },
    Progress(Progress),
    Finished {
        summary: BatchSummary,
    },
}

/// Fan-out of updates to every live subscriber
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<BatchUpdate>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<BatchUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Send to all subscribers, dropping the ones that went away
    pub(crate) fn emit(&self, update: BatchUpdate) {
        self.lock().retain(|tx| tx.send(update.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<BatchUpdate>>> {
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent_floors() {
        assert_eq!(Progress::new(1, 3).percent, 33);
        assert_eq!(Progress::new(2, 3).percent, 66);
        assert_eq!(Progress::new(3, 3).percent, 100);
        assert_eq!(Progress::new(0, 0).percent, 0);
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let hub = Subscribers::default();
        let mut kept = hub.subscribe();
        drop(hub.subscribe());

        hub.emit(BatchUpdate::Progress(Progress::new(1, 2)));
        assert_eq!(hub.lock().len(), 1);
        assert_eq!(
            kept.try_recv().unwrap(),
            BatchUpdate::Progress(Progress::new(1, 2))
        );
    }
}
