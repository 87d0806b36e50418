//! Sequential batch printing with pause, cancel and selective retry.
//!
//! The controller owns the job list. One worker task per pass walks the
//! selected jobs in enqueue order and is the only writer of job status;
//! everything else reads snapshots or subscribes to [`BatchUpdate`]s.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use halfsheet_layout::constants::{A5_TOLERANCE, MAX_REQUEST_DPI, MIN_RENDER_DPI};
use halfsheet_layout::{DocumentInfo, RenderBudget, TemplateStore, pixel_size, place_for_template};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::collaborators::{PageRasterizer, PageSizeProvider, SheetPlacement};
use crate::events::{BatchSummary, BatchUpdate, Progress, Subscribers};
use crate::job::{JobError, JobStatus, PrintJob, display_name};
use crate::printer::PrinterHandle;

/// Only the first page of each document is placed
const SOURCE_PAGE_INDEX: usize = 0;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
    #[error("a batch is already running")]
    Busy,
    #[error("no pending jobs to print")]
    NoPendingJobs,
    #[error("no failed jobs to retry")]
    NoFailedJobs,
}

/// Printer, template and resolution for one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub printer: String,
    pub template_id: String,
    pub dpi: u32,
}

impl BatchRequest {
    /// DPI is clamped to the supported print range
    pub fn new(printer: impl Into<String>, template_id: impl Into<String>, dpi: u32) -> Self {
        Self {
            printer: printer.into(),
            template_id: template_id.into(),
            dpi: dpi.clamp(MIN_RENDER_DPI, MAX_REQUEST_DPI),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub budget: RenderBudget,
    /// Stored for compatibility. Jobs always run one at a time.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            budget: RenderBudget::default(),
            concurrency: 1,
        }
    }
}

/// Everything the worker calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub page_sizes: Arc<dyn PageSizeProvider>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub templates: Arc<dyn TemplateStore>,
    pub printer: PrinterHandle,
}

struct Shared {
    jobs: RwLock<Vec<PrintJob>>,
    running: AtomicBool,
    gate: watch::Sender<bool>,
    cancel: Mutex<CancelToken>,
    subscribers: Subscribers,
    collaborators: Collaborators,
    config: BatchConfig,
}

impl Shared {
    fn jobs(&self) -> std::sync::RwLockReadGuard<'_, Vec<PrintJob>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn jobs_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<PrintJob>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel_token(&self) -> std::sync::MutexGuard<'_, CancelToken> {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn summary(&self) -> BatchSummary {
        BatchSummary::from_jobs(self.jobs().iter())
    }
}

/// Clears the running flag when the pass ends, even by panic
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

pub struct BatchController {
    shared: Arc<Shared>,
}

impl BatchController {
    pub fn new(collaborators: Collaborators, config: BatchConfig) -> Self {
        if config.concurrency > 1 {
            log::warn!(
                "Concurrency {} requested; jobs are printed one at a time",
                config.concurrency
            );
        }
        let (gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                jobs: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                gate,
                cancel: Mutex::new(CancelToken::new()),
                subscribers: Subscribers::default(),
                collaborators,
                config,
            }),
        }
    }

    /// Append Pending jobs. Never starts processing.
    pub fn enqueue<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut jobs = self.shared.jobs_mut();
        let before = jobs.len();
        jobs.extend(paths.into_iter().map(PrintJob::new));
        let added = jobs.len() - before;
        log::debug!("Enqueued {added} job(s), {} total", jobs.len());
        added
    }

    /// Print every job that is Pending right now, in enqueue order.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, request: BatchRequest) -> Result<BatchRun, BatchError> {
        self.begin_pass(request, PassKind::Main)
    }

    /// Reset every Failed job to Pending and print exactly those again
    pub fn retry_failed(&self, request: BatchRequest) -> Result<BatchRun, BatchError> {
        self.begin_pass(request, PassKind::Retry)
    }

    /// Hold the worker before its next job. The current job finishes.
    pub fn pause(&self) {
        log::info!("Batch paused");
        self.shared.gate.send_replace(false);
    }

    pub fn resume(&self) {
        log::info!("Batch resumed");
        self.shared.gate.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        !*self.shared.gate.borrow()
    }

    /// Stop the active pass before its next job and release a paused worker
    pub fn cancel_all(&self) {
        log::info!("Cancelling batch");
        self.shared.cancel_token().cancel();
        self.shared.gate.send_replace(true);
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BatchUpdate> {
        self.shared.subscribers.subscribe()
    }

    /// Snapshot of every job
    pub fn jobs(&self) -> Vec<PrintJob> {
        self.shared.jobs().clone()
    }

    pub fn summary(&self) -> BatchSummary {
        self.shared.summary()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn begin_pass(&self, request: BatchRequest, kind: PassKind) -> Result<BatchRun, BatchError> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BatchError::Busy);
        }
        let guard = RunningGuard(self.shared.clone());

        let wanted = kind.selects();
        let indices: Vec<usize> = self
            .shared
            .jobs()
            .iter()
            .enumerate()
            .filter(|(_, job)| job.status() == wanted)
            .map(|(index, _)| index)
            .collect();
        if indices.is_empty() {
            return Err(kind.empty_error());
        }

        let token = CancelToken::new();
        *self.shared.cancel_token() = token.clone();
        self.shared.gate.send_replace(true);

        let total = indices.len();
        log::info!(
            "Starting {} pass over {total} job(s) on '{}' at {} dpi",
            kind.label(),
            request.printer,
            request.dpi
        );
        let worker = Worker {
            shared: self.shared.clone(),
            request,
            token,
            gate: self.shared.gate.subscribe(),
        };
        let handle = tokio::spawn(worker.run(indices, kind, guard));
        Ok(BatchRun {
            total,
            handle,
            shared: self.shared.clone(),
        })
    }
}

/// Handle to a pass started by [`BatchController::start`] or
/// [`BatchController::retry_failed`]
pub struct BatchRun {
    total: usize,
    handle: JoinHandle<BatchSummary>,
    shared: Arc<Shared>,
}

impl BatchRun {
    /// Jobs selected for this pass
    pub fn total(&self) -> usize {
        self.total
    }

    /// Wait for the pass to finish
    pub async fn wait(self) -> BatchSummary {
        match self.handle.await {
            Ok(summary) => summary,
            Err(e) => {
                log::error!("Batch worker stopped unexpectedly: {e}");
                self.shared.summary()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Main,
    Retry,
}

impl PassKind {
    fn selects(self) -> JobStatus {
        match self {
            PassKind::Main => JobStatus::Pending,
            PassKind::Retry => JobStatus::Failed,
        }
    }

    fn empty_error(self) -> BatchError {
        match self {
            PassKind::Main => BatchError::NoPendingJobs,
            PassKind::Retry => BatchError::NoFailedJobs,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PassKind::Main => "batch",
            PassKind::Retry => "retry",
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    request: BatchRequest,
    token: CancelToken,
    gate: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self, indices: Vec<usize>, kind: PassKind, guard: RunningGuard) -> BatchSummary {
        let total = indices.len();
        self.emit(BatchUpdate::Started {
            total,
            retry: kind == PassKind::Retry,
        });

        if kind == PassKind::Retry {
            let mut jobs = self.shared.jobs_mut();
            for &index in &indices {
                if let Err(e) = jobs[index].reset_for_retry() {
                    log::error!("Job {index}: {e}");
                }
            }
        }

        let mut processed = 0;
        let mut cancelled = false;
        for index in indices {
            if !self.wait_for_gate().await || self.token.is_cancelled() {
                cancelled = true;
                break;
            }
            self.process(index).await;
            processed += 1;
            self.emit(BatchUpdate::Progress(Progress::new(processed, total)));
        }

        let mut summary = self.shared.summary();
        summary.cancelled = cancelled;
        if cancelled {
            log::info!("Batch cancelled after {processed} of {total} job(s)");
        } else {
            log::info!(
                "Batch finished: {} done, {} failed",
                summary.done,
                summary.failed
            );
        }

        drop(guard);
        self.emit(BatchUpdate::Finished { summary });
        summary
    }

    /// Block while paused. Returns false if cancelled while waiting.
    async fn wait_for_gate(&mut self) -> bool {
        tokio::select! {
            open = self.gate.wait_for(|open| *open) => open.is_ok(),
            _ = self.token.cancelled() => false,
        }
    }

    async fn process(&self, index: usize) {
        let (template, path) = {
            let mut jobs = self.shared.jobs_mut();
            let job = &mut jobs[index];
            let template = self.shared.collaborators.templates.get(&self.request.template_id);
            job.template_id = template.id.clone();
            if let Err(e) = job.begin() {
                log::error!("Job {index}: {e}");
                return;
            }
            (template, job.file_path.clone())
        };
        let file_name = display_name(&path);
        log::info!("Printing {file_name} with template '{}'", template.id);
        self.emit(BatchUpdate::JobStarted {
            index,
            file_name: file_name.clone(),
        });

        let result = self.print_one(index, &path, &template).await;

        let (status, error) = {
            let mut jobs = self.shared.jobs_mut();
            let job = &mut jobs[index];
            let transition = match &result {
                Ok(()) => job.complete(),
                Err(e) => job.fail(e.to_string()),
            };
            if let Err(e) = transition {
                log::error!("Job {index}: {e}");
            }
            (job.status(), job.error_message().map(str::to_string))
        };
        match &result {
            Ok(()) => log::info!("Printed {file_name}"),
            Err(e) => log::warn!("Failed to print {file_name}: {e}"),
        }
        self.emit(BatchUpdate::JobFinished {
            index,
            status,
            error,
        });
    }

    async fn print_one(
        &self,
        index: usize,
        path: &Path,
        template: &halfsheet_layout::Template,
    ) -> Result<(), JobError> {
        let collaborators = &self.shared.collaborators;

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(JobError::Input(format!(
                "file not found: {}",
                path.display()
            )));
        }

        let info = self.document_info(path).await?;
        self.shared.jobs_mut()[index].record_document(info);
        let page = info.page;
        if !page.is_a5_like(A5_TOLERANCE) {
            let (w, h) = page.size_mm();
            log::warn!(
                "{} is {w:.1}×{h:.1}mm, not A5; printing anyway",
                path.display()
            );
        }

        let area = collaborators
            .printer
            .printable_area(&self.request.printer)
            .await?;
        let layout = place_for_template(page, &area, template);
        log::debug!("Placement for {}: {layout:?}", path.display());

        if let Some(overflow) = layout.overflow(
            area.width_mm,
            area.height_mm,
            f64::from(template.margin_mm),
            f64::from(template.safe_gap_mm),
        ) {
            log::warn!(
                "{} overflows the safe region by {:.1}mm vertically, {:.1}mm horizontally",
                path.display(),
                overflow.vertical_mm,
                overflow.horizontal_mm
            );
            self.emit(BatchUpdate::Overflow { index, overflow });
        }

        let dpi = self.shared.config.budget.effective_dpi(
            layout.content_width_mm,
            layout.content_height_mm,
            self.request.dpi,
        );
        if dpi < self.request.dpi {
            log::info!(
                "Rendering {} at {dpi} dpi instead of {} to stay under {} pixels",
                path.display(),
                self.request.dpi,
                self.shared.config.budget.max_pixels
            );
        }
        let (pixel_width, pixel_height) =
            pixel_size(layout.content_width_mm, layout.content_height_mm, dpi);

        let rasterizer = collaborators.rasterizer.clone();
        let render_path = path.to_owned();
        let raster = tokio::task::spawn_blocking(move || {
            rasterizer.render(&render_path, SOURCE_PAGE_INDEX, pixel_width, pixel_height)
        })
        .await??;

        let placement = SheetPlacement::new(&layout, &area, dpi);
        collaborators
            .printer
            .send(raster, placement, &self.request.printer)
            .await?;
        Ok(())
    }

    async fn document_info(&self, path: &Path) -> Result<DocumentInfo, JobError> {
        let provider = self.shared.collaborators.page_sizes.clone();
        let path = path.to_owned();
        let info =
            tokio::task::spawn_blocking(move || provider.document_info(&path, SOURCE_PAGE_INDEX))
                .await??;
        Ok(info)
    }

    fn emit(&self, update: BatchUpdate) {
        self.shared.subscribers.emit(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_clamps_dpi() {
        assert_eq!(BatchRequest::new("p", "default", 72).dpi, 150);
        assert_eq!(BatchRequest::new("p", "default", 600).dpi, 600);
        assert_eq!(BatchRequest::new("p", "default", 4800).dpi, 1200);
    }
}
