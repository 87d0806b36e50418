use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;

use halfsheet_layout::{RenderBudget, Template, TemplateLibrary, cap_resolution, pixel_size};
use halfsheet_runtime::*;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// A5 page in points
const A5_PAGE: SourcePage = SourcePage {
    width_pt: 419.53,
    height_pt: 595.28,
};

/// A4 page in points, too tall for the top half even at 90%
const A4_PAGE: SourcePage = SourcePage {
    width_pt: 595.28,
    height_pt: 841.89,
};

const WAIT: Duration = Duration::from_secs(5);

const MOCK_PAGE_COUNT: usize = 4;

struct MockPages {
    page: SourcePage,
    /// When set, files named `bad*` fail to parse
    break_bad: AtomicBool,
}

impl PageSizeProvider for MockPages {
    fn page_size(&self, path: &Path, _page_index: usize) -> Result<SourcePage, CollaboratorError> {
        let name = path.file_name().unwrap().to_string_lossy();
        if self.break_bad.load(Ordering::SeqCst) && name.starts_with("bad") {
            return Err(CollaboratorError::InvalidFormat("corrupt xref".to_string()));
        }
        Ok(self.page)
    }

    fn page_count(&self, _path: &Path) -> Result<usize, CollaboratorError> {
        Ok(MOCK_PAGE_COUNT)
    }
}

#[derive(Default)]
struct RecordingRasterizer {
    calls: Mutex<Vec<(PathBuf, u32, u32)>>,
}

impl RecordingRasterizer {
    fn files(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _, _)| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

impl PageRasterizer for RecordingRasterizer {
    fn render(
        &self,
        path: &Path,
        _page_index: usize,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Result<Raster, CollaboratorError> {
        let name = path.file_name().unwrap().to_string_lossy();
        if name.starts_with("unrenderable") {
            return Err(CollaboratorError::Render(format!("{name}: broken content stream")));
        }
        self.calls
            .lock()
            .unwrap()
            .push((path.to_owned(), pixel_width, pixel_height));
        Ok(Raster::new(2, 2))
    }
}

struct FixedArea(PrintableArea);

impl PrinterCapabilityProvider for FixedArea {
    fn printable_area(&mut self, printer: &str) -> Result<PrintableArea, CollaboratorError> {
        if printer == "offline" {
            return Err(CollaboratorError::PrinterUnavailable(printer.to_string()));
        }
        Ok(self.0)
    }

    fn printers(&mut self) -> Result<Vec<String>, CollaboratorError> {
        Ok(vec!["lab".to_string()])
    }
}

type Sent = Arc<Mutex<Vec<(SheetPlacement, String)>>>;

struct RecordingSink {
    sent: Sent,
}

impl PrintSink for RecordingSink {
    fn send(
        &mut self,
        _raster: &Raster,
        placement: &SheetPlacement,
        printer: &str,
    ) -> Result<(), CollaboratorError> {
        self.sent
            .lock()
            .unwrap()
            .push((*placement, printer.to_string()));
        Ok(())
    }
}

/// Rejects the `fail_on`-th send (1-based)
struct FailingSink {
    sent: Sent,
    sends: usize,
    fail_on: usize,
}

impl PrintSink for FailingSink {
    fn send(
        &mut self,
        _raster: &Raster,
        placement: &SheetPlacement,
        printer: &str,
    ) -> Result<(), CollaboratorError> {
        self.sends += 1;
        if self.sends == self.fail_on {
            return Err(CollaboratorError::Print("paper jam".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((*placement, printer.to_string()));
        Ok(())
    }
}

/// Announces each send, then blocks until the test releases it
struct GatedSink {
    entered: mpsc::UnboundedSender<()>,
    release: std_mpsc::Receiver<()>,
    sent: Sent,
}

impl PrintSink for GatedSink {
    fn send(
        &mut self,
        _raster: &Raster,
        placement: &SheetPlacement,
        printer: &str,
    ) -> Result<(), CollaboratorError> {
        let _ = self.entered.send(());
        self.release
            .recv()
            .map_err(|_| CollaboratorError::Print("test ended".to_string()))?;
        self.sent
            .lock()
            .unwrap()
            .push((*placement, printer.to_string()));
        Ok(())
    }
}

struct Harness {
    controller: BatchController,
    dir: TempDir,
    pages: Arc<MockPages>,
    rasterizer: Arc<RecordingRasterizer>,
    sent: Sent,
}

struct Gate {
    entered: mpsc::UnboundedReceiver<()>,
    release: std_mpsc::Sender<()>,
}

impl Gate {
    async fn wait_entered(&mut self) {
        tokio::time::timeout(WAIT, self.entered.recv())
            .await
            .expect("sink was never reached")
            .expect("printer host stopped");
    }

    fn release(&self) {
        self.release.send(()).unwrap();
    }
}

fn area() -> PrintableArea {
    PrintableArea::new(200.0, 287.0, 5.0, 5.0)
}

fn templates() -> Arc<TemplateLibrary> {
    Arc::new(TemplateLibrary::in_memory(vec![Template {
        id: "strict".to_string(),
        name: "Strict".to_string(),
        margin_mm: 3,
        auto_shrink: false,
        safe_gap_mm: 5,
    }]))
}

fn harness_with<S, F>(page: SourcePage, config: BatchConfig, sink: F) -> Harness
where
    S: PrintSink + 'static,
    F: FnOnce(Sent) -> S + Send + 'static,
{
    let sent: Sent = Arc::default();
    let host_sent = sent.clone();
    let printer = PrinterHost::spawn(move || (FixedArea(area()), sink(host_sent))).unwrap();
    let pages = Arc::new(MockPages {
        page,
        break_bad: AtomicBool::new(false),
    });
    let rasterizer = Arc::new(RecordingRasterizer::default());
    let controller = BatchController::new(
        Collaborators {
            page_sizes: pages.clone(),
            rasterizer: rasterizer.clone(),
            templates: templates(),
            printer,
        },
        config,
    );
    Harness {
        controller,
        dir: TempDir::new().unwrap(),
        pages,
        rasterizer,
        sent,
    }
}

fn harness() -> Harness {
    harness_with(A5_PAGE, BatchConfig::default(), |sent| RecordingSink { sent })
}

fn gated_harness() -> (Harness, Gate) {
    let (entered_tx, entered_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    let harness = harness_with(A5_PAGE, BatchConfig::default(), move |sent| GatedSink {
        entered: entered_tx,
        release: release_rx,
        sent,
    });
    (
        harness,
        Gate {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

impl Harness {
    /// Create files on disk and enqueue them
    fn enqueue(&self, names: &[&str]) {
        let paths: Vec<PathBuf> = names
            .iter()
            .map(|name| {
                let path = self.dir.path().join(name);
                std::fs::write(&path, b"%PDF-1.7").unwrap();
                path
            })
            .collect();
        self.controller.enqueue(paths);
    }

    fn statuses(&self) -> Vec<JobStatus> {
        self.controller.jobs().iter().map(PrintJob::status).collect()
    }
}

fn request() -> BatchRequest {
    BatchRequest::new("lab", "default", 300)
}

async fn wait_for_update(
    rx: &mut mpsc::UnboundedReceiver<BatchUpdate>,
    mut matches: impl FnMut(&BatchUpdate) -> bool,
) -> BatchUpdate {
    tokio::time::timeout(WAIT, async {
        loop {
            let update = rx.recv().await.expect("controller dropped");
            if matches(&update) {
                return update;
            }
        }
    })
    .await
    .expect("update never arrived")
}

fn drain(rx: &mut mpsc::UnboundedReceiver<BatchUpdate>) -> Vec<BatchUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn test_jobs_print_in_enqueue_order() {
    let h = harness();
    h.enqueue(&["one.pdf", "two.pdf", "three.pdf"]);

    let run = h.controller.start(request()).unwrap();
    assert_eq!(run.total(), 3);
    let summary = run.wait().await;

    assert_eq!(summary.done, 3);
    assert!(!summary.cancelled);
    assert_eq!(h.rasterizer.files(), ["one.pdf", "two.pdf", "three.pdf"]);
    assert_eq!(h.statuses(), vec![JobStatus::Done; 3]);
    assert!(!h.controller.is_running());
}

#[tokio::test]
async fn test_progress_reported_after_every_job() {
    let h = harness();
    let mut rx = h.controller.subscribe();
    h.enqueue(&["a.pdf", "b.pdf", "c.pdf"]);

    h.controller.start(request()).unwrap().wait().await;
    let updates = drain(&mut rx);

    let percents: Vec<u32> = updates
        .iter()
        .filter_map(|u| match u {
            BatchUpdate::Progress(p) => Some(p.percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, [33, 66, 100]);

    assert_eq!(
        updates.first(),
        Some(&BatchUpdate::Started {
            total: 3,
            retry: false
        })
    );
    match updates.last() {
        Some(BatchUpdate::Finished { summary }) => assert_eq!(summary.done, 3),
        other => panic!("expected Finished last, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_file_fails_only_that_job() {
    let h = harness();
    h.enqueue(&["a.pdf"]);
    h.controller.enqueue([h.dir.path().join("gone.pdf")]);
    h.enqueue(&["c.pdf"]);

    let summary = h.controller.start(request()).unwrap().wait().await;
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed, 1);

    let jobs = h.controller.jobs();
    assert_eq!(jobs[1].status(), JobStatus::Failed);
    assert!(jobs[1].error_message().unwrap().contains("file not found"));
    assert_eq!(h.rasterizer.files(), ["a.pdf", "c.pdf"]);
}

#[tokio::test]
async fn test_unavailable_printer_fails_each_job() {
    let h = harness();
    h.enqueue(&["a.pdf", "b.pdf"]);

    let summary = h
        .controller
        .start(BatchRequest::new("offline", "default", 300))
        .unwrap()
        .wait()
        .await;
    assert_eq!(summary.failed, 2);
    for job in h.controller.jobs() {
        assert_eq!(job.error_message(), Some("printer unavailable: offline"));
    }
    assert!(h.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_start_rejected_without_pending_jobs() {
    let h = harness();
    assert_eq!(h.controller.start(request()).err(), Some(BatchError::NoPendingJobs));
    assert_eq!(
        h.controller.retry_failed(request()).err(),
        Some(BatchError::NoFailedJobs)
    );
    assert!(!h.controller.is_running());

    h.enqueue(&["a.pdf"]);
    h.controller.start(request()).unwrap().wait().await;
    assert_eq!(h.controller.start(request()).err(), Some(BatchError::NoPendingJobs));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_pass_is_busy() {
    let (h, mut gate) = gated_harness();
    h.enqueue(&["a.pdf", "b.pdf"]);

    let run = h.controller.start(request()).unwrap();
    gate.wait_entered().await;
    assert!(h.controller.is_running());

    h.enqueue(&["late.pdf"]);
    let before = h.statuses();
    assert_eq!(h.controller.start(request()).err(), Some(BatchError::Busy));
    assert_eq!(h.controller.retry_failed(request()).err(), Some(BatchError::Busy));
    assert_eq!(h.statuses(), before);

    gate.release();
    gate.wait_entered().await;
    gate.release();
    run.wait().await;

    // Enqueued mid-run, so left for the next pass
    assert_eq!(
        h.statuses(),
        [JobStatus::Done, JobStatus::Done, JobStatus::Pending]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_holds_next_job_until_resume() {
    let (h, mut gate) = gated_harness();
    let mut rx = h.controller.subscribe();
    h.enqueue(&["a.pdf", "b.pdf", "c.pdf"]);

    let run = h.controller.start(request()).unwrap();
    gate.wait_entered().await;
    h.controller.pause();
    assert!(h.controller.is_paused());
    gate.release();

    wait_for_update(&mut rx, |u| {
        matches!(u, BatchUpdate::JobFinished { index: 0, .. })
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.statuses(),
        [JobStatus::Done, JobStatus::Pending, JobStatus::Pending]
    );
    assert_eq!(h.rasterizer.files(), ["a.pdf"]);

    h.controller.resume();
    gate.wait_entered().await;
    gate.release();
    gate.wait_entered().await;
    gate.release();

    let summary = run.wait().await;
    assert_eq!(summary.done, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_leaves_remaining_jobs_untouched() {
    let (h, mut gate) = gated_harness();
    h.enqueue(&["a.pdf", "b.pdf", "c.pdf"]);

    let run = h.controller.start(request()).unwrap();
    gate.wait_entered().await;
    h.controller.cancel_all();
    gate.release();

    let summary = tokio::time::timeout(WAIT, run.wait()).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(
        h.statuses(),
        [JobStatus::Done, JobStatus::Pending, JobStatus::Pending]
    );
    assert_eq!(h.sent.lock().unwrap().len(), 1);
    assert!(!h.controller.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_releases_paused_batch() {
    let (h, mut gate) = gated_harness();
    let mut rx = h.controller.subscribe();
    h.enqueue(&["a.pdf", "b.pdf"]);

    let run = h.controller.start(request()).unwrap();
    gate.wait_entered().await;
    h.controller.pause();
    gate.release();
    wait_for_update(&mut rx, |u| {
        matches!(u, BatchUpdate::JobFinished { index: 0, .. })
    })
    .await;

    h.controller.cancel_all();
    let summary = tokio::time::timeout(WAIT, run.wait()).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(h.statuses(), [JobStatus::Done, JobStatus::Pending]);

    // A fresh pass starts with an open gate and a new token
    let run = h.controller.start(request()).unwrap();
    gate.wait_entered().await;
    gate.release();
    let summary = run.wait().await;
    assert!(!summary.cancelled);
    assert_eq!(summary.done, 2);
}

#[tokio::test]
async fn test_retry_reprocesses_only_failed_jobs() {
    let h = harness();
    h.pages.break_bad.store(true, Ordering::SeqCst);
    h.enqueue(&["good.pdf", "bad.pdf", "fine.pdf"]);

    let summary = h.controller.start(request()).unwrap().wait().await;
    assert_eq!((summary.done, summary.failed), (2, 1));
    assert_eq!(
        h.controller.jobs()[1].error_message(),
        Some("invalid document: corrupt xref")
    );

    h.pages.break_bad.store(false, Ordering::SeqCst);
    let mut rx = h.controller.subscribe();
    let run = h.controller.retry_failed(request()).unwrap();
    assert_eq!(run.total(), 1);
    let summary = run.wait().await;

    assert_eq!(summary.done, 3);
    assert_eq!(
        h.rasterizer.files(),
        ["good.pdf", "fine.pdf", "bad.pdf"]
    );
    assert_eq!(h.controller.jobs()[1].error_message(), None);
    assert_eq!(
        drain(&mut rx).first(),
        Some(&BatchUpdate::Started {
            total: 1,
            retry: true
        })
    );
}

#[tokio::test]
async fn test_unknown_template_falls_back_to_default() {
    let h = harness();
    h.enqueue(&["a.pdf"]);

    h.controller
        .start(BatchRequest::new("lab", "no-such-template", 300))
        .unwrap()
        .wait()
        .await;
    let job = &h.controller.jobs()[0];
    assert_eq!(job.status(), JobStatus::Done);
    assert_eq!(job.template_id, "default");
}

#[tokio::test]
async fn test_placement_includes_printable_origin() {
    let h = harness();
    h.enqueue(&["a.pdf"]);
    h.controller.start(request()).unwrap().wait().await;

    let sent = h.sent.lock().unwrap();
    let (placement, printer) = &sent[0];
    assert_eq!(printer, "lab");
    // origin 5mm + default margin 3mm
    assert!((placement.offset_left_mm - 8.0).abs() < 1e-9);
    assert!((placement.offset_top_mm - 8.0).abs() < 1e-9);
    assert_eq!(placement.dpi, 300);
}

#[tokio::test]
async fn test_overflow_is_reported_but_printed() {
    let h = harness_with(A4_PAGE, BatchConfig::default(), |sent| RecordingSink { sent });
    let mut rx = h.controller.subscribe();
    h.enqueue(&["poster.pdf"]);

    let summary = h
        .controller
        .start(BatchRequest::new("lab", "strict", 300))
        .unwrap()
        .wait()
        .await;
    assert_eq!(summary.done, 1);

    let overflow = drain(&mut rx).into_iter().find_map(|u| match u {
        BatchUpdate::Overflow { index, overflow } => Some((index, overflow)),
        _ => None,
    });
    let (index, overflow) = overflow.expect("overflow update");
    assert_eq!(index, 0);
    assert!(overflow.vertical_mm > 0.0);
    assert_eq!(h.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_render_resolution_respects_budget() {
    let config = BatchConfig {
        budget: RenderBudget::new(2_000_000),
        concurrency: 4,
    };
    let h = harness_with(A5_PAGE, config, |sent| RecordingSink { sent });
    h.enqueue(&["a.pdf"]);
    h.controller
        .start(BatchRequest::new("lab", "default", 600))
        .unwrap()
        .wait()
        .await;

    let (_, width, height) = h.rasterizer.calls.lock().unwrap()[0].clone();
    let placement = h.sent.lock().unwrap()[0].0;
    let expected_dpi = cap_resolution(
        placement.content_width_mm,
        placement.content_height_mm,
        600,
        2_000_000,
    );
    assert!(expected_dpi < 600);
    assert_eq!(placement.dpi, expected_dpi);
    assert_eq!(
        (width, height),
        pixel_size(
            placement.content_width_mm,
            placement.content_height_mm,
            expected_dpi
        )
    );
}

#[tokio::test]
async fn test_print_failure_fails_only_that_job() {
    let h = harness_with(A5_PAGE, BatchConfig::default(), |sent| FailingSink {
        sent,
        sends: 0,
        fail_on: 2,
    });
    h.enqueue(&["a.pdf", "b.pdf", "c.pdf"]);

    let summary = h.controller.start(request()).unwrap().wait().await;
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed, 1);

    let jobs = h.controller.jobs();
    assert_eq!(
        h.statuses(),
        [JobStatus::Done, JobStatus::Failed, JobStatus::Done]
    );
    assert_eq!(jobs[1].error_message(), Some("print failed: paper jam"));
    assert_eq!(h.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_render_failure_fails_only_that_job() {
    let h = harness();
    h.enqueue(&["a.pdf", "unrenderable.pdf", "c.pdf"]);

    let summary = h.controller.start(request()).unwrap().wait().await;
    assert_eq!(summary.done, 2);
    assert_eq!(summary.failed, 1);

    let jobs = h.controller.jobs();
    assert_eq!(jobs[1].status(), JobStatus::Failed);
    assert!(
        jobs[1]
            .error_message()
            .unwrap()
            .starts_with("render failed: unrenderable.pdf")
    );
    assert_eq!(jobs[2].status(), JobStatus::Done);
    assert_eq!(h.sent.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_document_details_recorded_for_export() {
    let h = harness();
    h.enqueue(&["a.pdf"]);
    h.controller.enqueue([h.dir.path().join("gone.pdf")]);

    h.controller.start(request()).unwrap().wait().await;
    let jobs = h.controller.jobs();
    assert_eq!(
        jobs[0].document(),
        Some(DocumentInfo {
            page: A5_PAGE,
            page_count: MOCK_PAGE_COUNT,
        })
    );
    assert_eq!(jobs[1].document(), None);

    let csv = export::jobs_to_csv(&jobs).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert!(rows[1].starts_with("a.pdf,4,420x595 pt,default,Done,,"));
    assert!(rows[2].starts_with("gone.pdf,0,-,default,Failed,"));
}
