mod logger;
mod paths;
mod render;
mod settings;
mod spool;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use halfsheet_layout::constants::{A5_TOLERANCE, DEFAULT_PRINT_DPI};
use halfsheet_layout::{
    CalibrationSheet, RenderBudget, Template, TemplateLibrary, TemplateStore, pixel_size,
    place_for_template, target_region,
};
use halfsheet_runtime::export;
use halfsheet_runtime::tool::{CompressOptions, compress_pdf};
use halfsheet_runtime::{
    BatchConfig, BatchController, BatchRequest, BatchRun, BatchSummary, BatchUpdate, CancelToken,
    Collaborators, JobStatus, LopdfPageSizes, PrinterCapabilityProvider, PrinterHandle,
    PrinterHost, SheetPlacement,
};
use log::LevelFilter;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::logger::{CliLogger, parse_level};
use crate::paths::AppPaths;
use crate::settings::{AppSettings, SettingsStore};
use crate::spool::{SpoolCapabilities, SpoolSink};

#[derive(Parser)]
#[command(
    name = "halfsheet",
    about = "Print A5 pages onto the top half of A4 sheets",
    version
)]
struct Cli {
    /// Directory for settings, templates and logs (default: platform config dir)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print PDFs without interaction.
    ///
    /// While running, type `p` to pause, `r` to resume and `c` to cancel
    /// (each followed by Enter). Ctrl-C cancels.
    Print {
        /// Input PDF file(s)
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Printer name (default: settings, then the first printer)
        #[arg(long)]
        printer: Option<String>,

        /// Template id (default: settings)
        #[arg(long)]
        template: Option<String>,

        /// Print resolution, clamped to 150-1200
        #[arg(long, default_value_t = DEFAULT_PRINT_DPI)]
        dpi: u32,

        /// Retry failed jobs up to this many times
        #[arg(long, default_value = "0")]
        retries: u32,

        /// Write the final job list to a CSV file
        #[arg(long)]
        export_csv: Option<PathBuf>,

        /// Where the spool printer writes sheets
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Show how a PDF would be placed
    Layout {
        /// Input PDF file
        file: PathBuf,

        #[arg(long)]
        template: Option<String>,

        #[arg(long)]
        printer: Option<String>,

        #[arg(long, default_value_t = DEFAULT_PRINT_DPI)]
        dpi: u32,
    },

    /// Print a calibration sheet with rulers, midline and safe line
    Calibrate {
        #[arg(long)]
        printer: Option<String>,

        #[arg(long)]
        template: Option<String>,

        #[arg(long, default_value_t = DEFAULT_PRINT_DPI)]
        dpi: u32,

        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Manage templates
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// List configured printers, favorites first
    Printers,

    /// Shrink a PDF with qpdf
    Compress {
        input: PathBuf,
        output: PathBuf,

        /// Skip linearization
        #[arg(long)]
        no_linearize: bool,

        /// Kill qpdf after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List all templates
    List,

    /// Add or replace a template
    Add {
        id: String,

        /// Display name (default: the id)
        #[arg(long)]
        name: Option<String>,

        /// Margin in mm
        #[arg(long, default_value = "3")]
        margin: u32,

        /// Gap above the midline in mm
        #[arg(long, default_value = "5")]
        safe_gap: u32,

        /// Never shrink; report overflow instead
        #[arg(long)]
        no_shrink: bool,
    },

    /// Remove a template
    Remove { id: String },
}

/// Typed on stdin while a batch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
    Cancel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = cli
        .home
        .as_deref()
        .map(AppPaths::rooted)
        .unwrap_or_else(AppPaths::discover);

    let cli_level = match cli.verbose {
        0 => None,
        1 => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    };
    CliLogger::new(LevelFilter::Trace, Some(paths.logs_dir.clone()))
        .init(cli_level.unwrap_or(LevelFilter::Info))?;

    let store = SettingsStore::new(paths.settings_file());
    let settings = store.load().await;
    if cli_level.is_none() {
        match parse_level(&settings.log_level) {
            Some(level) => log::set_max_level(level),
            None => log::warn!("Unknown log level '{}'", settings.log_level),
        }
    }
    if !store.path().exists() {
        store.save(&settings).await?;
    }

    match cli.command {
        Commands::Print {
            files,
            printer,
            template,
            dpi,
            retries,
            export_csv,
            out_dir,
        } => {
            let out_dir = out_dir.unwrap_or_else(|| paths.spool_dir());
            let options = PrintOptions {
                printer,
                template,
                dpi,
                retries,
                export_csv,
            };
            print_batch(&paths, &settings, files, out_dir, options).await?;
        }

        Commands::Layout {
            file,
            template,
            printer,
            dpi,
        } => {
            let library = TemplateLibrary::open(paths.templates_file()).await?;
            let template = library.get(template.as_deref().unwrap_or(&settings.default_template_id));
            let mut capabilities = SpoolCapabilities::new(settings.printers.clone());
            let printer = choose_printer(&settings, printer.as_deref(), capabilities.printers()?)?;
            let area = capabilities.printable_area(&printer)?;

            let page = halfsheet_layout::read_page_size(&file, 0).await?;
            let (page_w, page_h) = page.size_mm();
            let layout = place_for_template(page, &area, &template);
            let margin = f64::from(template.margin_mm);
            let safe_gap = f64::from(template.safe_gap_mm);
            let target = target_region(area.width_mm, area.height_mm, margin, safe_gap);

            println!("{}", file.display());
            println!(
                "  Page: {page_w:.1} × {page_h:.1} mm{}",
                if page.is_a5_like(A5_TOLERANCE) { " (A5)" } else { "" }
            );
            println!(
                "  Printer '{printer}': printable {:.1} × {:.1} mm at ({:.1}, {:.1})",
                area.width_mm, area.height_mm, area.origin_x_mm, area.origin_y_mm
            );
            println!(
                "  Template '{}': margin {} mm, safe gap {} mm, auto-shrink {}",
                template.id,
                template.margin_mm,
                template.safe_gap_mm,
                if template.auto_shrink { "on" } else { "off" }
            );
            println!("  Target: {:.1} × {:.1} mm", target.width, target.height);
            println!("  Scale: {:.3}", layout.scale);
            println!(
                "  Content: {:.1} × {:.1} mm at ({:.1}, {:.1})",
                layout.content_width_mm,
                layout.content_height_mm,
                layout.offset_left_mm,
                layout.offset_top_mm
            );
            if let Some(overflow) = layout.overflow(area.width_mm, area.height_mm, margin, safe_gap) {
                println!(
                    "  Overflow: {:.1} mm vertical, {:.1} mm horizontal",
                    overflow.vertical_mm, overflow.horizontal_mm
                );
            }

            let request = BatchRequest::new(&printer, &template.id, dpi);
            let budget = RenderBudget::new(settings.max_raster_pixels);
            let effective =
                budget.effective_dpi(layout.content_width_mm, layout.content_height_mm, request.dpi);
            let (px_w, px_h) =
                pixel_size(layout.content_width_mm, layout.content_height_mm, effective);
            println!("  Raster: {px_w} × {px_h} px at {effective} dpi");
        }

        Commands::Calibrate {
            printer,
            template,
            dpi,
            out_dir,
        } => {
            let library = TemplateLibrary::open(paths.templates_file()).await?;
            let template = library.get(template.as_deref().unwrap_or(&settings.default_template_id));
            let out_dir = out_dir.unwrap_or_else(|| paths.spool_dir());
            let host = spawn_printer_host(&settings, out_dir)?;
            let printer = choose_printer(&settings, printer.as_deref(), host.printers().await?)?;

            let area = host.printable_area(&printer).await?;
            let sheet = CalibrationSheet::new(&area, template.margin_mm, template.safe_gap_mm);
            let dpi = BatchRequest::new(&printer, &template.id, dpi).dpi;
            let raster = spool::paint_calibration(&sheet, dpi);
            let placement = SheetPlacement {
                offset_left_mm: area.origin_x_mm,
                offset_top_mm: area.origin_y_mm,
                content_width_mm: sheet.bounds.width,
                content_height_mm: sheet.bounds.height,
                dpi,
            };
            host.send(raster, placement, &printer).await?;
            println!("Calibration sheet sent to '{printer}': {}", sheet.caption);
        }

        Commands::Templates { action } => {
            let library = TemplateLibrary::open(paths.templates_file()).await?;
            match action {
                TemplateAction::List => {
                    println!(
                        "{:<16} {:<20} {:>7} {:>9} {:>7}",
                        "ID", "NAME", "MARGIN", "SAFE GAP", "SHRINK"
                    );
                    for t in library.all() {
                        println!(
                            "{:<16} {:<20} {:>5}mm {:>7}mm {:>7}",
                            t.id,
                            t.name,
                            t.margin_mm,
                            t.safe_gap_mm,
                            if t.auto_shrink { "yes" } else { "no" }
                        );
                    }
                }
                TemplateAction::Add {
                    id,
                    name,
                    margin,
                    safe_gap,
                    no_shrink,
                } => {
                    let template = Template {
                        name: name.unwrap_or_else(|| id.clone()),
                        id,
                        margin_mm: margin,
                        auto_shrink: !no_shrink,
                        safe_gap_mm: safe_gap,
                    };
                    library.save(template.clone()).await?;
                    println!("Saved template '{}'", template.id);
                }
                TemplateAction::Remove { id } => {
                    if library.delete(&id).await? {
                        println!("Removed template '{id}'");
                    } else {
                        bail!("no template with id '{id}'");
                    }
                }
            }
        }

        Commands::Printers => {
            // * default, + favorite
            for profile in settings.printers_by_preference() {
                let area = profile.printable_area;
                let default = settings.default_printer.as_deref() == Some(profile.name.as_str());
                let favorite = settings.is_favorite(&profile.name);
                println!(
                    "{}{} {:<20} {:.1} × {:.1} mm at ({:.1}, {:.1})",
                    if default { '*' } else { ' ' },
                    if favorite { '+' } else { ' ' },
                    profile.name,
                    area.width_mm,
                    area.height_mm,
                    area.origin_x_mm,
                    area.origin_y_mm
                );
            }
        }

        Commands::Compress {
            input,
            output,
            no_linearize,
            timeout_secs,
        } => {
            let token = CancelToken::new();
            let interrupt = {
                let token = token.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        token.cancel();
                    }
                })
            };
            let options = CompressOptions {
                linearize: !no_linearize,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let result = compress_pdf(&input, &output, options, &token).await;
            interrupt.abort();
            result?;
            println!("Compressed {} → {}", input.display(), output.display());
        }
    }

    Ok(())
}

struct PrintOptions {
    printer: Option<String>,
    template: Option<String>,
    dpi: u32,
    retries: u32,
    export_csv: Option<PathBuf>,
}

fn spawn_printer_host(settings: &AppSettings, out_dir: PathBuf) -> Result<PrinterHandle> {
    let profiles = settings.printers.clone();
    PrinterHost::spawn(move || (SpoolCapabilities::new(profiles), SpoolSink::new(out_dir)))
        .context("starting printer thread")
}

fn choose_printer(
    settings: &AppSettings,
    explicit: Option<&str>,
    available: Vec<String>,
) -> Result<String> {
    settings
        .resolve_printer(explicit, &available)
        .context("no printer configured; add a printer profile to the settings file")
}

async fn print_batch(
    paths: &AppPaths,
    settings: &AppSettings,
    files: Vec<PathBuf>,
    out_dir: PathBuf,
    options: PrintOptions,
) -> Result<()> {
    let templates = Arc::new(TemplateLibrary::open(paths.templates_file()).await?);
    let host = spawn_printer_host(settings, out_dir)?;
    let printer = choose_printer(settings, options.printer.as_deref(), host.printers().await?)?;
    let template_id = options
        .template
        .unwrap_or_else(|| settings.default_template_id.clone());
    let request = BatchRequest::new(printer, template_id, options.dpi);

    let controller = Arc::new(BatchController::new(
        Collaborators {
            page_sizes: Arc::new(LopdfPageSizes),
            rasterizer: render::default_rasterizer(),
            templates,
            printer: host,
        },
        BatchConfig {
            budget: RenderBudget::new(settings.max_raster_pixels),
            concurrency: settings.concurrency,
        },
    ));
    controller.enqueue(files);

    let mut updates = controller.subscribe();
    let mut controls = spawn_stdin_controls();

    let run = controller.start(request.clone())?;
    let mut summary = drive(&controller, run, &mut updates, &mut controls).await;

    let mut attempt = 0;
    while summary.failed > 0 && !summary.cancelled && attempt < options.retries {
        attempt += 1;
        log::info!("Retrying {} failed job(s), attempt {attempt}", summary.failed);
        let run = controller.retry_failed(request.clone())?;
        summary = drive(&controller, run, &mut updates, &mut controls).await;
    }

    if let Some(path) = options.export_csv {
        export::export_csv(&controller.jobs(), &path).await?;
        println!("Job list written to {}", path.display());
    }

    println!(
        "Done: {}, failed: {}, not started: {}",
        summary.done, summary.failed, summary.pending
    );
    if summary.cancelled {
        bail!("batch cancelled");
    }
    if summary.failed > 0 {
        bail!("{} job(s) failed", summary.failed);
    }
    Ok(())
}

/// Report updates and apply controls until the pass finishes
async fn drive(
    controller: &BatchController,
    run: BatchRun,
    updates: &mut mpsc::UnboundedReceiver<BatchUpdate>,
    controls: &mut mpsc::UnboundedReceiver<Control>,
) -> BatchSummary {
    let finished = run.wait();
    tokio::pin!(finished);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut controls_open = true;

    let summary = loop {
        tokio::select! {
            summary = &mut finished => break summary,
            Some(update) = updates.recv() => report(controller, &update),
            control = controls.recv(), if controls_open => match control {
                Some(Control::Pause) => controller.pause(),
                Some(Control::Resume) => controller.resume(),
                Some(Control::Cancel) => controller.cancel_all(),
                None => controls_open = false,
            },
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                log::warn!("Interrupted; cancelling after the current job");
                controller.cancel_all();
            }
        }
    };
    while let Ok(update) = updates.try_recv() {
        report(controller, &update);
    }
    summary
}

fn report(controller: &BatchController, update: &BatchUpdate) {
    match update {
        BatchUpdate::Started { total, retry } => {
            println!("{} {total} job(s)", if *retry { "Retrying" } else { "Printing" });
        }
        BatchUpdate::JobFinished {
            index,
            status,
            error,
        } => {
            let name = controller
                .jobs()
                .get(*index)
                .map(|job| job.display_name())
                .unwrap_or_default();
            match (status, error) {
                (JobStatus::Failed, Some(error)) => println!("  {name}: Failed ({error})"),
                _ => println!("  {name}: {status}"),
            }
        }
        BatchUpdate::Progress(progress) => {
            println!(
                "[{:>3}%] {}/{}",
                progress.percent, progress.processed, progress.total
            );
        }
        BatchUpdate::Overflow { index, overflow } => {
            println!(
                "  job {}: content exceeds the safe region by {:.1} mm vertical, {:.1} mm horizontal",
                index + 1,
                overflow.vertical_mm,
                overflow.horizontal_mm
            );
        }
        BatchUpdate::JobStarted { .. } | BatchUpdate::Finished { .. } => {}
    }
}

/// Read control commands from stdin on a dedicated thread
fn spawn_stdin_controls() -> mpsc::UnboundedReceiver<Control> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-controls".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let control = match line.trim() {
                    "p" => Control::Pause,
                    "r" => Control::Resume,
                    "c" => Control::Cancel,
                    "" => continue,
                    other => {
                        log::warn!("Unknown command '{other}' (p = pause, r = resume, c = cancel)");
                        continue;
                    }
                };
                if tx.send(control).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Pause/resume from stdin unavailable: {e}");
    }
    rx
}
