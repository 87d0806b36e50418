//! Batch print controller driving half-sheet placement jobs

mod cancel;
pub mod collaborators;
mod controller;
mod events;
pub mod export;
mod job;
mod printer;
pub mod tool;

pub use cancel::CancelToken;
pub use collaborators::{
    CollaboratorError, LopdfPageSizes, PageRasterizer, PageSizeProvider, PrintSink,
    PrinterCapabilityProvider, Raster, SheetPlacement,
};
pub use controller::{
    BatchConfig, BatchController, BatchError, BatchRequest, BatchRun, Collaborators,
};
pub use events::{BatchSummary, BatchUpdate, Progress};
pub use job::{JobError, JobStatus, PrintJob, TransitionError};
pub use printer::{PrinterHandle, PrinterHost};

// Re-export types from the layout crate
pub use halfsheet_layout::{
    DocumentInfo, LayoutResult, Overflow, PrintableArea, RenderBudget, SourcePage, Template,
    TemplateLibrary, TemplateStore,
};
