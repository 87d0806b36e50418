//! Dedicated execution context for printer calls.
//!
//! Printing subsystems often bind their handles to the thread that opened
//! them. [`PrinterHost`] builds the capability provider and the print sink on
//! its own OS thread and serves every request there, one at a time. Callers
//! hold a cloneable [`PrinterHandle`] and never touch the collaborators.

use halfsheet_layout::PrintableArea;
use tokio::sync::{mpsc, oneshot};

use crate::collaborators::{
    CollaboratorError, PrintSink, PrinterCapabilityProvider, Raster, SheetPlacement,
};

type Reply<T> = oneshot::Sender<Result<T, CollaboratorError>>;

enum PrinterRequest {
    PrintableArea {
        printer: String,
        reply: Reply<PrintableArea>,
    },
    Printers {
        reply: Reply<Vec<String>>,
    },
    Send {
        raster: Raster,
        placement: SheetPlacement,
        printer: String,
        reply: Reply<()>,
    },
}

pub struct PrinterHost;

impl PrinterHost {
    /// Start the printer thread.
    ///
    /// `factory` runs on the new thread, so the collaborators it returns never
    /// cross threads. The thread exits once every handle has been dropped.
    pub fn spawn<F, C, S>(factory: F) -> std::io::Result<PrinterHandle>
    where
        F: FnOnce() -> (C, S) + Send + 'static,
        C: PrinterCapabilityProvider + 'static,
        S: PrintSink + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("printer-host".to_string())
            .spawn(move || {
                let (capabilities, sink) = factory();
                serve(rx, capabilities, sink);
            })?;
        Ok(PrinterHandle { tx })
    }
}

fn serve<C, S>(mut rx: mpsc::UnboundedReceiver<PrinterRequest>, mut capabilities: C, mut sink: S)
where
    C: PrinterCapabilityProvider,
    S: PrintSink,
{
    log::debug!("Printer host started");
    while let Some(request) = rx.blocking_recv() {
        // A dropped reply means the caller gave up; nothing to do
        match request {
            PrinterRequest::PrintableArea { printer, reply } => {
                let _ = reply.send(capabilities.printable_area(&printer));
            }
            PrinterRequest::Printers { reply } => {
                let _ = reply.send(capabilities.printers());
            }
            PrinterRequest::Send {
                raster,
                placement,
                printer,
                reply,
            } => {
                let _ = reply.send(sink.send(&raster, &placement, &printer));
            }
        }
    }
    log::debug!("Printer host stopped");
}

/// Async front for the printer thread
#[derive(Debug, Clone)]
pub struct PrinterHandle {
    tx: mpsc::UnboundedSender<PrinterRequest>,
}

impl std::fmt::Debug for PrinterRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrintableArea { printer, .. } => write!(f, "PrintableArea({printer})"),
            Self::Printers { .. } => f.write_str("Printers"),
            Self::Send { printer, .. } => write!(f, "Send({printer})"),
        }
    }
}

impl PrinterHandle {
    pub async fn printable_area(&self, printer: &str) -> Result<PrintableArea, CollaboratorError> {
        self.call(|reply| PrinterRequest::PrintableArea {
            printer: printer.to_string(),
            reply,
        })
        .await
    }

    pub async fn printers(&self) -> Result<Vec<String>, CollaboratorError> {
        self.call(|reply| PrinterRequest::Printers { reply }).await
    }

    pub async fn send(
        &self,
        raster: Raster,
        placement: SheetPlacement,
        printer: &str,
    ) -> Result<(), CollaboratorError> {
        self.call(|reply| PrinterRequest::Send {
            raster,
            placement,
            printer: printer.to_string(),
            reply,
        })
        .await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> PrinterRequest,
    ) -> Result<T, CollaboratorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .map_err(|_| CollaboratorError::HostStopped)?;
        reply_rx.await.map_err(|_| CollaboratorError::HostStopped)?
    }
}
