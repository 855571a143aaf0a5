//! Background jobs. Every job does its blocking work on the tokio blocking pool and reports
//! back to the interactive loop with a single [`FrontendMessage`].

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::channel::mpsc;
use log::{debug, warn};

use crate::{
    attachment,
    media::MediaProbe,
    message::FrontendMessage,
    preview::EditedContent,
    sources::{self, AttachmentSource, SourceContext},
};

/// Identifies one piece of in-flight work and lets its owner cancel it cooperatively.
#[derive(Debug, Clone)]
pub struct Ticket {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl Ticket {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Turns the raw items of one source into descriptors.
#[derive(Debug)]
pub struct ExtractionJob {
    pub ticket: Ticket,
    pub source: AttachmentSource,
    pub context: SourceContext,
}

impl ExtractionJob {
    /// Returns `None` when the job was cancelled before it could report.
    pub fn run(self, probe: &dyn MediaProbe) -> Option<FrontendMessage> {
        let result = sources::extract(&self.source, probe, &self.context);
        if self.ticket.is_cancelled() {
            debug!(ticket = self.ticket.id(); "Extraction cancelled, dropping result");
            if let Ok(attachments) = &result {
                attachment::discard_all(attachments);
            }
            return None;
        }
        Some(FrontendMessage::BatchExtracted {
            ticket: self.ticket.id(),
            result,
        })
    }
}

/// Re-reads an edited or cropped attachment.
#[derive(Debug)]
pub struct EditJob {
    pub ticket: Ticket,
    pub session_id: u64,
    /// Key of the attachment in its preview session.
    pub attachment_key: u64,
    pub path: PathBuf,
}

impl EditJob {
    pub fn run(self, probe: &dyn MediaProbe) -> Option<FrontendMessage> {
        let result = probe.probe(&self.path).and_then(|edited| {
            let dimensions = probe.dimensions(&self.path)?;
            Ok(EditedContent {
                location: edited.location,
                mime_type: edited.mime_type,
                size_bytes: edited.size_bytes,
                dimensions: Some(dimensions),
            })
        });
        if self.ticket.is_cancelled() {
            debug!(ticket = self.ticket.id(); "Edit probe cancelled, dropping result");
            return None;
        }
        Some(FrontendMessage::EditProbed {
            ticket: self.ticket.id(),
            session_id: self.session_id,
            attachment_key: self.attachment_key,
            result,
        })
    }
}

#[derive(Debug)]
pub enum Job {
    Extract(ExtractionJob),
    ProbeEdit(EditJob),
}

impl Job {
    pub fn run(self, probe: &dyn MediaProbe) -> Option<FrontendMessage> {
        match self {
            Job::Extract(job) => job.run(probe),
            Job::ProbeEdit(job) => job.run(probe),
        }
    }

    pub fn spawn(
        self,
        probe: Arc<dyn MediaProbe>,
        f_tx: mpsc::UnboundedSender<FrontendMessage>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            if let Some(message) = self.run(probe.as_ref()) {
                if let Err(error) = f_tx.unbounded_send(message) {
                    warn!(error:%; "Interactive loop went away before job finished");
                }
            }
        })
    }
}
