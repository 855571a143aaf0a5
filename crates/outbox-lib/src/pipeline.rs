//! The attachment pipeline: source → extraction → grouping → preview → send.
//!
//! [`PipelineController`] never blocks. Extraction and edit probing are handed back to the
//! caller as jobs to spawn, finished batches go out over the channel actor's queue, and
//! everything the user should hear about is collected as [`Notice`]s.

use std::{
    collections::{BTreeMap, VecDeque},
    path::PathBuf,
};

use futures::channel::mpsc;
use log::{debug, info, warn};

use crate::{
    attachment::{self, AttachmentDescriptor},
    channel::{MediaBatch, SentBatch},
    media,
    message::ChannelMessage,
    permissions::{Permission, PermissionGate, PermissionRequest},
    preview::{EditedContent, PreviewAction, PreviewSession},
    sources::{AttachmentSource, SourceContext, SourceError},
    worker::{EditJob, ExtractionJob, Ticket},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No attachment preview is open")]
    NoPreview,
    #[error("Attachment index {index} is out of range, the preview has {len} attachments")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Attachment {0:?} cannot be edited")]
    NotEditable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capture_dir: PathBuf,
    pub sender_name: String,
    pub min_voice_note_ms: u64,
    pub max_voice_note_ms: u64,
    pub editable_mime_types: Vec<String>,
}

impl PipelineSettings {
    fn source_context(&self) -> SourceContext {
        SourceContext {
            capture_dir: self.capture_dir.clone(),
            sender_name: self.sender_name.clone(),
            min_voice_note_ms: self.min_voice_note_ms,
            max_voice_note_ms: self.max_voice_note_ms,
        }
    }
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    AttachmentProcessingFailed { attempted: usize },
    VoiceNoteTooShort { duration_ms: u64, min_ms: u64 },
    PermissionDenied {
        source: &'static str,
        permissions: Vec<Permission>,
    },
    PreviewSuperseded { discarded: usize },
    PreviewCancelled,
    EditFailed { error: String },
    MediaSent { batch_id: u64, count: usize },
    SendFailed { batch_id: u64, error: String },
}

impl Notice {
    /// Stable identifier of the message, for hooks and tests.
    pub fn key(&self) -> &'static str {
        match self {
            Notice::AttachmentProcessingFailed { .. } => "error_attachment",
            Notice::VoiceNoteTooShort { .. } => "voice_note_too_short",
            Notice::PermissionDenied { .. } => "permission_denied",
            Notice::PreviewSuperseded { .. } => "preview_superseded",
            Notice::PreviewCancelled => "preview_cancelled",
            Notice::EditFailed { .. } => "edit_failed",
            Notice::MediaSent { .. } => "media_sent",
            Notice::SendFailed { .. } => "send_failed",
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::AttachmentProcessingFailed { attempted } => write!(
                f,
                "Failed to process the selected attachment{}",
                if *attempted == 1 { "" } else { "s" }
            ),
            Notice::VoiceNoteTooShort {
                duration_ms,
                min_ms,
            } => write!(
                f,
                "Voice note discarded, {duration_ms}ms is shorter than {min_ms}ms"
            ),
            Notice::PermissionDenied {
                source,
                permissions,
            } => {
                let permissions = permissions
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Cannot use {source} without permission: {permissions}")
            }
            Notice::PreviewSuperseded { discarded } => write!(
                f,
                "Discarded unsent preview of {discarded} attachment(s) for a newer selection"
            ),
            Notice::PreviewCancelled => write!(f, "Preview closed, nothing sent"),
            Notice::EditFailed { error } => write!(f, "Failed to apply edit: {error}"),
            Notice::MediaSent { batch_id, count } => {
                write!(f, "Sent batch {batch_id} with {count} attachment(s)")
            }
            Notice::SendFailed { batch_id, error } => {
                write!(f, "Failed to send batch {batch_id}: {error}")
            }
        }
    }
}

/// Outcome of asking for a source to be launched.
#[derive(Debug)]
pub enum Request {
    /// The picker came back with nothing; nothing was started.
    Empty,
    Started(ExtractionJob),
    NeedsPermission(PermissionRequest),
}

#[derive(Debug)]
struct ActivePreview {
    id: u64,
    session: PreviewSession,
}

#[derive(Debug)]
pub struct PipelineController {
    settings: PipelineSettings,
    preview: Option<ActivePreview>,
    extractions: BTreeMap<u64, Ticket>,
    edits: BTreeMap<u64, Ticket>,
    pending_sends: BTreeMap<u64, usize>,
    notices: VecDeque<Notice>,
    next_id: u64,
    revision: u64,
}

impl PipelineController {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            preview: None,
            extractions: BTreeMap::new(),
            edits: BTreeMap::new(),
            pending_sends: BTreeMap::new(),
            notices: VecDeque::new(),
            next_id: 1,
            revision: 0,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Starts a source, or returns the permission request that has to be answered first.
    pub fn request(&mut self, source: AttachmentSource, gate: &dyn PermissionGate) -> Request {
        if source.item_count() == 0 {
            debug!(source = source.name(); "Nothing picked, ignoring");
            return Request::Empty;
        }
        let missing = gate.missing(source.required_permissions());
        if !missing.is_empty() {
            let id = self.next_id();
            info!(id, source = source.name(), missing:?; "Source needs permissions");
            return Request::NeedsPermission(PermissionRequest {
                id,
                permissions: missing,
                source,
            });
        }
        Request::Started(self.begin_extraction(source))
    }

    /// Continues a request once the user answered it.
    pub fn on_permission_result(
        &mut self,
        request: PermissionRequest,
        granted: bool,
        gate: &mut dyn PermissionGate,
    ) -> Option<ExtractionJob> {
        if !granted {
            info!(id = request.id, source = request.source.name(); "Permission denied");
            self.notices.push_back(Notice::PermissionDenied {
                source: request.source.name(),
                permissions: request.permissions,
            });
            return None;
        }
        for permission in &request.permissions {
            gate.grant(*permission);
        }
        Some(self.begin_extraction(request.source))
    }

    pub fn begin_extraction(&mut self, source: AttachmentSource) -> ExtractionJob {
        let ticket = Ticket::new(self.next_id());
        debug!(ticket = ticket.id(), source = source.name(); "Starting extraction");
        self.extractions.insert(ticket.id(), ticket.clone());
        ExtractionJob {
            ticket,
            source,
            context: self.settings.source_context(),
        }
    }

    pub fn on_batch_extracted(
        &mut self,
        ticket: u64,
        result: std::result::Result<Vec<AttachmentDescriptor>, SourceError>,
        ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) {
        if self.extractions.remove(&ticket).is_none() {
            debug!(ticket; "Ignoring result of cancelled extraction");
            if let Ok(attachments) = &result {
                attachment::discard_all(attachments);
            }
            return;
        }
        match result {
            Ok(attachments) => self.on_attachments_ready(attachments, ch_tx),
            Err(SourceError::AllItemsFailed { attempted }) => {
                warn!(ticket, attempted; "Every attachment of the batch failed");
                self.notices
                    .push_back(Notice::AttachmentProcessingFailed { attempted });
            }
            Err(SourceError::VoiceNoteTooShort {
                duration_ms,
                min_ms,
            }) => {
                self.notices.push_back(Notice::VoiceNoteTooShort {
                    duration_ms,
                    min_ms,
                });
            }
        }
    }

    /// Single entry point for descriptors from any source.
    ///
    /// Non-previewables leave immediately at original size. Previewables replace whatever
    /// preview was open.
    pub fn on_attachments_ready(
        &mut self,
        attachments: Vec<AttachmentDescriptor>,
        ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) {
        if attachments.is_empty() {
            return;
        }
        let grouped = attachment::group(attachments);
        debug!(
            previewables = grouped.previewables.len(),
            not_previewables = grouped.not_previewables.len();
            "Grouped attachments"
        );

        if !grouped.not_previewables.is_empty() {
            self.send_batch(grouped.not_previewables, false, ch_tx);
        }

        if let Some(session) = PreviewSession::new(grouped.previewables) {
            let id = self.next_id();
            if let Some(old) = self.preview.replace(ActivePreview { id, session }) {
                info!(old = old.id, new = id; "Replacing unsent preview");
                self.cancel_edits();
                attachment::discard_all(old.session.attachments());
                self.notices.push_back(Notice::PreviewSuperseded {
                    discarded: old.session.len(),
                });
            }
            self.revision += 1;
        }
    }

    fn send_batch(
        &mut self,
        attachments: Vec<AttachmentDescriptor>,
        scale_down: bool,
        ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> u64 {
        let batch_id = self.next_id();
        let count = attachments.len();
        info!(batch_id, count, scale_down; "Forwarding batch");
        let batch = MediaBatch {
            batch_id,
            attachments,
            scale_down,
        };
        if let Err(error) = ch_tx.unbounded_send(ChannelMessage::SendMedia(batch)) {
            warn!(batch_id, error:%; "Channel actor is gone");
            let ChannelMessage::SendMedia(batch) = error.into_inner();
            attachment::discard_all(&batch.attachments);
            self.notices.push_back(Notice::SendFailed {
                batch_id,
                error: "channel is closed".to_owned(),
            });
        } else {
            self.pending_sends.insert(batch_id, count);
        }
        batch_id
    }

    pub fn preview(&self) -> Option<&PreviewSession> {
        self.preview.as_ref().map(|p| &p.session)
    }

    pub fn preview_id(&self) -> Option<u64> {
        self.preview.as_ref().map(|p| p.id)
    }

    /// Bumped whenever the preview changes and needs to be shown again.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn handle_preview(&mut self, action: PreviewAction) -> Result<()> {
        let Some(preview) = &mut self.preview else {
            return Err(Error::NoPreview);
        };
        if let PreviewAction::SetCurrentAttachment(index) = action {
            let len = preview.session.len();
            if index >= len {
                return Err(Error::IndexOutOfRange { index, len });
            }
        }
        if let Some(released) = preview.session.handle(action) {
            released.discard();
        }
        self.revision += 1;
        if preview.session.is_empty() {
            info!(preview = preview.id; "Last attachment removed, dropping batch");
            self.close_preview();
        }
        Ok(())
    }

    /// Sends the previewed attachments and closes the preview.
    pub fn commit(
        &mut self,
        keep_original_size: bool,
        ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<u64> {
        let preview = self.preview.take().ok_or(Error::NoPreview)?;
        self.cancel_edits();
        self.revision += 1;
        let committed = preview
            .session
            .commit(keep_original_size)
            .ok_or(Error::NoPreview)?;
        Ok(self.send_batch(
            committed.attachments,
            !committed.options.send_original_size,
            ch_tx,
        ))
    }

    /// Drops the preview and every extraction still running. Already forwarded batches
    /// are unaffected.
    pub fn cancel(&mut self) {
        for (_, ticket) in std::mem::take(&mut self.extractions) {
            debug!(ticket = ticket.id(); "Cancelling extraction");
            ticket.cancel();
        }
        if self.preview.is_some() {
            self.close_preview();
            self.revision += 1;
        } else {
            self.cancel_edits();
        }
    }

    fn close_preview(&mut self) {
        if let Some(preview) = self.preview.take() {
            attachment::discard_all(preview.session.attachments());
        }
        self.cancel_edits();
        self.notices.push_back(Notice::PreviewCancelled);
    }

    fn cancel_edits(&mut self) {
        for (_, ticket) in std::mem::take(&mut self.edits) {
            ticket.cancel();
        }
    }

    /// Prepares re-probing an edited copy of the focused attachment.
    pub fn request_edit(&mut self, path: PathBuf) -> Result<EditJob> {
        let Some(preview) = &self.preview else {
            return Err(Error::NoPreview);
        };
        let session_id = preview.id;
        let current = preview.session.current().ok_or(Error::NoPreview)?;
        if !current.is_editable(&self.settings.editable_mime_types) {
            return Err(Error::NotEditable(current.name.clone()));
        }
        let attachment_key = preview.session.current_key().ok_or(Error::NoPreview)?;
        let ticket = Ticket::new(self.next_id());
        self.edits.insert(ticket.id(), ticket.clone());
        Ok(EditJob {
            ticket,
            session_id,
            attachment_key,
            path,
        })
    }

    /// Applies an edit to the attachment it was requested for, wherever the focus is now.
    pub fn on_edit_probed(
        &mut self,
        ticket: u64,
        session_id: u64,
        attachment_key: u64,
        result: media::Result<EditedContent>,
    ) {
        if self.edits.remove(&ticket).is_none() {
            debug!(ticket; "Ignoring cancelled edit");
            return;
        }
        let Some(preview) = self.preview.as_mut().filter(|p| p.id == session_id) else {
            debug!(ticket, session_id; "Ignoring edit for a closed preview");
            return;
        };
        if !preview.session.contains(attachment_key) {
            debug!(ticket, attachment_key; "Ignoring edit for a removed attachment");
            return;
        }
        match result {
            Ok(edited) => {
                if let Some(previous) = preview.session.update_attachment(attachment_key, edited)
                {
                    previous.discard();
                }
                self.revision += 1;
            }
            Err(error) => {
                warn!(ticket, error:%; "Edited attachment could not be read");
                self.notices.push_back(Notice::EditFailed {
                    error: error.to_string(),
                });
            }
        }
    }

    pub fn on_media_sent(&mut self, sent: &SentBatch) {
        let count = self
            .pending_sends
            .remove(&sent.batch_id)
            .unwrap_or(sent.names.len());
        self.notices.push_back(Notice::MediaSent {
            batch_id: sent.batch_id,
            count,
        });
    }

    pub fn on_send_failed(&mut self, batch_id: u64, error: String) {
        self.pending_sends.remove(&batch_id);
        self.notices
            .push_back(Notice::SendFailed { batch_id, error });
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// No extraction, edit or send is outstanding.
    pub fn is_idle(&self) -> bool {
        self.extractions.is_empty() && self.edits.is_empty() && self.pending_sends.is_empty()
    }
}
