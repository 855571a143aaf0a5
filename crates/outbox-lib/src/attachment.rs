use std::path::PathBuf;

use log::{debug, warn};
use url::Url;

/// Broad category of an attachment, derived from its mime type unless a source sets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
    Contact,
}

impl AttachmentKind {
    pub fn from_mime_type(mime_type: &str) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence == "text/vcard" || essence == "text/x-vcard" {
            return Self::Contact;
        }
        match essence.split_once('/').map(|(top, _)| top) {
            Some("image") => Self::Image,
            Some("video") => Self::Video,
            Some("audio") => Self::Audio,
            _ => Self::File,
        }
    }

    /// Whether attachments of this kind get an interactive preview step.
    pub fn supports_preview(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Contact => "contact",
        };
        f.write_str(s)
    }
}

/// One user-selected or captured media item.
///
/// `location` must stay resolvable while the pipeline holds the descriptor. It is never
/// persisted past the send it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub location: Url,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub rotation: i32,
    pub kind: AttachmentKind,
    /// Set by the probe when a bitmap or video frame source could be resolved.
    pub renderable: bool,
    /// The file was written by the pipeline itself (camera copy, vCard) and is deleted once
    /// the attachment is sent or dropped.
    pub temporary: bool,
}

impl AttachmentDescriptor {
    pub fn is_previewable(&self) -> bool {
        self.kind.supports_preview() && self.renderable
    }

    pub fn is_editable(&self, editable_mime_types: &[String]) -> bool {
        self.kind == AttachmentKind::Image
            && editable_mime_types
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&self.mime_type))
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.location.to_file_path().ok()
    }

    pub fn message_line(&self) -> String {
        let mut line = format!("{} ({}, {} bytes", self.name, self.mime_type, self.size_bytes);
        if self.width > 0 && self.height > 0 {
            line.push_str(&format!(", {}x{}", self.width, self.height));
        }
        if self.duration_ms > 0 {
            line.push_str(&format!(", {}ms", self.duration_ms));
        }
        line.push(')');
        line
    }

    /// Deletes the backing file if the pipeline created it. User files are never touched.
    pub fn discard(&self) {
        if !self.temporary {
            return;
        }
        let Some(path) = self.file_path() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path:?; "Removed temporary attachment file"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(path:?, error:%; "Failed to remove temporary attachment file"),
        }
    }
}

pub fn discard_all(attachments: &[AttachmentDescriptor]) {
    for attachment in attachments {
        attachment.discard();
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct GroupedAttachments {
    pub previewables: Vec<AttachmentDescriptor>,
    pub not_previewables: Vec<AttachmentDescriptor>,
}

pub fn group(attachments: Vec<AttachmentDescriptor>) -> GroupedAttachments {
    let (previewables, not_previewables) = attachments
        .into_iter()
        .partition(AttachmentDescriptor::is_previewable);
    GroupedAttachments {
        previewables,
        not_previewables,
    }
}
