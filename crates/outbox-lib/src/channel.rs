use std::future::Future;
use std::path::Path;

use crate::attachment::AttachmentDescriptor;
use crate::media::{self, Upload};

/// A finalized batch on its way to the outgoing channel.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaBatch {
    pub batch_id: u64,
    pub attachments: Vec<AttachmentDescriptor>,
    /// Downscale images before sending. Always false for batches that skipped the preview.
    pub scale_down: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentBatch {
    pub batch_id: u64,
    pub names: Vec<String>,
    pub timestamp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unlinked")]
    Unlinked,
    #[error(transparent)]
    Media(#[from] media::Error),
    #[error("A failure occurred: {0}")]
    Failure(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where finalized batches go: a chat room, a local directory, a test double.
pub trait OutgoingChannel: Sized {
    fn load(path: &Path) -> impl Future<Output = Result<Self>>;

    fn link(path: &Path, device_name: &str) -> impl Future<Output = Result<Self>>;

    /// Display name of the sending user, used to name voice notes.
    fn self_name(&self) -> impl Future<Output = String>;

    fn send_media(&mut self, uploads: &[Upload]) -> impl Future<Output = Result<()>>;
}

pub fn timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}
