use crate::{
    attachment::AttachmentDescriptor,
    channel::{MediaBatch, SentBatch},
    media,
    preview::EditedContent,
    sources::SourceError,
};

#[derive(Debug)]
pub enum ChannelMessage {
    SendMedia(MediaBatch),
}

#[derive(Debug)]
pub enum FrontendMessage {
    BatchExtracted {
        ticket: u64,
        result: Result<Vec<AttachmentDescriptor>, SourceError>,
    },
    EditProbed {
        ticket: u64,
        session_id: u64,
        attachment_key: u64,
        result: media::Result<EditedContent>,
    },
    MediaSent {
        sent: SentBatch,
    },
    SendFailed {
        batch_id: u64,
        error: String,
    },
}
