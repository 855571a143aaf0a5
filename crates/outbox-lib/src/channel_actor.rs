use futures::channel::mpsc;
use futures::StreamExt;
use log::{info, warn};

use crate::{
    attachment,
    channel::{timestamp, Error, MediaBatch, OutgoingChannel, Result, SentBatch},
    media,
    message::{ChannelMessage, FrontendMessage},
};

pub struct ChannelActor<C> {
    pub channel: C,
    pub message_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    pub message_tx: mpsc::UnboundedSender<FrontendMessage>,
    pub max_image_dimension: u32,
}

impl<C: OutgoingChannel> ChannelActor<C> {
    pub async fn run(&mut self) {
        info!("Started channel actor");
        while let Some(message) = self.message_rx.next().await {
            match message {
                ChannelMessage::SendMedia(batch) => {
                    let batch_id = batch.batch_id;
                    let reply = match self.send(batch).await {
                        Ok(sent) => FrontendMessage::MediaSent { sent },
                        Err(error) => {
                            warn!(batch_id, error:%; "Failed to send batch");
                            FrontendMessage::SendFailed {
                                batch_id,
                                error: error.to_string(),
                            }
                        }
                    };
                    if self.message_tx.unbounded_send(reply).is_err() {
                        break;
                    }
                }
            }
        }
        info!("Closing channel actor");
    }

    async fn send(&mut self, batch: MediaBatch) -> Result<SentBatch> {
        let MediaBatch {
            batch_id,
            attachments,
            scale_down,
        } = batch;
        let max_dimension = self.max_image_dimension;
        info!(batch_id, count = attachments.len(), scale_down; "Sending batch");
        let uploads = tokio::task::spawn_blocking(move || {
            let uploads = attachments
                .iter()
                .map(|a| media::prepare_upload(a, scale_down, max_dimension))
                .collect::<media::Result<Vec<_>>>();
            // sends are not retried, so captures are done with either way
            attachment::discard_all(&attachments);
            uploads
        })
        .await
        .map_err(|e| Error::Failure(e.to_string()))??;

        self.channel.send_media(&uploads).await?;

        Ok(SentBatch {
            batch_id,
            names: uploads.into_iter().map(|u| u.name).collect(),
            timestamp: timestamp(),
        })
    }
}
