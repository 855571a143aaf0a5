use std::path::{Path, PathBuf};

use log::{debug, info};
use outbox_lib::channel::{timestamp, Error, OutgoingChannel, Result};
use outbox_lib::media::Upload;

/// Delivers batches into a directory on disk, one subdirectory per batch.
#[derive(Debug, Clone)]
pub struct Local {
    dir: PathBuf,
    sent: u64,
}

impl Local {
    fn outbox(path: &Path) -> PathBuf {
        path.join("outbox")
    }
}

fn io_failure(path: &Path, error: std::io::Error) -> Error {
    Error::Failure(format!("{}: {error}", path.display()))
}

fn file_name(index: usize, name: &str) -> String {
    let name = name.replace(['/', '\\'], "_");
    format!("{index:02}-{name}")
}

impl OutgoingChannel for Local {
    async fn load(path: &Path) -> Result<Self> {
        let dir = Self::outbox(path);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(Error::Unlinked);
        }
        Ok(Self { dir, sent: 0 })
    }

    async fn link(path: &Path, device_name: &str) -> Result<Self> {
        let dir = Self::outbox(path);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_failure(&dir, e))?;
        info!(dir:?, device_name; "Created local outbox");
        Ok(Self { dir, sent: 0 })
    }

    async fn self_name(&self) -> String {
        std::env::var("USER").unwrap_or_else(|_| "me".to_owned())
    }

    async fn send_media(&mut self, uploads: &[Upload]) -> Result<()> {
        let batch_dir = self.dir.join(format!("{}-{}", timestamp(), self.sent));
        self.sent += 1;
        tokio::fs::create_dir_all(&batch_dir)
            .await
            .map_err(|e| io_failure(&batch_dir, e))?;
        for (index, upload) in uploads.iter().enumerate() {
            let path = batch_dir.join(file_name(index, &upload.name));
            debug!(path:?, mime_type:% = upload.mime_type, bytes = upload.data.len(); "Writing upload");
            tokio::fs::write(&path, &upload.data)
                .await
                .map_err(|e| io_failure(&path, e))?;
        }
        Ok(())
    }
}
