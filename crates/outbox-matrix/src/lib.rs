use std::fmt::Display;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use matrix_sdk::attachment::{
    AttachmentConfig, AttachmentInfo, BaseAudioInfo, BaseFileInfo, BaseImageInfo, BaseVideoInfo,
};
use matrix_sdk::matrix_auth::MatrixSession;
use matrix_sdk::ruma::{OwnedRoomId, RoomId, UInt};
use matrix_sdk::{config::SyncSettings, Client};
use mime_guess::mime::{self, Mime};
use outbox_lib::attachment::AttachmentKind;
use outbox_lib::channel::{Error, OutgoingChannel, Result};
use outbox_lib::media::Upload;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Overrides the room stored with the session.
pub const ROOM_ENV: &str = "OUTBOX_MATRIX_ROOM";

/// The data needed to re-build a client.
#[derive(Debug, Serialize, Deserialize)]
struct ClientSession {
    /// The URL of the homeserver of the user.
    homeserver: String,

    /// The path of the database.
    db_path: PathBuf,

    /// The passphrase of the database.
    passphrase: String,
}

/// The full session to persist.
#[derive(Debug, Serialize, Deserialize)]
struct FullSession {
    client_session: ClientSession,

    user_session: MatrixSession,

    /// Room that batches are sent to.
    room_id: OwnedRoomId,
}

/// Sends each batch as media messages into one room.
#[derive(Clone)]
pub struct Matrix {
    client: Client,
    room_id: OwnedRoomId,
}

fn failure(error: impl Display) -> Error {
    Error::Failure(error.to_string())
}

impl OutgoingChannel for Matrix {
    async fn load(path: &Path) -> Result<Self> {
        let session_file = get_session_file(path)?;
        if !session_file.exists() {
            return Err(Error::Unlinked);
        }
        // The session was serialized as JSON in a file.
        let serialized_session = std::fs::read_to_string(&session_file).map_err(failure)?;
        let FullSession {
            client_session,
            user_session,
            room_id,
        } = serde_json::from_str(&serialized_session).map_err(failure)?;

        // Build the client with the previous settings from the session.
        let client = Client::builder()
            .homeserver_url(client_session.homeserver)
            .sqlite_store(client_session.db_path, Some(&client_session.passphrase))
            .build()
            .await
            .map_err(failure)?;

        let user_id = user_session.meta.user_id.clone();
        println!("Restoring session for {user_id}…");

        client
            .restore_session(user_session)
            .await
            .map_err(failure)?;

        if !client.logged_in() {
            debug!("Client not logged in after load, getting to link again");
            return Err(Error::Unlinked);
        }

        let room_id = room_override()?.unwrap_or(room_id);
        let matrix = Self { client, room_id };
        matrix.catch_up().await?;
        Ok(matrix)
    }

    async fn link(path: &Path, device_name: &str) -> Result<Self> {
        let (client, client_session) = build_client(path).await?;
        let matrix_auth = client.matrix_auth();

        loop {
            let username = prompt("\nUsername: ")?;
            let password = prompt("Password: ")?;

            match matrix_auth
                .login_username(&username, &password)
                .initial_device_display_name(device_name)
                .await
            {
                Ok(_) => {
                    println!("Logged in as {username}");
                    break;
                }
                Err(error) => {
                    println!("Error logging in: {error}");
                    println!("Please try again\n");
                }
            }
        }

        let room_id = match room_override()? {
            Some(room_id) => room_id,
            None => loop {
                let room = prompt("Room ID to send to: ")?;
                match RoomId::parse(room) {
                    Ok(room_id) => break room_id,
                    Err(error) => println!("Not a room ID: {error}"),
                }
            },
        };

        // Persist the session to reuse it later.
        let user_session = matrix_auth
            .session()
            .ok_or_else(|| failure("A logged-in client should have a session"))?;
        let serialized_session = serde_json::to_string(&FullSession {
            client_session,
            user_session,
            room_id: room_id.clone(),
        })
        .map_err(failure)?;

        let session_file = get_session_file(path)?;
        std::fs::write(&session_file, serialized_session).map_err(failure)?;

        debug!(session_file:?; "Matrix session persisted");

        let matrix = Self { client, room_id };
        matrix.catch_up().await?;
        Ok(matrix)
    }

    async fn self_name(&self) -> String {
        match self.client.account().get_display_name().await {
            Ok(Some(name)) => name,
            _ => self
                .client
                .user_id()
                .map(|u| u.localpart().to_owned())
                .unwrap_or_else(|| "me".to_owned()),
        }
    }

    async fn send_media(&mut self, uploads: &[Upload]) -> Result<()> {
        let room = self
            .client
            .get_room(&self.room_id)
            .ok_or_else(|| failure(format!("Not a member of room {}", self.room_id)))?;
        for upload in uploads {
            let content_type = content_type(upload);
            debug!(room:? = self.room_id, name:% = upload.name, content_type:%; "Uploading attachment");
            room.send_attachment(
                &upload.name,
                &content_type,
                upload.data.clone(),
                AttachmentConfig::new().info(attachment_info(upload)),
            )
            .await
            .map_err(failure)?;
        }
        info!(room:? = self.room_id, count = uploads.len(); "Sent attachments");
        Ok(())
    }
}

/// The declared mime type, or `application/octet-stream` when it does not parse.
fn content_type(upload: &Upload) -> Mime {
    upload
        .mime_type
        .parse::<Mime>()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

/// Size, dimensions and duration of the upload as the event's `info` block.
fn attachment_info(upload: &Upload) -> AttachmentInfo {
    let size = UInt::new(upload.data.len() as u64);
    let dimension = |d: u32| (d > 0).then(|| UInt::from(d));
    let duration =
        (upload.duration_ms > 0).then(|| Duration::from_millis(upload.duration_ms));
    match upload.kind {
        AttachmentKind::Image => AttachmentInfo::Image(BaseImageInfo {
            width: dimension(upload.width),
            height: dimension(upload.height),
            size,
            blurhash: None,
        }),
        AttachmentKind::Video => AttachmentInfo::Video(BaseVideoInfo {
            duration,
            width: dimension(upload.width),
            height: dimension(upload.height),
            size,
            blurhash: None,
        }),
        AttachmentKind::Audio => AttachmentInfo::Audio(BaseAudioInfo {
            duration,
            size,
        }),
        AttachmentKind::File | AttachmentKind::Contact => {
            AttachmentInfo::File(BaseFileInfo { size })
        }
    }
}

impl Matrix {
    /// One sync so the room list is current before anything is sent.
    async fn catch_up(&self) -> Result<()> {
        self.client
            .sync_once(SyncSettings::default())
            .await
            .map_err(failure)?;
        if self.client.get_room(&self.room_id).is_none() {
            return Err(failure(format!("Not a member of room {}", self.room_id)));
        }
        Ok(())
    }
}

fn room_override() -> Result<Option<OwnedRoomId>> {
    match std::env::var(ROOM_ENV) {
        Ok(room) => RoomId::parse(room).map(Some).map_err(failure),
        Err(_) => Ok(None),
    }
}

fn prompt(question: &str) -> Result<String> {
    print!("{question}");
    io::stdout().flush().map_err(failure)?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer).map_err(failure)?;
    Ok(answer.trim().to_owned())
}

fn get_session_file(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| failure(format!("{path:?} has no parent directory")))?;
    Ok(parent.join("session.json"))
}

/// Build a new client.
async fn build_client(data_dir: &Path) -> Result<(Client, ClientSession)> {
    let mut rng = rand::rng();

    let db_path = data_dir;

    // Generate a random passphrase.
    let passphrase: String = (&mut rng)
        .sample_iter(Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    // We create a loop here so the user can retry if an error happens.
    loop {
        let homeserver = prompt("Homeserver URL: ")?;

        println!("\nChecking homeserver…");

        match Client::builder()
            .homeserver_url(&homeserver)
            .sqlite_store(db_path, Some(&passphrase))
            .build()
            .await
        {
            Ok(client) => {
                return Ok((
                    client,
                    ClientSession {
                        homeserver,
                        db_path: db_path.to_owned(),
                        passphrase,
                    },
                ))
            }
            Err(error) => match &error {
                matrix_sdk::ClientBuildError::AutoDiscovery(_)
                | matrix_sdk::ClientBuildError::Url(_)
                | matrix_sdk::ClientBuildError::Http(_) => {
                    println!("Error checking the homeserver: {error}");
                    println!("Please try again\n");
                }
                _ => {
                    // Other errors will not go away by retrying.
                    return Err(failure(error));
                }
            },
        }
    }
}
