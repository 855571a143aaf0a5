use std::path::PathBuf;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::future::Either;
use futures::StreamExt as _;
use futures::{future::select, pin_mut};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt as _, BufReader};

use crate::{
    channel::{self, OutgoingChannel},
    channel_actor::ChannelActor,
    commands::{self, CommandSuccess},
    config::{self, load_config},
    media::{FileProbe, MediaProbe},
    message::{ChannelMessage, FrontendMessage},
    pipeline::PipelineSettings,
    state::AppState,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("Failed to open channel: {0}")]
    Channel(#[from] channel::Error),
}

#[derive(Debug, Clone)]
pub struct Options {
    pub device_name: String,
    pub data_local_dir: PathBuf,
    pub config_file: PathBuf,
    pub app_name: String,
}

pub async fn run<C: OutgoingChannel>(options: Options) -> Result<(), Error> {
    let channel_path = options.data_local_dir.join("channel");

    let config = load_config(&options.config_file)?;
    debug!(config:?; "Loaded config file");

    let channel = match C::load(&channel_path).await {
        Ok(c) => c,
        Err(channel::Error::Unlinked) => {
            info!(path:? = channel_path; "No channel yet, linking");
            C::link(&channel_path, &options.device_name).await?
        }
        Err(error) => return Err(error.into()),
    };

    let sender_name = channel.self_name().await;

    info!(sender_name:?; "Loaded channel");

    let settings = PipelineSettings {
        capture_dir: config
            .pipeline
            .capture_dir
            .clone()
            .unwrap_or_else(|| options.data_local_dir.join("captures")),
        sender_name,
        min_voice_note_ms: config.pipeline.min_voice_note_ms,
        max_voice_note_ms: config.pipeline.max_voice_note_ms,
        editable_mime_types: config.pipeline.editable_mime_types.clone(),
    };
    let max_image_dimension = config.pipeline.max_image_dimension;
    let state = AppState::new(options.app_name, config, options.config_file, settings);

    let (ch_tx, ch_rx) = mpsc::unbounded();
    let (f_tx, f_rx) = mpsc::unbounded();

    let mut actor = ChannelActor {
        channel,
        message_rx: ch_rx,
        message_tx: f_tx.clone(),
        max_image_dimension,
    };

    let ui = async move {
        run_ui(state, ch_tx, f_tx, f_rx, Arc::new(FileProbe)).await;
        debug!("Finished run_ui task");
    };
    pin_mut!(ui);

    let actor = async move {
        actor.run().await;
        debug!("Finished channel actor task");
    };
    pin_mut!(actor);

    select(ui, actor).await;
    Ok(())
}

async fn run_ui(
    mut state: AppState,
    channel_actor_tx: mpsc::UnboundedSender<ChannelMessage>,
    frontend_tx: mpsc::UnboundedSender<FrontendMessage>,
    mut frontend_rx: mpsc::UnboundedReceiver<FrontendMessage>,
    probe: Arc<dyn MediaProbe>,
) {
    // select on two sources, one for command lines, another for messages from workers and
    // the channel actor
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    state.say(format!(
        "{} ready, type `commands` for a list of commands",
        state.app_name
    ));

    loop {
        for job in state.take_jobs() {
            job.spawn(probe.clone(), frontend_tx.clone());
        }
        for line in state.take_output() {
            println!("{line}");
        }

        // once input is exhausted, only stay for work that is still in flight
        if !stdin_open && state.is_idle() {
            break;
        }

        let message = if stdin_open {
            let line_future = lines.next_line();
            pin_mut!(line_future);

            let message_future = frontend_rx.next();
            pin_mut!(message_future);

            match select(line_future, message_future).await {
                Either::Left((Ok(Some(line)), _)) => {
                    if process_command_line(&mut state, &channel_actor_tx, &line) {
                        break;
                    }
                    continue;
                }
                Either::Left((Ok(None), _)) => {
                    debug!("Input closed");
                    stdin_open = false;
                    continue;
                }
                Either::Left((Err(error), _)) => {
                    warn!(error:%; "Failed to read input");
                    stdin_open = false;
                    continue;
                }
                Either::Right((message, _)) => message,
            }
        } else {
            frontend_rx.next().await
        };

        let Some(message) = message else {
            break;
        };
        process_frontend_message(&mut state, &channel_actor_tx, message);
    }

    for line in state.take_output() {
        println!("{line}");
    }
}

/// Returns true when the user asked to quit.
fn process_command_line(
    state: &mut AppState,
    ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    line: &str,
) -> bool {
    debug!(line:?; "Executing command");
    match commands::execute_line(state, ch_tx, line) {
        Ok(CommandSuccess::Quit) => return true,
        Ok(CommandSuccess::Nothing) => {}
        Err(error) => state.say(format!("error: {error}")),
    }
    state.refresh();
    false
}

fn process_frontend_message(
    state: &mut AppState,
    ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    msg: FrontendMessage,
) {
    debug!(msg:?; "Received frontend message");
    match msg {
        FrontendMessage::BatchExtracted { ticket, result } => {
            state.pipeline.on_batch_extracted(ticket, result, ch_tx);
        }
        FrontendMessage::EditProbed {
            ticket,
            session_id,
            attachment_key,
            result,
        } => {
            state
                .pipeline
                .on_edit_probed(ticket, session_id, attachment_key, result);
        }
        FrontendMessage::MediaSent { sent } => {
            state.config.hooks.do_on_media_sent(&state.app_name, &sent);
            state.pipeline.on_media_sent(&sent);
        }
        FrontendMessage::SendFailed { batch_id, error } => {
            state.pipeline.on_send_failed(batch_id, error);
        }
    }
    state.refresh();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::tests::descriptor;
    use crate::channel::SentBatch;
    use crate::permissions::Permission;
    use crate::sources::{AttachmentSource, SourceError};
    use crate::state::tests::state;
    use crate::worker::Job;

    fn extraction_ticket(state: &mut AppState) -> u64 {
        match state.take_jobs().pop() {
            Some(Job::Extract(job)) => job.ticket.id(),
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[test]
    fn extracted_batch_flows_to_preview_and_channel() {
        let (tx, mut rx) = mpsc::unbounded();
        let mut state = state(&[Permission::ReadStorage]);
        state.start(AttachmentSource::Files {
            paths: vec!["/tmp/A".into(), "/tmp/B".into()],
        });
        let ticket = extraction_ticket(&mut state);

        process_frontend_message(
            &mut state,
            &tx,
            FrontendMessage::BatchExtracted {
                ticket,
                result: Ok(vec![
                    descriptor("A", "image/jpeg", 2),
                    descriptor("B", "application/pdf", 5),
                ]),
            },
        );

        let Ok(Some(ChannelMessage::SendMedia(batch))) = rx.try_next() else {
            panic!("expected the file to be sent");
        };
        assert_eq!(batch.attachments[0].name, "B");
        assert!(state.pipeline.preview().is_some());
        assert!(state
            .take_output()
            .iter()
            .any(|l| l.starts_with("> 0: A")));

        process_frontend_message(
            &mut state,
            &tx,
            FrontendMessage::MediaSent {
                sent: SentBatch {
                    batch_id: batch.batch_id,
                    names: vec!["B".to_owned()],
                    timestamp: 0,
                },
            },
        );
        assert_eq!(
            state.take_output(),
            vec![format!("Sent batch {} with 1 attachment(s)", batch.batch_id)]
        );
    }

    #[test]
    fn failed_batch_prints_one_error() {
        let (tx, _rx) = mpsc::unbounded();
        let mut state = state(&[Permission::ReadStorage]);
        state.start(AttachmentSource::Files {
            paths: vec!["/nope".into()],
        });
        let ticket = extraction_ticket(&mut state);
        process_frontend_message(
            &mut state,
            &tx,
            FrontendMessage::BatchExtracted {
                ticket,
                result: Err(SourceError::AllItemsFailed { attempted: 1 }),
            },
        );
        assert_eq!(
            state.take_output(),
            vec!["Failed to process the selected attachment".to_owned()]
        );
        assert!(state.is_idle());
    }

    #[test]
    fn command_errors_are_printed() {
        let (tx, _rx) = mpsc::unbounded();
        let mut state = state(&[]);
        assert!(!process_command_line(&mut state, &tx, "send"));
        assert_eq!(
            state.take_output(),
            vec!["error: No attachment preview is open".to_owned()]
        );
        assert!(process_command_line(&mut state, &tx, "quit"));
    }
}
