use std::{convert::Infallible, ffi::OsString, path::PathBuf, str::FromStr};

use futures::channel::mpsc;
use log::debug;

use crate::{
    message::ChannelMessage,
    pipeline,
    preview::PreviewAction,
    sources::{AttachmentSource, ContactCard},
    state::AppState,
    worker::Job,
};

#[derive(Debug, PartialEq, Eq)]
pub enum CommandSuccess {
    Nothing,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing argument {0}")]
    MissingArgument(String),
    #[error("Invalid argument {arg:?} with value {value:?}")]
    InvalidArgument { arg: String, value: String },
    #[error("Unknown command {0:?}")]
    UnknownCommand(String),
    #[error("Unknown arguments to command: {0}")]
    UnknownArguments(String),
    #[error("No permission request with id {0}")]
    UnknownRequest(u64),
    #[error("Unbalanced quotes in command line")]
    Quoting(#[from] shell_words::ParseError),
    #[error(transparent)]
    Pipeline(#[from] pipeline::Error),
    #[error("{0}")]
    Failure(String),
}

type Result<T> = std::result::Result<T, Error>;

pub trait Command: std::fmt::Debug {
    fn execute(
        &self,
        state: &mut AppState,
        ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess>;

    fn parse(&mut self, args: pico_args::Arguments) -> Result<()> {
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self
    where
        Self: Sized;

    fn names(&self) -> Vec<&'static str>;
}

pub fn commands() -> Vec<Box<dyn Command>> {
    let mut v: Vec<Box<dyn Command>> = Vec::new();
    v.push(Box::new(Quit::default()));
    v.push(Box::new(AttachFiles::default()));
    v.push(Box::new(AttachGallery::default()));
    v.push(Box::new(AttachAudio::default()));
    v.push(Box::new(AttachContact::default()));
    v.push(Box::new(TakePhoto::default()));
    v.push(Box::new(TakeVideo::default()));
    v.push(Box::new(RecordVoice::default()));
    v.push(Box::new(Grant::default()));
    v.push(Box::new(Deny::default()));
    v.push(Box::new(Select::default()));
    v.push(Box::new(NextAttachment::default()));
    v.push(Box::new(PrevAttachment::default()));
    v.push(Box::new(Remove::default()));
    v.push(Box::new(Crop::default()));
    v.push(Box::new(View::default()));
    v.push(Box::new(SendPreview::default()));
    v.push(Box::new(Cancel::default()));
    v.push(Box::new(Show::default()));
    v.push(Box::new(Commands::default()));
    v
}

/// Parses and runs one command line.
pub fn execute_line(
    state: &mut AppState,
    ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    cmdline: &str,
) -> Result<CommandSuccess> {
    let args = shell_words::split(cmdline)?
        .into_iter()
        .map(OsString::from)
        .collect();
    let mut pargs = pico_args::Arguments::from_vec(args);

    debug!(pargs:? = pargs; "Parsed arguments for command");
    let Some(subcmd) = pargs.subcommand().map_err(|e| Error::Failure(e.to_string()))? else {
        return Ok(CommandSuccess::Nothing);
    };
    let command = commands()
        .into_iter()
        .find(|c| c.names().contains(&subcmd.as_str()));

    if let Some(mut command) = command {
        command.parse(pargs)?;
        command.execute(state, ch_tx)
    } else {
        Err(Error::UnknownCommand(subcmd))
    }
}

#[derive(Debug)]
pub struct Quit;

impl Command for Quit {
    fn execute(
        &self,
        _state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        Ok(CommandSuccess::Quit)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["quit", "q"]
    }
}

#[derive(Debug)]
pub struct AttachFiles {
    paths: Vec<String>,
}

impl Command for AttachFiles {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.start(AttachmentSource::Files {
            paths: expand_all(&self.paths),
        });
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, args: pico_args::Arguments) -> Result<()> {
        self.paths = parse_paths(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self { paths: Vec::new() }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["attach-files"]
    }
}

#[derive(Debug)]
pub struct AttachGallery {
    paths: Vec<String>,
}

impl Command for AttachGallery {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.start(AttachmentSource::Gallery {
            paths: expand_all(&self.paths),
        });
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, args: pico_args::Arguments) -> Result<()> {
        self.paths = parse_paths(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self { paths: Vec::new() }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["attach-gallery"]
    }
}

#[derive(Debug)]
pub struct AttachAudio {
    paths: Vec<String>,
}

impl Command for AttachAudio {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.start(AttachmentSource::Audio {
            paths: expand_all(&self.paths),
        });
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, args: pico_args::Arguments) -> Result<()> {
        self.paths = parse_paths(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self { paths: Vec::new() }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["attach-audio"]
    }
}

#[derive(Debug)]
pub struct AttachContact {
    card: ContactCard,
}

impl Command for AttachContact {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.start(AttachmentSource::Contact(self.card.clone()));
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        let phones = args
            .values_from_str("--phone")
            .map_err(|_e| Error::MissingArgument("phone".to_owned()))?;
        let emails = args
            .values_from_str("--email")
            .map_err(|_e| Error::MissingArgument("email".to_owned()))?;
        let name = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("name".to_owned()))?;
        self.card = ContactCard {
            name,
            phones,
            emails,
        };
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self {
            card: ContactCard {
                name: String::new(),
                phones: Vec::new(),
                emails: Vec::new(),
            },
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["attach-contact"]
    }
}

#[derive(Debug)]
pub struct TakePhoto {
    path: String,
}

impl Command for TakePhoto {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.start(AttachmentSource::CameraPhoto {
            capture: expand_tilde(&self.path),
        });
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        self.path = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("path".to_owned()))?;
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self {
            path: String::new(),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["take-photo"]
    }
}

#[derive(Debug)]
pub struct TakeVideo {
    path: String,
    duration_ms: u64,
}

impl Command for TakeVideo {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.start(AttachmentSource::CameraVideo {
            capture: expand_tilde(&self.path),
            duration_ms: self.duration_ms,
        });
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        let duration_ms = args
            .opt_value_from_str("--duration-ms")
            .map_err(|e| Error::InvalidArgument {
                arg: "duration-ms".to_owned(),
                value: e.to_string(),
            })?;
        let path = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("path".to_owned()))?;
        *self = Self {
            path,
            duration_ms: duration_ms.unwrap_or_default(),
        };
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self {
            path: String::new(),
            duration_ms: 0,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["take-video"]
    }
}

#[derive(Debug)]
pub struct RecordVoice {
    path: String,
    duration_ms: u64,
}

impl Command for RecordVoice {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.start(AttachmentSource::VoiceNote {
            recording: expand_tilde(&self.path),
            duration_ms: self.duration_ms,
        });
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        let duration_ms = args
            .value_from_str("--duration-ms")
            .map_err(|_e| Error::MissingArgument("duration-ms".to_owned()))?;
        let path = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("path".to_owned()))?;
        *self = Self { path, duration_ms };
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self {
            path: String::new(),
            duration_ms: 0,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["record-voice"]
    }
}

#[derive(Debug)]
pub struct Grant {
    id: u64,
}

impl Command for Grant {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        if !state.answer_permission(self.id, true) {
            return Err(Error::UnknownRequest(self.id));
        }
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        self.id = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("id".to_owned()))?;
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self { id: 0 }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["grant"]
    }
}

#[derive(Debug)]
pub struct Deny {
    id: u64,
}

impl Command for Deny {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        if !state.answer_permission(self.id, false) {
            return Err(Error::UnknownRequest(self.id));
        }
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        self.id = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("id".to_owned()))?;
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self { id: 0 }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["deny"]
    }
}

/// Focuses an attachment by index or by the start of its name.
#[derive(Debug)]
pub struct Select {
    pub item: IndexOrString,
}

impl Command for Select {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        let index = match &self.item {
            IndexOrString::Index(index) => *index,
            IndexOrString::Str(name) => {
                let Some(preview) = state.pipeline.preview() else {
                    return Err(pipeline::Error::NoPreview.into());
                };
                let Some(index) = preview
                    .attachments()
                    .iter()
                    .position(|a| a.name.starts_with(name.as_str()))
                else {
                    return Err(Error::InvalidArgument {
                        arg: "item".to_owned(),
                        value: name.to_owned(),
                    });
                };
                index
            }
        };
        state
            .pipeline
            .handle_preview(PreviewAction::SetCurrentAttachment(index))?;
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        self.item = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("item".to_owned()))?;
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self {
            item: IndexOrString::Index(0),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["select"]
    }
}

#[derive(Debug)]
pub struct NextAttachment;

impl Command for NextAttachment {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        let preview = state.pipeline.preview().ok_or(pipeline::Error::NoPreview)?;
        let current = preview.current_index().unwrap_or_default();
        let next = (current + 1).min(preview.len().saturating_sub(1));
        state
            .pipeline
            .handle_preview(PreviewAction::SetCurrentAttachment(next))?;
        Ok(CommandSuccess::Nothing)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["next"]
    }
}

#[derive(Debug)]
pub struct PrevAttachment;

impl Command for PrevAttachment {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        let preview = state.pipeline.preview().ok_or(pipeline::Error::NoPreview)?;
        let prev = preview.current_index().unwrap_or_default().saturating_sub(1);
        state
            .pipeline
            .handle_preview(PreviewAction::SetCurrentAttachment(prev))?;
        Ok(CommandSuccess::Nothing)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["prev"]
    }
}

#[derive(Debug)]
pub struct Remove;

impl Command for Remove {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state
            .pipeline
            .handle_preview(PreviewAction::RemoveCurrentAttachment)?;
        Ok(CommandSuccess::Nothing)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["remove"]
    }
}

/// Replaces the focused image with an edited copy.
#[derive(Debug)]
pub struct Crop {
    path: String,
}

impl Command for Crop {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        let job = state.pipeline.request_edit(expand_tilde(&self.path))?;
        state.jobs.push(Job::ProbeEdit(job));
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        self.path = args
            .free_from_str()
            .map_err(|_e| Error::MissingArgument("path".to_owned()))?;
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self {
            path: String::new(),
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["crop", "edit"]
    }
}

#[derive(Debug)]
pub struct View;

impl Command for View {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        let current = state
            .pipeline
            .preview()
            .and_then(|p| p.current())
            .ok_or(pipeline::Error::NoPreview)?;
        let Some(path) = current.file_path() else {
            return Err(Error::Failure(format!(
                "{} is not a local file",
                current.location
            )));
        };
        debug!(path:?; "Opening attachment");
        open::that_detached(&path).map_err(|e| Error::Failure(e.to_string()))?;
        Ok(CommandSuccess::Nothing)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["view"]
    }
}

#[derive(Debug)]
pub struct SendPreview {
    original_size: bool,
}

impl Command for SendPreview {
    fn execute(
        &self,
        state: &mut AppState,
        ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        let batch_id = state.pipeline.commit(self.original_size, ch_tx)?;
        state.say(format!("Sending batch {batch_id}"));
        Ok(CommandSuccess::Nothing)
    }

    fn parse(&mut self, mut args: pico_args::Arguments) -> Result<()> {
        self.original_size = args.contains("--original-size");
        check_unused_args(args)?;
        Ok(())
    }

    fn default() -> Self {
        Self {
            original_size: false,
        }
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["send"]
    }
}

#[derive(Debug)]
pub struct Cancel;

impl Command for Cancel {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        state.pipeline.cancel();
        Ok(CommandSuccess::Nothing)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["cancel"]
    }
}

#[derive(Debug)]
pub struct Show;

impl Command for Show {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        let mut lines = state.render_preview();
        for request in state.pending_permissions.values() {
            lines.push(format!(
                "Request {} for {} is waiting for an answer",
                request.id,
                request.source.name()
            ));
        }
        state.output.extend(lines);
        Ok(CommandSuccess::Nothing)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["show"]
    }
}

#[derive(Debug)]
pub struct Commands;

impl Command for Commands {
    fn execute(
        &self,
        state: &mut AppState,
        _ch_tx: &mpsc::UnboundedSender<ChannelMessage>,
    ) -> Result<CommandSuccess> {
        for command in commands() {
            state.say(command.names().join(", "));
        }
        Ok(CommandSuccess::Nothing)
    }

    fn default() -> Self {
        Self
    }

    fn names(&self) -> Vec<&'static str> {
        vec!["commands", "help"]
    }
}

fn parse_paths(mut args: pico_args::Arguments) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    while let Some(path) = args
        .opt_free_from_str()
        .map_err(|_e| Error::MissingArgument("paths".to_owned()))?
    {
        paths.push(path);
    }
    check_unused_args(args)?;
    Ok(paths)
}

fn check_unused_args(args: pico_args::Arguments) -> Result<()> {
    let unused_args = args.finish();
    if !unused_args.is_empty() {
        return Err(Error::UnknownArguments(
            unused_args
                .into_iter()
                .map(|s| s.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        ));
    }
    Ok(())
}

fn expand_all(paths: &[String]) -> Vec<PathBuf> {
    paths.iter().map(|p| expand_tilde(p)).collect()
}

fn expand_tilde(s: &str) -> PathBuf {
    let Some(home) = std::env::var_os("HOME") else {
        return PathBuf::from(s);
    };
    if s == "~" {
        return PathBuf::from(home);
    }
    match s.strip_prefix("~/") {
        Some(stripped_path) => PathBuf::from(home).join(stripped_path),
        None => PathBuf::from(s),
    }
}

#[derive(Debug, Clone)]
pub enum IndexOrString {
    Index(usize),
    Str(String),
}

impl FromStr for IndexOrString {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.parse::<usize>() {
            Ok(num) => Ok(Self::Index(num)),
            Err(_) => Ok(Self::Str(s.to_owned())),
        }
    }
}
