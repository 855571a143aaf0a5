use std::{collections::BTreeMap, path::PathBuf};

use log::debug;

use crate::{
    config::Config,
    permissions::{GrantedPermissions, PermissionRequest},
    pipeline::{PipelineController, PipelineSettings, Request},
    sources::AttachmentSource,
    worker::Job,
};

/// Everything the interactive loop knows between two events.
#[derive(Debug)]
pub struct AppState {
    pub app_name: String,
    pub config: Config,
    pub config_path: PathBuf,
    pub pipeline: PipelineController,
    pub permissions: GrantedPermissions,
    pub pending_permissions: BTreeMap<u64, PermissionRequest>,
    /// Jobs waiting to be spawned by the loop.
    pub jobs: Vec<Job>,
    /// Lines waiting to be printed.
    pub output: Vec<String>,
    shown_revision: u64,
}

impl AppState {
    pub fn new(
        app_name: String,
        config: Config,
        config_path: PathBuf,
        settings: PipelineSettings,
    ) -> Self {
        let permissions = GrantedPermissions::new(config.permissions.granted.iter().copied());
        Self {
            app_name,
            config,
            config_path,
            pipeline: PipelineController::new(settings),
            permissions,
            pending_permissions: BTreeMap::new(),
            jobs: Vec::new(),
            output: Vec::new(),
            shown_revision: 0,
        }
    }

    pub fn say(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    /// Launches an attachment source, or parks it until its permissions are answered.
    pub fn start(&mut self, source: AttachmentSource) {
        match self.pipeline.request(source, &self.permissions) {
            Request::Empty => self.say("Nothing selected"),
            Request::Started(job) => self.jobs.push(Job::Extract(job)),
            Request::NeedsPermission(request) => {
                let permissions = request
                    .permissions
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                self.say(format!(
                    "Request {}: {} needs permission for {permissions}, answer with `grant {}` or `deny {}`",
                    request.id,
                    request.source.name(),
                    request.id,
                    request.id
                ));
                self.pending_permissions.insert(request.id, request);
            }
        }
    }

    /// Returns false when there is no request with that id.
    pub fn answer_permission(&mut self, id: u64, granted: bool) -> bool {
        let Some(request) = self.pending_permissions.remove(&id) else {
            return false;
        };
        debug!(id, granted; "Answering permission request");
        if let Some(job) = self
            .pipeline
            .on_permission_result(request, granted, &mut self.permissions)
        {
            self.jobs.push(Job::Extract(job));
        }
        true
    }

    pub fn render_preview(&self) -> Vec<String> {
        let (Some(id), Some(preview)) = (self.pipeline.preview_id(), self.pipeline.preview())
        else {
            return vec!["No preview open".to_owned()];
        };
        let mut lines = vec![format!(
            "Preview {id} ({} attachment{}), `send` to send, `cancel` to drop:",
            preview.len(),
            if preview.len() == 1 { "" } else { "s" }
        )];
        let current = preview.current_index();
        for (i, attachment) in preview.attachments().iter().enumerate() {
            let marker = if Some(i) == current { '>' } else { ' ' };
            lines.push(format!("{marker} {i}: {}", attachment.message_line()));
        }
        lines
    }

    /// Moves notices and preview changes into the output.
    pub fn refresh(&mut self) {
        for notice in self.pipeline.take_notices() {
            self.output.push(notice.to_string());
        }
        let revision = self.pipeline.revision();
        if revision != self.shown_revision {
            self.shown_revision = revision;
            if self.pipeline.preview().is_some() {
                let lines = self.render_preview();
                self.output.extend(lines);
            }
        }
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub fn take_jobs(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.jobs)
    }

    /// Nothing is running and nobody is waiting for an answer.
    pub fn is_idle(&self) -> bool {
        self.jobs.is_empty() && self.pipeline.is_idle()
    }
}
