//! Interactive preview of the previewable part of a batch.
//!
//! A session is `Active` from construction until its last attachment is removed, at which
//! point it becomes `Empty` and the owner treats the batch as cancelled. Transitions that
//! index past the end of the list are programming errors and panic.
//!
//! Every attachment also gets a key that stays fixed while others are removed around it, so
//! work started for one attachment can find it again later.

use url::Url;

use crate::attachment::AttachmentDescriptor;

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewState {
    Empty,
    Active {
        attachments: Vec<AttachmentDescriptor>,
        /// Stable key of each attachment, parallel to `attachments`.
        keys: Vec<u64>,
        current_index: usize,
    },
}

/// An attachment re-read after an external editor wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct EditedContent {
    pub location: Url,
    pub mime_type: String,
    pub size_bytes: u64,
    /// New width and height, when the edit produced a different image.
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewAction {
    SetCurrentAttachment(usize),
    RemoveCurrentAttachment,
    UpdatePathOfCurrentAttachment(EditedContent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSendOptions {
    pub send_original_size: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub attachments: Vec<AttachmentDescriptor>,
    pub options: PendingSendOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSession {
    state: PreviewState,
}

impl PreviewSession {
    /// Returns `None` for an empty list; those batches take the direct-send path.
    pub fn new(attachments: Vec<AttachmentDescriptor>) -> Option<Self> {
        if attachments.is_empty() {
            return None;
        }
        Some(Self {
            state: PreviewState::Active {
                keys: (0..attachments.len() as u64).collect(),
                attachments,
                current_index: 0,
            },
        })
    }

    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state, PreviewState::Empty)
    }

    pub fn attachments(&self) -> &[AttachmentDescriptor] {
        match &self.state {
            PreviewState::Empty => &[],
            PreviewState::Active { attachments, .. } => attachments,
        }
    }

    pub fn len(&self) -> usize {
        self.attachments().len()
    }

    pub fn current_index(&self) -> Option<usize> {
        match &self.state {
            PreviewState::Empty => None,
            PreviewState::Active { current_index, .. } => Some(*current_index),
        }
    }

    pub fn current(&self) -> Option<&AttachmentDescriptor> {
        match &self.state {
            PreviewState::Empty => None,
            PreviewState::Active {
                attachments,
                current_index,
                ..
            } => attachments.get(*current_index),
        }
    }

    pub fn current_key(&self) -> Option<u64> {
        match &self.state {
            PreviewState::Empty => None,
            PreviewState::Active {
                keys,
                current_index,
                ..
            } => keys.get(*current_index).copied(),
        }
    }

    pub fn contains(&self, key: u64) -> bool {
        match &self.state {
            PreviewState::Empty => false,
            PreviewState::Active { keys, .. } => keys.contains(&key),
        }
    }

    /// Applies an action. Returns the descriptor whose file the session no longer refers
    /// to, if the action let go of one.
    pub fn handle(&mut self, action: PreviewAction) -> Option<AttachmentDescriptor> {
        match action {
            PreviewAction::SetCurrentAttachment(index) => {
                self.set_current_attachment(index);
                None
            }
            PreviewAction::RemoveCurrentAttachment => self.remove_current_attachment(),
            PreviewAction::UpdatePathOfCurrentAttachment(edit) => {
                self.update_path_of_current_attachment(edit)
            }
        }
    }

    pub fn set_current_attachment(&mut self, index: usize) {
        let PreviewState::Active {
            attachments,
            current_index,
            ..
        } = &mut self.state
        else {
            return;
        };
        assert!(
            index < attachments.len(),
            "attachment index {index} out of bounds for {} attachments",
            attachments.len()
        );
        *current_index = index;
    }

    /// Returns the removed attachment.
    pub fn remove_current_attachment(&mut self) -> Option<AttachmentDescriptor> {
        let PreviewState::Active {
            attachments,
            keys,
            current_index,
        } = &mut self.state
        else {
            return None;
        };
        let removed = attachments.remove(*current_index);
        keys.remove(*current_index);
        if attachments.is_empty() {
            self.state = PreviewState::Empty;
        } else {
            *current_index = (*current_index).min(attachments.len() - 1);
        }
        Some(removed)
    }

    pub fn update_path_of_current_attachment(
        &mut self,
        edit: EditedContent,
    ) -> Option<AttachmentDescriptor> {
        let key = self.current_key()?;
        self.update_attachment(key, edit)
    }

    /// Replaces the content of the attachment with `key`, keeping its name. Does nothing
    /// when that attachment is no longer part of the session. Returns the previous
    /// descriptor when the content moved to a different file.
    pub fn update_attachment(
        &mut self,
        key: u64,
        edit: EditedContent,
    ) -> Option<AttachmentDescriptor> {
        let PreviewState::Active {
            attachments, keys, ..
        } = &mut self.state
        else {
            return None;
        };
        let index = keys.iter().position(|k| *k == key)?;
        let attachment = &mut attachments[index];
        let previous = attachment.clone();
        let moved = attachment.location != edit.location;
        attachment.location = edit.location;
        attachment.mime_type = edit.mime_type;
        attachment.size_bytes = edit.size_bytes;
        if let Some((width, height)) = edit.dimensions {
            attachment.width = width;
            attachment.height = height;
            // edited images are written upright
            attachment.rotation = 0;
        }
        if moved {
            // the editor's output belongs to the user
            attachment.temporary = false;
            Some(previous)
        } else {
            None
        }
    }

    /// Ends the session. An `Empty` session has nothing to commit.
    pub fn commit(self, keep_original_size: bool) -> Option<Committed> {
        match self.state {
            PreviewState::Empty => None,
            PreviewState::Active { attachments, .. } => Some(Committed {
                attachments,
                options: PendingSendOptions {
                    send_original_size: keep_original_size,
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::tests::descriptor;

    fn session(names: &[&str]) -> PreviewSession {
        PreviewSession::new(
            names
                .iter()
                .map(|n| descriptor(n, "image/jpeg", 1_000))
                .collect(),
        )
        .unwrap()
    }

    fn names(session: &PreviewSession) -> Vec<&str> {
        session
            .attachments()
            .iter()
            .map(|a| a.name.as_str())
            .collect()
    }

    #[test]
    fn new_rejects_empty_list() {
        assert!(PreviewSession::new(Vec::new()).is_none());
    }

    #[test]
    fn new_starts_at_first_attachment() {
        let s = session(&["a", "c"]);
        assert_eq!(s.current_index(), Some(0));
        assert_eq!(s.current().unwrap().name, "a");
    }

    #[test]
    fn set_current_is_idempotent() {
        let mut s = session(&["a", "b", "c"]);
        s.set_current_attachment(2);
        let once = s.clone();
        s.set_current_attachment(2);
        assert_eq!(s, once);
        assert_eq!(s.current_index(), Some(2));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn set_current_out_of_bounds_panics() {
        let mut s = session(&["a"]);
        s.set_current_attachment(1);
    }

    #[test]
    fn remove_first_of_two() {
        let mut s = session(&["a", "c"]);
        s.remove_current_attachment();
        assert_eq!(names(&s), vec!["c"]);
        assert_eq!(s.current_index(), Some(0));
    }

    #[test]
    fn remove_only_attachment_empties_session() {
        let mut s = session(&["c"]);
        s.remove_current_attachment();
        assert!(s.is_empty());
        assert_eq!(s.current_index(), None);
        assert!(s.commit(false).is_none());
    }

    #[test]
    fn remove_last_clamps_index() {
        let mut s = session(&["a", "b", "c"]);
        s.set_current_attachment(2);
        s.remove_current_attachment();
        assert_eq!(names(&s), vec!["a", "b"]);
        assert_eq!(s.current_index(), Some(1));
    }

    #[test]
    fn remove_never_leaves_index_out_of_bounds() {
        for len in 1..6usize {
            for start in 0..len {
                let names = (0..len).map(|i| i.to_string()).collect::<Vec<_>>();
                let refs = names.iter().map(String::as_str).collect::<Vec<_>>();
                let mut s = session(&refs);
                s.set_current_attachment(start);
                while !s.is_empty() {
                    s.remove_current_attachment();
                    if let Some(index) = s.current_index() {
                        assert!(index < s.len());
                    }
                }
            }
        }
    }

    #[test]
    fn remove_on_empty_is_noop() {
        let mut s = session(&["a"]);
        s.remove_current_attachment();
        s.remove_current_attachment();
        s.set_current_attachment(5);
        assert!(s.is_empty());
    }

    fn edit(location: &str, dimensions: Option<(u32, u32)>) -> EditedContent {
        EditedContent {
            location: Url::parse(location).unwrap(),
            mime_type: "image/png".to_owned(),
            size_bytes: 77,
            dimensions,
        }
    }

    #[test]
    fn update_path_replaces_content_but_keeps_name() {
        let mut s = session(&["a", "b"]);
        s.handle(PreviewAction::SetCurrentAttachment(1));
        let cropped = edit("file:///tmp/b_edited.png", Some((100, 50)));
        let previous = s.handle(PreviewAction::UpdatePathOfCurrentAttachment(cropped.clone()));
        assert_eq!(previous.unwrap().location.as_str(), "file:///tmp/b");

        let current = s.current().unwrap();
        assert_eq!(current.location, cropped.location);
        assert_eq!(current.mime_type, "image/png");
        assert_eq!(current.size_bytes, 77);
        assert_eq!((current.width, current.height), (100, 50));
        assert_eq!(current.name, "b");
        assert_eq!(s.attachments()[0].location.as_str(), "file:///tmp/a");
    }

    #[test]
    fn update_path_without_dimensions_keeps_them() {
        let mut s = session(&["a"]);
        s.update_path_of_current_attachment(edit("file:///tmp/x.jpg", None));
        assert_eq!((s.current().unwrap().width, s.current().unwrap().height), (640, 480));
    }

    #[test]
    fn update_in_place_keeps_temporary_file() {
        let mut s = session(&["a"]);
        if let PreviewState::Active { attachments, .. } = &mut s.state {
            attachments[0].temporary = true;
        }
        assert_eq!(
            s.update_path_of_current_attachment(edit("file:///tmp/a", Some((1, 1)))),
            None
        );
        assert!(s.current().unwrap().temporary);

        let previous = s.update_path_of_current_attachment(edit("file:///tmp/a2", None));
        assert!(previous.unwrap().temporary);
        assert!(!s.current().unwrap().temporary);
    }

    #[test]
    fn keys_survive_removal_of_neighbours() {
        let mut s = session(&["a", "b", "c"]);
        s.set_current_attachment(1);
        let b = s.current_key().unwrap();
        s.set_current_attachment(0);
        assert_eq!(s.remove_current_attachment().unwrap().name, "a");
        assert!(s.contains(b));

        s.update_attachment(b, edit("file:///tmp/b2", None));
        assert_eq!(s.attachments()[0].location.as_str(), "file:///tmp/b2");
        assert_eq!(s.attachments()[1].location.as_str(), "file:///tmp/c");
    }

    #[test]
    fn update_of_removed_attachment_is_dropped() {
        let mut s = session(&["a", "b"]);
        let a = s.current_key().unwrap();
        s.remove_current_attachment();
        assert!(!s.contains(a));
        assert_eq!(s.update_attachment(a, edit("file:///tmp/a2", None)), None);
        assert_eq!(names(&s), vec!["b"]);
        assert_eq!(s.current().unwrap().location.as_str(), "file:///tmp/b");
    }

    #[test]
    fn commit_carries_size_option() {
        let mut s = session(&["a", "b", "c"]);
        s.set_current_attachment(1);
        s.remove_current_attachment();
        let committed = s.commit(true).unwrap();
        assert!(committed.options.send_original_size);
        let names = committed
            .attachments
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "c"]);
    }
}
