//! Attachment sources: the pickers, the camera, the contact picker and the voice recorder.
//!
//! A source describes the raw items of one user action. [`extract`] turns them into
//! descriptors, dropping items that cannot be read instead of failing the whole batch.

use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, warn};

use crate::{
    attachment::{AttachmentDescriptor, AttachmentKind},
    media::{self, MediaProbe},
    permissions::Permission,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ContactCard {
    pub name: String,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
}

impl ContactCard {
    pub fn to_vcard(&self) -> String {
        let mut card = String::from("BEGIN:VCARD\r\nVERSION:3.0\r\n");
        let (family, given) = self.split_name();
        card.push_str(&format!(
            "N:{};{};;;\r\n",
            escape_vcard(family),
            escape_vcard(given)
        ));
        card.push_str(&format!("FN:{}\r\n", escape_vcard(&self.name)));
        for phone in &self.phones {
            card.push_str(&format!("TEL:{}\r\n", escape_vcard(phone)));
        }
        for email in &self.emails {
            card.push_str(&format!("EMAIL:{}\r\n", escape_vcard(email)));
        }
        card.push_str("END:VCARD\r\n");
        card
    }

    /// Family and given name, taking the last word as the family name.
    fn split_name(&self) -> (&str, &str) {
        let name = self.name.trim();
        match name.rsplit_once(char::is_whitespace) {
            Some((given, family)) => (family, given.trim_end()),
            None => ("", name),
        }
    }
}

fn escape_vcard(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            ',' => escaped.push_str("\\,"),
            ';' => escaped.push_str("\\;"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            c => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSource {
    /// `capture` is where the camera wrote the photo.
    CameraPhoto {
        capture: PathBuf,
    },
    CameraVideo {
        capture: PathBuf,
        duration_ms: u64,
    },
    Gallery {
        paths: Vec<PathBuf>,
    },
    Files {
        paths: Vec<PathBuf>,
    },
    Audio {
        paths: Vec<PathBuf>,
    },
    Contact(ContactCard),
    VoiceNote {
        recording: PathBuf,
        duration_ms: u64,
    },
}

impl AttachmentSource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CameraPhoto { .. } => "camera-photo",
            Self::CameraVideo { .. } => "camera-video",
            Self::Gallery { .. } => "gallery",
            Self::Files { .. } => "files",
            Self::Audio { .. } => "audio",
            Self::Contact(_) => "contact",
            Self::VoiceNote { .. } => "voice-note",
        }
    }

    /// Number of raw items the user picked. Zero means the picker was cancelled.
    pub fn item_count(&self) -> usize {
        match self {
            Self::Gallery { paths } | Self::Files { paths } | Self::Audio { paths } => {
                paths.len()
            }
            Self::Contact(card) if card.name.trim().is_empty() => 0,
            Self::CameraPhoto { .. }
            | Self::CameraVideo { .. }
            | Self::Contact(_)
            | Self::VoiceNote { .. } => 1,
        }
    }

    pub fn required_permissions(&self) -> &'static [Permission] {
        match self {
            Self::CameraPhoto { .. } => &[Permission::Camera],
            Self::CameraVideo { .. } => &[Permission::Camera, Permission::Microphone],
            Self::Gallery { .. } | Self::Files { .. } | Self::Audio { .. } => {
                &[Permission::ReadStorage]
            }
            Self::Contact(_) => &[Permission::Contacts],
            Self::VoiceNote { .. } => &[Permission::Microphone],
        }
    }
}

/// What extraction needs to know besides the source itself.
#[derive(Debug, Clone)]
pub struct SourceContext {
    /// Where camera captures and contact cards are written.
    pub capture_dir: PathBuf,
    pub sender_name: String,
    pub min_voice_note_ms: u64,
    pub max_voice_note_ms: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("None of the {attempted} selected items could be processed")]
    AllItemsFailed { attempted: usize },
    #[error("Voice note of {duration_ms}ms is shorter than the minimum of {min_ms}ms")]
    VoiceNoteTooShort { duration_ms: u64, min_ms: u64 },
}

/// Builds descriptors for every readable item of `source`, in source order.
///
/// Blocking: probes the filesystem and may write capture files.
pub fn extract(
    source: &AttachmentSource,
    probe: &dyn MediaProbe,
    context: &SourceContext,
) -> Result<Vec<AttachmentDescriptor>, SourceError> {
    let attempted = source.item_count();
    let mut attachments = Vec::with_capacity(attempted);
    let mut keep = |item: &Path, result: media::Result<AttachmentDescriptor>| match result {
        Ok(descriptor) => attachments.push(descriptor),
        Err(error) => warn!(
            source = source.name(), item:?, error:%;
            "Dropping attachment that could not be processed"
        ),
    };

    match source {
        AttachmentSource::Files { paths } => {
            for path in paths {
                keep(path, probe.probe(path));
            }
        }
        AttachmentSource::Gallery { paths } => {
            for path in paths {
                let result = probe.probe(path).and_then(|d| {
                    if d.kind.supports_preview() {
                        Ok(d)
                    } else {
                        Err(media::Error::NotMedia {
                            path: path.clone(),
                            mime_type: d.mime_type,
                        })
                    }
                });
                keep(path, result);
            }
        }
        AttachmentSource::Audio { paths } => {
            for path in paths {
                let result = probe.probe(path).and_then(|d| {
                    if d.kind == AttachmentKind::Audio {
                        Ok(d)
                    } else {
                        Err(media::Error::NotMedia {
                            path: path.clone(),
                            mime_type: d.mime_type,
                        })
                    }
                });
                keep(path, result);
            }
        }
        AttachmentSource::CameraPhoto { capture } => {
            let result = capture_file(capture, ".jpg", &context.capture_dir)
                .and_then(|path| probe_written(probe, &path))
                .map(|mut d| {
                    d.kind = AttachmentKind::Image;
                    d
                });
            keep(capture, result);
        }
        AttachmentSource::CameraVideo {
            capture,
            duration_ms,
        } => {
            let result = capture_file(capture, ".mp4", &context.capture_dir)
                .and_then(|path| probe_written(probe, &path))
                .map(|mut d| {
                    d.kind = AttachmentKind::Video;
                    d.duration_ms = *duration_ms;
                    d
                });
            keep(capture, result);
        }
        AttachmentSource::Contact(card) => {
            if attempted > 0 {
                let result = write_contact(card, &context.capture_dir)
                    .and_then(|path| probe_written(probe, &path))
                    .map(|mut d| {
                        d.name = format!("{}.vcf", file_stem_for(&card.name));
                        d.mime_type = "text/vcard".to_owned();
                        d.kind = AttachmentKind::Contact;
                        d.renderable = false;
                            d
                    });
                keep(&context.capture_dir, result);
            }
        }
        AttachmentSource::VoiceNote {
            recording,
            duration_ms,
        } => {
            if *duration_ms < context.min_voice_note_ms {
                return Err(SourceError::VoiceNoteTooShort {
                    duration_ms: *duration_ms,
                    min_ms: context.min_voice_note_ms,
                });
            }
            let duration_ms = (*duration_ms).min(context.max_voice_note_ms);
            let result = probe.probe(recording).map(|mut d| {
                d.name = voice_note_name(&context.sender_name);
                d.mime_type = "audio/x-wav".to_owned();
                d.kind = AttachmentKind::Audio;
                d.duration_ms = duration_ms;
                d
            });
            keep(recording, result);
        }
    }

    if attachments.is_empty() && attempted > 0 {
        return Err(SourceError::AllItemsFailed { attempted });
    }
    debug!(source = source.name(), count = attachments.len(); "Extracted attachments");
    Ok(attachments)
}

/// Copies a camera capture into a fresh `<yyyyMMdd_HHmmss>_<random><suffix>` file.
fn capture_file(capture: &Path, suffix: &str, dir: &Path) -> media::Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| media::Error::io(dir, e))?;
    let prefix = format!("{}_", Local::now().format("%Y%m%d_%H%M%S"));
    let (_, path) = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .and_then(|file| file.keep().map_err(|e| e.error))
        .map_err(|e| media::Error::io(dir, e))?;
    if let Err(error) = std::fs::copy(capture, &path) {
        let _ = std::fs::remove_file(&path);
        return Err(media::Error::io(capture, error));
    }
    Ok(path)
}

fn write_contact(card: &ContactCard, dir: &Path) -> media::Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| media::Error::io(dir, e))?;
    let (_, path) = tempfile::Builder::new()
        .prefix(&format!("{}_", file_stem_for(&card.name)))
        .suffix(".vcf")
        .tempfile_in(dir)
        .and_then(|file| file.keep().map_err(|e| e.error))
        .map_err(|e| media::Error::io(dir, e))?;
    std::fs::write(&path, card.to_vcard()).map_err(|e| media::Error::io(&path, e))?;
    Ok(path)
}

/// Probes a file the pipeline wrote itself, deleting it again if it cannot be used.
fn probe_written(probe: &dyn MediaProbe, path: &Path) -> media::Result<AttachmentDescriptor> {
    match probe.probe(path) {
        Ok(mut descriptor) => {
            descriptor.temporary = true;
            Ok(descriptor)
        }
        Err(error) => {
            let _ = std::fs::remove_file(path);
            Err(error)
        }
    }
}

fn file_stem_for(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "contact".to_owned()
    } else {
        stem
    }
}

fn voice_note_name(sender_name: &str) -> String {
    format!(
        "VNR:::{sender_name}:::{}",
        Local::now().format("%b %d, %Y %H:%M")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FileProbe;

    fn context(dir: &Path) -> SourceContext {
        SourceContext {
            capture_dir: dir.join("captures"),
            sender_name: "Alice".to_owned(),
            min_voice_note_ms: 1000,
            max_voice_note_ms: 3_600_000,
        }
    }

    fn write_jpeg(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::new(8, 4).save(&path).unwrap();
        path
    }

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn names(attachments: &[AttachmentDescriptor]) -> Vec<&str> {
        attachments.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn files_drop_unreadable_items_and_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_jpeg(dir.path(), "a.jpg");
        let b = write_file(dir.path(), "b.pdf", b"%PDF");
        let source = AttachmentSource::Files {
            paths: vec![a, dir.path().join("missing.txt"), b],
        };
        let attachments = extract(&source, &FileProbe, &context(dir.path())).unwrap();
        assert_eq!(names(&attachments), vec!["a.jpg", "b.pdf"]);
    }

    #[test]
    fn all_items_failing_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = AttachmentSource::Files {
            paths: vec![dir.path().join("x"), dir.path().join("y")],
        };
        assert_eq!(
            extract(&source, &FileProbe, &context(dir.path())),
            Err(SourceError::AllItemsFailed { attempted: 2 })
        );
    }

    #[test]
    fn empty_pick_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = AttachmentSource::Files { paths: Vec::new() };
        assert_eq!(source.item_count(), 0);
        assert_eq!(extract(&source, &FileProbe, &context(dir.path())), Ok(Vec::new()));
    }

    #[test]
    fn gallery_rejects_non_media() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_jpeg(dir.path(), "a.jpg");
        let b = write_file(dir.path(), "b.txt", b"hello");
        let source = AttachmentSource::Gallery { paths: vec![b, a] };
        let attachments = extract(&source, &FileProbe, &context(dir.path())).unwrap();
        assert_eq!(names(&attachments), vec!["a.jpg"]);
    }

    #[test]
    fn audio_picker_rejects_other_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let song = write_file(dir.path(), "song.mp3", b"ID3");
        let photo = write_jpeg(dir.path(), "photo.jpg");
        let source = AttachmentSource::Audio {
            paths: vec![song, photo],
        };
        let attachments = extract(&source, &FileProbe, &context(dir.path())).unwrap();
        assert_eq!(names(&attachments), vec!["song.mp3"]);
        assert_eq!(attachments[0].kind, AttachmentKind::Audio);
    }

    #[test]
    fn camera_photo_is_copied_into_capture_dir() {
        let dir = tempfile::tempdir().unwrap();
        let shot = write_jpeg(dir.path(), "sensor.jpg");
        let ctx = context(dir.path());
        let source = AttachmentSource::CameraPhoto { capture: shot };
        let attachments = extract(&source, &FileProbe, &ctx).unwrap();
        assert_eq!(attachments.len(), 1);
        let photo = &attachments[0];
        assert!(photo.name.ends_with(".jpg"));
        assert_eq!(photo.name.as_bytes()[8], b'_');
        assert!(photo.name[..8].chars().all(|c| c.is_ascii_digit()));
        assert!(photo.is_previewable());
        assert!(photo.temporary);
        let path = photo.file_path().unwrap();
        assert_eq!(
            path.parent().unwrap(),
            std::fs::canonicalize(&ctx.capture_dir).unwrap()
        );
    }

    #[test]
    fn camera_video_keeps_duration() {
        let dir = tempfile::tempdir().unwrap();
        let clip = write_file(dir.path(), "clip.bin", b"not really mp4");
        let source = AttachmentSource::CameraVideo {
            capture: clip,
            duration_ms: 4200,
        };
        let attachments = extract(&source, &FileProbe, &context(dir.path())).unwrap();
        assert_eq!(attachments[0].kind, AttachmentKind::Video);
        assert_eq!(attachments[0].duration_ms, 4200);
        assert_eq!(attachments[0].mime_type, "video/mp4");
        assert!(attachments[0].is_previewable());
    }

    #[test]
    fn missing_camera_capture_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let source = AttachmentSource::CameraPhoto {
            capture: dir.path().join("nothing.jpg"),
        };
        assert_eq!(
            extract(&source, &FileProbe, &context(dir.path())),
            Err(SourceError::AllItemsFailed { attempted: 1 })
        );
    }

    #[test]
    fn short_voice_note_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let recording = write_file(dir.path(), "rec.wav", b"RIFF");
        let source = AttachmentSource::VoiceNote {
            recording,
            duration_ms: 600,
        };
        assert_eq!(
            extract(&source, &FileProbe, &context(dir.path())),
            Err(SourceError::VoiceNoteTooShort {
                duration_ms: 600,
                min_ms: 1000
            })
        );
    }

    #[test]
    fn voice_note_is_named_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let recording = write_file(dir.path(), "rec.wav", b"RIFF");
        let source = AttachmentSource::VoiceNote {
            recording,
            duration_ms: 5_000_000,
        };
        let attachments = extract(&source, &FileProbe, &context(dir.path())).unwrap();
        let note = &attachments[0];
        assert!(note.name.starts_with("VNR:::Alice:::"));
        assert_eq!(note.mime_type, "audio/x-wav");
        assert_eq!(note.duration_ms, 3_600_000);
        assert!(!note.is_previewable());
    }

    #[test]
    fn contact_becomes_vcard_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let card = ContactCard {
            name: "Bob Smith".to_owned(),
            phones: vec!["+1 555 0100".to_owned()],
            emails: vec!["bob@example.org".to_owned()],
        };
        let source = AttachmentSource::Contact(card.clone());
        let attachments = extract(&source, &FileProbe, &context(dir.path())).unwrap();
        let contact = &attachments[0];
        assert_eq!(contact.name, "Bob_Smith.vcf");
        assert_eq!(contact.kind, AttachmentKind::Contact);
        assert!(contact.temporary);
        assert_eq!(
            std::fs::read_to_string(contact.file_path().unwrap()).unwrap(),
            card.to_vcard()
        );
    }

    #[test]
    fn vcard_escapes_special_characters() {
        let card = ContactCard {
            name: "Smith, Bob; Jr".to_owned(),
            phones: Vec::new(),
            emails: Vec::new(),
        };
        let vcard = card.to_vcard().replace("\r\n", "\n");
        insta::assert_snapshot!(
            vcard.trim_end(),
            @r"
        BEGIN:VCARD
        VERSION:3.0
        N:Jr;Smith\, Bob\;;;;
        FN:Smith\, Bob\; Jr
        END:VCARD
        "
        );
    }

    #[test]
    fn vcard_has_structured_name() {
        let card = |name: &str| ContactCard {
            name: name.to_owned(),
            phones: Vec::new(),
            emails: Vec::new(),
        };
        let n_line = |card: ContactCard| {
            card.to_vcard()
                .lines()
                .find(|l| l.starts_with("N:"))
                .map(str::to_owned)
        };
        assert_eq!(n_line(card("Bob Smith")).as_deref(), Some("N:Smith;Bob;;;"));
        assert_eq!(
            n_line(card("Mary Ann  Jones")).as_deref(),
            Some("N:Jones;Mary Ann;;;")
        );
        assert_eq!(n_line(card("Cher")).as_deref(), Some("N:;Cher;;;"));
    }

    #[test]
    fn permissions_per_source() {
        let camera = AttachmentSource::CameraVideo {
            capture: PathBuf::from("x"),
            duration_ms: 0,
        };
        assert_eq!(
            camera.required_permissions(),
            &[Permission::Camera, Permission::Microphone]
        );
        let voice = AttachmentSource::VoiceNote {
            recording: PathBuf::from("x"),
            duration_ms: 0,
        };
        assert_eq!(voice.required_permissions(), &[Permission::Microphone]);
    }
}
