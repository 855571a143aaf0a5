//! Content resolution: turning a path into an [`AttachmentDescriptor`] and an attachment
//! into the bytes that get uploaded.
//!
//! Everything here performs blocking I/O and must run off the interactive loop.

use std::{
    fs::File,
    io::{BufReader, Cursor, Read as _},
    path::{Path, PathBuf},
};

use image::{DynamicImage, ImageFormat, ImageReader};
use log::debug;
use url::Url;

use crate::attachment::{AttachmentDescriptor, AttachmentKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Not a regular file: {0:?}")]
    NotAFile(PathBuf),
    #[error("Location is not a local file: {0}")]
    NotLocal(Url),
    #[error("{path:?} has unexpected type {mime_type}")]
    NotMedia { path: PathBuf, mime_type: String },
    #[error("Failed to decode image {path:?}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Platform content-resolution capability.
pub trait MediaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<AttachmentDescriptor>;

    fn dimensions(&self, path: &Path) -> Result<(u32, u32)>;
}

/// Probes files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileProbe;

impl MediaProbe for FileProbe {
    fn probe(&self, path: &Path) -> Result<AttachmentDescriptor> {
        let path = std::fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
        let metadata = std::fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
        if !metadata.is_file() {
            return Err(Error::NotAFile(path));
        }
        // make sure the content can actually be opened, not just stat'ed
        File::open(&path).map_err(|e| Error::io(&path, e))?;

        let mime_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned();
        let kind = AttachmentKind::from_mime_type(&mime_type);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let location = Url::from_file_path(&path).map_err(|()| Error::NotAFile(path.clone()))?;

        let (width, height, renderable) = match kind {
            AttachmentKind::Image => match self.dimensions(&path) {
                Ok((width, height)) => (width, height, true),
                Err(error) => {
                    debug!(path:?, error:%; "Image source could not be decoded");
                    (0, 0, false)
                }
            },
            // the file itself is the frame source; no codec probing here
            AttachmentKind::Video => (0, 0, true),
            _ => (0, 0, false),
        };

        Ok(AttachmentDescriptor {
            name,
            size_bytes: metadata.len(),
            mime_type,
            location,
            width,
            height,
            duration_ms: 0,
            rotation: 0,
            kind,
            renderable,
            temporary: false,
        })
    }

    fn dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        open_image(path)?
            .into_dimensions()
            .map_err(|source| Error::Image {
                path: path.to_owned(),
                source,
            })
    }
}

/// The bytes and metadata handed to an outgoing channel for one attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub name: String,
    pub mime_type: String,
    pub kind: AttachmentKind,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub data: Vec<u8>,
}

/// Reads an attachment, downscaling images when `scale_down` is set and they exceed
/// `max_dimension` on either side. Other kinds are always sent verbatim.
pub fn prepare_upload(
    attachment: &AttachmentDescriptor,
    scale_down: bool,
    max_dimension: u32,
) -> Result<Upload> {
    let path = attachment
        .file_path()
        .ok_or_else(|| Error::NotLocal(attachment.location.clone()))?;

    let oversized = attachment.width > max_dimension || attachment.height > max_dimension;
    if scale_down && attachment.kind == AttachmentKind::Image && oversized {
        let (data, width, height) = scale_down_image(&path, max_dimension)?;
        debug!(name:? = attachment.name, width, height; "Scaled down image for sending");
        return Ok(Upload {
            name: with_jpeg_extension(&attachment.name),
            mime_type: "image/jpeg".to_owned(),
            kind: attachment.kind,
            width,
            height,
            duration_ms: attachment.duration_ms,
            data,
        });
    }

    let mut data = Vec::new();
    File::open(&path)
        .and_then(|mut f| f.read_to_end(&mut data))
        .map_err(|e| Error::io(&path, e))?;
    Ok(Upload {
        name: attachment.name.clone(),
        mime_type: attachment.mime_type.clone(),
        kind: attachment.kind,
        width: attachment.width,
        height: attachment.height,
        duration_ms: attachment.duration_ms,
        data,
    })
}

/// Fits the image into a `max_dimension` square, keeping the aspect ratio, and encodes it
/// as JPEG. Returns the encoded bytes and the new dimensions.
pub fn scale_down_image(path: &Path, max_dimension: u32) -> Result<(Vec<u8>, u32, u32)> {
    let image_error = |source: image::ImageError| Error::Image {
        path: path.to_owned(),
        source,
    };
    let image = open_image(path)?.decode().map_err(image_error)?;
    let scaled = image.thumbnail(max_dimension, max_dimension);
    // JPEG has no alpha channel
    let scaled = DynamicImage::ImageRgb8(scaled.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    scaled
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(image_error)?;
    Ok((out.into_inner(), scaled.width(), scaled.height()))
}

/// Opens an image, trusting its content over its file extension.
fn open_image(path: &Path) -> Result<ImageReader<BufReader<File>>> {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| Error::io(path, e))
}

fn with_jpeg_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.jpg"),
        _ => format!("{name}.jpg"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        image::RgbaImage::new(width, height).save(&path).unwrap();
        path
    }

    #[test]
    fn probe_image_resolves_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "photo.png", 32, 16);
        let descriptor = FileProbe.probe(&path).unwrap();
        assert_eq!(descriptor.name, "photo.png");
        assert_eq!(descriptor.mime_type, "image/png");
        assert_eq!(descriptor.kind, AttachmentKind::Image);
        assert_eq!((descriptor.width, descriptor.height), (32, 16));
        assert!(descriptor.renderable);
        assert!(descriptor.is_previewable());
        assert_eq!(descriptor.location.scheme(), "file");
    }

    #[test]
    fn probe_corrupt_image_is_not_renderable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        let descriptor = FileProbe.probe(&path).unwrap();
        assert_eq!(descriptor.kind, AttachmentKind::Image);
        assert!(!descriptor.renderable);
        assert!(!descriptor.is_previewable());
        assert_eq!(descriptor.size_bytes, 21);
    }

    #[test]
    fn probe_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let descriptor = FileProbe.probe(&path).unwrap();
        assert_eq!(descriptor.kind, AttachmentKind::File);
        assert_eq!(descriptor.mime_type, "application/pdf");
        assert!(!descriptor.is_previewable());
    }

    #[test]
    fn probe_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let error = FileProbe.probe(&dir.path().join("missing.png")).unwrap_err();
        assert!(matches!(error, Error::Io { .. }));
    }

    #[test]
    fn probe_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let error = FileProbe.probe(dir.path()).unwrap_err();
        assert!(matches!(error, Error::NotAFile(_)));
    }

    #[test]
    fn scale_down_bounds_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "big.png", 2000, 1000);
        let descriptor = FileProbe.probe(&path).unwrap();

        let upload = prepare_upload(&descriptor, true, 1024).unwrap();
        assert_eq!(upload.name, "big.jpg");
        assert_eq!(upload.mime_type, "image/jpeg");
        assert_eq!((upload.width, upload.height), (1024, 512));
        let decoded = image::load_from_memory(&upload.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 512));
    }

    #[test]
    fn original_size_is_sent_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "big.png", 2000, 1000);
        let descriptor = FileProbe.probe(&path).unwrap();

        let upload = prepare_upload(&descriptor, false, 1024).unwrap();
        assert_eq!(upload.name, "big.png");
        assert_eq!(upload.data, std::fs::read(&path).unwrap());
    }

    #[test]
    fn small_images_are_not_rescaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "small.png", 20, 10);
        let descriptor = FileProbe.probe(&path).unwrap();

        let upload = prepare_upload(&descriptor, true, 1024).unwrap();
        assert_eq!(upload.mime_type, "image/png");
        assert_eq!(upload.data, std::fs::read(&path).unwrap());
    }

    #[test]
    fn jpeg_extension() {
        assert_eq!(with_jpeg_extension("a.png"), "a.jpg");
        assert_eq!(with_jpeg_extension("archive.tar.gz"), "archive.tar.jpg");
        assert_eq!(with_jpeg_extension("noext"), "noext.jpg");
        assert_eq!(with_jpeg_extension(".hidden"), ".hidden.jpg");
    }
}
