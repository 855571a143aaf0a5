use std::path::{Path, PathBuf};

use crate::{hooks::Hooks, permissions::Permission};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Default, Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub hooks: Hooks,
    pub pipeline: PipelineConfig,
    pub permissions: PermissionsConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Image types the crop command accepts.
    pub editable_mime_types: Vec<String>,
    /// Longest side of an image sent without `--original-size`.
    pub max_image_dimension: u32,
    pub min_voice_note_ms: u64,
    pub max_voice_note_ms: u64,
    /// Where camera captures and contact cards are written. Defaults to a directory under
    /// the data dir.
    pub capture_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            editable_mime_types: vec!["image/jpeg".to_owned(), "image/png".to_owned()],
            max_image_dimension: 1024,
            min_voice_note_ms: 1000,
            max_voice_note_ms: 60 * 60 * 1000,
            capture_dir: None,
        }
    }
}

#[derive(Default, Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Permissions treated as granted from the start.
    pub granted: Vec<Permission>,
}

/// Loads the config file, falling back to the defaults when there is none.
pub fn load_config(path: &Path) -> Result<Config, Error> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Config::default())
        }
        Err(source) => {
            return Err(Error::Read {
                path: path.to_owned(),
                source,
            })
        }
    };
    toml::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.pipeline.max_image_dimension, 1024);
        assert_eq!(config.pipeline.max_voice_note_ms, 3_600_000);
        assert!(config.hooks.on_media_sent.is_none());
        assert!(config.permissions.granted.is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[hooks]
on_media_sent = "notify-send sent"

[pipeline]
max_image_dimension = 2048

[permissions]
granted = ["camera", "microphone"]
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        insta::assert_debug_snapshot!(config, @r###"
        Config {
            hooks: Hooks {
                on_media_sent: Some(
                    "notify-send sent",
                ),
            },
            pipeline: PipelineConfig {
                editable_mime_types: [
                    "image/jpeg",
                    "image/png",
                ],
                max_image_dimension: 2048,
                min_voice_note_ms: 1000,
                max_voice_note_ms: 3600000,
                capture_dir: None,
            },
            permissions: PermissionsConfig {
                granted: [
                    Camera,
                    Microphone,
                ],
            },
        }
        "###);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pipeline]\nmax_image_dimension = \"big\"\n").unwrap();
        assert!(matches!(load_config(&path), Err(Error::Parse { .. })));
    }
}
