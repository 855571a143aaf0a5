use std::{
    collections::BTreeMap,
    io,
    process::{ExitStatus, Stdio},
    thread::JoinHandle,
};

use log::{debug, warn};

use crate::channel::SentBatch;

#[derive(Default, Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Hooks {
    pub on_media_sent: Option<String>,
}

impl Hooks {
    pub fn do_on_media_sent(&self, app_name: &str, sent: &SentBatch) {
        let Some(script) = &self.on_media_sent else {
            return;
        };

        let envs = media_sent_env(app_name, sent);
        debug!(script:?, batch_id = sent.batch_id; "Running on_media_sent hook");

        if let Err(error) = run_hook(script, envs) {
            warn!(error:?; "Failed to execute on_media_sent hook");
        }
    }
}

/// Starts the script without waiting for it. A background thread reaps the child.
fn run_hook(
    script: &str,
    envs: BTreeMap<String, String>,
) -> io::Result<JoinHandle<io::Result<ExitStatus>>> {
    let mut child = std::process::Command::new("sh")
        .arg("-c")
        .arg(script)
        .envs(envs)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    std::thread::Builder::new()
        .name("hook-reaper".to_owned())
        .spawn(move || {
            let status = child.wait();
            match &status {
                Ok(status) if !status.success() => {
                    warn!(status:%; "on_media_sent hook exited unsuccessfully")
                }
                Ok(_) => {}
                Err(error) => warn!(error:%; "Failed to wait for on_media_sent hook"),
            }
            status
        })
}

fn media_sent_env(app_name: &str, sent: &SentBatch) -> BTreeMap<String, String> {
    let mut envs = BTreeMap::new();
    envs.insert("OUTBOX_APP_NAME".to_owned(), app_name.to_owned());
    envs.insert("OUTBOX_BATCH_ID".to_owned(), sent.batch_id.to_string());
    envs.insert(
        "OUTBOX_ATTACHMENT_COUNT".to_owned(),
        sent.names.len().to_string(),
    );
    envs.insert("OUTBOX_ATTACHMENT_NAMES".to_owned(), sent.names.join("\n"));
    envs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_describes_the_batch() {
        let sent = SentBatch {
            batch_id: 3,
            names: vec!["a.jpg".to_owned(), "b.pdf".to_owned()],
            timestamp: 0,
        };
        insta::assert_debug_snapshot!(media_sent_env("outbox-local", &sent), @r###"
        {
            "OUTBOX_APP_NAME": "outbox-local",
            "OUTBOX_ATTACHMENT_COUNT": "2",
            "OUTBOX_ATTACHMENT_NAMES": "a.jpg\nb.pdf",
            "OUTBOX_BATCH_ID": "3",
        }
        "###);
    }

    #[test]
    fn hook_child_is_waited_for() {
        let handle = run_hook("exit 3", BTreeMap::new()).unwrap();
        let status = handle.join().unwrap().unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn hook_runs_with_batch_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let hooks = Hooks {
            on_media_sent: Some(format!(
                "echo \"$OUTBOX_BATCH_ID $OUTBOX_ATTACHMENT_COUNT\" > {}",
                out.display()
            )),
        };
        let sent = SentBatch {
            batch_id: 8,
            names: vec!["a.jpg".to_owned()],
            timestamp: 0,
        };
        hooks.do_on_media_sent("outbox", &sent);
        for _ in 0..100 {
            if std::fs::read_to_string(&out).is_ok_and(|s| s.ends_with('\n')) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "8 1\n");
    }
}
