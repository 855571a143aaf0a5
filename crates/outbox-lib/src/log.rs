use std::{
    fs::{create_dir_all, File},
    path::Path,
};

pub struct LogTarget {
    file: File,
}

impl LogTarget {
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        Ok(Self {
            file: File::create(path)?,
        })
    }
}

impl std::io::Write for LogTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Sends all logging to `path`, leaving stdout to the prompt.
pub fn init_logger<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let log_target = LogTarget::new(path)?;
    env_logger::builder()
        .target(env_logger::Target::Pipe(Box::new(log_target)))
        .init();
    Ok(())
}
