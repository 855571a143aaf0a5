use anyhow::Context as _;
use clap::Parser;
use directories::ProjectDirs;
use outbox_lib::log::init_logger;
use outbox_lib::util::{self, Options};
use outbox_matrix::Matrix;
use std::path::PathBuf;

/// Send attachments into a Matrix room. The room is chosen when logging in, or with the
/// OUTBOX_MATRIX_ROOM environment variable.
#[derive(Debug, Parser)]
#[clap(name = "outbox-matrix")]
pub struct Arguments {
    #[clap(long, default_value = "outbox-matrix")]
    device_name: String,

    #[clap(long)]
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let project_dirs = ProjectDirs::from("net", "outbox", "outbox-matrix")
        .context("Failed to find a home directory")?;
    let data_local_dir = project_dirs.data_local_dir();

    let log_path = data_local_dir.join("logs.log");
    init_logger(&log_path).with_context(|| format!("Failed to open log file {log_path:?}"))?;

    let args = Arguments::parse();

    let config_file = match args.config_file {
        Some(cf) => cf,
        None => project_dirs.config_local_dir().join("config.toml"),
    };

    let options = Options {
        device_name: args.device_name,
        data_local_dir: data_local_dir.to_owned(),
        config_file,
        app_name: "outbox-matrix".to_owned(),
    };

    util::run::<Matrix>(options).await?;

    Ok(())
}
