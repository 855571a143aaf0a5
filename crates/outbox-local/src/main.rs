use anyhow::Context as _;
use clap::Parser;
use directories::ProjectDirs;
use outbox_lib::log::init_logger;
use outbox_lib::util::{self, Options};
use outbox_local::Local;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(name = "outbox-local")]
pub struct Arguments {
    #[clap(long, default_value = "outbox-local")]
    device_name: String,

    #[clap(long)]
    config_file: Option<PathBuf>,

    /// Where the outbox and logs live, instead of the platform data directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();

    let project_dirs = ProjectDirs::from("net", "outbox", "outbox-local")
        .context("Failed to find a home directory")?;
    let data_local_dir = args
        .data_dir
        .unwrap_or_else(|| project_dirs.data_local_dir().to_owned());

    let log_path = data_local_dir.join("logs.log");
    init_logger(&log_path).with_context(|| format!("Failed to open log file {log_path:?}"))?;

    let config_file = match args.config_file {
        Some(cf) => cf,
        None => project_dirs.config_local_dir().join("config.toml"),
    };

    let opts = Options {
        device_name: args.device_name,
        data_local_dir,
        config_file,
        app_name: "outbox-local".to_owned(),
    };

    util::run::<Local>(opts).await?;

    Ok(())
}
