mod restore;

use std::path::PathBuf;

use clap::{command, Parser};
use color_eyre::eyre::{eyre, Context, Result};

use crate::core::{Config, RestoreContext};

/// Restore files from borg backups using a fast local index of archive
/// contents.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    /// Bring the archive index up to date before anything else
    #[arg(short = 'u', long, default_value_t = false)]
    update_cache: bool,
    /// Directory the restored file or directory is placed in, defaults to
    /// the current directory
    #[arg(short, long)]
    destination: Option<PathBuf>,
    /// Restore the newest version older than this age, e.g. '5d' or '1.5h'
    #[arg(short, long)]
    time: Option<String>,
    /// Restore from this archive instead of prompting
    #[arg(short, long)]
    archive: Option<String>,
    /// Only list the archives containing the path, do not restore
    #[arg(short, long, default_value_t = false)]
    list: bool,
    /// Path to the configuration file
    #[arg(short, long, env = "BORG_RESTORE_CONFIG")]
    config_path: Option<PathBuf>,
    /// The file or directory to restore
    path: Option<String>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config_path = match self.config_path {
            Some(path) => path,
            None => Config::default_path()?,
        };
        let config = Config::new(&config_path)?;
        let mut ctx = RestoreContext::new(config)
            .with_context(|| eyre!("Failed to initialize run"))?;

        if self.update_cache {
            ctx.update_cache()?;
        }
        let Some(path) = self.path else {
            if self.update_cache {
                return Ok(());
            }
            return Err(eyre!("No path given; nothing to look up or restore"));
        };

        restore::execute(
            ctx,
            restore::Params {
                path,
                destination: self.destination,
                time: self.time,
                archive: self.archive,
                list: self.list,
            },
        )
    }
}
