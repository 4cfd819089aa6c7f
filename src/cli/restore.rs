use std::{
    env,
    io::{self, BufRead, Write},
    path::PathBuf,
};

use chrono::{Local, TimeZone};
use chrono_humanize::HumanTime;
use color_eyre::eyre::{eyre, Context, Result};
use owo_colors::OwoColorize;
use tracing::info;

use crate::core::{ArchiveName, ArchiveVersion, RestoreContext};

pub(crate) struct Params {
    pub path: String,
    pub destination: Option<PathBuf>,
    pub time: Option<String>,
    pub archive: Option<String>,
    pub list: bool,
}

pub(crate) fn execute(ctx: RestoreContext, args: Params) -> Result<()> {
    let lookup = ctx.resolve_lookup_path(&args.path)?;
    let versions = ctx.find_archives(&lookup)?;
    if versions.is_empty() {
        return Ok(());
    }

    if args.list {
        print_versions(&versions);
        return Ok(());
    }

    let selected = match select_version(&ctx, &args, &lookup, &versions)? {
        Some(version) => version,
        None => {
            info!(target: "user-log", "No archive selected, nothing restored");
            return Ok(());
        }
    };

    let destination = match args.destination {
        Some(destination) => destination,
        None => env::current_dir().context("Failed to determine current working directory")?,
    };
    ctx.restore(&lookup, &selected.archive, destination)
}

fn select_version<'a>(
    ctx: &RestoreContext,
    args: &Params,
    lookup: &str,
    versions: &'a [ArchiveVersion],
) -> Result<Option<&'a ArchiveVersion>> {
    if let Some(name) = &args.archive {
        let name = ArchiveName::parse(name)?;
        let version = versions
            .iter()
            .find(|version| version.archive == name)
            .ok_or_else(|| eyre!("Archive {} does not contain '{}'", name, lookup))?;
        return Ok(Some(version));
    }
    if let Some(timespec) = &args.time {
        let version = ctx.select_archive_by_age(versions, timespec)?;
        if version.is_none() {
            info!(target: "user-log", "No version of '{}' is older than {}", lookup, timespec);
        }
        return Ok(version);
    }
    if versions.len() == 1 {
        return Ok(Some(&versions[0]));
    }
    prompt_for_version(versions)
}

fn format_mtime(mtime: i64) -> String {
    match Local.timestamp_opt(mtime, 0).single() {
        Some(datetime) => format!(
            "{} ({})",
            datetime.format("%Y-%m-%d %H:%M:%S"),
            HumanTime::from(datetime)
        ),
        None => format!("@{}", mtime),
    }
}

fn print_versions(versions: &[ArchiveVersion]) {
    info!(
        target: "user-ui",
        "{:>3}  {:<50} {}",
        "#".white().bold(),
        "Archive".white().bold(),
        "Modified".white().bold()
    );
    for (index, version) in versions.iter().enumerate() {
        info!(
            target: "user-ui",
            "{:>3}  {:<50} {}",
            index + 1,
            version.archive.as_str(),
            format_mtime(version.mtime)
        );
    }
}

/// Asks the user to pick one of the listed versions. Empty input aborts
/// the restore without an error.
fn prompt_for_version(versions: &[ArchiveVersion]) -> Result<Option<&ArchiveVersion>> {
    print_versions(versions);
    loop {
        print!("Select an archive to restore from (1-{}, empty to abort): ", versions.len());
        io::stdout().flush().context("Failed to flush stdout")?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read selection from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        match line.parse::<usize>() {
            Ok(choice) if (1..=versions.len()).contains(&choice) => {
                return Ok(Some(&versions[choice - 1]));
            }
            _ => {
                info!(target: "user-log", "'{}' is not a valid selection", line);
            }
        }
    }
}
