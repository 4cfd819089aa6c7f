use std::io::{BufRead, BufReader};

use color_eyre::eyre::{eyre, Context, Result};
use subprocess::{Exec, NullFile, Redirection};
use tracing::trace;

use super::{ArchiveName, RestoreError};

/// Enumerates archives in a backup repository and streams per-file
/// listings for a single archive.
pub trait ArchiveSource {
    fn list_archives(&self) -> Result<Vec<ArchiveName>>;
    /// Streams the raw listing lines of `archive` to `sink`, in the order
    /// the source emits them.
    fn list_archive(
        &self,
        archive: &ArchiveName,
        sink: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()>;
}

/// Restores a single path from an archive into the current working
/// directory.
pub trait Extractor {
    fn extract(&self, strip_components: usize, archive: &ArchiveName, path: &str) -> Result<()>;
}

/// Adapter around the `borg` binary.
pub struct Borg {
    repository: Option<String>,
}

impl Borg {
    pub fn new(repository: Option<String>) -> Result<Borg> {
        which::which("borg")
            .context("Failed to locate the borg binary on PATH")?;
        Ok(Borg { repository })
    }

    fn archive_locator(&self, archive: &ArchiveName) -> String {
        match &self.repository {
            Some(repository) => format!("{}::{}", repository, archive),
            None => format!("::{}", archive),
        }
    }

    fn failure(command: &str, status: subprocess::ExitStatus) -> RestoreError {
        RestoreError::ArchiveSourceFailure {
            command: command.to_string(),
            status,
        }
    }
}

impl ArchiveSource for Borg {
    fn list_archives(&self) -> Result<Vec<ArchiveName>> {
        let mut cmd = Exec::cmd("borg").arg("list");
        if let Some(repository) = &self.repository {
            cmd = cmd.arg(repository);
        }
        trace!("Executing command: {:?}", cmd);
        let capture = cmd
            .stdin(NullFile)
            .stdout(Redirection::Pipe)
            .capture()
            .context("Failed to run borg list")?;
        if !capture.exit_status.success() {
            return Err(Self::failure("borg list", capture.exit_status).into());
        }
        capture
            .stdout_str()
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(|name| Ok(ArchiveName::parse(name)?))
            .collect()
    }

    fn list_archive(
        &self,
        archive: &ArchiveName,
        sink: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()> {
        let cmd = Exec::cmd("borg")
            .arg("list")
            .arg("--format")
            .arg("{mtime} {path}{NL}")
            .arg(self.archive_locator(archive))
            .stdin(NullFile)
            .stdout(Redirection::Pipe);
        trace!("Executing command: {:?}", cmd);
        let mut popen = cmd
            .popen()
            .with_context(|| eyre!("Failed to run borg list for archive {}", archive))?;
        let stdout = popen
            .stdout
            .take()
            .ok_or_else(|| eyre!("borg list produced no stdout handle"))?;
        let stream = || -> Result<()> {
            for line in BufReader::new(stdout).lines() {
                let line = line.context("Failed to read borg list output")?;
                sink(&line)?;
            }
            Ok(())
        };
        if let Err(err) = stream() {
            let _ = popen.kill();
            let _ = popen.wait();
            return Err(err);
        }
        let status = popen
            .wait()
            .context("Failed to wait for borg list to finish")?;
        if !status.success() {
            return Err(Self::failure("borg list", status).into());
        }
        Ok(())
    }
}

impl Extractor for Borg {
    fn extract(&self, strip_components: usize, archive: &ArchiveName, path: &str) -> Result<()> {
        let cmd = Exec::cmd("borg")
            .arg("extract")
            .arg("--strip-components")
            .arg(strip_components.to_string())
            .arg(self.archive_locator(archive))
            .arg(path)
            .stdin(NullFile);
        trace!("Executing command: {:?}", cmd);
        let exit_status = cmd
            .join()
            .with_context(|| eyre!("Failed to run borg extract for archive {}", archive))?;
        if !exit_status.success() {
            return Err(Self::failure("borg extract", exit_status).into());
        }
        Ok(())
    }
}
