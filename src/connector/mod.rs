//! Copy, list and delete operations against a destination directory.
//!
//! [`LocalConnector`] works on the local filesystem, [`RemoteConnector`]
//! over one SSH session that is opened once per run and shared by every
//! remote destination.

use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::{BackupError, BackupResult};

mod ssh;

pub use ssh::RemoteConnector;

pub trait Connector {
    /// Copies `local_file` into the directory `target_dir`, keeping its file name.
    fn copy_out(&self, local_file: &Path, target_dir: &Path) -> BackupResult<()>;

    /// Names of the regular files directly inside `dir`.
    fn list_files(&self, dir: &Path) -> BackupResult<Vec<String>>;

    fn remove_file(&self, path: &Path) -> BackupResult<()>;

    /// Runs a shell command and returns its standard output. A non-zero exit
    /// status is an error carrying the command's standard error.
    fn run_command(&self, command: &str) -> BackupResult<String>;
}

pub(crate) fn target_path(local_file: &Path, target_dir: &Path) -> BackupResult<PathBuf> {
    match local_file.file_name() {
        Some(file_name) => Ok(target_dir.join(file_name)),
        None => Err(BackupError::config(format!(
            "'{}' has no file name",
            local_file.display()
        ))),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LocalConnector;

impl Connector for LocalConnector {
    fn copy_out(&self, local_file: &Path, target_dir: &Path) -> BackupResult<()> {
        fs::create_dir_all(target_dir)?;
        let target = target_path(local_file, target_dir)?;
        fs::copy(local_file, &target)?;

        let metadata = fs::metadata(local_file)?;
        let times = FileTimes::new()
            .set_accessed(metadata.accessed()?)
            .set_modified(metadata.modified()?);
        File::options().write(true).open(&target)?.set_times(times)?;
        debug!("'{}' copied to '{}'", local_file.display(), target.display());
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> BackupResult<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                files.push(name);
            }
        }
        Ok(files)
    }

    fn remove_file(&self, path: &Path) -> BackupResult<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn run_command(&self, command: &str) -> BackupResult<String> {
        debug!("Executing local command: {}", command);
        let output = Command::new("sh").arg("-c").arg(command).output()?;
        if !output.status.success() {
            return Err(BackupError::Command {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
