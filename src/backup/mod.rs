use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};
use zip::write::FileOptions;
use zip::{AesMode, CompressionMethod, ZipWriter};

use crate::configuration::destination::Kind as DestinationKind;
use crate::configuration::{Archive, Destination};
use crate::connector::{Connector, LocalConnector};
use crate::error::{BackupError, BackupResult};
use crate::formatter::format_size;
use crate::helper;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// No destination had changes to receive; nothing was touched.
    Skipped,
    Completed,
}

/// The locally built zip file. Removed when dropped, whatever happened to
/// the steps in between.
struct LocalArtifact {
    path: PathBuf,
}

impl LocalArtifact {
    fn new(path: &Path) -> LocalArtifact {
        LocalArtifact {
            path: path.to_path_buf(),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalArtifact {
    fn drop(&mut self) {
        debug!("Deleting local archive");
        if !self.path.is_file() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(_) => info!("Local archive deleted: {}", self.path.display()),
            Err(err) => warn!(
                "local archive '{}' could not be removed => {}",
                self.path.display(),
                err
            ),
        }
    }
}

pub struct BackupExecutor {
    force: bool,
    working_directory: PathBuf,
    local: LocalConnector,
    remote: Option<Box<dyn Connector>>,
}

impl BackupExecutor {
    /// `remote` is the single connector shared by every remote destination
    /// of the run. It may be `None` when no destination is remote.
    pub fn new(
        force: bool,
        working_directory: PathBuf,
        remote: Option<Box<dyn Connector>>,
    ) -> BackupExecutor {
        BackupExecutor {
            force,
            working_directory,
            local: LocalConnector,
            remote,
        }
    }

    /// Runs every archive in order. A failing archive is logged and the run
    /// moves on to the next one; the failures are reported at the end.
    pub fn execute(&self, archives: &mut [Archive]) -> BackupResult<()> {
        fs::create_dir_all(&self.working_directory)?;

        let total = archives.len();
        let mut failed = 0;
        for archive in archives.iter_mut() {
            let start_time = helper::now();
            match self.execute_archive(archive, start_time) {
                Ok(Outcome::Completed) => info!("[{}] backup completed", archive.name()),
                Ok(Outcome::Skipped) => info!("[{}] nothing changed, skipped", archive.name()),
                Err(err) => {
                    error!("[{}] backup failed: {}", archive.name(), err);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(BackupError::RunFailed { failed, total });
        }
        Ok(())
    }

    /// Eligibility, build, distribution and retention for one archive.
    ///
    /// `last_run` of every destination is set to `start_time` only when all
    /// steps succeeded.
    pub fn execute_archive(
        &self,
        archive: &mut Archive,
        start_time: NaiveDateTime,
    ) -> BackupResult<Outcome> {
        info!("Execution started for\n{}", archive.display("\t"));
        let eligible = self.eligible_destinations(archive)?;
        let allow_execution = eligible.contains(&true);
        debug!("Allow execution: {}", allow_execution);
        if !allow_execution {
            return Ok(Outcome::Skipped);
        }

        archive.reset_archive_path();
        let artifact =
            LocalArtifact::new(archive.init_archive_path(&self.working_directory, start_time));
        self.build_archive(archive, artifact.path())?;
        self.copy_archive(archive, artifact.path(), &eligible)?;
        self.clean_archives(archive)?;
        archive.commit_last_run(start_time);
        Ok(Outcome::Completed)
    }

    /// Metadata of the entry, following symlinks. `None` for a dangling link.
    fn source_metadata(entry: &DirEntry) -> BackupResult<Option<Metadata>> {
        if !entry.path_is_symlink() {
            return Ok(Some(entry.metadata()?));
        }
        match fs::metadata(entry.path()) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("skipping dangling link '{}'", entry.path().display());
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn connector_for(&self, destination: &Destination) -> BackupResult<&dyn Connector> {
        match destination.kind() {
            DestinationKind::Directory => Ok(&self.local),
            DestinationKind::SSH => self.remote.as_deref().ok_or_else(|| {
                BackupError::config(format!(
                    "[{}] remote destination but no SSH connection is available",
                    destination.label()
                ))
            }),
        }
    }

    /// One flag per destination: did anything under the source change at or
    /// after its last run. The walk stops once every destination qualifies.
    fn eligible_destinations(&self, archive: &Archive) -> BackupResult<Vec<bool>> {
        debug!("Getting eligible destinations");
        let destinations = archive.destinations();
        if self.force {
            return Ok(vec![true; destinations.len()]);
        }

        let mut eligible = vec![false; destinations.len()];
        if destinations.is_empty() {
            return Ok(eligible);
        }

        for entry in WalkDir::new(archive.path()).min_depth(1) {
            let entry = entry?;
            let metadata = match Self::source_metadata(&entry)? {
                Some(metadata) => metadata,
                None => continue,
            };
            let modified = helper::system_time_to_local(metadata.modified()?);
            for (index, destination) in destinations.iter().enumerate() {
                if !eligible[index] && modified >= destination.last_run() {
                    debug!(
                        "[{}] eligible: '{}' changed at {}",
                        destination.label(),
                        entry.path().display(),
                        modified
                    );
                    eligible[index] = true;
                }
            }
            if eligible.iter().all(|flag| *flag) {
                break;
            }
        }

        Ok(eligible)
    }

    fn build_archive(&self, archive: &Archive, archive_path: &Path) -> BackupResult<()> {
        info!("Archiving local data to: {}", archive_path.display());
        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let password = archive.password()?;
        let directory_options: FileOptions<'_, ()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut file_options = directory_options.clone();
        if let Some(password) = password.as_deref() {
            debug!("Setting up password");
            file_options = file_options.with_aes_encryption(AesMode::Aes256, password);
        }

        let mut zip = ZipWriter::new(File::create(archive_path)?);
        for entry in WalkDir::new(archive.path()).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let relative = entry
                .path()
                .strip_prefix(archive.path())
                .map_err(|err| BackupError::config(err.to_string()))?;
            let name = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if entry.file_type().is_dir() {
                debug!("Writing Dir : {}", name);
                zip.add_directory(name, directory_options.clone())?;
                continue;
            }
            match Self::source_metadata(&entry)? {
                Some(metadata) if metadata.is_file() => {
                    debug!("Writing File: {}", name);
                    let large_file = metadata.len() >= u64::from(u32::MAX);
                    zip.start_file(name, file_options.clone().large_file(large_file))?;
                    // follows links
                    let mut source = File::open(entry.path())?;
                    io::copy(&mut source, &mut zip)?;
                }
                Some(_) => warn!("skipping '{}': not a regular file", entry.path().display()),
                None => {}
            }
        }
        zip.finish()?;

        let size = fs::metadata(archive_path)?.len();
        info!(
            "Archive was created: {} ({})",
            archive_path.display(),
            format_size(size, 2)
        );
        Ok(())
    }

    fn copy_archive(
        &self,
        archive: &Archive,
        archive_path: &Path,
        eligible: &[bool],
    ) -> BackupResult<()> {
        debug!("Copying zip file");
        let targets = archive
            .destinations()
            .iter()
            .zip(eligible)
            .filter_map(|(destination, &flag)| flag.then_some(destination));
        for destination in targets {
            info!(
                "[{}] {} '{}' to '{}'",
                destination.label(),
                if destination.is_remote() {
                    "Uploading"
                } else {
                    "Copying"
                },
                archive_path.display(),
                destination.path().display()
            );
            self.connector_for(destination)?
                .copy_out(archive_path, destination.path())?;
        }
        Ok(())
    }

    /// Keeps the `versions` newest artifacts of `archive` at every
    /// destination and deletes the rest. Returns the deleted paths.
    fn clean_archives(&self, archive: &Archive) -> BackupResult<Vec<PathBuf>> {
        info!("Cleaning old archives");
        let mut removed = Vec::new();
        for destination in archive.destinations() {
            let connector = self.connector_for(destination)?;
            let mut files: Vec<String> = connector
                .list_files(destination.path())?
                .into_iter()
                .filter(|name| archive.is_artifact_name(name))
                .collect();
            // the timestamp suffix sorts newest first
            files.sort_by(|a, b| b.cmp(a));
            debug!("[{}] Files found: {:?}", destination.label(), files);

            for file in files.iter().skip(destination.versions() as usize) {
                let path = destination.path().join(file);
                connector.remove_file(&path)?;
                info!("[{}] File removed: {}", destination.label(), file);
                removed.push(path);
            }
        }
        Ok(removed)
    }
}
