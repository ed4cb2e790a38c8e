use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::debug;
use regex::Regex;

use crate::configuration::{credential, Destination};
use crate::error::{BackupError, BackupResult};
use crate::helper;

/// Identity of a backup job. Fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ArchiveKey {
    name: String,
    path: PathBuf,
    password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Archive {
    key: ArchiveKey,
    base_name: String,
    artifact_pattern: Regex,
    destinations: Vec<Destination>,
    archive_path: Option<PathBuf>,
}

impl Archive {
    /// `password` is an obfuscated token, see [`credential::handle_password`].
    pub fn new<S: Into<String>, P: AsRef<Path>>(
        name: S,
        path: P,
        password: Option<String>,
    ) -> BackupResult<Archive> {
        lazy_static! {
            static ref REGEX_ARCHIVE_NAME: Regex = Regex::new(r"^(.+)\.zip$").unwrap();
        }
        let name = name.into();
        let base_name = match REGEX_ARCHIVE_NAME.captures(&name) {
            Some(captures) => captures[1].to_string(),
            None => {
                return Err(BackupError::config(format!(
                    "Archive name '{}' doesn't match the pattern: <filename>.zip",
                    name
                )))
            }
        };
        let artifact_pattern = Regex::new(&format!(
            r"^{}_\d{{8}}_\d{{6}}\.zip$",
            regex::escape(&base_name)
        ))
        .map_err(|err| BackupError::config(err.to_string()))?;

        let archive = Archive {
            key: ArchiveKey {
                name,
                path: helper::absolute_path(path)?,
                password,
            },
            base_name,
            artifact_pattern,
            destinations: Vec::new(),
            archive_path: None,
        };
        debug!("Initialized Archive: {}", archive);
        Ok(archive)
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Name without the `.zip` extension.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn path(&self) -> &Path {
        &self.key.path
    }

    pub fn password_token(&self) -> Option<&str> {
        self.key.password.as_deref()
    }

    pub fn password(&self) -> BackupResult<Option<String>> {
        match &self.key.password {
            Some(token) => Ok(Some(credential::reveal(token)?)),
            None => Ok(None),
        }
    }

    /// Fixes the local artifact path for this archive as
    /// `<working_directory>/<base>_<YYYYMMDD_HHMMSS>.zip`.
    ///
    /// Only the first call after [`Archive::reset_archive_path`] computes the
    /// path; later calls return the stored one whatever timestamp they pass.
    pub fn init_archive_path(
        &mut self,
        working_directory: &Path,
        start_time: NaiveDateTime,
    ) -> &Path {
        let base_name = &self.base_name;
        self.archive_path.get_or_insert_with(|| {
            working_directory.join(format!(
                "{}_{}.zip",
                base_name,
                start_time.format("%Y%m%d_%H%M%S")
            ))
        })
    }

    /// Forgets the artifact path of the previous run.
    pub fn reset_archive_path(&mut self) {
        self.archive_path = None;
    }

    pub fn archive_path(&self) -> Option<&Path> {
        self.archive_path.as_deref()
    }

    /// True for file names produced by this archive (`<base>_YYYYMMDD_HHMMSS.zip`).
    pub fn is_artifact_name(&self, file_name: &str) -> bool {
        self.artifact_pattern.is_match(file_name)
    }

    /// Destinations in insertion order.
    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Records a completed run on every destination.
    pub fn commit_last_run(&mut self, last_run: NaiveDateTime) {
        for destination in &mut self.destinations {
            destination.set_last_run(last_run);
        }
    }

    pub fn add_destination<S: Into<String>, P: AsRef<Path>>(
        &mut self,
        label: S,
        path: P,
        remote: bool,
        versions: i64,
        last_run: NaiveDateTime,
    ) -> BackupResult<()> {
        let destination = Destination::new(label, path, remote, versions, last_run)?;
        self.insert_destination(destination)
    }

    /// Appends `destination`, or merges it into the slot with the same
    /// identity if there already is one.
    pub fn insert_destination(&mut self, destination: Destination) -> BackupResult<()> {
        match self
            .destinations
            .iter_mut()
            .find(|existing| existing.key() == destination.key())
        {
            Some(existing) => existing.merge(&destination),
            None => {
                self.destinations.push(destination);
                Ok(())
            }
        }
    }

    pub fn has_remote_destination(&self) -> bool {
        self.destinations.iter().any(Destination::is_remote)
    }

    pub fn display(&self, indent: &str) -> String {
        let mut lines = vec![
            format!("Archive: {}", self.name()),
            format!("Path: {}", self.path().display()),
        ];
        if self.destinations.len() <= 1 {
            let destination = self
                .destinations
                .first()
                .map(Destination::display)
                .unwrap_or_default();
            lines.push(format!("Destination: {}", destination));
        } else {
            lines.push(String::from("Destinations:"));
            for destination in &self.destinations {
                lines.push(format!("\t{}", destination.display()));
            }
        }
        lines
            .iter()
            .map(|line| format!("{}{}", indent, line))
            .collect::<Vec<String>>()
            .join("\n")
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.path().display())
    }
}

impl PartialEq for Archive {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Archive {}
