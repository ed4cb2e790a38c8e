use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use log::debug;

use crate::error::{BackupError, BackupResult};
use crate::helper;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Directory,
    SSH,
}

impl Kind {
    pub fn from_remote(remote: bool) -> Kind {
        if remote {
            Kind::SSH
        } else {
            Kind::Directory
        }
    }
}

/// Identity of a destination slot. Fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    path: PathBuf,
    kind: Kind,
}

#[derive(Clone, Debug)]
pub struct Destination {
    key: SlotKey,
    label: String,
    versions: u32,
    last_run: NaiveDateTime,
}

impl Destination {
    pub fn new<S: Into<String>, P: AsRef<Path>>(
        label: S,
        path: P,
        remote: bool,
        versions: i64,
        last_run: NaiveDateTime,
    ) -> BackupResult<Destination> {
        let label = label.into();
        if versions <= 0 {
            return Err(BackupError::config(format!(
                "[{}] Versions number must be at least 1.",
                label
            )));
        }
        let versions = u32::try_from(versions).map_err(|_| {
            BackupError::config(format!("[{}] Versions number {} is too large.", label, versions))
        })?;
        let path = if remote {
            helper::normalize_path(path)
        } else {
            helper::absolute_path(path)?
        };

        let destination = Destination {
            key: SlotKey {
                path,
                kind: Kind::from_remote(remote),
            },
            label,
            versions,
            last_run,
        };
        debug!("Initialized Archive Destination: {}", destination.display());
        Ok(destination)
    }

    pub fn key(&self) -> &SlotKey {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &Path {
        &self.key.path
    }

    pub fn kind(&self) -> Kind {
        self.key.kind
    }

    pub fn is_remote(&self) -> bool {
        self.key.kind == Kind::SSH
    }

    pub fn versions(&self) -> u32 {
        self.versions
    }

    pub fn last_run(&self) -> NaiveDateTime {
        self.last_run
    }

    pub fn set_last_run(&mut self, last_run: NaiveDateTime) {
        self.last_run = last_run;
    }

    /// Folds a duplicate entry for the same slot into this one.
    ///
    /// Labels must agree. The result keeps the larger retention count and the
    /// earlier last run, so the merged slot is eligible whenever either
    /// entry would have been.
    pub fn merge(&mut self, other: &Destination) -> BackupResult<()> {
        if self.key != other.key {
            return Err(BackupError::config(format!(
                "cannot merge destination '{}' into '{}': different slots",
                other.label, self.label
            )));
        }
        if self.label != other.label {
            return Err(BackupError::LabelConflict {
                existing: self.label.clone(),
                new: other.label.clone(),
            });
        }
        self.versions = self.versions.max(other.versions);
        self.last_run = self.last_run.min(other.last_run);
        Ok(())
    }

    pub fn display(&self) -> String {
        format!(
            "[{}{}] {} - versions: {}",
            self.label,
            if self.is_remote() { " @ Remote" } else { "" },
            self.path().display(),
            self.versions
        )
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Destination {}
