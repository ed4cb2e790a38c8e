//! Error types shared by configuration loading, the connectors and the
//! backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Invalid configuration or a value object that failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two destinations share a slot (path + remote) but carry different labels.
    #[error("Label conflict between '{existing}' and '{new}'")]
    LabelConflict { existing: String, new: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("unable to write archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// A command exited with a non-zero status.
    #[error("command '{command}' failed with exit status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    /// An obfuscated password token could not be revealed.
    #[error("unable to decode password: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{failed} of {total} archive(s) failed")]
    RunFailed { failed: usize, total: usize },
}

impl BackupError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::LabelConflict { .. })
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
