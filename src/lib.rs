//! Scheduled, versioned zip backups of local directories.
//!
//! [`configuration`] turns the JSON file into [`configuration::Archive`]s,
//! [`backup::BackupExecutor`] runs them and [`connector`] moves the
//! resulting files to local or SSH destinations.

#[macro_use]
extern crate lazy_static;

pub mod backup;
pub mod configuration;
pub mod connector;
pub mod error;
pub mod formatter;
pub mod helper;

pub use error::{BackupError, BackupResult};
