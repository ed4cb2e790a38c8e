use std::env;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Timelike};
use serde_json::Value;

use crate::error::{BackupError, BackupResult};

/// Marker used for destinations that never ran.
pub fn default_last_run() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1900, 1, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

/// Current local time, truncated to microseconds so it survives a round
/// trip through the configuration file.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(6)
}

pub fn system_time_to_local(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

pub fn parse_timestamp(key: &str, value: &str) -> BackupResult<NaiveDateTime> {
    let value = value.trim();
    if let Ok(timestamp) = value.parse::<NaiveDateTime>() {
        return Ok(timestamp);
    }
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(timestamp);
    }
    match value.parse::<NaiveDate>() {
        Ok(date) => Ok(date.and_time(NaiveTime::MIN)),
        Err(_) => Err(BackupError::config(format!(
            "Key '{}' holds an invalid timestamp: '{}'",
            key, value
        ))),
    }
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    if timestamp.nanosecond() == 0 {
        timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

pub fn not_none<T>(key: &str, value: Option<T>) -> BackupResult<T> {
    value.ok_or_else(|| BackupError::config(format!("Key '{}' cannot be None.", key)))
}

fn conversion_error(key: &str, value: &Value, expected: &str) -> BackupError {
    BackupError::config(format!(
        "Key '{}': cannot convert '{}' to {}",
        key, value, expected
    ))
}

pub fn convert_bool(key: &str, value: Option<&Value>) -> BackupResult<Option<bool>> {
    let value = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    let text = match value {
        Value::Bool(flag) => return Ok(Some(*flag)),
        Value::String(text) => text.to_lowercase(),
        Value::Number(number) => number.to_string(),
        _ => return Err(conversion_error(key, value, "bool")),
    };
    match text.trim() {
        "1" | "yes" | "true" => Ok(Some(true)),
        "0" | "no" | "false" => Ok(Some(false)),
        _ => Err(conversion_error(key, value, "bool")),
    }
}

pub fn convert_int(key: &str, value: Option<&Value>) -> BackupResult<Option<i64>> {
    let value = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(value) => value,
    };
    let number = match value {
        Value::Number(number) => match number.as_i64() {
            Some(int) => return Ok(Some(int)),
            None => number.as_f64(),
        },
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(number) if number.is_finite() => Ok(Some(number.trunc() as i64)),
        _ => Err(conversion_error(key, value, "int")),
    }
}

pub fn convert_string(key: &str, value: Option<&Value>) -> BackupResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(value) => Err(conversion_error(key, value, "string")),
    }
}

/// Removes `.` and `..` components and trailing separators without touching
/// the filesystem.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            Component::Normal(name) => normalized.push(name),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

pub fn absolute_path<P: AsRef<Path>>(path: P) -> BackupResult<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() {
        Ok(normalize_path(path))
    } else {
        Ok(normalize_path(env::current_dir()?.join(path)))
    }
}

/// Wraps `value` in single quotes for a POSIX shell.
pub fn shell_quote<S: AsRef<str>>(value: S) -> String {
    format!("'{}'", value.as_ref().replace('\'', r"'\''"))
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}
