use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::Serialize;
use serde_json::{json, Map, Value};

pub mod archive;
pub mod credential;
pub mod destination;
pub mod ssh_info;

pub use archive::Archive;
pub use destination::Destination;
pub use ssh_info::SshInfo;

use crate::error::{BackupError, BackupResult};
use crate::helper::{self, convert_bool, convert_int, convert_string, not_none};

/// Values given on the command line. They win over the configuration file.
/// Passwords are already obfuscated tokens.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub force: Option<bool>,
    pub password: Option<String>,
    pub password_ssh: Option<String>,
}

#[derive(Debug)]
pub struct Configuration {
    pub archives: Vec<Archive>,
    /// Effective force flag, command line included.
    pub force: bool,
    pub require_ssh: bool,
    pub ssh: Option<SshInfo>,
    file_force: bool,
}

impl Configuration {
    const SUPPORTED_KEYS: [&'static str; 3] = ["force", "ssh", "backup"];

    pub fn load<P: AsRef<Path>>(filename: P, overrides: &Overrides) -> BackupResult<Configuration> {
        let filename = filename.as_ref();
        info!("reading configuration from {}", filename.display());
        let text = fs::read_to_string(filename)?;
        let data: Value = serde_json::from_str(&text)?;
        Configuration::from_json(&data, overrides)
    }

    pub fn from_json(data: &Value, overrides: &Overrides) -> BackupResult<Configuration> {
        let data = match data.as_object() {
            Some(object) => object,
            None => return Err(BackupError::config("configuration root must be a JSON object")),
        };

        let mut configuration = Configuration {
            archives: Vec::new(),
            force: false,
            require_ssh: false,
            ssh: None,
            file_force: false,
        };

        for (key, value) in data {
            match key.as_str() {
                "force" => {
                    configuration.file_force = convert_bool(key, Some(value))?.unwrap_or(false);
                }
                "ssh" => {
                    configuration.ssh = Some(Configuration::parse_ssh(value)?);
                }
                "backup" => {
                    let backups = match value.as_array() {
                        Some(backups) => backups,
                        None => return Err(BackupError::config("Key 'backup' must be a list.")),
                    };
                    for (index, backup) in backups.iter().enumerate() {
                        configuration.parse_backup(&format!("backup[{}]", index), backup, overrides)?;
                    }
                }
                _ => {
                    return Err(BackupError::config(format!(
                        "JSON key '{}' is not supported. Supported keys: {:?}",
                        key,
                        Configuration::SUPPORTED_KEYS
                    )))
                }
            }
        }

        configuration.force = overrides.force.unwrap_or(configuration.file_force);
        info!("Force run: {}", configuration.force);

        if let (Some(ssh), Some(token)) = (configuration.ssh.as_mut(), &overrides.password_ssh) {
            debug!("SSH password was set from the command line");
            ssh.set_password(Some(token.clone()));
        }

        configuration.require_ssh = configuration
            .archives
            .iter()
            .any(Archive::has_remote_destination);
        if configuration.require_ssh && configuration.ssh.is_none() {
            return Err(BackupError::config(
                "Current configuration requires a SSH connection, but no SSH info was provided.",
            ));
        }

        Ok(configuration)
    }

    fn parse_password(key: &str, value: Option<&Value>) -> BackupResult<Option<String>> {
        match convert_string(key, value)? {
            Some(password) => Ok(Some(credential::handle_password(password)?)),
            None => Ok(None),
        }
    }

    fn parse_ssh(value: &Value) -> BackupResult<SshInfo> {
        let port = not_none("ssh.port", convert_int("ssh.port", value.get("port"))?)?;
        let port = u16::try_from(port)
            .map_err(|_| BackupError::config(format!("Key 'ssh.port': invalid port {}", port)))?;
        let mut ssh = SshInfo::new(
            not_none("ssh.user", convert_string("ssh.user", value.get("user"))?)?,
            not_none("ssh.ip", convert_string("ssh.ip", value.get("ip"))?)?,
            port,
        );
        ssh.set_password(Configuration::parse_password(
            "ssh.password",
            value.get("password"),
        )?);
        Ok(ssh)
    }

    fn parse_backup(&mut self, parent: &str, backup: &Value, overrides: &Overrides) -> BackupResult<()> {
        let name_key = format!("{}.name", parent);
        let path_key = format!("{}.path", parent);
        let password_key = format!("{}.password", parent);

        let password = match &overrides.password {
            Some(token) => Some(token.clone()),
            None => Configuration::parse_password(&password_key, backup.get("password"))?,
        };
        let candidate = Archive::new(
            not_none(&name_key, convert_string(&name_key, backup.get("name"))?)?,
            not_none(&path_key, convert_string(&path_key, backup.get("path"))?)?,
            password,
        )?;

        let index = match self.archives.iter().position(|archive| *archive == candidate) {
            Some(index) => {
                debug!("{} merged into an earlier entry: {}", parent, candidate);
                index
            }
            None => {
                self.archives.push(candidate);
                self.archives.len() - 1
            }
        };

        let destination_key = format!("{}.destination", parent);
        let destinations = not_none(&destination_key, backup.get("destination"))?;
        let destinations = match destinations.as_array() {
            Some(destinations) => destinations,
            None => {
                return Err(BackupError::config(format!(
                    "Key '{}' must be a list.",
                    destination_key
                )))
            }
        };

        for destination in destinations {
            let field = |name: &str| format!("{}.{}", destination_key, name);
            let remote = not_none(
                &field("remote"),
                convert_bool(&field("remote"), destination.get("remote"))?,
            )?;
            let last_run = match convert_string(&field("last_run"), destination.get("last_run"))? {
                Some(timestamp) => helper::parse_timestamp(&field("last_run"), &timestamp)?,
                None => helper::default_last_run(),
            };
            self.archives[index].add_destination(
                not_none(
                    &field("label"),
                    convert_string(&field("label"), destination.get("label"))?,
                )?,
                not_none(
                    &field("path"),
                    convert_string(&field("path"), destination.get("path"))?,
                )?,
                remote,
                not_none(
                    &field("versions"),
                    convert_int(&field("versions"), destination.get("versions"))?,
                )?,
                last_run,
            )?;
        }

        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut data = Map::new();
        data.insert(String::from("force"), Value::Bool(self.file_force));
        if let Some(ssh) = &self.ssh {
            data.insert(
                String::from("ssh"),
                json!({
                    "user": ssh.user,
                    "password": ssh.password_token(),
                    "ip": ssh.ip,
                    "port": ssh.port,
                }),
            );
        }
        let backups = self
            .archives
            .iter()
            .map(|archive| {
                let destinations = archive
                    .destinations()
                    .iter()
                    .map(|destination| {
                        json!({
                            "label": destination.label(),
                            "path": destination.path().to_string_lossy(),
                            "remote": destination.is_remote(),
                            "versions": destination.versions(),
                            "last_run": helper::format_timestamp(&destination.last_run()),
                        })
                    })
                    .collect::<Vec<Value>>();
                json!({
                    "name": archive.name(),
                    "path": archive.path().to_string_lossy(),
                    "password": archive.password_token(),
                    "destination": destinations,
                })
            })
            .collect::<Vec<Value>>();
        data.insert(String::from("backup"), Value::Array(backups));
        Value::Object(data)
    }

    /// Writes the configuration back, tab-indented, with the current
    /// `last_run` values.
    pub fn save<P: AsRef<Path>>(&self, filename: P) -> BackupResult<()> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.to_json().serialize(&mut serializer)?;
        buffer.push(b'\n');
        fs::write(filename.as_ref(), buffer)?;
        info!("configuration written to {}", filename.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::credential::{obfuscate, reveal};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn base_json() -> Value {
        json!({
            "force": "true",
            "ssh": {
                "user": "dummy",
                "password": "enc(password_dummy)",
                "ip": "0.0.0.0",
                "port": "22"
            },
            "backup": [{
                "name": "backup.zip",
                "path": "/dummy/path",
                "password": "enc(archive_password)",
                "destination": [{
                    "label": "Prefer to not",
                    "path": "/not/again",
                    "remote": true,
                    "versions": 1,
                    "last_run": null
                }]
            }]
        })
    }

    #[test]
    fn test_from_json() {
        let configuration = Configuration::from_json(&base_json(), &Overrides::default()).unwrap();
        assert!(configuration.force);
        assert!(configuration.require_ssh);

        let ssh = configuration.ssh.as_ref().unwrap();
        assert_eq!(ssh.user, "dummy");
        assert_eq!(ssh.ip, "0.0.0.0");
        assert_eq!(ssh.port, 22);
        assert_eq!(ssh.password().unwrap().as_deref(), Some("password_dummy"));

        assert_eq!(configuration.archives.len(), 1);
        let archive = &configuration.archives[0];
        assert_eq!(archive.name(), "backup.zip");
        assert_eq!(archive.path(), Path::new("/dummy/path"));
        assert_eq!(archive.password().unwrap().as_deref(), Some("archive_password"));

        let destination = &archive.destinations()[0];
        assert_eq!(destination.label(), "Prefer to not");
        assert_eq!(destination.path(), Path::new("/not/again"));
        assert!(destination.is_remote());
        assert_eq!(destination.versions(), 1);
        assert_eq!(destination.last_run(), helper::default_last_run());
    }

    #[test]
    fn test_two_destinations_with_loose_types() {
        let mut data = base_json();
        data["backup"][0]["destination"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "label": "Another Dest",
                "path": "/here/we/go",
                "remote": "false",
                "versions": "1",
                "last_run": "2020-10-20T10:00:00"
            }));
        let configuration = Configuration::from_json(&data, &Overrides::default()).unwrap();
        let destinations = configuration.archives[0].destinations();
        assert_eq!(destinations.len(), 2);
        assert_eq!(destinations[1].label(), "Another Dest");
        assert!(!destinations[1].is_remote());
        assert_eq!(
            destinations[1].last_run(),
            NaiveDate::from_ymd_opt(2020, 10, 20)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_duplicate_backups_are_merged() {
        let mut data = base_json();
        data["backup"].as_array_mut().unwrap().push(json!({
            "name": "backup.zip",
            "path": "/dummy/path/",
            "password": "enc(archive_password)",
            "destination": [
                {"label": "Prefer to not", "path": "/not/again", "remote": true, "versions": 4},
                {"label": "Local", "path": "/local/copy", "remote": false, "versions": 2}
            ]
        }));
        data["backup"].as_array_mut().unwrap().push(json!({
            "name": "backup2.zip",
            "path": "/dummy/path2",
            "destination": []
        }));
        let configuration = Configuration::from_json(&data, &Overrides::default()).unwrap();
        assert_eq!(configuration.archives.len(), 2);
        let destinations = configuration.archives[0].destinations();
        assert_eq!(destinations.len(), 2);
        assert_eq!(destinations[0].versions(), 4);
        assert_eq!(destinations[1].label(), "Local");
    }

    #[test]
    fn test_label_conflict_fails() {
        let mut data = base_json();
        data["backup"][0]["destination"]
            .as_array_mut()
            .unwrap()
            .push(json!({"label": "Renamed", "path": "/not/again", "remote": true, "versions": 1}));
        let err = Configuration::from_json(&data, &Overrides::default()).unwrap_err();
        assert!(matches!(err, BackupError::LabelConflict { .. }));
    }

    #[test]
    fn test_invalid_documents() {
        let mut unsupported = base_json();
        unsupported["extra"] = json!(1);
        assert!(Configuration::from_json(&unsupported, &Overrides::default()).is_err());

        let mut missing_name = base_json();
        missing_name["backup"][0]["name"] = Value::Null;
        let err = Configuration::from_json(&missing_name, &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("backup[0].name"));

        let mut no_ssh = base_json();
        no_ssh.as_object_mut().unwrap().remove("ssh");
        assert!(Configuration::from_json(&no_ssh, &Overrides::default()).is_err());

        let mut bad_password = base_json();
        bad_password["backup"][0]["password"] = json!("plain text");
        assert!(matches!(
            Configuration::from_json(&bad_password, &Overrides::default()),
            Err(BackupError::Decode(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let overrides = Overrides {
            force: Some(false),
            password: Some(obfuscate("from_cli")),
            password_ssh: Some(obfuscate("ssh_cli")),
        };
        let configuration = Configuration::from_json(&base_json(), &overrides).unwrap();
        assert!(!configuration.force);
        assert_eq!(
            configuration.archives[0].password().unwrap().as_deref(),
            Some("from_cli")
        );
        assert_eq!(
            configuration.ssh.as_ref().unwrap().password().unwrap().as_deref(),
            Some("ssh_cli")
        );
        // the file keeps its own force value
        assert_eq!(configuration.to_json()["force"], json!(true));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("config.json");

        let mut configuration =
            Configuration::from_json(&base_json(), &Overrides::default()).unwrap();
        let last_run = NaiveDate::from_ymd_opt(2021, 3, 4)
            .unwrap()
            .and_hms_micro_opt(5, 6, 7, 890)
            .unwrap();
        configuration.archives[0].commit_last_run(last_run);
        configuration.save(&file).unwrap();

        let text = fs::read_to_string(&file).unwrap();
        assert!(text.contains("\t\"backup\""));
        assert!(text.contains("2021-03-04T05:06:07.000890"));

        let reloaded = Configuration::load(&file, &Overrides::default()).unwrap();
        assert_eq!(reloaded.archives[0].destinations()[0].last_run(), last_run);
        assert_eq!(
            reveal(reloaded.archives[0].password_token().unwrap()).unwrap(),
            "archive_password"
        );
    }
}
