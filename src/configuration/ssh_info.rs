use std::fmt;

use log::debug;

use crate::configuration::credential;
use crate::error::BackupResult;

#[derive(Clone, Debug)]
pub struct SshInfo {
    pub user: String,
    pub ip: String,
    pub port: u16,
    password: Option<String>,
}

impl SshInfo {
    pub fn new<S: Into<String>, T: Into<String>>(user: S, ip: T, port: u16) -> SshInfo {
        let ssh_info = SshInfo {
            user: user.into(),
            ip: ip.into(),
            port,
            password: None,
        };
        debug!("Initialized SshInfo: {}", ssh_info);
        ssh_info
    }

    /// Expects an obfuscated token.
    pub fn set_password(&mut self, token: Option<String>) {
        self.password = token;
    }

    pub fn password_token(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn password(&self) -> BackupResult<Option<String>> {
        match &self.password {
            Some(token) => Ok(Some(credential::reveal(token)?)),
            None => Ok(None),
        }
    }

    pub fn address(&self) -> (&str, u16) {
        (self.ip.as_str(), self.port)
    }
}

impl fmt::Display for SshInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.ip, self.port)
    }
}
