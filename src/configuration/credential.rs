//! Reversible obfuscation of stored passwords.
//!
//! Tokens are plain base64 of the UTF-8 password. Anyone who can read the
//! configuration file can recover the password; the only promise is that it
//! is not stored human-readable.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;

use crate::error::{BackupError, BackupResult};

pub fn obfuscate<S: AsRef<str>>(plaintext: S) -> String {
    STANDARD.encode(plaintext.as_ref().as_bytes())
}

pub fn reveal<S: AsRef<str>>(token: S) -> BackupResult<String> {
    let bytes = STANDARD
        .decode(token.as_ref().trim())
        .map_err(|err| BackupError::Decode(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| BackupError::Decode(err.to_string()))
}

/// Accepts a password as written in the configuration or on the command line.
///
/// `enc(secret)` and `encrypt(secret)` are obfuscated here; any other value
/// must already be a token, which is checked by revealing it.
pub fn handle_password<S: AsRef<str>>(value: S) -> BackupResult<String> {
    lazy_static! {
        static ref REGEX_PLAIN_PASSWORD: Regex = Regex::new(r"^enc(?:rypt)?\((.+)\)$").unwrap();
    }
    let value = value.as_ref();
    match REGEX_PLAIN_PASSWORD.captures(value) {
        Some(captures) => Ok(obfuscate(&captures[1])),
        None => {
            reveal(value)?;
            Ok(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obfuscate_and_reveal() {
        let token = obfuscate("password");
        assert_eq!(token, "cGFzc3dvcmQ=");
        assert_ne!(token, "password");
        assert_eq!(reveal(&token).unwrap(), "password");
    }

    #[test]
    fn test_reveal_malformed_token() {
        assert!(matches!(reveal("not base64!"), Err(BackupError::Decode(_))));
        // valid base64, invalid utf-8
        assert!(matches!(reveal("/w=="), Err(BackupError::Decode(_))));
    }

    #[test]
    fn test_handle_password() {
        assert_eq!(handle_password("enc(test123)").unwrap(), obfuscate("test123"));
        assert_eq!(
            handle_password("encrypt(test123)").unwrap(),
            obfuscate("test123")
        );
        let token = obfuscate("already");
        assert_eq!(handle_password(&token).unwrap(), token);
        assert!(handle_password("plain text").is_err());
    }
}
