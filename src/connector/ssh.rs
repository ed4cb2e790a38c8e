use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log::{debug, info, warn};
use ssh2::{Channel, HashType, Session};

use crate::configuration::SshInfo;
use crate::connector::{target_path, Connector};
use crate::error::{BackupError, BackupResult};
use crate::helper::shell_quote;

/// One authenticated SSH session. Not meant for concurrent use.
pub struct RemoteConnector {
    session: Session,
}

impl RemoteConnector {
    // more than 32KB per write has been seen to truncate scp transfers.
    const BUFFER_SIZE: usize = 32 * 1_024;

    /// Connects and authenticates. Unknown host keys are accepted; the
    /// fingerprint is logged so it can be checked by hand.
    pub fn connect(ssh: &SshInfo) -> BackupResult<RemoteConnector> {
        info!("opening SSH session to {}", ssh);
        let tcp = TcpStream::connect(ssh.address())?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        if let Some(hash) = session.host_key_hash(HashType::Sha256) {
            debug!("host key of {}: SHA256:{}", ssh.ip, STANDARD_NO_PAD.encode(hash));
        }

        match ssh.password()? {
            Some(password) => session.userauth_password(&ssh.user, &password)?,
            None => session.userauth_agent(&ssh.user)?,
        }
        if !session.authenticated() {
            return Err(BackupError::config(format!(
                "SSH authentication failed for {}",
                ssh
            )));
        }

        Ok(RemoteConnector { session })
    }

    fn unix_seconds(time: std::io::Result<SystemTime>) -> u64 {
        time.ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs())
            .unwrap_or(0)
    }
}

impl Connector for RemoteConnector {
    fn copy_out(&self, local_file: &Path, target_dir: &Path) -> BackupResult<()> {
        let remote_path = target_path(local_file, target_dir)?;
        let metadata = fs::metadata(local_file)?;
        let times = (
            Self::unix_seconds(metadata.modified()),
            Self::unix_seconds(metadata.accessed()),
        );

        let mut remote_file =
            self.session
                .scp_send(&remote_path, 0o644, metadata.len(), Some(times))?;
        let mut file = File::open(local_file)?;
        let mut buf = vec![0; Self::BUFFER_SIZE];
        loop {
            let read_bytes = file.read(&mut buf)?;
            if read_bytes == 0 {
                break;
            }
            remote_file.write_all(&buf[..read_bytes])?;
        }

        remote_file.send_eof()?;
        remote_file.wait_eof()?;
        remote_file.close()?;
        remote_file.wait_close()?;
        debug!(
            "File '{}' was uploaded to {}",
            local_file.display(),
            remote_path.display()
        );
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> BackupResult<Vec<String>> {
        let output = self.run_command(&format!(
            "find {} -maxdepth 1 -type f",
            shell_quote(dir.to_string_lossy())
        ))?;
        Ok(output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| Path::new(line.trim_end()).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn remove_file(&self, path: &Path) -> BackupResult<()> {
        self.run_command(&format!("rm {}", shell_quote(path.to_string_lossy())))?;
        Ok(())
    }

    fn run_command(&self, command: &str) -> BackupResult<String> {
        debug!("Executing SSH command: {}", command);
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        self.session.set_blocking(false);
        let drained = drain_channel(&mut channel, &mut stdout, &mut stderr);
        self.session.set_blocking(true);
        drained?;
        channel.wait_close()?;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr);

        let status = channel.exit_status()?;
        if status != 0 {
            return Err(BackupError::Command {
                command: command.to_string(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Appends whatever `stream` has ready to `output`. True when bytes were read.
fn read_ready<R: Read>(stream: &mut R, buffer: &mut [u8], output: &mut Vec<u8>) -> io::Result<bool> {
    match stream.read(buffer) {
        Ok(0) => Ok(false),
        Ok(size) => {
            output.extend_from_slice(&buffer[..size]);
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(err) => Err(err),
    }
}

/// Reads stdout and stderr in turns until the remote side is done, so a
/// full stderr window cannot stall the command. The session must be in
/// non-blocking mode.
fn drain_channel(channel: &mut Channel, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) -> io::Result<()> {
    let mut buffer = vec![0; RemoteConnector::BUFFER_SIZE];
    loop {
        let read_stdout = read_ready(channel, &mut buffer, stdout)?;
        let read_stderr = read_ready(&mut channel.stderr(), &mut buffer, stderr)?;
        if read_stdout || read_stderr {
            continue;
        }
        if channel.eof() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(10));
    }
}

impl Drop for RemoteConnector {
    fn drop(&mut self) {
        if let Err(err) = self.session.disconnect(None, "backup finished", None) {
            warn!("SSH session did not close cleanly: {}", err);
        }
    }
}
