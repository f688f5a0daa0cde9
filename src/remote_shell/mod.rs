use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use thiserror::Error;

const READ_CHUNK: usize = 4096;
const PROMPT_BUFFER_CAP: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum RemoteShellError {
    #[error("host {0} is unreachable")]
    HostUnreachable(String),

    #[error("telnet login error: {0}")]
    TelnetLoginError(String),

    #[error("remote shell session ended unexpectedly")]
    Eof,
}

/// Capability to open an authenticated interactive shell session to a DUT and run a
/// kill/launch pair against it. Blocking, with an overall deadline per session.
pub struct RemoteShell {
    ip: String,
    port: u16,
    username: String,
    password: String,
}

impl RemoteShell {
    pub fn new(ip: String, port: u16, username: String, password: String) -> Self {
        Self {
            ip,
            port,
            username,
            password,
        }
    }

    /// Opens a TCP connection and drives the login dialog: expect `"ogin: "`, send
    /// username; expect `"assword: "`, send password; expect `"$ "`. Prompts are
    /// matched as byte substrings against a rolling buffer so that DUTs running
    /// slightly different shells still succeed (§9 Design Notes).
    pub fn with_session(&self, deadline: Duration) -> Result<Session, RemoteShellError> {
        let deadline_at = Instant::now() + deadline;

        let addr: SocketAddr = (self.ip.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| RemoteShellError::HostUnreachable(e.to_string()))?
            .next()
            .ok_or_else(|| RemoteShellError::HostUnreachable(self.ip.clone()))?;

        let stream = TcpStream::connect_timeout(&addr, remaining(deadline_at))
            .map_err(|e| RemoteShellError::HostUnreachable(e.to_string()))?;

        let mut session = Session { stream };

        session.expect(b"ogin: ", deadline_at)?;
        session.write_line(format!("{}\n", self.username).as_bytes())?;
        session.drain();

        session.expect(b"assword: ", deadline_at)?;
        session.write_line(format!("{}\n", self.password).as_bytes())?;

        session.expect(b"$ ", deadline_at)?;

        Ok(session)
    }
}

fn remaining(deadline_at: Instant) -> Duration {
    deadline_at.saturating_duration_since(Instant::now())
}

/// An open, logged-in shell session. Closed on drop.
#[derive(Debug)]
pub struct Session {
    stream: TcpStream,
}

impl Session {
    fn expect(&mut self, prompt: &[u8], deadline_at: Instant) -> Result<(), RemoteShellError> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let remaining = remaining(deadline_at);
            if remaining.is_zero() {
                return Err(RemoteShellError::TelnetLoginError(format!(
                    "timed out waiting for prompt {:?}",
                    String::from_utf8_lossy(prompt)
                )));
            }
            let _ = self.stream.set_read_timeout(Some(remaining));

            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(RemoteShellError::Eof),
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.len() > PROMPT_BUFFER_CAP {
                        let excess = buf.len() - PROMPT_BUFFER_CAP;
                        buf.drain(0..excess);
                    }
                    if contains(&buf, prompt) {
                        return Ok(());
                    }
                }
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    return Err(RemoteShellError::TelnetLoginError(format!(
                        "timed out waiting for prompt {:?}",
                        String::from_utf8_lossy(prompt)
                    )));
                }
                Err(e) => {
                    return Err(RemoteShellError::TelnetLoginError(e.to_string()));
                }
            }
        }
    }

    /// Writes a command to the session. Callers pass already fully-formed bytes
    /// (CRLF-terminated) — this is a thin wrapper, not a line-oriented protocol.
    pub fn write_line(&mut self, bytes: &[u8]) -> Result<(), RemoteShellError> {
        self.stream
            .write_all(bytes)
            .map_err(|_| RemoteShellError::Eof)
    }

    /// Best-effort discard of whatever the DUT echoed back, mirroring
    /// `telnetlib.read_very_eager`: never blocks, swallows errors.
    pub fn drain(&mut self) {
        let _ = self
            .stream
            .set_read_timeout(Some(Duration::from_millis(1)));
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) if n < READ_CHUNK => break,
                Ok(_) => continue,
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len().max(1))
        .any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn contains_matches_byte_substring() {
        assert!(contains(b"welcome\r\nogin: ", b"ogin: "));
        assert!(!contains(b"welcome", b"ogin: "));
    }

    #[test]
    fn successful_login_dialog() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;

            writer.write_all(b"Welcome\r\nogin: ").unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "root\n");

            writer.write_all(b"assword: ").unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "hunter2\n");

            writer.write_all(b"$ ").unwrap();
            thread::sleep(Duration::from_millis(50));
        });

        let shell = RemoteShell::new(
            "127.0.0.1".to_string(),
            port,
            "root".to_string(),
            "hunter2".to_string(),
        );
        let session = shell.with_session(Duration::from_secs(5));
        assert!(session.is_ok());
    }

    #[test]
    fn unreachable_host_is_classified() {
        let shell = RemoteShell::new(
            "127.0.0.1".to_string(),
            1, // privileged, nothing listening
            "root".to_string(),
            "x".to_string(),
        );
        let err = shell.with_session(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, RemoteShellError::HostUnreachable(_)));
    }

    #[test]
    fn missing_prompt_within_deadline_is_a_login_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            // never send a login prompt
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let shell = RemoteShell::new(
            "127.0.0.1".to_string(),
            port,
            "root".to_string(),
            "x".to_string(),
        );
        let err = shell
            .with_session(Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, RemoteShellError::TelnetLoginError(_)));
    }
}
