//! `gerrit stream-events` over an `ssh` child process.

use crate::events::GerritEvent;
use crate::processors::event_source::{EventSource, SourceError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, warn};

pub const DEFAULT_SSH_PORT: u16 = 29418;

#[derive(Debug, Clone)]
pub struct SshParams {
    pub host: String,
    pub user: String,
    pub port: u16,
    /// Private key passed with `-i`. The ssh agent is used when absent.
    pub key: Option<PathBuf>,
    /// Program to execute, normally `ssh`.
    pub ssh_command: String,
}

impl SshParams {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: DEFAULT_SSH_PORT,
            key: None,
            ssh_command: "ssh".to_string(),
        }
    }

    /// Arguments for the ssh command line.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
        ];
        if let Some(key) = &self.key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args.push("gerrit".to_string());
        args.push("stream-events".to_string());
        args
    }
}

struct Session {
    // Held so the process is killed when the session is dropped.
    _child: Child,
    lines: SplitStream<BufReader<ChildStdout>>,
}

/// Reads one JSON event per line from `ssh ... gerrit stream-events`.
pub struct GerritSshSource {
    params: SshParams,
    session: Option<Session>,
}

impl GerritSshSource {
    pub fn new(params: SshParams) -> Self {
        Self {
            params,
            session: None,
        }
    }
}

#[async_trait]
impl EventSource for GerritSshSource {
    fn describe(&self) -> String {
        format!(
            "ssh://{}@{}:{}",
            self.params.user, self.params.host, self.params.port
        )
    }

    async fn connect(&mut self) -> Result<(), SourceError> {
        self.session = None;

        let mut child = Command::new(&self.params.ssh_command)
            .args(self.params.ssh_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Connect("ssh stdout was not captured".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = SplitStream::new(BufReader::new(stderr).split(b'\n'));
                while let Some(Ok(line)) = lines.next().await {
                    warn!(stderr = %String::from_utf8_lossy(line.trim_ascii_end()), "ssh reported");
                }
            });
        }

        self.session = Some(Session {
            _child: child,
            lines: SplitStream::new(BufReader::new(stdout).split(b'\n')),
        });
        Ok(())
    }

    async fn next_event(&mut self) -> Result<GerritEvent, SourceError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SourceError::Closed);
        };

        loop {
            match session.lines.next().await {
                // raw bytes, so invalid UTF-8 surfaces as a malformed event
                Some(Ok(line)) => {
                    let line = line.trim_ascii();
                    if line.is_empty() {
                        continue;
                    }
                    debug!(line = %String::from_utf8_lossy(line), "Received stream-events line");
                    return Ok(GerritEvent::from_json(line)?);
                }
                Some(Err(e)) => {
                    self.session = None;
                    return Err(SourceError::Read(e.to_string()));
                }
                None => {
                    self.session = None;
                    return Err(SourceError::Closed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_args_without_key() {
        let params = SshParams::new("review.openstack.org", "gerritbot");
        assert_eq!(
            params.ssh_args(),
            vec![
                "-p",
                "29418",
                "-o",
                "BatchMode=yes",
                "-o",
                "ServerAliveInterval=30",
                "gerritbot@review.openstack.org",
                "gerrit",
                "stream-events",
            ]
        );
    }

    #[test]
    fn test_ssh_args_with_key() {
        let params = SshParams {
            port: 2222,
            key: Some(PathBuf::from("/etc/gerritbot/id_rsa")),
            ..SshParams::new("gerrit.example.org", "bot")
        };
        let args = params.ssh_args();
        assert_eq!(&args[..2], ["-p", "2222"]);
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/etc/gerritbot/id_rsa");
        assert_eq!(args[i + 2], "bot@gerrit.example.org");
    }

    #[tokio::test]
    async fn test_reads_lines_from_child_process() {
        let mut source = GerritSshSource::new(SshParams::new("unused", "unused"));
        // sh stands in for the ssh child
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(concat!(
                r#"printf '%s\n\n%s\n' '{"type":"change-merged","change":{"project":"p"}}' 'not json';"#,
                r#"printf '{"type":"change-merged","change":{"subject":"caf\351"}}\n';"#,
                r#"printf '{"type":"patchset-created"}\n'"#,
            ))
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        source.session = Some(Session {
            _child: child,
            lines: SplitStream::new(BufReader::new(stdout).split(b'\n')),
        });

        let event = source.next_event().await.unwrap();
        assert_eq!(event.name(), Some(GerritEvent::CHANGE_MERGED));
        assert!(matches!(
            source.next_event().await,
            Err(SourceError::Malformed(_))
        ));
        // a Latin-1 byte is a malformed event, not a broken stream
        assert!(matches!(
            source.next_event().await,
            Err(SourceError::Malformed(_))
        ));
        let event = source.next_event().await.unwrap();
        assert_eq!(event.name(), Some(GerritEvent::PATCHSET_CREATED));
        assert!(matches!(source.next_event().await, Err(SourceError::Closed)));
        assert!(matches!(source.next_event().await, Err(SourceError::Closed)));
    }
}
