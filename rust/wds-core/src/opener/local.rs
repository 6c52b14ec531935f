// rust/wds-core/src/opener/local.rs

//! Local shard opener.
//!
//! Plain descriptors are opened as buffered files. Descriptors carrying the
//! `pipe:` prefix are run through the configured shell and their standard
//! output becomes the shard stream.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use super::traits::{ShardOpener, ShardStream, PIPE_PREFIX};
use crate::config::OpenerConfig;
use crate::error::{Result, WdsError};

/// Opens files and `pipe:` commands on the local machine.
#[derive(Debug, Clone)]
pub struct LocalOpener {
    /// Read buffer size for both files and pipes.
    buffer_size: usize,
    /// Shell used to run pipe commands.
    shell: String,
}

impl LocalOpener {
    pub fn new(config: &OpenerConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            shell: config.shell.clone(),
        }
    }

    fn open_file(&self, path: &str) -> Result<ShardStream> {
        let file = File::open(path)
            .map_err(|e| WdsError::open_with_source(path, "failed to open file", e))?;
        tracing::debug!("Opened shard file {}", path);
        Ok(Box::new(BufReader::with_capacity(self.buffer_size, file)))
    }

    fn open_pipe(&self, descriptor: &str, command: &str) -> Result<ShardStream> {
        if command.trim().is_empty() {
            return Err(WdsError::open(descriptor, "empty pipe command"));
        }

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| WdsError::open_with_source(descriptor, "failed to spawn pipe command", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WdsError::open(descriptor, "pipe command has no stdout"))?;

        tracing::debug!("Started pipe command for shard: {}", command);
        Ok(Box::new(PipeStream {
            command: command.to_string(),
            child,
            stdout: Some(BufReader::with_capacity(self.buffer_size, stdout)),
            reaped: false,
        }))
    }
}

impl Default for LocalOpener {
    fn default() -> Self {
        Self::new(&OpenerConfig::default())
    }
}

impl ShardOpener for LocalOpener {
    fn open(&self, descriptor: &str) -> Result<ShardStream> {
        match descriptor.strip_prefix(PIPE_PREFIX) {
            Some(command) => self.open_pipe(descriptor, command),
            None => self.open_file(descriptor),
        }
    }
}

/// Standard output of a shard command.
///
/// The child is reaped at end-of-stream; an unsuccessful exit status is
/// reported as a read error so a failed fetch does not look like an empty
/// shard.
struct PipeStream {
    command: String,
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    reaped: bool,
}

impl Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.reaped {
            return Ok(0);
        }
        let n = match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf)?,
            None => 0,
        };
        if n > 0 {
            return Ok(n);
        }

        self.stdout = None;
        self.reaped = true;
        let status = self.child.wait()?;
        if !status.success() {
            tracing::warn!("Pipe command '{}' exited with {}", self.command, status);
            return Err(io::Error::other(format!(
                "pipe command '{}' exited with {}",
                self.command, status
            )));
        }
        Ok(0)
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        // The stream was abandoned before its end; a command that is stalled
        // and never writes would otherwise block the wait forever.
        self.stdout = None;
        if let Err(e) = self.child.kill() {
            tracing::debug!("Could not kill pipe command '{}': {}", self.command, e);
        }
        match self.child.wait() {
            Ok(status) if !status.success() => {
                tracing::debug!("Abandoned pipe command '{}' exited with {}", self.command, status);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to reap pipe command '{}': {}", self.command, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opener::is_pipe;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn read_all(mut stream: ShardStream) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        Ok(data)
    }

    #[test]
    fn test_open_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"shard bytes").unwrap();
        file.flush().unwrap();

        let opener = LocalOpener::default();
        let stream = opener.open(file.path().to_str().unwrap()).unwrap();
        assert_eq!(read_all(stream).unwrap(), b"shard bytes");
    }

    #[test]
    fn test_open_missing_file() {
        let opener = LocalOpener::default();
        let err = opener.open("/nonexistent/shard-000000.tar").err().unwrap();
        assert!(matches!(err, WdsError::Open { .. }));
        assert!(err.to_string().contains("shard-000000.tar"));
    }

    #[test]
    fn test_open_pipe() {
        let opener = LocalOpener::default();
        let stream = opener.open("pipe:printf 'from a pipe'").unwrap();
        assert_eq!(read_all(stream).unwrap(), b"from a pipe");
    }

    #[test]
    fn test_pipe_reads_file_through_cat() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 3000]).unwrap();
        file.flush().unwrap();

        let opener = LocalOpener::default();
        let descriptor = format!("pipe:cat {}", file.path().display());
        let stream = opener.open(&descriptor).unwrap();
        assert_eq!(read_all(stream).unwrap(), vec![7u8; 3000]);
    }

    #[test]
    fn test_failing_pipe_reports_error_at_eof() {
        let opener = LocalOpener::default();
        let stream = opener.open("pipe:exit 3").unwrap();
        assert!(read_all(stream).is_err());
    }

    #[test]
    fn test_empty_pipe_command() {
        let opener = LocalOpener::default();
        assert!(matches!(opener.open("pipe:  "), Err(WdsError::Open { .. })));
    }

    #[test]
    fn test_dropping_unread_pipe_does_not_hang() {
        let opener = LocalOpener::default();
        let stream = opener.open("pipe:yes").unwrap();
        drop(stream);
    }

    #[test]
    fn test_dropping_stalled_pipe_kills_command() {
        let opener = LocalOpener::default();
        let stream = opener.open("pipe:sleep 30").unwrap();

        let start = std::time::Instant::now();
        drop(stream);
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_is_pipe() {
        assert!(is_pipe("pipe:curl -s http://host/shard.tar"));
        assert!(!is_pipe("/data/shard.tar"));
        assert!(!is_pipe("shard-pipe:.tar"));
    }
}
