//! Streams to the upstream file server.

use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::{Child, Command, Stdio};

use rfl_config::log_fetch_debug;

use crate::{FetchError, Result};

/// A bidirectional byte stream to a peer that can answer `getfiles`.
pub struct PeerStream {
    reader: Box<dyn BufRead>,
    writer: Box<dyn Write>,
    child: Option<Child>,
}

impl PeerStream {
    pub fn new(reader: impl BufRead + 'static, writer: impl Write + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    /// Wrap a spawned process whose stdin and stdout are piped.
    pub fn from_child(mut child: Child) -> io::Result<Self> {
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer process has no stdio pipes",
            ));
        };
        Ok(Self {
            reader: Box::new(BufReader::new(stdout)),
            writer: Box::new(BufWriter::new(stdin)),
            child: Some(child),
        })
    }

    pub fn reader(&mut self) -> &mut dyn BufRead {
        &mut *self.reader
    }

    pub fn writer(&mut self) -> &mut dyn Write {
        &mut *self.writer
    }

    /// Announce a streaming command (`getfiles\n`).
    pub fn call_stream(&mut self, command: &str) -> io::Result<()> {
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Close our end and reap the peer process, if any.
    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.release();
        if let Some(mut child) = self.child.take() {
            let status = child.wait()?;
            log_fetch_debug!("peer exited", code = status.code().unwrap_or(-1));
        }
        Ok(())
    }

    /// Drop both pipe ends so the peer sees EOF.
    fn release(&mut self) {
        self.writer = Box::new(io::sink());
        self.reader = Box::new(io::empty());
    }
}

/// A stream abandoned mid-conversation kills its peer rather than leaving a
/// zombie behind.
impl Drop for PeerStream {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.release();
        if matches!(child.try_wait(), Ok(None)) {
            let _ = child.kill();
        }
        let _ = child.wait();
    }
}

/// Source of connections to the upstream server.
pub trait Upstream {
    fn open(&self) -> Result<PeerStream>;
}

/// Upstream reached by running a shell command whose stdin and stdout carry
/// the `getfiles` stream, e.g. an `ssh` invocation of a process that hands
/// both to `BlobServer::serve`.
#[derive(Debug, Clone)]
pub struct CommandUpstream {
    command: String,
}

impl CommandUpstream {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Upstream for CommandUpstream {
    fn open(&self) -> Result<PeerStream> {
        let spawn_err = |source| FetchError::Spawn {
            command: self.command.clone(),
            source,
        };
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_err)?;
        PeerStream::from_child(child).map_err(spawn_err)
    }
}
