//! Line protocol transport to the shared cache daemon.
//!
//! ```text
//! get\n<N>\n<key_1>\n...<key_N>\n  ->  _hits_<n>_ | <missing key> ... 0
//! set\n<N>\n<key_1>\n...<key_N>\n  ->  (no response)
//! exit\n                           ->  daemon terminates
//! ```
//!
//! I/O failures never propagate out of a transport: the session drops to the
//! disconnected state and the caller falls back to the upstream server.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use rfl_config::{log_cache_debug, log_cache_warn};

use crate::{FetchError, Result};

/// A session with a shared cache.
pub trait CacheTransport {
    /// Start the session. Fails if one is already open.
    fn connect(&mut self, command: &str) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Write a request. Errors close the session instead of propagating.
    fn send(&mut self, request: &str);

    /// Next response line without its newline; `None` once disconnected.
    fn receive_line(&mut self) -> Option<String>;

    /// Ask the daemon to exit and release the channel.
    fn close(&mut self);
}

/// Transport to an external cache daemon subprocess.
#[derive(Debug, Default)]
pub struct DaemonTransport {
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl DaemonTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheTransport for DaemonTransport {
    fn connect(&mut self, command: &str) -> Result<()> {
        if self.child.is_some() {
            return Err(FetchError::AlreadyConnected);
        }
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| FetchError::Spawn {
                command: command.to_string(),
                source,
            })?;
        self.stdin = child.stdin.take().map(BufWriter::new);
        self.stdout = child.stdout.take().map(BufReader::new);
        self.child = Some(child);
        log_cache_debug!("cache process started", command = command);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.child.is_some()
    }

    fn send(&mut self, request: &str) {
        let Some(stdin) = self.stdin.as_mut() else {
            return;
        };
        let sent = stdin
            .write_all(request.as_bytes())
            .and_then(|_| stdin.flush());
        if let Err(e) = sent {
            log_cache_warn!("cache process write failed", error = tracing::field::display(&e));
            self.close();
        }
    }

    fn receive_line(&mut self) -> Option<String> {
        let stdout = self.stdout.as_mut()?;
        let mut line = String::new();
        match stdout.read_line(&mut line) {
            Ok(0) => {
                self.close();
                None
            }
            Ok(_) => {
                let line = line.strip_suffix('\n').unwrap_or(&line).to_string();
                if line.is_empty() {
                    self.close();
                    return None;
                }
                Some(line)
            }
            Err(e) => {
                log_cache_warn!("cache process read failed", error = tracing::field::display(&e));
                self.close();
                None
            }
        }
    }

    fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Some(mut stdin) = self.stdin.take() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = stdin.write_all(b"exit\n").and_then(|_| stdin.flush());
            }
        }
        self.stdout = None;
        let _ = child.wait();
    }
}

impl Drop for DaemonTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// In-process stand-in used when no cache daemon is configured: every `get`
/// is answered with every requested key as a miss.
#[derive(Debug, Default)]
pub struct NullTransport {
    connected: bool,
    pending: VecDeque<String>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheTransport for NullTransport {
    fn connect(&mut self, _command: &str) -> Result<()> {
        if self.connected {
            return Err(FetchError::AlreadyConnected);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, request: &str) {
        if !self.connected {
            return;
        }
        let mut lines = request.lines();
        if lines.next() != Some("get") {
            return;
        }
        let _count = lines.next();
        self.pending
            .extend(lines.filter(|key| !key.is_empty()).map(str::to_string));
        self.pending.push_back("0".to_string());
    }

    fn receive_line(&mut self) -> Option<String> {
        if !self.connected {
            return None;
        }
        self.pending.pop_front()
    }

    fn close(&mut self) {
        self.connected = false;
        self.pending.clear();
    }
}
