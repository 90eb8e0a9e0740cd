//! In-memory cache daemon and upstream server used by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io::{self, BufReader, Read, Write};
use std::rc::Rc;

use rfl_fetch::{CacheTransport, PeerStream, Result, Upstream};
use rfl_store::{blob, NodeId};

/// What the stub daemon saw and how it behaves.
#[derive(Debug, Default)]
pub struct DaemonState {
    /// The first `hits` keys of every get are reported as hits
    pub hits: usize,
    /// Report this many misses, then drop the connection
    pub drop_after: Option<usize>,
    pub gets: Vec<Vec<String>>,
    pub sets: Vec<Vec<String>>,
}

pub struct StubDaemon {
    state: Rc<RefCell<DaemonState>>,
    connected: bool,
    pending: VecDeque<String>,
}

impl StubDaemon {
    pub fn new(state: DaemonState) -> (Self, Rc<RefCell<DaemonState>>) {
        let state = Rc::new(RefCell::new(state));
        let daemon = Self {
            state: state.clone(),
            connected: false,
            pending: VecDeque::new(),
        };
        (daemon, state)
    }
}

impl CacheTransport for StubDaemon {
    fn connect(&mut self, _command: &str) -> Result<()> {
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
        let verb = lines.next().unwrap_or_default();
        let count: usize = lines.next().and_then(|n| n.parse().ok()).unwrap_or(0);
        let keys: Vec<String> = lines.map(str::to_string).collect();
        assert_eq!(keys.len(), count, "frame count matches keys");

        let mut state = self.state.borrow_mut();
        match verb {
            "get" => {
                let split = state.hits.min(keys.len());
                if split > 0 {
                    self.pending.push_back(format!("_hits_{}_", split));
                }
                let misses = &keys[split..];
                match state.drop_after {
                    Some(n) => self.pending.extend(misses.iter().take(n).cloned()),
                    None => {
                        self.pending.extend(misses.iter().cloned());
                        self.pending.push_back("0".to_string());
                    }
                }
                state.gets.push(keys);
            }
            "set" => state.sets.push(keys),
            other => panic!("unexpected daemon verb {other:?}"),
        }
    }

    fn receive_line(&mut self) -> Option<String> {
        let line = self.pending.pop_front();
        if line.is_none() {
            self.connected = false;
        }
        line
    }

    fn close(&mut self) {
        self.connected = false;
        self.pending.clear();
    }
}

/// What the stub upstream saw and how it answers.
#[derive(Debug, Default)]
pub struct UpstreamState {
    /// Paths answered with the zero-length "no content" reply
    pub absent: HashSet<String>,
    pub handshakes: usize,
    /// Request lines per flush, in order
    pub batches: Vec<usize>,
    pub requests: Vec<(NodeId, String)>,
    pub terminated: bool,
    pub(crate) inbuf: Vec<u8>,
    pub(crate) outbuf: VecDeque<u8>,
}

impl UpstreamState {
    fn process(&mut self) {
        let mut batch = 0;
        while let Some(end) = self.inbuf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.inbuf.drain(..=end).collect();
            let line = String::from_utf8(line[..end].to_vec()).unwrap();
            if line == "getfiles" {
                self.handshakes += 1;
            } else if line.is_empty() {
                self.terminated = true;
            } else {
                let (hex, path) = line.split_at(40);
                let node = NodeId::from_hex(hex).unwrap();
                self.respond(path);
                self.requests.push((node, path.to_string()));
                batch += 1;
            }
        }
        if batch > 0 {
            self.batches.push(batch);
        }
    }

    fn respond(&mut self, path: &str) {
        if self.absent.contains(path) {
            self.outbuf.extend(b"0\n");
            return;
        }
        let compressed = blob::compress(&blob::create_blob(path.as_bytes(), &[]));
        self.outbuf.extend(format!("{}\n", compressed.len()).bytes());
        self.outbuf.extend(compressed);
    }
}

pub struct StubUpstream(Rc<RefCell<UpstreamState>>);

impl StubUpstream {
    pub fn new(state: UpstreamState) -> (Self, Rc<RefCell<UpstreamState>>) {
        let state = Rc::new(RefCell::new(state));
        (Self(state.clone()), state)
    }
}

impl Upstream for StubUpstream {
    fn open(&self) -> Result<PeerStream> {
        Ok(PeerStream::new(
            BufReader::new(StubReader(self.0.clone())),
            StubWriter(self.0.clone()),
        ))
    }
}

struct StubReader(Rc<RefCell<UpstreamState>>);

impl Read for StubReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.borrow_mut();
        let n = buf.len().min(state.outbuf.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbuf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct StubWriter(Rc<RefCell<UpstreamState>>);

impl Write for StubWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().inbuf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.borrow_mut().process();
        Ok(())
    }
}

pub fn node(n: u32) -> NodeId {
    let mut bytes = [0u8; 20];
    bytes[16..].copy_from_slice(&n.to_be_bytes());
    bytes[0] = 0xab;
    NodeId::new(bytes)
}
