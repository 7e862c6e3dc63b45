//! In-memory modem for unit and integration tests.
//!
//! [`ScriptedTransport`] answers registered commands with canned byte
//! responses, accepts injected unsolicited traffic and read faults, and keeps
//! every write for later assertions.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::TransportError;
use crate::transport::Transport;

enum Inbound {
    Data(Bytes),
    Fault(io::ErrorKind),
}

/// Scripted stand-in for the modem's AT channel.
pub struct ScriptedTransport {
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
    written: Mutex<Vec<Vec<u8>>>,
    /// Payload → queued responses with a used flag. The last queued
    /// response repeats until another one is registered behind it.
    replies: Mutex<HashMap<Vec<u8>, VecDeque<(Vec<u8>, bool)>>>,
    fail_writes: AtomicBool,
    closed: AtomicBool,
    reads: AtomicUsize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            written: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    /// Answer writes of exactly `payload` with `response`.
    ///
    /// Registering the same payload again queues another answer. Each answer
    /// is used once, except the newest which repeats.
    pub fn reply(&self, payload: impl AsRef<[u8]>, response: impl AsRef<[u8]>) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(payload.as_ref().to_vec())
            .or_default()
            .push_back((response.as_ref().to_vec(), false));
        self
    }

    /// Queue device-originated bytes for the next read.
    pub fn inject(&self, bytes: impl AsRef<[u8]>) {
        let _ = self
            .inbound_tx
            .send(Inbound::Data(Bytes::copy_from_slice(bytes.as_ref())));
    }

    /// Make the next read fail with a hard I/O error.
    pub fn inject_fault(&self, kind: io::ErrorKind) {
        let _ = self.inbound_tx.send(Inbound::Fault(kind));
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Writes rendered as text, for readable assertions.
    pub fn written_text(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of completed `read` calls, timeouts included.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn next_reply(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        let queue = replies.get_mut(payload)?;
        while queue.len() > 1 && queue.front().is_some_and(|(_, used)| *used) {
            queue.pop_front();
        }
        let (response, used) = queue.front_mut()?;
        *used = true;
        Some(response.clone())
    }
}

impl Transport for ScriptedTransport {
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        self.written.lock().unwrap_or_else(|e| e.into_inner()).push(bytes.to_vec());
        if let Some(response) = self.next_reply(bytes) {
            self.inject(response);
        }
        Ok(())
    }

    fn read(&self, timeout: Duration) -> Result<Bytes, TransportError> {
        let result = match self.inbound_rx.recv_timeout(timeout) {
            Ok(Inbound::Data(bytes)) => Ok(bytes),
            Ok(Inbound::Fault(kind)) => Err(io::Error::from(kind).into()),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        };
        self.reads.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Poll `cond` until it holds or `limit` elapses.
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
