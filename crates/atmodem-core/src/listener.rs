//! # Listener loop
//!
//! One thread per session that owns the read side of the transport:
//!
//! 1. reads a chunk with a bounded timeout (timeouts are idle, not errors)
//! 2. splits it into lines with the [`LineDecoder`]
//! 3. offers each line to the [`UnsolicitedHandler`]
//! 4. forwards what it did not consume to [`Correlator::on_line`]
//!
//! Hard read errors are logged and the loop carries on; only [`Listener::stop`]
//! ends it. The stop flag is checked between iterations, so a line that has
//! been read is always dispatched completely.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::correlator::Correlator;
use crate::decoder::LineDecoder;
use crate::error::{ModemError, TransportError};
use crate::events::{Disposition, UnsolicitedHandler};
use crate::transport::Transport;

/// Pacing of the listener thread.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub startup_delay: Duration,
    pub max_line_len: usize,
}

/// Counters readable while the loop runs.
#[derive(Debug, Default)]
pub struct ListenerStats {
    pub chunks: AtomicU64,
    pub lines: AtomicU64,
    pub read_errors: AtomicU64,
}

/// Handle to the running listener thread.
///
/// Dropping the handle stops and joins the thread.
pub struct Listener {
    stop: Arc<AtomicBool>,
    stats: Arc<ListenerStats>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Listener {
    pub fn spawn(
        transport: Arc<dyn Transport>,
        events: UnsolicitedHandler,
        correlator: Arc<Correlator>,
        config: ListenerConfig,
    ) -> Result<Self, ModemError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ListenerStats::default());

        let worker = ListenerWorker {
            transport,
            decoder: LineDecoder::new(config.max_line_len),
            events,
            correlator,
            stop: stop.clone(),
            stats: stats.clone(),
            config,
        };

        let handle = thread::Builder::new()
            .name("atmodem-listener".into())
            .spawn(move || worker.run())
            .map_err(ModemError::Spawn)?;

        Ok(Self {
            stop,
            stats,
            handle: Some(handle),
        })
    }

    /// Signal the loop to exit and wait for it.
    ///
    /// Returns after the current read attempt finishes, i.e. within one read
    /// timeout plus the dispatch of whatever that read delivered.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("listener thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ListenerWorker {
    transport: Arc<dyn Transport>,
    decoder: LineDecoder,
    events: UnsolicitedHandler,
    correlator: Arc<Correlator>,
    stop: Arc<AtomicBool>,
    stats: Arc<ListenerStats>,
    config: ListenerConfig,
}

impl ListenerWorker {
    fn run(mut self) {
        self.startup_delay();
        info!("listener started");

        while !self.stop.load(Ordering::Relaxed) {
            match self.transport.read(self.config.read_timeout) {
                Ok(chunk) => {
                    self.stats.chunks.fetch_add(1, Ordering::Relaxed);
                    debug!(len = chunk.len(), raw = ?chunk, "received from device");
                    for line in self.decoder.feed(&chunk) {
                        self.dispatch(&line);
                    }
                }
                Err(TransportError::Timeout) => {}
                Err(e) => {
                    self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "listener read error");
                }
            }

            if !self.config.poll_interval.is_zero() {
                thread::sleep(self.config.poll_interval);
            }
        }

        info!("listener stopped");
    }

    fn dispatch(&self, line: &str) {
        self.stats.lines.fetch_add(1, Ordering::Relaxed);
        debug!(line, "line");
        if self.events.handle(line) == Disposition::Forward {
            self.correlator.on_line(line);
        }
    }

    /// The device may need a moment after claiming before it answers.
    fn startup_delay(&self) {
        let deadline = Instant::now() + self.config.startup_delay;
        while !self.stop.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Completion, CompletionPolicy};
    use crate::test_util::{wait_until, ScriptedTransport};
    use std::io;

    fn spawn(transport: &Arc<ScriptedTransport>, read_timeout_ms: u64) -> (Arc<Correlator>, Listener) {
        spawn_with_settle(transport, read_timeout_ms, Duration::from_millis(1))
    }

    fn spawn_with_settle(
        transport: &Arc<ScriptedTransport>,
        read_timeout_ms: u64,
        ring_settle: Duration,
    ) -> (Arc<Correlator>, Listener) {
        let correlator = Arc::new(Correlator::new(transport.clone(), Duration::from_secs(2)));
        let events = UnsolicitedHandler::new(transport.clone(), true, ring_settle);
        let listener = Listener::spawn(
            transport.clone(),
            events,
            correlator.clone(),
            ListenerConfig {
                read_timeout: Duration::from_millis(read_timeout_ms),
                poll_interval: Duration::ZERO,
                startup_delay: Duration::ZERO,
                max_line_len: 256,
            },
        )
        .unwrap();
        (correlator, listener)
    }

    #[test]
    fn stop_is_bounded_by_read_timeout() {
        let transport = Arc::new(ScriptedTransport::new());
        let (_corr, mut listener) = spawn(&transport, 50);
        assert!(wait_until(Duration::from_secs(2), || transport.read_count() > 0));

        let started = Instant::now();
        listener.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!listener.is_running());
    }

    #[test]
    fn stop_waits_for_chunk_in_dispatch() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("AT+CSQ\r", "\r\n+CSQ: 15,99\r\nRING\r\n\r\nOK\r\n");
        let (corr, mut listener) = spawn_with_settle(&transport, 20, Duration::from_millis(200));

        let worker = {
            let corr = corr.clone();
            thread::spawn(move || corr.execute(&Command::at("AT+CSQ", CompletionPolicy::ContainsOk)))
        };

        // ATA written: the listener is inside the settle delay, mid-chunk.
        assert!(wait_until(Duration::from_secs(2), || {
            transport.written_text().contains(&"ATA\r".to_string())
        }));
        listener.stop();

        assert_eq!(listener.stats().lines.load(Ordering::Relaxed), 5);
        assert_eq!(transport.written_text(), vec!["AT+CSQ\r", "ATA\r", "ATH\r"]);
        let lines = worker.join().unwrap().unwrap().into_transcript();
        assert_eq!(lines, vec!["", "+CSQ: 15,99", "", "OK"]);
    }

    #[test]
    fn read_errors_do_not_end_the_loop() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("AT\r", "\r\nOK\r\n");
        let (corr, listener) = spawn(&transport, 20);

        transport.inject_fault(io::ErrorKind::Other);
        transport.inject_fault(io::ErrorKind::BrokenPipe);
        assert!(wait_until(Duration::from_secs(2), || {
            listener.stats().read_errors.load(Ordering::Relaxed) == 2
        }));
        assert!(listener.is_running());

        let out = corr.execute(&Command::at("AT", CompletionPolicy::ExactOk)).unwrap();
        assert_eq!(out, Completion::Status(true));
    }

    #[test]
    fn ring_never_reaches_the_correlator() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("AT+CSQ\r", "\r\nRING\r\n+CSQ: 15,99\r\n\r\nOK\r\n");
        let (corr, _listener) = spawn(&transport, 20);

        let lines = corr
            .execute(&Command::at("AT+CSQ", CompletionPolicy::ContainsOk))
            .unwrap()
            .into_transcript();
        assert_eq!(lines, vec!["", "+CSQ: 15,99", "", "OK"]);
        assert!(transport.written_text().contains(&"ATA\r".to_string()));
    }

    #[test]
    fn startup_delay_is_interruptible() {
        let transport = Arc::new(ScriptedTransport::new());
        let correlator = Arc::new(Correlator::new(transport.clone(), Duration::from_secs(1)));
        let events = UnsolicitedHandler::new(transport.clone(), false, Duration::ZERO);
        let mut listener = Listener::spawn(
            transport.clone(),
            events,
            correlator,
            ListenerConfig {
                read_timeout: Duration::from_millis(20),
                poll_interval: Duration::ZERO,
                startup_delay: Duration::from_secs(30),
                max_line_len: 256,
            },
        )
        .unwrap();

        let started = Instant::now();
        listener.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(transport.read_count(), 0);
    }
}
