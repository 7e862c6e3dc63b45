//! # Unsolicited result codes
//!
//! Lines the modem emits on its own, interleaved with command responses.
//! The handler sees every decoded line before the correlator does:
//!
//! - `RING` is consumed. With auto-answer on, the call is picked up and
//!   dropped again (`ATA`, settle delay, `ATH`) through raw writes that do not
//!   take the correlator slot and do not wait for acknowledgements.
//! - `+CMTI` (new message stored) is reported and still forwarded.
//! - Everything else is forwarded untouched.
//!
//! Observed events are published on a bounded channel for whoever holds the
//! session's event receiver. A full channel drops the event.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::transport::Transport;

const RING: &str = "RING";
const NEW_MESSAGE_PREFIX: &str = "+CMTI:";
const ANSWER: &[u8] = b"ATA\r";
const HANG_UP: &[u8] = b"ATH\r";

/// Device-originated event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsolicitedEvent {
    /// Incoming call. `answered` is true when the answer command was written.
    Ring { answered: bool },
    /// A message was stored at `index` in `storage` (e.g. `"SM"`).
    NewMessage { storage: String, index: u32 },
}

/// Whether a line continues to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Consumed,
    Forward,
}

/// Inspects lines before correlation.
pub struct UnsolicitedHandler {
    transport: Arc<dyn Transport>,
    auto_answer: bool,
    ring_settle: Duration,
    events: Option<Sender<UnsolicitedEvent>>,
}

impl UnsolicitedHandler {
    pub fn new(transport: Arc<dyn Transport>, auto_answer: bool, ring_settle: Duration) -> Self {
        Self {
            transport,
            auto_answer,
            ring_settle,
            events: None,
        }
    }

    /// Publish observed events on `tx`.
    pub fn with_events(mut self, tx: Sender<UnsolicitedEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn handle(&self, line: &str) -> Disposition {
        if line == RING {
            info!(auto_answer = self.auto_answer, "incoming call");
            let answered = self.auto_answer && self.answer_and_hang_up();
            self.publish(UnsolicitedEvent::Ring { answered });
            return Disposition::Consumed;
        }

        if let Some((storage, index)) = parse_new_message(line) {
            info!(%storage, index, "new message stored");
            self.publish(UnsolicitedEvent::NewMessage { storage, index });
        }

        Disposition::Forward
    }

    /// Returns whether the answer command reached the device.
    fn answer_and_hang_up(&self) -> bool {
        if let Err(e) = self.transport.write(ANSWER) {
            warn!(error = %e, "failed to answer call");
            return false;
        }
        thread::sleep(self.ring_settle);
        if let Err(e) = self.transport.write(HANG_UP) {
            warn!(error = %e, "failed to hang up call");
        }
        true
    }

    fn publish(&self, event: UnsolicitedEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!(?event, "event channel full, dropping"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// `+CMTI: "SM",3` → `("SM", 3)`.
fn parse_new_message(line: &str) -> Option<(String, u32)> {
    let rest = line.strip_prefix(NEW_MESSAGE_PREFIX)?;
    let (storage, index) = rest.split_once(',')?;
    let index = index.trim().parse().ok()?;
    Some((storage.trim().trim_matches('"').to_string(), index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ScriptedTransport;
    use crossbeam_channel::bounded;

    fn handler(auto_answer: bool) -> (Arc<ScriptedTransport>, UnsolicitedHandler) {
        let transport = Arc::new(ScriptedTransport::new());
        let h = UnsolicitedHandler::new(transport.clone(), auto_answer, Duration::from_millis(1));
        (transport, h)
    }

    #[test]
    fn ring_is_answered_then_hung_up() {
        let (transport, h) = handler(true);
        assert_eq!(h.handle("RING"), Disposition::Consumed);
        assert_eq!(transport.written_text(), vec!["ATA\r", "ATH\r"]);
    }

    #[test]
    fn ring_is_consumed_without_auto_answer() {
        let (transport, h) = handler(false);
        assert_eq!(h.handle("RING"), Disposition::Consumed);
        assert!(transport.written().is_empty());
    }

    #[test]
    fn answer_failure_skips_hang_up() {
        let (tx, rx) = bounded(4);
        let (transport, h) = handler(true);
        let h = h.with_events(tx);
        transport.fail_writes(true);
        assert_eq!(h.handle("RING"), Disposition::Consumed);
        assert!(transport.written().is_empty());
        assert_eq!(rx.try_recv().unwrap(), UnsolicitedEvent::Ring { answered: false });
    }

    #[test]
    fn answered_ring_is_reported() {
        let (tx, rx) = bounded(4);
        let (_t, h) = handler(true);
        let h = h.with_events(tx);
        h.handle("RING");
        assert_eq!(rx.try_recv().unwrap(), UnsolicitedEvent::Ring { answered: true });
    }

    #[test]
    fn other_lines_are_forwarded() {
        let (transport, h) = handler(true);
        for line in ["OK", "ERROR", ">", "", "RINGING", "+CSQ: 15,99"] {
            assert_eq!(h.handle(line), Disposition::Forward, "{line}");
        }
        assert!(transport.written().is_empty());
    }

    #[test]
    fn events_are_published() {
        let (tx, rx) = bounded(4);
        let (_t, h) = handler(false);
        let h = h.with_events(tx);
        h.handle("RING");
        assert_eq!(h.handle("+CMTI: \"SM\",3"), Disposition::Forward);
        assert_eq!(rx.try_recv().unwrap(), UnsolicitedEvent::Ring { answered: false });
        assert_eq!(
            rx.try_recv().unwrap(),
            UnsolicitedEvent::NewMessage {
                storage: "SM".into(),
                index: 3
            }
        );
    }

    #[test]
    fn full_event_channel_does_not_block() {
        let (tx, rx) = bounded(1);
        let (_t, h) = handler(false);
        let h = h.with_events(tx);
        h.handle("RING");
        h.handle("RING");
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn parses_new_message_indication() {
        assert_eq!(parse_new_message("+CMTI: \"ME\", 12"), Some(("ME".into(), 12)));
        assert_eq!(parse_new_message("+CMTI: \"SM\""), None);
        assert_eq!(parse_new_message("+CMTI: \"SM\",x"), None);
        assert_eq!(parse_new_message("+CMGL: 1"), None);
    }
}
