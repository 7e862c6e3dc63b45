//! Inbox polling: list stored messages, report them, then clear them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use atmodem_core::{ModemError, ModemSession, SmsRecord, UnsolicitedEvent};
use crossbeam_channel::RecvTimeoutError;
use tracing::{info, warn};

use crate::config::InboxConfig;

/// One inbox pass. Returns the records that were listed.
pub fn process_inbox(session: &ModemSession, config: &InboxConfig) -> Result<Vec<SmsRecord>, ModemError> {
    let records = session.read_messages()?;
    for record in &records {
        info!(
            index = record.index,
            sender = record.sender().unwrap_or("?"),
            status = record.status().unwrap_or("?"),
            content = %record.content,
            "message"
        );
    }

    if config.delete_after_read && !records.is_empty() {
        let report = session.delete_messages(&records);
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "inbox cleared"
        );
    }
    Ok(records)
}

/// Why [`wait_for_next_pass`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Interval,
    NewMessage,
    Shutdown,
}

/// Sleep until the poll interval elapses, a new message is announced, or
/// shutdown is requested. Other events are logged on the way.
pub fn wait_for_next_pass(session: &ModemSession, interval: Duration, running: &AtomicBool) -> Wake {
    let deadline = Instant::now() + interval;
    let tick = Duration::from_millis(200);

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            return Wake::Interval;
        }
        match session.events().recv_timeout((deadline - now).min(tick)) {
            Ok(UnsolicitedEvent::NewMessage { storage, index }) => {
                info!(%storage, index, "new message announced");
                return Wake::NewMessage;
            }
            Ok(UnsolicitedEvent::Ring { answered }) => {
                info!(answered, "call handled");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("event channel closed");
                return Wake::Shutdown;
            }
        }
    }
    Wake::Shutdown
}
