//! # Modem session
//!
//! Scoped owner of one modem connection. Opening a session starts the
//! listener thread; closing or dropping it stops and joins the listener and
//! only then closes the transport, on every exit path.
//!
//! The caller-facing operations are fixed sequences of correlated exchanges:
//!
//! | operation              | exchanges                                                     |
//! |------------------------|---------------------------------------------------------------|
//! | `check_device_status`  | `AT` (exact)                                                  |
//! | `check_signal`         | `AT+CSQ` (contains)                                           |
//! | `check_carrier`        | `AT+COPS?` (contains)                                         |
//! | `own_number`           | `AT+CNUM` (contains)                                          |
//! | `send_message`         | `AT+CMGS=?`, `AT+CMGF=1`, `AT+CSCS="GSM"` (exact), `AT+CMGS="<n>"` (prompt), body + Ctrl-Z (contains) |
//! | `read_messages`        | `AT+CMGF=1`, `AT+CSCS="GSM"` (exact), `AT+CMGL="ALL"` (contains) |
//! | `delete_message`       | `AT+CMGD=<i>` (contains)                                      |

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};
use tracing::{info, warn};

use crate::command::{Command, Completion, CompletionPolicy};
use crate::config::SessionConfig;
use crate::correlator::Correlator;
use crate::error::{ModemError, Result};
use crate::events::{UnsolicitedEvent, UnsolicitedHandler};
use crate::listener::{Listener, ListenerConfig, ListenerStats};
use crate::response::{parse_operator, SignalQuality};
use crate::sms::{delete_command, parse_listing, SmsRecord};
use crate::transport::{Transport, CTRL_Z};

/// Escape; aborts body entry on most modems.
const ESC: char = '\u{1b}';

/// Result of deleting a batch of listed messages.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub deleted: Vec<u32>,
    pub failed: Vec<(u32, ModemError)>,
}

/// Connection to one modem's AT channel.
pub struct ModemSession {
    transport: Arc<dyn Transport>,
    correlator: Arc<Correlator>,
    listener: Option<Listener>,
    events: Receiver<UnsolicitedEvent>,
}

impl ModemSession {
    /// Start the listener on an already opened transport.
    pub fn open(transport: Arc<dyn Transport>, config: SessionConfig) -> Result<Self> {
        let correlator = Arc::new(Correlator::new(transport.clone(), config.response_timeout));
        let (events_tx, events_rx) = bounded(config.event_capacity);
        let handler =
            UnsolicitedHandler::new(transport.clone(), config.auto_answer, config.ring_settle)
                .with_events(events_tx);

        let listener = Listener::spawn(
            transport.clone(),
            handler,
            correlator.clone(),
            ListenerConfig {
                read_timeout: config.read_timeout,
                poll_interval: config.poll_interval,
                startup_delay: config.startup_delay,
                max_line_len: config.max_line_len,
            },
        )?;

        info!(
            response_timeout = ?config.response_timeout,
            read_timeout = ?config.read_timeout,
            auto_answer = config.auto_answer,
            "modem session opened"
        );

        Ok(Self {
            transport,
            correlator,
            listener: Some(listener),
            events: events_rx,
        })
    }

    /// Run one correlated exchange.
    pub fn execute(&self, command: &Command) -> Result<Completion> {
        self.correlator.execute(command)
    }

    /// Device-originated events (calls, new message indications).
    pub fn events(&self) -> &Receiver<UnsolicitedEvent> {
        &self.events
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn listener_stats(&self) -> Option<&ListenerStats> {
        self.listener.as_ref().map(Listener::stats)
    }

    /// `AT` → whether the modem answers `OK`.
    pub fn check_device_status(&self) -> Result<bool> {
        info!("performing device health check");
        let ok = self.status("AT")?;
        if ok {
            info!("device is OK");
        } else {
            warn!("device status error");
        }
        Ok(ok)
    }

    /// Raw `AT+CSQ` transcript.
    pub fn check_signal(&self) -> Result<Vec<String>> {
        self.transcript("AT+CSQ")
    }

    pub fn signal_quality(&self) -> Result<Option<SignalQuality>> {
        Ok(SignalQuality::from_transcript(&self.check_signal()?))
    }

    /// Raw `AT+COPS?` transcript.
    pub fn check_carrier(&self) -> Result<Vec<String>> {
        self.transcript("AT+COPS?")
    }

    pub fn carrier_name(&self) -> Result<Option<String>> {
        Ok(parse_operator(&self.check_carrier()?))
    }

    /// Raw `AT+CNUM` transcript.
    pub fn own_number(&self) -> Result<Vec<String>> {
        self.transcript("AT+CNUM")
    }

    /// Send a text-mode SMS.
    ///
    /// Returns `Ok(false)` when the modem rejects the SMS capability check;
    /// the remaining steps are skipped then.
    pub fn send_message(&self, number: &str, body: &str) -> Result<bool> {
        validate_number(number)?;
        validate_body(body)?;

        info!(%number, "step 1, SMS health check");
        if !self.status("AT+CMGS=?")? {
            warn!(%number, "modem rejected SMS capability check");
            return Ok(false);
        }
        self.select_text_mode();

        info!(%number, "step 4, set number");
        let _text = TextSending::begin(&self.correlator);
        self.execute(&Command::at(
            format!("AT+CMGS=\"{}\"", number),
            CompletionPolicy::AwaitPrompt,
        ))?;

        info!(%number, len = body.len(), "step 5, send message");
        let transcript = self.execute(&Command::text_body(body))?.into_transcript();
        info!(%number, reference = ?message_reference(&transcript), "message sent");
        Ok(true)
    }

    /// List every stored message.
    ///
    /// The records stay on the device; follow up with
    /// [`delete_messages`](Self::delete_messages) once they are handled.
    pub fn read_messages(&self) -> Result<Vec<SmsRecord>> {
        self.select_text_mode();

        info!("listing messages");
        let lines = self.transcript("AT+CMGL=\"ALL\"")?;
        let listing = parse_listing(&lines)?;
        info!(count = listing.records.len(), "messages listed");
        Ok(listing.into_records())
    }

    /// `AT+CMGD=<index>`; returns the transcript.
    pub fn delete_message(&self, index: u32) -> Result<Vec<String>> {
        info!(index, "deleting message");
        Ok(self.execute(&delete_command(index))?.into_transcript())
    }

    /// Delete each record once. Failures are reported, not retried.
    pub fn delete_messages(&self, records: &[SmsRecord]) -> DeletionReport {
        let mut report = DeletionReport::default();
        for record in records {
            match self.delete_message(record.index) {
                Ok(_) => report.deleted.push(record.index),
                Err(e) => {
                    warn!(index = record.index, error = %e, "failed to delete message");
                    report.failed.push((record.index, e));
                }
            }
        }
        report
    }

    /// Stop the listener, then release the transport.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            info!("stopping listener");
            listener.stop();
            self.transport.close();
            info!("modem session closed");
        }
    }

    /// Text mode and GSM alphabet. The modem keeps working with its previous
    /// settings if either is refused, so failures only warn.
    fn select_text_mode(&self) {
        let steps = [
            ("set SMS mode to text", "AT+CMGF=1"),
            ("set GSM character set", "AT+CSCS=\"GSM\""),
        ];
        for (step, text) in steps {
            match self.status(text) {
                Ok(true) => {}
                Ok(false) => warn!(command = text, "{} refused", step),
                Err(e) => warn!(command = text, error = %e, "{} failed", step),
            }
        }
    }

    fn status(&self, text: &str) -> Result<bool> {
        Ok(self
            .execute(&Command::at(text, CompletionPolicy::ExactOk))?
            .is_success())
    }

    fn transcript(&self, text: &str) -> Result<Vec<String>> {
        Ok(self
            .execute(&Command::at(text, CompletionPolicy::ContainsOk))?
            .into_transcript())
    }
}

impl Drop for ModemSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Holds the text-sending flag for the duration of body entry.
struct TextSending<'a>(&'a Correlator);

impl<'a> TextSending<'a> {
    fn begin(correlator: &'a Correlator) -> Self {
        correlator.set_text_sending(true);
        Self(correlator)
    }
}

impl Drop for TextSending<'_> {
    fn drop(&mut self) {
        self.0.set_text_sending(false);
    }
}

fn validate_number(number: &str) -> Result<()> {
    let valid = !number.is_empty()
        && number
            .chars()
            .enumerate()
            .all(|(i, c)| c.is_ascii_digit() || (i == 0 && c == '+'));
    if valid {
        Ok(())
    } else {
        Err(ModemError::InvalidInput(format!("invalid phone number {:?}", number)))
    }
}

fn validate_body(body: &str) -> Result<()> {
    if body.contains(CTRL_Z as char) || body.contains(ESC) {
        return Err(ModemError::InvalidInput(
            "message body contains a control terminator".into(),
        ));
    }
    Ok(())
}

/// `+CMGS: <mr>` message reference, when the modem reported one.
fn message_reference(lines: &[String]) -> Option<u32> {
    lines
        .iter()
        .find_map(|l| l.strip_prefix("+CMGS:").and_then(|r| r.trim().parse().ok()))
}
