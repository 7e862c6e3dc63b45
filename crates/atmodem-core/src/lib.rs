//! # atmodem-core
//!
//! AT command/response correlation for cellular modems.
//!
//! A caller thread issues one command at a time while a listener thread
//! decodes everything the modem sends, peels off unsolicited events, and
//! hands the rest to the correlator that wakes the caller once the command's
//! completion policy is met.
//!
//! ## Crate structure
//!
//! - [`transport`] — Byte channel seam supplied by the application
//! - [`decoder`] — CR/LF line splitting with prompt detection
//! - [`command`] — Commands, completion policies, exchange results
//! - [`correlator`] — Single-slot command/response state machine
//! - [`events`] — Unsolicited result codes (`RING`, `+CMTI`)
//! - [`listener`] — Read loop thread
//! - [`sms`] — `+CMGL` listing parser and deletion sequence
//! - [`response`] — Signal, operator and subscriber number helpers
//! - [`session`] — Scoped session with the caller-facing operations
//! - [`config`] — TOML session configuration
//! - [`error`] — Error types
//! - [`test_util`] — Scripted in-memory modem

pub mod command;
pub mod config;
pub mod correlator;
pub mod decoder;
pub mod error;
pub mod events;
pub mod listener;
pub mod response;
pub mod session;
pub mod sms;
pub mod transport;

pub mod test_util;

pub use command::{Command, Completion, CompletionPolicy};
pub use config::{SessionConfig, SessionConfigInput};
pub use error::{ModemError, TransportError};
pub use events::UnsolicitedEvent;
pub use session::{DeletionReport, ModemSession};
pub use sms::SmsRecord;
pub use transport::Transport;
