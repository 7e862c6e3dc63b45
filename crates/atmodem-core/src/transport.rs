//! # Transport seam
//!
//! The session never opens devices itself. The surrounding application hands
//! it a [`Transport`] already attached to the modem's AT control channel
//! (a USB bulk endpoint pair, a tty, or an in-memory script in tests).
//!
//! `read` and `write` take `&self`: the listener thread reads while the
//! caller thread and the unsolicited-event path write, the same way a
//! `UdpSocket` is shared between sender and receiver threads.

use std::time::Duration;

use bytes::Bytes;

use crate::error::TransportError;

/// Carriage return terminating every AT command.
pub const CR: u8 = b'\r';

/// Ctrl-Z. Terminates an SMS body and cancels a pending `>` prompt.
pub const CTRL_Z: u8 = 0x1a;

/// Raw byte channel to the modem.
pub trait Transport: Send + Sync {
    /// Write the whole buffer to the device.
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until a chunk arrives or `timeout` elapses.
    ///
    /// Must return [`TransportError::Timeout`] when nothing arrived, so the
    /// listener can tell idle periods apart from hard failures.
    fn read(&self, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Release the underlying device. Called once, after the listener has
    /// been joined.
    fn close(&self) {}
}
