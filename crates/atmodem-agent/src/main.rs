//! atmodem agent
//!
//! Long-running daemon attached to one modem's AT port.
//!
//! - Health-checks the modem and reports signal, operator and own number
//! - Sends the messages queued in the config (or given on the command line)
//! - Polls the inbox, logs every message and deletes it afterwards
//! - Answers and drops incoming calls when auto-answer is on
//!
//! ## Usage
//!
//! ```bash
//! # Poll the inbox of the modem behind /dev/ttyUSB2
//! atmodem-agent --device /dev/ttyUSB2
//!
//! # Send one message, drain the inbox once, exit
//! atmodem-agent --config atmodem.toml --send-to +6584389984 --message "Test Message." --once
//! ```

mod config;
mod inbox;
mod tty;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use atmodem_core::response::{parse_own_number, SignalQuality};
use atmodem_core::ModemSession;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{AgentConfig, OutgoingMessage};
use crate::inbox::Wake;
use crate::tty::TtyTransport;

/// Modem agent daemon.
#[derive(Parser, Debug)]
#[command(name = "atmodem-agent", about = "AT modem SMS agent")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// AT port device; overrides `[device] path`.
    #[arg(long, short)]
    device: Option<PathBuf>,

    /// Recipient of a one-off message.
    #[arg(long, requires = "message")]
    send_to: Option<String>,

    /// Body of the one-off message.
    #[arg(long, requires = "send_to")]
    message: Option<String>,

    /// Run a single inbox pass and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Config ──────────────────────────────────────────────────
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    if let Some(device) = cli.device.clone() {
        config.device = Some(device);
    }
    if let (Some(number), Some(body)) = (cli.send_to.clone(), cli.message.clone()) {
        config.outgoing.push(OutgoingMessage { number, body });
    }
    let Some(device) = config.device.clone() else {
        bail!("no AT port given: pass --device or set [device] path");
    };

    tracing::info!(
        device = %device.display(),
        config_version = config.version,
        outgoing = config.outgoing.len(),
        poll_interval = ?config.inbox.poll_interval,
        once = cli.once,
        "atmodem-agent starting"
    );

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("installing signal handler")?;
    }

    // ── Session ─────────────────────────────────────────────────
    let port = TtyTransport::open(&device)
        .with_context(|| format!("opening AT port {}", device.display()))?;
    let session = ModemSession::open(Arc::new(port), config.session.clone())?;

    let result = run(&session, &config, &running, cli.once);
    session.close();
    result
}

fn run(
    session: &ModemSession,
    config: &AgentConfig,
    running: &AtomicBool,
    once: bool,
) -> anyhow::Result<()> {
    if !session.check_device_status()? {
        bail!("modem did not answer the health check");
    }
    report_identity(session);

    for msg in &config.outgoing {
        match session.send_message(&msg.number, &msg.body) {
            Ok(true) => tracing::info!(number = %msg.number, "message delivered to modem"),
            Ok(false) => tracing::warn!(number = %msg.number, "modem refused to send"),
            Err(e) => tracing::error!(number = %msg.number, error = %e, "send failed"),
        }
    }

    while running.load(Ordering::Relaxed) {
        if let Err(e) = inbox::process_inbox(session, &config.inbox) {
            tracing::error!(error = %e, "inbox pass failed");
        }
        if once {
            break;
        }
        if inbox::wait_for_next_pass(session, config.inbox.poll_interval, running) == Wake::Shutdown {
            break;
        }
    }
    Ok(())
}

/// Log signal, operator and subscriber number. Failures only warn.
fn report_identity(session: &ModemSession) {
    match session.check_signal() {
        Ok(lines) => match SignalQuality::from_transcript(&lines) {
            Some(q) => tracing::info!(signal = %q, "signal quality"),
            None => tracing::warn!(?lines, "unexpected signal response"),
        },
        Err(e) => tracing::warn!(error = %e, "signal query failed"),
    }
    match session.carrier_name() {
        Ok(Some(name)) => tracing::info!(carrier = %name, "registered"),
        Ok(None) => tracing::warn!("not registered with an operator"),
        Err(e) => tracing::warn!(error = %e, "carrier query failed"),
    }
    match session.own_number() {
        Ok(lines) => tracing::info!(number = ?parse_own_number(&lines), "own number"),
        Err(e) => tracing::warn!(error = %e, "own number query failed"),
    }
}
