//! Commands and the rules that decide when their exchange is over.

use std::fmt;

use crate::decoder::PROMPT;
use crate::transport::{CR, CTRL_Z};

/// Rule deciding which inbound line ends an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Ends on a line that is exactly `OK` (success) or `ERROR` (failure).
    ExactOk,
    /// Ends on the first line containing `OK` anywhere.
    ContainsOk,
    /// Ends on the SMS body prompt `>`.
    AwaitPrompt,
}

impl CompletionPolicy {
    /// Decide whether `line` terminates the exchange.
    ///
    /// Returns `Some(success)` on termination, `None` to keep waiting.
    pub fn evaluate(self, line: &str) -> Option<bool> {
        match self {
            CompletionPolicy::ExactOk => match line {
                "OK" => Some(true),
                "ERROR" => Some(false),
                _ => None,
            },
            CompletionPolicy::ContainsOk => line.contains("OK").then_some(true),
            CompletionPolicy::AwaitPrompt => (line == PROMPT).then_some(true),
        }
    }

    /// Whether the caller gets a status flag rather than the transcript.
    pub fn yields_status(self) -> bool {
        matches!(self, CompletionPolicy::ExactOk)
    }
}

impl fmt::Display for CompletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionPolicy::ExactOk => write!(f, "exact-ok"),
            CompletionPolicy::ContainsOk => write!(f, "contains-ok"),
            CompletionPolicy::AwaitPrompt => write!(f, "await-prompt"),
        }
    }
}

/// One outgoing payload plus the policy that ends its exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    payload: Vec<u8>,
    policy: CompletionPolicy,
}

impl Command {
    /// An AT command line. The trailing `\r` is appended here.
    pub fn at(text: impl AsRef<str>, policy: CompletionPolicy) -> Self {
        let mut payload = text.as_ref().as_bytes().to_vec();
        payload.push(CR);
        Self { payload, policy }
    }

    /// An SMS body, terminated with Ctrl-Z instead of `\r`.
    pub fn text_body(body: impl AsRef<str>) -> Self {
        let mut payload = body.as_ref().as_bytes().to_vec();
        payload.push(CTRL_Z);
        Self {
            payload,
            policy: CompletionPolicy::ContainsOk,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// Printable form for logs and errors, without terminators.
    pub fn display_text(&self) -> String {
        String::from_utf8_lossy(&self.payload)
            .trim_end_matches(|c| c == CR as char || c == CTRL_Z as char)
            .to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}

/// What an exchange produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// `ExactOk`: whether the device answered `OK`.
    Status(bool),
    /// `ContainsOk` / `AwaitPrompt`: every line of the exchange, terminator
    /// included.
    Transcript(Vec<String>),
}

impl Completion {
    /// `Status(ok)` → `ok`; a transcript counts as success since it only
    /// exists once the terminating line arrived.
    pub fn is_success(&self) -> bool {
        match self {
            Completion::Status(ok) => *ok,
            Completion::Transcript(_) => true,
        }
    }

    pub fn into_transcript(self) -> Vec<String> {
        match self {
            Completion::Status(_) => Vec::new(),
            Completion::Transcript(lines) => lines,
        }
    }
}
