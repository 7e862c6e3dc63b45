//! # Line decoding
//!
//! The modem answers in CR/LF separated ASCII lines, but a single transport
//! read may carry several lines or stop halfway through one. The decoder
//! buffers partial input across reads and emits whitespace-trimmed lines in
//! arrival order.
//!
//! The SMS body prompt (`"\r\n> "`) is never followed by a line break, so a
//! pending partial that is exactly `>` or `"> "` at the start of a line is
//! emitted immediately. Any other text containing `>` waits for its line break.

use tracing::warn;

/// Prompt the modem prints when it waits for an SMS body.
pub const PROMPT: &str = ">";

/// Stateful CR/LF line splitter.
#[derive(Debug)]
pub struct LineDecoder {
    partial: Vec<u8>,
    /// Last byte was a CR, so an immediately following LF closes nothing.
    after_cr: bool,
    /// `partial` began right after a line break (or at the start of input).
    line_start: bool,
    max_line_len: usize,
}

impl LineDecoder {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            partial: Vec::new(),
            after_cr: false,
            line_start: true,
            max_line_len: max_line_len.max(1),
        }
    }

    /// Feed one chunk and return the lines it completed.
    ///
    /// Blank lines are kept: multi-line listings use them as separators.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => {
                    self.after_cr = false;
                }
                b'\r' | b'\n' => {
                    lines.push(self.take_line());
                    self.after_cr = byte == b'\r';
                    self.line_start = true;
                }
                _ => {
                    self.after_cr = false;
                    self.partial.push(byte);
                    if self.partial.len() >= self.max_line_len {
                        warn!(len = self.partial.len(), "line exceeds limit, flushing");
                        lines.push(self.take_line());
                        self.line_start = false;
                    }
                }
            }
        }

        if self.line_start && matches!(self.partial.as_slice(), b">" | b"> ") {
            lines.push(self.take_line());
            self.line_start = false;
        }

        lines
    }

    /// Bytes received since the last line break.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    fn take_line(&mut self) -> String {
        let line = decode(&self.partial).trim().to_string();
        self.partial.clear();
        line
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_crlf_lines() {
        let mut dec = LineDecoder::new(256);
        let lines = dec.feed(b"AT+CSQ\r\r\n+CSQ: 15,99\r\n\r\nOK\r\n");
        assert_eq!(lines, vec!["AT+CSQ", "", "+CSQ: 15,99", "", "OK"]);
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn joins_line_split_across_reads() {
        let mut dec = LineDecoder::new(256);
        assert_eq!(dec.feed(b"\r\n+CS"), vec![""]);
        let lines = dec.feed(b"Q: 20,0\r\nO");
        assert_eq!(lines, vec!["+CSQ: 20,0"]);
        assert_eq!(dec.pending(), 1);
        assert_eq!(dec.feed(b"K\r\n"), vec!["OK"]);
    }

    #[test]
    fn crlf_split_across_reads_is_one_terminator() {
        let mut dec = LineDecoder::new(256);
        assert_eq!(dec.feed(b"OK\r"), vec!["OK"]);
        assert!(dec.feed(b"\n").is_empty());
    }

    #[test]
    fn prompt_is_emitted_without_line_break() {
        let mut dec = LineDecoder::new(256);
        let lines = dec.feed(b"\r\n> ");
        assert_eq!(lines, vec!["", ">"]);
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn prompt_split_from_its_line_break() {
        let mut dec = LineDecoder::new(256);
        assert_eq!(dec.feed(b"\r\n"), vec![""]);
        assert_eq!(dec.feed(b">"), vec![">"]);
        assert!(dec.feed(b" ").is_empty());
    }

    #[test]
    fn angle_bracket_text_is_not_a_prompt() {
        let mut dec = LineDecoder::new(256);
        // Quoted reply in a message body, cut by a read boundary.
        assert_eq!(dec.feed(b"\r\n>  "), vec![""]);
        assert_eq!(dec.feed(b"see you\r\n"), vec![">  see you"]);

        assert!(dec.feed(b" > ").is_empty());
        assert_eq!(dec.feed(b"\r\n"), vec![">"]);
        assert_eq!(dec.pending(), 0);
    }

    #[test]
    fn prompt_must_start_a_line() {
        let mut dec = LineDecoder::new(4);
        assert_eq!(dec.feed(b"ABCD>"), vec!["ABCD"]);
        assert_eq!(dec.pending(), 1);
        assert_eq!(dec.feed(b"\r\n"), vec![">"]);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let mut dec = LineDecoder::new(256);
        assert_eq!(dec.feed(b"  RING  \r\n"), vec!["RING"]);
    }

    #[test]
    fn overlong_line_is_flushed() {
        let mut dec = LineDecoder::new(4);
        let lines = dec.feed(b"ABCDEFG");
        assert_eq!(lines, vec!["ABCD"]);
        assert_eq!(dec.pending(), 3);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut dec = LineDecoder::new(64);
        let lines = dec.feed(b"caf\xff\r\n");
        assert_eq!(lines, vec!["caf\u{fffd}"]);
    }
}
