//! # SMS listing parser
//!
//! Turns the transcript of an `AT+CMGL` exchange (text mode) into records:
//!
//! ```text
//! +CMGL: 1,"REC UNREAD","+6584389984",,"21/01/01,10:00:00+32"
//! Hello there
//! +CMGL: 2,"REC READ","+6582296036",,"21/01/02,09:12:44+32"
//! first line
//! second line
//!
//! OK
//! ```
//!
//! Lines before the first header (command echo, leading blank line) are not
//! part of any record and are skipped. Records keep device order.

use crate::command::{Command, CompletionPolicy};
use crate::error::{ModemError, Result};

/// Header prefix of one listing record.
pub const LISTING_PREFIX: &str = "+CMGL: ";

/// One stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsRecord {
    /// Storage index, used for deletion.
    pub index: u32,
    /// Header fields after the prefix, verbatim.
    pub meta: String,
    /// Message body; multi-line bodies are joined with `\n`.
    pub content: String,
}

impl SmsRecord {
    /// Command removing this record from device storage.
    pub fn deletion_command(&self) -> Command {
        delete_command(self.index)
    }

    /// Status field (`REC UNREAD`, `REC READ`, ...), when present.
    pub fn status(&self) -> Option<&str> {
        self.meta_field(1)
    }

    /// Originating address, when present.
    pub fn sender(&self) -> Option<&str> {
        self.meta_field(2)
    }

    fn meta_field(&self, n: usize) -> Option<&str> {
        self.meta
            .split(',')
            .nth(n)
            .map(|f| f.trim().trim_matches('"'))
            .filter(|f| !f.is_empty())
    }
}

/// Parsed listing plus the deletion sequence that should follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmsListing {
    pub records: Vec<SmsRecord>,
}

impl SmsListing {
    /// One `AT+CMGD` per record, in listing order.
    pub fn deletion_commands(&self) -> Vec<Command> {
        self.records.iter().map(SmsRecord::deletion_command).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<SmsRecord> {
        self.records
    }
}

/// `AT+CMGD=<index>`, answered with a plain `OK`.
pub fn delete_command(index: u32) -> Command {
    Command::at(format!("AT+CMGD={}", index), CompletionPolicy::ContainsOk)
}

/// Parse the full line sequence of a listing exchange.
///
/// The last line must be `OK`. Any other shape, or a record whose index is
/// not an integer, fails the whole listing.
pub fn parse_listing<S: AsRef<str>>(lines: &[S]) -> Result<SmsListing> {
    let mut body: Vec<&str> = lines.iter().map(|l| l.as_ref()).collect();

    match body.pop().map(str::trim) {
        Some("OK") => {}
        Some(other) => {
            return Err(ModemError::MalformedResponse(format!(
                "listing ends with {:?} instead of OK",
                other
            )))
        }
        None => return Err(ModemError::MalformedResponse("empty listing".into())),
    }
    if body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }

    let mut records: Vec<SmsRecord> = Vec::new();
    for line in body {
        if let Some(meta) = line.strip_prefix(LISTING_PREFIX) {
            records.push(SmsRecord {
                index: parse_index(meta)?,
                meta: meta.to_string(),
                content: String::new(),
            });
        } else if let Some(record) = records.last_mut() {
            if !record.content.is_empty() {
                record.content.push('\n');
            }
            record.content.push_str(line);
        }
    }

    Ok(SmsListing { records })
}

fn parse_index(meta: &str) -> Result<u32> {
    let field = meta.split(',').next().unwrap_or_default().trim();
    field
        .parse()
        .map_err(|_| ModemError::MalformedResponse(format!("invalid message index {:?}", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record() {
        let lines = [
            "+CMGL: 1,\"REC UNREAD\",\"+6584389984\",,\"21/01/01,10:00:00+32\"",
            "Hello there",
            "",
            "OK",
        ];
        let listing = parse_listing(&lines).unwrap();
        assert_eq!(
            listing.records,
            vec![SmsRecord {
                index: 1,
                meta: "1,\"REC UNREAD\",\"+6584389984\",,\"21/01/01,10:00:00+32\"".into(),
                content: "Hello there".into(),
            }]
        );
        assert_eq!(listing.records[0].status(), Some("REC UNREAD"));
        assert_eq!(listing.records[0].sender(), Some("+6584389984"));
    }

    #[test]
    fn multiple_records_keep_device_order() {
        let lines = [
            "AT+CMGL=\"ALL\"",
            "",
            "+CMGL: 4,\"REC READ\",\"+6582296036\",,\"21/01/02,09:12:44+32\"",
            "first line",
            "second line",
            "+CMGL: 2,\"REC UNREAD\",\"+6584389984\",,\"21/01/01,10:00:00+32\"",
            "Hi",
            "",
            "OK",
        ];
        let listing = parse_listing(&lines).unwrap();
        let indices: Vec<u32> = listing.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![4, 2]);
        assert_eq!(listing.records[0].content, "first line\nsecond line");
        assert_eq!(listing.records[1].content, "Hi");
    }

    #[test]
    fn empty_listing_is_ok() {
        let listing = parse_listing(&["", "OK"]).unwrap();
        assert!(listing.is_empty());
        assert!(listing.deletion_commands().is_empty());
    }

    #[test]
    fn missing_ok_is_malformed() {
        let lines = ["+CMGL: 1,\"REC UNREAD\",\"+65\",,\"\"", "Hello", "ERROR"];
        assert!(matches!(
            parse_listing(&lines),
            Err(ModemError::MalformedResponse(_))
        ));
        let none: [&str; 0] = [];
        assert!(parse_listing(&none).is_err());
    }

    #[test]
    fn bad_index_is_malformed() {
        let lines = ["+CMGL: one,\"REC READ\"", "x", "", "OK"];
        let err = parse_listing(&lines).unwrap_err();
        assert!(err.to_string().contains("invalid message index"));
    }

    #[test]
    fn deletion_sequence_follows_listing() {
        let lines = ["+CMGL: 3,\"REC READ\"", "a", "+CMGL: 7,\"REC READ\"", "b", "", "OK"];
        let commands = parse_listing(&lines).unwrap().deletion_commands();
        let payloads: Vec<&[u8]> = commands.iter().map(|c| c.payload()).collect();
        assert_eq!(payloads, vec![&b"AT+CMGD=3\r"[..], &b"AT+CMGD=7\r"[..]]);
        assert!(commands
            .iter()
            .all(|c| c.policy() == CompletionPolicy::ContainsOk));
    }

    #[test]
    fn trailing_ok_is_trimmed_before_comparison() {
        let listing = parse_listing(&["+CMGL: 5,\"REC READ\"", "body", " OK "]).unwrap();
        assert_eq!(listing.records.len(), 1);
        assert_eq!(listing.records[0].content, "body");
    }
}
