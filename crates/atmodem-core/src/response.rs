//! Helpers pulling values out of query transcripts.

use std::fmt;

/// `+CSQ` reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// 0..=31, or 99 when unknown.
    pub rssi: u8,
    /// Bit error rate class 0..=7, or 99 when unknown.
    pub ber: u8,
}

impl SignalQuality {
    /// Find and parse the `+CSQ: <rssi>,<ber>` line of a transcript.
    pub fn from_transcript<S: AsRef<str>>(lines: &[S]) -> Option<Self> {
        lines.iter().find_map(|l| Self::parse(l.as_ref()))
    }

    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("+CSQ:")?;
        let (rssi, ber) = rest.split_once(',')?;
        Some(Self {
            rssi: rssi.trim().parse().ok()?,
            ber: ber.trim().parse().ok()?,
        })
    }

    /// RSSI in dBm (27.007: 0 → -113 dBm, 2 dB per step, 31 → -51 dBm).
    pub fn dbm(&self) -> Option<i32> {
        match self.rssi {
            0..=31 => Some(-113 + 2 * i32::from(self.rssi)),
            _ => None,
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dbm() {
            Some(dbm) => write!(f, "{} dBm (rssi {}, ber {})", dbm, self.rssi, self.ber),
            None => write!(f, "unknown (rssi {}, ber {})", self.rssi, self.ber),
        }
    }
}

/// Operator name from `+COPS: <mode>,<format>,"<oper>"[,<act>]`.
pub fn parse_operator<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines.iter().find_map(|l| {
        let rest = l.as_ref().trim().strip_prefix("+COPS:")?;
        quoted_field(rest, 0)
    })
}

/// Subscriber number from `+CNUM: "<alpha>","<number>",<type>`.
pub fn parse_own_number<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines.iter().find_map(|l| {
        let rest = l.as_ref().trim().strip_prefix("+CNUM:")?;
        quoted_field(rest, 1)
    })
}

/// The `n`-th double-quoted field of a response.
fn quoted_field(rest: &str, n: usize) -> Option<String> {
    rest.split('"')
        .skip(1)
        .step_by(2)
        .nth(n)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
