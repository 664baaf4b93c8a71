//! Wire message codec
//!
//! Messages travel as newline-terminated ASCII lines of the form
//! `SEQ=<n>|TS=<unix-seconds>|DATA=<payload>`. The payload may contain `=`
//! but never `|`.

use std::collections::HashMap;
use std::fmt;

use bytes::{Bytes, BytesMut};

pub const KEY_SEQ: &str = "SEQ";
pub const KEY_TS: &str = "TS";
pub const KEY_DATA: &str = "DATA";

/// A line longer than this without a newline is cut and handed on as-is.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// One decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sequence: u64,
    /// Sender clock, unix seconds.
    pub timestamp: u64,
    pub payload: String,
}

impl Message {
    pub fn new(sequence: u64, timestamp: u64, payload: impl Into<String>) -> Self {
        Self {
            sequence,
            timestamp,
            payload: payload.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}|{}={}|{}={}",
            KEY_SEQ, self.sequence, KEY_TS, self.timestamp, KEY_DATA, self.payload
        )
    }
}

/// Why a line failed to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationReason {
    /// A `|`-separated part had no `=`.
    MalformedField(String),
    MissingField(&'static str),
    DuplicateField(String),
    UnexpectedField(String),
    NotANumber { field: &'static str, value: String },
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedField(part) => write!(f, "malformed field '{}'", part),
            Self::MissingField(key) => write!(f, "missing field {}", key),
            Self::DuplicateField(key) => write!(f, "duplicate field {}", key),
            Self::UnexpectedField(key) => write!(f, "unexpected field {}", key),
            Self::NotANumber { field, value } => {
                write!(f, "{} is not a number: '{}'", field, value)
            }
        }
    }
}

/// A line that could not be decoded into a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Message integrity violation ({reason}): {raw}")]
pub struct IntegrityViolation {
    /// The offending line, untouched.
    pub raw: String,
    pub reason: ViolationReason,
}

/// Format a message without the trailing newline.
pub fn encode(sequence: u64, timestamp: u64, payload: &str) -> String {
    format!(
        "{}={}|{}={}|{}={}",
        KEY_SEQ, sequence, KEY_TS, timestamp, KEY_DATA, payload
    )
}

/// Format a message as one newline-terminated stream line.
pub fn encode_line(sequence: u64, timestamp: u64, payload: &str) -> Bytes {
    let mut line = encode(sequence, timestamp, payload);
    line.push('\n');
    Bytes::from(line)
}

/// Decode one line (without its newline).
pub fn decode(line: &str) -> Result<Message, IntegrityViolation> {
    let violation = |reason| IntegrityViolation {
        raw: line.to_string(),
        reason,
    };

    let mut fields: HashMap<&str, &str> = HashMap::with_capacity(3);
    for part in line.split('|') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| violation(ViolationReason::MalformedField(part.to_string())))?;
        if !matches!(key, KEY_SEQ | KEY_TS | KEY_DATA) {
            return Err(violation(ViolationReason::UnexpectedField(key.to_string())));
        }
        if fields.insert(key, value).is_some() {
            return Err(violation(ViolationReason::DuplicateField(key.to_string())));
        }
    }

    let field = |key: &'static str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| violation(ViolationReason::MissingField(key)))
    };
    let number = |key: &'static str| -> Result<u64, IntegrityViolation> {
        let value = field(key)?;
        value.parse::<u64>().map_err(|_| {
            violation(ViolationReason::NotANumber {
                field: key,
                value: value.to_string(),
            })
        })
    };

    Ok(Message {
        sequence: number(KEY_SEQ)?,
        timestamp: number(KEY_TS)?,
        payload: field(KEY_DATA)?.to_string(),
    })
}

/// Splits a byte stream into trimmed, non-empty text lines.
///
/// A read may carry several lines or end mid-line; the partial tail is
/// kept until the next push.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: BytesMut,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read's worth of bytes, returning every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.pending.split_to(pos + 1);
            lines.extend(clean_line(&line[..pos]));
            self.scanned = 0;
        }
        self.scanned = self.pending.len();

        if self.pending.len() > MAX_LINE_LEN {
            let line = self.pending.split();
            lines.extend(clean_line(&line));
            self.scanned = 0;
        }

        lines
    }

    /// Hand back the unterminated tail once the peer has closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.pending.split();
        self.scanned = 0;
        clean_line(&rest)
    }

    /// Bytes held while waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn clean_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
