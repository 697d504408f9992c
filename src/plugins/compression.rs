//! Run-length compression for large string values.
//!
//! Encoded strings carry the `__rle__:` prefix. A run is written as
//! `~<count>~<char>`; other characters are copied through. `~` itself is
//! always written as a run so decoding is unambiguous.

use serde_json::Value;
use tracing::warn;

use crate::plugins::{PendingWrite, Plugin, Veto};

pub const SENTINEL: &str = "__rle__:";
const ESCAPE: char = '~';
const MIN_RUN: usize = 4;

/// Compresses string values of at least `threshold` characters.
#[derive(Debug, Clone)]
pub struct CompressionPlugin {
    threshold: usize,
}

impl CompressionPlugin {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Encoded form of `input`, or None when encoding would not shrink it.
    ///
    /// Strings that already start with the sentinel are always encoded, so
    /// reads never mistake a plain value for a compressed one.
    pub fn compress(&self, input: &str) -> Option<String> {
        let encoded = format!("{}{}", SENTINEL, encode(input));
        if input.starts_with(SENTINEL) {
            return Some(encoded);
        }
        if input.chars().count() < self.threshold {
            return None;
        }
        (encoded.len() < input.len()).then_some(encoded)
    }

    /// Decoded form of a sentinel-marked string. Plain strings pass through.
    pub fn decompress(&self, input: &str) -> Option<String> {
        input.strip_prefix(SENTINEL).and_then(decode)
    }
}

impl Default for CompressionPlugin {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        if run >= MIN_RUN || c == ESCAPE {
            out.push(ESCAPE);
            out.push_str(&run.to_string());
            out.push(ESCAPE);
            out.push(c);
        } else {
            out.extend(std::iter::repeat(c).take(run));
        }
    }
    out
}

fn decode(input: &str) -> Option<String> {
    let mut out = String::with_capacity(input.len() * 2);
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        loop {
            match chars.next()? {
                ESCAPE => break,
                d if d.is_ascii_digit() => digits.push(d),
                _ => return None,
            }
        }
        let run: usize = digits.parse().ok()?;
        let repeated = chars.next()?;
        out.extend(std::iter::repeat(repeated).take(run));
    }
    Some(out)
}

impl Plugin for CompressionPlugin {
    fn name(&self) -> &str {
        "compression"
    }

    fn before_set(&self, _key: &str, mut write: PendingWrite) -> Result<PendingWrite, Veto> {
        if let Value::String(s) = &write.value {
            if let Some(encoded) = self.compress(s) {
                write.value = Value::String(encoded);
            }
        }
        Ok(write)
    }

    fn after_get(&self, key: &str, value: Value) -> Value {
        match &value {
            Value::String(s) if s.starts_with(SENTINEL) => match self.decompress(s) {
                Some(plain) => Value::String(plain),
                None => {
                    warn!(key, "Malformed compressed value, returning it unchanged");
                    value
                }
            },
            _ => value,
        }
    }
}
