//! Human readable byte sizes, used to configure body limits.
//!
//! A limit is written as a number followed by an optional unit, e.g. `1 byte`,
//! `100kb` or `1.5 MB`. Units are 1024 based; a bare number counts bytes.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const KB: f64 = 1024.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteLimit {
    bytes: u64,
    source: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid byte size '{input}'")]
pub struct ParseByteLimitError {
    input: String,
}

impl ByteLimit {
    /// A limit of exactly `bytes`, displayed as `<bytes>b`.
    pub fn from_bytes(bytes: u64) -> Self {
        Self { bytes, source: format!("{bytes}b") }
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns true when `len` bytes no longer fit in this limit.
    #[inline]
    pub fn is_exceeded_by(&self, len: u64) -> bool {
        len > self.bytes
    }
}

/// One megabyte, the default limit of buffered bodies.
impl Default for ByteLimit {
    fn default() -> Self {
        Self { bytes: 1024 * 1024, source: "1mb".to_string() }
    }
}

impl FromStr for ByteLimit {
    type Err = ParseByteLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let error = || ParseByteLimitError { input: s.to_string() };
        let trimmed = s.trim();

        let split = trimmed.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        if number.is_empty() {
            return Err(error());
        }

        let value: f64 = number.parse().map_err(|_| error())?;
        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" | "byte" | "bytes" => 1.0,
            "kb" => KB,
            "mb" => KB * KB,
            "gb" => KB * KB * KB,
            "tb" => KB * KB * KB * KB,
            "pb" => KB * KB * KB * KB * KB,
            _ => return Err(error()),
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "value is a finite positive number")]
        let bytes = (value * multiplier).floor() as u64;
        Ok(Self { bytes, source: trimmed.to_string() })
    }
}

impl TryFrom<&str> for ByteLimit {
    type Error = ParseByteLimitError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<u64> for ByteLimit {
    fn from(bytes: u64) -> Self {
        Self::from_bytes(bytes)
    }
}

impl fmt::Display for ByteLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::ByteLimit;

    #[test]
    fn test_parse_units() {
        assert_eq!("1 byte".parse::<ByteLimit>().unwrap().bytes(), 1);
        assert_eq!("10".parse::<ByteLimit>().unwrap().bytes(), 10);
        assert_eq!("100kb".parse::<ByteLimit>().unwrap().bytes(), 100 * 1024);
        assert_eq!("1MB".parse::<ByteLimit>().unwrap().bytes(), 1024 * 1024);
        assert_eq!("1.5 kb".parse::<ByteLimit>().unwrap().bytes(), 1536);
        assert_eq!("2gb".parse::<ByteLimit>().unwrap().bytes(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_display_keeps_source() {
        let limit: ByteLimit = "1 byte".parse().unwrap();
        assert_eq!(limit.to_string(), "1 byte");
        assert_eq!(ByteLimit::from_bytes(42).to_string(), "42b");
    }

    #[test]
    fn test_invalid() {
        assert!("".parse::<ByteLimit>().is_err());
        assert!("kb".parse::<ByteLimit>().is_err());
        assert!("12 parsecs".parse::<ByteLimit>().is_err());
    }

    #[test]
    fn test_exceeded() {
        let limit = ByteLimit::from_bytes(3);
        assert!(!limit.is_exceeded_by(3));
        assert!(limit.is_exceeded_by(4));
    }
}
