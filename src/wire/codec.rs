//! Quote Wire Protocol
//!
//! Fixed 22-byte binary frame, one quote per datagram.
//!
//! ```text
//! Offset  Size  Field
//! 0       3     base currency (ASCII A-Z)
//! 3       3     quote currency (ASCII A-Z)
//! 6       8     rate (IEEE-754 f64, big-endian)
//! 14      8     timestamp (u64 ms since epoch, big-endian)
//! Total: 22 bytes
//! ```
//!
//! There is no version field: both ends must agree on this layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Total frame size in bytes (3 + 3 + 8 + 8)
pub const QUOTE_FRAME_SIZE: usize = 22;

const CODE_LEN: usize = 3;
const RATE_OFFSET: usize = 6;
const TIMESTAMP_OFFSET: usize = 14;

/// Milliseconds since the Unix epoch
pub type Millis = u64;

/// Current wall clock in milliseconds since the Unix epoch
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis().max(0) as Millis
}

/// Three-letter ISO-style currency code, restricted to `A..=Z`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode([u8; CODE_LEN]);

impl CurrencyCode {
    pub const USD: CurrencyCode = CurrencyCode(*b"USD");

    /// Build a code from raw bytes, rejecting anything outside `A..=Z`
    pub fn from_bytes(bytes: [u8; CODE_LEN]) -> Result<Self, DecodeError> {
        if bytes.iter().all(u8::is_ascii_uppercase) {
            Ok(Self(bytes))
        } else {
            Err(DecodeError::InvalidCurrencyCode(bytes))
        }
    }

    pub fn as_bytes(&self) -> &[u8; CODE_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Construction guarantees ASCII
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for CurrencyCode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; CODE_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| DecodeError::InvalidCurrencyCodeText(s.to_string()))?;
        Self::from_bytes(bytes)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CurrencyCode({})", self.as_str())
    }
}

/// One currency-pair observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub base: CurrencyCode,
    pub quote: CurrencyCode,
    pub rate: f64,
    pub timestamp: Millis,
}

impl Quote {
    /// Create a quote, validating the rate the same way `decode` does
    pub fn new(
        base: CurrencyCode,
        quote: CurrencyCode,
        rate: f64,
        timestamp: Millis,
    ) -> Result<Self, DecodeError> {
        validate_rate(rate)?;
        Ok(Self {
            base,
            quote,
            rate,
            timestamp,
        })
    }

    /// Edge weight for the currency graph
    #[inline]
    pub fn neg_log_rate(&self) -> f64 {
        -self.rate.ln()
    }

    pub fn cross(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.timestamp, self.cross(), self.rate)
    }
}

/// Errors during frame decoding
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {len} bytes (expected {expected})", expected = QUOTE_FRAME_SIZE)]
    MalformedFrame { len: usize },

    #[error("invalid currency code bytes: {0:02X?}")]
    InvalidCurrencyCode([u8; CODE_LEN]),

    #[error("invalid currency code: {0:?}")]
    InvalidCurrencyCodeText(String),

    #[error("invalid rate: {0}")]
    InvalidRate(f64),
}

fn validate_rate(rate: f64) -> Result<(), DecodeError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(DecodeError::InvalidRate(rate))
    }
}

/// Serialize a quote into its 22-byte frame
pub fn encode(quote: &Quote) -> [u8; QUOTE_FRAME_SIZE] {
    let mut buf = [0u8; QUOTE_FRAME_SIZE];
    buf[..CODE_LEN].copy_from_slice(quote.base.as_bytes());
    buf[CODE_LEN..RATE_OFFSET].copy_from_slice(quote.quote.as_bytes());
    buf[RATE_OFFSET..TIMESTAMP_OFFSET].copy_from_slice(&quote.rate.to_be_bytes());
    buf[TIMESTAMP_OFFSET..].copy_from_slice(&quote.timestamp.to_be_bytes());
    buf
}

/// Parse a frame. Length is checked before any field is read.
pub fn decode(buf: &[u8]) -> Result<Quote, DecodeError> {
    let frame: &[u8; QUOTE_FRAME_SIZE] = buf
        .try_into()
        .map_err(|_| DecodeError::MalformedFrame { len: buf.len() })?;

    let base = CurrencyCode::from_bytes(read_array(frame, 0))?;
    let quote = CurrencyCode::from_bytes(read_array(frame, CODE_LEN))?;
    let rate = f64::from_be_bytes(read_array(frame, RATE_OFFSET));
    let timestamp = u64::from_be_bytes(read_array(frame, TIMESTAMP_OFFSET));

    Quote::new(base, quote, rate, timestamp)
}

#[inline]
fn read_array<const N: usize>(frame: &[u8; QUOTE_FRAME_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&frame[offset..offset + N]);
    out
}
