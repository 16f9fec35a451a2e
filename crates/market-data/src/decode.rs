//! Shared decoding helpers for exchange adapters.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;

use cxfeed_core::types::decimal::number_to_string;
use cxfeed_core::types::Level2Point;

use crate::ws::Frame;

/// Errors raised while decoding an inbound frame.
///
/// Decode errors never reach the caller: the client logs the frame and
/// drops it.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gzip inflate failed: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("binary frame is not UTF-8")]
    Utf8,
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error("no subscribed market for `{0}`")]
    UnknownMarket(String),
}

/// Text payload of a frame. Binary frames must be UTF-8 JSON.
pub fn frame_text(frame: &Frame) -> Result<Cow<'_, str>, DecodeError> {
    match frame {
        Frame::Text(s) => Ok(Cow::Borrowed(s.as_str())),
        Frame::Binary(b) => std::str::from_utf8(b)
            .map(Cow::Borrowed)
            .map_err(|_| DecodeError::Utf8),
    }
}

/// Inflate a gzip-compressed frame into text.
pub fn inflate_gzip(data: &[u8]) -> Result<String, DecodeError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = String::new();
    decoder.read_to_string(&mut out)?;
    Ok(out)
}

/// Deserialize `raw` as `T`.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    Ok(serde_json::from_str(raw)?)
}

/// Require a decimal-string field, rejecting anything that does not parse.
pub fn decimal_field(field: &'static str, value: &str) -> Result<String, DecodeError> {
    if cxfeed_core::types::decimal::is_decimal_string(value) {
        Ok(value.to_string())
    } else {
        Err(DecodeError::Invalid {
            field,
            value: value.to_string(),
        })
    }
}

/// Require a plausible millisecond timestamp.
pub fn millis_field(field: &'static str, ms: u64) -> Result<u64, DecodeError> {
    if cxfeed_core::types::timestamp::is_plausible_millis(ms) {
        Ok(ms)
    } else {
        Err(DecodeError::Invalid {
            field,
            value: ms.to_string(),
        })
    }
}

/// Build levels from `[price, size, ..]` string rows. Extra columns are
/// ignored.
pub fn string_levels(field: &'static str, rows: &[Vec<String>]) -> Result<Vec<Level2Point>, DecodeError> {
    rows.iter()
        .map(|row| match row.as_slice() {
            [price, size, ..] => Ok(Level2Point::new(
                decimal_field(field, price)?,
                decimal_field(field, size)?,
            )),
            _ => Err(DecodeError::Missing(field)),
        })
        .collect()
}

/// Build levels from `[price, size]` JSON number rows.
pub fn number_levels(
    field: &'static str,
    rows: &[[serde_json::Number; 2]],
) -> Result<Vec<Level2Point>, DecodeError> {
    rows.iter()
        .map(|[price, size]| {
            Ok(Level2Point::new(
                decimal_field(field, &number_to_string(price))?,
                decimal_field(field, &number_to_string(size))?,
            ))
        })
        .collect()
}
