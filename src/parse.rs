//! Parsing of `rfluxmtx` flux output into view-factor values.
//!
//! The engine prints one R/G/B triple per receiver, tab-separated, with all
//! three channels identical for the glow materials this crate generates.
//! Only every third value is kept; position `i` of the result corresponds
//! to receiver `i` of the batch that produced the output.

use crate::error::ParseError;

/// Monte-Carlo noise tolerance accepted around the physical [0, 1] range.
pub const DEFAULT_EPSILON: f64 = 0.01;

/// Number of color channels per receiver in the engine output.
const CHANNELS: usize = 3;

/// Parses one engine invocation's stdout into `expected` view factors.
///
/// Fails with [`ParseError::Malformed`] on empty, non-numeric or
/// wrong-count output, and with [`ParseError::OutOfRange`] when a value
/// lies outside `[-epsilon, 1 + epsilon]`. Out-of-range values are never
/// clamped here; the caller decides whether to clamp or re-run with a
/// higher ray count.
pub fn parse_batch(
    raw: &str,
    expected: usize,
    epsilon: f64,
) -> std::result::Result<Vec<f64>, ParseError> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.is_empty() {
        return Err(ParseError::Malformed("engine output is empty".to_string()));
    }
    if fields.len() != expected * CHANNELS {
        return Err(ParseError::Malformed(format!(
            "expected {} values ({expected} receivers x {CHANNELS} channels), got {}",
            expected * CHANNELS,
            fields.len()
        )));
    }

    let mut values = Vec::with_capacity(expected);
    for (index, chunk) in fields.chunks(CHANNELS).enumerate() {
        let value: f64 = chunk[0].parse().map_err(|_| {
            ParseError::Malformed(format!("non-numeric value {:?} at position {index}", chunk[0]))
        })?;
        if !value.is_finite() {
            return Err(ParseError::Malformed(format!(
                "non-finite value {value} at position {index}"
            )));
        }
        if value < -epsilon || value > 1.0 + epsilon {
            return Err(ParseError::OutOfRange {
                value,
                index,
                epsilon,
            });
        }
        values.push(value);
    }
    Ok(values)
}
