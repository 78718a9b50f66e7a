//! Canonical JSON byte production for hashing and signing.
//!
//! Produces RFC-8785-style canonical JSON bytes from a `serde_json::Value`
//! tree. The canonical bytes are the only form over which event hashes and
//! signatures are defined, so the rules here are load-bearing:
//!
//! - `null` / booleans emit their literal form.
//! - Numbers: non-finite values are rejected; `-0` is emitted as `0`;
//!   integers within the 2^53 safe range are emitted without a fraction;
//!   all other numbers use the shortest round-trip decimal (no trailing
//!   zeros, no `+` in exponents).
//! - Strings are Unicode-normalized to NFC, then emitted with minimal
//!   escaping (required control chars, quote, backslash only).
//! - Object keys are sorted in code-point lexicographic order.
//! - No insignificant whitespace; output is UTF-8 bytes.
//!
//! Canonicalization is deterministic: structurally equal values (after
//! absent-field removal and NFC normalization) produce identical bytes.
//!
//! # Example
//!
//! ```
//! use coc_core::canonical::canonical_string;
//! use serde_json::json;
//!
//! let value = json!({"z": 1, "a": {"y": true, "x": null}});
//! assert_eq!(
//!     canonical_string(&value).unwrap(),
//!     r#"{"a":{"x":null,"y":true},"z":1}"#
//! );
//! ```

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum recursion depth for canonicalization to prevent stack overflow.
pub const MAX_DEPTH: usize = 128;

/// Largest integer magnitude representable exactly in an IEEE-754 double.
const SAFE_INTEGER_MAX: f64 = 9_007_199_254_740_992.0; // 2^53

/// Errors that can occur during canonicalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// A non-finite number (NaN or infinity) was encountered.
    #[error("non-finite number cannot be canonicalized")]
    NonFiniteNumber,

    /// The maximum nesting depth was exceeded.
    #[error("max depth exceeded: value nested deeper than {max_depth} levels")]
    MaxDepthExceeded {
        /// The maximum depth that was exceeded.
        max_depth: usize,
    },
}

/// Canonicalizes a value to its UTF-8 byte form.
///
/// # Errors
///
/// Returns [`CanonicalError`] if the value contains a non-finite number or
/// is nested deeper than [`MAX_DEPTH`] levels.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    canonical_string(value).map(String::into_bytes)
}

/// Canonicalizes a value to its canonical string form.
///
/// # Errors
///
/// Returns [`CanonicalError`] if the value contains a non-finite number or
/// is nested deeper than [`MAX_DEPTH`] levels.
pub fn canonical_string(value: &Value) -> Result<String, CanonicalError> {
    let mut output = String::new();
    emit_value(value, &mut output, 0)?;
    Ok(output)
}

/// Checks whether a JSON text is already in canonical form.
#[must_use]
pub fn is_canonical(input: &str) -> bool {
    serde_json::from_str::<Value>(input)
        .ok()
        .and_then(|value| canonical_string(&value).ok())
        .is_some_and(|canonical| canonical == input)
}

fn emit_value(value: &Value, output: &mut String, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }

    match value {
        Value::Null => {
            output.push_str("null");
            Ok(())
        },
        Value::Bool(b) => {
            output.push_str(if *b { "true" } else { "false" });
            Ok(())
        },
        Value::Number(n) => emit_number(n, output),
        Value::String(s) => {
            emit_string(s, output);
            Ok(())
        },
        Value::Array(arr) => emit_array(arr, output, depth),
        Value::Object(obj) => emit_object(obj, output, depth),
    }
}

/// Emits a number in canonical form.
///
/// Integers pass through directly. Doubles reject non-finite values, fold
/// `-0` into `0`, emit safe-range integral values without a fraction, and
/// otherwise rely on the shortest round-trip decimal rendering.
fn emit_number(n: &Number, output: &mut String) -> Result<(), CanonicalError> {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
        return Ok(());
    }

    let f = n.as_f64().ok_or(CanonicalError::NonFiniteNumber)?;
    if !f.is_finite() {
        return Err(CanonicalError::NonFiniteNumber);
    }
    if f == 0.0 {
        // Covers -0: IEEE-754 comparison treats -0 == 0.
        output.push('0');
        return Ok(());
    }
    if f.fract() == 0.0 && f.abs() <= SAFE_INTEGER_MAX {
        #[allow(clippy::cast_possible_truncation)]
        let _ = write!(output, "{}", f as i64);
        return Ok(());
    }

    // serde_json renders finite doubles via ryu: shortest round-trip form,
    // no trailing zeros, no '+' in exponents.
    let _ = write!(output, "{n}");
    Ok(())
}

/// Emits a string in canonical form: NFC normalization followed by minimal
/// escaping per RFC 8785 Section 3.2.2.2.
///
/// Only the quotation mark, reverse solidus, and control characters U+0000
/// through U+001F are escaped; control characters use the short escapes
/// where defined and `\uXXXX` otherwise.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.nfc() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
    output.push('"');
}

fn emit_array(arr: &[Value], output: &mut String, depth: usize) -> Result<(), CanonicalError> {
    output.push('[');
    for (i, item) in arr.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_value(item, output, depth + 1)?;
    }
    output.push(']');
    Ok(())
}

/// Emits an object with keys sorted in code-point lexicographic order.
///
/// Keys are NFC-normalized before sorting so that the sort order matches
/// the emitted form.
fn emit_object(
    obj: &Map<String, Value>,
    output: &mut String,
    depth: usize,
) -> Result<(), CanonicalError> {
    let mut entries: Vec<(String, &Value)> = obj
        .iter()
        .map(|(key, value)| (key.nfc().collect::<String>(), value))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    output.push('{');
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(value, output, depth + 1)?;
    }
    output.push('}');
    Ok(())
}
