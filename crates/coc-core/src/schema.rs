//! Shared schema constants, identifier formats, and boundary validation.
//!
//! All persisted documents embed [`SCHEMA_VERSION`]. Identifiers other than
//! hashes are ULIDs (26-char Crockford base32); hashes are lowercase 64-char
//! hex. Uppercase hex is rejected at every read boundary.
//!
//! Timestamps are ISO-8601 UTC with millisecond precision
//! (`YYYY-MM-DDTHH:MM:SS.sssZ`). Because the format is fixed-width, the
//! serialized strings compare correctly under lexicographic order and are
//! kept as strings throughout.

use std::sync::LazyLock;

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use thiserror::Error;
use ulid::Ulid;

/// Schema version embedded in every persisted object.
pub const SCHEMA_VERSION: &str = "1.0";

/// The `prev_event_hash` of the first event in a trace: 64 zero hex chars.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Lowercase 64-char hex (SHA-256). Uppercase is rejected on read.
pub static HEX_64: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("static regex"));

/// Stable agent and key identifiers.
pub static ID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9._-]+$").expect("static regex"));

/// Claim identifiers: `claim_` followed by a ULID.
pub static CLAIM_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^claim_[0-9A-HJKMNP-TV-Z]{26}$").expect("static regex"));

/// Errors raised by boundary validation of identifiers and hashes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    /// A hash field is not lowercase 64-char hex.
    #[error("invalid hash '{value}': expected lowercase 64-char hex")]
    InvalidHash {
        /// The offending value.
        value: String,
    },

    /// An identifier is not a valid ULID.
    #[error("invalid ULID '{value}'")]
    InvalidUlid {
        /// The offending value.
        value: String,
    },

    /// An agent or key identifier contains disallowed characters.
    #[error("invalid identifier '{value}': expected [a-z0-9._-]+")]
    InvalidIdentifier {
        /// The offending value.
        value: String,
    },

    /// A claim identifier is not of the form `claim_<ULID>`.
    #[error("invalid claim id '{value}'")]
    InvalidClaimId {
        /// The offending value.
        value: String,
    },

    /// A timestamp is not in the fixed-width ISO-8601 millisecond format.
    #[error("invalid timestamp '{value}': expected YYYY-MM-DDTHH:MM:SS.sssZ")]
    InvalidTimestamp {
        /// The offending value.
        value: String,
    },

    /// A document carries an unsupported schema version.
    #[error("unsupported schema version '{found}': expected '{expected}'")]
    UnsupportedVersion {
        /// The version found in the document.
        found: String,
        /// The version this library understands.
        expected: &'static str,
    },
}

/// Returns the current UTC time as an ISO-8601 millisecond string.
#[must_use]
pub fn now_iso8601_millis() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Generates a fresh ULID string.
#[must_use]
pub fn new_ulid() -> String {
    Ulid::new().to_string()
}

/// Generates a fresh claim identifier (`claim_<ULID>`).
#[must_use]
pub fn new_claim_id() -> String {
    format!("claim_{}", Ulid::new())
}

/// Generates a fresh report identifier (`report_<ULID>`).
#[must_use]
pub fn new_report_id() -> String {
    format!("report_{}", Ulid::new())
}

/// Validates a lowercase SHA-256 hex hash.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidHash`] if the value is not 64 lowercase hex
/// chars (uppercase hex is rejected per the normative read rule).
pub fn validate_hash(value: &str) -> Result<(), SchemaError> {
    if HEX_64.is_match(value) {
        Ok(())
    } else {
        Err(SchemaError::InvalidHash {
            value: value.to_string(),
        })
    }
}

/// Validates a ULID string.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidUlid`] if the value does not parse as a
/// 26-char Crockford base32 ULID.
pub fn validate_ulid(value: &str) -> Result<(), SchemaError> {
    if value.len() == 26 && Ulid::from_string(value).is_ok() {
        Ok(())
    } else {
        Err(SchemaError::InvalidUlid {
            value: value.to_string(),
        })
    }
}

/// Validates an agent or key identifier.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidIdentifier`] on disallowed characters.
pub fn validate_identifier(value: &str) -> Result<(), SchemaError> {
    if ID_CHARS.is_match(value) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            value: value.to_string(),
        })
    }
}

/// Validates a claim identifier of the form `claim_<ULID>`.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidClaimId`] on format mismatch.
pub fn validate_claim_id(value: &str) -> Result<(), SchemaError> {
    if CLAIM_ID.is_match(value) {
        Ok(())
    } else {
        Err(SchemaError::InvalidClaimId {
            value: value.to_string(),
        })
    }
}

/// Validates an ISO-8601 UTC millisecond timestamp
/// (`YYYY-MM-DDTHH:MM:SS.sssZ`).
///
/// # Errors
///
/// Returns [`SchemaError::InvalidTimestamp`] if the value is not in the
/// fixed-width format.
pub fn validate_timestamp(value: &str) -> Result<(), SchemaError> {
    let well_formed = value.len() == 24
        && value.ends_with('Z')
        && chrono::DateTime::parse_from_rfc3339(value).is_ok();
    if well_formed {
        Ok(())
    } else {
        Err(SchemaError::InvalidTimestamp {
            value: value.to_string(),
        })
    }
}

/// Checks a document's `schema_version` against [`SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns [`SchemaError::UnsupportedVersion`] on mismatch.
pub fn validate_schema_version(found: &str) -> Result<(), SchemaError> {
    if found == SCHEMA_VERSION {
        Ok(())
    } else {
        Err(SchemaError::UnsupportedVersion {
            found: found.to_string(),
            expected: SCHEMA_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_hash_shape() {
        assert_eq!(GENESIS_PREV_HASH.len(), 64);
        assert!(validate_hash(GENESIS_PREV_HASH).is_ok());
    }

    #[test]
    fn test_hash_rejects_uppercase() {
        let upper = GENESIS_PREV_HASH.replace('0', "A");
        assert!(matches!(
            validate_hash(&upper),
            Err(SchemaError::InvalidHash { .. })
        ));
    }

    #[test]
    fn test_hash_rejects_short() {
        assert!(validate_hash("abc123").is_err());
    }

    #[test]
    fn test_ulid_roundtrip() {
        let id = new_ulid();
        assert_eq!(id.len(), 26);
        assert!(validate_ulid(&id).is_ok());
    }

    #[test]
    fn test_ulid_rejects_garbage() {
        assert!(validate_ulid("not-a-ulid").is_err());
        // Crockford base32 excludes I, L, O, U
        assert!(validate_ulid("IIIIIIIIIIIIIIIIIIIIIIIIII").is_err());
    }

    #[test]
    fn test_claim_id_format() {
        let claim = new_claim_id();
        assert!(validate_claim_id(&claim).is_ok());
        assert!(validate_claim_id("claim_xyz").is_err());
        assert!(validate_claim_id(&new_ulid()).is_err());
    }

    #[test]
    fn test_identifier_charset() {
        assert!(validate_identifier("agent.executor-1_a").is_ok());
        assert!(validate_identifier("Agent").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a b").is_err());
    }

    #[test]
    fn test_timestamp_shape() {
        let ts = now_iso8601_millis();
        // Fixed-width: YYYY-MM-DDTHH:MM:SS.sssZ
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn test_timestamps_order_lexicographically() {
        let a = "2026-01-01T00:00:00.000Z";
        let b = "2026-01-01T00:00:00.001Z";
        assert!(a < b);
    }

    #[test]
    fn test_timestamp_validation() {
        assert!(validate_timestamp("2026-08-02T12:34:56.789Z").is_ok());
        assert!(validate_timestamp("2026-08-02T12:34:56Z").is_err());
        assert!(validate_timestamp("2026-08-02 12:34:56.789Z").is_err());
        assert!(validate_timestamp(&now_iso8601_millis()).is_ok());
    }

    #[test]
    fn test_schema_version_gate() {
        assert!(validate_schema_version(SCHEMA_VERSION).is_ok());
        assert!(matches!(
            validate_schema_version("0.9"),
            Err(SchemaError::UnsupportedVersion { .. })
        ));
    }
}
