//! Ed25519 signing and verification over the event signed-field subset.
//!
//! The signature covers exactly this set of event fields:
//! `schema_version`, `trace_id`, `event_id`, `event_type`, `created_at`,
//! `actor`, `payload_hash`, `payload_type`, `claims`, `artifacts`,
//! `prev_event_hash`. The `event_hash`, the signature itself, and any
//! local-only metadata are never signed. Field order is irrelevant on the
//! wire; the canonicalizer fixes the byte order.
//!
//! `payload_hash` in the signed bytes is always recomputed from the
//! event's current payload, so the signature transitively binds the
//! payload tree: mutating the payload invalidates the signature even
//! though the payload itself is not a signed field.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::hash::{hash_canonical, sha256_hex};
use crate::canonical::{self, CanonicalError};
use crate::event::ProtocolEvent;

/// The only signature algorithm this system produces.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// Event fields covered by the signature, identified by wire name.
const SIGNED_FIELDS: [&str; 11] = [
    "schema_version",
    "trace_id",
    "event_id",
    "event_type",
    "created_at",
    "actor",
    "payload_hash",
    "payload_type",
    "claims",
    "artifacts",
    "prev_event_hash",
];

/// Errors that can occur during signing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SignError {
    /// The event could not be serialized to a JSON tree.
    #[error("failed to serialize event for signing: {message}")]
    Serialize {
        /// Description of the problem.
        message: String,
    },

    /// Canonicalization of the signed subset failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
}

/// A detached signature over an event's signed-field subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSignature {
    /// Signature algorithm; always `ed25519`.
    pub algorithm: String,
    /// Base64 of the 64-byte Ed25519 signature.
    pub signature_b64: String,
    /// SHA-256 hex of the canonical signed bytes, recorded for diagnosis.
    pub signed_bytes_hash: String,
}

/// Extracts the signed-field subset of an event as a JSON object.
///
/// `payload_hash` is recomputed from the event's current payload rather
/// than copied, so the returned subset reflects what the payload *is*, not
/// what the event says it was.
///
/// # Errors
///
/// Returns [`SignError`] if the event cannot be serialized or the payload
/// cannot be canonicalized.
pub fn signed_field_subset(event: &ProtocolEvent) -> Result<Value, SignError> {
    let value = serde_json::to_value(event).map_err(|e| SignError::Serialize {
        message: e.to_string(),
    })?;
    let Value::Object(full) = value else {
        return Err(SignError::Serialize {
            message: "event did not serialize to an object".to_string(),
        });
    };

    let mut subset = Map::new();
    for field in SIGNED_FIELDS {
        if let Some(v) = full.get(field) {
            subset.insert(field.to_string(), v.clone());
        }
    }
    subset.insert(
        "payload_hash".to_string(),
        Value::String(hash_canonical(&event.payload)?),
    );
    Ok(Value::Object(subset))
}

/// Computes the canonical signed bytes of an event.
///
/// # Errors
///
/// Returns [`SignError`] on serialization or canonicalization failure.
fn signed_bytes(event: &ProtocolEvent) -> Result<Vec<u8>, SignError> {
    let subset = signed_field_subset(event)?;
    Ok(canonical::canonical_bytes(&subset)?)
}

/// Signs an event's designated field subset.
///
/// The event's `event_hash` and `signature` fields are ignored, so this
/// may be called on a partially-built event.
///
/// # Errors
///
/// Returns [`SignError`] on serialization or canonicalization failure.
pub fn sign_event_fields(
    signing_key: &SigningKey,
    event: &ProtocolEvent,
) -> Result<EventSignature, SignError> {
    let bytes = signed_bytes(event)?;
    let signature = signing_key.sign(&bytes);
    Ok(EventSignature {
        algorithm: SIGNATURE_ALGORITHM.to_string(),
        signature_b64: BASE64.encode(signature.to_bytes()),
        signed_bytes_hash: sha256_hex(&bytes),
    })
}

/// Verifies a signature against the event's current signed-field subset.
///
/// Returns `false` when the recorded `signed_bytes_hash` does not match
/// the recomputed bytes, when the signature is malformed, or when Ed25519
/// verification fails. Canonicalization failures also verify as `false`:
/// an event whose bytes cannot be reproduced cannot have a reproducible
/// signature.
#[must_use]
pub fn verify_event_signature(
    verifying_key: &VerifyingKey,
    event: &ProtocolEvent,
    signature: &EventSignature,
) -> bool {
    if signature.algorithm != SIGNATURE_ALGORITHM {
        return false;
    }
    let Ok(bytes) = signed_bytes(event) else {
        return false;
    };

    let actual_hash = sha256_hex(&bytes);
    let hash_matches: bool = actual_hash
        .as_bytes()
        .ct_eq(signature.signed_bytes_hash.as_bytes())
        .into();
    if !hash_matches {
        return false;
    }

    let Ok(sig_bytes) = BASE64.decode(&signature.signature_b64) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);
    verifying_key.verify(&bytes, &signature).is_ok()
}
