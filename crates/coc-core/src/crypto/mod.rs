//! Cryptographic primitives for the chain-of-custody ledger.
//!
//! This module provides the hash and signature layer under the event chain:
//!
//! - **SHA-256 hashing**: digests over canonical bytes, raw bytes, and
//!   streamed files
//! - **Ed25519 signatures**: signing and verification over the canonical
//!   bytes of an event's signed-field subset
//! - **Key registry**: durable mapping from key id to identity and public
//!   key, with private-key material held on disk under owner-only modes
//!
//! # Hash chain
//!
//! Each event's `event_hash` covers the canonical encoding of the event with
//! the `event_hash` field omitted, which means the signature and the
//! `prev_event_hash` link are both bound into the chain. Any tampering with
//! a historical event breaks the chain.
//!
//! # Signatures
//!
//! Signatures cover a fixed subset of event fields (never `event_hash` or
//! the signature itself). The canonicalizer fixes the byte order, so
//! producers and verifiers agree on the signed bytes without sharing any
//! field ordering out of band.

mod hash;
mod keys;
mod sign;

pub use hash::{hash_canonical, hash_file, sha256_hex};
pub use keys::{AgentIdentity, KeyMaterial, KeyRegistry, KeyRegistryError, KeyStatus};
pub use sign::{
    EventSignature, SignError, SIGNATURE_ALGORITHM, sign_event_fields, signed_field_subset,
    verify_event_signature,
};
