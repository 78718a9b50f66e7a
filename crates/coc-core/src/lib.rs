//! # coc-core
//!
//! Core library for coc - tamper-evident, cryptographically accountable
//! execution traces for multi-agent workflows on a single host.
//!
//! Every agent action and claim is recorded as a signed event in an
//! append-only, hash-chained ledger; every referenced payload is persisted
//! as a content-addressed blob; and a deterministic verifier reproduces all
//! integrity proofs offline.
//!
//! ## Subsystems
//!
//! - **Canonicalization** ([`canonical`]): deterministic UTF-8 bytes from a
//!   JSON value tree, the only form over which hashes and signatures are
//!   defined.
//! - **Crypto** ([`crypto`]): SHA-256 hashing, Ed25519 signing, and the
//!   durable key registry.
//! - **Artifact store** ([`artifact`]): content-addressed blobs with
//!   deduplication and multi-trace back-references.
//! - **Trace store** ([`trace`]): per-trace session metadata.
//! - **Ledger** ([`ledger`]): append-only JSON-Lines event log with a
//!   per-trace exclusive lock and malformed-tail recovery.
//! - **Verifier** ([`verifier`]): ten deterministic checks over a trace
//!   snapshot producing a structured report.
//!
//! ## Example
//!
//! ```rust,no_run
//! use coc_core::home::CocHome;
//! use coc_core::trace::TraceStore;
//! use coc_core::verifier::{VerifyOptions, Verifier};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let home = CocHome::new("/var/lib/coc");
//! let traces = TraceStore::new(&home);
//! for trace_id in traces.list_trace_ids()? {
//!     let report = Verifier::new(&home).verify(&trace_id, &VerifyOptions::default())?;
//!     println!("{trace_id}: {:?}", report.verification_status);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod artifact;
pub mod canonical;
pub mod crypto;
pub mod event;
pub mod home;
pub mod ledger;
pub mod policy;
pub mod schema;
pub mod trace;
pub mod verifier;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::artifact::ArtifactStore;
    pub use crate::crypto::KeyRegistry;
    pub use crate::event::{EventBuilder, ProtocolEvent};
    pub use crate::home::CocHome;
    pub use crate::ledger::Ledger;
    pub use crate::policy::{PolicyProfile, Role};
    pub use crate::trace::TraceStore;
    pub use crate::verifier::{Verifier, VerifyOptions};
}

pub use event::ProtocolEvent;
pub use home::CocHome;
pub use verifier::report::VerificationReport;
