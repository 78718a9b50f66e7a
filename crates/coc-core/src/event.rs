//! The atomic ledger record: [`ProtocolEvent`] and its builder.
//!
//! Events are written once and never edited. Integrity is layered:
//!
//! 1. `payload_hash` covers the canonical bytes of the opaque payload tree.
//! 2. The signature covers a fixed subset of fields (including
//!    `payload_hash` and `prev_event_hash`, excluding `event_hash` and the
//!    signature itself).
//! 3. `event_hash` covers the canonical bytes of the whole event with the
//!    `event_hash` field omitted, binding the signature to its chain
//!    position.
//!
//! [`EventBuilder`] is the producer-side path: it assigns the event id and
//! timestamp, hashes the payload, signs the designated subset, and seals
//! the event hash.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::canonical::CanonicalError;
use crate::crypto::{hash_canonical, EventSignature, SignError};
use crate::policy::Role;
use crate::schema::{self, SCHEMA_VERSION};

/// All event types a trace may contain. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A trace session was opened.
    SessionInitialized,
    /// The planner produced a proposal.
    ProposalCreated,
    /// The critic reviewed a proposal.
    ProposalReviewed,
    /// The executor committed to a tool invocation.
    ToolIntentSigned,
    /// A tool invocation started.
    ToolExecutionStarted,
    /// A tool invocation completed.
    ToolExecutionCompleted,
    /// A tool invocation failed.
    ToolExecutionFailed,
    /// An artifact was persisted to the store.
    ArtifactRecorded,
    /// The executor issued a claim backed by evidence artifacts.
    ClaimIssued,
    /// The critic challenged a claim.
    ClaimChallenged,
    /// The executor signed the final statement.
    FinalStatementSigned,
    /// The auditor started a verification run.
    VerificationRunStarted,
    /// The auditor completed a verification run.
    VerificationRunCompleted,
}

impl EventType {
    /// All event types, in protocol order.
    pub const ALL: [Self; 13] = [
        Self::SessionInitialized,
        Self::ProposalCreated,
        Self::ProposalReviewed,
        Self::ToolIntentSigned,
        Self::ToolExecutionStarted,
        Self::ToolExecutionCompleted,
        Self::ToolExecutionFailed,
        Self::ArtifactRecorded,
        Self::ClaimIssued,
        Self::ClaimChallenged,
        Self::FinalStatementSigned,
        Self::VerificationRunStarted,
        Self::VerificationRunCompleted,
    ];

    /// The wire name (`snake_case`) of this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionInitialized => "session_initialized",
            Self::ProposalCreated => "proposal_created",
            Self::ProposalReviewed => "proposal_reviewed",
            Self::ToolIntentSigned => "tool_intent_signed",
            Self::ToolExecutionStarted => "tool_execution_started",
            Self::ToolExecutionCompleted => "tool_execution_completed",
            Self::ToolExecutionFailed => "tool_execution_failed",
            Self::ArtifactRecorded => "artifact_recorded",
            Self::ClaimIssued => "claim_issued",
            Self::ClaimChallenged => "claim_challenged",
            Self::FinalStatementSigned => "final_statement_signed",
            Self::VerificationRunStarted => "verification_run_started",
            Self::VerificationRunCompleted => "verification_run_completed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// The actor that produced an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorRef {
    /// Stable agent identifier.
    pub agent_id: String,
    /// Role the agent acted in for this event.
    pub role: Role,
    /// Key the event was (or would be) signed with.
    pub key_id: String,
}

/// Redaction state of an artifact's stored bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedactionStatus {
    /// Bytes are stored as produced.
    #[serde(rename = "none")]
    None,
    /// Bytes were redacted before storage.
    #[serde(rename = "redacted")]
    Redacted,
    /// Bytes were redacted; a pointer to the unredacted source exists
    /// elsewhere.
    #[serde(rename = "redacted-with-pointer")]
    RedactedWithPointer,
}

/// Descriptor for a content-addressed artifact referenced by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactDescriptor {
    /// SHA-256 of the raw bytes (pre-redaction, pre-compression).
    pub artifact_hash: String,
    /// Hash algorithm; always `sha256`.
    pub hash_algorithm: String,
    /// Media type of the stored bytes.
    pub media_type: String,
    /// Content encoding of the stored bytes.
    pub encoding: String,
    /// Size of the stored bytes.
    pub byte_size: u64,
    /// Creation timestamp (ISO-8601 ms).
    pub created_at: String,
    /// The event that produced this artifact.
    pub producer_event_id: String,
    /// Forward-slash relative path under the artifact root.
    pub storage_uri: String,
    /// Redaction state of the stored bytes.
    pub redaction_status: RedactionStatus,
    /// Trace the descriptor was produced in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Timestamp of the last successful integrity verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_verified_at: Option<String>,
}

impl ArtifactDescriptor {
    /// Validates identifier and hash fields at a read boundary.
    ///
    /// # Errors
    ///
    /// Returns the first [`schema::SchemaError`] encountered.
    pub fn validate(&self) -> Result<(), schema::SchemaError> {
        schema::validate_hash(&self.artifact_hash)?;
        schema::validate_ulid(&self.producer_event_id)?;
        schema::validate_timestamp(&self.created_at)?;
        Ok(())
    }
}

/// The atomic, signed, hash-chained ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolEvent {
    /// Schema version of this record.
    pub schema_version: String,
    /// Trace this event belongs to.
    pub trace_id: String,
    /// Unique event identifier (ULID).
    pub event_id: String,
    /// Event type.
    pub event_type: EventType,
    /// Creation timestamp (ISO-8601 ms).
    pub created_at: String,
    /// The producing actor.
    pub actor: ActorRef,
    /// SHA-256 of the canonical payload bytes.
    pub payload_hash: String,
    /// `event_hash` of the predecessor, or the genesis hash for the first
    /// event.
    pub prev_event_hash: String,
    /// SHA-256 of the canonical event bytes with this field omitted.
    pub event_hash: String,
    /// Signature over the designated field subset, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<EventSignature>,
    /// Discriminator for the payload tree.
    pub payload_type: String,
    /// Opaque payload tree.
    pub payload: Value,
    /// Claim ids issued or referenced by this event.
    pub claims: Vec<String>,
    /// Artifacts referenced by this event.
    pub artifacts: Vec<ArtifactDescriptor>,
}

impl ProtocolEvent {
    /// Serializes the event with the `event_hash` field omitted, the form
    /// the event hash is defined over.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialize`] if the event cannot be converted
    /// to a JSON tree.
    pub fn hashable_value(&self) -> Result<Value, EventError> {
        let mut value = serde_json::to_value(self).map_err(|e| EventError::Serialize {
            message: e.to_string(),
        })?;
        if let Value::Object(map) = &mut value {
            map.remove("event_hash");
        }
        Ok(value)
    }

    /// Recomputes this event's hash from its current contents.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if serialization or canonicalization fails.
    pub fn compute_event_hash(&self) -> Result<String, EventError> {
        let value = self.hashable_value()?;
        Ok(hash_canonical(&value)?)
    }

    /// Validates identifier, hash, and timestamp fields at a read boundary.
    ///
    /// Structural conformance (field presence, closed enums) is enforced by
    /// deserialization; this adds the format rules that serde cannot see.
    ///
    /// # Errors
    ///
    /// Returns the first [`schema::SchemaError`] encountered.
    pub fn validate(&self) -> Result<(), schema::SchemaError> {
        schema::validate_schema_version(&self.schema_version)?;
        schema::validate_ulid(&self.trace_id)?;
        schema::validate_ulid(&self.event_id)?;
        schema::validate_timestamp(&self.created_at)?;
        schema::validate_identifier(&self.actor.agent_id)?;
        schema::validate_identifier(&self.actor.key_id)?;
        schema::validate_hash(&self.payload_hash)?;
        schema::validate_hash(&self.prev_event_hash)?;
        schema::validate_hash(&self.event_hash)?;
        for claim in &self.claims {
            schema::validate_claim_id(claim)?;
        }
        for artifact in &self.artifacts {
            artifact.validate()?;
        }
        Ok(())
    }
}

/// Errors that can occur while building or hashing events.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EventError {
    /// The event could not be serialized to a JSON tree.
    #[error("failed to serialize event: {message}")]
    Serialize {
        /// Description of the problem.
        message: String,
    },

    /// Canonicalization of event bytes failed.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// Signing failed.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// A required builder field was not provided.
    #[error("event builder missing required field: {field}")]
    Incomplete {
        /// The missing field.
        field: &'static str,
    },
}

/// Producer-side builder that assembles, signs, and seals an event.
#[derive(Debug)]
pub struct EventBuilder {
    trace_id: String,
    event_id: Option<String>,
    event_type: EventType,
    actor: Option<ActorRef>,
    payload_type: String,
    payload: Value,
    claims: Vec<String>,
    artifacts: Vec<ArtifactDescriptor>,
    prev_event_hash: Option<String>,
}

impl EventBuilder {
    /// Starts a builder for an event of `event_type` in `trace_id`.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            trace_id: trace_id.into(),
            event_id: None,
            event_type,
            actor: None,
            payload_type: event_type.as_str().to_string(),
            payload: Value::Object(serde_json::Map::new()),
            claims: Vec::new(),
            artifacts: Vec::new(),
            prev_event_hash: None,
        }
    }

    /// Uses a pre-allocated event id instead of generating one.
    ///
    /// Producers that persist artifacts before emitting the recording event
    /// allocate the id first so the descriptors can point back at it.
    #[must_use]
    pub fn event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Sets the producing actor.
    #[must_use]
    pub fn actor(mut self, agent_id: impl Into<String>, role: Role, key_id: impl Into<String>) -> Self {
        self.actor = Some(ActorRef {
            agent_id: agent_id.into(),
            role,
            key_id: key_id.into(),
        });
        self
    }

    /// Sets the payload tree and its type discriminator.
    #[must_use]
    pub fn payload(mut self, payload_type: impl Into<String>, payload: Value) -> Self {
        self.payload_type = payload_type.into();
        self.payload = payload;
        self
    }

    /// Adds a claim id.
    #[must_use]
    pub fn claim(mut self, claim_id: impl Into<String>) -> Self {
        self.claims.push(claim_id.into());
        self
    }

    /// Adds an artifact descriptor.
    #[must_use]
    pub fn artifact(mut self, descriptor: ArtifactDescriptor) -> Self {
        self.artifacts.push(descriptor);
        self
    }

    /// Sets the predecessor hash (the trace head at append time).
    #[must_use]
    pub fn prev_event_hash(mut self, hash: impl Into<String>) -> Self {
        self.prev_event_hash = Some(hash.into());
        self
    }

    /// Builds a signed event: hashes the payload, signs the designated
    /// subset with `signing_key`, then seals the event hash.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if a required field is missing or hashing or
    /// signing fails.
    pub fn build_signed(
        self,
        signing_key: &ed25519_dalek::SigningKey,
    ) -> Result<ProtocolEvent, EventError> {
        let mut event = self.assemble()?;
        let signature = crate::crypto::sign_event_fields(signing_key, &event)?;
        event.signature = Some(signature);
        event.event_hash = event.compute_event_hash()?;
        Ok(event)
    }

    /// Builds an unsigned event (legal only for types outside the
    /// required-signed set).
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if a required field is missing or hashing
    /// fails.
    pub fn build_unsigned(self) -> Result<ProtocolEvent, EventError> {
        let mut event = self.assemble()?;
        event.event_hash = event.compute_event_hash()?;
        Ok(event)
    }

    fn assemble(self) -> Result<ProtocolEvent, EventError> {
        let actor = self.actor.ok_or(EventError::Incomplete { field: "actor" })?;
        let prev_event_hash = self
            .prev_event_hash
            .ok_or(EventError::Incomplete {
                field: "prev_event_hash",
            })?;
        let payload_hash = hash_canonical(&self.payload)?;

        Ok(ProtocolEvent {
            schema_version: SCHEMA_VERSION.to_string(),
            trace_id: self.trace_id,
            event_id: self.event_id.unwrap_or_else(schema::new_ulid),
            event_type: self.event_type,
            created_at: schema::now_iso8601_millis(),
            actor,
            payload_hash,
            prev_event_hash,
            event_hash: String::new(),
            signature: None,
            payload_type: self.payload_type,
            payload: self.payload,
            claims: self.claims,
            artifacts: self.artifacts,
        })
    }
}
