//! Content-addressed artifact store with deduplication and back-references.
//!
//! Blobs live under `artifacts/sha256/<p1>/<p2>/`, where `p1` and `p2` are
//! the first two byte pairs of the content hash. Next to each blob sits a
//! sidecar (`<hash>.meta.json`) carrying the artifact descriptor plus the
//! list of `(trace_id, producer_event_id)` references that wrote it, so a
//! single blob is shared by every trace that produced the same bytes.
//!
//! Writers are naturally idempotent under the content-address invariant:
//! two writers racing on the same hash either both find the blob present
//! or both write identical bytes. The first to create wins; the second
//! skips. Integrity checking of existing blobs belongs to the verifier,
//! not the writer.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::sha256_hex;
use crate::event::{ArtifactDescriptor, RedactionStatus};
use crate::home::CocHome;
use crate::schema::{self, SCHEMA_VERSION};

/// Errors that can occur during artifact store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArtifactStoreError {
    /// I/O error during blob or sidecar operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No blob exists for the given hash.
    #[error("artifact not found: {hash}")]
    NotFound {
        /// The hash that was not found.
        hash: String,
    },

    /// A sidecar file exists but cannot be parsed.
    #[error("invalid sidecar for {hash}: {message}")]
    InvalidSidecar {
        /// The hash whose sidecar is invalid.
        hash: String,
        /// Description of the problem.
        message: String,
    },

    /// A hash failed boundary validation.
    #[error(transparent)]
    Schema(#[from] schema::SchemaError),
}

/// A back-reference from a trace to an artifact it wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactReference {
    /// Trace that referenced the artifact.
    pub trace_id: String,
    /// Event within that trace that produced the reference.
    pub producer_event_id: String,
    /// When the reference was recorded (ISO-8601 ms).
    pub created_at: String,
}

/// On-disk shape of an artifact sidecar (`<hash>.meta.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactSidecar {
    /// Schema version of this record.
    pub schema_version: String,
    /// The artifact descriptor as first written.
    pub descriptor: ArtifactDescriptor,
    /// Every `(trace, event)` pair that wrote these bytes, oldest first.
    pub references: Vec<ArtifactReference>,
}

/// Content-addressed blob store rooted at `<home>/artifacts/sha256`.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates a store handle for the given home.
    #[must_use]
    pub fn new(home: &CocHome) -> Self {
        Self {
            root: home.artifacts_dir(),
        }
    }

    /// Persists `bytes` under their content hash and records the
    /// `(trace_id, producer_event_id)` reference in the sidecar.
    ///
    /// Dedup key is the artifact hash alone: if the blob already exists its
    /// contents are trusted and only the reference list grows. The returned
    /// descriptor preserves the original `created_at`, `byte_size`,
    /// `media_type`, and `encoding` on dedup.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError`] on I/O failure or if an existing
    /// sidecar cannot be parsed.
    pub fn write_artifact(
        &self,
        trace_id: &str,
        producer_event_id: &str,
        bytes: &[u8],
        media_type: &str,
        encoding: &str,
        redaction_status: RedactionStatus,
    ) -> Result<ArtifactDescriptor, ArtifactStoreError> {
        let hash = sha256_hex(bytes);
        let shard_dir = self.shard_dir(&hash);
        fs::create_dir_all(&shard_dir)?;

        let blob_path = self.blob_path(&hash);
        if !blob_path.exists() {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&blob_path)
            {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    file.sync_all()?;
                    debug!(hash = %hash, size = bytes.len(), "wrote artifact blob");
                },
                // A concurrent writer won the race; its bytes are ours.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {},
                Err(e) => return Err(e.into()),
            }
        }

        let now = schema::now_iso8601_millis();
        let reference = ArtifactReference {
            trace_id: trace_id.to_string(),
            producer_event_id: producer_event_id.to_string(),
            created_at: now.clone(),
        };

        let sidecar_path = self.sidecar_path(&hash);
        let sidecar = if sidecar_path.exists() {
            let mut sidecar = self.read_sidecar(&hash)?;
            let already_referenced = sidecar.references.iter().any(|r| {
                r.trace_id == reference.trace_id
                    && r.producer_event_id == reference.producer_event_id
            });
            if !already_referenced {
                sidecar.references.push(reference);
                self.save_sidecar(&hash, &sidecar)?;
            }
            sidecar
        } else {
            let descriptor = ArtifactDescriptor {
                artifact_hash: hash.clone(),
                hash_algorithm: "sha256".to_string(),
                media_type: media_type.to_string(),
                encoding: encoding.to_string(),
                byte_size: bytes.len() as u64,
                created_at: now,
                producer_event_id: producer_event_id.to_string(),
                storage_uri: storage_uri(&hash),
                redaction_status,
                trace_id: Some(trace_id.to_string()),
                integrity_verified_at: None,
            };
            let sidecar = ArtifactSidecar {
                schema_version: SCHEMA_VERSION.to_string(),
                descriptor,
                references: vec![reference],
            };
            self.save_sidecar(&hash, &sidecar)?;
            sidecar
        };

        // The caller embeds this descriptor in its own event, so it points
        // at the calling trace; size, type, and timestamps stay as first
        // written.
        let mut descriptor = sidecar.descriptor;
        descriptor.trace_id = Some(trace_id.to_string());
        descriptor.producer_event_id = producer_event_id.to_string();
        descriptor.redaction_status = redaction_status;
        Ok(descriptor)
    }

    /// Reads a blob's bytes by hash.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError::NotFound`] if no blob exists, or an
    /// error if the hash is malformed or the read fails.
    pub fn read_artifact(&self, hash: &str) -> Result<Vec<u8>, ArtifactStoreError> {
        schema::validate_hash(hash)?;
        let path = self.blob_path(hash);
        if !path.exists() {
            return Err(ArtifactStoreError::NotFound {
                hash: hash.to_string(),
            });
        }
        Ok(fs::read(path)?)
    }

    /// Reads an artifact's sidecar by hash.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError::NotFound`] if no sidecar exists, or an
    /// error if the hash is malformed or the sidecar cannot be parsed.
    pub fn read_descriptor(&self, hash: &str) -> Result<ArtifactSidecar, ArtifactStoreError> {
        schema::validate_hash(hash)?;
        if !self.sidecar_path(hash).exists() {
            return Err(ArtifactStoreError::NotFound {
                hash: hash.to_string(),
            });
        }
        self.read_sidecar(hash)
    }

    /// Returns `true` if a blob exists for the hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the hash is malformed.
    pub fn has_artifact(&self, hash: &str) -> Result<bool, ArtifactStoreError> {
        schema::validate_hash(hash)?;
        Ok(self.blob_path(hash).exists())
    }

    /// Filesystem path of the blob for `hash`.
    #[must_use]
    pub fn blob_path(&self, hash: &str) -> PathBuf {
        self.shard_dir(hash).join(format!("{hash}.blob"))
    }

    /// Filesystem path of the sidecar for `hash`.
    #[must_use]
    pub fn sidecar_path(&self, hash: &str) -> PathBuf {
        self.shard_dir(hash).join(format!("{hash}.meta.json"))
    }

    fn shard_dir(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[0..2]).join(&hash[2..4])
    }

    fn read_sidecar(&self, hash: &str) -> Result<ArtifactSidecar, ArtifactStoreError> {
        let contents = fs::read_to_string(self.sidecar_path(hash))?;
        serde_json::from_str(&contents).map_err(|e| ArtifactStoreError::InvalidSidecar {
            hash: hash.to_string(),
            message: e.to_string(),
        })
    }

    fn save_sidecar(
        &self,
        hash: &str,
        sidecar: &ArtifactSidecar,
    ) -> Result<(), ArtifactStoreError> {
        let serialized = serde_json::to_string_pretty(sidecar).map_err(|e| {
            ArtifactStoreError::InvalidSidecar {
                hash: hash.to_string(),
                message: e.to_string(),
            }
        })?;
        let path = self.sidecar_path(hash);
        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(serialized.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// Forward-slash relative storage URI for a hash.
fn storage_uri(hash: &str) -> String {
    format!("sha256/{}/{}/{hash}.blob", &hash[0..2], &hash[2..4])
}
