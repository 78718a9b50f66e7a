//! Durable key registry: identities, PEM key material, and revocation.
//!
//! The registry file (`keys/registry.json`) lists every agent identity that
//! has ever been provisioned. Each identity owns an Ed25519 keypair stored
//! as a PKCS#8 private PEM and an SPKI public PEM next to the registry. On
//! non-Windows hosts private-key files are created with owner-only
//! read/write and the keys directory with owner-only access.
//!
//! Registry writes are serialized with an exclusive advisory lock on a
//! sibling lock file; readers tolerate last-writer-wins because each
//! identity is uniquely keyed by `(agent_id, key_id)`.
//!
//! Private keys never appear in logs, reports, event payloads, or stdout.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use spki::{DecodePublicKey, EncodePublicKey};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::hash::sha256_hex;
use crate::home::CocHome;
use crate::policy::Role;
use crate::schema::{self, SCHEMA_VERSION};

/// Number of hex chars of the public-key digest used in a key id.
const KEY_ID_DIGEST_LEN: usize = 16;

/// Errors that can occur during key registry operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyRegistryError {
    /// I/O error during registry or key file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry file is not valid JSON or fails schema validation.
    #[error("invalid registry file: {message}")]
    InvalidRegistry {
        /// Description of the problem.
        message: String,
    },

    /// No identity exists for the given key id.
    #[error("key not found: {key_id}")]
    KeyNotFound {
        /// The key id that was not found.
        key_id: String,
    },

    /// A key file exists but cannot be parsed as PEM key material.
    #[error("invalid key material for '{key_id}': {message}")]
    InvalidKeyMaterial {
        /// The key id whose material is invalid.
        key_id: String,
        /// Description of the problem.
        message: String,
    },

    /// An identifier failed boundary validation.
    #[error(transparent)]
    Schema(#[from] schema::SchemaError),
}

/// Lifecycle status of an identity's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// The key is valid for new signatures.
    Active,
    /// The key was superseded by a newer key for the same agent.
    Rotated,
    /// The key was revoked; signatures dated at or after `revoked_at` are
    /// invalid, earlier ones remain valid.
    Revoked,
}

/// A registered agent identity with its public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentIdentity {
    /// Schema version of this record.
    pub schema_version: String,

    /// Stable agent identifier (`[a-z0-9._-]+`).
    pub agent_id: String,

    /// Human-readable display name.
    pub display_name: String,

    /// Roles this agent may act in.
    pub role_capabilities: Vec<Role>,

    /// Key identifier derived from the public key.
    pub key_id: String,

    /// SPKI public key, PEM encoded.
    pub public_key: String,

    /// Signature algorithm; always `ed25519`.
    pub key_algorithm: String,

    /// Key lifecycle status.
    pub status: KeyStatus,

    /// Creation timestamp (ISO-8601 ms).
    pub created_at: String,

    /// Last update timestamp (ISO-8601 ms).
    pub updated_at: String,

    /// Revocation timestamp, present only for revoked keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,

    /// Operator-supplied reason for the revocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
}

impl AgentIdentity {
    /// Returns `true` if a signature created at `created_at` may use this
    /// key: revoked keys are invalid for events dated at or after
    /// `revoked_at` but remain valid for earlier events.
    #[must_use]
    pub fn valid_at(&self, created_at: &str) -> bool {
        match (self.status, self.revoked_at.as_deref()) {
            (KeyStatus::Revoked, Some(revoked_at)) => created_at < revoked_at,
            (KeyStatus::Revoked, None) => false,
            _ => true,
        }
    }
}

/// Signing material for one agent identity.
///
/// Holds the private key; deliberately does not implement `Serialize` and
/// redacts the key from debug output.
pub struct KeyMaterial {
    /// The identity this material belongs to.
    pub identity: AgentIdentity,
    signing_key: SigningKey,
}

impl KeyMaterial {
    /// Returns the Ed25519 signing key.
    #[must_use]
    pub const fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("agent_id", &self.identity.agent_id)
            .field("key_id", &self.identity.key_id)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// On-disk shape of `keys/registry.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    schema_version: String,
    identities: Vec<AgentIdentity>,
}

impl Default for RegistryFile {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            identities: Vec::new(),
        }
    }
}

/// Durable registry of agent identities and their key material.
pub struct KeyRegistry {
    keys_dir: PathBuf,
    registry_path: PathBuf,
}

impl KeyRegistry {
    /// Creates a registry handle for the given home.
    #[must_use]
    pub fn new(home: &CocHome) -> Self {
        Self {
            keys_dir: home.keys_dir(),
            registry_path: home.registry_path(),
        }
    }

    /// Loads key material for `agent_id`, generating and persisting a fresh
    /// Ed25519 keypair if no non-revoked identity exists yet.
    ///
    /// The key id is derived from the public key:
    /// `key_` + first 16 hex chars of SHA-256 over the SPKI DER.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError`] if the agent id is malformed, the
    /// registry cannot be read or written, or key material cannot be
    /// persisted or parsed.
    pub fn ensure_key(
        &self,
        agent_id: &str,
        display_name: &str,
        role_capabilities: &[Role],
    ) -> Result<KeyMaterial, KeyRegistryError> {
        schema::validate_identifier(agent_id)?;
        self.ensure_keys_dir()?;

        let lock_file = self.acquire_registry_lock()?;
        let result = self.ensure_key_locked(agent_id, display_name, role_capabilities);
        drop(lock_file);
        result
    }

    fn ensure_key_locked(
        &self,
        agent_id: &str,
        display_name: &str,
        role_capabilities: &[Role],
    ) -> Result<KeyMaterial, KeyRegistryError> {
        let mut registry = self.load_registry()?;

        if let Some(identity) = registry
            .identities
            .iter()
            .find(|i| i.agent_id == agent_id && i.status != KeyStatus::Revoked)
        {
            debug!(agent_id, key_id = %identity.key_id, "loading existing key material");
            let signing_key = self.load_private_key(identity)?;
            return Ok(KeyMaterial {
                identity: identity.clone(),
                signing_key,
            });
        }

        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        let verifying_key = signing_key.verifying_key();

        let public_der = verifying_key
            .to_public_key_der()
            .map_err(|e| KeyRegistryError::InvalidRegistry {
                message: format!("failed to encode public key: {e}"),
            })?;
        let digest = sha256_hex(public_der.as_bytes());
        let key_id = format!("key_{}", &digest[..KEY_ID_DIGEST_LEN]);

        let public_pem = verifying_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyRegistryError::InvalidRegistry {
                message: format!("failed to encode public key PEM: {e}"),
            })?;

        let now = schema::now_iso8601_millis();
        let identity = AgentIdentity {
            schema_version: SCHEMA_VERSION.to_string(),
            agent_id: agent_id.to_string(),
            display_name: display_name.to_string(),
            role_capabilities: role_capabilities.to_vec(),
            key_id: key_id.clone(),
            public_key: public_pem.clone(),
            key_algorithm: "ed25519".to_string(),
            status: KeyStatus::Active,
            created_at: now.clone(),
            updated_at: now,
            revoked_at: None,
            revoked_reason: None,
        };

        self.write_private_key(&identity, &signing_key)?;
        self.write_public_key(&identity, &public_pem)?;

        registry.identities.push(identity.clone());
        self.save_registry(&registry)?;

        info!(agent_id, key_id = %identity.key_id, "generated new identity keypair");
        Ok(KeyMaterial {
            identity,
            signing_key,
        })
    }

    /// Resolves an identity by key id.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError`] if the registry cannot be read; an
    /// unknown key id resolves to `None`.
    pub fn resolve_identity(
        &self,
        key_id: &str,
    ) -> Result<Option<AgentIdentity>, KeyRegistryError> {
        let registry = self.load_registry()?;
        Ok(registry
            .identities
            .into_iter()
            .find(|i| i.key_id == key_id))
    }

    /// Resolves the public verification key for a key id.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError`] if the registry cannot be read or the
    /// stored PEM is invalid; an unknown key id resolves to `None`.
    pub fn resolve_public_key(
        &self,
        key_id: &str,
    ) -> Result<Option<VerifyingKey>, KeyRegistryError> {
        let Some(identity) = self.resolve_identity(key_id)? else {
            return Ok(None);
        };
        let verifying_key = VerifyingKey::from_public_key_pem(&identity.public_key).map_err(
            |e| KeyRegistryError::InvalidKeyMaterial {
                key_id: key_id.to_string(),
                message: format!("invalid public key PEM: {e}"),
            },
        )?;
        Ok(Some(verifying_key))
    }

    /// Lists all registered identities.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError`] if the registry cannot be read.
    pub fn list_identities(&self) -> Result<Vec<AgentIdentity>, KeyRegistryError> {
        Ok(self.load_registry()?.identities)
    }

    /// Marks the identity holding `key_id` as revoked at the current time.
    ///
    /// Signatures on events dated before the revocation remain valid.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError::KeyNotFound`] if no identity holds the
    /// key id, or an I/O error if the registry cannot be rewritten.
    pub fn revoke_key(&self, key_id: &str, reason: &str) -> Result<(), KeyRegistryError> {
        self.ensure_keys_dir()?;
        let lock_file = self.acquire_registry_lock()?;

        let mut registry = self.load_registry()?;
        let Some(identity) = registry.identities.iter_mut().find(|i| i.key_id == key_id)
        else {
            drop(lock_file);
            return Err(KeyRegistryError::KeyNotFound {
                key_id: key_id.to_string(),
            });
        };

        let now = schema::now_iso8601_millis();
        identity.status = KeyStatus::Revoked;
        identity.updated_at.clone_from(&now);
        identity.revoked_at = Some(now);
        identity.revoked_reason = Some(reason.to_string());

        self.save_registry(&registry)?;
        drop(lock_file);
        info!(key_id, reason, "revoked key");
        Ok(())
    }

    fn ensure_keys_dir(&self) -> Result<(), KeyRegistryError> {
        if !self.keys_dir.exists() {
            fs::create_dir_all(&self.keys_dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&self.keys_dir, fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(())
    }

    fn acquire_registry_lock(&self) -> Result<fs::File, KeyRegistryError> {
        let lock_path = self.keys_dir.join("registry.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;
        lock_file.lock_exclusive()?;
        Ok(lock_file)
    }

    fn load_registry(&self) -> Result<RegistryFile, KeyRegistryError> {
        if !self.registry_path.exists() {
            return Ok(RegistryFile::default());
        }
        let contents = fs::read_to_string(&self.registry_path)?;
        serde_json::from_str(&contents).map_err(|e| KeyRegistryError::InvalidRegistry {
            message: e.to_string(),
        })
    }

    fn save_registry(&self, registry: &RegistryFile) -> Result<(), KeyRegistryError> {
        let serialized = serde_json::to_string_pretty(registry).map_err(|e| {
            KeyRegistryError::InvalidRegistry {
                message: e.to_string(),
            }
        })?;
        let tmp_path = self.registry_path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(serialized.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.registry_path)?;
        Ok(())
    }

    fn private_key_path(&self, identity: &AgentIdentity) -> PathBuf {
        self.keys_dir
            .join(format!("{}.{}.private.pem", identity.agent_id, identity.key_id))
    }

    fn public_key_path(&self, identity: &AgentIdentity) -> PathBuf {
        self.keys_dir
            .join(format!("{}.{}.public.pem", identity.agent_id, identity.key_id))
    }

    fn write_private_key(
        &self,
        identity: &AgentIdentity,
        signing_key: &SigningKey,
    ) -> Result<(), KeyRegistryError> {
        let pem = signing_key.to_pkcs8_pem(LineEnding::LF).map_err(|e| {
            KeyRegistryError::InvalidKeyMaterial {
                key_id: identity.key_id.clone(),
                message: format!("failed to encode private key: {e}"),
            }
        })?;
        let path = self.private_key_path(identity);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(pem.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn write_public_key(
        &self,
        identity: &AgentIdentity,
        public_pem: &str,
    ) -> Result<(), KeyRegistryError> {
        let path = self.public_key_path(identity);
        let mut file = fs::File::create(&path)?;
        file.write_all(public_pem.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn load_private_key(
        &self,
        identity: &AgentIdentity,
    ) -> Result<SigningKey, KeyRegistryError> {
        let path = self.private_key_path(identity);
        let pem = Zeroizing::new(fs::read_to_string(&path)?);
        SigningKey::from_pkcs8_pem(&pem).map_err(|e| KeyRegistryError::InvalidKeyMaterial {
            key_id: identity.key_id.clone(),
            message: format!("invalid private key PEM: {e}"),
        })
    }
}
