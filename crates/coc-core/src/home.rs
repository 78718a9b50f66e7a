//! Filesystem root for all persisted chain-of-custody state.
//!
//! Every core component receives an explicit [`CocHome`] instead of reading
//! process-wide state; resolution of the `COC_HOME` environment variable
//! happens at the process boundary (CLI / API), never here.
//!
//! Layout under the home root:
//!
//! ```text
//! keys/registry.json
//! keys/<agent_id>.<key_id>.private.pem
//! keys/<agent_id>.<key_id>.public.pem
//! artifacts/sha256/<p1>/<p2>/<hash>.blob
//! artifacts/sha256/<p1>/<p2>/<hash>.meta.json
//! traces/<trace_id>/trace.meta.json
//! traces/<trace_id>/events.jsonl
//! traces/<trace_id>/reports/<report_id>.{json,txt}
//! traces/<trace_id>/verification.latest.json
//! ```

use std::path::{Path, PathBuf};

/// Root directory handle for a chain-of-custody store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CocHome {
    root: PathBuf,
}

impl CocHome {
    /// Creates a home handle rooted at `root`.
    ///
    /// The directory is not created here; components create the
    /// subdirectories they own on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the key registry and PEM files.
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    /// The key registry file.
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.keys_dir().join("registry.json")
    }

    /// Root of the sharded content-addressed artifact store.
    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts").join("sha256")
    }

    /// Directory holding all trace directories.
    #[must_use]
    pub fn traces_dir(&self) -> PathBuf {
        self.root.join("traces")
    }

    /// Directory for a single trace.
    #[must_use]
    pub fn trace_dir(&self, trace_id: &str) -> PathBuf {
        self.traces_dir().join(trace_id)
    }
}
