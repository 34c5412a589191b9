//! State persistence for heterogeneous components.
//!
//! Stateful components implement [`Registry`] so the process lifecycle
//! layer can snapshot and restore them without knowing their concrete
//! types. The backing [`StateStore`] is a name-to-bytes map written to a
//! JSON file with an atomic tmp-and-rename, the same way the daemon's
//! configuration would be saved.

use std::{collections::HashMap, fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::RwLock;

use crate::error::Error;

/// Save/load/apply/close contract for a persistable component.
///
/// Valid call order for one component instance: `load` (0 or 1 times),
/// then `apply` (any number of times), then `close` (exactly once).
/// `value` may be called at any point before `close`.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Stable, process-unique key identifying this component in the store.
    fn name(&self) -> &'static str;

    /// Serializes current state. An empty result means "nothing to
    /// persist" and is never treated as an error.
    async fn value(&self) -> Vec<u8>;

    /// Deserializes and adopts state. Empty input is a no-op; malformed
    /// input yields [`Error::Decode`] and leaves defaults in place.
    async fn load(&self, raw: &[u8]) -> Result<(), Error>;

    /// Pushes the loaded (or default) state into effect. Idempotent:
    /// applying the same state twice produces the same external effect.
    async fn apply(&self) -> Result<(), Error>;

    /// Releases any owned hardware or OS handle. Called exactly once;
    /// no other operation is valid afterwards.
    async fn close(&self) -> Result<(), Error>;
}

/// Process-wide key-to-bytes store backing the [`Registry`] contract.
///
/// Read once at startup and written at controlled shutdown (and whenever
/// the supervised subsystem stops, so a restarted instance sees the
/// latest state). A missing file is an empty store, not an error.
pub struct StateStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl StateStore {
    /// Opens the store at `path`, reading existing entries if present.
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("failed to parse state file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no state file at {}, starting with defaults", path.display());
                HashMap::new()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read state file: {}", path.display()));
            }
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Returns the most recently written value for `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn set(&self, name: &str, value: Vec<u8>) {
        self.entries.write().await.insert(name.to_string(), value);
    }

    /// Feeds each component its persisted value and applies it.
    ///
    /// Decode errors are logged and skipped so the component continues
    /// with defaults; apply errors propagate, since a component that
    /// cannot assert its state against hardware cannot run.
    pub async fn restore(&self, components: &[Arc<dyn Registry>]) -> Result<(), Error> {
        for component in components {
            if let Some(raw) = self.get(component.name()).await {
                if let Err(e) = component.load(&raw).await {
                    warn!("keeping defaults for \"{}\": {e}", component.name());
                }
            }
            component.apply().await?;
        }
        Ok(())
    }

    /// Collects each component's current value and writes the store file.
    ///
    /// Empty values mean "nothing to persist" and leave the previous
    /// entry untouched.
    pub async fn snapshot(&self, components: &[Arc<dyn Registry>]) -> Result<()> {
        for component in components {
            let value = component.value().await;
            if value.is_empty() {
                continue;
            }
            self.set(component.name(), value).await;
        }
        self.save().await
    }

    async fn save(&self) -> Result<()> {
        let entries = self.entries.read().await;
        let content =
            serde_json::to_string(&*entries).context("failed to serialize state store")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state dir: {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed to write temporary state to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to move state to {}", self.path.display()))?;

        info!("state saved to: {}", self.path.display());
        Ok(())
    }
}
