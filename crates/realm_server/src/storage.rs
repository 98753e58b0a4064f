//! JSON document storage for player fragments.
//!
//! Layout: `<data_dir>/<fragment kind>/<player id>.json`. Every write goes to
//! a temp file that is synced and then renamed over the target, so a save
//! either fully lands or leaves the previous document in place.

use realm_lifecycle::{async_trait, Component, ComponentError};
use realm_player_data::{ConnectionPool, Fragment, PersistenceError, PlayerId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A handle onto the document directory. Handles are pooled; each one is
/// used by a single persistence task at a time.
#[derive(Debug)]
pub struct JsonDocumentStore {
    root: PathBuf,
}

impl JsonDocumentStore {
    /// Opens the store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| PersistenceError::Io(root.clone(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, kind: &str, player: PlayerId) -> PathBuf {
        self.root.join(kind).join(format!("{}.json", player))
    }

    /// Reads a document; `Ok(None)` when the player has none yet.
    pub fn read<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        player: PlayerId,
    ) -> Result<Option<T>, PersistenceError> {
        let path = self.document_path(kind, player);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::Io(path, e)),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| PersistenceError::Deserialization { kind, player, source })
    }

    /// Writes a document atomically.
    pub fn write<T: Serialize>(
        &self,
        kind: &'static str,
        player: PlayerId,
        value: &T,
    ) -> Result<(), PersistenceError> {
        let path = self.document_path(kind, player);
        let json = serde_json::to_vec_pretty(value)
            .map_err(|source| PersistenceError::Serialization { kind, player, source })?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| PersistenceError::Io(dir.to_path_buf(), e))?;
        }

        let temp_path = path.with_extension("json.tmp");
        let mut file =
            fs::File::create(&temp_path).map_err(|e| PersistenceError::Io(temp_path.clone(), e))?;
        file.write_all(&json)
            .map_err(|e| PersistenceError::Io(temp_path.clone(), e))?;
        file.sync_all()
            .map_err(|e| PersistenceError::Io(temp_path.clone(), e))?;
        drop(file);

        // Atomic rename
        fs::rename(&temp_path, &path).map_err(|e| PersistenceError::Io(path.clone(), e))?;

        debug!("Wrote {} for player {}", kind, player);
        Ok(())
    }

    pub fn delete(&self, kind: &'static str, player: PlayerId) -> Result<(), PersistenceError> {
        let path = self.document_path(kind, player);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Io(path, e)),
        }
    }
}

/// Lifecycle component that owns the store pool every domain writes through.
///
/// Closing happens in `shutdown`, which runs after the player data service
/// has drained because the service depends on this component.
pub struct PersistenceBackend {
    data_dir: PathBuf,
    pool: ConnectionPool<JsonDocumentStore>,
}

impl PersistenceBackend {
    pub fn open(data_dir: impl Into<PathBuf>, pool_size: usize) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.into();
        let pool = ConnectionPool::open_with(pool_size.max(1), |_| JsonDocumentStore::open(&data_dir))?;
        Ok(Self { data_dir, pool })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Loads a fragment, or its default if the player has no document.
    pub fn load<F: Fragment>(&self, player: PlayerId) -> Result<F, PersistenceError> {
        Ok(self.try_load::<F>(player)?.unwrap_or_default())
    }

    pub fn try_load<F: Fragment>(&self, player: PlayerId) -> Result<Option<F>, PersistenceError> {
        let store = self.pool.acquire()?;
        store.read::<F>(F::KIND, player)
    }

    pub fn save<F: Fragment>(&self, player: PlayerId, fragment: &F) -> Result<(), PersistenceError> {
        let store = self.pool.acquire()?;
        store.write(F::KIND, player, fragment)
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl Component for PersistenceBackend {
    fn name(&self) -> &str {
        "PersistenceBackend"
    }

    async fn init(&self) -> Result<(), ComponentError> {
        let probe = self.data_dir.join(".probe");
        fs::write(&probe, b"ok")
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| {
                ComponentError::InitializationFailed(format!(
                    "data directory {} is not writable: {}",
                    self.data_dir.display(),
                    e
                ))
            })?;
        info!(
            "💾 Player storage at {} ({} pooled handle(s))",
            self.data_dir.display(),
            self.pool.size()
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ComponentError> {
        self.pool.close();
        Ok(())
    }
}
