//! Storage collaborators for server records

use crate::error::PersistenceError;
use async_trait::async_trait;
use dashmap::DashMap;
use harbor_types::Server;
use std::path::{Path, PathBuf};
use tokio::{
    fs as tokio_fs,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, error, info, instrument};

const RECORD_SUFFIX: &str = ".server.json";

/// Where server records live between process runs.
#[async_trait]
pub trait ServerStorage: Send + Sync + std::fmt::Debug {
    /// Writes or replaces the record of `server`.
    async fn persist(&self, server: &Server) -> Result<(), PersistenceError>;

    /// Whether a record with this server name exists.
    async fn exists(&self, name: &str) -> bool;

    /// Every stored record.
    async fn load_all(&self) -> Result<Vec<Server>, PersistenceError>;
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Process-local storage, used by tests and the `memory` backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: DashMap<String, Server>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<Server> {
        self.records.get(name).map(|record| record.value().clone())
    }
}

#[async_trait]
impl ServerStorage for MemoryStorage {
    async fn persist(&self, server: &Server) -> Result<(), PersistenceError> {
        self.records.insert(server.name.clone(), server.clone());
        Ok(())
    }

    async fn exists(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    async fn load_all(&self) -> Result<Vec<Server>, PersistenceError> {
        Ok(self.records.iter().map(|record| record.value().clone()).collect())
    }
}

// ============================================================================
// JSON file storage
// ============================================================================

/// One pretty-printed JSON file per server, written atomically.
#[derive(Debug)]
pub struct JsonFileStorage {
    directory: PathBuf,
}

impl JsonFileStorage {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        if !directory.exists() {
            if let Err(e) = std::fs::create_dir_all(&directory) {
                error!("Failed to create server directory {}: {}", directory.display(), e);
            }
        }

        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Records never leave the storage directory.
    fn record_path(&self, name: &str) -> Result<PathBuf, PersistenceError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(PersistenceError::Backend(format!("unsafe record name {name:?}")));
        }
        Ok(self.directory.join(format!("{name}{RECORD_SUFFIX}")))
    }

    #[instrument(skip(self))]
    async fn load_record(&self, path: &Path) -> Result<Server, PersistenceError> {
        let mut file = tokio_fs::File::open(path)
            .await
            .map_err(|e| PersistenceError::Io(path.to_path_buf(), e))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .await
            .map_err(|e| PersistenceError::Io(path.to_path_buf(), e))?;

        serde_json::from_str(&contents).map_err(|e| PersistenceError::Deserialization(path.to_path_buf(), e))
    }
}

#[async_trait]
impl ServerStorage for JsonFileStorage {
    #[instrument(skip(self, server), fields(name = %server.name))]
    async fn persist(&self, server: &Server) -> Result<(), PersistenceError> {
        let path = self.record_path(&server.name)?;
        let temp_path = path.with_extension("tmp");

        let json = serde_json::to_string_pretty(server)
            .map_err(|e| PersistenceError::Serialization(server.name.clone(), e))?;

        let mut file = tokio_fs::File::create(&temp_path)
            .await
            .map_err(|e| PersistenceError::Io(temp_path.clone(), e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| PersistenceError::Io(temp_path.clone(), e))?;
        file.sync_all()
            .await
            .map_err(|e| PersistenceError::Io(temp_path.clone(), e))?;

        // Atomic rename
        tokio_fs::rename(&temp_path, &path)
            .await
            .map_err(|e| PersistenceError::Io(path.clone(), e))?;

        info!("Persisted server record {}", path.display());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, name: &str) -> bool {
        match self.record_path(name) {
            Ok(path) => tokio_fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    #[instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<Server>, PersistenceError> {
        let mut servers = Vec::new();
        let mut entries = tokio_fs::read_dir(&self.directory)
            .await
            .map_err(|e| PersistenceError::Io(self.directory.clone(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::Io(self.directory.clone(), e))?
        {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(RECORD_SUFFIX));
            if !is_record {
                continue;
            }

            match self.load_record(&path).await {
                Ok(server) => {
                    debug!("Loaded server record: {}", server.name);
                    servers.push(server);
                }
                Err(e) => {
                    error!("Failed to load server record from {}: {}", path.display(), e);
                    continue;
                }
            }
        }

        Ok(servers)
    }
}
