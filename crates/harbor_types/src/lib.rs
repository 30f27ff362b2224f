//! Core types shared by every Harbor crate
//!
//! This module holds the server entity, its lifecycle state machine and the
//! shared handle through which the server manager and composition pipeline
//! access a server concurrently.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

// ============================================================================
// Core Identifiers
// ============================================================================

/// Unique identifier for servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub Uuid);

impl ServerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to the container backing a server.
///
/// Issued by the container collaborator; Harbor never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef(pub String);

impl ContainerRef {
    /// Conventional container name for a server that has not been bound yet.
    pub fn for_server(name: &str) -> Self {
        Self(format!("harbor-{name}"))
    }
}

impl std::fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of a server.
///
/// Transitions are linear: `Uninitialized -> Registered -> Ready`. A failed
/// collaborator call leaves the server in its last successful state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Uninitialized,
    Registered,
    Ready,
}

impl ServerState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `Ready -> Ready` is allowed so a server can be re-inspected.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        matches!(
            (self, next),
            (ServerState::Uninitialized, ServerState::Registered)
                | (ServerState::Registered, ServerState::Ready)
                | (ServerState::Ready, ServerState::Ready)
        )
    }

    /// Servers past registration can have compositions applied.
    pub fn accepts_compositions(self) -> bool {
        matches!(self, ServerState::Registered | ServerState::Ready)
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Uninitialized => write!(f, "uninitialized"),
            ServerState::Registered => write!(f, "registered"),
            ServerState::Ready => write!(f, "ready"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move server from {from} to {to}")]
pub struct InvalidTransition {
    pub from: ServerState,
    pub to: ServerState,
}

// ============================================================================
// Server Data
// ============================================================================

/// Game a server runs, e.g. `minecraft` at version `1.20.4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerGame {
    #[serde(rename = "type")]
    pub game_type: String,
    pub version: Option<String>,
}

impl ServerGame {
    pub fn new(game_type: impl Into<String>) -> Self {
        Self {
            game_type: game_type.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl std::fmt::Display for ServerGame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.game_type, version),
            None => write!(f, "{}", self.game_type),
        }
    }
}

/// A request to create a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    pub game: ServerGame,
    pub image: Option<String>,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, game: ServerGame) -> Self {
        Self {
            name: name.into(),
            game,
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Runtime facts reported by the container collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeFacts {
    pub status: String,
    pub ports: Vec<PortBinding>,
    pub memory_limit: Option<u64>,
    pub cpu_limit: Option<f64>,
    pub inspected_at: u64,
}

/// A composition that has been written to a server, in stored form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionRecord {
    pub key: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// A provisioned game server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub game: ServerGame,
    pub image: Option<String>,
    pub state: ServerState,
    pub container: ContainerRef,
    pub facts: Option<RuntimeFacts>,
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub compositions: Vec<CompositionRecord>,
    pub created_at: u64,
}

impl Server {
    /// Allocates a new server in the `Uninitialized` state.
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            id: ServerId::new(),
            container: ContainerRef::for_server(&spec.name),
            name: spec.name,
            game: spec.game,
            image: spec.image,
            state: ServerState::Uninitialized,
            facts: None,
            ports: Vec::new(),
            volumes: Vec::new(),
            environment: BTreeMap::new(),
            compositions: Vec::new(),
            created_at: current_timestamp(),
        }
    }

    /// Moves the server to `next`, rejecting backward or skipping transitions.
    pub fn transition(&mut self, next: ServerState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Whether a composition with this key name has been written.
    pub fn has_composition(&self, key: &str) -> bool {
        self.compositions.iter().any(|record| record.key == key)
    }
}

// ============================================================================
// Shared Handle
// ============================================================================

/// Shared, lockable reference to a server.
///
/// Cloning the handle is cheap. The handle also carries the per-server run
/// lock: at most one composition pipeline may hold it at a time.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    id: ServerId,
    name: Arc<str>,
    inner: Arc<RwLock<Server>>,
    run_lock: Arc<Mutex<()>>,
}

/// Proof that the holder is the only pipeline run for a server.
#[derive(Debug)]
pub struct RunGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ServerHandle {
    pub fn new(server: Server) -> Self {
        Self {
            id: server.id,
            name: Arc::from(server.name.as_str()),
            inner: Arc::new(RwLock::new(server)),
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Server> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Server> {
        self.inner.write().await
    }

    /// Clones the current server value.
    pub async fn snapshot(&self) -> Server {
        self.inner.read().await.clone()
    }

    pub async fn state(&self) -> ServerState {
        self.inner.read().await.state
    }

    /// Takes the single-run guard without waiting, `None` if a run is active.
    pub fn try_begin_run(&self) -> Option<RunGuard> {
        self.run_lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| RunGuard { _guard: guard })
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Returns the current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
