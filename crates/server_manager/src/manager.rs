//! Server lifecycle management
//!
//! The [`ServerManager`] owns every known server and drives it through
//! `Uninitialized -> Registered -> Ready`. A collaborator failure leaves the
//! server in its last successful state; nothing is rolled back.

use crate::config::ManagerConfig;
use crate::container::ContainerInspector;
use crate::error::{InspectionError, ManagerError, ManagerResult, PersistenceError};
use crate::provision::ProvisionReport;
use crate::storage::ServerStorage;
use composition_system::{CompositionPipeline, FactoryRegistry, FrontEnd, PipelineReport};
use dashmap::{mapref::entry::Entry, DashMap};
use harbor_types::{RuntimeFacts, Server, ServerHandle, ServerId, ServerSpec, ServerState};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const MAX_NAME_LEN: usize = 64;

pub struct ServerManager {
    /// Servers added to the registry, by name
    servers: DashMap<String, ServerHandle>,
    ids: DashMap<ServerId, String>,
    /// Names taken by created servers that are not added yet
    reserved: DashMap<String, ServerId>,
    storage: Arc<dyn ServerStorage>,
    inspector: Arc<dyn ContainerInspector>,
    pipeline: CompositionPipeline,
    config: ManagerConfig,
}

impl ServerManager {
    pub fn new(
        storage: Arc<dyn ServerStorage>,
        inspector: Arc<dyn ContainerInspector>,
        registry: Arc<FactoryRegistry>,
        config: ManagerConfig,
    ) -> Self {
        let pipeline = CompositionPipeline::with_options(registry, config.pipeline_options());
        Self {
            servers: DashMap::new(),
            ids: DashMap::new(),
            reserved: DashMap::new(),
            storage,
            inspector,
            pipeline,
            config,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &CompositionPipeline {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        self.pipeline.registry()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Allocates a new `Uninitialized` server.
    ///
    /// The name is reserved before any other check, so of two concurrent
    /// calls with the same name exactly one succeeds. A failed call releases
    /// its reservation.
    pub async fn create_server(&self, spec: ServerSpec) -> ManagerResult<ServerHandle> {
        validate_name(&spec.name)?;

        let server = Server::new(spec);
        match self.reserved.entry(server.name.clone()) {
            Entry::Occupied(_) => return Err(ManagerError::AlreadyExists(server.name)),
            Entry::Vacant(slot) => {
                slot.insert(server.id);
            }
        }

        let taken = if self.servers.contains_key(&server.name) {
            Ok(true)
        } else {
            self.stored(&server.name).await
        };
        match taken {
            Ok(false) => {}
            Ok(true) => {
                self.release(&server);
                return Err(ManagerError::AlreadyExists(server.name));
            }
            Err(e) => {
                self.release(&server);
                return Err(e.into());
            }
        }

        debug!("Created server {} ({})", server.name, server.id);
        Ok(ServerHandle::new(server))
    }

    /// Makes a server discoverable by name and id.
    pub fn add_server(&self, handle: &ServerHandle) -> ManagerResult<()> {
        let name = handle.name().to_string();
        let reserved_by = self.reserved.get(&name).map(|owner| *owner);
        if reserved_by.is_some_and(|owner| owner != handle.id()) {
            return Err(ManagerError::AlreadyExists(name));
        }

        match self.servers.entry(name.clone()) {
            Entry::Occupied(_) => return Err(ManagerError::AlreadyExists(name)),
            Entry::Vacant(slot) => {
                slot.insert(handle.clone());
            }
        }
        self.ids.insert(handle.id(), name.clone());
        self.reserved.remove(&name);

        info!("Server {} added", name);
        Ok(())
    }

    /// Persists the server and moves it to `Registered`.
    ///
    /// On failure the server stays `Uninitialized` and can be registered
    /// again.
    pub async fn register_server(&self, handle: &ServerHandle) -> ManagerResult<()> {
        let mut staged = handle.snapshot().await;
        staged.transition(ServerState::Registered)?;

        self.persist(&staged).await?;
        handle.write().await.transition(ServerState::Registered)?;

        info!("Server {} registered", handle.name());
        Ok(())
    }

    /// Reads runtime facts from the container and moves the server to
    /// `Ready`. Inspecting a `Ready` server refreshes its facts.
    pub async fn inspect_server(&self, handle: &ServerHandle) -> ManagerResult<RuntimeFacts> {
        let snapshot = handle.snapshot().await;
        if !snapshot.state.can_transition_to(ServerState::Ready) {
            return Err(harbor_types::InvalidTransition {
                from: snapshot.state,
                to: ServerState::Ready,
            }
            .into());
        }

        let facts = match timeout(self.config.inspect_timeout, self.inspector.inspect(&snapshot)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(InspectionError::Timeout(
                    snapshot.container.to_string(),
                    self.config.inspect_timeout,
                )
                .into())
            }
        };

        let updated = {
            let mut server = handle.write().await;
            server.transition(ServerState::Ready)?;
            server.facts = Some(facts.clone());
            server.clone()
        };

        if let Err(e) = self.persist(&updated).await {
            warn!("Server {} is ready but its record could not be updated: {}", handle.name(), e);
        }

        info!("Server {} inspected: {}", handle.name(), facts.status);
        Ok(facts)
    }

    /// Applies compositions to a registered server and persists the result.
    pub async fn apply_compositions(
        &self,
        handle: &ServerHandle,
        names: &[String],
        front: Box<dyn FrontEnd>,
    ) -> ManagerResult<PipelineReport> {
        let (report, persist_error) = self.apply_and_persist(handle, names, front).await?;
        match persist_error {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Runs create, add, register, inspect and the composition pipeline for
    /// a new server.
    ///
    /// # Arguments
    ///
    /// * `spec` - Name, game and image of the new server
    /// * `names` - Requested composition names, applied in order after the
    ///   game's default compositions
    /// * `front` - Front end that renders progress and answers prompts
    ///
    /// # Returns
    ///
    /// A [`ProvisionReport`] with the final server snapshot. A failed
    /// inspection is carried in `inspection_error`, and per-composition
    /// failures are carried in `compositions`; neither fails the call.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidName`] or [`ManagerError::AlreadyExists`]
    /// when the server cannot be created, and [`ManagerError::Persistence`]
    /// when its first record cannot be stored.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use composition_system::{builtin, DefaultsFrontEnd, FactoryRegistry};
    /// # use harbor_types::{ServerGame, ServerSpec};
    /// # use server_manager::{ManagerConfig, MemoryStorage, ServerManager, StaticInspector};
    /// # async fn run() -> server_manager::ManagerResult<()> {
    /// let registry = FactoryRegistry::new();
    /// builtin::register_builtin(&registry);
    /// let manager = ServerManager::new(
    ///     Arc::new(MemoryStorage::new()),
    ///     Arc::new(StaticInspector::new()),
    ///     Arc::new(registry),
    ///     ManagerConfig::default(),
    /// );
    ///
    /// let spec = ServerSpec::new("survival", ServerGame::new("minecraft"));
    /// let report = manager
    ///     .provision(spec, &["port-mapping".to_string()], Box::new(DefaultsFrontEnd::new()))
    ///     .await?;
    /// println!("{} is {}", report.server.name, report.server.state);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn provision(
        &self,
        spec: ServerSpec,
        names: &[String],
        front: Box<dyn FrontEnd>,
    ) -> ManagerResult<ProvisionReport> {
        let handle = self.create_server(spec).await?;
        self.add_server(&handle)?;
        self.register_server(&handle).await?;

        let inspection_error = match self.inspect_server(&handle).await {
            Ok(_) => None,
            Err(e) => {
                error!("Failed to inspect server {}: {}", handle.name(), e);
                Some(e.to_string())
            }
        };

        let mut notes = Vec::new();
        let compositions = match self.apply_and_persist(&handle, names, front).await {
            Ok((report, persist_error)) => {
                if let Some(e) = persist_error {
                    notes.push(format!("Compositions were applied but not saved: {e}"));
                }
                Some(report)
            }
            Err(e) => {
                warn!("Compositions were not applied to {}: {}", handle.name(), e);
                notes.push(format!("Compositions were not applied: {e}"));
                None
            }
        };

        Ok(ProvisionReport {
            server: handle.snapshot().await,
            inspection_error,
            compositions,
            notes,
        })
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get_server(&self, name: &str) -> Option<ServerHandle> {
        self.servers.get(name).map(|entry| entry.value().clone())
    }

    pub fn get_server_by_id(&self, id: ServerId) -> Option<ServerHandle> {
        let name = self.ids.get(&id).map(|entry| entry.value().clone())?;
        self.get_server(&name)
    }

    /// Known servers sorted by name.
    pub fn list_servers(&self) -> Vec<ServerHandle> {
        let mut servers: Vec<ServerHandle> = self.servers.iter().map(|entry| entry.value().clone()).collect();
        servers.sort_by(|a, b| a.name().cmp(b.name()));
        servers
    }

    /// Whether the name is taken in memory or in storage.
    pub async fn exists_server(&self, name: &str) -> ManagerResult<bool> {
        if self.servers.contains_key(name) || self.reserved.contains_key(name) {
            return Ok(true);
        }
        Ok(self.stored(name).await?)
    }

    /// Restores stored servers, rebuilding composition options through the
    /// factories of each server's game. Returns how many servers were added.
    pub async fn load_servers(&self) -> ManagerResult<usize> {
        let stored = match timeout(self.config.persist_timeout, self.storage.load_all()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PersistenceError::Timeout("(all)".to_string(), self.config.persist_timeout).into())
            }
        };

        let mut loaded = 0;
        for mut server in stored {
            if self.servers.contains_key(&server.name) {
                debug!("Server {} is already loaded", server.name);
                continue;
            }

            let factories = self.registry().resolve(&server.game);
            for record in &mut server.compositions {
                let Some(factory) = factories.factory_for(&record.key) else {
                    warn!("No factory restores composition {} of {}", record.key, server.name);
                    continue;
                };
                let Some(key) = factory.registrations().by_name(&record.key) else {
                    warn!("Factory {} has no key {}", factory.name(), record.key);
                    continue;
                };
                match factory.generate(key, &record.options) {
                    Ok(options) => record.options = options.into_raw(),
                    Err(e) => warn!("Stored options of {} on {} are invalid: {}", record.key, server.name, e),
                }
            }

            let handle = ServerHandle::new(server);
            match self.add_server(&handle) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping stored server {}: {}", handle.name(), e),
            }
        }

        info!("Loaded {} stored server(s)", loaded);
        Ok(loaded)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn persist(&self, server: &Server) -> Result<(), PersistenceError> {
        match timeout(self.config.persist_timeout, self.storage.persist(server)).await {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::Timeout(server.name.clone(), self.config.persist_timeout)),
        }
    }

    async fn stored(&self, name: &str) -> Result<bool, PersistenceError> {
        timeout(self.config.persist_timeout, self.storage.exists(name))
            .await
            .map_err(|_| PersistenceError::Timeout(name.to_string(), self.config.persist_timeout))
    }

    /// Drops the reservation `server` holds, leaving any other owner's alone.
    fn release(&self, server: &Server) {
        self.reserved.remove_if(&server.name, |_, owner| *owner == server.id);
    }

    async fn apply_and_persist(
        &self,
        handle: &ServerHandle,
        names: &[String],
        front: Box<dyn FrontEnd>,
    ) -> ManagerResult<(PipelineReport, Option<PersistenceError>)> {
        let report = self.pipeline.apply(handle, names, front).await?;
        if report.applied().is_empty() {
            return Ok((report, None));
        }

        let snapshot = handle.snapshot().await;
        let persist_error = self.persist(&snapshot).await.err();
        if let Some(e) = &persist_error {
            error!("Failed to persist compositions of {}: {}", handle.name(), e);
        }
        Ok((report, persist_error))
    }
}

/// Server names become file names in storage, so only ASCII letters, digits,
/// `-` and `_` are accepted.
fn validate_name(name: &str) -> ManagerResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > MAX_NAME_LEN {
        "name is longer than 64 characters"
    } else if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        "only letters, digits, '-' and '_' are allowed"
    } else {
        return Ok(());
    };
    Err(ManagerError::InvalidName(name.to_string(), reason))
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("servers", &self.servers.len())
            .field("storage", &self.storage)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::StaticInspector;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use harbor_types::ServerGame;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Storage that fails until `healthy` is set.
    #[derive(Debug, Default)]
    struct FlakyStorage {
        healthy: AtomicBool,
        inner: MemoryStorage,
    }

    #[async_trait]
    impl ServerStorage for FlakyStorage {
        async fn persist(&self, server: &Server) -> Result<(), PersistenceError> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(PersistenceError::Backend("database offline".to_string()));
            }
            self.inner.persist(server).await
        }

        async fn exists(&self, name: &str) -> bool {
            self.inner.exists(name).await
        }

        async fn load_all(&self) -> Result<Vec<Server>, PersistenceError> {
            self.inner.load_all().await
        }
    }

    /// Storage whose selected calls never complete.
    #[derive(Debug, Default)]
    struct StalledStorage {
        stall_exists: bool,
        inner: MemoryStorage,
    }

    #[async_trait]
    impl ServerStorage for StalledStorage {
        async fn persist(&self, _server: &Server) -> Result<(), PersistenceError> {
            std::future::pending().await
        }

        async fn exists(&self, name: &str) -> bool {
            if self.stall_exists {
                std::future::pending::<()>().await;
            }
            self.inner.exists(name).await
        }

        async fn load_all(&self) -> Result<Vec<Server>, PersistenceError> {
            self.inner.load_all().await
        }
    }

    #[derive(Debug)]
    struct StalledInspector;

    #[async_trait]
    impl ContainerInspector for StalledInspector {
        async fn inspect(&self, _server: &Server) -> Result<RuntimeFacts, InspectionError> {
            std::future::pending().await
        }
    }

    fn short_timeouts() -> ManagerConfig {
        ManagerConfig {
            persist_timeout: Duration::from_millis(50),
            inspect_timeout: Duration::from_millis(50),
            ..ManagerConfig::default()
        }
    }

    fn manager_with(storage: Arc<dyn ServerStorage>) -> ServerManager {
        ServerManager::new(
            storage,
            Arc::new(StaticInspector::new()),
            Arc::new(FactoryRegistry::new()),
            ManagerConfig::default(),
        )
    }

    fn spec(name: &str) -> ServerSpec {
        ServerSpec::new(name, ServerGame::new("minecraft"))
    }

    #[tokio::test]
    async fn test_failed_registration_can_be_retried() {
        let storage = Arc::new(FlakyStorage::default());
        let manager = manager_with(storage.clone());

        let handle = manager.create_server(spec("mc1")).await.unwrap();
        manager.add_server(&handle).unwrap();

        let err = manager.register_server(&handle).await.unwrap_err();
        assert!(matches!(err, ManagerError::Persistence(PersistenceError::Backend(_))));
        assert_eq!(handle.state().await, ServerState::Uninitialized);

        storage.healthy.store(true, Ordering::SeqCst);
        manager.register_server(&handle).await.unwrap();
        assert_eq!(handle.state().await, ServerState::Registered);
        assert!(storage.exists("mc1").await);
    }

    #[tokio::test]
    async fn test_inspect_requires_registration() {
        let manager = manager_with(Arc::new(MemoryStorage::new()));
        let handle = manager.create_server(spec("mc1")).await.unwrap();

        let err = manager.inspect_server(&handle).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidTransition(_)));

        manager.register_server(&handle).await.unwrap();
        manager.inspect_server(&handle).await.unwrap();
        assert_eq!(handle.state().await, ServerState::Ready);

        // Re-inspection refreshes facts without leaving Ready.
        manager.inspect_server(&handle).await.unwrap();
        assert!(handle.snapshot().await.facts.is_some());
    }

    #[tokio::test]
    async fn test_lookup_by_name_and_id() {
        let manager = manager_with(Arc::new(MemoryStorage::new()));
        let b = manager.create_server(spec("b")).await.unwrap();
        let a = manager.create_server(spec("a")).await.unwrap();
        manager.add_server(&b).unwrap();
        manager.add_server(&a).unwrap();

        assert_eq!(manager.get_server("a").map(|h| h.id()), Some(a.id()));
        assert_eq!(manager.get_server_by_id(b.id()).map(|h| h.id()), Some(b.id()));
        let names: Vec<_> = manager.list_servers().iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(manager.exists_server("a").await.unwrap());
        assert!(!manager.exists_server("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_created_name_is_reserved_until_added() {
        let manager = manager_with(Arc::new(MemoryStorage::new()));
        let first = manager.create_server(spec("mc1")).await.unwrap();
        assert!(matches!(
            manager.create_server(spec("mc1")).await,
            Err(ManagerError::AlreadyExists(_))
        ));
        assert!(manager.exists_server("mc1").await.unwrap());

        manager.add_server(&first).unwrap();
        assert!(matches!(
            manager.create_server(spec("mc1")).await,
            Err(ManagerError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_stored_name_is_taken() {
        let storage = Arc::new(MemoryStorage::new());
        storage.persist(&Server::new(spec("mc1"))).await.unwrap();
        let manager = manager_with(storage);

        assert!(matches!(
            manager.create_server(spec("mc1")).await,
            Err(ManagerError::AlreadyExists(_))
        ));
        // The failed attempt must not keep the name reserved in memory.
        assert!(manager.reserved.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected() {
        let manager = manager_with(Arc::new(MemoryStorage::new()));
        let long = "x".repeat(65);
        for name in ["", "../escaped", "a/b", "a\\b", "..", "has space", "ünïcode", long.as_str()] {
            match manager.create_server(spec(name)).await {
                Err(ManagerError::InvalidName(rejected, _)) => assert_eq!(rejected, name),
                other => panic!("expected {name:?} to be rejected, got {other:?}"),
            }
        }
        assert!(manager.reserved.is_empty());

        manager.create_server(spec("mc-1_A")).await.unwrap();
    }

    #[tokio::test]
    async fn test_added_name_releases_new_reservation() {
        let manager = manager_with(Arc::new(MemoryStorage::new()));
        let first = manager.create_server(spec("mc1")).await.unwrap();
        manager.add_server(&first).unwrap();

        assert!(matches!(
            manager.create_server(spec("mc1")).await,
            Err(ManagerError::AlreadyExists(_))
        ));
        assert!(manager.reserved.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_creates_take_name_once() {
        let manager = Arc::new(manager_with(Arc::new(MemoryStorage::new())));
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    let handle = manager.create_server(spec("mc1")).await?;
                    manager.add_server(&handle)
                })
            })
            .collect();

        let mut added = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(()) => added += 1,
                Err(e) => assert!(matches!(e, ManagerError::AlreadyExists(_))),
            }
        }
        assert_eq!(added, 1);
        assert!(manager.reserved.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_inspection_times_out() {
        let manager = ServerManager::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(StalledInspector),
            Arc::new(FactoryRegistry::new()),
            short_timeouts(),
        );
        let handle = manager.create_server(spec("mc1")).await.unwrap();
        manager.register_server(&handle).await.unwrap();

        let err = manager.inspect_server(&handle).await.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Inspection(InspectionError::Timeout(_, after)) if after == Duration::from_millis(50)
        ));
        assert_eq!(handle.state().await, ServerState::Registered);
        assert!(handle.snapshot().await.facts.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_persist_times_out() {
        let manager = ServerManager::new(
            Arc::new(StalledStorage::default()),
            Arc::new(StaticInspector::new()),
            Arc::new(FactoryRegistry::new()),
            short_timeouts(),
        );
        let handle = manager.create_server(spec("mc1")).await.unwrap();

        let err = manager.register_server(&handle).await.unwrap_err();
        assert!(matches!(err, ManagerError::Persistence(PersistenceError::Timeout(name, _)) if name == "mc1"));
        assert_eq!(handle.state().await, ServerState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_name_lookup_times_out() {
        let manager = ServerManager::new(
            Arc::new(StalledStorage {
                stall_exists: true,
                ..StalledStorage::default()
            }),
            Arc::new(StaticInspector::new()),
            Arc::new(FactoryRegistry::new()),
            short_timeouts(),
        );

        assert!(matches!(
            manager.create_server(spec("mc1")).await,
            Err(ManagerError::Persistence(PersistenceError::Timeout(_, _)))
        ));
        assert!(manager.reserved.is_empty());
        assert!(matches!(
            manager.exists_server("mc1").await,
            Err(ManagerError::Persistence(PersistenceError::Timeout(_, _)))
        ));
    }
}
