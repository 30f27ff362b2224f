//! Ordered, validated application of compositions to one server
//!
//! A run takes the server's single-run guard, starts the drain loop for its
//! own packet queue and waits for the loop's ready signal before any
//! composition worker starts. Requested names are then processed strictly in
//! order, one worker at a time:
//!
//! 1. the name must be claimed by a factory of the server's game
//! 2. the factory must have a key for the name
//! 3. default keys cannot be requested explicitly
//! 4. at most one single key is active on the server, counting the ones
//!    stored by earlier runs
//!
//! Failures of individual items are collected in the [`PipelineReport`] and
//! never stop the remaining items. A worker writes into a staged copy of the
//! server; only a successful write is committed. Workers share the run guard,
//! so the server stays locked until the last worker has finished even when
//! the caller stops waiting for the run.

use crate::error::{CompositionResult, ItemError, PipelineError};
use crate::factory::{Composition, CompositionFactory, FactoryRegistry, FactorySet};
use crate::frontend::{drain_packets, FrontEnd};
use crate::key::CompositionKey;
use crate::protocol::{channel, Interaction, RunId};
use harbor_types::{CompositionRecord, RunGuard, Server, ServerHandle};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Capacity of each run's packet queue
    pub channel_capacity: usize,
    /// Apply every default key of the game's factories before the requested
    /// names
    pub apply_defaults: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            apply_defaults: false,
        }
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    Requested,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ok,
    Error,
}

/// Outcome of one composition in a run.
#[derive(Debug, Serialize)]
pub struct ItemReport {
    pub name: String,
    pub origin: ItemOrigin,
    pub status: ItemStatus,
    pub detail: String,
    /// Machine-readable error code, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip)]
    pub error: Option<ItemError>,
}

impl ItemReport {
    fn applied(name: String, origin: ItemOrigin) -> Self {
        Self {
            detail: format!("{name} applied"),
            name,
            origin,
            status: ItemStatus::Ok,
            code: None,
            error: None,
        }
    }

    fn failed(name: String, origin: ItemOrigin, error: ItemError) -> Self {
        Self {
            name,
            origin,
            status: ItemStatus::Error,
            detail: error.to_string(),
            code: Some(error.code()),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ItemStatus::Ok
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub server: String,
    pub items: Vec<ItemReport>,
    /// Fatal protocol error that stopped the drain loop early, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_error: Option<String>,
}

impl PipelineReport {
    /// Names of successfully applied compositions, in application order.
    pub fn applied(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| item.is_ok())
            .map(|item| item.name.as_str())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|item| !item.is_ok())
    }

    pub fn is_success(&self) -> bool {
        self.protocol_error.is_none() && self.items.iter().all(ItemReport::is_ok)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

struct PlannedItem {
    name: String,
    origin: ItemOrigin,
    /// Known up front for default items
    factory: Option<Arc<dyn CompositionFactory>>,
}

#[derive(Clone)]
pub struct CompositionPipeline {
    registry: Arc<FactoryRegistry>,
    options: PipelineOptions,
}

impl CompositionPipeline {
    pub fn new(registry: Arc<FactoryRegistry>) -> Self {
        Self::with_options(registry, PipelineOptions::default())
    }

    pub fn with_options(registry: Arc<FactoryRegistry>, options: PipelineOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Applies `names` to `server` in order, relaying interaction to `front`.
    ///
    /// # Arguments
    ///
    /// * `server` - A registered or ready server; the run holds its run guard
    ///   until every worker has finished
    /// * `names` - Requested composition names or aliases, applied in order
    ///   after the default keys when `apply_defaults` is set
    /// * `front` - Front end that receives messages and answers prompts
    ///
    /// # Returns
    ///
    /// A [`PipelineReport`] with one item per planned composition, in the
    /// order they were attempted. Per-item failures and a fatal front end
    /// error are carried in the report rather than returned.
    ///
    /// # Errors
    ///
    /// Fails only when the run cannot start: another run holds the server
    /// ([`PipelineError::RunInProgress`]) or the server is not registered yet
    /// ([`PipelineError::NotRegistered`]).
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use composition_system::{builtin, CompositionPipeline, DefaultsFrontEnd, FactoryRegistry};
    /// # use harbor_types::{Server, ServerGame, ServerHandle, ServerSpec, ServerState};
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let registry = FactoryRegistry::new();
    /// builtin::register_builtin(&registry);
    /// let pipeline = CompositionPipeline::new(Arc::new(registry));
    ///
    /// let mut server = Server::new(ServerSpec::new("survival", ServerGame::new("minecraft")));
    /// server.transition(ServerState::Registered)?;
    /// let handle = ServerHandle::new(server);
    ///
    /// let report = pipeline
    ///     .apply(&handle, &["port-mapping".to_string()], Box::new(DefaultsFrontEnd::new()))
    ///     .await?;
    /// assert_eq!(report.applied(), vec!["port-mapping"]);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn apply(
        &self,
        server: &ServerHandle,
        names: &[String],
        front: Box<dyn FrontEnd>,
    ) -> Result<PipelineReport, PipelineError> {
        let run_guard = Arc::new(
            server
                .try_begin_run()
                .ok_or_else(|| PipelineError::RunInProgress(server.name().to_string()))?,
        );

        let (state, game, stored) = {
            let current = server.read().await;
            let stored: Vec<String> = current.compositions.iter().map(|record| record.key.clone()).collect();
            (current.state, current.game.clone(), stored)
        };
        if !state.accepts_compositions() {
            return Err(PipelineError::NotRegistered {
                server: server.name().to_string(),
                state,
            });
        }

        let factories = self.registry.resolve(&game);
        let run = RunId::new();
        let (io, stream) = channel(run, self.options.channel_capacity);

        // The drain loop must be receiving before any worker can emit.
        let (ready_tx, ready_rx) = oneshot::channel();
        let drain = tokio::spawn(drain_packets(stream, front, ready_tx));
        if ready_rx.await.is_err() {
            warn!(run = %run, "Drain loop for {} ended before it was ready", server.name());
        }

        let plan = self.plan(&factories, names);
        let total = plan.len();
        info!(run = %run, "Applying {} composition(s) to {}", total, server.name());

        // Single keys stored by earlier runs stay active.
        let mut applied: Vec<(String, CompositionKey)> = stored
            .into_iter()
            .filter_map(|name| {
                let key = factories.factory_for(&name)?.registrations().by_name(&name)?.clone();
                key.is_single().then_some((name, key))
            })
            .collect();
        let mut items = Vec::with_capacity(total);

        for (index, item) in plan.into_iter().enumerate() {
            let phase = format!("[{}/{}]", index + 1, total);
            io.message(format!("{phase} Applying {}...", item.name)).await;

            match self.apply_item(server, &run_guard, &factories, &item, &applied, &io).await {
                Ok(key) => {
                    debug!(run = %run, "Applied {} to {}", item.name, server.name());
                    io.message(format!("{phase} {} applied", item.name)).await;
                    applied.push((item.name.clone(), key));
                    items.push(ItemReport::applied(item.name, item.origin));
                }
                Err(error) => {
                    warn!(run = %run, "Composition {} failed for {}: {}", item.name, server.name(), error);
                    io.error(format!("{phase} {error}")).await;
                    items.push(ItemReport::failed(item.name, item.origin, error));
                }
            }
        }

        io.close().await;
        drop(io);

        let protocol_error = match drain.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!(run = %run, "Front end protocol failed: {}", e);
                Some(e.to_string())
            }
            Err(e) => Some(format!("drain task aborted: {e}")),
        };

        Ok(PipelineReport {
            run_id: run,
            server: server.name().to_string(),
            items,
            protocol_error,
        })
    }

    fn plan(&self, factories: &FactorySet, names: &[String]) -> Vec<PlannedItem> {
        let defaults = if self.options.apply_defaults {
            factories.defaults()
        } else {
            Vec::new()
        };

        defaults
            .into_iter()
            .map(|(name, factory)| PlannedItem {
                name,
                origin: ItemOrigin::Default,
                factory: Some(factory),
            })
            .chain(names.iter().map(|name| PlannedItem {
                name: name.clone(),
                origin: ItemOrigin::Requested,
                factory: None,
            }))
            .collect()
    }

    async fn apply_item(
        &self,
        server: &ServerHandle,
        run_guard: &Arc<RunGuard>,
        factories: &FactorySet,
        item: &PlannedItem,
        applied: &[(String, CompositionKey)],
        io: &Interaction,
    ) -> Result<CompositionKey, ItemError> {
        let factory = match &item.factory {
            Some(factory) => Arc::clone(factory),
            None => factories
                .factory_for(&item.name)
                .cloned()
                .ok_or_else(|| ItemError::FactoryNotFound(item.name.clone()))?,
        };

        let key = factory
            .registrations()
            .by_name(&item.name)
            .cloned()
            .ok_or_else(|| ItemError::KeyNotFound {
                name: item.name.clone(),
                factory: factory.name().to_string(),
            })?;

        if key.is_default() && item.origin == ItemOrigin::Requested {
            return Err(ItemError::DefaultCompositionRejected(item.name.clone()));
        }

        if key.is_single() {
            if let Some((conflicting, _)) = applied.iter().find(|(_, applied)| applied.is_single()) {
                return Err(ItemError::SingleCompositionConflict {
                    name: item.name.clone(),
                    conflicting: conflicting.clone(),
                });
            }
        }

        let composition = factory.create(&key)?;
        let worker = tokio::spawn(run_worker(
            factory,
            key.clone(),
            composition,
            server.clone(),
            io.clone(),
            Arc::clone(run_guard),
        ));

        match worker.await {
            Ok(result) => result.map(|()| key).map_err(ItemError::from),
            Err(e) => Err(ItemError::WorkerAborted(e.to_string())),
        }
    }
}

impl std::fmt::Debug for CompositionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionPipeline")
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish()
    }
}

/// Obtains options through the factory, writes into a staged copy of the
/// server and commits it on success. The run guard is released when the
/// worker ends.
async fn run_worker(
    factory: Arc<dyn CompositionFactory>,
    key: CompositionKey,
    mut composition: Box<dyn Composition>,
    server: ServerHandle,
    io: Interaction,
    _run_guard: Arc<RunGuard>,
) -> CompositionResult<()> {
    let mut staged = server.snapshot().await;
    let options = factory.apply(&key, &staged, &io).await?;
    composition.set_options(options);
    composition.write(&mut staged).await?;

    let record = CompositionRecord {
        key: key.name().to_string(),
        options: composition.options().to_raw(),
    };
    match staged.compositions.iter_mut().find(|existing| existing.key == record.key) {
        Some(existing) => *existing = record,
        None => staged.compositions.push(record),
    }

    commit(&server, staged).await;
    Ok(())
}

/// Copies the fields compositions are allowed to change.
async fn commit(server: &ServerHandle, staged: Server) {
    let mut current = server.write().await;
    current.image = staged.image;
    current.ports = staged.ports;
    current.volumes = staged.volumes;
    current.environment = staged.environment;
    current.compositions = staged.compositions;
}
