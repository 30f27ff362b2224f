//! Composition and factory traits, and the game-keyed factory registry

use crate::error::CompositionResult;
use crate::key::{CompositionKey, KeyTable};
use crate::options::{CompositionOptions, RawOptions};
use crate::protocol::Interaction;
use async_trait::async_trait;
use dashmap::DashMap;
use harbor_types::{Server, ServerGame};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Game identifier under which factories for every game are registered.
pub const ALL_GAMES: &str = "*";

// ============================================================================
// Traits
// ============================================================================

/// A configuration unit bound to one key.
#[async_trait]
pub trait Composition: Send + Sync {
    fn key(&self) -> &CompositionKey;

    fn options(&self) -> &CompositionOptions;

    fn set_options(&mut self, options: CompositionOptions);

    /// Applies the composition's effect to `server`.
    ///
    /// On error the caller discards every change made to `server`.
    async fn write(&self, server: &mut Server) -> CompositionResult<()>;
}

/// Produces compositions for the keys it owns.
#[async_trait]
pub trait CompositionFactory: Send + Sync {
    /// Stable factory name, used for explicit claims and in error messages
    fn name(&self) -> &str;

    fn registrations(&self) -> &KeyTable;

    /// Allocates a composition for `key`. Must not interact with the user.
    fn create(&self, key: &CompositionKey) -> CompositionResult<Box<dyn Composition>>;

    /// Builds the options for `key`, asking the front end through `io` where
    /// needed.
    async fn apply(
        &self,
        key: &CompositionKey,
        server: &Server,
        io: &Interaction,
    ) -> CompositionResult<CompositionOptions>;

    /// Rebuilds stored options. Keys without configurable state keep the
    /// default empty options.
    fn generate(&self, key: &CompositionKey, raw: &RawOptions) -> CompositionResult<CompositionOptions> {
        let _ = (key, raw);
        Ok(CompositionOptions::empty())
    }
}

// ============================================================================
// Factory Set
// ============================================================================

/// Factories available to one server, with the table of which factory owns
/// which composition name.
#[derive(Clone, Default)]
pub struct FactorySet {
    factories: Vec<Arc<dyn CompositionFactory>>,
    claims: HashMap<String, usize>,
}

impl FactorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a factory and claims every name in its key table. Names already
    /// claimed by an earlier factory stay with that factory.
    pub fn register(&mut self, factory: Arc<dyn CompositionFactory>) {
        let index = self.factories.len();
        for name in factory.registrations().names() {
            if let Some(&owner) = self.claims.get(name) {
                debug!(
                    "Composition {} is already provided by {}, ignoring {}",
                    name,
                    self.factories[owner].name(),
                    factory.name()
                );
                continue;
            }
            self.claims.insert(name.to_string(), index);
        }
        self.factories.push(factory);
    }

    /// Routes `name` to the factory called `factory_name`, replacing any
    /// previous owner. Returns `false` if no such factory is registered.
    pub fn claim(&mut self, name: impl Into<String>, factory_name: &str) -> bool {
        match self.factories.iter().position(|f| f.name() == factory_name) {
            Some(index) => {
                self.claims.insert(name.into(), index);
                true
            }
            None => {
                warn!("Cannot claim composition for unknown factory {}", factory_name);
                false
            }
        }
    }

    pub fn factory_for(&self, name: &str) -> Option<&Arc<dyn CompositionFactory>> {
        self.claims.get(name).map(|&index| &self.factories[index])
    }

    pub fn factories(&self) -> &[Arc<dyn CompositionFactory>] {
        &self.factories
    }

    /// Every default key with its factory and name, in registration order.
    pub fn defaults(&self) -> Vec<(String, Arc<dyn CompositionFactory>)> {
        self.factories
            .iter()
            .flat_map(|factory| {
                factory
                    .registrations()
                    .defaults()
                    .filter_map(|key| factory.registrations().name_of(key))
                    .map(|name| (name.to_string(), Arc::clone(factory)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Claimed composition names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.claims.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for FactorySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactorySet")
            .field(
                "factories",
                &self.factories.iter().map(|factory| factory.name()).collect::<Vec<_>>(),
            )
            .field("claims", &self.claims)
            .finish()
    }
}

// ============================================================================
// Factory Registry
// ============================================================================

/// Registration table from game identifier to factories, populated at
/// startup.
#[derive(Default)]
pub struct FactoryRegistry {
    by_game: DashMap<String, Vec<Arc<dyn CompositionFactory>>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, game: impl Into<String>, factory: Arc<dyn CompositionFactory>) {
        let game = game.into();
        debug!("Registering composition factory {} for {}", factory.name(), game);
        self.by_game.entry(game).or_default().push(factory);
    }

    /// Registers a factory for every game.
    pub fn register_global(&self, factory: Arc<dyn CompositionFactory>) {
        self.register(ALL_GAMES, factory);
    }

    /// Factories for `game`: game specific ones first, then global ones.
    pub fn resolve(&self, game: &ServerGame) -> FactorySet {
        let mut set = FactorySet::new();
        let specific = self
            .by_game
            .get(&game.game_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let global = self
            .by_game
            .get(ALL_GAMES)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        for factory in specific.into_iter().chain(global) {
            set.register(factory);
        }
        set
    }

    /// Games with a dedicated factory, sorted.
    pub fn games(&self) -> Vec<String> {
        let mut games: Vec<String> = self
            .by_game
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|game| game != ALL_GAMES)
            .collect();
        games.sort();
        games
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("games", &self.by_game.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal factory used by the crate's unit tests.

    use super::*;
    use crate::error::CompositionError;

    pub struct RecordingComposition {
        key: CompositionKey,
        options: CompositionOptions,
    }

    #[async_trait]
    impl Composition for RecordingComposition {
        fn key(&self) -> &CompositionKey {
            &self.key
        }

        fn options(&self) -> &CompositionOptions {
            &self.options
        }

        fn set_options(&mut self, options: CompositionOptions) {
            self.options = options;
        }

        async fn write(&self, server: &mut Server) -> CompositionResult<()> {
            if self.key.name() == "broken" {
                server.environment.insert("BROKEN".to_string(), "1".to_string());
                return Err(CompositionError::Write("disk full".to_string()));
            }
            let value = self.options.get_str("value").unwrap_or("").to_string();
            server.environment.insert(self.key.name().to_uppercase(), value);
            Ok(())
        }
    }

    /// Factory whose compositions record their key as an environment entry.
    pub struct RecordingFactory {
        name: String,
        keys: KeyTable,
    }

    impl RecordingFactory {
        pub fn new(name: &str, keys: KeyTable) -> Self {
            Self {
                name: name.to_string(),
                keys,
            }
        }
    }

    #[async_trait]
    impl CompositionFactory for RecordingFactory {
        fn name(&self) -> &str {
            &self.name
        }

        fn registrations(&self) -> &KeyTable {
            &self.keys
        }

        fn create(&self, key: &CompositionKey) -> CompositionResult<Box<dyn Composition>> {
            Ok(Box::new(RecordingComposition {
                key: key.clone(),
                options: CompositionOptions::empty(),
            }))
        }

        async fn apply(
            &self,
            key: &CompositionKey,
            _server: &Server,
            io: &Interaction,
        ) -> CompositionResult<CompositionOptions> {
            if key.name() == "asks" {
                let value = io.prompt("Value", Some("fallback")).await?;
                return Ok(CompositionOptions::empty().with("value", value));
            }
            Ok(CompositionOptions::empty().with("value", key.name()))
        }
    }
}
