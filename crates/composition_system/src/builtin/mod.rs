//! Compositions shipped with Harbor

pub mod container;
pub mod minecraft;

pub use container::ContainerFactory;
pub use minecraft::MinecraftFactory;

use crate::factory::FactoryRegistry;
use std::sync::Arc;

/// Registers the built-in factories: container compositions for every game
/// and the Minecraft factory for `minecraft` servers.
pub fn register_builtin(registry: &FactoryRegistry) {
    registry.register_global(Arc::new(ContainerFactory::new()));
    registry.register(minecraft::GAME, Arc::new(MinecraftFactory::new()));
}
