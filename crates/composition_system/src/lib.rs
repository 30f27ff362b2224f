//! # Composition System
//!
//! Pluggable configuration units ("compositions") for Harbor game servers and
//! the machinery that applies them.
//!
//! ## Building blocks
//!
//! - [`CompositionKey`] / [`KeyTable`]: named descriptors with `default` and
//!   `single` rules, owned by a factory
//! - [`CompositionFactory`] / [`Composition`]: create compositions, obtain
//!   their options interactively and write them onto a [`harbor_types::Server`]
//! - [`FactoryRegistry`]: game identifier to factories, populated at startup
//! - [`OptionsSchema`]: declared option shapes with a pure recursive decoder
//! - [`protocol`]: the per-run packet queue between composition logic and the
//!   front end, and its JSON envelope
//! - [`frontend`]: adapters that render packets and answer prompts
//! - [`CompositionPipeline`]: ordered, validated application with a per-item
//!   report
//!
//! ## Example
//!
//! ```rust,no_run
//! use composition_system::*;
//! use std::sync::Arc;
//!
//! # async fn run(server: harbor_types::ServerHandle) -> Result<(), PipelineError> {
//! let registry = FactoryRegistry::new();
//! builtin::register_builtin(&registry);
//!
//! let pipeline = CompositionPipeline::new(Arc::new(registry));
//! let names = vec!["port-mapping".to_string()];
//! let report = pipeline
//!     .apply(&server, &names, Box::new(DefaultsFrontEnd::new()))
//!     .await?;
//! for item in &report.items {
//!     println!("{}: {}", item.name, item.detail);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod error;
pub mod factory;
pub mod frontend;
pub mod key;
pub mod options;
pub mod pipeline;
pub mod protocol;

pub use error::{
    CompositionError, CompositionResult, ItemError, OptionsBindingError, PipelineError, ProtocolError,
    ProtocolResult,
};
pub use factory::{Composition, CompositionFactory, FactoryRegistry, FactorySet, ALL_GAMES};
pub use frontend::{drain_packets, DefaultsFrontEnd, FrontEnd, JsonFrontEnd, ScriptedFrontEnd, Transcript};
pub use key::{CompositionKey, KeyTable};
pub use options::{CompositionOptions, FieldKind, FieldSpec, OptionsSchema, RawOptions};
pub use pipeline::{CompositionPipeline, ItemOrigin, ItemReport, ItemStatus, PipelineOptions, PipelineReport};
pub use protocol::{Answer, Interaction, RunId};
