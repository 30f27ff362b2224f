//! # Server Manager
//!
//! Lifecycle management for Harbor game servers. The manager owns the
//! in-memory registry of known servers, persists them through a
//! [`ServerStorage`] collaborator, inspects their containers through a
//! [`ContainerInspector`] and hands registered servers to the composition
//! pipeline.
//!
//! ## Provisioning flow
//!
//! [`ServerManager::provision`] runs the whole request:
//!
//! 1. `create_server` reserves the name and allocates an `Uninitialized` server
//! 2. `add_server` makes it discoverable by name and id
//! 3. `register_server` persists it and moves it to `Registered`
//! 4. `inspect_server` reads runtime facts and moves it to `Ready`; a failure
//!    here is reported but does not fail the request
//! 5. the composition pipeline applies the requested compositions
//!
//! ## Collaborators
//!
//! * [`MemoryStorage`] and [`JsonFileStorage`] implement [`ServerStorage`]
//! * [`StaticInspector`] and [`UnavailableInspector`] implement
//!   [`ContainerInspector`]
//!
//! Every collaborator call is bounded by the timeouts in [`ManagerConfig`].

pub use config::ManagerConfig;
pub use container::{ContainerInspector, StaticInspector, UnavailableInspector};
pub use error::{InspectionError, ManagerError, ManagerResult, PersistenceError};
pub use manager::ServerManager;
pub use provision::{ProvisionReport, ProvisionStatus};
pub use storage::{JsonFileStorage, MemoryStorage, ServerStorage};

pub mod config;
pub mod container;
pub mod error;
pub mod manager;
pub mod provision;
pub mod storage;
