//! Compositions every container-backed server understands

use crate::error::{CompositionError, CompositionResult};
use crate::factory::{Composition, CompositionFactory};
use crate::key::{CompositionKey, KeyTable};
use crate::options::{CompositionOptions, FieldKind, OptionsSchema, RawOptions};
use crate::protocol::Interaction;
use async_trait::async_trait;
use harbor_types::{PortBinding, Server, VolumeMount};
use serde::{Deserialize, Serialize};

pub const PORT_MAPPING: &str = "port-mapping";
pub const VOLUME_MOUNT: &str = "volume-mount";
pub const ENVIRONMENT: &str = "environment";

const DEFAULT_HOST_PORT: &str = "25565";
const DEFAULT_MOUNT_TARGET: &str = "/data";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortMappingOptions {
    pub host: u16,
    pub container: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeMountOptions {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

fn port_schema() -> OptionsSchema {
    OptionsSchema::new()
        .required("host", FieldKind::Integer)
        .required("container", FieldKind::Integer)
        .optional("protocol", FieldKind::Text)
}

fn volume_schema() -> OptionsSchema {
    OptionsSchema::new()
        .required("source", FieldKind::Text)
        .required("target", FieldKind::Text)
        .optional("read_only", FieldKind::Boolean)
}

/// Parses a port answer, reporting the prompt it belonged to on failure.
pub(crate) fn parse_port(prompt: &str, answer: &str) -> CompositionResult<u16> {
    match answer.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(CompositionError::InvalidAnswer {
            prompt: prompt.to_string(),
            answer: answer.to_string(),
            reason: "expected a port between 1 and 65535".to_string(),
        }),
    }
}

// ============================================================================
// Compositions
// ============================================================================

/// Publishes a container port on the host.
pub struct PortMapping {
    key: CompositionKey,
    options: CompositionOptions,
}

#[async_trait]
impl Composition for PortMapping {
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
        let options: PortMappingOptions = self.options.bind()?;
        if let Some(taken) = server
            .ports
            .iter()
            .find(|binding| binding.host == options.host && binding.protocol == options.protocol)
        {
            return Err(CompositionError::Write(format!(
                "host port {}/{} is already mapped to container port {}",
                taken.host, taken.protocol, taken.container
            )));
        }

        server.ports.push(PortBinding {
            host: options.host,
            container: options.container,
            protocol: options.protocol,
        });
        Ok(())
    }
}

/// Mounts a host directory into the container.
pub struct VolumeMountComposition {
    key: CompositionKey,
    options: CompositionOptions,
}

#[async_trait]
impl Composition for VolumeMountComposition {
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
        let options: VolumeMountOptions = self.options.bind()?;
        if server.volumes.iter().any(|mount| mount.target == options.target) {
            return Err(CompositionError::Write(format!(
                "{} is already mounted",
                options.target
            )));
        }

        server.volumes.push(VolumeMount {
            source: options.source,
            target: options.target,
            read_only: options.read_only,
        });
        Ok(())
    }
}

/// Baseline environment every server starts with.
pub struct Environment {
    key: CompositionKey,
    options: CompositionOptions,
}

#[async_trait]
impl Composition for Environment {
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
        let mut entries = vec![
            ("HARBOR_SERVER", server.name.clone()),
            ("HARBOR_GAME", server.game.game_type.clone()),
        ];
        if let Some(version) = &server.game.version {
            entries.push(("HARBOR_GAME_VERSION", version.clone()));
        }
        for (name, value) in entries {
            server.environment.insert(name.to_string(), value);
        }
        Ok(())
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Factory for the container-level compositions.
pub struct ContainerFactory {
    keys: KeyTable,
}

impl ContainerFactory {
    pub fn new() -> Self {
        let port_mapping = CompositionKey::new(PORT_MAPPING).single();
        Self {
            keys: KeyTable::new()
                .with_key(port_mapping.clone())
                .with_named_key("ports", port_mapping)
                .with_key(CompositionKey::new(VOLUME_MOUNT))
                .with_key(CompositionKey::new(ENVIRONMENT).applied_by_default()),
        }
    }
}

impl Default for ContainerFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompositionFactory for ContainerFactory {
    fn name(&self) -> &str {
        "container"
    }

    fn registrations(&self) -> &KeyTable {
        &self.keys
    }

    fn create(&self, key: &CompositionKey) -> CompositionResult<Box<dyn Composition>> {
        let key = key.clone();
        let options = CompositionOptions::empty();
        match key.name() {
            PORT_MAPPING => Ok(Box::new(PortMapping { key, options })),
            VOLUME_MOUNT => Ok(Box::new(VolumeMountComposition { key, options })),
            ENVIRONMENT => Ok(Box::new(Environment { key, options })),
            other => Err(CompositionError::Creation(other.to_string())),
        }
    }

    async fn apply(
        &self,
        key: &CompositionKey,
        server: &Server,
        io: &Interaction,
    ) -> CompositionResult<CompositionOptions> {
        match key.name() {
            PORT_MAPPING => {
                let prompt = "Host port";
                let host = parse_port(prompt, &io.prompt(prompt, Some(DEFAULT_HOST_PORT)).await?)?;
                let prompt = "Container port";
                let same_as_host = host.to_string();
                let container = parse_port(prompt, &io.prompt(prompt, Some(same_as_host.as_str())).await?)?;
                Ok(CompositionOptions::from_typed(&PortMappingOptions {
                    host,
                    container,
                    protocol: default_protocol(),
                })?)
            }
            VOLUME_MOUNT => {
                let source = io.prompt("Host path to mount", None).await?;
                let target = io.prompt("Mount target", Some(DEFAULT_MOUNT_TARGET)).await?;
                if source.trim().is_empty() {
                    return Err(CompositionError::InvalidAnswer {
                        prompt: "Host path to mount".to_string(),
                        answer: source,
                        reason: "path cannot be empty".to_string(),
                    });
                }
                Ok(CompositionOptions::from_typed(&VolumeMountOptions {
                    source,
                    target,
                    read_only: false,
                })?)
            }
            ENVIRONMENT => {
                io.message(format!("Writing baseline environment for {}", server.name)).await;
                Ok(CompositionOptions::empty())
            }
            other => Err(CompositionError::Creation(other.to_string())),
        }
    }

    fn generate(&self, key: &CompositionKey, raw: &RawOptions) -> CompositionResult<CompositionOptions> {
        match key.name() {
            PORT_MAPPING => Ok(port_schema().decode(raw)?),
            VOLUME_MOUNT => Ok(volume_schema().decode(raw)?),
            _ => Ok(CompositionOptions::empty()),
        }
    }
}
