//! Minecraft specific compositions

use super::container::parse_port;
use crate::error::{CompositionError, CompositionResult};
use crate::factory::{Composition, CompositionFactory};
use crate::key::{CompositionKey, KeyTable};
use crate::options::{CompositionOptions, FieldKind, OptionsSchema, RawOptions};
use crate::protocol::Interaction;
use async_trait::async_trait;
use harbor_types::Server;
use serde::{Deserialize, Serialize};

pub const GAME: &str = "minecraft";
pub const SERVER_PROPERTIES: &str = "server-properties";
pub const EULA: &str = "eula";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RconOptions {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerPropertiesOptions {
    pub motd: String,
    pub max_players: u32,
    pub rcon: RconOptions,
}

fn properties_schema() -> OptionsSchema {
    OptionsSchema::new()
        .required("motd", FieldKind::Text)
        .required("max_players", FieldKind::Integer)
        .required(
            "rcon",
            FieldKind::Nested(
                OptionsSchema::new()
                    .required("enabled", FieldKind::Boolean)
                    .optional("port", FieldKind::Integer),
            ),
        )
}

fn parse_yes_no(prompt: &str, answer: &str) -> CompositionResult<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => Ok(true),
        "n" | "no" | "false" => Ok(false),
        _ => Err(CompositionError::InvalidAnswer {
            prompt: prompt.to_string(),
            answer: answer.to_string(),
            reason: "expected y or n".to_string(),
        }),
    }
}

/// Writes `server.properties` overrides as container environment.
pub struct ServerProperties {
    key: CompositionKey,
    options: CompositionOptions,
}

#[async_trait]
impl Composition for ServerProperties {
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
        let options: ServerPropertiesOptions = self.options.bind()?;
        let env = &mut server.environment;
        env.insert("MOTD".to_string(), options.motd);
        env.insert("MAX_PLAYERS".to_string(), options.max_players.to_string());
        env.insert("ENABLE_RCON".to_string(), options.rcon.enabled.to_string());
        match options.rcon.port {
            Some(port) if options.rcon.enabled => {
                env.insert("RCON_PORT".to_string(), port.to_string());
            }
            _ => {
                env.remove("RCON_PORT");
            }
        }
        Ok(())
    }
}

/// Accepts the Minecraft EULA.
pub struct Eula {
    key: CompositionKey,
    options: CompositionOptions,
}

#[async_trait]
impl Composition for Eula {
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
        server.environment.insert("EULA".to_string(), "TRUE".to_string());
        Ok(())
    }
}

pub struct MinecraftFactory {
    keys: KeyTable,
}

impl MinecraftFactory {
    pub fn new() -> Self {
        Self {
            keys: KeyTable::new()
                .with_key(CompositionKey::new(SERVER_PROPERTIES))
                .with_key(CompositionKey::new(EULA).applied_by_default()),
        }
    }
}

impl Default for MinecraftFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompositionFactory for MinecraftFactory {
    fn name(&self) -> &str {
        GAME
    }

    fn registrations(&self) -> &KeyTable {
        &self.keys
    }

    fn create(&self, key: &CompositionKey) -> CompositionResult<Box<dyn Composition>> {
        let key = key.clone();
        let options = CompositionOptions::empty();
        match key.name() {
            SERVER_PROPERTIES => Ok(Box::new(ServerProperties { key, options })),
            EULA => Ok(Box::new(Eula { key, options })),
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
            SERVER_PROPERTIES => {
                let default_motd = format!("{} on Harbor", server.name);
                let motd = io.prompt("Message of the day", Some(default_motd.as_str())).await?;

                let prompt = "Max players";
                let answer = io.prompt(prompt, Some("20")).await?;
                let max_players = answer.trim().parse::<u32>().map_err(|_| CompositionError::InvalidAnswer {
                    prompt: prompt.to_string(),
                    answer: answer.clone(),
                    reason: "expected a whole number".to_string(),
                })?;

                let prompt = "Enable RCON? (y/n)";
                let enabled = parse_yes_no(prompt, &io.prompt(prompt, Some("n")).await?)?;
                let port = if enabled {
                    let prompt = "RCON port";
                    Some(parse_port(prompt, &io.prompt(prompt, Some("25575")).await?)?)
                } else {
                    None
                };

                Ok(CompositionOptions::from_typed(&ServerPropertiesOptions {
                    motd,
                    max_players,
                    rcon: RconOptions { enabled, port },
                })?)
            }
            EULA => {
                io.message("By running this server you agree to the Minecraft EULA (https://aka.ms/MinecraftEULA)")
                    .await;
                Ok(CompositionOptions::empty())
            }
            other => Err(CompositionError::Creation(other.to_string())),
        }
    }

    fn generate(&self, key: &CompositionKey, raw: &RawOptions) -> CompositionResult<CompositionOptions> {
        match key.name() {
            SERVER_PROPERTIES => Ok(properties_schema().decode(raw)?),
            _ => Ok(CompositionOptions::empty()),
        }
    }
}
