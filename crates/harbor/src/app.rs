//! Application wiring: storage, inspector, registry and the manager, plus the
//! command implementations and their text output.

use crate::cli::{CliCommand, CreateArgs};
use crate::config::AppConfig;
use crate::terminal::TerminalFrontEnd;
use anyhow::Context;
use composition_system::{builtin, DefaultsFrontEnd, FactoryRegistry, FrontEnd, ItemStatus};
use harbor_types::{ServerGame, ServerSpec};
use server_manager::{
    ContainerInspector, JsonFileStorage, MemoryStorage, ProvisionReport, ProvisionStatus, ServerManager,
    ServerStorage, StaticInspector, UnavailableInspector,
};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

pub struct Application {
    manager: ServerManager,
}

impl Application {
    /// Builds the collaborators named by `config` and restores stored
    /// servers.
    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn ServerStorage> = match config.storage.backend.as_str() {
            "json" => Arc::new(JsonFileStorage::new(config.storage_directory())),
            _ => Arc::new(MemoryStorage::new()),
        };
        let inspector: Arc<dyn ContainerInspector> = match config.container.engine.as_str() {
            "none" => Arc::new(UnavailableInspector::new("no container engine is configured")),
            _ => Arc::new(StaticInspector::new()),
        };

        let registry = FactoryRegistry::new();
        builtin::register_builtin(&registry);

        let manager = ServerManager::new(storage, inspector, Arc::new(registry), config.to_manager_config());
        let loaded = manager.load_servers().await.context("loading stored servers")?;
        info!("Storage backend {} ready with {} server(s)", config.storage.backend, loaded);

        Ok(Self { manager })
    }

    /// Runs one command and returns the text to print on stdout.
    pub async fn run(&self, command: CliCommand) -> anyhow::Result<String> {
        match command {
            CliCommand::CreateServer(args) => {
                let front: Box<dyn FrontEnd> = if args.no_input {
                    Box::new(DefaultsFrontEnd::new())
                } else {
                    Box::new(TerminalFrontEnd::stdio())
                };
                let report = self.create_server(args, front).await?;
                Ok(format_provision(&report))
            }
            CliCommand::ListServers => Ok(self.list_servers().await),
            CliCommand::ListCompositions { game } => Ok(self.list_compositions(&game)),
        }
    }

    pub async fn create_server(&self, args: CreateArgs, front: Box<dyn FrontEnd>) -> anyhow::Result<ProvisionReport> {
        if self.manager.exists_server(&args.name).await? {
            anyhow::bail!("A server named {} already exists", args.name);
        }

        let mut game = ServerGame::new(args.game);
        if let Some(version) = args.version {
            game = game.with_version(version);
        }
        let mut spec = ServerSpec::new(args.name, game);
        if let Some(image) = args.image {
            spec = spec.with_image(image);
        }

        let name = spec.name.clone();
        self.manager
            .provision(spec, &args.compositions, front)
            .await
            .with_context(|| format!("creating server {name}"))
    }

    pub async fn list_servers(&self) -> String {
        let servers = self.manager.list_servers();
        if servers.is_empty() {
            return "No servers found.\n".to_string();
        }

        let mut out = format!("{:<20} {:<24} {:<14} {}\n", "NAME", "GAME", "STATE", "COMPOSITIONS");
        for handle in servers {
            let server = handle.snapshot().await;
            let compositions: Vec<&str> = server.compositions.iter().map(|record| record.key.as_str()).collect();
            let _ = writeln!(
                out,
                "{:<20} {:<24} {:<14} {}",
                server.name,
                server.game.to_string(),
                server.state.to_string(),
                if compositions.is_empty() {
                    "-".to_string()
                } else {
                    compositions.join(", ")
                }
            );
        }
        out
    }

    pub fn list_compositions(&self, game: &str) -> String {
        let factories = self.manager.registry().resolve(&ServerGame::new(game));
        if factories.is_empty() {
            return format!("No compositions are available for {game}.\n");
        }

        let mut out = format!("Compositions for {game}:\n");
        for factory in factories.factories() {
            for name in factory.registrations().names() {
                if factories.factory_for(name).map(|owner| owner.name()) != Some(factory.name()) {
                    continue;
                }
                let Some(key) = factory.registrations().by_name(name) else {
                    continue;
                };
                let mut flags = Vec::new();
                if key.name() != name {
                    flags.push(format!("alias of {}", key.name()));
                }
                if key.is_default() {
                    flags.push("default".to_string());
                }
                if key.is_single() {
                    flags.push("single".to_string());
                }
                let _ = write!(out, "  {name:<20} ({})", factory.name());
                if !flags.is_empty() {
                    let _ = write!(out, " [{}]", flags.join(", "));
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Renders the final summary of `server create`. The per-item phase lines
/// were already shown by the front end while the run was in progress.
pub fn format_provision(report: &ProvisionReport) -> String {
    let mut out = String::new();

    if let Some(compositions) = &report.compositions {
        let total = compositions.items.len();
        for (index, item) in compositions.items.iter().enumerate() {
            let marker = match item.status {
                ItemStatus::Ok => "ok",
                ItemStatus::Error => "error",
            };
            let _ = writeln!(out, "[{}/{}] {:<5} {}", index + 1, total, marker, item.detail);
        }
    }

    let server = &report.server;
    match report.status() {
        ProvisionStatus::Ready => {
            let _ = writeln!(out, "Server {} created successfully!", server.name);
        }
        ProvisionStatus::Created => {
            let _ = writeln!(out, "Server {} created, but it is not ready yet.", server.name);
        }
    }
    let _ = writeln!(out, "Status: {}", server.state);

    for warning in report.warnings() {
        let _ = writeln!(out, "Notice: {warning}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_config(engine: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.backend = "memory".to_string();
        config.container.engine = engine.to_string();
        config
    }

    fn create_args(name: &str, compositions: &[&str]) -> CreateArgs {
        CreateArgs {
            name: name.to_string(),
            game: "minecraft".to_string(),
            version: Some("1.20.4".to_string()),
            image: None,
            compositions: compositions.iter().map(|name| name.to_string()).collect(),
            no_input: true,
        }
    }

    #[tokio::test]
    async fn test_create_prints_items_and_status() {
        let app = Application::new(&memory_config("static")).await.unwrap();
        let report = app
            .create_server(create_args("mc1", &["ports", "warp-drive"]), Box::new(DefaultsFrontEnd::new()))
            .await
            .unwrap();

        let output = format_provision(&report);
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].starts_with("[1/4] ok"));
        assert!(lines[2].starts_with("[3/4] ok"));
        assert!(lines[3].starts_with("[4/4] error"));
        assert!(output.contains("Server mc1 created successfully!"));
        assert!(output.contains("Status: ready"));
        assert!(!output.contains("Notice:"));
    }

    #[tokio::test]
    async fn test_failed_inspection_prints_separate_notice() {
        let app = Application::new(&memory_config("none")).await.unwrap();
        let report = app
            .create_server(create_args("mc1", &[]), Box::new(DefaultsFrontEnd::new()))
            .await
            .unwrap();

        let output = format_provision(&report);
        assert!(output.contains("Server mc1 created, but it is not ready yet."));
        assert!(output.contains("Status: registered"));
        assert!(output.contains("Notice: Container inspection failed"));
    }

    #[tokio::test]
    async fn test_create_rejects_existing_name() {
        let app = Application::new(&memory_config("static")).await.unwrap();
        app.create_server(create_args("mc1", &[]), Box::new(DefaultsFrontEnd::new()))
            .await
            .unwrap();

        let err = app
            .create_server(create_args("mc1", &[]), Box::new(DefaultsFrontEnd::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_listing_servers_and_compositions() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.storage.directory = dir.path().display().to_string();

        {
            let app = Application::new(&config).await.unwrap();
            assert_eq!(app.list_servers().await, "No servers found.\n");
            app.create_server(create_args("mc1", &["volume-mount"]), Box::new(DefaultsFrontEnd::new()))
                .await
                .unwrap();
        }

        let app = Application::new(&config).await.unwrap();
        let listing = app.list_servers().await;
        assert!(listing.starts_with("NAME"));
        assert!(listing.contains("mc1"));
        assert!(listing.contains("minecraft"));
        assert!(listing.contains("eula, environment"));

        let compositions = app.list_compositions("minecraft");
        assert!(compositions.contains("port-mapping"));
        assert!(compositions.contains("server-properties"));
        assert!(compositions.contains("[alias of port-mapping, single]"));
        assert!(compositions.contains("[default]"));

        assert!(app.list_compositions("factorio").contains("port-mapping"));
    }
}
