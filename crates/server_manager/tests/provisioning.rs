//! End-to-end provisioning scenarios
//!
//! These tests drive the manager with the built-in compositions, in-memory or
//! file-backed storage and scripted front ends.

use composition_system::{
    builtin, protocol::Inbound, DefaultsFrontEnd, FactoryRegistry, ItemError, ItemOrigin, JsonFrontEnd,
    ScriptedFrontEnd,
};
use futures::{SinkExt, StreamExt};
use harbor_types::{ServerGame, ServerSpec, ServerState};
use server_manager::{
    ContainerInspector, JsonFileStorage, ManagerConfig, ManagerError, MemoryStorage, ProvisionStatus,
    ServerManager, ServerStorage, StaticInspector, UnavailableInspector,
};
use std::sync::Arc;
use tempfile::TempDir;

fn registry() -> Arc<FactoryRegistry> {
    let registry = FactoryRegistry::new();
    builtin::register_builtin(&registry);
    Arc::new(registry)
}

fn manager(storage: Arc<dyn ServerStorage>, inspector: Arc<dyn ContainerInspector>, apply_defaults: bool) -> ServerManager {
    ServerManager::new(
        storage,
        inspector,
        registry(),
        ManagerConfig {
            apply_defaults,
            ..ManagerConfig::default()
        },
    )
}

fn memory_manager(apply_defaults: bool) -> ServerManager {
    manager(
        Arc::new(MemoryStorage::new()),
        Arc::new(StaticInspector::new()),
        apply_defaults,
    )
}

fn minecraft(name: &str) -> ServerSpec {
    ServerSpec::new(name, ServerGame::new("minecraft").with_version("1.20.4"))
}

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn scripted(answers: &[Option<&str>]) -> Box<ScriptedFrontEnd> {
    Box::new(ScriptedFrontEnd::new(
        answers.iter().map(|answer| answer.map(str::to_string)),
    ))
}

#[tokio::test]
async fn test_inspection_failure_still_reports_created() {
    let storage = Arc::new(MemoryStorage::new());
    let manager = manager(
        storage.clone(),
        Arc::new(UnavailableInspector::new("docker socket not found")),
        false,
    );

    assert!(!manager.exists_server("mc1").await.unwrap());
    let report = manager
        .provision(minecraft("mc1"), &[], Box::new(DefaultsFrontEnd::new()))
        .await
        .unwrap();

    assert_eq!(report.status(), ProvisionStatus::Created);
    assert_eq!(report.server.state, ServerState::Registered);
    let warnings = report.warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("docker socket not found"));

    assert!(storage.exists("mc1").await);
    assert_eq!(manager.get_server("mc1").unwrap().state().await, ServerState::Registered);
}

#[tokio::test]
async fn test_successful_provision_is_ready() {
    let manager = memory_manager(true);
    let report = manager
        .provision(minecraft("mc1"), &[], Box::new(DefaultsFrontEnd::new()))
        .await
        .unwrap();

    assert_eq!(report.status(), ProvisionStatus::Ready);
    assert!(report.warnings().is_empty());
    assert!(report.server.facts.is_some());

    let compositions = report.compositions.as_ref().unwrap();
    let applied: Vec<_> = compositions
        .items
        .iter()
        .map(|item| (item.name.as_str(), item.origin))
        .collect();
    assert_eq!(
        applied,
        vec![("eula", ItemOrigin::Default), ("environment", ItemOrigin::Default)]
    );
    assert_eq!(report.server.environment.get("EULA").map(String::as_str), Some("TRUE"));
    assert_eq!(
        report.server.environment.get("HARBOR_SERVER").map(String::as_str),
        Some("mc1")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_create_has_one_winner() {
    let manager = Arc::new(memory_manager(false));

    let attempts = (0..8).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.create_server(minecraft("mc1")).await })
    });
    let results = futures::future::join_all(attempts).await;

    let mut created = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => created += 1,
            Err(ManagerError::AlreadyExists(name)) => assert_eq!(name, "mc1"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
async fn test_duplicate_single_composition_is_rejected() {
    let manager = memory_manager(false);
    let report = manager
        .provision(
            minecraft("mc1"),
            &names(&["port-mapping", "port-mapping"]),
            Box::new(DefaultsFrontEnd::new()),
        )
        .await
        .unwrap();

    let items = &report.compositions.as_ref().unwrap().items;
    assert!(items[0].is_ok());
    assert!(matches!(
        items[1].error,
        Some(ItemError::SingleCompositionConflict { ref conflicting, .. }) if conflicting == "port-mapping"
    ));
    assert_eq!(report.server.ports.len(), 1);
    assert_eq!(report.server.ports[0].host, 25565);
}

#[tokio::test]
async fn test_unknown_and_default_names_are_per_item_errors() {
    let manager = memory_manager(false);
    let report = manager
        .provision(
            minecraft("mc1"),
            &names(&["warp-drive", "eula", "volume-mount"]),
            scripted(&[Some("/srv/mc1"), None]),
        )
        .await
        .unwrap();

    let compositions = report.compositions.as_ref().unwrap();
    assert!(matches!(compositions.items[0].error, Some(ItemError::FactoryNotFound(_))));
    assert!(matches!(
        compositions.items[1].error,
        Some(ItemError::DefaultCompositionRejected(_))
    ));
    assert!(compositions.items[2].is_ok());
    assert_eq!(report.server.volumes[0].source, "/srv/mc1");
    assert_eq!(report.server.volumes[0].target, "/data");
    assert!(!report.compositions_applied());
}

#[tokio::test]
async fn test_compositions_apply_in_request_order() {
    let manager = memory_manager(false);
    let front = ScriptedFrontEnd::new([
        Some("Hello".to_string()),
        Some("10".to_string()),
        Some("n".to_string()),
        Some("7777".to_string()),
        None,
    ]);
    let transcript = front.transcript();

    let report = manager
        .provision(
            minecraft("mc1"),
            &names(&["server-properties", "ports"]),
            Box::new(front),
        )
        .await
        .unwrap();

    let compositions = report.compositions.as_ref().unwrap();
    assert_eq!(compositions.applied(), vec!["server-properties", "ports"]);
    assert_eq!(report.server.environment.get("MOTD").map(String::as_str), Some("Hello"));
    assert_eq!(report.server.ports[0].host, 7777);
    assert_eq!(report.server.ports[0].container, 7777);

    let lines = transcript.lines().await;
    let first_phase = lines.iter().position(|line| line.starts_with("[1/2]")).unwrap();
    let second_phase = lines.iter().position(|line| line.starts_with("[2/2]")).unwrap();
    let port_prompt = lines.iter().position(|line| line.contains("Host port")).unwrap();
    assert!(first_phase < second_phase && second_phase < port_prompt);
}

#[tokio::test]
async fn test_json_front_end_round_trip() {
    let manager = memory_manager(false);
    let (out_tx, mut out_rx) = futures::channel::mpsc::unbounded::<String>();
    let (mut in_tx, in_rx) = futures::channel::mpsc::unbounded::<String>();

    // Client side: answer the host port, take the default for everything else.
    let client = tokio::spawn(async move {
        let mut frames = Vec::new();
        while let Some(frame) = out_rx.next().await {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            let op = value["op"].as_str().unwrap_or_default().to_string();
            if op == "prompt" {
                let id = value["d"]["id"].as_u64().unwrap();
                let answer = if value["d"]["text"] == "Host port" {
                    Some("30000".to_string())
                } else {
                    None
                };
                let reply = Inbound::Answer { id, value: answer }.encode().unwrap();
                in_tx.send(reply).await.unwrap();
            }
            frames.push(op.clone());
            if op == "close" {
                break;
            }
        }
        frames
    });

    let report = manager
        .provision(
            minecraft("mc1"),
            &names(&["port-mapping"]),
            Box::new(JsonFrontEnd::new(out_tx, in_rx)),
        )
        .await
        .unwrap();

    assert!(report.compositions_applied());
    assert_eq!(report.server.ports[0].host, 30000);
    assert_eq!(report.server.ports[0].container, 30000);

    let frames = client.await.unwrap();
    assert_eq!(frames.iter().filter(|op| op.as_str() == "prompt").count(), 2);
    assert_eq!(frames.last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn test_apply_to_unregistered_server_fails() {
    let manager = memory_manager(false);
    let handle = manager.create_server(minecraft("mc1")).await.unwrap();
    manager.add_server(&handle).unwrap();

    let err = manager
        .apply_compositions(&handle, &names(&["port-mapping"]), Box::new(DefaultsFrontEnd::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Pipeline(_)));
}

#[tokio::test]
async fn test_stored_servers_are_restored() {
    let dir = TempDir::new().unwrap();

    {
        let manager = manager(
            Arc::new(JsonFileStorage::new(dir.path())),
            Arc::new(StaticInspector::new()),
            false,
        );
        let report = manager
            .provision(
                minecraft("mc1"),
                &names(&["server-properties"]),
                scripted(&[Some("Restored"), None, Some("y"), None]),
            )
            .await
            .unwrap();
        assert!(report.compositions_applied());
    }

    let manager = manager(
        Arc::new(JsonFileStorage::new(dir.path())),
        Arc::new(StaticInspector::new()),
        false,
    );
    assert!(manager.exists_server("mc1").await.unwrap());
    assert_eq!(manager.load_servers().await.unwrap(), 1);
    assert_eq!(manager.load_servers().await.unwrap(), 0);

    let server = manager.get_server("mc1").unwrap().snapshot().await;
    assert_eq!(server.state, ServerState::Ready);
    assert!(server.has_composition("server-properties"));
    let options = &server.compositions[0].options;
    assert_eq!(options["motd"], "Restored");
    assert_eq!(options["rcon"]["port"], 25575);

    assert!(matches!(
        manager.create_server(minecraft("mc1")).await,
        Err(ManagerError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_name_cannot_escape_storage_directory() {
    let dir = TempDir::new().unwrap();
    let servers = dir.path().join("servers");
    let manager = manager(
        Arc::new(JsonFileStorage::new(&servers)),
        Arc::new(StaticInspector::new()),
        false,
    );

    let err = manager
        .provision(minecraft("../escaped"), &[], Box::new(DefaultsFrontEnd::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::InvalidName(ref name, _) if name == "../escaped"));
    assert!(!dir.path().join("escaped.server.json").exists());
    assert!(manager.get_server("../escaped").is_none());
    assert_eq!(std::fs::read_dir(&servers).unwrap().count(), 0);
}

#[tokio::test]
async fn test_reapplied_single_composition_keeps_one_binding() {
    let manager = memory_manager(false);
    let report = manager
        .provision(minecraft("mc1"), &names(&["port-mapping"]), Box::new(DefaultsFrontEnd::new()))
        .await
        .unwrap();
    assert!(report.compositions_applied());

    let handle = manager.get_server("mc1").unwrap();
    let second = manager
        .apply_compositions(&handle, &names(&["ports"]), Box::new(DefaultsFrontEnd::new()))
        .await
        .unwrap();
    assert!(matches!(
        second.items[0].error,
        Some(ItemError::SingleCompositionConflict { ref conflicting, .. }) if conflicting == "port-mapping"
    ));

    let server = handle.snapshot().await;
    assert_eq!(server.ports.len(), 1);
    assert_eq!(server.compositions.iter().filter(|record| record.key == "port-mapping").count(), 1);
}
