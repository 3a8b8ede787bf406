//! Storage calls from a plugin node to a hub node over loopback sockets.

use std::sync::Arc;
use std::time::Duration;

use plugbus::BusError;
use plugbus::HubClient;
use plugbus::Node;
use plugbus::NodeBuilder;
use plugbus::RpcServer;
use plugbus::Settings;
use plugstore::MemoryStorage;
use plugstore::SearchCriteria;
use plugstore::StorageController;
use plugstore::StorageError;
use plugstore::StorageFacade;
use plugstore::StorageNode;
use plugstore::StorageService;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_settings() -> Settings {
    Settings::default()
        .with_hub_port(0)
        .with_delivery_attempts(2)
        .with_hub_backoff(Duration::from_millis(10))
        .with_request_timeout(Duration::from_secs(3))
        .with_rpc_timeout(Duration::from_secs(3))
}

struct Fixture {
    hub: Node,
    plugin: Node,
    engine: Arc<MemoryStorage>,
    _server: RpcServer,
}

impl Fixture {
    async fn start(plugin_id: &str) -> anyhow::Result<Self> {
        init_tracing();
        let hub = NodeBuilder::new(plugbus::config::DEFAULT_HUB_ID)
            .settings(fast_settings())
            .ephemeral()
            .start()
            .await?;
        let engine = Arc::new(MemoryStorage::new());
        let server = StorageService::install(&hub, engine.clone());

        let plugin = NodeBuilder::new(plugin_id)
            .settings(fast_settings().with_hub_port(hub.port()))
            .ephemeral()
            .start()
            .await?;
        hub.directory().set_port(plugin.id(), plugin.port());

        Ok(Self { hub, plugin, engine, _server: server })
    }

    fn storage(&self) -> StorageFacade {
        StorageFacade::new(self.plugin.clone())
    }
}

// ============================================================================
//  Operations
// ============================================================================

#[tokio::test]
async fn test_crud_round_trip() -> anyhow::Result<()> {
    let fx = Fixture::start("inventory").await?;
    let storage = fx.storage();

    let laptop = StorageNode::new(":Devices:laptop", "inventory").with_value("os", "linux");
    storage.add(StorageNode::new(":Devices", "inventory")).await?;
    storage.add(laptop.clone()).await?;
    assert_eq!(fx.engine.len(), 2);

    assert_eq!(storage.get(":Devices:laptop").await?, laptop);
    assert_eq!(storage.get(":Devices").await?.children, vec!["laptop"]);

    storage.update(laptop.clone().with_value("os", "bsd")).await?;
    assert_eq!(storage.get(":Devices:laptop").await?.values["os"], "bsd");

    assert!(storage.add_or_update(StorageNode::new(":Devices:phone", "inventory")).await?);
    assert!(!storage.add_or_update(StorageNode::new(":Devices:phone", "inventory")).await?);
    assert_eq!(storage.list(":Devices").await?, vec!["laptop", "phone"]);

    let removed = storage.delete(":Devices:phone").await?;
    assert_eq!(removed.path, ":Devices:phone");
    assert_eq!(storage.list(":Devices").await?, vec!["laptop"]);
    Ok(())
}

#[tokio::test]
async fn test_rename_and_search() -> anyhow::Result<()> {
    let fx = Fixture::start("inventory").await?;
    let storage = fx.storage();

    storage.add(StorageNode::new(":Old", "inventory")).await?;
    storage.add(StorageNode::new(":Old:a", "inventory").with_value("kind", "disk")).await?;
    storage.add(StorageNode::new(":Other", "someone").with_value("kind", "disk")).await?;

    // path arguments containing the path separator survive escaping
    storage.add(StorageNode::new(":Odd/name", "inventory")).await?;
    assert_eq!(storage.get(":Odd/name").await?.path, ":Odd/name");

    storage.rename(":Old", ":New").await?;
    assert!(storage.get(":Old:a").await.unwrap_err().is_not_found());

    let disks = storage.search(&SearchCriteria::default().with_key("kind").with_value("disk")).await?;
    let paths: Vec<_> = disks.iter().map(|n| n.path.as_str()).collect();
    assert_eq!(paths, vec![":New:a", ":Other"]);

    let mine = storage.search(&SearchCriteria::under(":New").owned_by("inventory")).await?;
    assert_eq!(mine.len(), 2);
    assert!(storage.search(&SearchCriteria::under(":Nowhere")).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_flush_and_zap() -> anyhow::Result<()> {
    let fx = Fixture::start("inventory").await?;
    let storage = fx.storage();

    storage.add(StorageNode::new(":a", "inventory")).await?;
    storage.flush().await?;
    assert_eq!(fx.engine.len(), 1);

    storage.zap().await?;
    assert!(fx.engine.is_empty());
    assert!(storage.list(":").await?.is_empty());
    Ok(())
}

// ============================================================================
//  Faults
// ============================================================================

#[tokio::test]
async fn test_engine_faults_keep_their_identity() -> anyhow::Result<()> {
    let fx = Fixture::start("inventory").await?;
    let storage = fx.storage();

    match storage.get(":missing").await {
        Err(StorageError::Remote(fault)) => {
            assert_eq!(fault.name, "NotFound");
            assert_eq!(fault.message, ":missing");
        }
        other => panic!("expected remote fault, got {:?}", other),
    }

    storage.add(StorageNode::new(":a", "inventory")).await?;
    let dup = storage.add(StorageNode::new(":a", "inventory")).await.unwrap_err();
    assert!(dup.is_already_exists(), "got {:?}", dup);

    let update = storage.update(StorageNode::new(":b", "inventory")).await.unwrap_err();
    assert!(update.is_not_found());

    match storage.add(StorageNode::new("no-delimiter", "inventory")).await {
        Err(StorageError::Remote(fault)) => assert_eq!(fault.name, "StorageException"),
        other => panic!("expected backend fault, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_registered_plugin_reaches_storage() -> anyhow::Result<()> {
    init_tracing();
    let hub = NodeBuilder::new(plugbus::config::DEFAULT_HUB_ID)
        .settings(fast_settings())
        .ephemeral()
        .start()
        .await?;
    let _hub_service = plugbus::HubService::install(&hub);
    let _storage_service = StorageService::install(&hub, Arc::new(MemoryStorage::new()));

    let plugin = NodeBuilder::new("late-joiner")
        .settings(fast_settings().with_hub_port(hub.port()))
        .ephemeral()
        .start()
        .await?;
    // the hub has to learn our port before it can answer us
    HubClient::new(plugin.clone()).register("late-joiner --serve").await?;

    let storage = StorageFacade::new(plugin.clone());
    storage.add(StorageNode::new(":x", plugin.id())).await?;
    assert_eq!(storage.get(":x").await?.owner, "late-joiner");
    Ok(())
}

#[tokio::test]
async fn test_no_storage_service_times_out() -> anyhow::Result<()> {
    init_tracing();
    let hub = NodeBuilder::new(plugbus::config::DEFAULT_HUB_ID)
        .settings(fast_settings())
        .ephemeral()
        .start()
        .await?;
    let plugin = NodeBuilder::new("caller")
        .settings(fast_settings().with_hub_port(hub.port()))
        .ephemeral()
        .start()
        .await?;

    let storage = StorageFacade::new(plugin).with_timeout(Duration::from_millis(100));
    let err = storage.flush().await.unwrap_err();
    assert!(matches!(err, StorageError::Bus(BusError::Timeout { .. })), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_service_stops_after_uninstall() -> anyhow::Result<()> {
    let fx = Fixture::start("inventory").await?;
    let Fixture { hub, plugin, _server: server, .. } = fx;
    server.uninstall();

    let storage = StorageFacade::with_target(plugin, hub.id()).with_timeout(Duration::from_millis(100));
    assert!(matches!(storage.zap().await, Err(StorageError::Bus(BusError::Timeout { .. }))));
    Ok(())
}
