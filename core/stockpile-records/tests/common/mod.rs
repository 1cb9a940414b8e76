#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Once};
use stockpile_network::NetworkMonitor;
use stockpile_records::{Record, Stockpile, StockpileConfig, Transaction, TransactionKind};
use stockpile_sync::mock::{MockRemoteStore, StaticAuth};
use stockpile_sync::RetryPolicy;
use stockpile_types::{namespaces, ManualClock, Timestamp};

pub const START_MS: u64 = 1_718_000_000_000;

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Harness {
    pub engine: Stockpile,
    pub remote: Arc<MockRemoteStore>,
    pub auth: Arc<StaticAuth>,
    pub network: NetworkMonitor,
    pub clock: ManualClock,
}

pub fn config() -> StockpileConfig {
    let mut config = StockpileConfig::default();
    config.sync.retry = RetryPolicy::no_retry();
    config
}

pub fn harness(online: bool) -> Harness {
    harness_with(config(), online)
}

pub fn harness_with(config: StockpileConfig, online: bool) -> Harness {
    init_tracing();
    let remote = Arc::new(MockRemoteStore::new());
    let auth = Arc::new(StaticAuth::new(true));
    let network = NetworkMonitor::new(online);
    let clock = ManualClock::new(Timestamp::from_millis(START_MS));
    let engine = Stockpile::open_with_clock(
        &config,
        remote.clone(),
        auth.clone(),
        network.clone(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    Harness {
        engine,
        remote,
        auth,
        network,
        clock,
    }
}

pub fn borrow(resource: &str, quantity: i64) -> Transaction {
    Transaction::new(resource, "alice", quantity, TransactionKind::Borrow)
}

/// A second record type, to check per-collection behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrower {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl Record for Borrower {
    const COLLECTION: &'static str = namespaces::BORROWERS;
    const ID_PREFIX: &'static str = "brw";

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name is required".into());
        }
        Ok(())
    }
}
