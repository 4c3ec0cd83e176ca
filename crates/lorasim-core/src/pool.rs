// ── Pool of network-server instances ──
//
// Process-wide root. Owns the two broadcast buses and the two workers
// that copy every bus message to every instance. Workers hold a weak
// handle so dropping the pool shuts them down.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use lorasim_integration::NsConfig;
use lorasim_lorawan::PhyPayload;

use crate::error::CoreError;
use crate::networkserver::NetworkServer;

/// Bus capacity. Small on purpose: producers publish from detached
/// tasks, and a full bus applies backpressure there instead of
/// growing without bound.
const BUS_CAPACITY: usize = 16;

pub struct Pool {
    servers: RwLock<HashMap<String, Arc<NetworkServer>>>,
    uplink_tx: mpsc::Sender<PhyPayload>,
    downlink_tx: mpsc::Sender<PhyPayload>,
}

impl Pool {
    /// Create the pool and spawn its two bus workers.
    pub fn new() -> Arc<Self> {
        let (uplink_tx, uplink_rx) = mpsc::channel(BUS_CAPACITY);
        let (downlink_tx, downlink_rx) = mpsc::channel(BUS_CAPACITY);

        let pool = Arc::new(Self {
            servers: RwLock::new(HashMap::new()),
            uplink_tx,
            downlink_tx,
        });

        tokio::spawn(bus_worker(
            Arc::downgrade(&pool),
            uplink_rx,
            "uplink",
            NetworkServer::forward_uplink,
        ));
        tokio::spawn(bus_worker(
            Arc::downgrade(&pool),
            downlink_rx,
            "downlink",
            NetworkServer::forward_downlink,
        ));

        pool
    }

    /// Create a network server, register it, and run the initial
    /// sync. The sync runs *after* the pool lock is released —
    /// integration calls may block on the network — and a sync
    /// failure rolls the registration back.
    pub async fn add(&self, name: &str, config: NsConfig) -> Result<Arc<NetworkServer>, CoreError> {
        let ns = {
            let mut servers = self.servers.write().expect("pool lock poisoned");
            if servers.contains_key(name) {
                return Err(CoreError::AlreadyExists("network server"));
            }
            let ns = NetworkServer::new(
                name,
                config,
                self.uplink_tx.clone(),
                self.downlink_tx.clone(),
            )?;
            servers.insert(name.to_string(), ns.clone());
            ns
        };

        if let Err(e) = ns.sync().await {
            warn!(server = %name, error = %e, "initial sync failed, removing instance");
            self.servers
                .write()
                .expect("pool lock poisoned")
                .remove(name);
            return Err(e);
        }

        Ok(ns)
    }

    pub fn get(&self, name: &str) -> Result<Arc<NetworkServer>, CoreError> {
        self.servers
            .read()
            .expect("pool lock poisoned")
            .get(name)
            .cloned()
            .ok_or(CoreError::NotFound("network server"))
    }

    /// Instances sorted by name for stable output.
    pub fn list(&self) -> Vec<Arc<NetworkServer>> {
        let mut servers: Vec<Arc<NetworkServer>> = self
            .servers
            .read()
            .expect("pool lock poisoned")
            .values()
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.name().cmp(b.name()));
        servers
    }

    /// Drops the map entry. Fan-out tasks already dispatched to the
    /// instance complete harmlessly against the orphaned Arc.
    pub fn remove(&self, name: &str) -> Result<(), CoreError> {
        self.servers
            .write()
            .expect("pool lock poisoned")
            .remove(name)
            .map(|_| ())
            .ok_or(CoreError::NotFound("network server"))
    }
}

/// Copy every bus frame to every instance, one task per instance so
/// a slow one never delays the rest. Exits when the pool is dropped
/// or every producer handle is gone.
async fn bus_worker(
    pool: Weak<Pool>,
    mut rx: mpsc::Receiver<PhyPayload>,
    direction: &'static str,
    deliver: fn(&NetworkServer, PhyPayload),
) {
    while let Some(frame) = rx.recv().await {
        let Some(pool) = pool.upgrade() else { break };
        let servers: Vec<Arc<NetworkServer>> = pool
            .servers
            .read()
            .expect("pool lock poisoned")
            .values()
            .cloned()
            .collect();
        drop(pool);

        for ns in servers {
            debug!(server = %ns.name(), direction, "propagating frame");
            let frame = frame.clone();
            tokio::spawn(async move { deliver(&ns, frame) });
        }
    }
    debug!(direction, "bus worker exiting");
}

// ── Tests ───────────────────────────────────────────────────────────
