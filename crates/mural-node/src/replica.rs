//! Replica assembly: sockets, background tasks, lifecycle.

use crate::config::ReplicaConfig;
use crate::handler;
use mural_election::{ElectionConfig, ElectionManager};
use mural_registry::RegistryClient;
use mural_storage::{Datastore, Journal};
use mural_wire::Publisher;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors that can keep a replica from starting. All of them are fatal:
/// the process exits non-zero.
#[derive(Debug, Error)]
pub enum StartError {
    /// A required socket could not be bound.
    #[error("failed to bind {role} socket: {source}")]
    Bind {
        /// Which socket failed.
        role: &'static str,
        /// The underlying bind error.
        source: std::io::Error,
    },

    /// The datastore could not be opened.
    #[error("datastore error: {0}")]
    Store(#[from] mural_storage::StoreError),

    /// The registry refused or never answered the rank registration.
    #[error("registry error: {0}")]
    Registry(#[from] mural_registry::RegistryError),

    /// Another I/O failure during startup.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The actual bound addresses of a running replica, resolved after binding
/// (ports may be configured as 0).
#[derive(Debug, Clone, Copy)]
pub struct ReplicaAddrs {
    /// Client (broker-facing) socket.
    pub client: SocketAddr,
    /// Peer replication socket.
    pub replication: SocketAddr,
    /// Peer election socket.
    pub election: SocketAddr,
}

/// Shared handles every request and background task works against.
pub(crate) struct ReplicaContext {
    pub config: ReplicaConfig,
    pub store: Arc<Datastore>,
    pub publisher: Publisher,
    pub registry: RegistryClient,
    pub election: Arc<ElectionManager>,
}

/// One running message-server replica.
pub struct Replica {
    ctx: Arc<ReplicaContext>,
    addrs: ReplicaAddrs,
    rank: u64,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Replica {
    /// Starts a replica: opens the datastore, binds the three sockets,
    /// registers with the registry, pulls the cluster state, and spawns the
    /// serving and background tasks.
    pub async fn start(config: ReplicaConfig) -> Result<Self, StartError> {
        let store = Arc::new(Datastore::open(&config.data_dir)?);

        let client_listener = bind("client", config.client_addr).await?;
        let replication_listener = bind("replication", config.replication_addr).await?;
        let election_listener = bind("election", config.election_addr).await?;

        let addrs = ReplicaAddrs {
            client: client_listener.local_addr()?,
            replication: replication_listener.local_addr()?,
            election: election_listener.local_addr()?,
        };
        let advertised_replication =
            format!("{}:{}", config.advertise_host, addrs.replication.port());
        let advertised_election = format!("{}:{}", config.advertise_host, addrs.election.port());

        let (stop_tx, stop_rx) = watch::channel(false);

        let registry = RegistryClient::new(
            &config.registry_addr,
            Duration::from_secs_f64(config.timing.registry_timeout_secs),
        );
        let rank = acquire_rank(
            &registry,
            &config.server_name,
            &advertised_replication,
            &advertised_election,
        )
        .await?;

        let publisher = match &config.proxy_addr {
            Some(addr) => Publisher::connect(addr.clone(), stop_rx.clone()),
            None => Publisher::disabled(),
        };

        let journal_dir = config.data_dir.join("journal");
        let replication_journal = Journal::open(journal_dir.join("replication.jsonl"))?;
        let election_journal = Journal::open(journal_dir.join("election.jsonl"))?;

        let election = ElectionManager::new(
            ElectionConfig {
                server: config.server_name.clone(),
                rank,
                coordinator_timeout: Duration::from_secs_f64(
                    config.timing.coordinator_timeout_secs,
                ),
                election_timeout: config.timing.election_deadline(),
                announcement_timeout: Duration::from_secs_f64(
                    config.timing.announcement_timeout_secs,
                ),
                monitor_interval: Duration::from_secs_f64(config.timing.monitor_secs),
            },
            registry.clone(),
            store.clone(),
            publisher.clone(),
            election_journal,
            stop_rx.clone(),
        );

        // Adopt the cluster state before serving the first client.
        mural_replication::sync_on_start(
            &store,
            &registry,
            &replication_journal,
            &config.server_name,
            config.timing.coordinator_timeout_secs,
            config.timing.replication_deadline(),
        )
        .await;

        let ctx = Arc::new(ReplicaContext {
            config: config.clone(),
            store: store.clone(),
            publisher,
            registry: registry.clone(),
            election: election.clone(),
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(handler::serve_clients(
            ctx.clone(),
            client_listener,
            stop_rx.clone(),
        )));
        tasks.push(tokio::spawn(mural_replication::serve_replication(
            store.clone(),
            replication_journal,
            replication_listener,
            stop_rx.clone(),
        )));
        tasks.push(tokio::spawn(election.clone().serve(election_listener)));
        tasks.push(tokio::spawn(mural_election::run_monitor(
            election,
            stop_rx.clone(),
        )));
        tasks.push(tokio::spawn(heartbeat_loop(
            registry,
            config.server_name.clone(),
            Duration::from_secs_f64(config.timing.heartbeat_secs),
            stop_rx,
        )));

        info!(
            server = %config.server_name,
            rank,
            client = %addrs.client,
            replication = %addrs.replication,
            election = %addrs.election,
            "Replica running"
        );

        Ok(Self {
            ctx,
            addrs,
            rank,
            stop: stop_tx,
            tasks,
        })
    }

    /// The actual bound socket addresses.
    pub fn addrs(&self) -> ReplicaAddrs {
        self.addrs
    }

    /// The rank the registry assigned this replica.
    pub fn rank(&self) -> u64 {
        self.rank
    }

    /// The coordinator this replica currently follows (or holds).
    pub fn coordinator(&self) -> Option<String> {
        self.ctx.election.coordinator()
    }

    /// True when this replica holds the coordinator role.
    pub fn is_coordinator(&self) -> bool {
        self.ctx.election.is_coordinator()
    }

    /// The underlying datastore, exposed for tooling and tests.
    pub fn store(&self) -> Arc<Datastore> {
        self.ctx.store.clone()
    }

    /// Stops accepting work, joins the background tasks, and flushes all
    /// sequences to disk.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Err(e) = self.ctx.store.persist_all() {
            warn!(error = %e, "Final flush failed");
        }
        info!(server = %self.ctx.config.server_name, "Replica stopped");
    }
}

async fn bind(role: &'static str, addr: SocketAddr) -> Result<TcpListener, StartError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartError::Bind { role, source })
}

/// Rank acquisition with a short retry window: the registry may come up
/// after the replicas in a fresh deployment.
async fn acquire_rank(
    registry: &RegistryClient,
    server: &str,
    replication_addr: &str,
    election_addr: &str,
) -> Result<u64, StartError> {
    let mut attempt = 0u32;
    loop {
        match registry.rank(server, replication_addr, election_addr).await {
            Ok(rank) => return Ok(rank),
            Err(e) if attempt < 4 => {
                attempt += 1;
                warn!(error = %e, attempt, "Rank registration failed, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn heartbeat_loop(
    registry: RegistryClient,
    server: String,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(period) => {}
        }
        if let Err(e) = registry.heartbeat(&server).await {
            warn!(error = %e, "Heartbeat failed");
        }
    }
}
