//! The Bully election manager.

use futures::future::join_all;
use mural_registry::RegistryClient;
use mural_storage::{Datastore, Journal};
use mural_wire::{
    call_once, read_frame, write_frame, AckReply, ElectionReply, ElectionRequest, Envelope,
    Publisher, EVENT_NEW_COORDINATOR, SERVERS_TOPIC, STATUS_ERROR,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

/// Election phases, as observed between wire events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Following a known coordinator.
    Normal,
    /// Challenging every higher-ranked peer.
    Electing,
    /// Outranked; waiting for the winner's announcement.
    Waiting,
    /// Holding the coordinator role.
    Coordinator,
}

/// Election timing and identity.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// This replica's server name.
    pub server: String,
    /// This replica's registry rank.
    pub rank: u64,
    /// Heartbeat age after which the coordinator is suspected dead.
    pub coordinator_timeout: Duration,
    /// Deadline for each election RPC.
    pub election_timeout: Duration,
    /// How long an outranked candidate waits for the announcement before
    /// restarting its election.
    pub announcement_timeout: Duration,
    /// Cadence of the coordinator-liveness monitor.
    pub monitor_interval: Duration,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    coordinator: Option<String>,
}

#[derive(Serialize)]
struct ElectionEvent<'a> {
    timestamp: f64,
    server: &'a str,
    rank: u64,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    coordinator: Option<&'a str>,
}

/// Runs Bully for one replica: answers challenges, adopts announcements,
/// and drives its own candidacies.
pub struct ElectionManager {
    config: ElectionConfig,
    registry: RegistryClient,
    store: Arc<Datastore>,
    publisher: Publisher,
    journal: Journal,
    inner: Mutex<Inner>,
    announced: Notify,
    stop: watch::Receiver<bool>,
}

impl ElectionManager {
    /// Creates the manager in `Normal` phase with no known coordinator.
    pub fn new(
        config: ElectionConfig,
        registry: RegistryClient,
        store: Arc<Datastore>,
        publisher: Publisher,
        journal: Journal,
        stop: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            store,
            publisher,
            journal,
            inner: Mutex::new(Inner {
                phase: Phase::Normal,
                coordinator: None,
            }),
            announced: Notify::new(),
            stop,
        })
    }

    /// The election configuration.
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// The currently known coordinator, if any.
    pub fn coordinator(&self) -> Option<String> {
        self.inner.lock().coordinator.clone()
    }

    /// True when this replica holds the coordinator role.
    pub fn is_coordinator(&self) -> bool {
        self.inner.lock().phase == Phase::Coordinator
    }

    /// The current election phase.
    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Serves the election socket until the stop flag flips.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        info!(addr = ?listener.local_addr().ok(), "Election listener ready");
        let mut stop = self.stop.clone();
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Election accept failed");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Election connection");
                    let manager = self.clone();
                    tokio::spawn(async move {
                        manager.handle_connection(stream).await;
                    });
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) {
        loop {
            let request: ElectionRequest = match read_frame(&mut stream).await {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = %e, "Election connection closed");
                    return;
                }
            };
            let written = match request {
                ElectionRequest::Challenge {
                    rank,
                    server,
                    clock,
                    ..
                } => {
                    self.store.merge_clock(clock);
                    let outranked = self.config.rank > rank;
                    let status = if outranked { "OK" } else { STATUS_ERROR };
                    debug!(candidate = %server, candidate_rank = rank, status, "Election challenge");
                    if outranked {
                        // Answering OK preempts the candidate; this replica
                        // must now run its own election.
                        let manager = self.clone();
                        tokio::spawn(async move {
                            manager.start_election().await;
                        });
                    }
                    let reply = Envelope::new(
                        "election.request",
                        ElectionReply {
                            status: status.to_string(),
                            rank: self.config.rank,
                            server: self.config.server.clone(),
                        },
                    );
                    write_frame(&mut stream, &reply).await
                }
                ElectionRequest::Coordinator {
                    coordinator,
                    rank,
                    clock,
                    ..
                } => {
                    self.store.merge_clock(clock);
                    self.adopt(&coordinator, rank);
                    let reply = Envelope::new(
                        "election.coordinator",
                        AckReply {
                            status: "OK".to_string(),
                        },
                    );
                    write_frame(&mut stream, &reply).await
                }
            };
            if let Err(e) = written {
                debug!(error = %e, "Election reply failed");
                return;
            }
        }
    }

    /// Adopts an announced coordinator: update the field, abandon any
    /// election in flight, and return to `Normal`.
    pub fn adopt(&self, coordinator: &str, rank: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.coordinator.as_deref() != Some(coordinator) {
                info!(coordinator, rank, "Adopting announced coordinator");
            }
            inner.coordinator = Some(coordinator.to_string());
            inner.phase = if coordinator == self.config.server {
                Phase::Coordinator
            } else {
                Phase::Normal
            };
        }
        self.journal_event("coordinator_announced", Some(coordinator));
        self.announced.notify_waiters();
    }

    /// Runs one Bully candidacy. A no-op when an election is already in
    /// flight.
    pub async fn start_election(self: Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if matches!(inner.phase, Phase::Electing | Phase::Waiting) {
                return;
            }
            inner.phase = Phase::Electing;
        }
        self.journal_event("started", None);
        info!(rank = self.config.rank, "Starting election");

        loop {
            if *self.stop.borrow() {
                return;
            }

            let servers = self.registry.list().await;
            let now = self.store.now();
            let window = self.config.coordinator_timeout.as_secs_f64();
            let higher: Vec<_> = servers
                .iter()
                .filter(|peer| {
                    peer.server != self.config.server
                        && peer.rank > self.config.rank
                        && peer.is_live(now, window)
                })
                .cloned()
                .collect();

            if higher.is_empty() {
                self.become_coordinator().await;
                return;
            }

            let challenge = ElectionRequest::Challenge {
                rank: self.config.rank,
                server: self.config.server.clone(),
                timestamp: now,
                clock: self.store.reply_stamp().clock,
            };
            let replies = join_all(higher.iter().map(|peer| {
                let challenge = challenge.clone();
                let addr = peer.election_addr.clone();
                let deadline = self.config.election_timeout;
                async move {
                    call_once::<_, Envelope<ElectionReply>>(&addr, &challenge, deadline).await
                }
            }))
            .await;

            let oks = replies
                .into_iter()
                .flatten()
                .filter(|envelope| envelope.data.status == "OK")
                .count();

            if oks == 0 {
                // No higher-ranked peer is actually alive.
                self.become_coordinator().await;
                return;
            }
            self.journal_event("ok_received", None);

            {
                let mut inner = self.inner.lock();
                if !matches!(inner.phase, Phase::Electing) {
                    // An announcement arrived while the challenges were in
                    // flight.
                    return;
                }
                inner.phase = Phase::Waiting;
            }

            let notified = self.announced.notified();
            if matches!(self.inner.lock().phase, Phase::Normal | Phase::Coordinator) {
                return;
            }
            match tokio::time::timeout(self.config.announcement_timeout, notified).await {
                Ok(()) => return,
                Err(_) => {
                    if matches!(self.inner.lock().phase, Phase::Normal | Phase::Coordinator) {
                        return;
                    }
                    self.journal_event("restarted", None);
                    self.inner.lock().phase = Phase::Electing;
                }
            }
        }
    }

    /// Claims the coordinator role and announces it point-to-point and on
    /// the `servers` topic.
    pub async fn become_coordinator(&self) {
        {
            let mut inner = self.inner.lock();
            inner.phase = Phase::Coordinator;
            inner.coordinator = Some(self.config.server.clone());
        }
        self.journal_event("became_coordinator", Some(self.config.server.as_str()));
        info!(rank = self.config.rank, "Assuming coordinator role");

        let announcement = ElectionRequest::Coordinator {
            event: EVENT_NEW_COORDINATOR.to_string(),
            coordinator: self.config.server.clone(),
            rank: self.config.rank,
            timestamp: self.store.now(),
            clock: self.store.reply_stamp().clock,
        };

        let servers = self.registry.list().await;
        let now = self.store.now();
        let window = self.config.coordinator_timeout.as_secs_f64();
        let deliveries = servers
            .iter()
            .filter(|peer| peer.server != self.config.server && peer.is_live(now, window))
            .map(|peer| {
                let announcement = announcement.clone();
                let addr = peer.election_addr.clone();
                let peer_name = peer.server.clone();
                let deadline = self.config.election_timeout;
                async move {
                    if let Err(e) =
                        call_once::<_, Envelope<AckReply>>(&addr, &announcement, deadline).await
                    {
                        warn!(peer = %peer_name, error = %e, "Coordinator announcement failed");
                    }
                }
            });
        join_all(deliveries).await;

        self.publisher.publish_envelope(SERVERS_TOPIC, &announcement);
        self.journal_event("coordinator_announced", Some(self.config.server.as_str()));
    }

    /// One liveness check: seed the role at cold start, or elect when the
    /// known coordinator's heartbeat has gone stale.
    pub async fn check_coordinator(self: &Arc<Self>) {
        let servers = self.registry.list().await;
        if servers.is_empty() {
            return;
        }
        let now = self.store.now();
        let window = self.config.coordinator_timeout.as_secs_f64();

        let known = self.coordinator();
        match known {
            None => {
                // Cold start: the lowest-ranked live replica seeds the role.
                let lowest = servers
                    .iter()
                    .filter(|peer| peer.is_live(now, window))
                    .min_by_key(|peer| peer.rank);
                let Some(lowest) = lowest else { return };
                if lowest.server == self.config.server {
                    self.become_coordinator().await;
                } else {
                    let mut inner = self.inner.lock();
                    if inner.coordinator.is_none() {
                        info!(coordinator = %lowest.server, "Following startup coordinator");
                        inner.coordinator = Some(lowest.server.clone());
                    }
                }
            }
            Some(name) if name == self.config.server => {}
            Some(name) => {
                let alive = servers
                    .iter()
                    .any(|peer| peer.server == name && peer.is_live(now, window));
                if !alive {
                    warn!(coordinator = %name, "Coordinator heartbeat missing, starting election");
                    self.clone().start_election().await;
                }
            }
        }
    }

    fn journal_event(&self, event: &str, coordinator: Option<&str>) {
        self.journal.append(&ElectionEvent {
            timestamp: self.store.now(),
            server: &self.config.server,
            rank: self.config.rank,
            event,
            coordinator,
        });
    }
}
