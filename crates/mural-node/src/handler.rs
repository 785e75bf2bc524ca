//! The eight-service client request handler.

use crate::replica::ReplicaContext;
use mural_storage::StoreError;
use mural_types::RecordKind;
use mural_wire::{
    read_raw_frame, write_frame, ClientRequest, Envelope, ReplyData, SERVERS_TOPIC,
    STATUS_OK, STATUS_SUCCESS,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Serves client requests (through the broker) until the stop flag flips.
pub(crate) async fn serve_clients(
    ctx: Arc<ReplicaContext>,
    listener: TcpListener,
    mut stop: watch::Receiver<bool>,
) {
    info!(addr = ?listener.local_addr().ok(), "Client handler ready");
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Client accept failed");
                        continue;
                    }
                };
                debug!(peer = %peer, "Client connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_connection(ctx, stream).await;
                });
            }
        }
    }
}

async fn handle_connection(ctx: Arc<ReplicaContext>, mut stream: TcpStream) {
    loop {
        let body = match read_raw_frame(&mut stream).await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "Client connection closed");
                return;
            }
        };

        // A malformed payload answers `erro` and keeps the connection.
        let reply = match rmp_serde::from_slice::<ClientRequest>(&body) {
            Ok(request) => handle_request(&ctx, request).await,
            Err(e) => {
                debug!(error = %e, "Malformed client request");
                Envelope::new(
                    probe_service(&body),
                    ReplyData::error("Requisição malformada", ctx.store.reply_stamp()),
                )
            }
        };

        if let Err(e) = write_frame(&mut stream, &reply).await {
            debug!(error = %e, "Client reply failed");
            return;
        }
    }
}

/// Applies one request: merge the incoming clock, perform the side effect,
/// stamp the reply with a fresh increment.
async fn handle_request(ctx: &Arc<ReplicaContext>, request: ClientRequest) -> Envelope<ReplyData> {
    ctx.store.merge_clock(request.clock());
    let service = request.service();

    let data = match request {
        ClientRequest::Login { user, .. } => match ctx.store.login(&user) {
            Ok(_) => {
                after_mutation(ctx, RecordKind::Logins);
                ReplyData::status(STATUS_SUCCESS, ctx.store.reply_stamp())
            }
            Err(e) => failure(ctx, &e),
        },
        ClientRequest::Users { .. } => {
            ReplyData::status(STATUS_SUCCESS, ctx.store.reply_stamp())
                .with_users(ctx.store.users())
        }
        ClientRequest::Channel { channel, .. } => match ctx.store.create_channel(&channel) {
            Ok(record) => {
                ctx.publisher.publish(SERVERS_TOPIC, "channel", &record);
                after_mutation(ctx, RecordKind::Channels);
                ReplyData::status(STATUS_SUCCESS, ctx.store.reply_stamp())
            }
            Err(e) => failure(ctx, &e),
        },
        ClientRequest::Channels { .. } => {
            ReplyData::status(STATUS_SUCCESS, ctx.store.reply_stamp())
                .with_channels(ctx.store.channels())
        }
        ClientRequest::Publish {
            user,
            channel,
            message,
            ..
        } => match ctx.store.publish(&user, &channel, &message) {
            Ok(record) => {
                ctx.publisher.publish(&channel, "publish", &record);
                after_mutation(ctx, RecordKind::Messages);
                ReplyData::status(STATUS_OK, ctx.store.reply_stamp())
            }
            Err(e) => failure(ctx, &e),
        },
        ClientRequest::Message {
            src, dst, message, ..
        } => match ctx.store.private_message(&src, &dst, &message) {
            Ok(record) => {
                ctx.publisher.publish(&dst, "message", &record);
                after_mutation(ctx, RecordKind::Messages);
                ReplyData::status(STATUS_OK, ctx.store.reply_stamp())
            }
            Err(e) => failure(ctx, &e),
        },
        ClientRequest::GetHistory { channel, limit, .. } => {
            match ctx.store.history(&channel, limit) {
                Ok(messages) => ReplyData::status(STATUS_SUCCESS, ctx.store.reply_stamp())
                    .with_messages(messages),
                Err(e) => failure(ctx, &e),
            }
        }
        ClientRequest::GetPrivateHistory {
            user, peer, limit, ..
        } => match ctx.store.private_history(&user, &peer, limit) {
            Ok(messages) => {
                ReplyData::status(STATUS_SUCCESS, ctx.store.reply_stamp()).with_messages(messages)
            }
            Err(e) => failure(ctx, &e),
        },
    };

    Envelope::new(service, data)
}

/// Flushes the mutated sequence, counts the mutation, and schedules a
/// replication round (plus Berkeley, on the coordinator) at every
/// `sync_interval` multiple.
fn after_mutation(ctx: &Arc<ReplicaContext>, kind: RecordKind) {
    if let Err(e) = ctx.store.persist(kind) {
        // The in-memory state stays authoritative; the next flush retries.
        warn!(kind = %kind, error = %e, "Failed to persist sequence");
    }
    let processed = ctx.store.processed_tick();
    if processed % ctx.config.sync_interval == 0 {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            run_sync_round(ctx).await;
        });
    }
}

/// One scheduled background round: Berkeley first when holding the
/// coordinator role, then a push of all three sequences to every live peer.
async fn run_sync_round(ctx: Arc<ReplicaContext>) {
    let servers = ctx.registry.list().await;
    let now = ctx.store.now();
    let window = ctx.config.timing.coordinator_timeout_secs;
    let live: Vec<_> = servers
        .into_iter()
        .filter(|peer| peer.is_live(now, window))
        .collect();
    if live.iter().all(|peer| peer.server == ctx.config.server_name) {
        return;
    }

    if ctx.election.is_coordinator() {
        mural_replication::run_berkeley_cycle(
            &ctx.store,
            &live,
            &ctx.config.server_name,
            ctx.config.timing.berkeley_deadline(),
        )
        .await;
    }

    mural_replication::push_to_peers(
        &ctx.store,
        &live,
        &ctx.config.server_name,
        ctx.config.timing.replication_deadline(),
    )
    .await;
}

fn failure(ctx: &Arc<ReplicaContext>, error: &StoreError) -> ReplyData {
    ReplyData::error(describe(error), ctx.store.reply_stamp())
}

/// Client-facing descriptions for validation failures.
fn describe(error: &StoreError) -> &'static str {
    match error {
        StoreError::DuplicateUser(_) => "Usuário já cadastrado",
        StoreError::DuplicateChannel(_) => "Canal já existe",
        StoreError::UnknownUser(_) => "Usuário inexistente",
        StoreError::UnknownChannel(_) => "Canal inexistente",
        StoreError::EmptyName => "Identificador vazio",
        StoreError::Io(_) | StoreError::Serde(_) => "Erro interno",
    }
}

/// Best-effort extraction of the service name from an undecodable frame,
/// so the `erro` reply can still echo it.
fn probe_service(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Probe {
        #[serde(default)]
        service: Option<String>,
    }
    rmp_serde::from_slice::<Probe>(body)
        .ok()
        .and_then(|probe| probe.service)
        .unwrap_or_else(|| "erro".to_string())
}
