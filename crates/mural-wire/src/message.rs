//! Service envelopes for every Mural port.
//!
//! All sockets exchange maps shaped `{service, data}`. Requests are modeled
//! as adjacently tagged enums so the tag becomes the `service` field;
//! replies echo the service name through [`Envelope`].

use mural_types::{ChannelRecord, LoginRecord, MessageRecord, RecordKind, ServerInfo, Stamp};
use serde::{Deserialize, Serialize};

/// Success status for registrations, listings, and histories.
pub const STATUS_SUCCESS: &str = "sucesso";
/// Success status for publish and private-message requests.
pub const STATUS_OK: &str = "OK";
/// Failure status.
pub const STATUS_ERROR: &str = "erro";

/// Event name carried by coordinator announcements.
pub const EVENT_NEW_COORDINATOR: &str = "new_coordinator";

/// Generic `{service, data}` envelope, used for replies and publications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Service name, echoing the request (or naming the published event).
    pub service: String,
    /// Service-specific payload.
    pub data: T,
}

impl<T> Envelope<T> {
    /// Wraps `data` under the given service name.
    pub fn new(service: impl Into<String>, data: T) -> Self {
        Self {
            service: service.into(),
            data,
        }
    }
}

/// The eight client-facing services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Register a user name.
    Login {
        /// Name to register.
        user: String,
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// List all registered users.
    Users {
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// Create a channel.
    Channel {
        /// Channel name to create.
        channel: String,
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// List all channels.
    Channels {
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// Publish a message to a channel.
    Publish {
        /// Publishing user.
        user: String,
        /// Target channel.
        channel: String,
        /// Message body.
        message: String,
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// Send a private message.
    Message {
        /// Sending user.
        src: String,
        /// Receiving user.
        dst: String,
        /// Message body.
        message: String,
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// Fetch the most recent messages of a channel.
    GetHistory {
        /// Channel to read.
        channel: String,
        /// Maximum number of records returned.
        limit: i64,
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// Fetch the most recent private messages between two users.
    GetPrivateHistory {
        /// Requesting user.
        user: String,
        /// Conversation partner.
        peer: String,
        /// Maximum number of records returned.
        limit: i64,
        /// Sender's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
}

impl ClientRequest {
    /// The wire name of the service, used to echo it in the reply.
    #[must_use]
    pub fn service(&self) -> &'static str {
        match self {
            ClientRequest::Login { .. } => "login",
            ClientRequest::Users { .. } => "users",
            ClientRequest::Channel { .. } => "channel",
            ClientRequest::Channels { .. } => "channels",
            ClientRequest::Publish { .. } => "publish",
            ClientRequest::Message { .. } => "message",
            ClientRequest::GetHistory { .. } => "get_history",
            ClientRequest::GetPrivateHistory { .. } => "get_private_history",
        }
    }

    /// The Lamport clock stamped on the request by the sender.
    #[must_use]
    pub fn clock(&self) -> u64 {
        match self {
            ClientRequest::Login { clock, .. }
            | ClientRequest::Users { clock, .. }
            | ClientRequest::Channel { clock, .. }
            | ClientRequest::Channels { clock, .. }
            | ClientRequest::Publish { clock, .. }
            | ClientRequest::Message { clock, .. }
            | ClientRequest::GetHistory { clock, .. }
            | ClientRequest::GetPrivateHistory { clock, .. } => *clock,
        }
    }
}

/// Reply payload for the client services.
///
/// Every reply carries `status`, `timestamp`, and `clock`; the remaining
/// fields are present only for the services that produce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// `"sucesso"`, `"OK"`, or `"erro"`.
    pub status: String,
    /// Failure description, present on `"erro"` replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Registered users, for `users`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
    /// Channel names, for `channels`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    /// History records, for the history services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageRecord>>,
    /// Physical timestamp of the reply (wall clock + offset).
    pub timestamp: f64,
    /// Post-increment Lamport clock of the reply.
    pub clock: u64,
}

impl ReplyData {
    /// A bare reply with the given status.
    #[must_use]
    pub fn status(status: &str, stamp: Stamp) -> Self {
        Self {
            status: status.to_string(),
            description: None,
            users: None,
            channels: None,
            messages: None,
            timestamp: stamp.timestamp,
            clock: stamp.clock,
        }
    }

    /// An `"erro"` reply with a description.
    #[must_use]
    pub fn error(description: impl Into<String>, stamp: Stamp) -> Self {
        let mut reply = Self::status(STATUS_ERROR, stamp);
        reply.description = Some(description.into());
        reply
    }

    /// Attaches the user listing.
    #[must_use]
    pub fn with_users(mut self, users: Vec<String>) -> Self {
        self.users = Some(users);
        self
    }

    /// Attaches the channel listing.
    #[must_use]
    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Attaches history records.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<MessageRecord>) -> Self {
        self.messages = Some(messages);
        self
    }
}

/// One replicated sequence on the wire, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatePayload {
    /// The logins sequence.
    Logins {
        /// Full replacement contents.
        records: Vec<LoginRecord>,
    },
    /// The channels sequence.
    Channels {
        /// Full replacement contents.
        records: Vec<ChannelRecord>,
    },
    /// The messages sequence.
    Messages {
        /// Full replacement contents.
        records: Vec<MessageRecord>,
    },
}

impl StatePayload {
    /// The kind this payload replaces.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            StatePayload::Logins { .. } => RecordKind::Logins,
            StatePayload::Channels { .. } => RecordKind::Channels,
            StatePayload::Messages { .. } => RecordKind::Messages,
        }
    }

    /// Number of records carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            StatePayload::Logins { records } => records.len(),
            StatePayload::Channels { records } => records.len(),
            StatePayload::Messages { records } => records.len(),
        }
    }

    /// True when the payload carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Services on the replication socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "data", rename_all = "snake_case")]
pub enum PeerRequest {
    /// Wholesale replacement of one record sequence.
    Replicate {
        /// Name of the pushing replica.
        source: String,
        /// Sender's Lamport clock.
        clock: u64,
        /// The sequence being replaced.
        payload: StatePayload,
    },
    /// Full-state snapshot request from a restarting peer.
    SyncState {
        /// Name of the requesting replica.
        server: String,
        /// Sender's Lamport clock.
        clock: u64,
    },
    /// Berkeley probe: report the local offset-corrected time.
    GetTime {},
    /// Berkeley correction: add `offset` to the local time offset.
    AdjustTime {
        /// Additive offset in seconds.
        offset: f64,
    },
}

/// Acknowledgment for `replicate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateAck {
    /// `"success"` on receipt.
    pub status: String,
    /// Number of records now held for the pushed kind.
    pub records_received: usize,
    /// Receiver's post-merge Lamport clock.
    pub clock: u64,
}

/// Reply to `sync_state`: the full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStateReply {
    /// `"success"` on receipt.
    pub status: String,
    /// User registrations.
    pub logins: Vec<LoginRecord>,
    /// Channel creations.
    pub channels: Vec<ChannelRecord>,
    /// Public and private messages.
    pub messages: Vec<MessageRecord>,
    /// Responder's Lamport clock.
    pub clock: u64,
}

/// Reply to `get_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeReply {
    /// The responder's wall clock plus its accumulated offset.
    pub time: f64,
}

/// Bare acknowledgment used by `adjust_time`, `heartbeat`, and
/// coordinator announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckReply {
    /// `"success"` or `"OK"`.
    pub status: String,
}

/// Services on the election socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "data")]
pub enum ElectionRequest {
    /// A candidacy challenge sent to every higher-ranked peer.
    #[serde(rename = "election.request")]
    Challenge {
        /// Candidate's rank.
        rank: u64,
        /// Candidate's server name.
        server: String,
        /// Candidate's physical timestamp.
        timestamp: f64,
        /// Candidate's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
    /// A coordinator announcement, point-to-point and on the `servers` topic.
    #[serde(rename = "election.coordinator")]
    Coordinator {
        /// Always [`EVENT_NEW_COORDINATOR`].
        event: String,
        /// The new coordinator's server name.
        coordinator: String,
        /// The new coordinator's rank.
        rank: u64,
        /// Announcement timestamp.
        timestamp: f64,
        /// Announcer's Lamport clock.
        #[serde(default)]
        clock: u64,
    },
}

/// Reply to an election challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionReply {
    /// `"OK"` when the callee outranks the candidate, `"erro"` otherwise.
    pub status: String,
    /// Callee's rank.
    pub rank: u64,
    /// Callee's server name.
    pub server: String,
}

/// Services on the registry socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "data", rename_all = "snake_case")]
pub enum RegistryRequest {
    /// Register (or re-fetch) a rank, announcing the peer endpoints.
    Rank {
        /// Server name registering.
        server: String,
        /// Reachable replication socket address.
        replication_addr: String,
        /// Reachable election socket address.
        election_addr: String,
    },
    /// List all registered servers.
    List {},
    /// Refresh the caller's liveness timestamp.
    Heartbeat {
        /// Server name heartbeating.
        server: String,
    },
}

/// Reply to `rank`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankReply {
    /// `"success"` on registration.
    pub status: String,
    /// The assigned rank.
    pub rank: u64,
}

/// Reply to `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListReply {
    /// `"success"`.
    pub status: String,
    /// All registered servers, live or not.
    pub servers: Vec<ServerInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_request_is_service_data_map() {
        let request = ClientRequest::Login {
            user: "alice".to_string(),
            clock: 3,
        };
        let packed = rmp_serde::to_vec_named(&request).unwrap();
        let decoded: ClientRequest = rmp_serde::from_slice(&packed).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.service(), "login");
        assert_eq!(decoded.clock(), 3);

        // The packed form is a two-entry map: service then data.
        let value: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["service"], "login");
        assert_eq!(value["data"]["user"], "alice");
    }

    #[test]
    fn missing_clock_defaults_to_zero() {
        // Clients that do not track a Lamport clock omit the field.
        let request = serde_json::json!({
            "service": "channel",
            "data": { "channel": "geral" }
        });
        let decoded: ClientRequest = serde_json::from_value(request).unwrap();
        assert_eq!(decoded.clock(), 0);
        assert_eq!(decoded.service(), "channel");
    }

    #[test]
    fn election_services_use_dotted_names() {
        let challenge = ElectionRequest::Challenge {
            rank: 2,
            server: "server_2".to_string(),
            timestamp: 1.5,
            clock: 9,
        };
        let value = serde_json::to_value(&challenge).unwrap();
        assert_eq!(value["service"], "election.request");
        assert_eq!(value["data"]["rank"], 2);
    }

    #[test]
    fn state_payload_kind_matches_records() {
        let payload = StatePayload::Channels {
            records: vec![ChannelRecord {
                channel: "geral".to_string(),
                timestamp: 1.0,
                clock: 1,
            }],
        };
        assert_eq!(payload.kind(), RecordKind::Channels);
        assert_eq!(payload.len(), 1);

        let packed = rmp_serde::to_vec_named(&payload).unwrap();
        let decoded: StatePayload = rmp_serde::from_slice(&packed).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn reply_omits_absent_fields() {
        let stamp = Stamp {
            timestamp: 10.0,
            clock: 4,
        };
        let reply = ReplyData::status(STATUS_SUCCESS, stamp);
        let value = serde_json::to_value(&reply).unwrap();
        assert!(value.get("description").is_none());
        assert!(value.get("users").is_none());
        assert_eq!(value["clock"], 4);
    }
}
