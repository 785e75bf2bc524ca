//! Persisted record shapes and their total order.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The pair of stamps carried by every record and every reply: the physical
/// wall clock (plus the Berkeley offset) and the Lamport counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    /// Seconds since the Unix epoch, offset-corrected.
    pub timestamp: f64,
    /// Lamport clock value at stamping time.
    pub clock: u64,
}

/// Anything carrying a `(clock, timestamp)` stamp.
///
/// The total order over records is lexicographic on that pair; the physical
/// timestamp only breaks ties between records from different replicas that
/// happen to share a clock value.
pub trait Stamped {
    /// The Lamport clock value of the record.
    fn clock(&self) -> u64;

    /// The offset-corrected physical timestamp of the record.
    fn timestamp(&self) -> f64;

    /// Compares two records by `(clock, timestamp)`.
    fn stamp_cmp(&self, other: &Self) -> Ordering {
        self.clock()
            .cmp(&other.clock())
            .then(self.timestamp().total_cmp(&other.timestamp()))
    }
}

/// A user registration. Unique by `user`; never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRecord {
    /// The registered user name.
    pub user: String,
    /// Physical timestamp at registration.
    pub timestamp: f64,
    /// Lamport clock at registration.
    pub clock: u64,
}

impl Stamped for LoginRecord {
    fn clock(&self) -> u64 {
        self.clock
    }

    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// A channel creation. Unique by `channel`; never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// The channel name.
    pub channel: String,
    /// Physical timestamp at creation.
    pub timestamp: f64,
    /// Lamport clock at creation.
    pub clock: u64,
}

impl Stamped for ChannelRecord {
    fn clock(&self) -> u64 {
        self.clock
    }

    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// A stored message, public or private.
///
/// Both kinds live in one sequence and are distinguished on the wire and on
/// disk by their `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageRecord {
    /// A message published to a channel.
    Publish {
        /// Publishing user.
        user: String,
        /// Target channel.
        channel: String,
        /// Message body.
        message: String,
        /// Physical timestamp.
        timestamp: f64,
        /// Lamport clock.
        clock: u64,
    },
    /// A direct message between two users.
    Message {
        /// Sending user.
        src: String,
        /// Receiving user.
        dst: String,
        /// Message body.
        message: String,
        /// Physical timestamp.
        timestamp: f64,
        /// Lamport clock.
        clock: u64,
    },
}

impl MessageRecord {
    /// Returns true for a public (channel) message.
    #[must_use]
    pub fn is_public(&self) -> bool {
        matches!(self, MessageRecord::Publish { .. })
    }

    /// The channel this record was published to, if public.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match self {
            MessageRecord::Publish { channel, .. } => Some(channel),
            MessageRecord::Message { .. } => None,
        }
    }

    /// True when the record is a private message between the two given
    /// users, in either direction.
    #[must_use]
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        match self {
            MessageRecord::Message { src, dst, .. } => {
                (src == a && dst == b) || (src == b && dst == a)
            }
            MessageRecord::Publish { .. } => false,
        }
    }
}

impl Stamped for MessageRecord {
    fn clock(&self) -> u64 {
        match self {
            MessageRecord::Publish { clock, .. } | MessageRecord::Message { clock, .. } => *clock,
        }
    }

    fn timestamp(&self) -> f64 {
        match self {
            MessageRecord::Publish { timestamp, .. }
            | MessageRecord::Message { timestamp, .. } => *timestamp,
        }
    }
}

/// The three replicated record sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// User registrations.
    Logins,
    /// Channel creations.
    Channels,
    /// Public and private messages.
    Messages,
}

impl RecordKind {
    /// All kinds, in replication order.
    pub const ALL: [RecordKind; 3] = [RecordKind::Logins, RecordKind::Channels, RecordKind::Messages];

    /// The on-disk file name for this kind.
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            RecordKind::Logins => "logins.json",
            RecordKind::Channels => "channels.json",
            RecordKind::Messages => "messages.json",
        }
    }

    /// The wire name for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Logins => "logins",
            RecordKind::Channels => "channels",
            RecordKind::Messages => "messages",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A full copy of a replica's three sequences, captured atomically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// User registrations.
    pub logins: Vec<LoginRecord>,
    /// Channel creations.
    pub channels: Vec<ChannelRecord>,
    /// Public and private messages.
    pub messages: Vec<MessageRecord>,
}

impl StateSnapshot {
    /// Total number of records across all three sequences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.logins.len() + self.channels.len() + self.messages.len()
    }

    /// True when all three sequences are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(clock: u64, timestamp: f64) -> MessageRecord {
        MessageRecord::Publish {
            user: "alice".to_string(),
            channel: "geral".to_string(),
            message: "oi".to_string(),
            timestamp,
            clock,
        }
    }

    #[test]
    fn stamp_order_is_clock_then_timestamp() {
        let a = publish(1, 100.0);
        let b = publish(2, 50.0);
        // A lower clock wins regardless of the physical timestamp.
        assert_eq!(a.stamp_cmp(&b), Ordering::Less);

        let c = publish(2, 49.0);
        assert_eq!(c.stamp_cmp(&b), Ordering::Less);
    }

    #[test]
    fn message_record_type_tag() {
        let record = MessageRecord::Message {
            src: "alice".to_string(),
            dst: "bob".to_string(),
            message: "oi".to_string(),
            timestamp: 1.0,
            clock: 1,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["src"], "alice");

        let json = serde_json::to_value(publish(1, 1.0)).unwrap();
        assert_eq!(json["type"], "publish");
    }

    #[test]
    fn private_messages_match_both_directions() {
        let record = MessageRecord::Message {
            src: "alice".to_string(),
            dst: "bob".to_string(),
            message: "oi".to_string(),
            timestamp: 1.0,
            clock: 1,
        };
        assert!(record.is_between("alice", "bob"));
        assert!(record.is_between("bob", "alice"));
        assert!(!record.is_between("alice", "carol"));
    }

    #[test]
    fn record_kind_file_names() {
        assert_eq!(RecordKind::Logins.file_name(), "logins.json");
        assert_eq!(RecordKind::Messages.as_str(), "messages");
    }
}
