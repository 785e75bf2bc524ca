//! The replica datastore.

use crate::{Result, StoreError};
use mural_types::{
    ChannelRecord, LamportClock, LoginRecord, MessageRecord, RecordKind, Stamp, Stamped,
    StateSnapshot,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Everything guarded by the single state lock: the three sequences, the
/// Lamport counter, the processed-request counter, and the time offset.
/// Network I/O never happens while this is held.
#[derive(Debug, Default)]
struct State {
    logins: Vec<LoginRecord>,
    channels: Vec<ChannelRecord>,
    messages: Vec<MessageRecord>,
    clock: LamportClock,
    time_offset: f64,
    processed: u64,
}

impl State {
    fn stamp(&mut self) -> Stamp {
        Stamp {
            timestamp: wall_now() + self.time_offset,
            clock: self.clock.increment(),
        }
    }

    fn has_user(&self, user: &str) -> bool {
        self.logins.iter().any(|record| record.user == user)
    }

    fn has_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|record| record.channel == channel)
    }
}

/// The append-only datastore backing one replica.
pub struct Datastore {
    dir: PathBuf,
    state: Mutex<State>,
}

impl Datastore {
    /// Opens the datastore under `dir`, loading whatever the previous run
    /// persisted. Unreadable or missing files yield empty sequences; the
    /// Lamport clock resumes past the highest value found on disk.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let logins: Vec<LoginRecord> = load_kind(&dir, RecordKind::Logins);
        let channels: Vec<ChannelRecord> = load_kind(&dir, RecordKind::Channels);
        let messages: Vec<MessageRecord> = load_kind(&dir, RecordKind::Messages);

        let highest = logins
            .iter()
            .map(Stamped::clock)
            .chain(channels.iter().map(Stamped::clock))
            .chain(messages.iter().map(Stamped::clock))
            .max()
            .unwrap_or(0);

        debug!(
            dir = %dir.display(),
            logins = logins.len(),
            channels = channels.len(),
            messages = messages.len(),
            clock = highest,
            "Datastore opened"
        );

        Ok(Self {
            dir,
            state: Mutex::new(State {
                logins,
                channels,
                messages,
                clock: LamportClock::starting_at(highest),
                ..State::default()
            }),
        })
    }

    /// The replica's current time: wall clock plus the accumulated
    /// Berkeley offset.
    pub fn now(&self) -> f64 {
        wall_now() + self.state.lock().time_offset
    }

    /// The current Lamport value, without advancing it.
    pub fn current_clock(&self) -> u64 {
        self.state.lock().clock.current()
    }

    /// Merges a clock value received from a remote sender.
    pub fn merge_clock(&self, received: u64) -> u64 {
        self.state.lock().clock.merge(received)
    }

    /// Stamps an outgoing frame: increments the clock and reads the
    /// offset-corrected wall clock, atomically with respect to state
    /// mutations.
    pub fn reply_stamp(&self) -> Stamp {
        self.state.lock().stamp()
    }

    /// Adds a Berkeley correction to the persistent time offset and
    /// returns the new accumulated value.
    pub fn adjust_offset(&self, delta: f64) -> f64 {
        let mut state = self.state.lock();
        state.time_offset += delta;
        state.time_offset
    }

    /// The accumulated time offset.
    pub fn time_offset(&self) -> f64 {
        self.state.lock().time_offset
    }

    /// Counts one successfully processed mutation; returns the new total.
    pub fn processed_tick(&self) -> u64 {
        let mut state = self.state.lock();
        state.processed += 1;
        state.processed
    }

    /// Registers a user. Fails on an empty name or a duplicate.
    pub fn login(&self, user: &str) -> Result<LoginRecord> {
        if user.is_empty() {
            return Err(StoreError::EmptyName);
        }
        let mut state = self.state.lock();
        if state.has_user(user) {
            return Err(StoreError::DuplicateUser(user.to_string()));
        }
        let stamp = state.stamp();
        let record = LoginRecord {
            user: user.to_string(),
            timestamp: stamp.timestamp,
            clock: stamp.clock,
        };
        state.logins.push(record.clone());
        Ok(record)
    }

    /// All registered user names, in registration order.
    pub fn users(&self) -> Vec<String> {
        self.state
            .lock()
            .logins
            .iter()
            .map(|record| record.user.clone())
            .collect()
    }

    /// Creates a channel. Fails on an empty name or a duplicate.
    pub fn create_channel(&self, channel: &str) -> Result<ChannelRecord> {
        if channel.is_empty() {
            return Err(StoreError::EmptyName);
        }
        let mut state = self.state.lock();
        if state.has_channel(channel) {
            return Err(StoreError::DuplicateChannel(channel.to_string()));
        }
        let stamp = state.stamp();
        let record = ChannelRecord {
            channel: channel.to_string(),
            timestamp: stamp.timestamp,
            clock: stamp.clock,
        };
        state.channels.push(record.clone());
        Ok(record)
    }

    /// All channel names, in creation order.
    pub fn channels(&self) -> Vec<String> {
        self.state
            .lock()
            .channels
            .iter()
            .map(|record| record.channel.clone())
            .collect()
    }

    /// Stores a public message. The user and the channel must exist.
    pub fn publish(&self, user: &str, channel: &str, message: &str) -> Result<MessageRecord> {
        if user.is_empty() || channel.is_empty() {
            return Err(StoreError::EmptyName);
        }
        let mut state = self.state.lock();
        if !state.has_user(user) {
            return Err(StoreError::UnknownUser(user.to_string()));
        }
        if !state.has_channel(channel) {
            return Err(StoreError::UnknownChannel(channel.to_string()));
        }
        let stamp = state.stamp();
        let record = MessageRecord::Publish {
            user: user.to_string(),
            channel: channel.to_string(),
            message: message.to_string(),
            timestamp: stamp.timestamp,
            clock: stamp.clock,
        };
        state.messages.push(record.clone());
        Ok(record)
    }

    /// Stores a private message. Both users must exist.
    pub fn private_message(&self, src: &str, dst: &str, message: &str) -> Result<MessageRecord> {
        if src.is_empty() || dst.is_empty() {
            return Err(StoreError::EmptyName);
        }
        let mut state = self.state.lock();
        for user in [src, dst] {
            if !state.has_user(user) {
                return Err(StoreError::UnknownUser(user.to_string()));
            }
        }
        let stamp = state.stamp();
        let record = MessageRecord::Message {
            src: src.to_string(),
            dst: dst.to_string(),
            message: message.to_string(),
            timestamp: stamp.timestamp,
            clock: stamp.clock,
        };
        state.messages.push(record.clone());
        Ok(record)
    }

    /// The most recent `limit` public messages of a channel, sorted
    /// ascending by `(clock, timestamp)`. A non-positive limit yields an
    /// empty list; an oversized limit yields everything.
    pub fn history(&self, channel: &str, limit: i64) -> Result<Vec<MessageRecord>> {
        let state = self.state.lock();
        if !state.has_channel(channel) {
            return Err(StoreError::UnknownChannel(channel.to_string()));
        }
        let records = state
            .messages
            .iter()
            .filter(|record| record.channel() == Some(channel))
            .cloned()
            .collect();
        Ok(tail_sorted(records, limit))
    }

    /// The most recent `limit` private messages between two users, in
    /// either direction, sorted ascending by `(clock, timestamp)`.
    pub fn private_history(&self, user: &str, peer: &str, limit: i64) -> Result<Vec<MessageRecord>> {
        let state = self.state.lock();
        if !state.has_user(user) {
            return Err(StoreError::UnknownUser(user.to_string()));
        }
        let records = state
            .messages
            .iter()
            .filter(|record| record.is_between(user, peer))
            .cloned()
            .collect();
        Ok(tail_sorted(records, limit))
    }

    /// Captures all three sequences atomically.
    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.state.lock();
        StateSnapshot {
            logins: state.logins.clone(),
            channels: state.channels.clone(),
            messages: state.messages.clone(),
        }
    }

    /// Replaces the logins sequence wholesale (replication receipt).
    pub fn replace_logins(&self, records: Vec<LoginRecord>) -> usize {
        let mut state = self.state.lock();
        state.logins = records;
        state.logins.len()
    }

    /// Replaces the channels sequence wholesale (replication receipt).
    pub fn replace_channels(&self, records: Vec<ChannelRecord>) -> usize {
        let mut state = self.state.lock();
        state.channels = records;
        state.channels.len()
    }

    /// Replaces the messages sequence wholesale (replication receipt).
    pub fn replace_messages(&self, records: Vec<MessageRecord>) -> usize {
        let mut state = self.state.lock();
        state.messages = records;
        state.messages.len()
    }

    /// Flushes one sequence to its JSON file. The snapshot is taken under
    /// the lock; the write happens outside it.
    pub fn persist(&self, kind: RecordKind) -> Result<()> {
        let path = self.dir.join(kind.file_name());
        match kind {
            RecordKind::Logins => {
                let records = self.state.lock().logins.clone();
                atomic_write_json(&path, &records)
            }
            RecordKind::Channels => {
                let records = self.state.lock().channels.clone();
                atomic_write_json(&path, &records)
            }
            RecordKind::Messages => {
                let records = self.state.lock().messages.clone();
                atomic_write_json(&path, &records)
            }
        }
    }

    /// Flushes all three sequences, reporting the first failure after
    /// attempting every kind.
    pub fn persist_all(&self) -> Result<()> {
        let mut first_error = None;
        for kind in RecordKind::ALL {
            if let Err(e) = self.persist(kind) {
                warn!(kind = %kind, error = %e, "Failed to persist sequence");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The directory this datastore persists into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Serializes `value` to a temporary file and renames it over `path`, so
/// concurrent readers observe either the previous or the new full contents.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn load_kind<T: DeserializeOwned>(dir: &Path, kind: RecordKind) -> Vec<T> {
    let path = dir.join(kind.file_name());
    let body = match std::fs::read(&path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read sequence, starting empty");
            return Vec::new();
        }
    };
    match serde_json::from_slice(&body) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt sequence file, starting empty");
            Vec::new()
        }
    }
}

fn wall_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Sorts ascending by `(clock, timestamp)` and keeps the most recent
/// `limit` records, still in ascending order.
fn tail_sorted(mut records: Vec<MessageRecord>, limit: i64) -> Vec<MessageRecord> {
    if limit <= 0 {
        return Vec::new();
    }
    records.sort_by(|a, b| a.stamp_cmp(b));
    let keep = limit as usize;
    if records.len() > keep {
        records.drain(..records.len() - keep);
    }
    records
}
