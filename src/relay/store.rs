//! Per-sender message logs and anti-entropy state.

use std::time::Duration;

use heapless::{Deque, Vec};
use tracing::{debug, trace};

use crate::protocol::{ReadBuffer, WireError, WriteBuffer};

use super::message::{ENTRY_SIZE, MsgType, NO_NODE, RelayMessage};
use super::RelayError;

/// Sender logs kept at once
pub const MAX_SENDERS: usize = 8;

/// Messages retained per sender
pub const MSGS_PER_SENDER: usize = 64;

/// Largest digest or sync request payload
pub const MAX_DIGEST_SIZE: usize = 1 + MAX_SENDERS * ENTRY_SIZE;

/// Sync ranges wanted from, or by, a peer
pub type SyncNeeds = Vec<SyncNeed, MAX_SENDERS>;

/// Presence thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StoreConfig {
    /// Silence after which a sender is stale
    pub stale_after: Duration,
    /// Silence after which a sender is offline and left out of digests
    pub offline_after: Duration,
    /// Silence after which a sender's log is dropped
    pub expire_after: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(2 * 60),
            offline_after: Duration::from_secs(10 * 60),
            expire_after: Duration::from_secs(60 * 60),
        }
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// How recently a sender was heard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Presence {
    /// Heard within the stale threshold
    Online,
    /// Heard within the offline threshold
    Stale,
    /// Silent longer than the offline threshold
    Offline,
}

/// One digest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestEntry {
    /// Sender
    pub sender_id: u8,
    /// Highest seq held
    pub high_seq: u16,
    /// Seq of the newest location
    pub loc_seq: u16,
}

/// Inclusive seq range of one sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncNeed {
    /// Sender
    pub sender_id: u8,
    /// First seq
    pub from_seq: u16,
    /// Last seq
    pub to_seq: u16,
}

/// Ring of recent messages from one sender.
#[derive(Debug, Clone)]
pub struct SenderLog {
    sender_id: u8,
    high_seq: u16,
    loc_seq: u16,
    node_a: u8,
    node_b: u8,
    last_heard_ms: u32,
    heard: bool,
    messages: Deque<RelayMessage, MSGS_PER_SENDER>,
}

impl SenderLog {
    fn new(sender_id: u8) -> Self {
        Self {
            sender_id,
            high_seq: 0,
            loc_seq: 0,
            node_a: 0,
            node_b: NO_NODE,
            last_heard_ms: 0,
            heard: false,
            messages: Deque::new(),
        }
    }

    /// Append `msg`; `false` for a seq at or below the high-water mark.
    ///
    /// Evicted seqs stay rejected: the high-water mark never goes back.
    pub fn add(&mut self, msg: RelayMessage) -> bool {
        if self.heard && msg.seq <= self.high_seq {
            return false;
        }
        if msg.kind == MsgType::Location {
            self.loc_seq = msg.seq;
            if let Some((a, b)) = msg.as_location() {
                self.node_a = a;
                self.node_b = b;
            }
        }
        self.high_seq = msg.seq;
        self.heard = true;
        if self.messages.is_full() {
            self.messages.pop_front();
        }
        self.messages.push_back(msg).ok();
        true
    }

    /// Message with `seq`, if still retained
    #[must_use]
    pub fn get(&self, seq: u16) -> Option<&RelayMessage> {
        self.messages.iter().find(|msg| msg.seq == seq)
    }

    /// Oldest retained seq, 0 when empty
    #[must_use]
    pub fn low_seq(&self) -> u16 {
        self.messages.front().map_or(0, |msg| msg.seq)
    }

    /// Sender id
    #[must_use]
    pub const fn sender_id(&self) -> u8 {
        self.sender_id
    }

    /// Highest seq accepted
    #[must_use]
    pub const fn high_seq(&self) -> u16 {
        self.high_seq
    }

    /// Seq of the newest location
    #[must_use]
    pub const fn loc_seq(&self) -> u16 {
        self.loc_seq
    }

    /// Last reported `(node_a, node_b)`
    #[must_use]
    pub const fn location(&self) -> (u8, u8) {
        (self.node_a, self.node_b)
    }

    /// Time of the last stored message or presence update
    #[must_use]
    pub const fn last_heard_ms(&self) -> u32 {
        self.last_heard_ms
    }

    /// Retained messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// `true` when nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn silence(&self, now_ms: u32) -> u32 {
        now_ms.wrapping_sub(self.last_heard_ms)
    }
}

/// Message logs for up to [`MAX_SENDERS`] senders.
///
/// Clock values are milliseconds from a wrapping `u32` tick counter.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    config: StoreConfig,
    senders: Vec<SenderLog, MAX_SENDERS>,
}

impl MessageStore {
    /// Empty store
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            senders: Vec::new(),
        }
    }

    /// Presence thresholds
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Log for `sender_id`
    #[must_use]
    pub fn sender(&self, sender_id: u8) -> Option<&SenderLog> {
        self.senders.iter().find(|log| log.sender_id == sender_id)
    }

    fn sender_mut(&mut self, sender_id: u8) -> Option<&mut SenderLog> {
        self.senders.iter_mut().find(|log| log.sender_id == sender_id)
    }

    /// Every sender log
    pub fn senders(&self) -> impl Iterator<Item = &SenderLog> {
        self.senders.iter()
    }

    /// Number of sender logs
    #[must_use]
    pub fn active_senders(&self) -> usize {
        self.senders.len()
    }

    /// Store a data message. `Ok(false)` for duplicates.
    pub fn store(&mut self, msg: RelayMessage, now_ms: u32) -> Result<bool, RelayError> {
        let sender_id = msg.sender_id;
        if self.sender(sender_id).is_none() {
            self.senders
                .push(SenderLog::new(sender_id))
                .map_err(|_| RelayError::SendersFull { max: MAX_SENDERS })?;
            debug!(sender_id, "sender log created");
        }
        let Some(log) = self.sender_mut(sender_id) else {
            return Err(RelayError::SendersFull { max: MAX_SENDERS });
        };
        let seq = msg.seq;
        let stored = log.add(msg);
        if stored {
            log.last_heard_ms = now_ms;
            trace!(sender_id, seq, "message stored");
        }
        Ok(stored)
    }

    fn is_online(&self, log: &SenderLog, now_ms: u32) -> bool {
        log.silence(now_ms) <= millis(self.config.offline_after)
    }

    /// Order-independent hash over senders not yet offline
    #[must_use]
    pub fn state_hash(&self, now_ms: u32) -> u16 {
        self.senders
            .iter()
            .filter(|log| self.is_online(log, now_ms))
            .fold(0u16, |hash, log| {
                let h = u16::from(log.sender_id)
                    .wrapping_mul(251)
                    .wrapping_add(log.high_seq)
                    .wrapping_add(log.loc_seq.wrapping_mul(7));
                hash.wrapping_add(h)
            })
    }

    /// Digest entries for senders not yet offline
    #[must_use]
    pub fn digest(&self, now_ms: u32) -> Vec<DigestEntry, MAX_SENDERS> {
        self.senders
            .iter()
            .filter(|log| self.is_online(log, now_ms))
            .map(|log| DigestEntry {
                sender_id: log.sender_id,
                high_seq: log.high_seq,
                loc_seq: log.loc_seq,
            })
            .collect()
    }

    /// `[count][id, high_seq BE, loc_seq BE]*`
    pub fn encode_digest(&self, now_ms: u32, out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        let entries = self.digest(now_ms);
        out.write_u8(entries.len() as u8)?;
        for entry in &entries {
            out.write_u8(entry.sender_id)?;
            out.write_u16_be(entry.high_seq)?;
            out.write_u16_be(entry.loc_seq)?;
        }
        Ok(())
    }

    /// Ranges the peer holds that this store lacks
    pub fn decode_digest(&self, payload: &[u8]) -> Result<SyncNeeds, RelayError> {
        let mut needs = SyncNeeds::new();
        for (sender_id, peer_high, _loc_seq) in read_entries(payload)? {
            let local_high = self.sender(sender_id).map_or(0, SenderLog::high_seq);
            if peer_high > local_high {
                let need = SyncNeed {
                    sender_id,
                    from_seq: local_high + 1,
                    to_seq: peer_high,
                };
                if needs.push(need).is_err() {
                    debug!(sender_id, "sync needs full, skipping sender");
                }
            }
        }
        Ok(needs)
    }

    /// `[count][id, from BE, to BE]*`
    pub fn encode_sync_request(needs: &[SyncNeed], out: &mut WriteBuffer<'_>) -> Result<(), WireError> {
        let count = u8::try_from(needs.len()).map_err(|_| WireError::LengthOverflow {
            len: needs.len(),
            max: usize::from(u8::MAX),
        })?;
        out.write_u8(count)?;
        for need in needs {
            out.write_u8(need.sender_id)?;
            out.write_u16_be(need.from_seq)?;
            out.write_u16_be(need.to_seq)?;
        }
        Ok(())
    }

    /// Ranges a peer asked for
    pub fn decode_sync_request(payload: &[u8]) -> Result<SyncNeeds, RelayError> {
        Ok(read_entries(payload)?
            .into_iter()
            .take(MAX_SENDERS)
            .map(|(sender_id, from_seq, to_seq)| SyncNeed {
                sender_id,
                from_seq,
                to_seq,
            })
            .collect())
    }

    /// Retained messages of `sender_id` with seq in `from..=to`, oldest first
    pub fn messages_in_range(
        &self,
        sender_id: u8,
        from: u16,
        to: u16,
    ) -> impl Iterator<Item = &RelayMessage> {
        self.sender(sender_id)
            .into_iter()
            .flat_map(|log| log.messages.iter())
            .filter(move |msg| (from..=to).contains(&msg.seq))
    }

    /// Refresh `last_heard` of a known sender; unknown ids are ignored
    pub fn update_presence(&mut self, sender_id: u8, now_ms: u32) {
        if let Some(log) = self.sender_mut(sender_id) {
            log.last_heard_ms = now_ms;
        }
    }

    /// Presence of `sender_id`, `None` when unknown
    #[must_use]
    pub fn presence(&self, sender_id: u8, now_ms: u32) -> Option<Presence> {
        let silence = self.sender(sender_id)?.silence(now_ms);
        Some(if silence < millis(self.config.stale_after) {
            Presence::Online
        } else if silence < millis(self.config.offline_after) {
            Presence::Stale
        } else {
            Presence::Offline
        })
    }

    /// Drop senders silent longer than the expiry; returns how many
    pub fn purge_expired(&mut self, now_ms: u32) -> usize {
        let expire = millis(self.config.expire_after);
        let before = self.senders.len();
        self.senders.retain(|log| {
            let keep = log.silence(now_ms) <= expire;
            if !keep {
                debug!(sender_id = log.sender_id, "sender expired");
            }
            keep
        });
        before - self.senders.len()
    }
}

fn read_entries(payload: &[u8]) -> Result<std::vec::Vec<(u8, u16, u16)>, RelayError> {
    let mut input = ReadBuffer::new(payload);
    let count = usize::from(input.read_u8());
    if input.remaining() != count * ENTRY_SIZE {
        return Err(RelayError::InvalidPayload {
            kind: MsgType::Digest,
        });
    }
    let entries = (0..count)
        .map(|_| (input.read_u8(), input.read_u16_be(), input.read_u16_be()))
        .collect();
    input.status()?;
    Ok(entries)
}
