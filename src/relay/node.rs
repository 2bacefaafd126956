//! Gossip state machine of one relay node.
//!
//! The node never touches the radio. [`RelayNode::handle_frame`] and
//! [`RelayNode::poll`] return the frames to broadcast; the caller owns the
//! link and the clock.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::protocol::WriteBuffer;

use super::message::{MsgType, RelayMessage};
use super::store::{MAX_DIGEST_SIZE, MAX_SENDERS, MessageStore, StoreConfig, SyncNeed, SyncNeeds};
use super::RelayError;

/// Node identity and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeConfig {
    /// Device id; subscribers use `0x01..=0x7F`, relays `0x80..=0xFE`
    pub device_id: u8,
    /// Node type announced in beacons; 0 for a relay
    pub node_type: u8,
    /// Time between beacons
    pub beacon_interval: Duration,
    /// Idle time after which a sync session is abandoned
    pub sync_timeout: Duration,
    /// Presence thresholds
    pub store: StoreConfig,
}

impl NodeConfig {
    /// Defaults for `device_id`
    #[must_use]
    pub fn new(device_id: u8) -> Self {
        Self {
            device_id,
            node_type: 0,
            beacon_interval: Duration::from_secs(10),
            sync_timeout: Duration::from_secs(30),
            store: StoreConfig::default(),
        }
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[derive(Debug)]
struct SyncSession {
    peer_id: u8,
    last_activity_ms: u32,
    digest_sent: bool,
    they_need: SyncNeeds,
    // next seq to send per need, newest first; `None` once exhausted
    cursors: heapless::Vec<Option<u16>, MAX_SENDERS>,
    send_index: usize,
}

impl SyncSession {
    fn new(peer_id: u8, now_ms: u32) -> Self {
        Self {
            peer_id,
            last_activity_ms: now_ms,
            digest_sent: false,
            they_need: SyncNeeds::new(),
            cursors: heapless::Vec::new(),
            send_index: 0,
        }
    }

    fn request(&mut self, needs: SyncNeeds, now_ms: u32) {
        self.cursors = needs
            .iter()
            .map(|need| (need.to_seq >= need.from_seq).then_some(need.to_seq))
            .collect();
        self.they_need = needs;
        self.send_index = 0;
        self.last_activity_ms = now_ms;
    }

    // Round-robin over the requested senders; yields the need and seq to
    // send next.
    fn advance(&mut self) -> Option<(SyncNeed, u16)> {
        let count = self.they_need.len();
        for _ in 0..count {
            let idx = self.send_index % count;
            self.send_index = self.send_index.wrapping_add(1);
            let need = self.they_need[idx];
            if let Some(seq) = self.cursors[idx] {
                self.cursors[idx] = (seq > need.from_seq).then(|| seq - 1);
                return Some((need, seq));
            }
        }
        None
    }
}

/// One relay node: message store, beacon timer and sync session.
#[derive(Debug)]
pub struct RelayNode {
    config: NodeConfig,
    store: MessageStore,
    next_seq: u16,
    last_beacon_ms: u32,
    peer_hash: Option<u16>,
    sync: Option<SyncSession>,
}

impl RelayNode {
    /// Node whose beacon timer starts at `now_ms`
    #[must_use]
    pub fn new(config: NodeConfig, now_ms: u32) -> Self {
        let store = MessageStore::new(config.store.clone());
        Self {
            config,
            store,
            next_seq: 1,
            last_beacon_ms: now_ms,
            peer_hash: None,
            sync: None,
        }
    }

    /// Resume numbering at `seq`, e.g. from a value saved across reboots
    #[must_use]
    pub fn with_next_seq(mut self, seq: u16) -> Self {
        self.next_seq = seq.max(1);
        self
    }

    /// Node configuration
    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Message store
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Seq the next originated message will carry
    #[must_use]
    pub const fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// State hash from the last beacon heard
    #[must_use]
    pub const fn peer_hash(&self) -> Option<u16> {
        self.peer_hash
    }

    /// Peer of the running sync session
    #[must_use]
    pub fn sync_peer(&self) -> Option<u8> {
        self.sync.as_ref().map(|session| session.peer_id)
    }

    fn originate(&mut self, msg: RelayMessage, now_ms: u32) -> Result<Bytes, RelayError> {
        self.next_seq = self.next_seq.wrapping_add(1).max(1);
        let frame = msg.to_bytes()?;
        self.store.store(msg, now_ms)?;
        Ok(frame)
    }

    /// Originate a location report; returns the frame to broadcast
    pub fn send_location(
        &mut self,
        node_a: u8,
        node_b: u8,
        timestamp: u32,
        now_ms: u32,
    ) -> Result<Bytes, RelayError> {
        let msg = RelayMessage::location(self.config.device_id, self.next_seq, timestamp, node_a, node_b);
        self.originate(msg, now_ms)
    }

    /// Originate a text message; returns the frame to broadcast
    pub fn send_text(&mut self, text: &[u8], timestamp: u32, now_ms: u32) -> Result<Bytes, RelayError> {
        let msg = RelayMessage::text(self.config.device_id, self.next_seq, timestamp, text);
        self.originate(msg, now_ms)
    }

    /// Beacon frame announcing the current state hash
    pub fn beacon(&self, now_ms: u32) -> Result<Bytes, RelayError> {
        RelayMessage::beacon(
            self.config.device_id,
            self.store.state_hash(now_ms),
            self.config.node_type,
        )
        .to_bytes()
    }

    fn digest_frame(&self, now_ms: u32) -> Result<Bytes, RelayError> {
        let mut buf = [0u8; MAX_DIGEST_SIZE];
        let mut out = WriteBuffer::new(&mut buf);
        self.store.encode_digest(now_ms, &mut out)?;
        RelayMessage::digest(self.config.device_id, out.finish()?)?.to_bytes()
    }

    /// Process one received frame and return the replies to broadcast.
    #[instrument(level = "debug", skip(self, frame), fields(len = frame.len()))]
    pub fn handle_frame(&mut self, frame: &[u8], now_ms: u32) -> Result<Vec<Bytes>, RelayError> {
        let msg = RelayMessage::decode(frame)?;
        if msg.sender_id == self.config.device_id {
            return Ok(Vec::new());
        }
        match msg.kind {
            MsgType::Location | MsgType::Text => {
                let (sender_id, seq) = (msg.sender_id, msg.seq);
                if self.store.store(msg, now_ms)? {
                    debug!(sender_id, seq, "live message stored");
                }
                Ok(Vec::new())
            }
            MsgType::Beacon => self.on_beacon(&msg, now_ms),
            MsgType::Digest => self.on_digest(&msg, now_ms),
            MsgType::SyncRequest => {
                self.on_sync_request(&msg, now_ms)?;
                Ok(Vec::new())
            }
        }
    }

    fn busy_with_other(&self, peer_id: u8) -> bool {
        self.sync
            .as_ref()
            .is_some_and(|session| session.peer_id != peer_id)
    }

    fn on_beacon(&mut self, msg: &RelayMessage, now_ms: u32) -> Result<Vec<Bytes>, RelayError> {
        let Some((peer_hash, _node_type)) = msg.as_beacon() else {
            return Ok(Vec::new());
        };
        let ours = self.store.state_hash(now_ms);
        debug!(peer = msg.sender_id, peer_hash, ours, "beacon");
        self.peer_hash = Some(peer_hash);
        self.store.update_presence(msg.sender_id, now_ms);

        if peer_hash == ours || self.sync.is_some() {
            return Ok(Vec::new());
        }
        let digest = self.digest_frame(now_ms)?;
        let mut session = SyncSession::new(msg.sender_id, now_ms);
        session.digest_sent = true;
        self.sync = Some(session);
        info!(peer = msg.sender_id, "state differs, sync started");
        Ok(vec![digest])
    }

    fn on_digest(&mut self, msg: &RelayMessage, now_ms: u32) -> Result<Vec<Bytes>, RelayError> {
        if self.busy_with_other(msg.sender_id) {
            debug!(peer = msg.sender_id, "digest ignored, syncing with another peer");
            return Ok(Vec::new());
        }
        let mut replies = Vec::new();
        let needs = self.store.decode_digest(msg.payload())?;
        if !needs.is_empty() {
            let mut buf = [0u8; MAX_DIGEST_SIZE];
            let mut out = WriteBuffer::new(&mut buf);
            MessageStore::encode_sync_request(&needs, &mut out)?;
            replies.push(RelayMessage::sync_request(self.config.device_id, out.finish()?)?.to_bytes()?);
            debug!(peer = msg.sender_id, senders = needs.len(), "sync request sent");
        }

        let send_digest = self.sync.as_ref().is_none_or(|session| !session.digest_sent);
        if send_digest {
            replies.push(self.digest_frame(now_ms)?);
        }
        let session = self
            .sync
            .get_or_insert_with(|| SyncSession::new(msg.sender_id, now_ms));
        session.digest_sent = true;
        session.last_activity_ms = now_ms;
        Ok(replies)
    }

    fn on_sync_request(&mut self, msg: &RelayMessage, now_ms: u32) -> Result<(), RelayError> {
        if self.busy_with_other(msg.sender_id) {
            debug!(peer = msg.sender_id, "sync request ignored, syncing with another peer");
            return Ok(());
        }
        let needs = MessageStore::decode_sync_request(msg.payload())?;
        debug!(peer = msg.sender_id, ranges = needs.len(), "sync request");
        self.sync
            .get_or_insert_with(|| SyncSession::new(msg.sender_id, now_ms))
            .request(needs, now_ms);
        Ok(())
    }

    fn continue_sync(&mut self, now_ms: u32) -> Option<Bytes> {
        let session = self.sync.as_mut()?;
        if now_ms.wrapping_sub(session.last_activity_ms) > millis(self.config.sync_timeout) {
            warn!(peer = session.peer_id, "sync session timed out");
            self.sync = None;
            return None;
        }
        while let Some((need, seq)) = session.advance() {
            let Some(msg) = self.store.sender(need.sender_id).and_then(|log| log.get(seq)) else {
                continue;
            };
            match msg.to_bytes() {
                Ok(frame) => {
                    session.last_activity_ms = now_ms;
                    return Some(frame);
                }
                Err(err) => warn!(%err, sender_id = need.sender_id, seq, "sync message not encodable"),
            }
        }
        if !session.they_need.is_empty() {
            info!(peer = session.peer_id, "sync send complete");
        }
        self.sync = None;
        None
    }

    /// Run timers: send at most one sync message, beacon when due and drop
    /// expired senders. Returns the frames to broadcast.
    pub fn poll(&mut self, now_ms: u32) -> Vec<Bytes> {
        let mut frames = Vec::new();
        frames.extend(self.continue_sync(now_ms));

        if now_ms.wrapping_sub(self.last_beacon_ms) >= millis(self.config.beacon_interval) {
            self.last_beacon_ms = now_ms;
            match self.beacon(now_ms) {
                Ok(frame) => frames.push(frame),
                Err(err) => warn!(%err, "beacon not encodable"),
            }
        }

        self.store.purge_expired(now_ms);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u8) -> RelayNode {
        RelayNode::new(NodeConfig::new(id), 0)
    }

    #[test]
    fn test_originate_numbers_and_stores() {
        let mut node = node(0x81);
        let frame = node.send_location(2, 3, 100, 0).unwrap();
        assert_eq!(&frame[..3], &[0x81, 0, 1]);
        node.send_text(b"hello", 101, 0).unwrap();
        assert_eq!(node.next_seq(), 3);
        assert_eq!(node.store().sender(0x81).map(|log| log.high_seq()), Some(2));
    }

    #[test]
    fn test_own_frames_ignored() {
        let mut node = node(0x81);
        let echo = RelayMessage::text(0x81, 9, 0, b"x").to_bytes().unwrap();
        assert!(node.handle_frame(&echo, 0).unwrap().is_empty());
        assert!(node.store().sender(0x81).is_none());
    }

    #[test]
    fn test_beacon_timer() {
        let mut node = node(0x81);
        assert!(node.poll(5_000).is_empty());
        let frames = node.poll(10_000);
        assert_eq!(frames.len(), 1);
        let beacon = RelayMessage::decode(&frames[0]).unwrap();
        assert_eq!(beacon.as_beacon(), Some((0, 0)));
        assert!(node.poll(10_001).is_empty());
    }

    #[test]
    fn test_matching_beacon_starts_nothing() {
        let mut node = node(0x81);
        let beacon = RelayMessage::beacon(0x82, 0, 0).to_bytes().unwrap();
        assert!(node.handle_frame(&beacon, 0).unwrap().is_empty());
        assert_eq!(node.peer_hash(), Some(0));
        assert_eq!(node.sync_peer(), None);
    }

    #[test]
    fn test_sync_sends_newest_first() {
        let mut node = node(0x81);
        for _ in 0..3 {
            node.send_text(b"m", 0, 0).unwrap();
        }
        let mut buf = [0u8; MAX_DIGEST_SIZE];
        let mut out = WriteBuffer::new(&mut buf);
        let need = SyncNeed {
            sender_id: 0x81,
            from_seq: 2,
            to_seq: 3,
        };
        MessageStore::encode_sync_request(&[need], &mut out).unwrap();
        let request = RelayMessage::sync_request(0x82, out.written()).unwrap();
        node.handle_frame(&request.to_bytes().unwrap(), 0).unwrap();
        assert_eq!(node.sync_peer(), Some(0x82));

        let seqs: Vec<u16> = (0..3)
            .flat_map(|_| node.continue_sync(1))
            .map(|frame| RelayMessage::decode(&frame).unwrap().seq)
            .collect();
        assert_eq!(seqs, [3, 2]);
        assert_eq!(node.sync_peer(), None);
    }

    #[test]
    fn test_sync_times_out() {
        let mut node = node(0x81);
        let beacon = RelayMessage::beacon(0x82, 0x1234, 0).to_bytes().unwrap();
        assert_eq!(node.handle_frame(&beacon, 0).unwrap().len(), 1);
        assert_eq!(node.sync_peer(), Some(0x82));
        assert!(node.continue_sync(30_001).is_none());
        assert_eq!(node.sync_peer(), None);
    }
}
