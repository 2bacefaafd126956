use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::OpCode;

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

/// Direction of frame flow for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frame handed to the transport
    Sent,
    /// Frame taken from the inbox
    Received,
}

struct Traffic {
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl Traffic {
    const fn new() -> Self {
        Self {
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }
}

/// Per-server protocol counters.
///
/// All counters are relaxed atomics so a snapshot can be taken from another
/// thread while the server runs.
pub struct Metrics {
    sent: Traffic,
    received: Traffic,
    per_opcode: [AtomicU64; 16],
    decode_errors: AtomicU64,
    error_replies: AtomicU64,
    dropped_frames: AtomicU64,
    broadcasts: AtomicU64,
    max_frame_size: AtomicU64,
    handle_total_ns: AtomicU64,
    handle_max_ns: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Metrics").field(&self.snapshot()).finish()
    }
}

impl Metrics {
    /// Zeroed counters
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sent: Traffic::new(),
            received: Traffic::new(),
            per_opcode: [const { AtomicU64::new(0) }; 16],
            decode_errors: AtomicU64::new(0),
            error_replies: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            max_frame_size: AtomicU64::new(0),
            handle_total_ns: AtomicU64::new(0),
            handle_max_ns: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_frame(&self, direction: Direction, opcode: Option<OpCode>, len: usize) {
        let traffic = match direction {
            Direction::Sent => &self.sent,
            Direction::Received => &self.received,
        };
        let len = len as u64;
        traffic.frames.fetch_add(1, Ordering::Relaxed);
        traffic.bytes.fetch_add(len, Ordering::Relaxed);
        update_max(&self.max_frame_size, len);
        if let Some(opcode) = opcode {
            self.per_opcode[usize::from(opcode.as_u8())].fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error_reply(&self) {
        self.error_replies.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_handle_time(&self, duration: Duration) {
        let nanos = duration
            .as_nanos()
            .min(u128::from(u64::MAX))
            .try_into()
            .unwrap_or(u64::MAX);
        self.handle_total_ns.fetch_add(nanos, Ordering::Relaxed);
        update_max(&self.handle_max_ns, nanos);
    }

    /// Frames seen for `opcode` in either direction
    #[must_use]
    pub fn opcode_count(&self, opcode: OpCode) -> u64 {
        self.per_opcode[usize::from(opcode.as_u8())].load(Ordering::Relaxed)
    }

    /// Copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.sent.frames.load(Ordering::Relaxed),
            bytes_sent: self.sent.bytes.load(Ordering::Relaxed),
            frames_received: self.received.frames.load(Ordering::Relaxed),
            bytes_received: self.received.bytes.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            error_replies: self.error_replies.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            max_frame_size: self.max_frame_size.load(Ordering::Relaxed),
            handle_total_ns: self.handle_total_ns.load(Ordering::Relaxed),
            handle_max_ns: self.handle_max_ns.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(current, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    /// Frames handed to the transport
    pub frames_sent: u64,
    /// Bytes handed to the transport
    pub bytes_sent: u64,
    /// Frames taken from the inbox
    pub frames_received: u64,
    /// Bytes taken from the inbox
    pub bytes_received: u64,
    /// Inbound frames that failed to decode
    pub decode_errors: u64,
    /// ERROR messages sent
    pub error_replies: u64,
    /// Outbound frames the transport refused
    pub dropped_frames: u64,
    /// Flush rounds that sent at least one frame
    pub broadcasts: u64,
    /// Largest frame seen in either direction
    pub max_frame_size: u64,
    /// Total time spent handling inbound frames
    pub handle_total_ns: u64,
    /// Longest time spent on one inbound frame
    pub handle_max_ns: u64,
}

impl MetricsSnapshot {
    /// Average size of a sent frame in bytes.
    #[must_use]
    pub fn avg_frame_size(&self) -> Option<u64> {
        (self.frames_sent > 0).then(|| self.bytes_sent / self.frames_sent)
    }

    /// Average time spent handling one received frame, in microseconds.
    #[must_use]
    pub fn avg_handle_time_us(&self) -> Option<u64> {
        if self.frames_received == 0 {
            return None;
        }
        let total = u128::from(self.handle_total_ns);
        Some((total / (u128::from(self.frames_received) * NANOSECONDS_PER_MICROSECOND)) as u64)
    }
}
