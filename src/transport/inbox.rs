//! Bounded inbound ring between a transport driver and the main loop.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::{Deque, Vec};
use tracing::warn;

use super::ClientId;

/// Event queued by a transport driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxEvent<const MTU: usize> {
    /// A client opened a connection
    Connected(ClientId),
    /// A client went away
    Disconnected(ClientId),
    /// One complete inbound frame
    Frame {
        /// Sender
        client: ClientId,
        /// Frame bytes
        data: Vec<u8, MTU>,
    },
}

struct Ring<const SLOTS: usize, const MTU: usize> {
    events: Deque<InboxEvent<MTU>, SLOTS>,
    dropped: u32,
}

/// Fixed-capacity event ring of `SLOTS` entries, each frame at most `MTU`
/// bytes.
///
/// Pushes may come from a driver task or interrupt; every access runs
/// inside a critical section. A full ring drops the new event with a
/// warning.
///
/// ```
/// use microproto::transport::{Inbox, InboxEvent};
///
/// static INBOX: Inbox<4, 64> = Inbox::new();
///
/// assert!(INBOX.push_frame(0, &[0x06, 0x01]));
/// assert!(matches!(INBOX.pop(), Some(InboxEvent::Frame { client: 0, .. })));
/// ```
pub struct Inbox<const SLOTS: usize, const MTU: usize> {
    ring: Mutex<RefCell<Ring<SLOTS, MTU>>>,
}

impl<const SLOTS: usize, const MTU: usize> Default for Inbox<SLOTS, MTU> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize, const MTU: usize> Inbox<SLOTS, MTU> {
    /// Empty ring
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(RefCell::new(Ring {
                events: Deque::new(),
                dropped: 0,
            })),
        }
    }

    fn push(&self, event: InboxEvent<MTU>) -> bool {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            match ring.events.push_back(event) {
                Ok(()) => true,
                Err(_) => {
                    ring.dropped = ring.dropped.saturating_add(1);
                    false
                }
            }
        })
    }

    /// Queue an inbound frame. Returns `false` when it was dropped.
    pub fn push_frame(&self, client: ClientId, frame: &[u8]) -> bool {
        let Ok(data) = Vec::from_slice(frame) else {
            warn!(client, len = frame.len(), mtu = MTU, "inbound frame exceeds MTU, dropping");
            critical_section::with(|cs| {
                let mut ring = self.ring.borrow_ref_mut(cs);
                ring.dropped = ring.dropped.saturating_add(1);
            });
            return false;
        };
        let queued = self.push(InboxEvent::Frame { client, data });
        if !queued {
            warn!(client, len = frame.len(), "inbox full, dropping frame");
        }
        queued
    }

    /// Queue a connect notification
    pub fn push_connected(&self, client: ClientId) -> bool {
        let queued = self.push(InboxEvent::Connected(client));
        if !queued {
            warn!(client, "inbox full, dropping connect");
        }
        queued
    }

    /// Queue a disconnect notification
    pub fn push_disconnected(&self, client: ClientId) -> bool {
        let queued = self.push(InboxEvent::Disconnected(client));
        if !queued {
            warn!(client, "inbox full, dropping disconnect");
        }
        queued
    }

    /// Oldest queued event
    pub fn pop(&self) -> Option<InboxEvent<MTU>> {
        critical_section::with(|cs| self.ring.borrow_ref_mut(cs).events.pop_front())
    }

    /// Number of queued events
    #[must_use]
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).events.len())
    }

    /// `true` when nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped since creation
    #[must_use]
    pub fn dropped(&self) -> u32 {
        critical_section::with(|cs| self.ring.borrow_ref(cs).dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let inbox: Inbox<4, 8> = Inbox::new();
        assert!(inbox.push_connected(1));
        assert!(inbox.push_frame(1, &[1, 2, 3]));
        assert!(inbox.push_disconnected(1));
        assert_eq!(inbox.len(), 3);

        assert_eq!(inbox.pop(), Some(InboxEvent::Connected(1)));
        let Some(InboxEvent::Frame { client, data }) = inbox.pop() else {
            panic!("expected frame");
        };
        assert_eq!(client, 1);
        assert_eq!(data.as_slice(), &[1, 2, 3]);
        assert_eq!(inbox.pop(), Some(InboxEvent::Disconnected(1)));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_full_ring_drops_newest() {
        let inbox: Inbox<2, 8> = Inbox::new();
        assert!(inbox.push_frame(0, &[1]));
        assert!(inbox.push_frame(0, &[2]));
        assert!(!inbox.push_frame(0, &[3]));
        assert_eq!(inbox.dropped(), 1);

        let Some(InboxEvent::Frame { data, .. }) = inbox.pop() else {
            panic!("expected frame");
        };
        assert_eq!(data.as_slice(), &[1]);
    }

    #[test]
    fn test_oversized_frame_dropped() {
        let inbox: Inbox<2, 4> = Inbox::new();
        assert!(!inbox.push_frame(0, &[0; 5]));
        assert!(inbox.is_empty());
        assert_eq!(inbox.dropped(), 1);
    }

    #[test]
    fn test_shared_across_threads() {
        static INBOX: Inbox<16, 4> = Inbox::new();
        let producer = std::thread::spawn(|| {
            for i in 0..8u8 {
                assert!(INBOX.push_frame(2, &[i]));
            }
        });
        producer.join().unwrap();
        let mut seen = std::vec::Vec::new();
        while let Some(InboxEvent::Frame { data, .. }) = INBOX.pop() {
            seen.push(data[0]);
        }
        assert_eq!(seen, (0..8).collect::<std::vec::Vec<u8>>());
    }
}
