//! Loopback transport that records outbound frames.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::{ClientId, Transport, TransportError};

#[derive(Debug, Default)]
struct Link {
    mtu: usize,
    outbox: Vec<Bytes>,
}

/// In-memory [`Transport`] for host builds and tests.
///
/// Every client opened with [`open`](Self::open) gets an outbox; frames
/// sent to it accumulate until drained.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    links: BTreeMap<ClientId, Link>,
}

impl MemoryTransport {
    /// Transport with no open links
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a link to `client` accepting frames up to `mtu` bytes
    pub fn open(&mut self, client: ClientId, mtu: usize) {
        self.links.insert(
            client,
            Link {
                mtu,
                outbox: Vec::new(),
            },
        );
    }

    /// Close the link; undrained frames are discarded
    pub fn close(&mut self, client: ClientId) {
        self.links.remove(&client);
    }

    /// Frames sent to `client` and not drained yet
    #[must_use]
    pub fn sent(&self, client: ClientId) -> &[Bytes] {
        self.links
            .get(&client)
            .map_or(&[][..], |link| link.outbox.as_slice())
    }

    /// Take every frame sent to `client`
    pub fn drain(&mut self, client: ClientId) -> Vec<Bytes> {
        self.links
            .get_mut(&client)
            .map(|link| std::mem::take(&mut link.outbox))
            .unwrap_or_default()
    }
}

impl Transport for MemoryTransport {
    fn mtu(&self, client: ClientId) -> usize {
        self.links.get(&client).map_or(0, |link| link.mtu)
    }

    fn send(&mut self, client: ClientId, frame: Bytes) -> Result<(), TransportError> {
        let link = self
            .links
            .get_mut(&client)
            .ok_or(TransportError::NotConnected { client })?;
        if frame.len() > link.mtu {
            return Err(TransportError::FrameTooLarge {
                len: frame.len(),
                mtu: link.mtu,
            });
        }
        link.outbox.push(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_drain() {
        let mut transport = MemoryTransport::new();
        transport.open(1, 8);
        transport.send(1, Bytes::from_static(&[0x06, 0x01])).unwrap();
        assert_eq!(transport.sent(1).len(), 1);
        assert_eq!(transport.drain(1), vec![Bytes::from_static(&[0x06, 0x01])]);
        assert!(transport.sent(1).is_empty());
    }

    #[test]
    fn test_send_errors() {
        let mut transport = MemoryTransport::new();
        assert_eq!(
            transport.send(3, Bytes::new()),
            Err(TransportError::NotConnected { client: 3 })
        );
        transport.open(3, 2);
        assert_eq!(
            transport.send(3, Bytes::from_static(&[0; 3])),
            Err(TransportError::FrameTooLarge { len: 3, mtu: 2 })
        );
        transport.close(3);
        assert_eq!(transport.mtu(3), 0);
    }
}
