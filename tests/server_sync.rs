//! Multi-client server flows over the in-memory transport.

use std::time::{Duration, Instant};

use microproto::property::{Declaration, ScalarProperty};
use microproto::protocol::{HelloRequest, Message, OpCode, PropertyUpdate, UpdateItem, decode, encode};
use microproto::transport::{Inbox, MemoryTransport, Server, ServerConfig};
use microproto::{Handle, MemoryBodyStore, PropertySystem};

struct Rig {
    system: PropertySystem,
    server: Server<MemoryTransport>,
    bodies: MemoryBodyStore,
    power: Handle<ScalarProperty<bool>>,
    level: Handle<ScalarProperty<u8>>,
    now: Instant,
}

impl Rig {
    fn new(clients: u8) -> Self {
        let mut system = PropertySystem::new();
        let power = system
            .register(Declaration::new("power"), ScalarProperty::new(false))
            .unwrap();
        let level = system
            .register(Declaration::new("level"), ScalarProperty::new(0u8))
            .unwrap();
        let mut transport = MemoryTransport::new();
        for client in 0..clients {
            transport.open(client, 512);
        }
        let server = Server::new(&mut system, transport, ServerConfig::websocket()).unwrap();
        Self {
            system,
            server,
            bodies: MemoryBodyStore::new(),
            power,
            level,
            now: Instant::now(),
        }
    }

    fn join(&mut self, client: u8) {
        self.server.connect(client).unwrap();
        let hello = frame(&Message::HelloRequest(HelloRequest::new(512, u32::from(client))));
        self.send(client, &hello);
        assert!(self.server.is_ready(client));
        self.server.transport_mut().drain(client);
    }

    fn send(&mut self, client: u8, frame: &[u8]) -> bool {
        self.server
            .handle_frame(client, frame, &mut self.system, &mut self.bodies)
    }

    fn tick(&mut self) -> usize {
        self.now += Duration::from_millis(100);
        self.system.flush_tick();
        self.server.tick(&mut self.system, self.now)
    }

    fn updates(&mut self, client: u8) -> Vec<(u16, Vec<u8>)> {
        let frames = self.server.transport_mut().drain(client);
        frames
            .iter()
            .filter_map(|f| match decode(f, &self.system) {
                Ok(Message::PropertyUpdate(update)) => Some(update),
                _ => None,
            })
            .flat_map(|update| {
                update
                    .items
                    .iter()
                    .map(|item| (item.id, item.value.to_vec()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn frame(message: &Message<'_>) -> Vec<u8> {
    let mut buf = [0u8; 128];
    let len = encode(message, &mut buf).unwrap();
    buf[..len].to_vec()
}

#[test]
fn test_broadcast_reaches_every_ready_client() {
    let mut rig = Rig::new(3);
    rig.join(0);
    rig.join(1);
    rig.server.connect(2).unwrap();

    rig.system.set(rig.level, 7).unwrap();
    assert_eq!(rig.tick(), 2);
    assert_eq!(rig.updates(0), vec![(1, vec![7])]);
    assert_eq!(rig.updates(1), vec![(1, vec![7])]);
    assert!(rig.updates(2).is_empty());
}

#[test]
fn test_writer_gets_no_echo() {
    let mut rig = Rig::new(2);
    rig.join(0);
    rig.join(1);

    let update = frame(&Message::PropertyUpdate(PropertyUpdate::single(0, &[0x01])));
    assert!(rig.send(0, &update));
    assert_eq!(rig.system.value(rig.power), Some(true));

    assert_eq!(rig.tick(), 1);
    assert!(rig.updates(0).is_empty());
    assert_eq!(rig.updates(1), vec![(0, vec![1])]);

    // a later local change reaches the writer again
    rig.system.set(rig.power, false).unwrap();
    rig.tick();
    assert_eq!(rig.updates(0), vec![(0, vec![0])]);
}

#[test]
fn test_changes_coalesce_within_interval() {
    let mut rig = Rig::new(1);
    rig.join(0);

    rig.system.set(rig.level, 1).unwrap();
    assert_eq!(rig.tick(), 1);
    rig.updates(0);

    rig.system.set(rig.level, 2).unwrap();
    rig.system.flush_tick();
    assert_eq!(rig.server.tick(&mut rig.system, rig.now), 0);
    rig.system.set(rig.level, 3).unwrap();
    rig.system.set(rig.power, true).unwrap();

    assert_eq!(rig.tick(), 1);
    assert_eq!(rig.updates(0), vec![(0, vec![1]), (1, vec![3])]);
}

#[test]
fn test_batched_write_from_client() {
    let mut rig = Rig::new(2);
    rig.join(0);
    rig.join(1);

    let batch = frame(&Message::PropertyUpdate(PropertyUpdate::batch(
        None,
        vec![
            UpdateItem { id: 0, value: &[0x01] },
            UpdateItem { id: 1, value: &[9] },
        ],
    )));
    rig.send(0, &batch);
    assert_eq!(rig.system.value(rig.level), Some(9));
    rig.tick();
    assert_eq!(rig.updates(1), vec![(0, vec![1]), (1, vec![9])]);
    assert!(rig.updates(0).is_empty());
}

#[test]
fn test_disconnect_forgets_client() {
    let mut rig = Rig::new(1);
    rig.join(0);
    rig.server.disconnect(0);
    assert!(!rig.server.is_connected(0));

    rig.system.set(rig.level, 4).unwrap();
    assert_eq!(rig.tick(), 0);

    rig.join(0);
    rig.system.set(rig.level, 5).unwrap();
    assert_eq!(rig.tick(), 1);
}

#[test]
fn test_inbox_drives_server() {
    static INBOX: Inbox<8, 64> = Inbox::new();
    let mut rig = Rig::new(1);

    assert!(INBOX.push_connected(0));
    let hello = frame(&Message::HelloRequest(HelloRequest::new(512, 1)));
    assert!(INBOX.push_frame(0, &hello));
    assert!(INBOX.push_frame(0, &[0x06, 0x05]));

    assert_eq!(rig.server.poll(&INBOX, &mut rig.system, &mut rig.bodies), 3);
    assert!(rig.server.is_ready(0));
    let last = rig.server.transport_mut().drain(0).pop().unwrap();
    assert_eq!(last.as_ref(), &[0x16, 0x05]);

    assert!(INBOX.push_disconnected(0));
    rig.server.poll(&INBOX, &mut rig.system, &mut rig.bodies);
    assert!(!rig.server.is_connected(0));
}

#[test]
fn test_metrics_track_traffic() {
    let mut rig = Rig::new(1);
    rig.join(0);
    rig.send(0, &[0x06, 0x01]);
    rig.send(0, &[0x0D]);

    let metrics = rig.server.metrics();
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.decode_errors, 1);
    assert!(snapshot.frames_received >= 3);
    assert!(metrics.opcode_count(OpCode::Ping) >= 1);
}
