//! End-to-end protocol scenarios with literal frames.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use microproto::property::{
    ArrayProperty, Declaration, PropertyMeta, ResourceProperty, ScalarProperty, ValueConstraints,
};
use microproto::protocol::{
    ErrorCode, HelloRequest, Message, OpCode, PropertyUpdate, ResourcePutRequest, ResourceRequest,
    ResourceStatus, UpdateItem, WriteBuffer, decode, encode,
};
use microproto::transport::{MemoryTransport, Server, ServerConfig};
use microproto::{MemoryBodyStore, Property, PropertySystem};

fn encode_frame(message: &Message<'_>) -> Vec<u8> {
    let mut buf = [0u8; 256];
    let len = encode(message, &mut buf).unwrap();
    buf[..len].to_vec()
}

fn server_for(system: &mut PropertySystem) -> Server<MemoryTransport> {
    let mut transport = MemoryTransport::new();
    transport.open(0, 512);
    let mut server = Server::new(system, transport, ServerConfig::websocket()).unwrap();
    server.connect(0).unwrap();
    server
}

static POWER_CHANGES: AtomicUsize = AtomicUsize::new(0);

fn count_power_change(_meta: &PropertyMeta, _property: &dyn Property) {
    POWER_CHANGES.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_scalar_round_trip() {
    let mut system = PropertySystem::new();
    let power = system
        .register(Declaration::new("power"), ScalarProperty::new(false))
        .unwrap();
    system.set_callback(power, count_power_change).unwrap();

    let frame = encode_frame(&Message::PropertyUpdate(PropertyUpdate::single(0, &[0x01])));
    assert_eq!(frame, [0x01, 0x00, 0x01]);

    let Message::PropertyUpdate(update) = decode(&frame, &system).unwrap() else {
        panic!("expected PROPERTY_UPDATE");
    };
    assert!(!update.batched);
    assert_eq!(update.timestamp, None);
    assert_eq!(update.items, vec![UpdateItem { id: 0, value: &[0x01] }]);

    for item in &update.items {
        assert!(system.set_from_wire(item.id, item.value).unwrap());
    }
    assert_eq!(system.value(power), Some(true));
    assert_eq!(POWER_CHANGES.load(Ordering::SeqCst), 1);
    assert!(system.dirty().contains(0));
}

#[test]
fn test_batched_update_with_timestamp() {
    let mut system = PropertySystem::new();
    system
        .register(Declaration::new("power"), ScalarProperty::new(false))
        .unwrap();
    let level = system
        .register(Declaration::new("level"), ScalarProperty::new(0u8))
        .unwrap();

    let batch = PropertyUpdate::batch(
        Some(1000),
        vec![
            UpdateItem { id: 0, value: &[0x01] },
            UpdateItem { id: 1, value: &[42] },
        ],
    );
    let frame = encode_frame(&Message::PropertyUpdate(batch.clone()));
    assert_eq!(frame, [0x31, 0x01, 0xE8, 0x07, 0x00, 0x01, 0x01, 0x2A]);

    let Message::PropertyUpdate(decoded) = decode(&frame, &system).unwrap() else {
        panic!("expected PROPERTY_UPDATE");
    };
    assert_eq!(decoded, batch);
    for item in &decoded.items {
        system.set_from_wire(item.id, item.value).unwrap();
    }
    assert_eq!(system.value(level), Some(42));

    let flushed = system.flush_tick();
    assert_eq!(flushed.iter().collect::<Vec<_>>(), [0, 1]);
    assert!(system.dirty().is_empty());
}

#[test]
fn test_constraint_rejection() {
    let mut system = PropertySystem::new();
    for name in ["a", "b", "c"] {
        system
            .register(Declaration::new(name), ScalarProperty::new(false))
            .unwrap();
    }
    let limited = system
        .register(
            Declaration::new("limited"),
            ScalarProperty::new(10u8).with_constraints(ValueConstraints::new().range(10u8, 20u8)),
        )
        .unwrap();
    assert_eq!(limited.id(), 3);

    let mut server = server_for(&mut system);
    let mut bodies = MemoryBodyStore::new();
    server.handle_frame(0, &[0x01, 0x03, 0x05], &mut system, &mut bodies);

    let frames = server.transport_mut().drain(0);
    assert_eq!(frames.len(), 1);
    let Message::Error(error) = decode(&frames[0], &system).unwrap() else {
        panic!("expected ERROR");
    };
    assert_eq!(error.code, ErrorCode::ValidationFailed);
    assert_eq!(error.code.as_u16(), 0x0005);
    assert!(!error.schema_mismatch);

    assert_eq!(system.value(limited), Some(10));
    assert!(system.dirty().is_empty());
}

#[test]
fn test_rgb_array_round_trip() {
    let mut system = PropertySystem::new();
    for name in ["a", "b", "c", "d", "e"] {
        system
            .register(Declaration::new(name), ScalarProperty::new(0u8))
            .unwrap();
    }
    let color = system
        .register(Declaration::new("color"), ArrayProperty::<u8, 3>::new([0, 0, 0]))
        .unwrap();
    assert_eq!(color.id(), 5);

    let frame = [0x01, 0x05, 0xFF, 0x80, 0x40];
    let Message::PropertyUpdate(update) = decode(&frame, &system).unwrap() else {
        panic!("expected PROPERTY_UPDATE");
    };
    assert_eq!(update.items[0].id, 5);
    system
        .set_from_wire(update.items[0].id, update.items[0].value)
        .unwrap();
    assert_eq!(system.get(color).map(|p| *p.get()), Some([255, 128, 64]));

    let mut buf = [0u8; 8];
    let mut out = WriteBuffer::new(&mut buf);
    system.encode_value(5, &mut out).unwrap();
    let value = out.written().to_vec();
    let reencoded = encode_frame(&Message::PropertyUpdate(PropertyUpdate::single(5, &value)));
    assert_eq!(&reencoded[1..], &[0x05, 0xFF, 0x80, 0x40]);
}

#[test]
fn test_resource_create_fetch_delete() {
    let mut system = PropertySystem::new();
    let shaders = system
        .register(Declaration::new("shaders"), ResourceProperty::<4, 4>::new())
        .unwrap();
    let property_id = u16::from(shaders.id());
    let mut server = server_for(&mut system);
    let mut bodies = MemoryBodyStore::new();

    let put = encode_frame(&Message::ResourcePut(ResourcePutRequest {
        request_id: 1,
        property_id,
        resource_id: 0,
        header: Some(&[0xDE, 0xAD, 0xBE, 0xEF]),
        body: Some(&[0x01, 0x02, 0x03]),
    }));
    server.handle_frame(0, &put, &mut system, &mut bodies);
    let frames = server.transport_mut().drain(0);
    let Message::ResourcePutResponse(response) = decode(&frames[0], &system).unwrap() else {
        panic!("expected RESOURCE_PUT response");
    };
    assert_eq!(response.request_id, 1);
    let resource_id = response.result.unwrap();
    assert!(resource_id >= 1);

    let get = encode_frame(&Message::ResourceGet(ResourceRequest {
        request_id: 2,
        property_id,
        resource_id,
    }));
    server.handle_frame(0, &get, &mut system, &mut bodies);
    let frames = server.transport_mut().drain(0);
    let Message::ResourceGetResponse(response) = decode(&frames[0], &system).unwrap() else {
        panic!("expected RESOURCE_GET response");
    };
    assert_eq!(response.result.unwrap(), Cow::Borrowed(&[0x01u8, 0x02, 0x03][..]));

    let delete = encode_frame(&Message::ResourceDelete(ResourceRequest {
        request_id: 3,
        property_id,
        resource_id,
    }));
    server.handle_frame(0, &delete, &mut system, &mut bodies);
    let frames = server.transport_mut().drain(0);
    let Message::ResourceDeleteResponse(response) = decode(&frames[0], &system).unwrap() else {
        panic!("expected RESOURCE_DELETE response");
    };
    assert!(response.result.is_ok());
    assert!(bodies.is_empty());

    server.handle_frame(0, &get, &mut system, &mut bodies);
    let frames = server.transport_mut().drain(0);
    let Message::ResourceGetResponse(response) = decode(&frames[0], &system).unwrap() else {
        panic!("expected RESOURCE_GET response");
    };
    assert_eq!(response.result.unwrap_err().status, ResourceStatus::NotFound);
}

#[test]
fn test_hello_resync() {
    let mut system = PropertySystem::new();
    let power = system
        .register(Declaration::new("power"), ScalarProperty::new(false))
        .unwrap();
    let mut server = server_for(&mut system);
    let mut bodies = MemoryBodyStore::new();
    let start = Instant::now();

    let stale = encode_frame(&Message::HelloRequest(HelloRequest {
        version: 0,
        max_packet: 512,
        device_id: 7,
    }));
    server.handle_frame(0, &stale, &mut system, &mut bodies);
    let frames = server.transport_mut().drain(0);
    let Message::Error(error) = decode(&frames[0], &system).unwrap() else {
        panic!("expected ERROR");
    };
    assert_eq!(error.code, ErrorCode::ProtocolVersionMismatch);
    assert!(error.schema_mismatch);
    assert!(!server.is_ready(0));

    system.set(power, true).unwrap();
    system.flush_tick();
    assert_eq!(server.tick(&mut system, start), 0);
    assert!(server.transport().sent(0).is_empty());

    let hello = encode_frame(&Message::HelloRequest(HelloRequest::new(512, 7)));
    server.handle_frame(0, &hello, &mut system, &mut bodies);
    assert!(server.is_ready(0));
    let opcodes: Vec<u8> = server
        .transport_mut()
        .drain(0)
        .iter()
        .map(|frame| frame[0] & 0x0F)
        .collect();
    assert_eq!(
        opcodes,
        [
            OpCode::Hello.as_u8(),
            OpCode::SchemaUpsert.as_u8(),
            OpCode::PropertyUpdate.as_u8()
        ]
    );

    system.set(power, false).unwrap();
    system.flush_tick();
    assert_eq!(server.tick(&mut system, start + Duration::from_millis(100)), 1);
    let frames = server.transport_mut().drain(0);
    let Message::PropertyUpdate(update) = decode(&frames[0], &system).unwrap() else {
        panic!("expected PROPERTY_UPDATE");
    };
    assert_eq!(update.items, vec![UpdateItem { id: 0, value: &[0x00] }]);
}
