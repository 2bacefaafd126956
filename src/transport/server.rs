//! Protocol server adapter.
//!
//! One [`Server`] serves one transport. It keeps a fixed table of client
//! slots, answers requests through a [`MessageHandler`] session and fans
//! property changes out to every client that completed the HELLO sync.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::property::ResourceError;
use crate::protocol::{
    Direction, Error, ErrorCode, ErrorMessage, HelloRequest, HelloResponse, MAX_BATCH_ITEMS,
    Message, MessageHandler, Metrics, OpCode, OpHeader, PROTOCOL_VERSION, Ping, PropertyUpdate,
    ResourceDeleteResponse, ResourceGetResponse, ResourcePutRequest, ResourcePutResponse,
    ResourceRequest, ResourceStatus, Result, Router, RpcFailure, RpcRequest, RpcResponse,
    SchemaDelete, SchemaLookup, SchemaUpsert, WireError, WriteBuffer, encode_to_vec,
    pack_updates,
};
use crate::registry::{Interest, PropertySystem, SubscriberId};
use crate::store::ResourceBodyStore;

use super::{ClientId, Inbox, InboxEvent, ServerConfig, Transport, TransportError};

/// Application RPC functions.
pub trait RpcHandler {
    /// Whether `function_id` is implemented
    fn handles(&self, function_id: u16) -> bool;

    /// Run `function_id` with packed `params`. `Ok(Some(bytes))` carries a
    /// packed return value.
    fn call(
        &mut self,
        system: &mut PropertySystem,
        function_id: u16,
        params: &[u8],
    ) -> std::result::Result<Option<Vec<u8>>, RpcFailure<'static>>;
}

#[derive(Debug, Default)]
struct ClientSlot {
    ready: bool,
    session_id: u32,
    max_packet: Option<usize>,
    // xxh3 of the last value of each property this client is known to hold
    known: HashMap<u16, u64>,
}

/// MicroProto server for one transport.
pub struct Server<T: Transport> {
    config: ServerConfig,
    transport: T,
    clients: Vec<Option<ClientSlot>>,
    subscriber: SubscriberId,
    router: Router,
    rpc: Option<Box<dyn RpcHandler>>,
    metrics: Metrics,
    started: Instant,
    last_flush: Option<Instant>,
    scratch: Vec<u8>,
}

impl<T: Transport> std::fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("clients", &self.clients)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Server<T> {
    /// Create a server and subscribe it to the change set of `system`
    pub fn new(system: &mut PropertySystem, transport: T, config: ServerConfig) -> Result<Self> {
        let subscriber = system.subscribe(Interest::Changes)?;
        let clients = std::iter::repeat_with(|| None).take(config.max_clients).collect();
        let scratch = vec![0u8; config.tx_buffer_size];
        Ok(Self {
            config,
            transport,
            clients,
            subscriber,
            router: Router::new(),
            rpc: None,
            metrics: Metrics::new(),
            started: Instant::now(),
            last_flush: None,
            scratch,
        })
    }

    /// Install the RPC function table
    #[must_use]
    pub fn with_rpc(mut self, handler: impl RpcHandler + 'static) -> Self {
        self.rpc = Some(Box::new(handler));
        self
    }

    /// Configuration in effect
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Underlying transport
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Protocol counters
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Whether `client` holds a slot
    #[must_use]
    pub fn is_connected(&self, client: ClientId) -> bool {
        self.slot(client).is_some()
    }

    /// Whether `client` completed the HELLO sync
    #[must_use]
    pub fn is_ready(&self, client: ClientId) -> bool {
        self.slot(client).is_some_and(|slot| slot.ready)
    }

    /// Session id handed out in the last HELLO response to `client`
    #[must_use]
    pub fn session_id(&self, client: ClientId) -> Option<u32> {
        self.slot(client).filter(|slot| slot.ready).map(|slot| slot.session_id)
    }

    /// Clients that receive broadcasts
    pub fn ready_clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .filter(|slot| slot.ready)
                .and_then(|_| ClientId::try_from(index).ok())
        })
    }

    fn slot(&self, client: ClientId) -> Option<&ClientSlot> {
        self.clients.get(usize::from(client))?.as_ref()
    }

    fn slot_mut(&mut self, client: ClientId) -> Option<&mut ClientSlot> {
        self.clients.get_mut(usize::from(client))?.as_mut()
    }

    /// Claim the slot of a newly connected client. It receives nothing
    /// until it sends a valid HELLO.
    pub fn connect(&mut self, client: ClientId) -> Result<()> {
        let max = self.config.max_clients;
        let slot = self
            .clients
            .get_mut(usize::from(client))
            .ok_or(TransportError::NoFreeSlot { max })?;
        if slot.replace(ClientSlot::default()).is_some() {
            warn!(client, "slot already connected, dropping its session");
        }
        debug!(client, "client connected");
        Ok(())
    }

    /// Release the slot of `client` and forget everything about it
    pub fn disconnect(&mut self, client: ClientId) {
        if let Some(slot) = self.clients.get_mut(usize::from(client)) {
            if slot.take().is_some() {
                debug!(client, "client disconnected");
            }
        }
    }

    /// Drain `inbox`, handling every queued event. Returns the number of
    /// events handled.
    #[instrument(level = "debug", skip(self, inbox, system, bodies))]
    pub fn poll<const SLOTS: usize, const MTU: usize>(
        &mut self,
        inbox: &Inbox<SLOTS, MTU>,
        system: &mut PropertySystem,
        bodies: &mut dyn ResourceBodyStore,
    ) -> usize {
        let mut handled = 0;
        while let Some(event) = inbox.pop() {
            match event {
                InboxEvent::Connected(client) => {
                    if let Err(err) = self.connect(client) {
                        warn!(client, error = %err, "connect rejected");
                    }
                }
                InboxEvent::Disconnected(client) => self.disconnect(client),
                InboxEvent::Frame { client, data } => {
                    self.handle_frame(client, &data, system, bodies);
                }
            }
            handled += 1;
        }
        handled
    }

    /// Handle one inbound frame from `client`. Returns `false` when the
    /// frame was rejected before reaching a handler.
    #[instrument(level = "debug", skip(self, frame, system, bodies), fields(len = frame.len()))]
    pub fn handle_frame(
        &mut self,
        client: ClientId,
        frame: &[u8],
        system: &mut PropertySystem,
        bodies: &mut dyn ResourceBodyStore,
    ) -> bool {
        if !self.is_connected(client) {
            warn!(client, "frame from unknown client dropped");
            return false;
        }
        let started = Instant::now();
        self.metrics
            .record_frame(Direction::Received, frame_opcode(frame), frame.len());
        let router = self.router;
        let mut session = Session {
            server: self,
            system,
            bodies,
            client,
        };
        let accepted = router.dispatch(frame, &mut session);
        self.metrics.record_handle_time(started.elapsed());
        accepted
    }

    /// Broadcast changed values to ready clients, at most once per
    /// broadcast interval. Returns the number of frames sent.
    ///
    /// Call after [`PropertySystem::flush_tick`]. Changes that arrive while
    /// rate limited stay in this server's mailbox for the next tick.
    #[instrument(level = "debug", skip(self, system))]
    pub fn tick(&mut self, system: &mut PropertySystem, now: Instant) -> usize {
        if self
            .last_flush
            .is_some_and(|at| now.saturating_duration_since(at) < self.config.broadcast_interval)
        {
            return 0;
        }
        let pending = system.take_pending(self.subscriber);
        if pending.is_empty() {
            return 0;
        }
        self.last_flush = Some(now);
        let system = &*system;

        let ready: Vec<ClientId> = self.ready_clients().collect();
        if ready.is_empty() {
            trace!(count = pending.len(), "no ready clients, changes dropped");
            return 0;
        }
        let mtu = ready
            .iter()
            .map(|client| self.mtu(*client))
            .min()
            .unwrap_or(self.config.tx_buffer_size);

        // Encode each changed value once, in id order.
        let mut values: Vec<(u16, Vec<u8>, u64)> = Vec::with_capacity(pending.len());
        for id in pending.iter().map(u16::from) {
            match encode_to_vec(|out| encode_current(system, id, out)) {
                Ok(bytes) => {
                    let fingerprint = xxh3_64(&bytes);
                    values.push((id, bytes, fingerprint));
                }
                Err(err) => warn!(property = id, error = %err, "failed to encode changed value"),
            }
        }

        // Clients needing the same ids share frames.
        let mut groups: Vec<(Vec<u16>, Vec<ClientId>)> = Vec::new();
        for client in ready {
            let Some(slot) = self.slot(client) else {
                continue;
            };
            let needed: Vec<u16> = values
                .iter()
                .filter(|(id, _, fingerprint)| slot.known.get(id) != Some(fingerprint))
                .map(|(id, _, _)| *id)
                .collect();
            if needed.is_empty() {
                continue;
            }
            match groups.iter_mut().find(|(ids, _)| *ids == needed) {
                Some((_, clients)) => clients.push(client),
                None => groups.push((needed, vec![client])),
            }
        }

        let mut sent = 0;
        for (ids, clients) in groups {
            let (frames, oversized) = self.pack(ids.iter().copied(), mtu, |id, out| {
                let value = values
                    .binary_search_by_key(&id, |(id, _, _)| *id)
                    .map(|index| values[index].1.as_slice())
                    .unwrap_or_default();
                out.write_bytes(value)
            });
            for client in clients {
                let mut delivered = true;
                for frame in &frames {
                    if self.send(client, frame.clone()) {
                        sent += 1;
                    } else {
                        delivered = false;
                    }
                }
                if !delivered {
                    continue;
                }
                if let Some(slot) = self.slot_mut(client) {
                    for (id, _, fingerprint) in values
                        .iter()
                        .filter(|(id, _, _)| ids.contains(id) && !oversized.contains(id))
                    {
                        slot.known.insert(*id, *fingerprint);
                    }
                }
            }
        }
        if sent > 0 {
            self.metrics.record_broadcast();
            debug!(frames = sent, properties = values.len(), "broadcast");
        }
        sent
    }

    fn mtu(&self, client: ClientId) -> usize {
        let mut mtu = self.transport.mtu(client).min(self.config.tx_buffer_size);
        if let Some(max_packet) = self.slot(client).and_then(|slot| slot.max_packet) {
            mtu = mtu.min(max_packet);
        }
        mtu
    }

    fn send(&mut self, client: ClientId, frame: Bytes) -> bool {
        let len = frame.len();
        let opcode = frame_opcode(&frame);
        match self.transport.send(client, frame) {
            Ok(()) => {
                self.metrics.record_frame(Direction::Sent, opcode, len);
                true
            }
            Err(err) => {
                self.metrics.record_dropped();
                warn!(client, error = %err, "frame dropped");
                false
            }
        }
    }

    fn send_message(&mut self, client: ClientId, message: &Message<'_>) -> bool {
        match message.to_bytes(self.mtu(client)) {
            Ok(frame) => self.send(client, frame),
            Err(err) => {
                self.metrics.record_dropped();
                warn!(client, opcode = %message.opcode(), error = %err, "message not sent");
                false
            }
        }
    }

    fn send_error(&mut self, client: ClientId, message: ErrorMessage<'_>) {
        debug!(client, code = %message.code, message = %message.message, "sending error");
        self.metrics.record_error_reply();
        self.send_message(client, &Message::Error(message));
    }

    fn reply_error(&mut self, client: ClientId, err: &Error, related: OpCode) {
        self.send_error(client, ErrorMessage::from(err).related(related.as_u8()));
    }

    fn remember(&mut self, client: ClientId, id: u16, fingerprint: u64) {
        if let Some(slot) = self.slot_mut(client) {
            slot.known.insert(id, fingerprint);
        }
    }

    fn uptime_ms(&self) -> u32 {
        u32::try_from(self.started.elapsed().as_millis()).unwrap_or(u32::MAX)
    }

    /// Pack `ids` into batched PROPERTY_UPDATE frames of at most `mtu`
    /// bytes. Returns the frames and the ids too large for any frame.
    fn pack(
        &mut self,
        ids: impl IntoIterator<Item = u16>,
        mtu: usize,
        encode_value: impl FnMut(u16, &mut WriteBuffer<'_>) -> std::result::Result<(), WireError>,
    ) -> (Vec<Bytes>, Vec<u16>) {
        let limit = mtu.min(self.scratch.len());
        let mut frames = Vec::new();
        let packed = pack_updates(ids, None, &mut self.scratch[..limit], encode_value, |frame| {
            frames.push(Bytes::copy_from_slice(frame));
            Ok(())
        });
        match packed {
            Ok(report) => {
                for id in &report.oversized {
                    warn!(property = id, mtu, "property value exceeds MTU, dropping");
                }
                (frames, report.oversized)
            }
            Err(err) => {
                warn!(error = %err, mtu, "failed to pack property values");
                (frames, Vec::new())
            }
        }
    }

    /// HELLO response, schema, then every current value.
    fn sync(&mut self, client: ClientId, hello: HelloRequest, system: &PropertySystem) {
        let session_id = Uuid::new_v4().as_u128() as u32;
        let Some(slot) = self.slot_mut(client) else {
            return;
        };
        slot.ready = false;
        slot.known.clear();
        slot.session_id = session_id;
        slot.max_packet = usize::try_from(hello.max_packet).ok().filter(|max| *max > 0);

        let response = HelloResponse {
            version: PROTOCOL_VERSION,
            max_packet: u32::try_from(self.config.tx_buffer_size).unwrap_or(u32::MAX),
            session_id,
            server_timestamp: self.uptime_ms(),
        };
        if !self.send_message(client, &Message::HelloResponse(response)) {
            return;
        }
        self.send_schema(client, system);
        self.send_values(client, system);

        if let Some(slot) = self.slot_mut(client) {
            slot.ready = true;
        }
        debug!(client, session_id, properties = system.len(), "client synced");
    }

    fn send_schema(&mut self, client: ClientId, system: &PropertySystem) {
        let mtu = self.mtu(client);
        let items: Vec<_> = system
            .iter()
            .filter_map(|(meta, _)| match system.schema_item(u16::from(meta.id)) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(property = meta.id, error = %err, "failed to describe property");
                    None
                }
            })
            .collect();
        if items.is_empty() {
            return;
        }

        let items = if self.config.batch_schema && items.len() <= MAX_BATCH_ITEMS {
            let message = Message::SchemaUpsert(SchemaUpsert::batch(items));
            match message.to_bytes(mtu) {
                Ok(frame) => {
                    self.send(client, frame);
                    return;
                }
                Err(err) => {
                    debug!(client, error = %err, "batched schema does not fit, sending per item");
                }
            }
            let Message::SchemaUpsert(upsert) = message else {
                return;
            };
            upsert.items
        } else {
            items
        };

        for item in items {
            let id = item.id;
            match Message::SchemaUpsert(SchemaUpsert::single(item)).to_bytes(mtu) {
                Ok(frame) => {
                    self.send(client, frame);
                }
                Err(err) => {
                    warn!(client, property = id, error = %err, "schema item exceeds MTU, skipping");
                }
            }
        }
    }

    fn send_values(&mut self, client: ClientId, system: &PropertySystem) {
        let mtu = self.mtu(client);
        let ids: Vec<u16> = system.iter().map(|(meta, _)| u16::from(meta.id)).collect();
        let mut fingerprints = Vec::with_capacity(ids.len());
        let (frames, _) = self.pack(ids, mtu, |id, out| {
            let start = out.position();
            encode_current(system, id, out)?;
            fingerprints.push((id, xxh3_64(&out.written()[start..])));
            Ok(())
        });
        for frame in frames {
            self.send(client, frame);
        }
        if let Some(slot) = self.slot_mut(client) {
            slot.known.extend(fingerprints);
        }
    }
}

fn frame_opcode(frame: &[u8]) -> Option<OpCode> {
    frame
        .first()
        .and_then(|byte| OpHeader::from_byte(*byte).ok())
        .map(|header| header.opcode())
}

fn encode_current(
    system: &PropertySystem,
    id: u16,
    out: &mut WriteBuffer<'_>,
) -> std::result::Result<(), WireError> {
    // ids come from the registry, so a miss writes nothing
    match system.find(id) {
        Some(property) => property.encode_value(out),
        None => Ok(()),
    }
}

/// One inbound frame's view of the server.
struct Session<'s, T: Transport> {
    server: &'s mut Server<T>,
    system: &'s mut PropertySystem,
    bodies: &'s mut dyn ResourceBodyStore,
    client: ClientId,
}

impl<T: Transport> Session<'_, T> {
    fn resource_get(&mut self, request: ResourceRequest) -> Result<ResourceGetResponse<'static>> {
        let collection = self.system.resource(request.property_id)?;
        let id = request.resource_id;
        if collection.header(id).is_none() {
            return Ok(ResourceGetResponse::failed(
                request.request_id,
                ResourceStatus::NotFound,
                ResourceError::NotFound { id }.to_string(),
            ));
        }

        let name = collection.name();
        if !self.bodies.body_exists(name, id) {
            let bodies = &*self.bodies;
            let removed = self
                .system
                .with_resource(request.property_id, |collection| collection.remove_orphans(bodies))?;
            warn!(property = request.property_id, resource = id, removed, "resource body missing");
            return Ok(ResourceGetResponse::failed(
                request.request_id,
                ResourceStatus::NotFound,
                "resource body missing",
            ));
        }

        let mut body = vec![0u8; self.bodies.body_size(name, id).unwrap_or_default()];
        let len = collection.read_body(id, &mut body, &*self.bodies);
        body.truncate(len);
        Ok(ResourceGetResponse::ok(request.request_id, Cow::Owned(body)))
    }

    fn resource_put(&mut self, request: ResourcePutRequest<'_>) -> Result<ResourcePutResponse<'static>> {
        let bodies = &mut *self.bodies;
        let outcome = self.system.with_resource(
            request.property_id,
            |collection| -> std::result::Result<u32, ResourceError> {
                if request.is_create() {
                    return collection.create(
                        request.header.unwrap_or_default(),
                        request.body.unwrap_or_default(),
                        bodies,
                    );
                }
                let id = request.resource_id;
                if collection.header(id).is_none() {
                    return Err(ResourceError::NotFound { id });
                }
                if request
                    .header
                    .is_some_and(|header| header.len() != collection.header_size())
                {
                    return Err(ResourceError::InvalidData);
                }
                // Body first: a failed store write leaves the header untouched.
                if let Some(body) = request.body {
                    collection.update_body(id, body, bodies)?;
                }
                if let Some(header) = request.header {
                    collection.update_header(id, header)?;
                }
                Ok(id)
            },
        )?;
        Ok(match outcome {
            Ok(id) => ResourcePutResponse::ok(request.request_id, id),
            Err(err) => ResourcePutResponse {
                request_id: request.request_id,
                result: Err(err.into()),
            },
        })
    }

    fn resource_delete(&mut self, request: ResourceRequest) -> Result<ResourceDeleteResponse<'static>> {
        let bodies = &mut *self.bodies;
        let outcome = self
            .system
            .with_resource(request.property_id, |collection| {
                collection.delete(request.resource_id, bodies)
            })?;
        Ok(match outcome {
            Ok(()) => ResourceDeleteResponse::ok(request.request_id, ()),
            Err(err) => ResourceDeleteResponse {
                request_id: request.request_id,
                result: Err(err.into()),
            },
        })
    }

    fn not_implemented(&mut self, opcode: OpCode) {
        let message = ErrorMessage::new(
            ErrorCode::NotImplemented,
            "schema changes from clients are not supported",
            false,
        )
        .related(opcode.as_u8());
        self.server.send_error(self.client, message);
    }
}

impl<T: Transport> MessageHandler for Session<'_, T> {
    fn schema(&self) -> &dyn SchemaLookup {
        &*self.system
    }

    fn on_hello(&mut self, hello: HelloRequest) {
        if hello.version != PROTOCOL_VERSION {
            warn!(client = self.client, version = hello.version, "protocol version mismatch");
            if let Some(slot) = self.server.slot_mut(self.client) {
                slot.ready = false;
            }
            let message = ErrorMessage::new(
                ErrorCode::ProtocolVersionMismatch,
                format!(
                    "protocol version {} not supported, expected {PROTOCOL_VERSION}",
                    hello.version
                ),
                true,
            )
            .related(OpCode::Hello.as_u8());
            self.server.send_error(self.client, message);
            return;
        }
        self.server.sync(self.client, hello, self.system);
    }

    fn on_property_update(&mut self, update: PropertyUpdate<'_>) {
        for item in &update.items {
            match self.system.set_from_wire(item.id, item.value) {
                Ok(changed) => {
                    trace!(client = self.client, property = item.id, changed, "update applied");
                    let system = &*self.system;
                    match encode_to_vec(|out| encode_current(system, item.id, out)) {
                        Ok(stored) => self.server.remember(self.client, item.id, xxh3_64(&stored)),
                        Err(err) => warn!(property = item.id, error = %err, "failed to encode stored value"),
                    }
                }
                Err(err) => {
                    debug!(client = self.client, property = item.id, error = %err, "update rejected");
                    self.server.reply_error(self.client, &err, OpCode::PropertyUpdate);
                }
            }
        }
        if let Some(id) = update.unresolved {
            self.server
                .reply_error(self.client, &Error::UnknownProperty { id }, OpCode::PropertyUpdate);
        }
    }

    fn on_schema_upsert(&mut self, _upsert: SchemaUpsert<'_>) {
        self.not_implemented(OpCode::SchemaUpsert);
    }

    fn on_schema_delete(&mut self, _delete: SchemaDelete) {
        self.not_implemented(OpCode::SchemaDelete);
    }

    fn on_rpc_request(&mut self, request: RpcRequest<'_>) {
        let handler = self
            .server
            .rpc
            .as_mut()
            .filter(|handler| handler.handles(request.function_id));
        let Some(handler) = handler else {
            let err = Error::UnknownFunction {
                id: request.function_id,
            };
            self.server.reply_error(self.client, &err, OpCode::Rpc);
            return;
        };
        let outcome = handler.call(self.system, request.function_id, request.params);
        let Some(call_id) = request.call_id else {
            if let Err(failure) = outcome {
                debug!(function = request.function_id, code = failure.code, "fire-and-forget RPC failed");
            }
            return;
        };
        let response = RpcResponse {
            call_id,
            result: outcome.map(|value| value.map(Cow::Owned)),
        };
        self.server.send_message(self.client, &Message::RpcResponse(response));
    }

    fn on_ping(&mut self, ping: Ping) {
        self.server.send_message(self.client, &Message::Ping(ping.reply()));
    }

    fn on_error(&mut self, error: ErrorMessage<'_>) {
        warn!(client = self.client, code = %error.code, message = %error.message, "client reported error");
    }

    fn on_resource_get(&mut self, request: ResourceRequest) {
        let response = match self.resource_get(request) {
            Ok(response) => response,
            Err(err) => return self.server.reply_error(self.client, &err, OpCode::ResourceGet),
        };
        let mtu = self.server.mtu(self.client);
        let message = Message::ResourceGetResponse(response);
        match message.to_bytes(mtu) {
            Ok(frame) => {
                self.server.send(self.client, frame);
            }
            Err(err) => {
                warn!(client = self.client, error = %err, "resource body exceeds MTU");
                let failed = ResourceGetResponse::failed(
                    request.request_id,
                    ResourceStatus::Error,
                    err.to_string(),
                );
                self.server
                    .send_message(self.client, &Message::ResourceGetResponse(failed));
            }
        }
    }

    fn on_resource_put(&mut self, request: ResourcePutRequest<'_>) {
        match self.resource_put(request) {
            Ok(response) => {
                self.server
                    .send_message(self.client, &Message::ResourcePutResponse(response));
            }
            Err(err) => self.server.reply_error(self.client, &err, OpCode::ResourcePut),
        }
    }

    fn on_resource_delete(&mut self, request: ResourceRequest) {
        match self.resource_delete(request) {
            Ok(response) => {
                self.server
                    .send_message(self.client, &Message::ResourceDeleteResponse(response));
            }
            Err(err) => self.server.reply_error(self.client, &err, OpCode::ResourceDelete),
        }
    }

    fn on_protocol_error(&mut self, error: &Error, opcode: Option<OpCode>) {
        self.server.metrics.record_decode_error();
        debug!(client = self.client, %error, "frame rejected");
        let message = match error {
            Error::InvalidOpcode { opcode } => {
                ErrorMessage::new(ErrorCode::InvalidOpcode, error.to_string(), false).related(*opcode)
            }
            _ => {
                let message = ErrorMessage::new(ErrorCode::InvalidOpcode, "malformed frame", false);
                match opcode {
                    Some(opcode) => message.related(opcode.as_u8()),
                    None => message,
                }
            }
        };
        self.server.send_error(self.client, message);
    }
}
