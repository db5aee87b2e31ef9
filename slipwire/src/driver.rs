//! The event-driven driver loop.
//!
//! One [`NetDriver`] owns a network interface, a connection table, the event
//! queue and the pipeline registry. The user calls [`NetDriver::update`] once
//! per tick; everything else is non-blocking bookkeeping on top of the state
//! those ticks advance.
//!
//! A tick runs in a fixed order: reset the event queue (warning about
//! anything left unpopped), drain the interface receive, route every
//! datagram through the protocol engine and receive pipelines, service
//! timers and pipeline update requests, then flush the send queue. All
//! inbound processing in a tick completes before any outbound flush.

use crate::config::DriverConfig;
use crate::connection::{
    ConnectionId, ConnectionState, ConnectionTable, DisconnectReason,
};
use crate::counters::DriverCounters;
use crate::endpoint::Endpoint;
use crate::error::{NetworkError, Result};
use crate::events::{EventQueue, NetworkEvent};
use crate::interface::{NetworkInterface, ReceiveBuffer, SendBuffer, SendQueue};
use crate::ipc::IpcInterface;
use crate::pipeline::{PacketBuffer, PipelineId, PipelineRegistry, PipelineStage};
use crate::udp::UdpInterface;
use rand::Rng;
use slipwire_codec::{DataStreamReader, DataStreamWriter, WriterState};
use slipwire_shared::{MessageType, ProtocolHeader, HEADER_SIZE, MTU};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, trace};

/// A stage scheduled to run again in the service phase.
struct PendingStageUpdate {
    connection: usize,
    pipeline: PipelineId,
    stage: usize,
}

/// An outbound message under construction between `begin_send` and
/// `end_send`.
///
/// Owns an MTU-sized temporary buffer with the protocol header and the
/// pipeline's header reservation already set aside at the front; writes land
/// in the remainder. Overflowing the remainder fails the writes (and later
/// the `end_send`) without ever growing past the MTU.
pub struct PendingSend {
    buffer: SendBuffer,
    payload_offset: usize,
    connection: ConnectionId,
    pipeline: PipelineId,
    state: WriterState,
}

impl PendingSend {
    /// Runs `f` over the stream writer for this message's payload region,
    /// keeping the cursor across calls.
    pub fn with_writer<R>(&mut self, f: impl FnOnce(&mut DataStreamWriter<'_>) -> R) -> R {
        let mut writer =
            DataStreamWriter::resume(&mut self.buffer.data[self.payload_offset..], self.state);
        let result = f(&mut writer);
        self.state = writer.save();
        result
    }

    /// Appends raw payload bytes; false (and no mutation) on overflow.
    pub fn write_bytes(&mut self, data: &[u8]) -> bool {
        self.with_writer(|writer| writer.write_bytes(data))
    }

    /// Payload bytes this message can still hold in total.
    pub fn capacity(&self) -> usize {
        MTU - self.payload_offset
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }
}

fn random_token() -> u16 {
    let mut rng = rand::thread_rng();
    loop {
        let token: u16 = rng.gen();
        if token != 0 {
            return token;
        }
    }
}

/// Connection-oriented datagram driver over a [`NetworkInterface`].
///
/// Single-threaded cooperative: every method takes `&mut self`, so nothing
/// can run concurrently with [`update`](Self::update) by construction, and
/// no public call blocks on the network.
pub struct NetDriver<I: NetworkInterface> {
    interface: I,
    config: DriverConfig,
    connections: ConnectionTable,
    events: EventQueue,
    recv: ReceiveBuffer,
    send_queue: SendQueue,
    pipelines: PipelineRegistry,
    pending_accepts: VecDeque<ConnectionId>,
    pending_updates: Vec<PendingStageUpdate>,
    counters: DriverCounters,
    listening: bool,
    bound: bool,
    now_ms: u64,
    clock: Instant,
    work: Box<[u8; MTU]>,
}

impl<I: NetworkInterface> NetDriver<I> {
    pub fn new(interface: I, config: DriverConfig) -> Self {
        let recv = ReceiveBuffer::new(config.receive_buffer_size, config.dynamic_stream_size);
        let events = EventQueue::new(config.max_events_per_connection);
        Self {
            interface,
            config,
            connections: ConnectionTable::new(),
            events,
            recv,
            send_queue: SendQueue::new(),
            pipelines: PipelineRegistry::new(),
            pending_accepts: VecDeque::new(),
            pending_updates: Vec::new(),
            counters: DriverCounters::default(),
            listening: false,
            bound: false,
            now_ms: 0,
            clock: Instant::now(),
            work: Box::new([0u8; MTU]),
        }
    }

    pub fn interface(&self) -> &I {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut I {
        &mut self.interface
    }

    /// Binds the interface to a local endpoint.
    pub fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.interface.bind(endpoint)?;
        self.bound = true;
        Ok(())
    }

    /// Marks this driver as a passive side; only a listening driver accepts
    /// inbound connection requests.
    pub fn listen(&mut self) {
        self.listening = true;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn local_endpoint(&self) -> Endpoint {
        self.interface.local_endpoint()
    }

    /// Registers a pipeline. Both peers must register the same pipelines in
    /// the same order, before any connection exists.
    pub fn create_pipeline(&mut self, stages: Vec<PipelineStage>) -> Result<PipelineId> {
        if !self.connections.is_empty() {
            return Err(NetworkError::PipelinesLocked);
        }
        Ok(self.pipelines.create(stages))
    }

    /// Opens a connection towards a remote endpoint. The first request goes
    /// out on the next tick.
    pub fn connect(&mut self, remote: &Endpoint) -> Result<ConnectionId> {
        if !self.bound {
            return Err(NetworkError::NotBound);
        }
        if remote.is_empty() {
            return Err(NetworkError::InvalidEndpoint);
        }
        let id = self.create_connection(*remote, ConnectionState::Connecting);
        let record = self.connections.get_mut(id).expect("fresh slot");
        record.receive_token = random_token();
        debug!(?remote, ?id, "connecting");
        Ok(id)
    }

    /// Returns the next pending inbound connection, if any, transitioning it
    /// to Connected for this side. Each awaiting record is returned once.
    pub fn accept(&mut self) -> Option<ConnectionId> {
        while let Some(id) = self.pending_accepts.pop_front() {
            let Some(record) = self.connections.get_mut(id) else { continue };
            match record.state {
                ConnectionState::AwaitingResponse | ConnectionState::Connected => {
                    record.state = ConnectionState::Connected;
                    record.accepted = true;
                    return Some(id);
                }
                _ => continue,
            }
        }
        None
    }

    /// Closes a connection: a best-effort Disconnect datagram goes out and a
    /// local Disconnect event (reason `ClosedByLocal`) is queued.
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<()> {
        let record = self.connections.get(id).ok_or(NetworkError::InvalidConnection)?;
        if matches!(record.state, ConnectionState::Disconnected) {
            return Ok(());
        }
        let dest = record.address;
        let token = record.send_token;
        let index = id.index as usize;

        // Best-effort notice; the state machine proceeds regardless.
        self.enqueue_control(MessageType::Disconnect, token, dest, &[]);
        if let Some(record) = self.connections.get_index_mut(index) {
            record.accepted = true;
        }
        self.close_connection(index, DisconnectReason::ClosedByLocal);
        Ok(())
    }

    /// Acquires a send buffer for a connected peer, with the protocol header
    /// and the pipeline's header reservation set aside.
    pub fn begin_send(&mut self, pipeline: PipelineId, id: ConnectionId) -> Result<PendingSend> {
        let record = self.connections.get(id).ok_or(NetworkError::InvalidConnection)?;
        if record.state != ConnectionState::Connected {
            return Err(NetworkError::NotConnected);
        }
        let chain = self
            .pipelines
            .get(pipeline)
            .ok_or(NetworkError::UnknownPipeline(pipeline.0))?;
        let payload_offset = HEADER_SIZE + chain.header_reserve();
        let buffer = self.interface.begin_send_message();
        Ok(PendingSend {
            buffer,
            payload_offset,
            connection: id,
            pipeline,
            state: WriterState::default(),
        })
    }

    /// Runs the send pipeline, fills the Data header and queues the datagram
    /// for the tick's flush. Returns the payload length on success; a failed
    /// writer or a stage error sends nothing.
    pub fn end_send(&mut self, mut send: PendingSend) -> Result<usize> {
        let (failed, payload_len) = send.with_writer(|writer| {
            writer.flush();
            (writer.has_failed_writes(), writer.length())
        });
        if failed {
            self.interface.abort_send_message(send.buffer);
            return Err(NetworkError::PacketOverflow);
        }

        let id = send.connection;
        let index = id.index as usize;
        let Some(record) = self.connections.get(id) else {
            self.interface.abort_send_message(send.buffer);
            return Err(NetworkError::InvalidConnection);
        };
        if record.state != ConnectionState::Connected {
            self.interface.abort_send_message(send.buffer);
            return Err(NetworkError::NotConnected);
        }
        let dest = record.address;
        let token = record.send_token;
        let pipeline_id = send.pipeline;
        let Some(chain) = self.pipelines.get(pipeline_id) else {
            self.interface.abort_send_message(send.buffer);
            return Err(NetworkError::UnknownPipeline(pipeline_id.0));
        };
        let reserve = chain.header_reserve();

        let record = self.connections.get_index_mut(index).expect("checked above");
        let Some(scratch) = record.pipeline_scratch.get_mut(pipeline_id.0 as usize) else {
            self.interface.abort_send_message(send.buffer);
            return Err(NetworkError::UnknownPipeline(pipeline_id.0));
        };

        let end = send.payload_offset + payload_len;
        let mut packet =
            PacketBuffer::new(&mut send.buffer.data[HEADER_SIZE..end], reserve, reserve + payload_len);
        let outcome = chain.run_send(scratch, &mut packet);
        if outcome.error {
            self.interface.abort_send_message(send.buffer);
            return Err(NetworkError::StageError);
        }
        let packet_start = packet.start();
        let packet_len = packet.len();
        for stage in outcome.update_stages.into_iter().chain(outcome.resend_stages) {
            self.pending_updates.push(PendingStageUpdate {
                connection: index,
                pipeline: pipeline_id,
                stage,
            });
        }

        let header = ProtocolHeader::new(MessageType::Data, token, pipeline_id.0);
        let wire_start = packet_start; // HEADER_SIZE bytes directly before the packet
        send.buffer.data[wire_start..wire_start + HEADER_SIZE].copy_from_slice(&header.to_bytes());
        send.buffer.offset = wire_start;
        send.buffer.length = HEADER_SIZE + packet_len;

        self.connections
            .get_index_mut(index)
            .expect("checked above")
            .touch_send(self.now_ms);
        self.counters.datagrams_sent += 1;
        self.counters.bytes_sent += send.buffer.length as u64;
        self.interface.end_send_message(send.buffer, dest, &mut self.send_queue);
        Ok(payload_len)
    }

    /// Releases a send buffer without transmitting anything.
    pub fn abort_send(&mut self, send: PendingSend) {
        self.interface.abort_send_message(send.buffer);
    }

    /// Pops the next event from any connection, round-robin fair. Data and
    /// Disconnect events come with a reader over the payload; the reader
    /// stays valid until the next [`update`](Self::update).
    pub fn pop_event(&mut self) -> (ConnectionId, NetworkEvent, Option<DataStreamReader<'_>>) {
        match self.events.pop_any() {
            Some((index, record)) => {
                let id = self.connections.id_for_index(index);
                let reader = if record.length > 0 {
                    Some(DataStreamReader::new(
                        self.events.arena_slice(record.offset, record.length),
                    ))
                } else {
                    None
                };
                (id, record.kind, reader)
            }
            None => (ConnectionId::default(), NetworkEvent::Empty, None),
        }
    }

    /// Pops the next event queued on one connection.
    pub fn pop_event_for_connection(
        &mut self,
        id: ConnectionId,
    ) -> (NetworkEvent, Option<DataStreamReader<'_>>) {
        if self.connections.get(id).is_none() {
            return (NetworkEvent::Empty, None);
        }
        let index = id.index as usize;
        match self.events.pop_for(index) {
            Some(record) => {
                let reader = if record.length > 0 {
                    Some(DataStreamReader::new(
                        self.events.arena_slice(record.offset, record.length),
                    ))
                } else {
                    None
                };
                (record.kind, reader)
            }
            None => (NetworkEvent::Empty, None),
        }
    }

    /// State of a connection; `Empty` for stale or uncreated handles.
    pub fn connection_state(&self, id: ConnectionId) -> ConnectionState {
        self.connections
            .get(id)
            .map_or(ConnectionState::Empty, |record| record.state)
    }

    /// Why a connection ended; `None` while it is live or once the slot has
    /// recycled.
    pub fn disconnect_reason(&self, id: ConnectionId) -> Option<DisconnectReason> {
        self.connections.get(id).and_then(|record| record.disconnect_reason)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.occupied_count()
    }

    pub fn counters(&self) -> DriverCounters {
        self.counters
    }

    /// Receive error of the last tick; 10040 when the receive buffer could
    /// not fit a datagram.
    pub fn receive_error_code(&self) -> i32 {
        self.recv.receive_error_code()
    }

    /// Runs one tick: receive, dispatch, timers, pipeline service, flush.
    pub fn update(&mut self) {
        if self.config.fixed_frame_time_ms > 0 {
            self.now_ms += self.config.fixed_frame_time_ms;
        } else {
            self.now_ms = self.clock.elapsed().as_millis() as u64;
        }

        self.counters.event_queue_resets += self.events.begin_tick(self.listening);
        self.release_disconnected();

        self.recv.reset();
        self.interface.schedule_receive(&mut self.recv);
        let code = self.recv.receive_error_code();
        if code != 0 {
            error!("Error on receive {}", code);
        }

        for index in 0..self.recv.packet_count() {
            let packet = self.recv.packet(index);
            let len = packet.length.min(MTU);
            self.work[..len].copy_from_slice(&self.recv.packet_payload(index)[..len]);
            self.process_datagram(packet.source, len);
        }

        self.service_timers();
        self.service_pipelines();

        self.interface.schedule_send(&mut self.send_queue);
    }

    fn create_connection(&mut self, address: Endpoint, state: ConnectionState) -> ConnectionId {
        let id = self.connections.create(address, state, self.now_ms);
        let scratch = self.pipelines.create_connection_scratch();
        self.connections.get_mut(id).expect("fresh slot").pipeline_scratch = scratch;
        id
    }

    /// Frees every slot that finished disconnecting. Runs right after the
    /// tick-start event reset, so the Disconnect event was either popped or
    /// discarded (with the reset warning), and the previous tick's flush has
    /// already drained any pending outbound for the slot.
    fn release_disconnected(&mut self) {
        for index in self.connections.occupied_indices() {
            let done = matches!(
                self.connections.get_index(index),
                Some(record) if record.state == ConnectionState::Disconnected
            );
            if done {
                self.connections.release(index);
            }
        }
    }

    /// Moves a slot to Disconnected. Slots the user knows about (connected,
    /// accepted, or locally initiated) get a Disconnect event; an awaiting
    /// record nobody accepted dies silently.
    fn close_connection(&mut self, index: usize, reason: DisconnectReason) {
        let Some(record) = self.connections.get_index_mut(index) else { return };
        if record.state == ConnectionState::Disconnected {
            return;
        }
        let notify = record.accepted || record.state == ConnectionState::Connecting;
        record.state = ConnectionState::Disconnected;
        record.disconnect_reason = Some(reason);
        self.connections.unlink_address(index);
        debug!(connection = index, ?reason, notify, "connection closed");

        if notify {
            if self
                .events
                .push(index, NetworkEvent::Disconnect, &[reason as u8], self.listening)
            {
                self.counters.event_queue_resets += 1;
            }
        } else {
            self.connections.release(index);
        }
    }

    fn enqueue_control(&mut self, msg_type: MessageType, token: u16, dest: Endpoint, payload: &[u8]) {
        let mut buffer = self.interface.begin_send_message();
        let header = ProtocolHeader::new(msg_type, token, 0);
        buffer.data[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        buffer.data[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        buffer.offset = 0;
        buffer.length = HEADER_SIZE + payload.len();
        self.counters.datagrams_sent += 1;
        self.counters.bytes_sent += buffer.length as u64;
        self.interface.end_send_message(buffer, dest, &mut self.send_queue);
    }

    fn send_accept(&mut self, index: usize) {
        let Some(record) = self.connections.get_index(index) else { return };
        let dest = record.address;
        let client_token = record.send_token;
        let payload = record.receive_token.to_le_bytes();
        if let Some(record) = self.connections.get_index_mut(index) {
            record.touch_send(self.now_ms);
        }
        self.enqueue_control(MessageType::ConnectionAccept, client_token, dest, &payload);
    }

    fn process_datagram(&mut self, source: Endpoint, len: usize) {
        self.counters.datagrams_received += 1;
        self.counters.bytes_received += len as u64;
        if len < HEADER_SIZE {
            self.counters.dropped_datagrams += 1;
            return;
        }
        let header = ProtocolHeader::from_bytes(&self.work[..len]).expect("length checked");
        let raw_type = header.msg_type;
        let token = header.session_token;
        let flags = header.flags;
        let Some(msg_type) = header.message_type() else {
            trace!(value = raw_type, "dropping datagram with unknown type");
            self.counters.dropped_datagrams += 1;
            return;
        };
        match msg_type {
            MessageType::ConnectionRequest => self.on_connection_request(source, token),
            MessageType::ConnectionAccept => self.on_connection_accept(source, token, len),
            MessageType::Disconnect => self.on_disconnect_packet(source, token),
            MessageType::Ping => self.on_ping(source, token),
            MessageType::Data => self.on_data(source, token, flags, len),
        }
    }

    fn on_connection_request(&mut self, source: Endpoint, client_token: u16) {
        if !self.listening {
            self.counters.dropped_datagrams += 1;
            return;
        }
        if let Some(index) = self.connections.find_by_address(&source) {
            let Some(record) = self.connections.get_index(index) else { return };
            let duplicate = record.send_token == client_token
                && matches!(
                    record.state,
                    ConnectionState::AwaitingResponse | ConnectionState::Connected
                );
            if duplicate {
                // The accept datagram was lost; repeat it, same slot.
                self.connections
                    .get_index_mut(index)
                    .expect("just seen")
                    .touch_receive(self.now_ms);
                self.send_accept(index);
                return;
            }
            // Same address, different token: the peer restarted.
            debug!(connection = index, "peer restart detected");
            self.close_connection(index, DisconnectReason::ClosedByRemote);
        }

        let id = self.create_connection(source, ConnectionState::AwaitingResponse);
        let index = id.index as usize;
        {
            let record = self.connections.get_index_mut(index).expect("fresh slot");
            record.send_token = client_token;
            record.receive_token = random_token();
            record.touch_receive(self.now_ms);
        }
        self.pending_accepts.push_back(id);
        self.send_accept(index);
        debug!(?source, connection = index, "inbound connection awaiting accept");
    }

    fn on_connection_accept(&mut self, source: Endpoint, token: u16, len: usize) {
        let Some(index) = self.connections.find_by_address(&source) else {
            self.counters.dropped_datagrams += 1;
            return;
        };
        let Some(record) = self.connections.get_index_mut(index) else { return };
        if record.receive_token != token {
            self.counters.dropped_token_mismatch += 1;
            return;
        }
        match record.state {
            ConnectionState::Connecting => {
                if len < HEADER_SIZE + 2 {
                    self.counters.dropped_datagrams += 1;
                    return;
                }
                record.send_token =
                    u16::from_le_bytes([self.work[HEADER_SIZE], self.work[HEADER_SIZE + 1]]);
                record.state = ConnectionState::Connected;
                record.accepted = true;
                record.touch_receive(self.now_ms);
                debug!(connection = index, "connection established");
                if self
                    .events
                    .push(index, NetworkEvent::Connect, &[], self.listening)
                {
                    self.counters.event_queue_resets += 1;
                }
            }
            ConnectionState::Connected => {
                // Duplicate accept; liveness only.
                record.touch_receive(self.now_ms);
            }
            _ => {
                self.counters.dropped_datagrams += 1;
            }
        }
    }

    fn on_disconnect_packet(&mut self, source: Endpoint, token: u16) {
        let Some(index) = self.connections.find_by_address(&source) else {
            self.counters.dropped_datagrams += 1;
            return;
        };
        let Some(record) = self.connections.get_index(index) else { return };
        if record.receive_token != token {
            self.counters.dropped_token_mismatch += 1;
            return;
        }
        self.close_connection(index, DisconnectReason::ClosedByRemote);
    }

    fn on_ping(&mut self, source: Endpoint, token: u16) {
        let Some(index) = self.connections.find_by_address(&source) else {
            self.counters.dropped_datagrams += 1;
            return;
        };
        let Some(record) = self.connections.get_index_mut(index) else { return };
        if record.receive_token != token {
            self.counters.dropped_token_mismatch += 1;
            return;
        }
        record.touch_receive(self.now_ms);
    }

    fn on_data(&mut self, source: Endpoint, token: u16, flags: u8, len: usize) {
        let Some(index) = self.connections.find_by_address(&source) else {
            self.counters.dropped_datagrams += 1;
            return;
        };
        {
            let Some(record) = self.connections.get_index_mut(index) else { return };
            if record.receive_token != token {
                self.counters.dropped_token_mismatch += 1;
                return;
            }
            match record.state {
                ConnectionState::Connected => {}
                // Any valid datagram confirms the handshake for this side.
                ConnectionState::AwaitingResponse => record.state = ConnectionState::Connected,
                _ => {
                    self.counters.dropped_datagrams += 1;
                    return;
                }
            }
            record.touch_receive(self.now_ms);
        }

        let pipeline_id = PipelineId(flags);
        let Some(chain) = self.pipelines.get(pipeline_id) else {
            self.counters.dropped_datagrams += 1;
            return;
        };
        let record = self.connections.get_index_mut(index).expect("just seen");
        let Some(scratch) = record.pipeline_scratch.get_mut(pipeline_id.0 as usize) else {
            self.counters.dropped_datagrams += 1;
            return;
        };

        let mut packet = PacketBuffer::new(&mut self.work[HEADER_SIZE..len], 0, len - HEADER_SIZE);
        let outcome = chain.run_receive(scratch, &mut packet);
        if outcome.error {
            self.counters.dropped_datagrams += 1;
            return;
        }
        for stage in outcome.update_stages.into_iter().chain(outcome.resend_stages) {
            self.pending_updates.push(PendingStageUpdate {
                connection: index,
                pipeline: pipeline_id,
                stage,
            });
        }

        if self
            .events
            .push(index, NetworkEvent::Data, packet.payload(), self.listening)
        {
            self.counters.event_queue_resets += 1;
        }
    }

    fn service_timers(&mut self) {
        for index in self.connections.occupied_indices() {
            let Some(record) = self.connections.get_index(index) else { continue };
            let state = record.state;
            let address = record.address;
            let receive_token = record.receive_token;
            let send_token = record.send_token;
            let last_receive = record.last_receive_ms;
            let last_send = record.last_send_ms;
            let last_attempt = record.last_attempt_ms;
            let attempts = record.connect_attempts;

            match state {
                ConnectionState::Connecting => {
                    let due = attempts == 0
                        || self.now_ms.saturating_sub(last_attempt) >= self.config.connect_timeout_ms;
                    if !due {
                        continue;
                    }
                    if attempts >= self.config.max_connect_attempts {
                        self.close_connection(index, DisconnectReason::ConnectionTimeout);
                    } else {
                        {
                            let record =
                                self.connections.get_index_mut(index).expect("just seen");
                            record.connect_attempts += 1;
                            record.last_attempt_ms = self.now_ms;
                            record.touch_send(self.now_ms);
                        }
                        trace!(connection = index, attempt = attempts + 1, "connection request");
                        self.enqueue_control(
                            MessageType::ConnectionRequest,
                            receive_token,
                            address,
                            &[],
                        );
                    }
                }
                ConnectionState::AwaitingResponse | ConnectionState::Connected => {
                    if self.now_ms.saturating_sub(last_receive) >= self.config.disconnect_timeout_ms
                    {
                        self.close_connection(index, DisconnectReason::Timeout);
                    } else if state == ConnectionState::Connected
                        && self.now_ms.saturating_sub(last_send)
                            >= self.config.heartbeat_timeout_ms
                    {
                        self.connections
                            .get_index_mut(index)
                            .expect("just seen")
                            .touch_send(self.now_ms);
                        self.enqueue_control(MessageType::Ping, send_token, address, &[]);
                    }
                }
                _ => {}
            }
        }
    }

    /// Re-runs stages that asked for an update or staged a resend, emitting
    /// whatever they produce without new input.
    fn service_pipelines(&mut self) {
        if self.pending_updates.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.pending_updates);
        for entry in entries {
            self.run_stage_service(entry);
        }
    }

    fn run_stage_service(&mut self, entry: PendingStageUpdate) {
        let index = entry.connection;
        let Some(record) = self.connections.get_index(index) else { return };
        if record.state != ConnectionState::Connected {
            return;
        }
        let dest = record.address;
        let token = record.send_token;
        let Some(chain) = self.pipelines.get(entry.pipeline) else { return };
        let reserve = chain.header_reserve();

        let mut buffer = self.interface.begin_send_message();
        let record = self.connections.get_index_mut(index).expect("just seen");
        let Some(scratch) = record.pipeline_scratch.get_mut(entry.pipeline.0 as usize) else {
            self.interface.abort_send_message(buffer);
            return;
        };

        let mut packet = PacketBuffer::new(&mut buffer.data[HEADER_SIZE..], reserve, reserve);
        let outcome = chain.run_send_from(entry.stage, scratch, &mut packet);
        let packet_start = packet.start();
        let packet_len = packet.len();
        for stage in outcome.update_stages.into_iter().chain(outcome.resend_stages) {
            self.pending_updates.push(PendingStageUpdate {
                connection: index,
                pipeline: entry.pipeline,
                stage,
            });
        }
        if outcome.error || packet_len == 0 {
            self.interface.abort_send_message(buffer);
            return;
        }

        let header = ProtocolHeader::new(MessageType::Data, token, entry.pipeline.0);
        buffer.data[packet_start..packet_start + HEADER_SIZE].copy_from_slice(&header.to_bytes());
        buffer.offset = packet_start;
        buffer.length = HEADER_SIZE + packet_len;
        self.connections
            .get_index_mut(index)
            .expect("just seen")
            .touch_send(self.now_ms);
        self.counters.datagrams_sent += 1;
        self.counters.bytes_sent += buffer.length as u64;
        self.interface.end_send_message(buffer, dest, &mut self.send_queue);
    }
}

impl NetDriver<IpcInterface> {
    /// Driver over the in-process exchange.
    pub fn ipc(config: DriverConfig) -> Self {
        Self::new(IpcInterface::new(), config)
    }

    /// Endpoint for an exchange port (0 = fresh anonymous channel).
    pub fn create_endpoint(&self, port: u16) -> Endpoint {
        self.interface.create_endpoint(port)
    }
}

impl NetDriver<UdpInterface> {
    /// Driver over a nonblocking UDP socket.
    pub fn udp(config: DriverConfig) -> Self {
        Self::new(UdpInterface::new(), config)
    }

    /// Endpoint for a UDP socket address.
    pub fn create_endpoint(addr: SocketAddr) -> Endpoint {
        UdpInterface::create_endpoint(addr)
    }
}
