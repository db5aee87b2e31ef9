//! End-to-end driver scenarios over the in-process exchange (deterministic
//! via the fixed virtual clock) plus one real-UDP loopback round trip.

use slipwire::{
    ConnectionId, ConnectionState, DisconnectReason, DriverConfig, IpcInterface, NetDriver,
    NetworkError, NetworkEvent, PacketBuffer, PipelineId, PipelineRequests, PipelineStage,
    StageCapacities, StageIo, MAX_PAYLOAD_SIZE, RECEIVE_BUFFER_TOO_SMALL,
};

fn fixed_config() -> DriverConfig {
    DriverConfig {
        fixed_frame_time_ms: 16,
        ..Default::default()
    }
}

fn ipc_server(port: u16, config: DriverConfig) -> NetDriver<IpcInterface> {
    let mut server = NetDriver::ipc(config);
    let endpoint = server.create_endpoint(port);
    server.bind(&endpoint).unwrap();
    server.listen();
    server
}

fn ipc_client(config: DriverConfig) -> NetDriver<IpcInterface> {
    let mut client = NetDriver::ipc(config);
    let endpoint = client.create_endpoint(0);
    client.bind(&endpoint).unwrap();
    client
}

/// Brings up a connected server/client pair on `port`.
fn connected_pair(
    port: u16,
    config: DriverConfig,
) -> (
    NetDriver<IpcInterface>,
    NetDriver<IpcInterface>,
    ConnectionId,
    ConnectionId,
) {
    let mut server = ipc_server(port, config.clone());
    let mut client = ipc_client(config);
    let remote = client.create_endpoint(port);
    let connection = client.connect(&remote).unwrap();

    client.update();
    server.update();
    let accepted = server.accept().expect("pending accept");
    client.update();

    let (id, event, _) = client.pop_event();
    assert_eq!(event, NetworkEvent::Connect);
    assert_eq!(id, connection);

    (server, client, accepted, connection)
}

fn read_payload(reader: &mut slipwire::DataStreamReader<'_>) -> Vec<u8> {
    let mut bytes = vec![0u8; reader.length()];
    assert!(reader.read_bytes(&mut bytes));
    bytes
}

#[test]
fn s1_happy_connect_disconnect() {
    let (mut server, mut client, accepted, connection) = connected_pair(50_001, fixed_config());

    // Nothing queued on the accepting side after accept().
    let (_, event, _) = server.pop_event();
    assert_eq!(event, NetworkEvent::Empty);
    assert_eq!(server.connection_state(accepted), ConnectionState::Connected);
    assert_eq!(client.connection_state(connection), ConnectionState::Connected);

    client.disconnect(connection).unwrap();
    assert_eq!(
        client.disconnect_reason(connection),
        Some(DisconnectReason::ClosedByLocal)
    );
    let (id, event, mut reader) = client.pop_event();
    assert_eq!(event, NetworkEvent::Disconnect);
    assert_eq!(id, connection);
    assert_eq!(
        reader.as_mut().unwrap().read_u8(),
        DisconnectReason::ClosedByLocal as u8
    );

    client.update();
    server.update();
    let (event, mut reader) = server.pop_event_for_connection(accepted);
    assert_eq!(event, NetworkEvent::Disconnect);
    assert_eq!(
        reader.as_mut().unwrap().read_u8(),
        DisconnectReason::ClosedByRemote as u8
    );
}

#[test]
fn s2_ping_pong_payload_roundtrip() {
    let (mut server, mut client, accepted, connection) = connected_pair(50_002, fixed_config());

    let mut send = client.begin_send(PipelineId::NULL, connection).unwrap();
    assert!(send.write_bytes(b"fromserver"));
    assert_eq!(client.end_send(send).unwrap(), 10);
    client.update();
    server.update();

    let (event, reader) = server.pop_event_for_connection(accepted);
    assert_eq!(event, NetworkEvent::Data);
    let mut reader = reader.unwrap();
    assert_eq!(reader.length(), 10);
    assert_eq!(read_payload(&mut reader), b"fromserver");

    let mut send = server.begin_send(PipelineId::NULL, accepted).unwrap();
    assert!(send.write_bytes(b"client"));
    assert_eq!(server.end_send(send).unwrap(), 6);
    server.update();
    client.update();

    let (id, event, reader) = client.pop_event();
    assert_eq!(event, NetworkEvent::Data);
    assert_eq!(id, connection);
    assert_eq!(read_payload(&mut reader.unwrap()), b"client");
}

#[test]
fn s3_receive_buffer_overflow_reports_10040() {
    let server_config = DriverConfig {
        receive_buffer_size: 8,
        ..fixed_config()
    };
    let mut server = ipc_server(50_003, server_config);
    let mut client = ipc_client(fixed_config());
    let remote = client.create_endpoint(50_003);
    let connection = client.connect(&remote).unwrap();

    // Handshake datagrams fit the 8-byte stream.
    client.update();
    server.update();
    let accepted = server.accept().unwrap();
    client.update();
    let (_, event, _) = client.pop_event();
    assert_eq!(event, NetworkEvent::Connect);
    assert_eq!(server.receive_error_code(), 0);

    let mut send = client.begin_send(PipelineId::NULL, connection).unwrap();
    assert!(send.write_bytes(b"0123456789"));
    client.end_send(send).unwrap();
    client.update();
    server.update();

    assert_eq!(server.receive_error_code(), RECEIVE_BUFFER_TOO_SMALL);
    let (event, _) = server.pop_event_for_connection(accepted);
    assert_eq!(event, NetworkEvent::Empty);
}

#[test]
fn s4_mtu_edge_exact_fit_and_one_over() {
    let (mut server, mut client, accepted, connection) = connected_pair(50_004, fixed_config());

    let payload = vec![0xabu8; MAX_PAYLOAD_SIZE];
    let mut send = client.begin_send(PipelineId::NULL, connection).unwrap();
    assert!(send.write_bytes(&payload));
    assert_eq!(client.end_send(send).unwrap(), MAX_PAYLOAD_SIZE);
    client.update();
    server.update();

    let (event, reader) = server.pop_event_for_connection(accepted);
    assert_eq!(event, NetworkEvent::Data);
    let mut reader = reader.unwrap();
    assert_eq!(reader.length(), MAX_PAYLOAD_SIZE);
    assert_eq!(read_payload(&mut reader), payload);

    // One byte past the MTU budget fails the write and sends nothing.
    let sent_before = client.counters().datagrams_sent;
    let mut send = client.begin_send(PipelineId::NULL, connection).unwrap();
    assert!(!send.write_bytes(&vec![0xabu8; MAX_PAYLOAD_SIZE + 1]));
    assert!(matches!(
        client.end_send(send),
        Err(NetworkError::PacketOverflow)
    ));
    assert_eq!(client.counters().datagrams_sent, sent_before);

    client.update();
    server.update();
    let (event, _) = server.pop_event_for_connection(accepted);
    assert_eq!(event, NetworkEvent::Empty);
}

#[test]
fn s5_unpopped_events_reset_on_next_tick() {
    let (mut server, mut client, accepted, connection) = connected_pair(50_005, fixed_config());

    let mut send = client.begin_send(PipelineId::NULL, connection).unwrap();
    assert!(send.write_bytes(b"dropped"));
    client.end_send(send).unwrap();
    client.update();
    server.update();
    // The Data event is queued now, but nobody pops it.
    let resets_before = server.counters().event_queue_resets;

    server.update();
    assert_eq!(server.counters().event_queue_resets, resets_before + 1);
    let (event, _) = server.pop_event_for_connection(accepted);
    assert_eq!(event, NetworkEvent::Empty);
}

#[test]
fn s6_five_client_fan_in() {
    let mut server = ipc_server(50_006, fixed_config());
    let mut clients = Vec::new();
    for _ in 0..5 {
        let mut client = ipc_client(fixed_config());
        let remote = client.create_endpoint(50_006);
        let connection = client.connect(&remote).unwrap();
        client.update();
        clients.push((client, connection));
    }

    server.update();
    let mut accepted = Vec::new();
    while let Some(id) = server.accept() {
        accepted.push(id);
    }
    assert_eq!(accepted.len(), 5);
    let unique: std::collections::HashSet<_> = accepted.iter().copied().collect();
    assert_eq!(unique.len(), 5);

    for (client, connection) in clients.iter_mut() {
        client.update();
        let (id, event, _) = client.pop_event();
        assert_eq!(event, NetworkEvent::Connect);
        assert_eq!(id, *connection);
        let (_, event, _) = client.pop_event();
        assert_eq!(event, NetworkEvent::Empty);
    }

    for id in accepted {
        let (event, _) = server.pop_event_for_connection(id);
        assert_eq!(event, NetworkEvent::Empty);
    }
}

#[test]
fn connect_retries_then_single_disconnect() {
    // Nothing listens on this port; every attempt goes unanswered.
    let config = DriverConfig {
        connect_timeout_ms: 32,
        max_connect_attempts: 3,
        fixed_frame_time_ms: 32,
        ..Default::default()
    };
    let mut client = ipc_client(config);
    let remote = client.create_endpoint(50_007);
    let connection = client.connect(&remote).unwrap();

    let mut connects = 0;
    let mut disconnects = 0;
    let mut reason = 0u8;
    for _ in 0..10 {
        client.update();
        loop {
            let (id, event, mut reader) = client.pop_event();
            match event {
                NetworkEvent::Empty => break,
                NetworkEvent::Connect => connects += 1,
                NetworkEvent::Disconnect => {
                    disconnects += 1;
                    assert_eq!(id, connection);
                    reason = reader.as_mut().unwrap().read_u8();
                }
                NetworkEvent::Data => panic!("no data expected"),
            }
        }
    }

    assert_eq!(connects, 0);
    assert_eq!(disconnects, 1);
    assert_eq!(reason, DisconnectReason::ConnectionTimeout as u8);
}

#[test]
fn idle_peer_times_out_with_single_disconnect() {
    let config = DriverConfig {
        disconnect_timeout_ms: 160,
        heartbeat_timeout_ms: 32,
        ..fixed_config()
    };
    let (mut server, _client, accepted, _connection) = connected_pair(50_008, config);

    // The client stops updating entirely; the server keeps ticking.
    let mut disconnects = 0;
    for _ in 0..30 {
        server.update();
        loop {
            let (id, event, mut reader) = server.pop_event();
            match event {
                NetworkEvent::Empty => break,
                NetworkEvent::Disconnect => {
                    disconnects += 1;
                    assert_eq!(id, accepted);
                    assert_eq!(
                        reader.as_mut().unwrap().read_u8(),
                        DisconnectReason::Timeout as u8
                    );
                }
                _ => {}
            }
        }
    }
    assert_eq!(disconnects, 1);
}

#[test]
fn heartbeats_keep_idle_connection_alive() {
    let config = DriverConfig {
        disconnect_timeout_ms: 160,
        heartbeat_timeout_ms: 32,
        ..fixed_config()
    };
    let (mut server, mut client, accepted, connection) = connected_pair(50_009, config);

    // 40 ticks x 16ms = 640ms of silence, far past the disconnect timeout.
    for _ in 0..40 {
        client.update();
        server.update();
        client.pop_event();
        server.pop_event();
    }

    assert_eq!(server.connection_state(accepted), ConnectionState::Connected);
    assert_eq!(client.connection_state(connection), ConnectionState::Connected);
}

#[test]
fn recycled_slot_gets_new_generation() {
    let (_server, mut client, _accepted, connection) = connected_pair(50_010, fixed_config());
    assert!(connection.is_created());

    client.disconnect(connection).unwrap();
    let (_, event, _) = client.pop_event();
    assert_eq!(event, NetworkEvent::Disconnect);
    client.update();
    assert_eq!(client.connection_state(connection), ConnectionState::Empty);

    let remote = client.create_endpoint(50_010);
    let reconnect = client.connect(&remote).unwrap();
    assert_eq!(reconnect.index, connection.index);
    assert_ne!(reconnect, connection);
    assert_eq!(client.connection_state(reconnect), ConnectionState::Connecting);
    assert_eq!(client.connection_state(connection), ConnectionState::Empty);
}

#[test]
fn peer_restart_closes_old_slot_and_opens_new() {
    let config = fixed_config();
    let mut server = ipc_server(50_011, config.clone());

    let mut client = NetDriver::ipc(config.clone());
    let local = client.create_endpoint(50_012);
    client.bind(&local).unwrap();
    let connection = client.connect(&client.create_endpoint(50_011)).unwrap();
    client.update();
    server.update();
    let first = server.accept().unwrap();
    client.update();
    let (_, event, _) = client.pop_event();
    assert_eq!(event, NetworkEvent::Connect);
    let _ = connection;

    // Same source endpoint, fresh driver: new token, same address.
    drop(client);
    let mut restarted = NetDriver::ipc(config);
    let local = restarted.create_endpoint(50_012);
    restarted.bind(&local).unwrap();
    let reconnection = restarted.connect(&restarted.create_endpoint(50_011)).unwrap();
    restarted.update();
    server.update();

    let (event, _) = server.pop_event_for_connection(first);
    assert_eq!(event, NetworkEvent::Disconnect);
    let second = server.accept().expect("restarted client accepted");
    assert_ne!(second, first);

    restarted.update();
    let (id, event, _) = restarted.pop_event();
    assert_eq!(event, NetworkEvent::Connect);
    assert_eq!(id, reconnection);
}

fn frame_send(io: &mut StageIo<'_>, buffer: &mut PacketBuffer<'_>, _req: &mut PipelineRequests) {
    io.send_scratch[0] = io.send_scratch[0].wrapping_add(1);
    assert!(buffer.prepend(&[0xc3, io.send_scratch[0]]));
}

fn frame_receive(io: &mut StageIo<'_>, buffer: &mut PacketBuffer<'_>, requests: &mut PipelineRequests) {
    if buffer.len() < 2 || buffer.payload()[0] != 0xc3 {
        requests.error = true;
        return;
    }
    io.recv_scratch[0] = buffer.payload()[1];
    assert!(buffer.strip(2));
}

fn frame_init(_io: &mut StageIo<'_>) {}

fn frame_stage() -> PipelineStage {
    PipelineStage {
        send: frame_send,
        receive: frame_receive,
        initialize_connection: frame_init,
        capacities: StageCapacities {
            receive_capacity: 1,
            send_capacity: 1,
            header_capacity: 2,
            shared_capacity: 0,
        },
    }
}

#[test]
fn custom_pipeline_headers_roundtrip() {
    let config = fixed_config();
    let mut server = NetDriver::ipc(config.clone());
    let framed_s = server.create_pipeline(vec![frame_stage()]).unwrap();
    let endpoint = server.create_endpoint(50_013);
    server.bind(&endpoint).unwrap();
    server.listen();

    let mut client = NetDriver::ipc(config);
    let framed_c = client.create_pipeline(vec![frame_stage()]).unwrap();
    assert_eq!(framed_s, framed_c);
    let local = client.create_endpoint(0);
    client.bind(&local).unwrap();
    let connection = client.connect(&client.create_endpoint(50_013)).unwrap();

    client.update();
    server.update();
    let accepted = server.accept().unwrap();
    client.update();
    let (_, event, _) = client.pop_event();
    assert_eq!(event, NetworkEvent::Connect);

    let mut send = client.begin_send(framed_c, connection).unwrap();
    assert!(send.write_bytes(b"pipelined"));
    // The stage header reservation shrinks the payload budget.
    assert_eq!(send.capacity(), MAX_PAYLOAD_SIZE - 2);
    client.end_send(send).unwrap();
    client.update();
    server.update();

    let (event, reader) = server.pop_event_for_connection(accepted);
    assert_eq!(event, NetworkEvent::Data);
    assert_eq!(read_payload(&mut reader.unwrap()), b"pipelined");
}

#[test]
fn pipelines_lock_once_connections_exist() {
    let mut client = ipc_client(fixed_config());
    let remote = client.create_endpoint(50_014);
    client.connect(&remote).unwrap();
    assert!(matches!(
        client.create_pipeline(vec![frame_stage()]),
        Err(NetworkError::PipelinesLocked)
    ));
}

#[test]
fn udp_loopback_roundtrip() {
    let mut server = NetDriver::udp(fixed_config());
    let any = NetDriver::<slipwire::UdpInterface>::create_endpoint("127.0.0.1:0".parse().unwrap());
    server.bind(&any).unwrap();
    server.listen();
    let server_endpoint = server.local_endpoint();

    let mut client = NetDriver::udp(fixed_config());
    client.bind(&any).unwrap();
    let connection = client.connect(&server_endpoint).unwrap();

    let mut accepted = None;
    let mut connected = false;
    for _ in 0..500 {
        client.update();
        server.update();
        if accepted.is_none() {
            accepted = server.accept();
        }
        let (_, event, _) = client.pop_event();
        if event == NetworkEvent::Connect {
            connected = true;
        }
        if connected && accepted.is_some() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    let accepted = accepted.expect("server accepted");
    assert!(connected);

    let mut send = client.begin_send(PipelineId::NULL, connection).unwrap();
    assert!(send.write_bytes(b"over the wire"));
    client.end_send(send).unwrap();

    let mut received = None;
    for _ in 0..500 {
        client.update();
        server.update();
        let (event, reader) = server.pop_event_for_connection(accepted);
        if event == NetworkEvent::Data {
            received = Some(read_payload(&mut reader.unwrap()));
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert_eq!(received.as_deref(), Some(&b"over the wire"[..]));
}
