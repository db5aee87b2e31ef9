//! UDP echo client.
//!
//! Run the server first: cargo run --example echo_server

use slipwire::{DriverConfig, NetDriver, NetworkEvent, PipelineId, UdpInterface};
use std::thread;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt().init();

    let mut client = NetDriver::udp(DriverConfig::default());
    let local = NetDriver::<UdpInterface>::create_endpoint("127.0.0.1:0".parse().unwrap());
    client.bind(&local).expect("bind local socket");

    let server = NetDriver::<UdpInterface>::create_endpoint("127.0.0.1:7777".parse().unwrap());
    let connection = client.connect(&server).expect("connect");

    let mut sent = 0u32;
    let mut connected = false;
    loop {
        client.update();

        loop {
            let (_, event, reader) = client.pop_event();
            match event {
                NetworkEvent::Empty => break,
                NetworkEvent::Connect => {
                    println!("connected to echo server");
                    connected = true;
                }
                NetworkEvent::Data => {
                    let mut reader = reader.unwrap();
                    let mut payload = vec![0u8; reader.length()];
                    reader.read_bytes(&mut payload);
                    println!("echo: {}", String::from_utf8_lossy(&payload));
                }
                NetworkEvent::Disconnect => {
                    println!("disconnected");
                    return;
                }
            }
        }

        if connected && sent < 10 {
            let message = format!("message {sent}");
            if let Ok(mut send) = client.begin_send(PipelineId::NULL, connection) {
                send.write_bytes(message.as_bytes());
                let _ = client.end_send(send);
                sent += 1;
            }
        }

        if sent == 10 {
            // Give the last echo a moment, then close.
            thread::sleep(Duration::from_millis(100));
            client.update();
            loop {
                let (_, event, reader) = client.pop_event();
                match event {
                    NetworkEvent::Empty => break,
                    NetworkEvent::Data => {
                        let mut reader = reader.unwrap();
                        let mut payload = vec![0u8; reader.length()];
                        reader.read_bytes(&mut payload);
                        println!("echo: {}", String::from_utf8_lossy(&payload));
                    }
                    _ => {}
                }
            }
            client.disconnect(connection).expect("disconnect");
            client.update();
            println!("done");
            return;
        }

        thread::sleep(Duration::from_millis(16));
    }
}
