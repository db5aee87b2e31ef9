//! UDP echo server.
//!
//! Run with: cargo run --example echo_server
//! Then start the client: cargo run --example echo_client

use slipwire::{DriverConfig, NetDriver, NetworkEvent, PipelineId, UdpInterface};
use std::thread;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt().init();

    let mut server = NetDriver::udp(DriverConfig::default());
    let endpoint = NetDriver::<UdpInterface>::create_endpoint("127.0.0.1:7777".parse().unwrap());
    server.bind(&endpoint).expect("bind 127.0.0.1:7777");
    server.listen();
    println!(
        "echo server on {:?}",
        server.local_endpoint().to_socket_addr().unwrap()
    );

    loop {
        server.update();

        while let Some(id) = server.accept() {
            println!("client connected: {:?}", id);
        }

        // Echo every payload back on the connection it came from.
        loop {
            let (id, event, reader) = server.pop_event();
            match event {
                NetworkEvent::Empty => break,
                NetworkEvent::Data => {
                    let mut reader = reader.unwrap();
                    let mut payload = vec![0u8; reader.length()];
                    reader.read_bytes(&mut payload);
                    println!("echoing {} bytes to {:?}", payload.len(), id);

                    if let Ok(mut send) = server.begin_send(PipelineId::NULL, id) {
                        send.write_bytes(&payload);
                        let _ = server.end_send(send);
                    }
                }
                NetworkEvent::Disconnect => {
                    println!("client disconnected: {:?}", id);
                }
                NetworkEvent::Connect => {}
            }
        }

        thread::sleep(Duration::from_millis(16));
    }
}
