//! UDP-backed network interface.

use crate::endpoint::Endpoint;
use crate::error::{NetworkError, Result};
use crate::interface::{NetworkInterface, ReceiveBuffer, SendQueue};
use slipwire_shared::MTU;
use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Socket buffer size (4MB for high throughput)
#[cfg(unix)]
const SOCKET_BUFFER_SIZE: i32 = 4 * 1024 * 1024;

/// Nonblocking UDP socket polled once per tick.
pub struct UdpInterface {
    socket: Option<UdpSocket>,
    local: Endpoint,
    recv_scratch: Box<[u8; MTU]>,
}

impl UdpInterface {
    pub fn new() -> Self {
        Self {
            socket: None,
            local: Endpoint::default(),
            recv_scratch: Box::new([0u8; MTU]),
        }
    }

    /// Endpoint for a UDP socket address.
    pub fn create_endpoint(addr: SocketAddr) -> Endpoint {
        Endpoint::from_socket_addr(addr)
    }
}

impl Default for UdpInterface {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn enlarge_socket_buffers(socket: &UdpSocket) {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let buffer_size = SOCKET_BUFFER_SIZE;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &buffer_size as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as u32,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &buffer_size as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as u32,
        );
    }
}

impl NetworkInterface for UdpInterface {
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        let addr = endpoint.to_socket_addr().ok_or(NetworkError::InvalidEndpoint)?;
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        #[cfg(unix)]
        enlarge_socket_buffers(&socket);

        // Re-read the local address so port 0 binds report the real port.
        self.local = Endpoint::from_socket_addr(socket.local_addr()?);
        self.socket = Some(socket);
        Ok(())
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    fn schedule_receive(&mut self, receiver: &mut ReceiveBuffer) {
        let Some(socket) = &self.socket else { return };
        loop {
            match socket.recv_from(&mut self.recv_scratch[..]) {
                Ok((len, addr)) => {
                    let source = Endpoint::from_socket_addr(addr);
                    if !receiver.append_packet(source, &self.recv_scratch[..len]) {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn schedule_send(&mut self, queue: &mut SendQueue) {
        let Some(socket) = &self.socket else { return };
        while let Some(message) = queue.pop() {
            if let Some(addr) = message.dest.to_socket_addr() {
                let _ = socket.send_to(&message.data[..message.length as usize], addr);
            }
        }
    }
}
