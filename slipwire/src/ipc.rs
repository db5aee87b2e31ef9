//! In-process network interface over the process-global exchange.

use crate::endpoint::Endpoint;
use crate::error::{NetworkError, Result};
use crate::interface::{NetworkInterface, ReceiveBuffer, SendQueue};
use slipwire_ipc::IpcExchange;

/// Datagram interface backed by [`slipwire_ipc`].
///
/// Endpoints encode exchange channel ids; `create_endpoint` resolves a
/// 16-bit port through the exchange's port map, so two drivers naming the
/// same port reach the same channel regardless of creation order.
pub struct IpcInterface {
    exchange: IpcExchange,
    channel: Option<u32>,
    local: Endpoint,
}

impl IpcInterface {
    pub fn new() -> Self {
        Self {
            exchange: IpcExchange::acquire(),
            channel: None,
            local: Endpoint::default(),
        }
    }

    /// Endpoint for an exchange port. Port 0 yields a fresh anonymous channel.
    pub fn create_endpoint(&self, port: u16) -> Endpoint {
        Endpoint::ipc(self.exchange.channel_for_port(port))
    }
}

impl Default for IpcInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkInterface for IpcInterface {
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        let channel = endpoint.ipc_channel().ok_or(NetworkError::InvalidEndpoint)?;
        self.channel = Some(channel);
        self.local = *endpoint;
        Ok(())
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    fn schedule_receive(&mut self, receiver: &mut ReceiveBuffer) {
        let Some(channel) = self.channel else { return };
        while let Some(datagram) = self.exchange.receive(channel) {
            let source = Endpoint::ipc(datagram.from);
            if !receiver.append_packet(source, datagram.payload()) {
                break;
            }
        }
    }

    fn schedule_send(&mut self, queue: &mut SendQueue) {
        let Some(from) = self.channel else { return };
        while let Some(message) = queue.pop() {
            if let Some(to) = message.dest.ipc_channel() {
                let _ = self
                    .exchange
                    .send(to, from, &message.data[..message.length as usize]);
            }
        }
    }
}
