use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket};

use tracing::{trace, warn};

use crate::datagram::DatagramPacker;

use super::{EndpointSettings, Transport, TransportError, TransportKind};

/// Writes batches as UDP datagrams.
///
/// Payloads are split on line boundaries so that no datagram exceeds the configured payload size.
pub(super) struct UdpTransport {
    socket: UdpSocket,
    max_datagram_len: usize,
}

impl UdpTransport {
    pub fn connect(target: &str, settings: &EndpointSettings) -> Result<Self, TransportError> {
        let connect_error = |source| TransportError::Connect { addr: target.to_string(), source };

        let addrs: Vec<SocketAddr> = target.to_socket_addrs().map_err(connect_error)?.collect();
        let Some(first) = addrs.first() else {
            return Err(connect_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "address resolved to no socket addresses",
            )));
        };

        let bind_addr: SocketAddr =
            if first.is_ipv4() { (Ipv4Addr::UNSPECIFIED, 0).into() } else { (Ipv6Addr::UNSPECIFIED, 0).into() };

        let socket = UdpSocket::bind(bind_addr)
            .and_then(|socket| {
                socket.connect(&addrs[..])?;
                socket.set_write_timeout(settings.timeout())?;
                Ok(socket)
            })
            .map_err(connect_error)?;

        Ok(Self { socket, max_datagram_len: settings.udp_payload_size })
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        // Nothing is sent unless the whole payload fits, so that another endpoint can take the batch intact.
        let packer = DatagramPacker::new(payload, self.max_datagram_len);
        if packer.lines_dropped() > 0 {
            warn!(
                lines = packer.lines_dropped(),
                max_datagram_len = self.max_datagram_len,
                "Payload has lines larger than the maximum datagram size, refusing batch."
            );
            return Err(TransportError::PayloadTooLarge {
                lines: packer.lines_dropped(),
                max_datagram_len: self.max_datagram_len,
            });
        }

        trace!(datagrams = packer.len(), "Sending datagrams.");
        for datagram in packer.datagrams() {
            self.socket.send(datagram)?;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
