use std::net::{SocketAddr, UdpSocket};

use crate::error::Result;

/// Send-buffer size requested for RTP sockets. A keyframe burst at 2 Mbps
/// fits comfortably; anything beyond is better dropped than queued.
const SEND_BUFFER_BYTES: usize = 65536;

/// UDP transport for outbound RTP/RTCP delivery.
///
/// Binds one ephemeral socket per egress pipeline and sends datagrams to
/// destinations resolved by the pipeline. Deliberately address-only — this
/// layer knows nothing about sessions or packet contents.
pub struct UdpTransport {
    socket: UdpSocket,
    local_port: u16,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket for outbound RTP.
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket2::SockRef::from(&socket).set_send_buffer_size(SEND_BUFFER_BYTES)?;
        let local_port = socket.local_addr()?.port();
        Ok(Self { socket, local_port })
    }

    /// Port the socket was bound to (advertised as `server_port` in the
    /// SETUP Transport response).
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_reports_nonzero_port() {
        let transport = UdpTransport::bind().unwrap();
        assert_ne!(transport.local_port(), 0);
    }

    #[test]
    fn send_to_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let dest = receiver.local_addr().unwrap();

        let transport = UdpTransport::bind().unwrap();
        let sent = transport.send_to(b"rtp", dest).unwrap();
        assert_eq!(sent, 3);

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"rtp");
    }
}
