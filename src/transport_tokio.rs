//! Concrete `FrameStreamSink`/`FrameStreamSource` implementations built on
//! `tokio::net`, gated behind the `transport_tokio` feature.
//!
//! Transports are an external collaborator per spec §1; this module only
//! supplies enough glue to drive the connection layer end to end (tests,
//! `src/bin/fibre-node.rs`). Grounded in
//! `examples/original_source/cpp/include/fibre/udp_transport.hpp`'s
//! `UDPTXChannel`/`UDPRXChannel` split (one datagram per `tx`/`rx_handler`
//! call) for [`UdpTransport`], and in the teacher crate's
//! `async_std_tcp::Socket` (`examples/sug0-bafomet/src/bft/communication/
//! socket/async_std_tcp/mod.rs`) for [`TcpTransport`]'s connect/accept shape,
//! adapted from `async-std`'s `TcpStream` to `tokio::net::TcpStream`.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::error::{ErrorKind, Result, ResultWrappedExt};
use crate::transport::{FrameStreamSink, FrameStreamSource};

/// Largest UDP payload this transport will send or accept, matching the
/// original's typical Ethernet-MTU-sized datagram budget.
pub const UDP_MTU: usize = 1472;

/// One datagram/frame per `start_write`/`recv` (spec §6: "each `start_write`
/// task maps to exactly one datagram/frame" for non-stream transports).
/// `socket` is connected (`UdpSocket::connect`), so `send`/`recv` address a
/// single fixed peer the way `UDPTXChannel::init`'s `remote_addr` does.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds `local` and connects to `peer`, so every `send`/`recv` on the
    /// returned socket talks only to that one peer.
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).await.wrapped(ErrorKind::Transport)?;
        socket.connect(peer).await.wrapped(ErrorKind::Transport)?;
        Ok(UdpTransport { socket })
    }

    /// Wraps an already-connected socket (e.g. one handed over by a
    /// discovery backend that resolved `peer` itself).
    pub fn from_connected(socket: UdpSocket) -> Self {
        UdpTransport { socket }
    }
}

#[async_trait]
impl FrameStreamSink for UdpTransport {
    async fn start_write(&self, packet: &[u8]) -> Result<()> {
        let n = self
            .socket
            .send(packet)
            .await
            .wrapped(ErrorKind::Transport)?;
        if n != packet.len() {
            return Err(crate::error::Error::simple(ErrorKind::Transport));
        }
        Ok(())
    }

    fn mtu(&self) -> usize {
        UDP_MTU
    }
}

#[async_trait]
impl FrameStreamSource for UdpTransport {
    async fn recv(&self, buf: &mut Vec<u8>) -> Result<bool> {
        buf.resize(UDP_MTU, 0);
        let n = self.socket.recv(buf).await.wrapped(ErrorKind::Transport)?;
        buf.truncate(n);
        Ok(true)
    }
}

/// A TCP byte stream wrapped behind the frame boundary. Unlike
/// [`UdpTransport`], nothing here delimits packets at the transport level;
/// `recv` hands back whatever bytes the kernel had ready, leaving Fibre's
/// own framing (spec §3's layer-0 boundaries) to do the actual delimiting,
/// matching `Fifo`'s long-standing reassembly role for stream transports.
pub struct TcpTransport {
    stream: tokio::sync::Mutex<TcpStream>,
    mtu: usize,
}

/// Conservative default write chunk size for a stream transport with no
/// natural packet boundary.
const TCP_DEFAULT_MTU: usize = 4096;

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport {
            stream: tokio::sync::Mutex::new(stream),
            mtu: TCP_DEFAULT_MTU,
        }
    }

    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .wrapped(ErrorKind::Transport)?;
        Ok(TcpTransport::new(stream))
    }
}

#[async_trait]
impl FrameStreamSink for TcpTransport {
    async fn start_write(&self, packet: &[u8]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        stream
            .write_all(packet)
            .await
            .wrapped(ErrorKind::Transport)
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

#[async_trait]
impl FrameStreamSource for TcpTransport {
    async fn recv(&self, buf: &mut Vec<u8>) -> Result<bool> {
        let mut stream = self.stream.lock().await;
        buf.resize(self.mtu, 0);
        let n = stream.read(buf).await.wrapped(ErrorKind::Transport)?;
        buf.truncate(n);
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn udp_round_trip() {
        let a_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let a_addr = a_sock.local_addr().unwrap();
        let b_addr = b_sock.local_addr().unwrap();
        a_sock.connect(b_addr).await.unwrap();
        b_sock.connect(a_addr).await.unwrap();
        let a = UdpTransport::from_connected(a_sock);
        let b = UdpTransport::from_connected(b_sock);

        a.start_write(b"hello").await.unwrap();
        let mut buf = Vec::new();
        assert!(b.recv(&mut buf).await.unwrap());
        assert_eq!(buf, b"hello");

        b.start_write(b"world").await.unwrap();
        let mut buf = Vec::new();
        assert!(a.recv(&mut buf).await.unwrap());
        assert_eq!(buf, b"world");
    }

    #[tokio::test]
    async fn tcp_connect_fails_with_no_listener() {
        // Port 0 on connect is not a valid destination; this only checks
        // that failures route through `ErrorKind::Transport` rather than
        // panicking.
        let result = TcpTransport::connect("127.0.0.1:1".parse().unwrap()).await;
        assert!(result.is_err());
    }
}
