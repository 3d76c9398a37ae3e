//! TCP and UDP byte transports for sessions.
//!
//! A session needs exactly three things from its transport: read some bytes,
//! write a whole buffer, and report its endpoints. Both calls take `&self` so
//! the receive and send loops can drive one transport concurrently.

use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::trace;

/// Largest UDP payload; a datagram read needs this much room to arrive whole
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Duplex byte transport driven by a session.
#[async_trait]
pub trait ByteTransport: Send + Sync + 'static {
    /// Read at least one byte into `buf`. `Ok(0)` means the peer closed.
    async fn read_some(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Smallest `buf` a read may be given without losing data
    fn min_read_size(&self) -> usize {
        1
    }

    /// Write all of `buf`
    async fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Local address
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Remote address
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl ByteTransport for TcpStream {
    async fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            self.readable().await?;
            match self.try_read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn write_all(&self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            self.writable().await?;
            match self.try_write(buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Connected UDP socket. Each write is one datagram; each read takes one.
///
/// UDP has no end of stream, so empty datagrams are skipped rather than
/// reported as `Ok(0)`.
#[async_trait]
impl ByteTransport for UdpSocket {
    async fn read_some(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.recv(buf).await? {
                0 => trace!("Skipping empty datagram"),
                n => return Ok(n),
            }
        }
    }

    fn min_read_size(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }

    async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let sent = self.send(buf).await?;
        if sent != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("datagram truncated: {} of {} bytes sent", sent, buf.len()),
            ));
        }
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::peer_addr(self)
    }
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Connect a UDP socket to `remote` from an ephemeral local port
pub async fn connect_udp(remote: SocketAddr) -> io::Result<UdpSocket> {
    let local = if remote.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    connect_udp_from(local, remote).await
}

/// Connect a UDP socket bound to `local` to `remote`
pub async fn connect_udp_from(local: SocketAddr, remote: SocketAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn localhost() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let listener = listen_tcp(localhost()).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(connect_tcp(bound_addr), listener.accept());
        let client = client.unwrap();
        let (server, _) = accepted.unwrap();

        assert_eq!(ByteTransport::peer_addr(&client).unwrap(), bound_addr);
        assert_eq!(client.min_read_size(), 1);

        ByteTransport::write_all(&client, b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let mut got = 0;
        while got < 5 {
            let n = server.read_some(&mut buf[got..]).await.unwrap();
            assert!(n > 0);
            got += n;
        }
        assert_eq!(&buf[..5], b"hello");
    }

    #[tokio::test]
    async fn test_tcp_read_zero_on_close() {
        let listener = listen_tcp(localhost()).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(connect_tcp(bound_addr), listener.accept());
        let (server, _) = accepted.unwrap();
        drop(client);

        let mut buf = [0u8; 8];
        assert_eq!(server.read_some(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_udp_datagrams() {
        let a = UdpSocket::bind(localhost()).await.unwrap();
        let b = connect_udp_from(localhost(), a.local_addr().unwrap())
            .await
            .unwrap();
        a.connect(UdpSocket::local_addr(&b).unwrap()).await.unwrap();

        ByteTransport::write_all(&b, b"3abc").await.unwrap();
        let mut buf = [0u8; 32];
        let n = a.read_some(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"3abc");
        assert_eq!(a.min_read_size(), MAX_DATAGRAM_SIZE);
    }

    #[tokio::test]
    async fn test_udp_skips_empty_datagrams() {
        let a = UdpSocket::bind(localhost()).await.unwrap();
        let b = connect_udp_from(localhost(), a.local_addr().unwrap())
            .await
            .unwrap();
        a.connect(UdpSocket::local_addr(&b).unwrap()).await.unwrap();

        a.send(b"").await.unwrap();
        a.send(b"2ok").await.unwrap();

        let mut buf = [0u8; 32];
        let n = b.read_some(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"2ok");
    }
}
