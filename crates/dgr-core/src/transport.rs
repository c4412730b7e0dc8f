//! Stream transport abstraction.
//!
//! Nodes and the relay only need ordered, reliable byte streams. The
//! [`Transport`] trait hides where those streams come from, so the same link
//! code runs over TCP in production and over Turmoil's simulated network in
//! tests.

use std::io;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

/// Source of outbound connections and listeners.
#[async_trait]
pub trait Transport: Clone + Send + Sync + 'static {
    /// Connected byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Bound listener producing [`Transport::Stream`]s.
    type Listener: Listener<Stream = Self::Stream>;

    /// Open a connection to `addr`.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;

    /// Bind a listener on `addr`.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;
}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Connected byte stream.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection. Returns the stream and the peer address.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// Address actually bound (resolves port 0).
    fn local_addr(&self) -> io::Result<String>;
}

/// TCP transport with Nagle disabled.
///
/// Frames are written once per tick and must not sit in the kernel waiting
/// for more data.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpAcceptor;

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn bind(&self, addr: &str) -> io::Result<TcpAcceptor> {
        let listener = TcpListener::bind(addr).await?;
        Ok(TcpAcceptor { listener })
    }
}

/// Bound TCP listener.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        self.listener.local_addr().map(|a| a.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn tcp_round_trip_on_loopback() {
        let transport = TcpTransport;
        let listener = transport.bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut client = transport.connect(&addr).await.unwrap();
        client.write_all(b"tick").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"tick");
    }
}
