//! Turmoil-backed transport.

use std::io;

use async_trait::async_trait;
use dgr_core::{Listener, Transport};
use turmoil::net::{TcpListener, TcpStream};

/// [`Transport`] over Turmoil's simulated TCP.
///
/// Addresses use simulation host names, e.g. `"relay:5700"`. Listeners bind
/// on the calling host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;
    type Listener = SimListener;

    async fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        TcpStream::connect(addr).await
    }

    async fn bind(&self, addr: &str) -> io::Result<SimListener> {
        Ok(SimListener { listener: TcpListener::bind(addr).await? })
    }
}

/// Bound simulated listener.
pub struct SimListener {
    listener: TcpListener,
}

impl std::fmt::Debug for SimListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimListener").field("addr", &self.listener.local_addr().ok()).finish()
    }
}

#[async_trait]
impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((stream, addr.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        self.listener.local_addr().map(|a| a.to_string())
    }
}
