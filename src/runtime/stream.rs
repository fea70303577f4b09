use std::{
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

use crate::{
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
};

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A stream to a server. TLS, when configured, is layered on by the transport the crate is
/// embedded with; the driver itself only ever sees the plain byte stream.
///
/// The `Null` variant stands in for a stream that has been moved out of a dropped connection;
/// I/O against it fails with `NotConnected`.
#[derive(Debug)]
pub(crate) enum AsyncStream {
    Null,

    /// A basic TCP connection to the server.
    Tcp(TcpStream),
}

impl AsyncStream {
    /// Resolve the address and connect, trying each resolved socket address in turn until one
    /// succeeds.
    pub(crate) async fn connect(
        address: &ServerAddress,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        let timeout = match connect_timeout {
            Some(d) if d.is_zero() => DEFAULT_CONNECT_TIMEOUT,
            Some(d) => d,
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let socket_addrs: Vec<SocketAddr> = resolve_address(address).await?;
        if socket_addrs.is_empty() {
            return Err(ErrorKind::DnsResolve {
                message: format!("address {} did not resolve to any hosts", address),
            }
            .into());
        }

        let mut last_error: Option<Error> = None;
        for socket_addr in socket_addrs {
            match super::timeout(timeout, TcpStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return Ok(Self::Tcp(stream));
                }
                Ok(Err(e)) => last_error = Some(e.into()),
                Err(timed_out) => last_error = Some(timed_out),
            }
        }

        // The loop ran at least once, so an error must have been recorded.
        Err(last_error.unwrap_or_else(|| Error::internal("connect failed without an error")))
    }
}

async fn resolve_address(address: &ServerAddress) -> Result<Vec<SocketAddr>> {
    let host_port = format!("{}:{}", address.host(), address.resolved_port());
    let addrs = tokio::net::lookup_host(host_port).await?;
    Ok(addrs.collect())
}

fn not_connected() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "stream is closed")
}

impl AsyncRead for AsyncStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match *self {
            Self::Null => Poll::Ready(Err(not_connected())),
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match *self {
            Self::Null => Poll::Ready(Err(not_connected())),
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match *self {
            Self::Null => Poll::Ready(Err(not_connected())),
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match *self {
            Self::Null => Poll::Ready(Ok(())),
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
