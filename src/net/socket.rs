use std::{fmt, io, pin::Pin, task::{Context, Poll}};

use crate::Result;

/// Default unix socket directory used when host is left blank.
const DEFAULT_UNIX_DIR: &str = "/var/run/postgresql";

/// An either `TcpStream` or `UnixStream`, which implement
/// `AsyncRead` and `AsyncWrite` transparently.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Socket {
    /// Connect to postgres following the host rules:
    ///
    /// - blank host selects a unix socket under the default directory
    /// - host starting with `/` selects a unix socket under that directory
    /// - anything else is a tcp host name or address
    pub async fn connect(host: &str, port: u16) -> Result<Socket> {
        if host.is_empty() {
            Self::connect_unix(DEFAULT_UNIX_DIR, port).await
        } else if host.starts_with('/') {
            Self::connect_unix(host, port).await
        } else {
            Self::connect_tcp(host, port).await
        }
    }

    pub async fn connect_tcp(host: &str, port: u16) -> Result<Socket> {
        let mut first = None;
        let mut v4 = None;

        for addr in tokio::net::lookup_host((host, port)).await? {
            if first.is_none() {
                first = Some(addr);
            }
            if addr.is_ipv4() {
                v4 = Some(addr);
                break;
            }
        }

        let Some(addr) = v4.or(first) else {
            return Err(InvalidAddress { host: host.into(), port }.into());
        };

        let socket = tokio::net::TcpStream::connect(addr).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    pub async fn connect_unix(dir: &str, port: u16) -> Result<Socket> {
        #[cfg(unix)]
        {
            let socket = tokio::net::UnixStream::connect(unix_socket_path(dir, port)).await?;
            Ok(Socket { kind: Kind::Unix(socket) })
        }

        #[cfg(not(unix))]
        {
            let _ = (dir, port);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix domain socket is not available on this platform",
            ).into())
        }
    }

    /// Split into an owned read half and write half.
    pub(crate) fn into_split(self) -> (ReadSocket, WriteSocket) {
        match self.kind {
            Kind::Tcp(tcp) => {
                let (r, w) = tcp.into_split();
                (ReadSocket { kind: ReadKind::Tcp(r) }, WriteSocket { kind: WriteKind::Tcp(w) })
            }
            #[cfg(unix)]
            Kind::Unix(unix) => {
                let (r, w) = unix.into_split();
                (ReadSocket { kind: ReadKind::Unix(r) }, WriteSocket { kind: WriteKind::Unix(w) })
            }
        }
    }
}

/// Unix socket path for given directory and port.
fn unix_socket_path(dir: &str, port: u16) -> String {
    let mut b = itoa::Buffer::new();
    format!("{}/.s.PGSQL.{}", dir.trim_end_matches('/'), b.format(port))
}

/// Address resolution yields no usable address.
pub struct InvalidAddress {
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl std::error::Error for InvalidAddress { }

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no usable address resolved for {}:{}", self.host, self.port)
    }
}

impl fmt::Debug for InvalidAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Read half of a [`Socket`].
pub struct ReadSocket {
    kind: ReadKind,
}

enum ReadKind {
    Tcp(tokio::net::tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(tokio::net::unix::OwnedReadHalf),
}

/// Write half of a [`Socket`].
pub struct WriteSocket {
    kind: WriteKind,
}

enum WriteKind {
    Tcp(tokio::net::tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(tokio::net::unix::OwnedWriteHalf),
}

impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_shutdown(cx),
        }
    }
}

impl tokio::io::AsyncRead for ReadSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.kind {
            ReadKind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            ReadKind::Unix(u) => Pin::new(u).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for WriteSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.kind {
            WriteKind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            WriteKind::Unix(u) => Pin::new(u).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            WriteKind::Tcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(unix)]
            WriteKind::Unix(u) => Pin::new(u).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.kind {
            WriteKind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            WriteKind::Unix(u) => Pin::new(u).poll_shutdown(cx),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Kind::Tcp(ref tcp) => fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(ref unix) => fmt::Debug::fmt(unix, f),
        }
    }
}

impl fmt::Debug for ReadSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ReadKind::Tcp(ref tcp) => fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            ReadKind::Unix(ref unix) => fmt::Debug::fmt(unix, f),
        }
    }
}

impl fmt::Debug for WriteSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WriteKind::Tcp(ref tcp) => fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            WriteKind::Unix(ref unix) => fmt::Debug::fmt(unix, f),
        }
    }
}
