//! Buffered connection to postgres.
use bytes::BytesMut;
use std::{
    io,
    task::{Context, Poll, ready},
};

use crate::{
    Result,
    connection::Config,
    net::{ReadSocket, Socket, WriteSocket},
    postgres::{
        BackendProtocol, FrontendProtocol,
        backend::{ErrorResponse, NoticeResponse},
        frame, frontend,
    },
    transport::PgTransport,
};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered stream to postgres, the whole socket in one place.
///
/// This is the shape the connection has during the startup phase. Once the
/// handshake completes it is split into halves, the read side feeding the
/// background receiver and the write side staying with the handle.
#[derive(Debug)]
pub struct PgStream {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl PgStream {
    pub async fn connect(config: &Config) -> Result<Self> {
        let socket = Socket::connect(&config.host, config.port).await?;

        Ok(Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        })
    }

    /// Shutdown the socket, for teardown on a failed handshake.
    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.socket.shutdown().await
    }

    /// Split into the receiver side and the sender side.
    pub(crate) fn into_parts(self) -> (ReadSocket, BytesMut, WriteSocket, BytesMut) {
        let (read, write) = self.socket.into_split();
        (read, self.read_buf, write, self.write_buf)
    }
}

impl PgTransport for PgStream {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        crate::io::poll_write_all(&mut self.socket, &mut self.write_buf, cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        loop {
            let Some(raw) = frame::take_frame(&mut self.read_buf)? else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
                let read = ready!(crate::io::poll_read(&mut self.socket, &mut self.read_buf, cx)?);
                if read == 0 {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "postgres closed the stream mid frame",
                    ).into()));
                }
                continue;
            };

            match raw.msgtype {
                ErrorResponse::MSGTYPE => {
                    let err = ErrorResponse::decode(raw.msgtype, raw.body)?;
                    return Poll::Ready(Err(err.into()));
                }
                NoticeResponse::MSGTYPE => {
                    let notice = NoticeResponse::decode(raw.msgtype, raw.body)?;
                    tracing::warn!("{notice}");
                }
                _ => return Poll::Ready(Ok(B::decode(raw.msgtype, raw.body)?)),
            }
        }
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        crate::common::verbose!("(F) {:?}", F::MSGTYPE as char);
        frontend::write(message, &mut self.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        crate::common::verbose!("(F) {startup:?}");
        startup.write(&mut self.write_buf);
    }
}
