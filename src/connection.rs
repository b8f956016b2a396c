//! Postgres connection handle.
mod config;

pub use config::{Config, ParseError};

use bytes::BytesMut;
use lru::LruCache;
use std::{io, num::NonZeroUsize};
use tokio::{sync::mpsc, task::AbortHandle};

use crate::{
    Result,
    net::WriteSocket,
    phase::{self, ServerParams, ServerVersion},
    postgres::{FrontendProtocol, frontend},
    receiver::{
        Mode, NotificationHandler, QueueEvent, Receiver, ServerMessageFilter, default_filter,
        default_notification_handler,
    },
    statement::StatementName,
    stream::PgStream,
};

const DEFAULT_PREPARED_STMT_CACHE: NonZeroUsize = NonZeroUsize::new(24).unwrap();

/// Postgres connection.
///
/// The handle owns the write half of the transport and the receiving end of
/// the outbound queue. A background worker owns the read half and delivers
/// every decoded message, or one terminal error, through the queue.
///
/// Closing the handle interrupts the worker and shuts the transport down.
/// The worker holds no reference back to the handle, dropping the handle
/// never keeps the worker alive.
pub struct Connection {
    // io
    socket: WriteSocket,
    write_buf: BytesMut,

    // receiver
    queue: mpsc::UnboundedReceiver<Result<QueueEvent>>,
    receiver: AbortHandle,

    // captured at startup
    params: ServerParams,

    // feature
    stmts: LruCache<u64, StatementName>,
}

impl Connection {
    /// Perform a startup message via url.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(&Config::parse(url)?).await
    }

    /// Perform a startup message with config from environment variables.
    pub async fn connect_env() -> Result<Self> {
        Self::connect_with(&Config::from_env()).await
    }

    /// Perform a startup message with options.
    ///
    /// The receiver streams data rows as decoded [`QueueEvent::Row`]s and
    /// delivers every other message as-is.
    pub async fn connect_with(config: &Config) -> Result<Self> {
        Self::connect_inner(config, Mode::Rows { columns: None }, default_notification_handler())
            .await
    }

    /// Connect with the receiver in message mode using the [`default_filter`].
    pub async fn connect_common(config: &Config) -> Result<Self> {
        Self::connect_common_with_filter(config, default_filter).await
    }

    /// Connect with the receiver in message mode using a caller filter.
    ///
    /// Accepted messages are enqueued, everything else is dropped.
    /// Notifications reach the notification handler regardless of the
    /// filter verdict.
    pub async fn connect_common_with_filter(
        config: &Config,
        filter: ServerMessageFilter,
    ) -> Result<Self> {
        Self::connect_inner(config, Mode::Messages { filter }, default_notification_handler())
            .await
    }

    /// Connect with the receiver in message mode, a caller filter and a
    /// caller notification handler.
    pub async fn connect_common_with_handler(
        config: &Config,
        filter: ServerMessageFilter,
        on_notification: NotificationHandler,
    ) -> Result<Self> {
        Self::connect_inner(config, Mode::Messages { filter }, on_notification).await
    }

    async fn connect_inner(
        config: &Config,
        mode: Mode,
        on_notification: NotificationHandler,
    ) -> Result<Self> {
        let mut stream = PgStream::connect(config).await?;

        // the transport must not outlive a failed handshake
        let params = match phase::startup(config, &mut stream).await {
            Ok(params) => params,
            Err(err) => {
                let _ = stream.shutdown().await;
                return Err(err);
            }
        };

        let (read, read_buf, socket, write_buf) = stream.into_parts();
        let (tx, queue) = mpsc::unbounded_channel();
        let receiver = Receiver::new(read, read_buf, tx, on_notification, mode).spawn();

        Ok(Self {
            socket,
            write_buf,
            queue,
            receiver,
            params,
            stmts: LruCache::new(DEFAULT_PREPARED_STMT_CACHE),
        })
    }

    /// Gracefully close connection.
    ///
    /// Interrupts the receiver worker, then terminates and shuts down the
    /// transport. The handle is consumed, nothing can be sent afterwards.
    pub async fn close(mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        if !self.receiver.is_finished() {
            self.receiver.abort();
        }
        self.send(frontend::Terminate);
        self.flush().await?;
        self.socket.shutdown().await
    }

    /// Buffer a frontend message, [`flush`][Connection::flush] sends it.
    pub fn send<F: FrontendProtocol>(&mut self, message: F) {
        frontend::write(message, &mut self.write_buf);
    }

    /// Buffer the startup message.
    pub fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    /// Send all buffered messages to the backend.
    pub async fn flush(&mut self) -> io::Result<()> {
        std::future::poll_fn(|cx| {
            crate::io::poll_write_all(&mut self.socket, &mut self.write_buf, cx)
        })
        .await
    }

    /// Send a frontend message and flush.
    pub async fn send_message<F: FrontendProtocol>(&mut self, message: F) -> io::Result<()> {
        self.send(message);
        self.flush().await
    }

    /// Write pre-encoded bytes through the transport verbatim.
    ///
    /// No framing is added, the bytes must already contain it.
    pub async fn send_encoded(&mut self, encoded: &[u8]) -> io::Result<()> {
        self.write_buf.extend_from_slice(encoded);
        self.flush().await
    }

    /// Receive the next element of the outbound queue.
    ///
    /// Returns the receiver's terminal error when the worker died, and
    /// `None` once the queue is fully drained afterwards.
    pub async fn recv(&mut self) -> Option<Result<QueueEvent>> {
        self.queue.recv().await
    }

    /// Server version reported at startup.
    pub fn server_version(&self) -> &ServerVersion {
        self.params.version()
    }

    /// Raw `server_encoding` reported at startup, e.g. `UTF8`.
    pub fn server_encoding(&self) -> &[u8] {
        self.params.encoding()
    }

    /// Whether binary temporal values are 64-bit microsecond counts.
    pub fn integer_datetimes(&self) -> bool {
        self.params.integer_datetimes()
    }

    /// Check for already prepared statement.
    pub fn get_stmt(&mut self, sql: u64) -> Option<StatementName> {
        self.stmts.get(&sql).cloned()
    }

    /// Add new prepared statement.
    ///
    /// An evicted statement is closed server side through the write buffer.
    pub fn add_stmt(&mut self, sql: u64, id: StatementName) {
        if let Some((_, name)) = self.stmts.push(sql, id) {
            self.send(frontend::Close {
                variant: b'S',
                name: name.as_str(),
            });
            self.send(frontend::Sync);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // the worker must not linger on a dead handle
        self.receiver.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("socket", &self.socket)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
