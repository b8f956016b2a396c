//! Background receiver of backend messages.
//!
//! One worker per connection reads frames off the transport, decodes them
//! and delivers the result to the outbound queue in stream order. Any worker
//! failure is terminal: a single error element is written to the queue and
//! the worker exits, it never restarts itself.
use bytes::BytesMut;
use std::sync::Arc;
use tokio::{sync::mpsc::UnboundedSender, task::AbortHandle};

use crate::{
    Result,
    common::verbose,
    postgres::{
        BackendMessage, BackendProtocol, FetchBytes, ProtocolError, backend,
        backend::NotificationResponse, decode_next,
    },
    row::{ColumnInfo, Row, decode_columns},
};

/// Predicate deciding which backend messages reach the outbound queue.
pub type ServerMessageFilter = fn(&BackendMessage) -> bool;

/// Callback receiving every [`NotificationResponse`], regardless of the
/// filter verdict, before any later message of the connection is visible.
pub type NotificationHandler = Box<dyn FnMut(&NotificationResponse) + Send>;

/// An element delivered through the outbound queue.
#[derive(Debug)]
pub enum QueueEvent {
    /// A backend message accepted for delivery.
    Message(BackendMessage),
    /// A decoded data row, produced by the row streaming mode only.
    Row(Row),
}

/// The built-in filter used by [`connect_common`][1].
///
/// Accepts exactly `ErrorResponse`, `NoData`, `ParameterDescription`,
/// `ReadyForQuery` and `RowDescription`. Startup-only and non-informational
/// frames are suppressed, data-affecting frames are routed elsewhere, and
/// notifications have their own path.
///
/// [1]: crate::Connection::connect_common
pub fn default_filter(message: &BackendMessage) -> bool {
    matches!(
        message,
        BackendMessage::ErrorResponse(_)
            | BackendMessage::NoData(_)
            | BackendMessage::ParameterDescription(_)
            | BackendMessage::ReadyForQuery(_)
            | BackendMessage::RowDescription(_)
    )
}

/// Log every notification nobody subscribed to.
pub(crate) fn default_notification_handler() -> NotificationHandler {
    Box::new(|n| tracing::debug!("notification on {:?}: {:?}", n.channel, n.payload))
}

/// How decoded messages are turned into queue events.
pub(crate) enum Mode {
    /// Stream `DataRow` frames as decoded [`Row`]s, deliver everything
    /// else as-is.
    Rows {
        columns: Option<Arc<[ColumnInfo]>>,
    },
    /// Offer every message to the filter, deliver the accepted ones.
    Messages {
        filter: ServerMessageFilter,
    },
}

pub(crate) struct Receiver<S> {
    source: S,
    read_buf: BytesMut,
    queue: UnboundedSender<Result<QueueEvent>>,
    on_notification: NotificationHandler,
    mode: Mode,
}

impl<S> Receiver<S>
where
    S: FetchBytes + Send + 'static,
{
    pub(crate) fn new(
        source: S,
        read_buf: BytesMut,
        queue: UnboundedSender<Result<QueueEvent>>,
        on_notification: NotificationHandler,
        mode: Mode,
    ) -> Self {
        Self { source, read_buf, queue, on_notification, mode }
    }

    /// Start the worker.
    ///
    /// The returned handle can interrupt the worker but does not keep it
    /// alive, dropping every handle leaves the worker running until its
    /// queue disconnects.
    pub(crate) fn spawn(self) -> AbortHandle {
        tokio::spawn(self.run()).abort_handle()
    }

    async fn run(mut self) {
        loop {
            match self.pump().await {
                // keep going
                Ok(true) => {}
                // every consumer is gone, stop quietly
                Ok(false) => return,
                Err(err) => {
                    // the single terminal element, the queue is not written
                    // to again afterwards
                    let _ = self.queue.send(Err(err));
                    return;
                }
            }
        }
    }

    /// Decode and deliver one message. Returns `false` once the queue has
    /// no consumers left.
    async fn pump(&mut self) -> Result<bool> {
        let frame = decode_next(&mut self.read_buf, &mut self.source).await?;
        verbose!("(B) {}", BackendMessage::message_name(frame.msgtype));
        let message = BackendMessage::decode(frame.msgtype, frame.body)?;

        // the handler observes a notification before any later message of
        // this connection becomes visible to consumers
        if let BackendMessage::NotificationResponse(n) = &message {
            (self.on_notification)(n);
        }

        let event = match &mut self.mode {
            Mode::Messages { filter } => match filter(&message) {
                true => QueueEvent::Message(message),
                false => return Ok(true),
            },
            Mode::Rows { columns } => match message {
                BackendMessage::RowDescription(rd) => {
                    *columns = Some(decode_columns(&rd)?.into());
                    QueueEvent::Message(BackendMessage::RowDescription(rd))
                }
                BackendMessage::DataRow(dr) => {
                    let Some(columns) = columns else {
                        return Err(ProtocolError::unexpected_phase(
                            backend::DataRow::MSGTYPE,
                            "row streaming without a row description",
                        ).into());
                    };
                    QueueEvent::Row(Row::new(columns.clone(), dr)?)
                }
                other => QueueEvent::Message(other),
            },
        };

        Ok(self.queue.send(Ok(event)).is_ok())
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;
    use std::{
        collections::VecDeque,
        io,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tokio::sync::mpsc;

    use super::*;
    use crate::ErrorKind;

    /// Scripted byte source, ends with a clean EOF.
    struct Script(VecDeque<Vec<u8>>);

    impl FetchBytes for Script {
        async fn fetch(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(chunk) => {
                    buf.extend_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }
    }

    fn frame(msgtype: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(msgtype);
        buf.put_i32(4 + body.len() as i32);
        buf.put_slice(body);
        buf
    }

    fn row_description() -> Vec<u8> {
        let mut body = Vec::new();
        body.put_u16(1);
        body.extend_from_slice(b"id\0");
        body.put_u32(0);
        body.put_u16(0);
        body.put_u32(23);
        body.put_i16(4);
        body.put_i32(-1);
        body.put_u16(1);
        frame(b'T', &body)
    }

    fn data_row(value: i32) -> Vec<u8> {
        let mut body = Vec::new();
        body.put_u16(1);
        body.put_i32(4);
        body.put_i32(value);
        frame(b'D', &body)
    }

    fn notification() -> Vec<u8> {
        let mut body = Vec::new();
        body.put_u32(7);
        body.extend_from_slice(b"jobs\0");
        body.extend_from_slice(b"18\0");
        frame(b'A', &body)
    }

    fn spawn_receiver(
        script: Vec<Vec<u8>>,
        mode: Mode,
        on_notification: NotificationHandler,
    ) -> mpsc::UnboundedReceiver<Result<QueueEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        Receiver::new(
            Script(script.into()),
            BytesMut::new(),
            tx,
            on_notification,
            mode,
        ).spawn();
        rx
    }

    #[tokio::test]
    async fn default_filter_selection() {
        let script = vec![
            frame(b'2', b""),        // BindComplete, suppressed
            row_description(),
            data_row(1),
            data_row(2),
            data_row(3),
            frame(b'C', b"SELECT 3\0"),
            frame(b'Z', b"I"),
        ];
        let mut rx = spawn_receiver(
            script,
            Mode::Messages { filter: default_filter },
            default_notification_handler(),
        );

        let first = rx.recv().await.unwrap().unwrap();
        assert!(matches!(first, QueueEvent::Message(BackendMessage::RowDescription(_))));

        let second = rx.recv().await.unwrap().unwrap();
        assert!(matches!(second, QueueEvent::Message(BackendMessage::ReadyForQuery(_))));

        // the clean EOF after the script is the terminal element
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn notification_handled_but_not_enqueued() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut rx = spawn_receiver(
            vec![notification(), frame(b'Z', b"I")],
            Mode::Messages { filter: default_filter },
            Box::new(move |n| {
                assert_eq!(n.channel, "jobs");
                assert_eq!(n.payload, "18");
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // ReadyForQuery arrives after the notification was dispatched
        let first = rx.recv().await.unwrap().unwrap();
        assert!(matches!(first, QueueEvent::Message(BackendMessage::ReadyForQuery(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn row_mode_streams_rows() {
        let script = vec![
            row_description(),
            data_row(41),
            data_row(42),
            frame(b'C', b"SELECT 2\0"),
            frame(b'Z', b"I"),
        ];
        let mut rx = spawn_receiver(
            script,
            Mode::Rows { columns: None },
            default_notification_handler(),
        );

        let first = rx.recv().await.unwrap().unwrap();
        assert!(matches!(first, QueueEvent::Message(BackendMessage::RowDescription(_))));

        for expect in [41, 42] {
            let QueueEvent::Row(row) = rx.recv().await.unwrap().unwrap() else {
                panic!("expected a row");
            };
            let id: i32 = row.try_get(0).unwrap();
            assert_eq!(id, expect);
        }

        // rows mode does not filter the rest
        let complete = rx.recv().await.unwrap().unwrap();
        assert!(matches!(complete, QueueEvent::Message(BackendMessage::CommandComplete(_))));
    }

    #[tokio::test]
    async fn terminal_error_once() {
        // unknown message type kills the worker
        let script = vec![frame(b'Z', b"I"), frame(b'@', b""), frame(b'Z', b"I")];
        let mut rx = spawn_receiver(
            script,
            Mode::Messages { filter: default_filter },
            default_notification_handler(),
        );

        assert!(rx.recv().await.unwrap().is_ok());

        let terminal = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(terminal.kind(), ErrorKind::Protocol(_)));

        // nothing is written after the terminal element
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn row_before_description_is_terminal() {
        let mut rx = spawn_receiver(
            vec![data_row(1)],
            Mode::Rows { columns: None },
            default_notification_handler(),
        );
        let terminal = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(terminal.kind(), ErrorKind::Protocol(_)));
    }
}
