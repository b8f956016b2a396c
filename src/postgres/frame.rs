//! Backend message framing.
//!
//! All communication is through a stream of messages. The first byte of a message
//! identifies the message type, and the next four bytes specify the length of the
//! rest of the message (this length count includes itself, but not the
//! message-type byte).
use bytes::{Buf, Bytes, BytesMut};
use std::io;

use super::ProtocolError;
use crate::Result;

/// message type + length
pub(crate) const HEADER: usize = 1 + 4;

/// A framed backend message: the type byte and the undecoded body.
///
/// `DataRow` bodies in particular stay undecoded here, column extraction
/// requires the row description which only a higher layer tracks.
#[derive(Debug)]
pub struct RawFrame {
    pub msgtype: u8,
    pub body: Bytes,
}

/// Try to split one frame off the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, the
/// caller must read more bytes and retry. On success exactly `length - 4`
/// body bytes are consumed past the header.
pub fn take_frame(buf: &mut BytesMut) -> Result<Option<RawFrame>, ProtocolError> {
    let Some(mut header) = buf.get(..HEADER) else {
        return Ok(None);
    };

    let msgtype = header.get_u8();
    let len = header.get_i32();

    // the length covers itself, a shorter value cannot come from a postgres server
    if len < 4 {
        return Err(ProtocolError::frame_length(msgtype, len));
    }

    let body_len = len as usize - 4;
    if buf.len() < HEADER + body_len {
        return Ok(None);
    }

    buf.advance(HEADER);
    Ok(Some(RawFrame { msgtype, body: buf.split_to(body_len).freeze() }))
}

/// A source of bytes driving [`decode_next`].
///
/// Implementors append newly received bytes to `buf` and return how many
/// were appended. Returning `0` means the peer closed the stream.
pub trait FetchBytes {
    fn fetch(&mut self, buf: &mut BytesMut) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Decode the next backend frame out of `buf`, pulling more bytes from
/// `source` whenever the buffered prefix is incomplete.
///
/// Trailing bytes beyond the decoded frame are left in `buf` for the next
/// call, so a single fetch may serve many frames.
pub async fn decode_next<S>(buf: &mut BytesMut, source: &mut S) -> Result<RawFrame>
where
    S: FetchBytes + ?Sized,
{
    loop {
        if let Some(frame) = take_frame(buf)? {
            return Ok(frame);
        }

        buf.reserve(1024);
        if source.fetch(buf).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "postgres closed the stream mid frame",
            ).into());
        }
    }
}

impl FetchBytes for crate::net::ReadSocket {
    fn fetch(&mut self, buf: &mut BytesMut) -> impl Future<Output = io::Result<usize>> + Send {
        std::future::poll_fn(|cx| crate::io::poll_read(self, buf, cx))
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;
    use crate::ErrorKind;

    /// Scripted byte source which hands out one chunk per fetch.
    struct Chunks(std::collections::VecDeque<Vec<u8>>);

    impl FetchBytes for Chunks {
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

    #[tokio::test]
    async fn partial_header_recovery() {
        let bytes = frame(b'Z', b"I");
        let mut buf = BytesMut::from(&bytes[..3]);
        let mut source = Chunks([bytes[3..].to_vec(), b"trailing".to_vec()].into());

        let frame = decode_next(&mut buf, &mut source).await.unwrap();
        assert_eq!(frame.msgtype, b'Z');
        assert_eq!(&frame.body[..], b"I");
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn partial_body_leaves_trailer() {
        let mut bytes = frame(b'C', b"SELECT 1\0");
        bytes.extend_from_slice(&frame(b'Z', b"I"));

        let mut buf = BytesMut::new();
        let mut source = Chunks([bytes[..7].to_vec(), bytes[7..].to_vec()].into());

        let first = decode_next(&mut buf, &mut source).await.unwrap();
        assert_eq!(first.msgtype, b'C');
        assert_eq!(&first.body[..], b"SELECT 1\0");

        // second frame is already buffered, no fetch needed
        let second = decode_next(&mut buf, &mut source).await.unwrap();
        assert_eq!(second.msgtype, b'Z');
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn length_below_minimum_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Z');
        buf.put_i32(3);

        let err = take_frame(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameLength { msgtype: b'Z', len: 3 }));
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let bytes = frame(b'D', b"half body");
        let mut buf = BytesMut::from(&bytes[..6]);
        let mut source = Chunks([].into());

        let err = decode_next(&mut buf, &mut source).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
    }
}
