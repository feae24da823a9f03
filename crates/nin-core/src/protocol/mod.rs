//! Wire protocol implementation.
//!
//! Every exchange between peers is a length-prefixed frame over a plain TCP
//! stream.
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────────────────┬──────────┬──────────────────────────┐
//! │        Length        │   Code   │         Payload          │
//! │  4 bytes (u32, BE)   │  1 byte  │    Length - 1 bytes      │
//! └──────────────────────┴──────────┴──────────────────────────┘
//! ```
//!
//! - Length: `1 + payload.len()`, big-endian. A length of zero is a
//!   keep-alive frame and carries no message.
//! - Code: signed message code, see [`MessageCode`].
//!
//! Payload layouts for structured messages (pieces, piece requests) live here
//! as well; the manifest layout is owned by [`crate::file::Manifest`] and is
//! built on [`PayloadWriter`] / [`PayloadReader`].

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Size of the frame length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of a piece digest in bytes
pub const HASH_SIZE: usize = 20;

/// Maximum accepted frame length (64 MB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Size of the fixed piece header: index, offset, length
pub const PIECE_HEADER_SIZE: usize = 12;

/// Message codes. Values are fixed and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum MessageCode {
    /// Liveness probe
    Ping = -2,
    /// Liveness probe response
    Pong = -1,
    /// Receiver asks for the manifest
    RequestMetadata = 0,
    /// Encoded manifest
    Metadata = 1,
    /// Receiver asks to be admitted as a listener
    ListenerSenderHandshake = 2,
    /// Sender admitted the listener
    ListenerAcknowledgement = 3,
    /// Receiver asks for one piece
    RequestPiece = 4,
    /// Piece contents
    Piece = 5,
    /// Piece acknowledgement; also sent by a receiver once it has every piece
    PieceAcknowledgement = 6,
}

impl MessageCode {
    /// Alias used when a receiver reports that its download completed.
    pub const LISTENER_FINISHED_ACKNOWLEDGEMENT: Self = Self::PieceAcknowledgement;

    /// Parse a message code from its wire byte.
    #[allow(clippy::cast_possible_wrap)]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte as i8 {
            -2 => Some(Self::Ping),
            -1 => Some(Self::Pong),
            0 => Some(Self::RequestMetadata),
            1 => Some(Self::Metadata),
            2 => Some(Self::ListenerSenderHandshake),
            3 => Some(Self::ListenerAcknowledgement),
            4 => Some(Self::RequestPiece),
            5 => Some(Self::Piece),
            6 => Some(Self::PieceAcknowledgement),
            _ => None,
        }
    }

    /// The byte written on the wire for this code.
    #[allow(clippy::cast_sign_loss)]
    pub const fn as_byte(self) -> u8 {
        self as i8 as u8
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::RequestMetadata => "RequestMetadata",
            Self::Metadata => "Metadata",
            Self::ListenerSenderHandshake => "ListenerSenderHandshake",
            Self::ListenerAcknowledgement => "ListenerAcknowledgement",
            Self::RequestPiece => "RequestPiece",
            Self::Piece => "Piece",
            Self::PieceAcknowledgement => "PieceAcknowledgement",
        };
        f.write_str(name)
    }
}

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message code
    pub code: MessageCode,
    /// Application payload (everything after the code byte)
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with a payload.
    pub fn new(code: MessageCode, payload: Vec<u8>) -> Self {
        Self { code, payload }
    }

    /// Create a message with an empty payload.
    pub const fn empty(code: MessageCode) -> Self {
        Self {
            code,
            payload: Vec::new(),
        }
    }

    /// Encode the message as a complete frame.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + 1 + self.payload.len());
        #[allow(clippy::cast_possible_truncation)]
        let length = (1 + self.payload.len()) as u32;
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push(self.code.as_byte());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a message from a buffer holding one complete frame.
    ///
    /// Returns `Ok(None)` for a keep-alive frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Framing`] if the buffer is shorter than the frame
    /// declares, or [`Error::UnknownMessageCode`] for an unrecognised code.
    pub fn deserialize(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < LENGTH_PREFIX_SIZE {
            return Err(Error::Framing(format!(
                "frame of {} bytes is shorter than the length prefix",
                bytes.len()
            )));
        }

        let length = frame_length([bytes[0], bytes[1], bytes[2], bytes[3]])?;
        if length == 0 {
            return Ok(None);
        }

        let body = &bytes[LENGTH_PREFIX_SIZE..];
        if body.len() < length {
            return Err(Error::Framing(format!(
                "frame declares {length} bytes but only {} are present",
                body.len()
            )));
        }

        Self::from_body(&body[..length]).map(Some)
    }

    fn from_body(body: &[u8]) -> Result<Self> {
        let (&code, payload) = body
            .split_first()
            .ok_or_else(|| Error::Framing("empty frame body".to_string()))?;
        #[allow(clippy::cast_possible_wrap)]
        let code = MessageCode::from_byte(code).ok_or(Error::UnknownMessageCode(code as i8))?;

        Ok(Self {
            code,
            payload: payload.to_vec(),
        })
    }
}

fn frame_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(Error::Framing(format!(
            "frame length {length} exceeds maximum {MAX_FRAME_SIZE}"
        )));
    }
    Ok(length)
}

/// Read one frame from a stream.
///
/// Returns `Ok(None)` for a keep-alive frame.
///
/// # Errors
///
/// Returns [`Error::ConnectionClosed`] if the stream ends cleanly before a
/// frame starts, and [`Error::Framing`] if it ends part-way through one.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                Error::ConnectionClosed
            } else {
                Error::Framing("stream ended inside the length prefix".to_string())
            });
        }
        filled += n;
    }

    let length = frame_length(prefix)?;
    if length == 0 {
        return Ok(None);
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Framing(format!("stream ended before {length} frame bytes arrived"))
        } else {
            Error::Io(e)
        }
    })?;

    Message::from_body(&body).map(Some)
}

/// Write one frame to a stream and flush it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    writer.write_all(&message.serialize()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one frame with a timeout.
///
/// # Errors
///
/// Returns [`Error::Timeout`] if the peer does not take the frame within
/// `duration`.
pub async fn write_message_with_timeout<W>(
    writer: &mut W,
    message: &Message,
    duration: Duration,
) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    timeout(duration, write_message(writer, message))
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))?
}

/// Wait for a message with a specific code, skipping keep-alive frames.
///
/// The whole wait, keep-alives included, is bounded by `duration`.
///
/// # Errors
///
/// Returns [`Error::UnexpectedMessage`] if a different message arrives first,
/// and [`Error::Timeout`] if nothing arrives in time.
pub async fn expect_message<R>(
    reader: &mut R,
    expected: MessageCode,
    duration: Duration,
) -> Result<Message>
where
    R: AsyncReadExt + Unpin,
{
    let wait = async {
        loop {
            if let Some(message) = read_message(reader).await? {
                return Ok::<Message, Error>(message);
            }
        }
    };

    let message: Message = timeout(duration, wait)
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))??;

    if message.code != expected {
        return Err(Error::UnexpectedMessage {
            expected: expected.to_string(),
            actual: message.code.to_string(),
        });
    }

    Ok(message)
}

/// One piece of the logical stream as carried by a `Piece` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceBlock {
    /// Piece index
    pub index: u32,
    /// Byte offset of the piece in the logical stream (low 32 bits)
    pub offset: u32,
    /// Piece contents
    pub data: Vec<u8>,
}

impl PieceBlock {
    /// Build the `Piece` message for this block.
    ///
    /// Format: index (4 bytes) | offset (4 bytes) | length (4 bytes) | data
    #[must_use]
    pub fn to_message(&self) -> Message {
        let mut buf = Vec::with_capacity(PIECE_HEADER_SIZE + self.data.len());
        buf.extend_from_slice(&self.index.to_be_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        #[allow(clippy::cast_possible_truncation)]
        let length = self.data.len() as u32;
        buf.extend_from_slice(&length.to_be_bytes());
        buf.extend_from_slice(&self.data);
        Message::new(MessageCode::Piece, buf)
    }

    /// Decode a `Piece` payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is shorter than its header declares.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(data, "piece");
        let index = reader.u32()?;
        let offset = reader.u32()?;
        let length = reader.u32()? as usize;
        let bytes = reader.take(length)?;

        Ok(Self {
            index,
            offset,
            data: bytes.to_vec(),
        })
    }
}

/// Build a `RequestPiece` message.
#[must_use]
pub fn request_piece(index: u32) -> Message {
    Message::new(MessageCode::RequestPiece, index.to_be_bytes().to_vec())
}

/// Decode the piece index from a `RequestPiece` payload.
///
/// # Errors
///
/// Returns an error if the payload is shorter than four bytes.
pub fn decode_piece_request(data: &[u8]) -> Result<u32> {
    PayloadReader::new(data, "piece request").u32()
}

/// Builder for big-endian, length-prefixed payloads.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a big-endian `u32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append a big-endian `u64`.
    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append bytes with no length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a `u32` length prefix followed by the bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        #[allow(clippy::cast_possible_truncation)]
        let length = bytes.len() as u32;
        self.put_u32(length);
        self.put_raw(bytes)
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    /// Consume the writer and return the payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a payload that rejects short input.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
    context: &'static str,
}

impl<'a> PayloadReader<'a> {
    /// Create a reader. `context` names the payload in error messages.
    pub const fn new(buf: &'a [u8], context: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            context,
        }
    }

    /// Bytes left to read.
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether the whole payload has been consumed.
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::ProtocolError(format!(
                "{} payload too short: needed {n} bytes at offset {}, {} left",
                self.context,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian `u32`.
    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a big-endian `u64`.
    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a `u32`-length-prefixed byte string.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String> {
        let context = self.context;
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::ProtocolError(format!("{context} payload has invalid UTF-8")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: [MessageCode; 9] = [
        MessageCode::Ping,
        MessageCode::Pong,
        MessageCode::RequestMetadata,
        MessageCode::Metadata,
        MessageCode::ListenerSenderHandshake,
        MessageCode::ListenerAcknowledgement,
        MessageCode::RequestPiece,
        MessageCode::Piece,
        MessageCode::PieceAcknowledgement,
    ];

    #[test]
    fn test_message_code_values_are_fixed() {
        assert_eq!(MessageCode::Ping as i8, -2);
        assert_eq!(MessageCode::Pong as i8, -1);
        assert_eq!(MessageCode::RequestMetadata as i8, 0);
        assert_eq!(MessageCode::Metadata as i8, 1);
        assert_eq!(MessageCode::ListenerSenderHandshake as i8, 2);
        assert_eq!(MessageCode::ListenerAcknowledgement as i8, 3);
        assert_eq!(MessageCode::RequestPiece as i8, 4);
        assert_eq!(MessageCode::Piece as i8, 5);
        assert_eq!(MessageCode::PieceAcknowledgement as i8, 6);
        assert_eq!(
            MessageCode::LISTENER_FINISHED_ACKNOWLEDGEMENT,
            MessageCode::PieceAcknowledgement
        );
    }

    #[test]
    fn test_message_code_byte_roundtrip() {
        for code in ALL_CODES {
            assert_eq!(MessageCode::from_byte(code.as_byte()), Some(code));
        }
        assert_eq!(MessageCode::Ping.as_byte(), 0xFE);
        assert_eq!(MessageCode::from_byte(7), None);
    }

    #[test]
    fn test_serialize_layout() {
        let message = Message::new(MessageCode::Piece, vec![9, 8, 7]);
        let bytes = message.serialize();

        assert_eq!(&bytes[0..4], &4u32.to_be_bytes());
        assert_eq!(bytes[4], 5);
        assert_eq!(&bytes[5..], &[9, 8, 7]);
    }

    #[test]
    fn test_message_serialize_deserialize() {
        for code in ALL_CODES {
            let message = Message::new(code, b"payload bytes".to_vec());
            let decoded = Message::deserialize(&message.serialize())
                .expect("deserialize")
                .expect("message");
            assert_eq!(decoded, message);
        }

        let empty = Message::empty(MessageCode::Ping);
        let decoded = Message::deserialize(&empty.serialize())
            .expect("deserialize")
            .expect("message");
        assert_eq!(decoded, empty);
    }

    #[test]
    fn test_keep_alive_frame_is_no_message() {
        assert_eq!(Message::deserialize(&[0, 0, 0, 0]).expect("keep-alive"), None);
    }

    #[test]
    fn test_deserialize_truncated_frame() {
        let bytes = Message::new(MessageCode::Metadata, vec![1; 32]).serialize();

        assert!(matches!(
            Message::deserialize(&bytes[..10]),
            Err(Error::Framing(_))
        ));
        assert!(matches!(
            Message::deserialize(&bytes[..2]),
            Err(Error::Framing(_))
        ));
    }

    #[test]
    fn test_deserialize_unknown_code() {
        let bytes = [0, 0, 0, 1, 42];
        assert!(matches!(
            Message::deserialize(&bytes),
            Err(Error::UnknownMessageCode(42))
        ));
    }

    #[test]
    fn test_deserialize_rejects_oversized_length() {
        let bytes = u32::MAX.to_be_bytes();
        assert!(matches!(
            Message::deserialize(&bytes),
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_read_write_message() {
        let mut buffer = Vec::new();

        let message = Message::new(MessageCode::Metadata, b"test payload".to_vec());
        write_message(&mut buffer, &message)
            .await
            .expect("write message");

        let mut cursor = std::io::Cursor::new(buffer);
        let read = read_message(&mut cursor)
            .await
            .expect("read message")
            .expect("message");

        assert_eq!(read, message);
    }

    #[tokio::test]
    async fn test_read_keep_alive_then_message() {
        let mut buffer = vec![0, 0, 0, 0];
        buffer.extend_from_slice(&Message::empty(MessageCode::Pong).serialize());

        let mut cursor = std::io::Cursor::new(buffer);
        assert_eq!(read_message(&mut cursor).await.expect("keep-alive"), None);
        let message = read_message(&mut cursor)
            .await
            .expect("read")
            .expect("message");
        assert_eq!(message.code, MessageCode::Pong);
    }

    #[tokio::test]
    async fn test_read_message_clean_eof() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_message_truncated_stream() {
        let bytes = Message::new(MessageCode::Piece, vec![7; 100]).serialize();

        let mut cursor = std::io::Cursor::new(bytes[..50].to_vec());
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(Error::Framing(_))
        ));

        let mut cursor = std::io::Cursor::new(bytes[..3].to_vec());
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(Error::Framing(_))
        ));
    }

    #[tokio::test]
    async fn test_write_message_with_timeout_expires() {
        struct StalledWriter;

        impl tokio::io::AsyncWrite for StalledWriter {
            fn poll_write(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                _buf: &[u8],
            ) -> std::task::Poll<std::io::Result<usize>> {
                std::task::Poll::Pending
            }

            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Pending
            }

            fn poll_shutdown(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }

        let mut writer = StalledWriter;
        let message = Message::new(MessageCode::Piece, vec![1; 64]);
        let result =
            write_message_with_timeout(&mut writer, &message, Duration::from_millis(50)).await;

        match result {
            Err(Error::Timeout(secs)) => assert_eq!(secs, 0),
            other => panic!("Expected Timeout error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expect_message_skips_keep_alive() {
        let mut buffer = vec![0, 0, 0, 0, 0, 0, 0, 0];
        buffer.extend_from_slice(&Message::empty(MessageCode::ListenerAcknowledgement).serialize());

        let mut cursor = std::io::Cursor::new(buffer);
        let message = expect_message(
            &mut cursor,
            MessageCode::ListenerAcknowledgement,
            Duration::from_secs(1),
        )
        .await
        .expect("ack");
        assert!(message.payload.is_empty());
    }

    #[tokio::test]
    async fn test_expect_message_rejects_wrong_code() {
        let buffer = Message::empty(MessageCode::Pong).serialize();
        let mut cursor = std::io::Cursor::new(buffer);

        let result = expect_message(
            &mut cursor,
            MessageCode::ListenerAcknowledgement,
            Duration::from_secs(1),
        )
        .await;

        match result {
            Err(Error::UnexpectedMessage { expected, actual }) => {
                assert_eq!(expected, "ListenerAcknowledgement");
                assert_eq!(actual, "Pong");
            }
            other => panic!("Expected UnexpectedMessage, got: {other:?}"),
        }
    }

    #[test]
    fn test_piece_block_encode_decode() {
        let block = PieceBlock {
            index: 2,
            offset: 1_048_576,
            data: vec![1, 2, 3, 4, 5],
        };

        let message = block.to_message();
        assert_eq!(message.code, MessageCode::Piece);
        assert_eq!(&message.payload[8..12], &5u32.to_be_bytes());

        let decoded = PieceBlock::decode(&message.payload).expect("decode");
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_piece_block_decode_too_short() {
        assert!(PieceBlock::decode(&[0; 11]).is_err());

        let mut payload = PieceBlock {
            index: 0,
            offset: 0,
            data: vec![0; 16],
        }
        .to_message()
        .payload;
        payload.truncate(20);
        assert!(matches!(
            PieceBlock::decode(&payload),
            Err(Error::ProtocolError(_))
        ));
    }

    #[test]
    fn test_piece_request_roundtrip() {
        let message = request_piece(17);
        assert_eq!(message.code, MessageCode::RequestPiece);
        assert_eq!(decode_piece_request(&message.payload).expect("decode"), 17);
        assert!(decode_piece_request(&[0, 1]).is_err());
    }

    #[test]
    fn test_payload_reader_rejects_short_string() {
        let mut writer = PayloadWriter::new();
        writer.put_str("hello");
        let mut bytes = writer.finish();
        bytes.pop();

        let mut reader = PayloadReader::new(&bytes, "test");
        assert!(reader.string().is_err());
    }

    #[test]
    fn test_payload_writer_reader() {
        let mut writer = PayloadWriter::new();
        writer
            .put_u8(1)
            .put_u32(0xDEAD_BEEF)
            .put_u64(u64::MAX - 1)
            .put_str("name");
        let bytes = writer.finish();

        let mut reader = PayloadReader::new(&bytes, "test");
        assert_eq!(reader.u8().expect("u8"), 1);
        assert_eq!(reader.u32().expect("u32"), 0xDEAD_BEEF);
        assert_eq!(reader.u64().expect("u64"), u64::MAX - 1);
        assert_eq!(reader.string().expect("string"), "name");
        assert!(reader.is_empty());
    }
}
