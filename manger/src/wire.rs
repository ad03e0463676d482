//! OPC UA connection protocol frames and a buffered connection to read and write them.
//!
//! All integers are little endian. Every frame starts with a 3 byte message type,
//! one chunk byte and the u32 size of the whole frame.

use std::{
    fmt::Display,
    io::{self, Cursor},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::config::TransportConfig;

const HEADER_LEN: usize = 8;
/// Largest frame accepted from a peer, well above any negotiated buffer size
const MAX_FRAME_LEN: usize = 1 << 24;

/// Status codes used in ERR frames
pub mod status {
    pub const BAD_DECODING_ERROR: u32 = 0x8007_0000;
    pub const BAD_SECURITY_CHECKS_FAILED: u32 = 0x8013_0000;
    pub const BAD_TCP_MESSAGE_TYPE_INVALID: u32 = 0x807E_0000;
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("incomplete frame")]
    Incomplete,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unknown message type {0:?}")]
    UnknownMessageType([u8; 3]),
    #[error("frame announces invalid size {0}")]
    InvalidSize(u32),
    #[error("string is not valid utf-8")]
    InvalidString,
    #[error("connection closed in the middle of a frame")]
    Closed,
}

/// returns one u32 if there is enough space or returns WireError::Incomplete
fn get_u32(src: &mut Cursor<&[u8]>) -> Result<u32, WireError> {
    if src.remaining() < 4 {
        return Err(WireError::Incomplete);
    }
    Ok(src.get_u32_le())
}

/// Skips n bytes if there is enough space. Otherwise returns WireError::Incomplete
fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), WireError> {
    if src.remaining() < n {
        return Err(WireError::Incomplete);
    }
    src.advance(n);
    Ok(())
}

/// returns a length prefixed string, a length of -1 is a null string
fn get_string(src: &mut Cursor<&[u8]>) -> Result<Option<String>, WireError> {
    let len = get_u32(src)? as i32;
    if len < 0 {
        return Ok(None);
    }
    let start = src.position() as usize;
    skip(src, len as usize)?;
    let bytes = &src.get_ref()[start..start + len as usize];
    std::str::from_utf8(bytes)
        .map(|s| Some(s.to_owned()))
        .map_err(|_| WireError::InvalidString)
}

fn put_string(dst: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(s) => {
            dst.put_i32_le(s.len() as i32);
            dst.put_slice(s.as_bytes());
        }
        None => dst.put_i32_le(-1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    Acknowledge,
    Error,
    ReverseHello,
    Message,
    OpenSecureChannel,
    CloseSecureChannel,
}

impl MessageType {
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"HEL" => Some(Self::Hello),
            b"ACK" => Some(Self::Acknowledge),
            b"ERR" => Some(Self::Error),
            b"RHE" => Some(Self::ReverseHello),
            b"MSG" => Some(Self::Message),
            b"OPN" => Some(Self::OpenSecureChannel),
            b"CLO" => Some(Self::CloseSecureChannel),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::ReverseHello => b"RHE",
            Self::Message => b"MSG",
            Self::OpenSecureChannel => b"OPN",
            Self::CloseSecureChannel => b"CLO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
    pub endpoint_url: String,
}

impl Hello {
    pub fn new(endpoint_url: impl Into<String>, config: &TransportConfig) -> Self {
        Self {
            protocol_version: config.protocol_version,
            receive_buffer_size: config.receive_buffer_size,
            send_buffer_size: config.send_buffer_size,
            max_message_size: config.max_message_size,
            max_chunk_count: config.max_chunk_count,
            endpoint_url: endpoint_url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledge {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl From<&Hello> for Acknowledge {
    fn from(hello: &Hello) -> Self {
        Self {
            protocol_version: hello.protocol_version,
            receive_buffer_size: hello.receive_buffer_size,
            send_buffer_size: hello.send_buffer_size,
            max_message_size: hello.max_message_size,
            max_chunk_count: hello.max_chunk_count,
        }
    }
}

/// Body of an ERR frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u32,
    pub reason: String,
}

impl ErrorMessage {
    pub fn new(code: u32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error 0x{:08X}: {}", self.code, self.reason)
    }
}

/// One frame of the connection protocol. Secure conversation chunks stay opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Acknowledge(Acknowledge),
    Error(ErrorMessage),
    Chunk {
        message_type: MessageType,
        /// The complete frame including its header
        bytes: Bytes,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::Acknowledge(_) => MessageType::Acknowledge,
            Self::Error(_) => MessageType::Error,
            Self::Chunk { message_type, .. } => *message_type,
        }
    }

    /// Encodes the frame with its header
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        match self {
            Self::Hello(hello) => {
                for value in [
                    hello.protocol_version,
                    hello.receive_buffer_size,
                    hello.send_buffer_size,
                    hello.max_message_size,
                    hello.max_chunk_count,
                ] {
                    body.put_u32_le(value);
                }
                put_string(&mut body, Some(&hello.endpoint_url));
            }
            Self::Acknowledge(ack) => {
                for value in [
                    ack.protocol_version,
                    ack.receive_buffer_size,
                    ack.send_buffer_size,
                    ack.max_message_size,
                    ack.max_chunk_count,
                ] {
                    body.put_u32_le(value);
                }
            }
            Self::Error(error) => {
                body.put_u32_le(error.code);
                put_string(&mut body, Some(&error.reason));
            }
            Self::Chunk { bytes, .. } => return BytesMut::from(&bytes[..]),
        }

        let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
        frame.put_slice(self.message_type().tag());
        frame.put_u8(b'F');
        frame.put_u32_le((HEADER_LEN + body.len()) as u32);
        frame.put(body);
        frame
    }
}

pub trait Parse: Sized {
    fn check(src: &mut Cursor<&[u8]>) -> Result<(), WireError>;
    fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, WireError>;
    #[allow(async_fn_in_trait)]
    async fn write(dst: &mut (impl AsyncWrite + Unpin), msg: &Self) -> Result<(), WireError>;
}

impl Parse for Message {
    fn check(src: &mut Cursor<&[u8]>) -> Result<(), WireError> {
        if src.remaining() < HEADER_LEN {
            return Err(WireError::Incomplete);
        }
        let mut tag = [0u8; 3];
        src.copy_to_slice(&mut tag);
        if MessageType::from_tag(&tag).is_none() {
            return Err(WireError::UnknownMessageType(tag));
        }
        skip(src, 1)?;
        let size = get_u32(src)?;
        if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&(size as usize)) {
            return Err(WireError::InvalidSize(size));
        }
        skip(src, size as usize - HEADER_LEN)
    }

    fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, WireError> {
        let start = src.position() as usize;
        let mut tag = [0u8; 3];
        src.copy_to_slice(&mut tag);
        let message_type = MessageType::from_tag(&tag).ok_or(WireError::UnknownMessageType(tag))?;
        skip(src, 1)?;
        let size = get_u32(src)? as usize;

        let end = start + size;
        if size < HEADER_LEN || end > src.get_ref().len() {
            return Err(WireError::Incomplete);
        }
        let frame = &src.get_ref()[start..end];
        let mut body = Cursor::new(&frame[HEADER_LEN..]);
        src.set_position(end as u64);

        let message = match message_type {
            MessageType::Hello => Self::Hello(Hello {
                protocol_version: get_u32(&mut body)?,
                receive_buffer_size: get_u32(&mut body)?,
                send_buffer_size: get_u32(&mut body)?,
                max_message_size: get_u32(&mut body)?,
                max_chunk_count: get_u32(&mut body)?,
                endpoint_url: get_string(&mut body)?.unwrap_or_default(),
            }),
            MessageType::Acknowledge => Self::Acknowledge(Acknowledge {
                protocol_version: get_u32(&mut body)?,
                receive_buffer_size: get_u32(&mut body)?,
                send_buffer_size: get_u32(&mut body)?,
                max_message_size: get_u32(&mut body)?,
                max_chunk_count: get_u32(&mut body)?,
            }),
            MessageType::Error => Self::Error(ErrorMessage {
                code: get_u32(&mut body)?,
                reason: get_string(&mut body)?.unwrap_or_default(),
            }),
            message_type => Self::Chunk {
                message_type,
                bytes: Bytes::copy_from_slice(frame),
            },
        };
        Ok(message)
    }

    async fn write(dst: &mut (impl AsyncWrite + Unpin), msg: &Self) -> Result<(), WireError> {
        dst.write_all(&msg.encode()).await?;
        dst.flush().await.map_err(WireError::from)
    }
}

pub struct Connection<S: AsyncWrite + AsyncRead + Unpin> {
    stream: BufWriter<S>,
    buffer: BytesMut,
}

impl<S: AsyncWrite + AsyncRead + Unpin> Connection<S> {
    /// Initialises a new Connection with a given stream
    pub fn new(stream: S) -> Self {
        Connection {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Tries to parse a frame
    fn parse_frame<M: Parse>(&mut self) -> Result<Option<M>, WireError> {
        let mut buf = Cursor::new(&self.buffer[..]);

        match M::check(&mut buf) {
            Ok(_) => {
                let len = buf.position() as usize;
                buf.set_position(0);
                let msg = M::parse(&mut buf)?;
                self.buffer.advance(len);
                Ok(Some(msg))
            }
            Err(WireError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads one frame, None if the peer closed the connection between frames
    pub async fn read_frame<M: Parse>(&mut self) -> Result<Option<M>, WireError> {
        loop {
            if let Some(msg) = self.parse_frame()? {
                return Ok(Some(msg));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    return Err(WireError::Closed);
                }
            }
        }
    }

    /// Waits until at least one byte is buffered. Returns false if the peer closed the connection first.
    pub async fn readable(&mut self) -> Result<bool, WireError> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        Ok(self.stream.read_buf(&mut self.buffer).await? > 0)
    }

    /// Writes one given frame into the stream
    pub async fn write_frame<M: Parse>(&mut self, msg: &M) -> Result<(), WireError> {
        M::write(&mut self.stream, msg).await
    }

    /// Writes pre-encoded frames
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await.map_err(WireError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<Message, WireError> {
        let mut src = Cursor::new(bytes);
        Message::check(&mut src)?;
        assert_eq!(src.position() as usize, bytes.len());
        src.set_position(0);
        Message::parse(&mut src)
    }

    #[test]
    fn test_hello_layout() {
        let hello = Message::Hello(Hello::new("opc.tcp://host:4840", &TransportConfig::default()));
        let bytes = hello.encode();

        assert_eq!(&bytes[..4], b"HELF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize, bytes.len());
        // version 0, 1 MiB buffers, no message limit, 1024 chunks
        assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &(1u32 << 20).to_le_bytes());
        assert_eq!(&bytes[24..28], &1024u32.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), hello);
    }

    #[test]
    fn test_error_frame() {
        let error = Message::Error(ErrorMessage::new(status::BAD_SECURITY_CHECKS_FAILED, "Bad"));
        let bytes = error.encode();
        assert_eq!(bytes.len(), 8 + 4 + 4 + 3);
        assert_eq!(decode(&bytes).unwrap(), error);
    }

    #[test]
    fn test_null_reason() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(b"ERRF");
        bytes.put_u32_le(16);
        bytes.put_u32_le(status::BAD_DECODING_ERROR);
        bytes.put_i32_le(-1);

        let Message::Error(error) = decode(&bytes).unwrap() else {
            panic!("expected an error frame");
        };
        assert_eq!(error.code, status::BAD_DECODING_ERROR);
        assert_eq!(error.reason, "");
    }

    #[test]
    fn test_opaque_chunk() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(b"OPNF");
        bytes.put_u32_le(12);
        bytes.put_u32_le(99);

        let message = decode(&bytes).unwrap();
        assert_eq!(message.message_type(), MessageType::OpenSecureChannel);
        assert_eq!(message.encode(), bytes);
    }

    #[test]
    fn test_incomplete_and_unknown() {
        let bytes = Message::Acknowledge(Acknowledge::from(&Hello::new("x", &TransportConfig::default()))).encode();
        assert!(matches!(decode(&bytes[..bytes.len() - 1]), Err(WireError::Incomplete)));
        assert!(matches!(decode(b"XYZF\x08\0\0\0"), Err(WireError::UnknownMessageType(_))));
        assert!(matches!(decode(b"ACKF\x04\0\0\0"), Err(WireError::InvalidSize(4))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_from_header() {
        let (mut peer, stream) = tokio::io::duplex(64);
        let mut connection = Connection::new(stream);

        // only the header is ever sent, the body never arrives
        peer.write_all(b"OPNF\xff\xff\xff\xff").await.unwrap();
        assert!(matches!(
            connection.read_frame::<Message>().await,
            Err(WireError::InvalidSize(u32::MAX))
        ));

        let mut limit = BytesMut::new();
        limit.put_slice(b"MSGF");
        limit.put_u32_le(MAX_FRAME_LEN as u32 + 1);
        assert!(matches!(decode(&limit), Err(WireError::InvalidSize(_))));
    }

    #[tokio::test]
    async fn test_connection_frames() {
        let (client, server) = tokio::io::duplex(256);
        let mut client = Connection::new(client);
        let mut server = Connection::new(server);

        let hello = Message::Hello(Hello::new("opc.tcp://a:1", &TransportConfig::default()));
        client.write_frame(&hello).await.unwrap();
        assert_eq!(server.read_frame::<Message>().await.unwrap(), Some(hello));

        server
            .write_frame(&Message::Error(ErrorMessage::new(1, "no")))
            .await
            .unwrap();
        assert!(client.readable().await.unwrap());
        assert_eq!(
            client.read_frame::<Message>().await.unwrap(),
            Some(Message::Error(ErrorMessage::new(1, "no")))
        );

        drop(server);
        assert!(!client.readable().await.unwrap());
        assert_eq!(client.read_frame::<Message>().await.unwrap(), None);
    }
}
