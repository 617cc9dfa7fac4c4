//! Wire framing and handshake shared by the server endpoint and the client.
//!
//! ## Handshake
//! Client → Server:
//! - Magic: 4 bytes "RGNS"
//! - Version: 1 byte (0x01)
//! - Flags: 1 byte (bit 0: MessagePack, bit 1: JSON fallback)
//!
//! Server → Client:
//! - Status: 1 byte (0x00=success, 0x01=version mismatch)
//! - Version: 1 byte
//! - Flags: 1 byte
//! - Session ID: 16 bytes UUID
//!
//! ## Message Framing
//! - Length: 4 bytes BE (type + encoding + payload)
//! - Message Type: 1 byte (0x01=request, 0x02=response)
//! - Encoding: 1 byte (0x01=MessagePack, 0x02=JSON)
//! - Payload: variable

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Protocol constants
pub const MAGIC: &[u8; 4] = b"RGNS";
pub const PROTOCOL_VERSION: u8 = 0x01;
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024; // 16MB

/// Handshake status codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandshakeStatus {
  Success = 0x00,
  VersionMismatch = 0x01,
}

impl TryFrom<u8> for HandshakeStatus {
  type Error = ();
  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0x00 => Ok(Self::Success),
      0x01 => Ok(Self::VersionMismatch),
      _ => Err(()),
    }
  }
}

/// Message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageType {
  Request = 0x01,
  Response = 0x02,
}

impl TryFrom<u8> for MessageType {
  type Error = ();
  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0x01 => Ok(Self::Request),
      0x02 => Ok(Self::Response),
      _ => Err(()),
    }
  }
}

/// Encoding formats
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Encoding {
  #[default]
  MessagePack = 0x01,
  Json = 0x02,
}

impl TryFrom<u8> for Encoding {
  type Error = ();
  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0x01 => Ok(Self::MessagePack),
      0x02 => Ok(Self::Json),
      _ => Err(()),
    }
  }
}

/// Flags in the handshake
#[derive(Debug, Clone, Copy)]
pub struct ProtocolFlags {
  pub messagepack: bool,
  pub json_fallback: bool,
}

impl ProtocolFlags {
  pub fn for_encoding(encoding: Encoding) -> Self {
    match encoding {
      Encoding::MessagePack => Self {
        messagepack: true,
        json_fallback: true,
      },
      Encoding::Json => Self {
        messagepack: false,
        json_fallback: true,
      },
    }
  }

  pub fn preferred_encoding(&self) -> Encoding {
    if self.messagepack {
      Encoding::MessagePack
    } else {
      Encoding::Json
    }
  }
}

impl From<u8> for ProtocolFlags {
  fn from(byte: u8) -> Self {
    Self {
      messagepack: byte & 0x01 != 0,
      json_fallback: byte & 0x02 != 0,
    }
  }
}

impl From<ProtocolFlags> for u8 {
  fn from(flags: ProtocolFlags) -> u8 {
    let mut byte = 0u8;
    if flags.messagepack {
      byte |= 0x01;
    }
    if flags.json_fallback {
      byte |= 0x02;
    }
    byte
  }
}

/// A decoded frame header plus its raw payload.
#[derive(Debug)]
pub struct Frame {
  pub msg_type: MessageType,
  pub encoding: Encoding,
  pub payload: Vec<u8>,
}

/// Server side of the handshake. Returns the session id and the encoding
/// the client prefers.
pub async fn accept_handshake<S>(stream: &mut S) -> Result<(Uuid, Encoding), anyhow::Error>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut magic = [0u8; 4];
  stream.read_exact(&mut magic).await?;
  if &magic != MAGIC {
    anyhow::bail!("Invalid magic bytes");
  }

  let version = stream.read_u8().await?;
  if version != PROTOCOL_VERSION {
    stream
      .write_u8(HandshakeStatus::VersionMismatch as u8)
      .await?;
    stream.write_u8(PROTOCOL_VERSION).await?;
    stream.write_u8(0).await?;
    stream.write_all(&[0u8; 16]).await?;
    stream.flush().await?;
    anyhow::bail!(
      "Protocol version mismatch: client={}, server={}",
      version,
      PROTOCOL_VERSION
    );
  }

  let flags_byte = stream.read_u8().await?;
  let encoding = ProtocolFlags::from(flags_byte).preferred_encoding();
  let session_id = Uuid::new_v4();

  stream.write_u8(HandshakeStatus::Success as u8).await?;
  stream.write_u8(PROTOCOL_VERSION).await?;
  stream.write_u8(flags_byte).await?;
  stream.write_all(session_id.as_bytes()).await?;
  stream.flush().await?;

  Ok((session_id, encoding))
}

/// Client side of the handshake.
pub async fn initiate_handshake<S>(stream: &mut S, encoding: Encoding) -> Result<Uuid, anyhow::Error>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  stream.write_all(MAGIC).await?;
  stream.write_u8(PROTOCOL_VERSION).await?;
  stream
    .write_u8(ProtocolFlags::for_encoding(encoding).into())
    .await?;
  stream.flush().await?;

  let status = stream.read_u8().await?;
  let server_version = stream.read_u8().await?;
  let _flags = stream.read_u8().await?;
  let mut session = [0u8; 16];
  stream.read_exact(&mut session).await?;

  match HandshakeStatus::try_from(status) {
    Ok(HandshakeStatus::Success) => Ok(Uuid::from_bytes(session)),
    Ok(HandshakeStatus::VersionMismatch) => anyhow::bail!(
      "Protocol version mismatch: client={}, server={}",
      PROTOCOL_VERSION,
      server_version
    ),
    Err(()) => anyhow::bail!("Invalid handshake status: {}", status),
  }
}

/// Read a framed message
pub async fn read_frame<R>(reader: &mut R, max_size: u32) -> Result<Frame, anyhow::Error>
where
  R: AsyncRead + Unpin,
{
  let length = reader.read_u32().await?;
  if length > max_size {
    anyhow::bail!("Message too large: {} > {}", length, max_size);
  }
  if length < 2 {
    anyhow::bail!("Frame too short: {}", length);
  }

  let msg_type_byte = reader.read_u8().await?;
  let msg_type = MessageType::try_from(msg_type_byte)
    .map_err(|_| anyhow::anyhow!("Invalid message type: {}", msg_type_byte))?;

  let encoding_byte = reader.read_u8().await?;
  let encoding = Encoding::try_from(encoding_byte)
    .map_err(|_| anyhow::anyhow!("Invalid encoding: {}", encoding_byte))?;

  let mut payload = vec![0u8; length as usize - 2]; // subtract type and encoding bytes
  reader.read_exact(&mut payload).await?;

  Ok(Frame {
    msg_type,
    encoding,
    payload,
  })
}

/// Write a framed message
pub async fn write_frame<W>(
  writer: &mut W,
  msg_type: MessageType,
  encoding: Encoding,
  payload: &[u8],
) -> Result<(), anyhow::Error>
where
  W: AsyncWrite + Unpin,
{
  let length = (payload.len() + 2) as u32; // +2 for type and encoding bytes

  writer.write_u32(length).await?;
  writer.write_u8(msg_type as u8).await?;
  writer.write_u8(encoding as u8).await?;
  writer.write_all(payload).await?;
  writer.flush().await?;

  Ok(())
}

/// Serialize a message with the given encoding
pub fn encode<T: Serialize>(msg: &T, encoding: Encoding) -> Result<Vec<u8>, anyhow::Error> {
  match encoding {
    Encoding::MessagePack => Ok(rmp_serde::to_vec_named(msg)?),
    Encoding::Json => Ok(serde_json::to_vec(msg)?),
  }
}

/// Deserialize a message with the given encoding
pub fn decode<T: DeserializeOwned>(data: &[u8], encoding: Encoding) -> Result<T, anyhow::Error> {
  match encoding {
    Encoding::MessagePack => Ok(rmp_serde::from_slice(data)?),
    Encoding::Json => Ok(serde_json::from_slice(data)?),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Request, Response, Status};

  #[test]
  fn test_protocol_flags() {
    let flags = ProtocolFlags {
      messagepack: true,
      json_fallback: false,
    };
    let byte: u8 = flags.into();
    assert_eq!(byte, 0x01);

    let flags = ProtocolFlags::from(0x03);
    assert!(flags.messagepack);
    assert!(flags.json_fallback);
    assert_eq!(flags.preferred_encoding(), Encoding::MessagePack);

    let flags = ProtocolFlags::from(0x02);
    assert_eq!(flags.preferred_encoding(), Encoding::Json);
  }

  #[test]
  fn test_message_type_conversion() {
    assert_eq!(MessageType::try_from(0x01), Ok(MessageType::Request));
    assert_eq!(MessageType::try_from(0x02), Ok(MessageType::Response));
    assert_eq!(MessageType::try_from(0x99), Err(()));
  }

  #[test]
  fn test_encoding_conversion() {
    assert_eq!(Encoding::try_from(0x01), Ok(Encoding::MessagePack));
    assert_eq!(Encoding::try_from(0x02), Ok(Encoding::Json));
    assert_eq!(Encoding::try_from(0x99), Err(()));
  }

  #[tokio::test]
  async fn test_frame_over_duplex() {
    let (mut a, mut b) = tokio::io::duplex(1024);
    let req = Request::Get {
      id: "1".into(),
      region: "Factorials".into(),
      key: serde_json::json!(5),
    };
    let payload = encode(&req, Encoding::MessagePack).unwrap();
    write_frame(&mut a, MessageType::Request, Encoding::MessagePack, &payload)
      .await
      .unwrap();

    let frame = read_frame(&mut b, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();
    assert_eq!(frame.msg_type, MessageType::Request);
    assert_eq!(frame.encoding, Encoding::MessagePack);
    match decode::<Request>(&frame.payload, frame.encoding).unwrap() {
      Request::Get { id, region, key } => {
        assert_eq!(id, "1");
        assert_eq!(region, "Factorials");
        assert_eq!(key, serde_json::json!(5));
      }
      other => panic!("unexpected request: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_oversized_frame_rejected() {
    let (mut a, mut b) = tokio::io::duplex(1024);
    write_frame(&mut a, MessageType::Request, Encoding::Json, &[0u8; 64])
      .await
      .unwrap();
    let err = read_frame(&mut b, 16).await.unwrap_err();
    assert!(err.to_string().contains("too large"));
  }

  #[tokio::test]
  async fn test_handshake() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let server_task = tokio::spawn(async move { accept_handshake(&mut server).await });
    let session = initiate_handshake(&mut client, Encoding::Json)
      .await
      .unwrap();
    let (server_session, encoding) = server_task.await.unwrap().unwrap();
    assert_eq!(session, server_session);
    assert_eq!(encoding, Encoding::Json);
  }

  #[tokio::test]
  async fn test_bad_magic_rejected() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    client.write_all(b"HTTP\x01\x01").await.unwrap();
    let err = accept_handshake(&mut server).await.unwrap_err();
    assert!(err.to_string().contains("magic"));
  }

  #[test]
  fn test_response_msgpack_keeps_value() {
    let resp = Response::ok("7", Some(serde_json::json!(120)));
    let bytes = encode(&resp, Encoding::MessagePack).unwrap();
    let back: Response = decode(&bytes, Encoding::MessagePack).unwrap();
    assert_eq!(back.status, Status::Ok);
    assert_eq!(back.value, Some(serde_json::json!(120)));
  }
}
