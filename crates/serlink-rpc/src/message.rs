//! RPC envelope: `kind (1) | id (1) | name | 0x00 | payload`.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MessageError;

/// Smallest valid envelope: kind, id and an empty NUL-terminated name.
pub const MIN_MESSAGE_LEN: usize = 3;

const NAME_TERMINATOR: u8 = 0x00;

/// Message kind tag, the first byte of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Request = 0x0B,
    Stream = 0x0C,
    Response = 0x16,
    Error = 0x21,
}

impl MessageKind {
    /// Wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Stream => "stream",
            Self::Response => "response",
            Self::Error => "error",
        }
    }

    /// Replies complete a pending call; everything else is inbound work.
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = MessageError;

    fn try_from(tag: u8) -> Result<Self, MessageError> {
        match tag {
            0x0B => Ok(MessageKind::Request),
            0x0C => Ok(MessageKind::Stream),
            0x16 => Ok(MessageKind::Response),
            0x21 => Ok(MessageKind::Error),
            other => Err(MessageError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MessageKind,
    /// Correlation id. Replies echo the id of the request they answer.
    pub id: u8,
    /// Function (or stream topic) name.
    pub name: String,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(kind: MessageKind, id: u8, name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id,
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Number of bytes [`encode`](Self::encode) will append.
    pub fn encoded_len(&self) -> usize {
        MIN_MESSAGE_LEN + self.name.len() + self.payload.len()
    }

    /// Append the wire form to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), MessageError> {
        encode_message(self.kind, self.id, &self.name, &self.payload, dst)
    }

    /// Wire form as a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes, MessageError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse a frame payload. The returned payload shares `src`'s storage.
    ///
    /// Names that are not valid UTF-8 are decoded lossily.
    pub fn decode(src: Bytes) -> Result<Self, MessageError> {
        if src.len() < MIN_MESSAGE_LEN {
            return Err(MessageError::TooShort(src.len()));
        }
        let kind = MessageKind::try_from(src[0])?;
        let id = src[1];

        let name_len = src[2..]
            .iter()
            .position(|&b| b == NAME_TERMINATOR)
            .ok_or(MessageError::MissingNameTerminator)?;
        let name = String::from_utf8_lossy(&src[2..2 + name_len]).into_owned();
        let payload = src.slice(2 + name_len + 1..);

        Ok(Self {
            kind,
            id,
            name,
            payload,
        })
    }
}

/// Append an envelope to `dst` without building an [`Envelope`] first.
///
/// Fails if `name` contains a NUL byte, since the receiver could not tell
/// where the name ends.
pub fn encode_message(
    kind: MessageKind,
    id: u8,
    name: &str,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<(), MessageError> {
    if name.as_bytes().contains(&NAME_TERMINATOR) {
        return Err(MessageError::InvalidName(name.to_string()));
    }
    dst.reserve(MIN_MESSAGE_LEN + name.len() + payload.len());
    dst.put_u8(kind.tag());
    dst.put_u8(id);
    dst.put_slice(name.as_bytes());
    dst.put_u8(NAME_TERMINATOR);
    dst.put_slice(payload);
    Ok(())
}
