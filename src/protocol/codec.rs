//! Binary wire format.
//!
//! Every datagram starts with a one-byte discriminator. Integers are `u32`
//! big-endian. Variable-length fields are preceded by an explicit length and
//! are never terminated: nicknames and chat text travel as UTF-16 code units
//! (length counts units), file names and actions as UTF-8 bytes, payloads as
//! raw bytes. Bytes after a complete message are ignored.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::Encoder;

use super::message::{Message, SystemAction};
use crate::core::{Error, PeerId, BLOCK_SIZE, PEER_ID_SIZE};

const TAG_SYSTEM: u8 = 0;
const TAG_PEER_ANNOUNCE: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_TRANSFER_ANNOUNCE: u8 = 3;
const TAG_DATA_BLOCK: u8 = 4;
const TAG_BLOCK_REQUEST: u8 = 5;

/// Fixed part of a `DataBlock`: tag, three integers and the peer id
pub const DATA_BLOCK_HEADER_LEN: usize = 1 + 3 * 4 + PEER_ID_SIZE;

/// Why a datagram could not be decoded. The datagram is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown discriminator {0}")]
    UnknownDiscriminator(u8),
    #[error("truncated datagram: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
    #[error("block of {0} bytes exceeds the block size limit")]
    BlockTooLarge(u32),
    #[error("text field is not valid unicode")]
    InvalidText,
    #[error("peer id is not printable ascii")]
    InvalidPeerId,
}

/// Encodes a message into a fresh buffer
pub fn encode(message: &Message) -> Bytes {
    let mut dst = BytesMut::with_capacity(encoded_len(message));
    encode_into(message, &mut dst);
    dst.freeze()
}

/// Size of the encoded form, without encoding
pub fn encoded_len(message: &Message) -> usize {
    match message {
        Message::System { action, .. } => 1 + PEER_ID_SIZE + 4 + action.to_wire().len(),
        Message::PeerAnnounce { nickname, .. } => 1 + 4 + PEER_ID_SIZE + utf16_len(nickname) * 2,
        Message::Text { content, .. } => 1 + 4 + PEER_ID_SIZE + utf16_len(content) * 2,
        Message::TransferAnnounce { file_name, .. } => 1 + 3 * 4 + PEER_ID_SIZE + file_name.len(),
        Message::DataBlock { payload, .. } => DATA_BLOCK_HEADER_LEN + payload.len(),
        Message::BlockRequest { .. } => 1 + 2 * 4 + PEER_ID_SIZE,
    }
}

/// Appends the encoded message to `dst`
pub fn encode_into(message: &Message, dst: &mut BytesMut) {
    dst.reserve(encoded_len(message));
    match message {
        Message::System { peer_id, action } => {
            let action = action.to_wire();
            dst.put_u8(TAG_SYSTEM);
            dst.put_slice(peer_id.as_bytes());
            dst.put_u32(action.len() as u32);
            dst.put_slice(action.as_bytes());
        }
        Message::PeerAnnounce { peer_id, nickname } => {
            dst.put_u8(TAG_PEER_ANNOUNCE);
            dst.put_u32(utf16_len(nickname) as u32);
            dst.put_slice(peer_id.as_bytes());
            put_utf16(dst, nickname);
        }
        Message::Text { peer_id, content } => {
            dst.put_u8(TAG_TEXT);
            dst.put_u32(utf16_len(content) as u32);
            dst.put_slice(peer_id.as_bytes());
            put_utf16(dst, content);
        }
        Message::TransferAnnounce {
            transfer_id,
            total_blocks,
            file_name,
            peer_id,
        } => {
            dst.put_u8(TAG_TRANSFER_ANNOUNCE);
            dst.put_u32(*transfer_id);
            dst.put_u32(*total_blocks);
            dst.put_u32(file_name.len() as u32);
            dst.put_slice(peer_id.as_bytes());
            dst.put_slice(file_name.as_bytes());
        }
        Message::DataBlock {
            transfer_id,
            block_index,
            payload,
            peer_id,
        } => {
            dst.put_u8(TAG_DATA_BLOCK);
            dst.put_u32(*transfer_id);
            dst.put_u32(*block_index);
            dst.put_u32(payload.len() as u32);
            dst.put_slice(peer_id.as_bytes());
            dst.put_slice(payload);
        }
        Message::BlockRequest {
            transfer_id,
            block_index,
            peer_id,
        } => {
            dst.put_u8(TAG_BLOCK_REQUEST);
            dst.put_u32(*transfer_id);
            dst.put_u32(*block_index);
            dst.put_slice(peer_id.as_bytes());
        }
    }
}

/// Decodes one datagram
pub fn decode(src: &[u8]) -> Result<Message, DecodeError> {
    let mut reader = Reader::new(src);
    let tag = reader.u8().map_err(|_| DecodeError::Empty)?;
    match tag {
        TAG_SYSTEM => {
            let peer_id = reader.peer_id()?;
            let len = reader.u32()? as usize;
            let action = reader.utf8(len)?;
            Ok(Message::System {
                peer_id,
                action: SystemAction::from_wire(&action),
            })
        }
        TAG_PEER_ANNOUNCE => {
            let units = reader.u32()? as usize;
            let peer_id = reader.peer_id()?;
            let nickname = reader.utf16(units)?;
            Ok(Message::PeerAnnounce { peer_id, nickname })
        }
        TAG_TEXT => {
            let units = reader.u32()? as usize;
            let peer_id = reader.peer_id()?;
            let content = reader.utf16(units)?;
            Ok(Message::Text { peer_id, content })
        }
        TAG_TRANSFER_ANNOUNCE => {
            let transfer_id = reader.u32()?;
            let total_blocks = reader.u32()?;
            let len = reader.u32()? as usize;
            let peer_id = reader.peer_id()?;
            let file_name = reader.utf8(len)?;
            Ok(Message::TransferAnnounce {
                transfer_id,
                total_blocks,
                file_name,
                peer_id,
            })
        }
        TAG_DATA_BLOCK => {
            let transfer_id = reader.u32()?;
            let block_index = reader.u32()?;
            let size = reader.u32()?;
            if size as usize > BLOCK_SIZE {
                return Err(DecodeError::BlockTooLarge(size));
            }
            let peer_id = reader.peer_id()?;
            let payload = reader.take(size as usize)?.to_vec();
            Ok(Message::DataBlock {
                transfer_id,
                block_index,
                payload,
                peer_id,
            })
        }
        TAG_BLOCK_REQUEST => {
            let transfer_id = reader.u32()?;
            let block_index = reader.u32()?;
            let peer_id = reader.peer_id()?;
            Ok(Message::BlockRequest {
                transfer_id,
                block_index,
                peer_id,
            })
        }
        other => Err(DecodeError::UnknownDiscriminator(other)),
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn put_utf16(dst: &mut BytesMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16(unit);
    }
}

/// Bounds-checked cursor over a datagram
struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader {
            buf,
            total: buf.len(),
        }
    }

    fn ensure(&self, len: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < len {
            return Err(DecodeError::Truncated {
                needed: (self.total - self.buf.remaining()).saturating_add(len),
                available: self.total,
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn peer_id(&mut self) -> Result<PeerId, DecodeError> {
        let mut bytes = [0u8; PEER_ID_SIZE];
        bytes.copy_from_slice(self.take(PEER_ID_SIZE)?);
        PeerId::from_bytes(bytes).ok_or(DecodeError::InvalidPeerId)
    }

    fn utf8(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidText)
    }

    fn utf16(&mut self, units: usize) -> Result<String, DecodeError> {
        let mut bytes = self.take(units.saturating_mul(2))?;
        let units: Vec<u16> = (0..units).map(|_| bytes.get_u16()).collect();
        String::from_utf16(&units).map_err(|_| DecodeError::InvalidText)
    }
}

/// Datagram encoder used by the send loop: one message per buffer
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new message codec
    pub fn new() -> Self {
        MessageCodec
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let bytes = encode(&message);
        assert_eq!(bytes.len(), encoded_len(&message));
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_roundtrip_every_variant() {
        let peer_id = PeerId::random();
        roundtrip(Message::System {
            peer_id,
            action: SystemAction::TransferComplete(u32::MAX),
        });
        for wire in ["", "alive", "done:+5", "done:05"] {
            roundtrip(Message::System {
                peer_id,
                action: SystemAction::from_wire(wire),
            });
        }
        roundtrip(Message::PeerAnnounce {
            peer_id,
            nickname: "Zoë 🚀".into(),
        });
        roundtrip(Message::PeerAnnounce {
            peer_id,
            nickname: String::new(),
        });
        roundtrip(Message::Text {
            peer_id,
            content: "nul\0inside, привет".into(),
        });
        roundtrip(Message::Text {
            peer_id,
            content: String::new(),
        });
        roundtrip(Message::TransferAnnounce {
            transfer_id: 3,
            total_blocks: 0,
            file_name: String::new(),
            peer_id,
        });
        roundtrip(Message::TransferAnnounce {
            transfer_id: 9,
            total_blocks: 12,
            file_name: "report.pdf".into(),
            peer_id,
        });
        roundtrip(Message::DataBlock {
            transfer_id: 1,
            block_index: 0,
            payload: Vec::new(),
            peer_id,
        });
        roundtrip(Message::DataBlock {
            transfer_id: 1,
            block_index: 7,
            payload: (0..BLOCK_SIZE).map(|i| (i % 7) as u8).collect(),
            peer_id,
        });
        roundtrip(Message::BlockRequest {
            transfer_id: 5,
            block_index: 2,
            peer_id,
        });
    }

    #[test]
    fn test_layout_is_big_endian() {
        let peer_id: PeerId = "ABCDEFGHIJKLMNOPQRST".parse().unwrap();
        let bytes = encode(&Message::BlockRequest {
            transfer_id: 0x0102_0304,
            block_index: 5,
            peer_id,
        });
        assert_eq!(bytes[0], TAG_BLOCK_REQUEST);
        assert_eq!(&bytes[1..5], &[1, 2, 3, 4]);
        assert_eq!(&bytes[5..9], &[0, 0, 0, 5]);
        assert_eq!(&bytes[9..], b"ABCDEFGHIJKLMNOPQRST");

        let bytes = encode(&Message::Text {
            peer_id,
            content: "hi".into(),
        });
        // length counts UTF-16 units, not bytes
        assert_eq!(&bytes[1..5], &[0, 0, 0, 2]);
        assert_eq!(&bytes[25..], &[0, b'h', 0, b'i']);
    }

    #[test]
    fn test_truncated_datagrams_fail() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));

        let bytes = encode(&Message::BlockRequest {
            transfer_id: 1,
            block_index: 1,
            peer_id: PeerId::random(),
        });
        for len in 1..bytes.len() {
            assert!(
                matches!(decode(&bytes[..len]), Err(DecodeError::Truncated { .. })),
                "prefix of {} bytes decoded",
                len
            );
        }
    }

    #[test]
    fn test_length_past_end_fails() {
        let mut bytes = BytesMut::from(
            &encode(&Message::DataBlock {
                transfer_id: 1,
                block_index: 0,
                payload: vec![1, 2, 3],
                peer_id: PeerId::random(),
            })[..],
        );
        // declare four payload bytes while carrying three
        bytes[9..13].copy_from_slice(&4u32.to_be_bytes());
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::Truncated {
                needed: DATA_BLOCK_HEADER_LEN + 4,
                available: DATA_BLOCK_HEADER_LEN + 3,
            })
        );

        let mut bytes = BytesMut::from(
            &encode(&Message::Text {
                peer_id: PeerId::random(),
                content: "abc".into(),
            })[..],
        );
        bytes[1..5].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(decode(&bytes), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut bytes = BytesMut::new();
        bytes.put_u8(TAG_DATA_BLOCK);
        bytes.put_u32(1);
        bytes.put_u32(0);
        bytes.put_u32(BLOCK_SIZE as u32 + 1);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::BlockTooLarge(BLOCK_SIZE as u32 + 1))
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(decode(&[42]), Err(DecodeError::UnknownDiscriminator(42)));

        let mut bytes = BytesMut::new();
        bytes.put_u8(TAG_BLOCK_REQUEST);
        bytes.put_u32(1);
        bytes.put_u32(1);
        bytes.put_slice(&[0u8; PEER_ID_SIZE]);
        assert_eq!(decode(&bytes), Err(DecodeError::InvalidPeerId));

        let mut bytes = BytesMut::new();
        bytes.put_u8(TAG_TEXT);
        bytes.put_u32(1);
        bytes.put_slice(PeerId::random().as_bytes());
        // lone surrogate
        bytes.put_u16(0xD800);
        assert_eq!(decode(&bytes), Err(DecodeError::InvalidText));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let message = Message::System {
            peer_id: PeerId::random(),
            action: SystemAction::Ping,
        };
        let mut bytes = BytesMut::from(&encode(&message)[..]);
        bytes.put_slice(&[0u8; 16]);
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_encoder_appends_one_message() {
        let mut codec = MessageCodec::new();
        let mut bytes = BytesMut::new();

        let message = Message::PeerAnnounce {
            peer_id: PeerId::random(),
            nickname: "alice".into(),
        };

        codec.encode(message.clone(), &mut bytes).unwrap();
        assert_eq!(&bytes[..], &encode(&message)[..]);
        assert_eq!(decode(&bytes).unwrap(), message);
    }
}
