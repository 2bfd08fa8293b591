use crate::msgs::base::Payload;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{ContentType, HandshakeType, KeyUpdateRequest};
use crate::msgs::handshake::{HandshakeMessagePayload, HandshakePayload};

/// The contents of a message delivered by (or destined for) the
/// record layer, after decryption and defragmentation.
#[derive(Debug)]
pub enum MessagePayload {
    Handshake(HandshakeMessagePayload),
    ChangeCipherSpec,
    ApplicationData(Payload),
}

impl MessagePayload {
    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Handshake(_) => ContentType::Handshake,
            Self::ChangeCipherSpec => ContentType::ChangeCipherSpec,
            Self::ApplicationData(_) => ContentType::ApplicationData,
        }
    }
}

/// A message the handshake engine consumes or produces.
///
/// The record layer has already stripped record framing and
/// protection; handshake messages arrive whole.
#[derive(Debug)]
pub struct Message {
    pub payload: MessagePayload,
}

impl Message {
    pub fn is_handshake_type(&self, hstyp: HandshakeType) -> bool {
        // Bit of a layering violation, but OK.
        if let MessagePayload::Handshake(ref hsp) = self.payload {
            hsp.typ == hstyp
        } else {
            false
        }
    }

    /// Parse a whole handshake message from its wire encoding.
    /// Trailing bytes after the declared length are an error.
    pub fn read_handshake(bytes: &[u8]) -> Option<Self> {
        let mut r = Reader::init(bytes);
        let hmp = HandshakeMessagePayload::read(&mut r)?;
        if r.any_left() {
            return None;
        }

        Some(Self {
            payload: MessagePayload::Handshake(hmp),
        })
    }

    pub fn build_key_update_notify() -> Self {
        Self {
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::KeyUpdate,
                payload: HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateNotRequested),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_message_with_trailing_bytes_is_rejected() {
        let mut enc = Message::build_key_update_notify();
        let mut bytes = Vec::new();
        match &mut enc.payload {
            MessagePayload::Handshake(hmp) => hmp.encode(&mut bytes),
            _ => unreachable!(),
        }
        assert!(Message::read_handshake(&bytes).is_some());
        bytes.push(0);
        assert!(Message::read_handshake(&bytes).is_none());
    }
}
