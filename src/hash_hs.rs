use crate::msgs::codec::Codec;
use crate::msgs::handshake::HandshakeMessagePayload;
use crate::msgs::message::{Message, MessagePayload};

use ring::digest;

/// Early-stage buffering of handshake payloads.
///
/// Before we know the hash algorithm to use to verify the handshake, we just buffer the messages.
/// During the handshake proper, we may restart the transcript due to a HelloRetryRequest, throwing
/// away the buffer and starting again with the synthetic `message_hash` message.
pub(crate) struct HandshakeHashBuffer {
    buffer: Vec<u8>,
}

impl HandshakeHashBuffer {
    pub(crate) fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Hash/buffer a handshake message.
    pub(crate) fn add_message(&mut self, m: &Message) {
        if let MessagePayload::Handshake(hs) = &m.payload {
            self.buffer
                .extend_from_slice(&hs.get_encoding());
        }
    }

    /// Get the hash value if we were to hash `extra` too.
    pub(crate) fn get_hash_given(
        &self,
        hash: &'static digest::Algorithm,
        extra: &[u8],
    ) -> digest::Digest {
        let mut ctx = digest::Context::new(hash);
        ctx.update(&self.buffer);
        ctx.update(extra);
        ctx.finish()
    }

    /// We now know what hash function the verify_data will use.
    pub(crate) fn start_hash(self, alg: &'static digest::Algorithm) -> HandshakeHash {
        let mut ctx = digest::Context::new(alg);
        ctx.update(&self.buffer);
        HandshakeHash { ctx }
    }
}

/// This deals with keeping a running hash of the handshake
/// payloads.  This is computed by buffering initially.  Once the
/// hash function is selected the buffer is replayed into an
/// incremental hash context and the buffer is discarded.
pub(crate) struct HandshakeHash {
    ctx: digest::Context,
}

impl HandshakeHash {
    /// The hash algorithm the transcript committed to.
    pub(crate) fn algorithm(&self) -> &'static digest::Algorithm {
        self.ctx.algorithm()
    }

    /// Hash a handshake message.
    pub(crate) fn add_message(&mut self, m: &Message) -> &mut Self {
        if let MessagePayload::Handshake(hs) = &m.payload {
            self.update_raw(&hs.get_encoding());
        }
        self
    }

    /// Hash some more data.
    fn update_raw(&mut self, buf: &[u8]) -> &mut Self {
        self.ctx.update(buf);
        self
    }

    /// Get the hash value if we were to hash `extra` too,
    /// using hash function `hash`.
    pub(crate) fn get_hash_given(&self, extra: &[u8]) -> digest::Digest {
        let mut ctx = self.ctx.clone();
        ctx.update(extra);
        ctx.finish()
    }

    /// The synthetic `message_hash` rewrite of RFC 8446 section
    /// 4.4.1: the transcript-so-far X becomes the single message
    /// `MessageHash(Hash(X))`, buffered again because the next
    /// ClientHello may negotiate afresh.
    pub(crate) fn into_hrr_buffer(self) -> HandshakeHashBuffer {
        let old_hash = self.ctx.finish();
        let old_handshake_hash_msg =
            HandshakeMessagePayload::build_handshake_hash(old_hash.as_ref());

        HandshakeHashBuffer {
            buffer: old_handshake_hash_msg.get_encoding(),
        }
    }

    /// Get the current hash value.
    pub(crate) fn get_current_hash(&self) -> digest::Digest {
        self.ctx.clone().finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::base::Payload;
    use crate::msgs::enums::HandshakeType;
    use crate::msgs::handshake::HandshakePayload;

    fn finished_message(data: &[u8]) -> Message {
        Message {
            payload: MessagePayload::Handshake(HandshakeMessagePayload {
                typ: HandshakeType::Finished,
                payload: HandshakePayload::Finished(Payload::new(data.to_vec())),
            }),
        }
    }

    #[test]
    fn buffer_and_incremental_hash_agree() {
        let m = finished_message(b"hello");

        let mut buffered = HandshakeHashBuffer::new();
        buffered.add_message(&m);
        let via_buffer = buffered.get_hash_given(&digest::SHA256, &[]);

        let buf = HandshakeHashBuffer::new();
        let mut incremental = buf.start_hash(&digest::SHA256);
        incremental.add_message(&m);
        let via_ctx = incremental.get_current_hash();

        assert_eq!(via_buffer.as_ref(), via_ctx.as_ref());
    }

    #[test]
    fn hrr_rewrite_is_the_synthetic_message_hash() {
        // transcript after the rewrite must equal
        // H(0xfe || 00 00 len || H(ClientHello1))
        let ch1 = finished_message(b"stand-in for ClientHello1");

        let mut buffer = HandshakeHashBuffer::new();
        buffer.add_message(&ch1);
        let transcript = buffer.start_hash(&digest::SHA256);
        let rewritten = transcript.into_hrr_buffer();
        let actual = rewritten.get_hash_given(&digest::SHA256, &[]);

        let ch1_encoding = match &ch1.payload {
            MessagePayload::Handshake(hs) => hs.get_encoding(),
            _ => unreachable!(),
        };
        let inner = digest::digest(&digest::SHA256, &ch1_encoding);
        let mut synthetic = vec![0xfeu8, 0x00, 0x00, inner.as_ref().len() as u8];
        synthetic.extend_from_slice(inner.as_ref());
        let expected = digest::digest(&digest::SHA256, &synthetic);

        assert_eq!(actual.as_ref(), expected.as_ref());
    }

    #[test]
    fn get_hash_given_does_not_disturb_running_hash() {
        let mut transcript = HandshakeHashBuffer::new().start_hash(&digest::SHA256);
        transcript.add_message(&finished_message(b"one"));
        let with_extra = transcript.get_hash_given(b"two");
        let without = transcript.get_current_hash();
        assert_ne!(with_extra.as_ref(), without.as_ref());

        // the running hash was not advanced by the peek
        let again = transcript.get_current_hash();
        assert_eq!(without.as_ref(), again.as_ref());
    }
}
