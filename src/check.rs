use crate::error::Error;
use crate::msgs::enums::{ContentType, HandshakeType};
use crate::msgs::handshake::HandshakeMessagePayload;
use crate::msgs::message::{Message, MessagePayload};

/// For a Message $m, and a HandshakePayload enum member $payload_type,
/// return Ok(payload) if $m is both a handshake message and one that
/// has the given $payload_type.  If not, return Err(Error) quoting
/// $handshake_type as the expected handshake type.
macro_rules! require_handshake_msg(
  ( $m:expr, $handshake_type:path, $payload_type:path ) => (
    match $m.payload {
        crate::msgs::message::MessagePayload::Handshake(
            crate::msgs::handshake::HandshakeMessagePayload {
                payload: $payload_type(ref hsp), ..
            }) => Ok(hsp),
        _ => Err(crate::check::inappropriate_handshake_message_for(&$m, &[$handshake_type]))
    }
  )
);

/// Check `msg` is a ContentType and HandshakeType we expect.
pub(crate) fn check_message(
    msg: &Message,
    content_types: &[ContentType],
    handshake_types: &[HandshakeType],
) -> Result<(), Error> {
    if !content_types.contains(&msg.payload.content_type()) {
        return Err(inappropriate_message(msg, content_types));
    }

    if let MessagePayload::Handshake(hsp) = &msg.payload {
        if !handshake_types.is_empty() && !handshake_types.contains(&hsp.typ) {
            return Err(inappropriate_handshake_message(hsp, handshake_types));
        }
    }

    Ok(())
}

pub(crate) fn inappropriate_message(msg: &Message, content_types: &[ContentType]) -> Error {
    Error::InappropriateMessage {
        expect_types: content_types.to_vec(),
        got_type: msg.payload.content_type(),
    }
}

pub(crate) fn inappropriate_handshake_message(
    hsp: &HandshakeMessagePayload,
    handshake_types: &[HandshakeType],
) -> Error {
    Error::InappropriateHandshakeMessage {
        expect_types: handshake_types.to_vec(),
        got_type: hsp.typ,
    }
}

/// As `inappropriate_handshake_message`, but starting from a whole
/// message (which might not even be a handshake message).
pub(crate) fn inappropriate_handshake_message_for(
    msg: &Message,
    handshake_types: &[HandshakeType],
) -> Error {
    match &msg.payload {
        MessagePayload::Handshake(hsp) => inappropriate_handshake_message(hsp, handshake_types),
        _ => inappropriate_message(msg, &[ContentType::Handshake]),
    }
}
