//! Errors produced while framing or decoding the wire protocol.

/// Failures that originate in the frame codec or the message catalog.
///
/// This is deliberately narrower than `retunnel_client`'s error taxonomy:
/// it only covers what can go wrong while turning bytes into a [`crate::Message`]
/// and back, not anything involving a live connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes exceeds the {1}-byte cap")]
    FrameTooLarge(u64, u64),

    #[error("frame declared length 0")]
    EmptyFrame,

    #[error("malformed msgpack payload: {0}")]
    Malformed(String),

    #[error("message is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("message carries an unexpected `Type` for this context: {0}")]
    UnexpectedType(String),
}
