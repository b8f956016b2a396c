//! Protocol error
use std::str::Utf8Error;

/// Render a message type byte as its ascii tag.
fn tag(b: &u8) -> char {
    *b as char
}

/// An error when translating buffer from postgres.
///
/// Any instance of this error means the byte stream can no longer be trusted,
/// the connection must be torn down.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown backend message type {:?}", tag(.found))]
    Unknown {
        found: u8,
    },
    #[error("expected message type {:?}, found {:?}", tag(.expect), tag(.found))]
    Unexpected {
        expect: u8,
        found: u8,
    },
    #[error("unexpected {:?} during {phase}", tag(.found))]
    UnexpectedPhase {
        found: u8,
        phase: &'static str,
    },
    #[error("unknown authentication request {auth}")]
    UnknownAuth {
        auth: u32,
    },
    #[error("frame length {len} of message type {:?} is shorter than the length field", tag(.msgtype))]
    FrameLength {
        msgtype: u8,
        len: i32,
    },
    #[error("message body ended before all fields were read")]
    Truncated,
    #[error("missing nul termination in message string")]
    MissingNul,
    #[error("non UTF-8 message string: {0}")]
    Utf8(#[source] Utf8Error),
    #[error("missing required field {:?} in error response", tag(.field))]
    MissingField {
        field: u8,
    },
    #[error("missing {name:?} parameter status after startup")]
    MissingParameter {
        name: &'static str,
    },
    #[error("malformed server_version value {value:?}")]
    ServerVersion {
        value: String,
    },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unknown { found }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected { expect, found }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::UnexpectedPhase { found, phase }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn frame_length(msgtype: u8, len: i32) -> ProtocolError {
        Self::FrameLength { msgtype, len }
    }

    pub(crate) fn missing_nul() -> ProtocolError {
        Self::MissingNul
    }

    pub(crate) fn utf8(err: Utf8Error) -> ProtocolError {
        Self::Utf8(err)
    }

    pub(crate) fn missing_field(field: u8) -> ProtocolError {
        Self::MissingField { field }
    }

    pub(crate) fn missing_parameter(name: &'static str) -> ProtocolError {
        Self::MissingParameter { name }
    }

    pub(crate) fn server_version(value: &str) -> ProtocolError {
        Self::ServerVersion { value: value.into() }
    }
}
