//! Error and notice field streams.
//!
//! The message body consists of one or more identified fields, followed by a
//! zero byte as a terminator. Fields can appear in any order. For each field
//! there is the following:
//!
//! `Byte1` A code identifying the field type; if zero, this is the message
//! terminator and no string follows. Since more field types might be added in
//! future, frontends should silently ignore fields of unrecognized type.
//!
//! `String` The field value.
use bytes::{Buf, Bytes};
use std::fmt;

use super::ProtocolError;
use crate::{common::ByteStr, ext::BytesExt};

/// Non-localized severity of an [`ErrorResponse`] or [`NoticeResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgSeverity {
    Error,
    Fatal,
    Panic,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
    /// Severity did not match any known value.
    ///
    /// The `S` field is localized on old servers, so an unrecognized value
    /// is not a protocol error.
    Unknown,
}

impl PgSeverity {
    fn parse(value: &str) -> PgSeverity {
        match value {
            "ERROR" => Self::Error,
            "FATAL" => Self::Fatal,
            "PANIC" => Self::Panic,
            "WARNING" => Self::Warning,
            "NOTICE" => Self::Notice,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "LOG" => Self::Log,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PgSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Panic => "PANIC",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Log => "LOG",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Decoded field stream shared by [`ErrorResponse`] and [`NoticeResponse`].
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Clone)]
pub struct ServerNotice {
    /// Severity parsed from the non-localized `V` field, falling back to `S`.
    pub severity: PgSeverity,
    /// Localized severity, always present.
    pub localized_severity: ByteStr,
    /// SQLSTATE code.
    pub code: ByteStr,
    /// Primary human-readable message.
    pub message: ByteStr,
    pub detail: Option<ByteStr>,
    pub hint: Option<ByteStr>,
    /// Error cursor position as an index into the original query string.
    pub position: Option<u32>,
    pub internal_position: Option<u32>,
    pub internal_query: Option<ByteStr>,
    /// Call stack context in which the error occurred.
    pub context: Option<ByteStr>,
    pub schema: Option<ByteStr>,
    pub table: Option<ByteStr>,
    pub column: Option<ByteStr>,
    pub data_type: Option<ByteStr>,
    pub constraint: Option<ByteStr>,
    pub file: Option<ByteStr>,
    pub line: Option<u32>,
    pub routine: Option<ByteStr>,
}

impl ServerNotice {
    pub(crate) fn decode(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut severity = None;
        let mut localized_severity = None;
        let mut code = None;
        let mut message = None;
        let mut detail = None;
        let mut hint = None;
        let mut position = None;
        let mut internal_position = None;
        let mut internal_query = None;
        let mut context = None;
        let mut schema = None;
        let mut table = None;
        let mut column = None;
        let mut data_type = None;
        let mut constraint = None;
        let mut file = None;
        let mut line = None;
        let mut routine = None;

        loop {
            if body.is_empty() {
                return Err(ProtocolError::Truncated);
            }
            let field = body.get_u8();
            if field == 0 {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match field {
                b'V' => severity = Some(value),
                b'S' => localized_severity = Some(value),
                b'C' => code = Some(value),
                b'M' => message = Some(value),
                b'D' => detail = Some(value),
                b'H' => hint = Some(value),
                b'P' => position = value.parse().ok(),
                b'p' => internal_position = value.parse().ok(),
                b'q' => internal_query = Some(value),
                b'W' => context = Some(value),
                b's' => schema = Some(value),
                b't' => table = Some(value),
                b'c' => column = Some(value),
                b'd' => data_type = Some(value),
                b'n' => constraint = Some(value),
                b'F' => file = Some(value),
                b'L' => line = value.parse().ok(),
                b'R' => routine = Some(value),
                // more field types might be added in future
                _ => {}
            }
        }

        let localized_severity = localized_severity.ok_or(ProtocolError::missing_field(b'S'))?;
        let code = code.ok_or(ProtocolError::missing_field(b'C'))?;
        let message = message.ok_or(ProtocolError::missing_field(b'M'))?;
        let severity = PgSeverity::parse(severity.as_deref().unwrap_or(&localized_severity));

        Ok(Self {
            severity,
            localized_severity,
            code,
            message,
            detail,
            hint,
            position,
            internal_position,
            internal_query,
            context,
            schema,
            table,
            column,
            data_type,
            constraint,
            file,
            line,
            routine,
        })
    }
}

impl fmt::Display for ServerNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.localized_severity, self.message, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, "\ndetail: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nhint: {hint}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn field_stream(fields: &[(u8, &str)]) -> Bytes {
        let mut buf = Vec::new();
        for (tag, value) in fields {
            buf.push(*tag);
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        buf.push(0);
        buf.into()
    }

    #[test]
    fn auth_failure_fields() {
        let body = field_stream(&[
            (b'S', "FATAL"),
            (b'C', "28P01"),
            (b'M', "password authentication failed"),
        ]);
        let notice = ServerNotice::decode(body).unwrap();
        assert_eq!(notice.severity, PgSeverity::Fatal);
        assert_eq!(notice.code, "28P01");
        assert_eq!(notice.message, "password authentication failed");
        assert_eq!(notice.detail, None);
    }

    #[test]
    fn nonlocalized_severity_wins() {
        let body = field_stream(&[
            (b'S', "FEHLER"),
            (b'V', "ERROR"),
            (b'C', "42601"),
            (b'M', "syntax error"),
            (b'P', "12"),
        ]);
        let notice = ServerNotice::decode(body).unwrap();
        assert_eq!(notice.severity, PgSeverity::Error);
        assert_eq!(notice.localized_severity, "FEHLER");
        assert_eq!(notice.position, Some(12));
    }

    #[test]
    fn unrecognized_field_is_skipped() {
        let body = field_stream(&[
            (b'S', "NOTICE"),
            (b'C', "00000"),
            (b'M', "done"),
            (b'Y', "future field"),
        ]);
        let notice = ServerNotice::decode(body).unwrap();
        assert_eq!(notice.severity, PgSeverity::Notice);
    }

    #[test]
    fn missing_code_is_rejected() {
        let body = field_stream(&[(b'S', "ERROR"), (b'M', "boom")]);
        let err = ServerNotice::decode(body).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField { field: b'C' }));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let mut buf = Vec::new();
        buf.push(b'S');
        buf.extend_from_slice(b"ERROR\0");
        let err = ServerNotice::decode(buf.into()).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }
}
