//! Postgres Backend Messages
use bytes::{Buf, Bytes};

use super::{Oid, ProtocolError, notice::ServerNotice};
use crate::{common::ByteStr, ext::BytesExt};

/// A type that can be decoded from a postgres backend message.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ErrorResponse),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }

            /// Returns error for a message which arrived in a phase that
            /// cannot handle it.
            pub fn unexpected(&self, phase: &'static str) -> ProtocolError {
                ProtocolError::unexpected_phase(self.msgtype(), phase)
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, $typ));
        }
    };
}

macro_rules! assert_remaining {
    ($body:ident, $len:expr) => {
        if $body.remaining() < $len {
            return Err(ProtocolError::Truncated);
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// Specifies that GSSAPI authentication is required.
    GSS,
    /// GSSAPI or SSPI authentication data.
    GSSContinue {
        data: Bytes,
    },
    /// Specifies that SSPI authentication is required.
    SSPI,
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        assert_remaining!(body, 4);
        let auth = match body.get_u32() {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => {
                assert_remaining!(body, 4);
                Authentication::MD5Password { salt: body.get_u32().to_be_bytes() }
            }
            7 => Authentication::GSS,
            8 => Authentication::GSSContinue { data: body },
            9 => Authentication::SSPI,
            auth => return Err(ProtocolError::unknown_auth(auth)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// CancelRequest messages later.
#[derive(Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        assert_remaining!(body, 8);
        Ok(Self {
            process_id: body.get_u32(),
            secret_key: body.get_u32(),
        })
    }
}

/// Identifies the message as a run-time parameter status report
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported
    pub name: ByteStr,
    /// The current value of the parameter
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            name: body.get_nul_bytestr()?,
            value: body.get_nul_bytestr()?,
        })
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse(pub ServerNotice);

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self(ServerNotice::decode(body)?))
    }
}

impl std::ops::Deref for NoticeResponse {
    type Target = ServerNotice;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for NoticeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies the message as an error.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerNotice);

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self(ServerNotice::decode(body)?))
    }
}

impl std::ops::Deref for ErrorResponse {
    type Target = ServerNotice;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::error::Error for ErrorResponse { }

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies the message as an asynchronous notification from `NOTIFY`.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: u32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The “payload” string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        assert_remaining!(body, 4);
        Ok(Self {
            process_id: body.get_u32(),
            channel: body.get_nul_bytestr()?,
            payload: body.get_nul_bytestr()?,
        })
    }
}

/// Identifies the message as a row description.
#[derive(Debug)]
pub struct RowDescription {
    /// Specifies the number of fields in a row (can be zero).
    pub field_len: u16,
    /// Undecoded per-field descriptors.
    pub body: Bytes,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        assert_remaining!(body, 2);
        Ok(Self {
            field_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a data row.
///
/// Column values stay undecoded, extraction requires the preceding
/// [`RowDescription`].
#[derive(Debug)]
pub struct DataRow {
    /// The number of column values that follow (possibly zero).
    pub column_len: u16,
    pub body: Bytes,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        assert_remaining!(body, 2);
        Ok(Self {
            column_len: body.get_u16(),
            body,
        })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// Object IDs of the statement parameter data types.
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        assert_remaining!(body, 2);
        let len = body.get_u16() as usize;
        assert_remaining!(body, len * 4);
        let mut oids = Vec::with_capacity(len);
        for _ in 0..len {
            oids.push(body.get_u32());
        }
        Ok(Self { oids })
    }
}

/// Current backend transaction status carried by [`ReadyForQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    Idle,
    /// In a transaction block.
    InBlock,
    /// In a failed transaction block, queries will be rejected until block is ended.
    Failed,
}

/// ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        assert_remaining!(body, 1);
        let status = match body.get_u8() {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InBlock,
            b'E' => TransactionStatus::Failed,
            found => return Err(ProtocolError::unexpected_phase(found, "ReadyForQuery status")),
        };
        Ok(Self { status })
    }
}

/// Parsed command tag of a [`CommandComplete`] message.
///
/// For an INSERT command, the tag is `INSERT oid rows`, where rows is the
/// number of rows inserted. oid used to be the object ID of the inserted row
/// if rows was 1 and the target table had OIDs, but OIDs system columns are
/// not supported anymore; therefore oid is always 0.
///
/// For DELETE, UPDATE, SELECT (or CREATE TABLE AS), MOVE, FETCH and COPY the
/// tag is the command word followed by the affected row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    Insert { oid: Oid, rows: u64 },
    Delete { rows: u64 },
    Update { rows: u64 },
    Select { rows: u64 },
    Move { rows: u64 },
    Fetch { rows: u64 },
    Copy { rows: u64 },
    /// Any tag without a row count, e.g. `CREATE TABLE` or `BEGIN`.
    Ok,
}

impl CommandTag {
    fn parse(tag: &str) -> CommandTag {
        let (word, rest) = tag.split_once(' ').unwrap_or((tag, ""));

        if word == "INSERT" {
            let Some((oid, rows)) = rest.split_once(' ') else {
                return Self::Ok;
            };
            return match (oid.parse(), rows.parse()) {
                (Ok(oid), Ok(rows)) => Self::Insert { oid, rows },
                _ => Self::Ok,
            };
        }

        let Ok(rows) = rest.parse() else {
            return Self::Ok;
        };

        match word {
            "DELETE" => Self::Delete { rows },
            "UPDATE" => Self::Update { rows },
            "SELECT" => Self::Select { rows },
            "MOVE" => Self::Move { rows },
            "FETCH" => Self::Fetch { rows },
            "COPY" => Self::Copy { rows },
            _ => Self::Ok,
        }
    }

    /// Number of rows the completed command affected.
    pub fn rows_affected(&self) -> u64 {
        match *self {
            Self::Insert { rows, .. }
            | Self::Delete { rows }
            | Self::Update { rows }
            | Self::Select { rows }
            | Self::Move { rows }
            | Self::Fetch { rows }
            | Self::Copy { rows } => rows,
            Self::Ok => 0,
        }
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete {
    /// The parsed command tag.
    pub tag: CommandTag,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let tag = body.get_nul_bytestr()?;
        Ok(Self { tag: CommandTag::parse(&tag) })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected(Self::MSGTYPE, msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use super::*;

    fn nul(s: &str) -> Bytes {
        let mut buf = s.as_bytes().to_vec();
        buf.push(0);
        buf.into()
    }

    #[test]
    fn auth_subcodes() {
        let ok = Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 0])).unwrap();
        assert!(matches!(ok, Authentication::Ok));

        let cleartext = Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 3])).unwrap();
        assert!(matches!(cleartext, Authentication::CleartextPassword));

        let md5 = Authentication::decode(
            b'R',
            Bytes::from_static(&[0, 0, 0, 5, 0x11, 0x22, 0x33, 0x44]),
        ).unwrap();
        assert!(matches!(md5, Authentication::MD5Password { salt: [0x11, 0x22, 0x33, 0x44] }));

        let unknown = Authentication::decode(b'R', Bytes::from_static(&[0, 0, 0, 42]));
        assert!(matches!(unknown, Err(ProtocolError::UnknownAuth { auth: 42 })));
    }

    #[test]
    fn ready_for_query_status() {
        let idle = ReadyForQuery::decode(b'Z', Bytes::from_static(b"I")).unwrap();
        assert_eq!(idle.status, TransactionStatus::Idle);

        let block = ReadyForQuery::decode(b'Z', Bytes::from_static(b"T")).unwrap();
        assert_eq!(block.status, TransactionStatus::InBlock);

        let failed = ReadyForQuery::decode(b'Z', Bytes::from_static(b"E")).unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);

        assert!(ReadyForQuery::decode(b'Z', Bytes::from_static(b"X")).is_err());
    }

    #[test]
    fn command_tags() {
        let insert = CommandComplete::decode(b'C', nul("INSERT 1234 5")).unwrap();
        assert_eq!(insert.tag, CommandTag::Insert { oid: 1234, rows: 5 });

        let select = CommandComplete::decode(b'C', nul("SELECT 0")).unwrap();
        assert_eq!(select.tag, CommandTag::Select { rows: 0 });

        let update = CommandComplete::decode(b'C', nul("UPDATE 321")).unwrap();
        assert_eq!(update.tag.rows_affected(), 321);

        let unknown = CommandComplete::decode(b'C', nul("FOO BAR")).unwrap();
        assert_eq!(unknown.tag, CommandTag::Ok);

        let bare = CommandComplete::decode(b'C', nul("BEGIN")).unwrap();
        assert_eq!(bare.tag, CommandTag::Ok);
    }

    #[test]
    fn notification_fields() {
        let mut body = vec![0, 0, 0, 7];
        body.extend_from_slice(b"jobs\0");
        body.extend_from_slice(b"42\0");
        let n = NotificationResponse::decode(b'A', body.into()).unwrap();
        assert_eq!(n.process_id, 7);
        assert_eq!(n.channel, "jobs");
        assert_eq!(n.payload, "42");
    }

    #[test]
    fn parameter_description_oids() {
        let body = Bytes::from_static(&[0, 2, 0, 0, 0, 23, 0, 0, 0, 25]);
        let pd = ParameterDescription::decode(b't', body).unwrap();
        assert_eq!(pd.oids, vec![23, 25]);
    }

    #[test]
    fn unknown_tag_fails_loud() {
        let err = BackendMessage::decode(b'@', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Unknown { found: b'@' }));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let err = BackendKeyData::decode(b'K', Bytes::from_static(&[0, 0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }
}
