//! Postgres startup phase.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use bytes::Bytes;
use std::{borrow::Cow, collections::HashMap, fmt};

use crate::{
    Result,
    common::ByteStr,
    postgres::{BackendMessage, ProtocolError, backend, frontend},
    transport::{PgTransport, PgTransportExt},
};

/// Config for postgres startup phase.
pub struct StartupConfig<'a> {
    pub(crate) user: Cow<'a, str>,
    pub(crate) database: Option<Cow<'a, str>>,
    pub(crate) password: Option<Cow<'a, str>>,
    pub(crate) replication: Option<Cow<'a, str>>,
}

/// Server parameters captured during the startup phase.
///
/// Immutable for the rest of the connection lifetime. Parameters other than
/// these three are observed but not stored.
#[derive(Debug, Clone)]
pub struct ServerParams {
    pub(crate) version: ServerVersion,
    pub(crate) encoding: Bytes,
    pub(crate) integer_datetimes: bool,
}

impl ServerParams {
    pub fn version(&self) -> &ServerVersion {
        &self.version
    }

    /// Raw `server_encoding` value, e.g. `UTF8`.
    pub fn encoding(&self) -> &[u8] {
        &self.encoding
    }

    /// Whether binary temporal values are 64-bit microsecond counts.
    pub fn integer_datetimes(&self) -> bool {
        self.integer_datetimes
    }
}

/// Parsed `server_version` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub revision: u16,
    /// Whatever the server appends after the numeric part,
    /// e.g. ` (Debian 14.2-1)` or `beta1`.
    pub descriptor: ByteStr,
}

impl ServerVersion {
    /// Split the leading `[0-9.]` run on `.`, missing components default
    /// to zero, the remainder is retained verbatim.
    fn parse(value: &ByteStr) -> Result<Self, ProtocolError> {
        let end = value
            .find(|c: char| !matches!(c, '0'..='9' | '.'))
            .unwrap_or(value.len());
        let (num, rest) = value.split_at(end);

        if !num.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ProtocolError::server_version(value));
        }

        let mut parts = num.split('.');
        let mut component = || -> Result<u16, ProtocolError> {
            match parts.next() {
                None | Some("") => Ok(0),
                Some(part) => part.parse().map_err(|_| ProtocolError::server_version(value)),
            }
        };

        Ok(Self {
            major: component()?,
            minor: component()?,
            revision: component()?,
            descriptor: value.slice_ref(rest),
        })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}{}", self.major, self.minor, self.revision, self.descriptor)
    }
}

/// The server requested an authentication mechanism this library does not speak.
pub struct UnsupportedAuth {
    pub(crate) mechanism: &'static str,
}

impl UnsupportedAuth {
    fn new(mechanism: &'static str) -> Self {
        Self { mechanism }
    }

    pub fn mechanism(&self) -> &'static str {
        self.mechanism
    }
}

impl std::error::Error for UnsupportedAuth { }

impl fmt::Display for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication method {} is not supported", self.mechanism)
    }
}

impl fmt::Debug for UnsupportedAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Salted md5 password response.
///
/// Both digests render as 32 lowercase hex characters.
pub(crate) fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    use std::fmt::Write;

    let inner = md5::compute([password.as_bytes(), user.as_bytes()].concat());

    let mut outer_input = format!("{inner:x}").into_bytes();
    outer_input.extend_from_slice(&salt);
    let outer = md5::compute(outer_input);

    let mut response = String::with_capacity(35);
    response.push_str("md5");
    write!(&mut response, "{outer:x}").unwrap();
    response
}

/// Perform a startup message.
///
/// The caller owns the transport and must close it when this returns an
/// error after the socket is open.
///
/// <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
pub async fn startup<'a, IO: PgTransport>(
    opt: impl Into<StartupConfig<'a>>,
    mut io: IO,
) -> Result<ServerParams> {
    let opt: StartupConfig = opt.into();

    // To begin a session, a frontend opens a connection to the server and sends a startup message.

    io.send_startup(frontend::Startup {
        user: opt.user(),
        database: opt.database(),
        replication: opt.replication(),
    });
    io.flush().await?;

    // The server then sends an appropriate authentication request message,
    // to which the frontend must reply with an appropriate authentication response message (such as a password).
    //
    // For all authentication methods except GSSAPI, SSPI and SASL, there is at most one request and one response.

    loop {
        use backend::Authentication::*;
        match io.recv().await? {
            // we gucci
            Ok => break,
            // The frontend must now send a PasswordMessage containing the password in clear-text form.
            CleartextPassword => {
                io.send(frontend::PasswordMessage { password: opt.password().unwrap_or_default() });
                io.flush().await?;
            }
            // The frontend must now send a PasswordMessage containing the password (with user name)
            // encrypted via MD5, then encrypted again using the 4-byte random salt.
            MD5Password { salt } => {
                let password = md5_password(opt.user(), opt.password().unwrap_or_default(), salt);
                io.send(frontend::PasswordMessage { password: &password });
                io.flush().await?;
            }
            GSS => Err(UnsupportedAuth::new("GSSAPI"))?,
            GSSContinue { .. } => Err(UnsupportedAuth::new("GSSAPI continuation"))?,
            SSPI => Err(UnsupportedAuth::new("SSPI"))?,
        }
    }

    // After having received AuthenticationOk, the frontend must wait for further messages from the server.
    // In this phase a backend process is being started, and the frontend is just an interested bystander.
    // It is still possible for the startup attempt to fail (ErrorResponse), but in the normal case the
    // backend will send some ParameterStatus messages, BackendKeyData, and finally ReadyForQuery.

    let mut params = HashMap::new();

    loop {
        use BackendMessage::*;
        match io.recv().await? {
            ReadyForQuery(_) => break,
            ParameterStatus(ps) => {
                params.insert(ps.name, ps.value);
            }
            // only parameter reports matter here
            _ => {}
        }
    }

    let version = match params.get("server_version") {
        Some(value) => ServerVersion::parse(value)?,
        None => Err(ProtocolError::missing_parameter("server_version"))?,
    };

    let encoding = match params.get("server_encoding") {
        Some(value) => Bytes::copy_from_slice(value.as_bytes()),
        None => Err(ProtocolError::missing_parameter("server_encoding"))?,
    };

    let integer_datetimes = match params.get("integer_datetimes") {
        Some(value) => matches!(value.as_str(), "on" | "yes" | "1"),
        None => Err(ProtocolError::missing_parameter("integer_datetimes"))?,
    };

    Ok(ServerParams { version, encoding, integer_datetimes })
}

impl<'a> StartupConfig<'a> {
    /// Create new config, the database user name is required.
    pub fn new(user: impl Into<Cow<'a, str>>) -> Self {
        Self { user: user.into(), database: None, password: None, replication: None }
    }

    /// The database user name to connect as.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The database to connect to. Defaults to the user name.
    pub fn database(&self) -> Option<&str> {
        self.database.as_ref().map(<_>::as_ref)
    }

    /// The database to connect to. Defaults to the user name.
    pub fn set_database(&mut self, database: impl Into<Cow<'a, str>>) {
        self.database = Some(database.into());
    }

    /// Authentication password, the default is empty string.
    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(<_>::as_ref)
    }

    /// Authentication password, the default is empty string.
    pub fn set_password(&mut self, password: impl Into<Cow<'a, str>>) {
        self.password = Some(password.into());
    }

    /// Used to connect in streaming replication mode, where a small set of replication commands can be issued
    /// instead of SQL statements.
    ///
    /// Value can be true, false, or database, and the default is false.
    pub fn replication(&self) -> Option<&str> {
        self.replication.as_ref().map(<_>::as_ref)
    }

    /// Used to connect in streaming replication mode, where a small set of replication commands can be issued
    /// instead of SQL statements.
    ///
    /// Value can be true, false, or database, and the default is false.
    pub fn set_replication(&mut self, replication: impl Into<Cow<'a, str>>) {
        self.replication = Some(replication.into());
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, Bytes, BytesMut};
    use std::{
        collections::VecDeque,
        task::{Context, Poll},
    };

    use super::*;
    use crate::{
        ErrorKind,
        postgres::{BackendProtocol, FrontendProtocol, PgSeverity, backend::ErrorResponse},
    };

    /// Transport fed from a script instead of a socket.
    struct MockIo {
        script: VecDeque<(u8, Bytes)>,
        sent: BytesMut,
    }

    impl MockIo {
        fn new(script: impl IntoIterator<Item = (u8, Bytes)>) -> Self {
            Self { script: script.into_iter().collect(), sent: BytesMut::new() }
        }

        /// Split the recorded frontend traffic into (msgtype, body) pairs,
        /// the tagless startup message first with a zero type.
        fn sent_messages(mut self) -> Vec<(u8, Vec<u8>)> {
            use bytes::Buf;

            let startup_len = (&self.sent[..4]).get_u32() as usize;
            let mut messages = vec![(0, self.sent.split_to(startup_len).to_vec())];

            while !self.sent.is_empty() {
                let msgtype = self.sent.get_u8();
                let len = self.sent.get_u32() as usize;
                messages.push((msgtype, self.sent.split_to(len - 4).to_vec()));
            }
            messages
        }
    }

    impl PgTransport for MockIo {
        fn poll_flush(&mut self, _: &mut Context) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_recv<B: BackendProtocol>(&mut self, _: &mut Context) -> Poll<crate::Result<B>> {
            let (msgtype, body) = self.script.pop_front().expect("script exhausted");
            if msgtype == ErrorResponse::MSGTYPE {
                let err = ErrorResponse::decode(msgtype, body).unwrap();
                return Poll::Ready(Err(err.into()));
            }
            Poll::Ready(Ok(B::decode(msgtype, body)?))
        }

        fn send<F: FrontendProtocol>(&mut self, message: F) {
            frontend::write(message, &mut self.sent);
        }

        fn send_startup(&mut self, startup: frontend::Startup) {
            startup.write(&mut self.sent);
        }
    }

    fn auth(code: u32) -> (u8, Bytes) {
        (b'R', Bytes::from(code.to_be_bytes().to_vec()))
    }

    fn param(name: &str, value: &str) -> (u8, Bytes) {
        let mut body = BytesMut::new();
        body.extend_from_slice(name.as_bytes());
        body.put_u8(0);
        body.extend_from_slice(value.as_bytes());
        body.put_u8(0);
        (b'S', body.freeze())
    }

    fn ready(status: u8) -> (u8, Bytes) {
        (b'Z', Bytes::copy_from_slice(&[status]))
    }

    fn config() -> StartupConfig<'static> {
        let mut opt = StartupConfig::new("u");
        opt.set_database("d");
        opt.set_password("p");
        opt
    }

    #[tokio::test]
    async fn cleartext_handshake() {
        let mut io = MockIo::new([
            auth(3),
            auth(0),
            param("server_version", "9.6.3"),
            param("server_encoding", "UTF8"),
            param("integer_datetimes", "on"),
            ready(b'I'),
        ]);

        let params = startup(config(), &mut io).await.unwrap();

        assert_eq!(params.version.major, 9);
        assert_eq!(params.version.minor, 6);
        assert_eq!(params.version.revision, 3);
        assert_eq!(params.version.descriptor, "");
        assert_eq!(params.encoding(), b"UTF8");
        assert!(params.integer_datetimes());

        let sent = io.sent_messages();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.ends_with(b"user\0u\0database\0d\0\0"));
        assert_eq!(sent[1], (b'p', b"p\0".to_vec()));
    }

    #[tokio::test]
    async fn md5_handshake() {
        let mut io = MockIo::new([
            (b'R', Bytes::from([0, 0, 0, 5, 0x11, 0x22, 0x33, 0x44].to_vec())),
            auth(0),
            param("server_version", "14.2 (Debian 14.2-1)"),
            param("server_encoding", "UTF8"),
            param("integer_datetimes", "yes"),
            ready(b'I'),
        ]);

        let mut opt = StartupConfig::new("a");
        opt.set_password("b");
        let params = startup(opt, &mut io).await.unwrap();

        assert_eq!(params.version.major, 14);
        assert_eq!(params.version.minor, 2);
        assert_eq!(params.version.descriptor, " (Debian 14.2-1)");

        // "md5" ++ hex(md5(hex(md5(password ++ user)) ++ salt))
        let inner = format!("{:x}", md5::compute(b"ba"));
        let outer = md5::compute([inner.as_bytes(), &[0x11, 0x22, 0x33, 0x44]].concat());
        let mut expect = format!("md5{outer:x}").into_bytes();
        assert_eq!(expect.len(), 35);
        expect.push(0);

        let sent = io.sent_messages();
        assert_eq!(sent[1], (b'p', expect));
    }

    #[tokio::test]
    async fn auth_error_response() {
        let mut body = BytesMut::new();
        for (tag, value) in [
            (b'S', "FATAL"),
            (b'C', "28P01"),
            (b'M', "password authentication failed"),
        ] {
            body.put_u8(tag);
            body.extend_from_slice(value.as_bytes());
            body.put_u8(0);
        }
        body.put_u8(0);

        let mut io = MockIo::new([(b'E', body.freeze())]);
        let err = startup(config(), &mut io).await.unwrap_err();

        let ErrorKind::Database(response) = err.kind() else {
            panic!("expected database error, got {err:?}");
        };
        assert_eq!(response.severity, PgSeverity::Fatal);
        assert_eq!(response.code, "28P01");
        assert_eq!(response.message, "password authentication failed");
    }

    #[tokio::test]
    async fn gss_is_rejected() {
        let mut io = MockIo::new([auth(7)]);
        let err = startup(config(), &mut io).await.unwrap_err();
        let ErrorKind::UnsupportedAuth(auth) = err.kind() else {
            panic!("expected unsupported auth, got {err:?}");
        };
        assert_eq!(auth.mechanism(), "GSSAPI");
    }

    #[tokio::test]
    async fn missing_parameter_fails() {
        let mut io = MockIo::new([
            auth(0),
            param("server_version", "15.1"),
            param("server_encoding", "UTF8"),
            ready(b'I'),
        ]);
        let err = startup(config(), &mut io).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Protocol(ProtocolError::MissingParameter { name: "integer_datetimes" }),
        ));
    }

    #[tokio::test]
    async fn other_startup_messages_are_ignored() {
        // BackendKeyData and a parse completion slip in before ReadyForQuery
        let mut io = MockIo::new([
            auth(0),
            (b'K', Bytes::from(vec![0, 0, 0, 1, 0, 0, 0, 2])),
            param("server_version", "15.1"),
            param("server_encoding", "UTF8"),
            param("integer_datetimes", "off"),
            ready(b'I'),
        ]);
        let params = startup(config(), &mut io).await.unwrap();
        assert!(!params.integer_datetimes());
        assert_eq!(params.version(), &ServerVersion {
            major: 15,
            minor: 1,
            revision: 0,
            descriptor: ByteStr::default(),
        });
    }

    #[test]
    fn version_rejects_non_numeric_prefix() {
        assert!(ServerVersion::parse(&"devel".into()).is_err());
        assert!(ServerVersion::parse(&".1".into()).is_err());
    }

    #[test]
    fn version_beta_descriptor() {
        let v = ServerVersion::parse(&"10beta1".into()).unwrap();
        assert_eq!((v.major, v.minor, v.revision), (10, 0, 0));
        assert_eq!(v.descriptor, "beta1");
    }
}
