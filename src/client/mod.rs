use crate::conn::{CommonState, MessageTransport, Status, TransportEvent};
use crate::error::Error;
use crate::key_schedule;
use crate::keylog::KeyLog;
use crate::kx::SupportedKxGroup;
#[cfg(feature = "logging")]
use crate::log::trace;
use crate::msgs::enums::{
    AlertDescription, CipherSuite, ContentType, MaxFragmentLength, PSKKeyExchangeMode,
    ProtocolVersion, SignatureScheme,
};
use crate::msgs::handshake::CertificatePayload;
use crate::msgs::message::Message;
use crate::suites::Tls13CipherSuite;
use crate::verify;
use crate::versions;

use ring::hkdf;
use zeroize::Zeroizing;

use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::mem;
use std::sync::Arc;

pub mod builder;
mod common;
pub mod handy;
mod hs;
mod tls13;

#[cfg(test)]
mod tests;

pub use builder::{ConfigWantsClientAuth, ConfigWantsServerVerifier};

/// A trait for the ability to store client session data.
/// The keys and values are opaque.
///
/// Both the keys and values should be treated as
/// **highly sensitive data**, containing enough key material
/// to break all security of the corresponding session.
///
/// `put` is a mutating operation; this isn't expressed
/// in the type system to allow implementations freedom in
/// how to achieve interior mutability.  `Mutex` is a common
/// choice.
pub trait StoresClientSessions: Send + Sync {
    /// Stores a new `value` for `key`.  Returns `true`
    /// if the value was stored.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool;

    /// Returns the latest value for `key`.  Returns `None`
    /// if there's no such value.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
}

/// A trait for the ability to choose a certificate chain and
/// private key for the purposes of client authentication.
pub trait ResolvesClientCert: Send + Sync {
    /// With the server-supplied acceptable issuers in `acceptable_issuers`,
    /// the server's supported signature schemes in `sigschemes`,
    /// return a certificate chain and signing key to authenticate.
    ///
    /// `acceptable_issuers` is undecoded and unverified by this
    /// library, but it should be expected to contain DER encodings
    /// of X501 NAMEs.
    ///
    /// Return None to continue the handshake without any client
    /// authentication.  The server may reject the handshake later
    /// if it requires authentication.
    fn resolve(
        &self,
        acceptable_issuers: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<crate::sign::CertifiedKey>>;

    /// Return true if any certificates at all are available.
    fn has_certs(&self) -> bool;
}

/// How strictly the server's certificate chain and name are checked.
///
/// The handshake signature over the transcript is verified no matter
/// what: that check is integrity, not trust policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Do not check the certificate chain at all.
    None,
    /// Check the chain, but record rather than reject a failure.
    /// The outcome is available from
    /// [`ClientConnection::unverified_peer_reason`].
    Optional,
    /// A chain that does not verify is fatal.
    Required,
}

/// An out-of-band pre-shared key: the identity it is offered under,
/// the secret itself, and the cipher suite whose hash it was
/// provisioned for.
pub struct ExternalPsk {
    pub(crate) identity: Vec<u8>,
    secret: Zeroizing<Vec<u8>>,
    pub(crate) suite: &'static Tls13CipherSuite,
}

impl ExternalPsk {
    /// Package an externally established PSK.
    pub fn new(
        identity: impl Into<Vec<u8>>,
        secret: impl Into<Vec<u8>>,
        suite: &'static Tls13CipherSuite,
    ) -> Self {
        Self {
            identity: identity.into(),
            secret: Zeroizing::new(secret.into()),
            suite,
        }
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for ExternalPsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalPsk")
            .field("identity", &self.identity)
            .finish()
    }
}

/// How the connection's keys were agreed, once the ServerHello said.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeMode {
    /// Fresh ECDHE only; certificate authentication.
    EphemeralOnly,
    /// PSK only; no forward secrecy for this connection.
    PskOnly,
    /// PSK plus a fresh ECDHE exchange.
    PskEphemeral,
}

/// Common configuration for (typically) all connections made by
/// a program.
///
/// Making one of these can be expensive, and should be
/// once per process rather than once per connection.
pub struct ClientConfig {
    /// List of ciphersuites, in preference order.
    pub cipher_suites: Vec<&'static Tls13CipherSuite>,

    /// List of supported key exchange groups, in preference order --
    /// the first element is the highest priority.
    ///
    /// The first element in this list is the _default key share
    /// algorithm_, and a key share for it is sent in the client hello.
    pub kx_groups: Vec<&'static SupportedKxGroup>,

    /// The signature schemes offered in signature_algorithms, in
    /// preference order.  A CertificateVerify using a scheme outside
    /// this list is rejected.
    pub signature_algorithms: Vec<SignatureScheme>,

    /// Which ALPN protocols we include in our client hello.
    /// If empty, no ALPN extension is sent.
    pub alpn_protocols: Vec<Vec<u8>>,

    /// How we store session data or tickets.
    pub session_storage: Arc<dyn StoresClientSessions>,

    /// How to decide what client auth certificate/keys to use.
    pub client_auth_cert_resolver: Arc<dyn ResolvesClientCert>,

    /// Whether to offer and consume session tickets.  You must provide
    /// a working `session_storage` member for this to have any
    /// meaningful effect.
    ///
    /// The default is true.
    pub enable_tickets: bool,

    /// Supported versions, in no particular order.
    pub(crate) versions: versions::EnabledVersions,

    /// Whether to send the Server Name Indication (SNI) extension
    /// during the client handshake.
    ///
    /// The default is true.
    pub enable_sni: bool,

    /// How to verify the server certificate chain.
    pub(crate) verifier: Arc<dyn verify::ServerCertVerifier>,

    /// How strictly the server certificate is checked.
    ///
    /// The default is `AuthMode::Required`.
    pub server_auth_policy: AuthMode,

    /// How to output key material for debugging.  The default
    /// does nothing.
    pub key_log: Arc<dyn KeyLog>,

    /// Whether to send data on the first flight ("early data") in
    /// TLS 1.3 handshakes.
    ///
    /// The default is false.
    pub enable_early_data: bool,

    /// An upper bound on the early data this client will send,
    /// regardless of what the server's ticket permits.
    pub max_early_data_size: u32,

    /// The PSK key-exchange modes offered when a PSK is offered.
    ///
    /// The default is `[PSK_DHE_KE]`, preserving forward secrecy.
    pub psk_modes: Vec<PSKKeyExchangeMode>,

    /// An out-of-band PSK to offer when no resumable session exists.
    pub external_psk: Option<ExternalPsk>,

    /// Ask the server to cap record payloads at this size.
    pub max_fragment_length: Option<MaxFragmentLength>,

    /// Whether to emit the dummy change_cipher_spec records that keep
    /// deployed middleboxes happy.
    ///
    /// The default is true.
    pub enable_middlebox_compat: bool,
}

impl ClientConfig {
    /// We support a given TLS version if it's quoted in the configured
    /// versions *and* at least one ciphersuite for this version is
    /// also configured.
    pub(crate) fn supports_version(&self, v: ProtocolVersion) -> bool {
        self.versions.contains(v)
            && (v != ProtocolVersion::TLSv1_3 || !self.cipher_suites.is_empty())
    }

    pub(crate) fn find_cipher_suite(&self, suite: CipherSuite) -> Option<&'static Tls13CipherSuite> {
        self.cipher_suites
            .iter()
            .copied()
            .find(|scs| scs.suite() == suite)
    }
}

/// Container for unsafe APIs
#[cfg(feature = "dangerous_configuration")]
pub mod danger {
    use std::sync::Arc;

    use super::verify::ServerCertVerifier;
    use super::ClientConfig;

    /// Accessor for dangerous configuration options.
    pub struct DangerousClientConfig<'a> {
        /// The underlying ClientConfig
        pub cfg: &'a mut ClientConfig,
    }

    impl<'a> DangerousClientConfig<'a> {
        /// Overrides the default `ServerCertVerifier` with something else.
        pub fn set_certificate_verifier(&mut self, verifier: Arc<dyn ServerCertVerifier>) {
            self.cfg.verifier = verifier;
        }
    }
}

#[cfg(feature = "dangerous_configuration")]
impl ClientConfig {
    /// Access configuration options whose use is dangerous and requires
    /// extra care.
    pub fn dangerous(&mut self) -> danger::DangerousClientConfig {
        danger::DangerousClientConfig { cfg: self }
    }
}

/// Encodes ways a client can know the expected name of the server.
///
/// Currently the only variant is a DNS name, which is also what goes
/// into the SNI extension and what the server certificate is checked
/// against.
#[derive(Debug, PartialEq, Clone)]
pub enum ServerName {
    /// A DNS name of the server.
    DnsName(webpki::DnsName),
}

impl ServerName {
    pub(crate) fn for_sni(&self) -> Option<webpki::DnsNameRef> {
        let Self::DnsName(dns_name) = self;
        Some(dns_name.as_ref())
    }
}

impl From<webpki::DnsNameRef<'_>> for ServerName {
    fn from(dns_name: webpki::DnsNameRef) -> Self {
        Self::DnsName(dns_name.into())
    }
}

/// The provided string was not a valid DNS name.
#[derive(Debug)]
pub struct InvalidDnsNameError;

impl fmt::Display for InvalidDnsNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid dns name")
    }
}

impl std::error::Error for InvalidDnsNameError {}

impl TryFrom<&str> for ServerName {
    type Error = InvalidDnsNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        webpki::DnsNameRef::try_from_ascii_str(value)
            .map(Self::from)
            .map_err(|_| InvalidDnsNameError)
    }
}

#[derive(Debug, PartialEq)]
enum EarlyDataState {
    Disabled,
    Ready,
    Accepted,
    AcceptedFinished,
    Rejected,
}

pub(crate) struct EarlyData {
    state: EarlyDataState,
    left: usize,
}

impl EarlyData {
    fn new() -> Self {
        Self {
            left: 0,
            state: EarlyDataState::Disabled,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        matches!(self.state, EarlyDataState::Ready | EarlyDataState::Accepted)
    }

    fn is_accepted(&self) -> bool {
        matches!(
            self.state,
            EarlyDataState::Accepted | EarlyDataState::AcceptedFinished
        )
    }

    pub(crate) fn enable(&mut self, max_data: usize) {
        assert_eq!(self.state, EarlyDataState::Disabled);
        self.state = EarlyDataState::Ready;
        self.left = max_data;
    }

    pub(crate) fn rejected(&mut self) {
        trace!("EarlyData rejected");
        self.state = EarlyDataState::Rejected;
    }

    pub(crate) fn accepted(&mut self) {
        trace!("EarlyData accepted");
        assert_eq!(self.state, EarlyDataState::Ready);
        self.state = EarlyDataState::Accepted;
    }

    pub(crate) fn finished(&mut self) {
        trace!("EarlyData finished");
        self.state = match self.state {
            EarlyDataState::Accepted => EarlyDataState::AcceptedFinished,
            _ => panic!("bad EarlyData state"),
        }
    }

    fn check_write(&mut self, sz: usize) -> io::Result<usize> {
        match self.state {
            EarlyDataState::Disabled => unreachable!(),
            EarlyDataState::Ready | EarlyDataState::Accepted => {
                let take = if self.left < sz {
                    mem::replace(&mut self.left, 0)
                } else {
                    self.left -= sz;
                    sz
                };

                Ok(take)
            }
            EarlyDataState::Rejected | EarlyDataState::AcceptedFinished => {
                Err(io::Error::from(io::ErrorKind::InvalidInput))
            }
        }
    }

    fn bytes_left(&self) -> usize {
        self.left
    }
}

/// Stub that implements io::Write and dispatches to `write_early_data`.
pub struct WriteEarlyData<'a> {
    sess: &'a mut ClientConnection,
}

impl<'a> WriteEarlyData<'a> {
    fn new(sess: &'a mut ClientConnection) -> WriteEarlyData<'a> {
        WriteEarlyData { sess }
    }

    /// How many bytes you may send.  Writes will become short
    /// once this reaches zero.
    pub fn bytes_left(&self) -> usize {
        self.sess.data.early_data.bytes_left()
    }
}

impl<'a> io::Write for WriteEarlyData<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sess.write_early_data(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) struct ClientConnectionData {
    pub(crate) server_cert_chain: CertificatePayload,
    pub(crate) early_data: EarlyData,
    pub(crate) resumption_ciphersuite: Option<&'static Tls13CipherSuite>,
    pub(crate) kx_mode: Option<KeyExchangeMode>,
    pub(crate) got_ticket: bool,
    pub(crate) early_exporter: Option<hkdf::Prk>,
    pub(crate) unverified_peer_reason: Option<Error>,
}

impl ClientConnectionData {
    fn new() -> Self {
        Self {
            server_cert_chain: Vec::new(),
            early_data: EarlyData::new(),
            resumption_ciphersuite: None,
            kx_mode: None,
            got_ticket: false,
            early_exporter: None,
            unverified_peer_reason: None,
        }
    }
}

/// This represents a single TLS client connection.
///
/// The connection owns the record-layer collaborator handed to
/// [`ClientConnection::new`]; everything else is driven by calling
/// [`ClientConnection::step`] until it reports `Done` or fails.
pub struct ClientConnection {
    common: CommonState,
    state: Option<Box<dyn hs::State>>,
    data: ClientConnectionData,
    terminated: Option<Error>,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .finish()
    }
}

impl ClientConnection {
    /// Make a new ClientConnection.  `config` controls how we behave
    /// in the TLS protocol, `name` is the name of the server we want
    /// to talk to, and `transport` is the record layer the handshake
    /// runs over.
    ///
    /// The first ClientHello is queued on the transport before this
    /// returns.
    pub fn new(
        config: Arc<ClientConfig>,
        name: ServerName,
        transport: Box<dyn MessageTransport>,
    ) -> Result<Self, Error> {
        let mut new = Self {
            common: CommonState::new(transport),
            state: None,
            data: ClientConnectionData::new(),
            terminated: None,
        };

        let mut cx = hs::ClientContext {
            common: &mut new.common,
            data: &mut new.data,
        };

        new.state = Some(hs::start_handshake(name, config, &mut cx)?);
        Ok(new)
    }

    /// Drive the handshake forwards by at most one state transition.
    ///
    /// Call repeatedly, feeding and flushing the transport as
    /// `WantRead` and `WantWrite` direct, until `Done`.  A fatal error
    /// is sticky: every subsequent call returns it again, and
    /// [`ClientConnection::take_pending_alert`] yields the alert the
    /// record layer owes the peer.
    pub fn step(&mut self) -> Result<Status, Error> {
        if let Some(err) = &self.terminated {
            return Err(err.clone());
        }

        if let Some(state) = self.state.as_mut() {
            let outcome = state.perhaps_write_key_update(&mut self.common);
            if let Err(err) = outcome {
                return Err(self.fatal(err));
            }
        }

        let event = match self.common.read_transport() {
            Ok(event) => event,
            Err(err) => return Err(self.fatal(err)),
        };

        let event = match event {
            Some(event) => event,
            None => {
                return Ok(if mem::replace(&mut self.common.queued_writes, false) {
                    Status::WantWrite
                } else if self.common.traffic {
                    Status::Done
                } else {
                    Status::WantRead
                });
            }
        };

        let msg = match event {
            TransportEvent::Handshake(bytes) => match Message::read_handshake(&bytes) {
                Some(msg) => msg,
                None => {
                    self.common
                        .send_fatal_alert(AlertDescription::DecodeError);
                    return Err(
                        self.fatal(Error::CorruptMessagePayload(ContentType::Handshake))
                    );
                }
            },
            TransportEvent::ChangeCipherSpecSeen => {
                if self.common.traffic {
                    self.common
                        .send_fatal_alert(AlertDescription::UnexpectedMessage);
                    return Err(self.fatal(Error::InappropriateMessage {
                        expect_types: vec![ContentType::Handshake, ContentType::ApplicationData],
                        got_type: ContentType::ChangeCipherSpec,
                    }));
                }
                // middlebox-compatibility noise, already dropped by
                // the record layer
                trace!("Ignoring dropped ChangeCipherSpec");
                return Ok(Status::Progressed);
            }
            TransportEvent::ApplicationDataReceived => {
                // plaintext stays with the record layer
                return Ok(Status::Progressed);
            }
        };

        let state = match self.state.take() {
            Some(state) => state,
            None => return Err(self.fatal(Error::General("no active state".to_string()))),
        };

        let mut cx = hs::ClientContext {
            common: &mut self.common,
            data: &mut self.data,
        };

        match state.handle(&mut cx, msg) {
            Ok(next) => {
                self.state = Some(next);
                if mem::replace(&mut self.data.got_ticket, false) {
                    Ok(Status::GotTicket)
                } else {
                    Ok(Status::Progressed)
                }
            }
            Err(err) => Err(self.fatal(err)),
        }
    }

    fn fatal(&mut self, err: Error) -> Error {
        if !self.common.has_pending_alert() {
            if let Some(alert) = err.alert_description() {
                self.common.send_fatal_alert(alert);
            }
        }

        // Dropping the state machinery wipes the secrets it holds.
        self.state = None;
        self.terminated = Some(err.clone());
        err
    }

    /// The fatal alert owed to the peer, if a failure queued one.
    /// The record layer should encode and emit it before teardown.
    pub fn take_pending_alert(&mut self) -> Option<AlertDescription> {
        self.common.take_pending_alert()
    }

    /// True until the handshake has completed.
    pub fn is_handshaking(&self) -> bool {
        !self.common.traffic
    }

    /// The ciphersuite agreed with the peer, once ServerHello has been
    /// processed.
    pub fn negotiated_cipher_suite(&self) -> Option<&'static Tls13CipherSuite> {
        self.common
            .suite
            .or(self.data.resumption_ciphersuite)
    }

    /// The protocol version agreed with the peer.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.common.negotiated_version
    }

    /// The ALPN protocol agreed with the peer, if any.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.common.alpn_protocol.as_deref()
    }

    /// How the connection's keys were agreed.
    pub fn key_exchange_mode(&self) -> Option<KeyExchangeMode> {
        self.data.kx_mode
    }

    /// The certificate chain the server presented, or the chain from
    /// the resumed session.
    pub fn peer_certificates(&self) -> Option<&[crate::key::Certificate]> {
        if self.data.server_cert_chain.is_empty() {
            return None;
        }

        Some(&self.data.server_cert_chain)
    }

    /// Under `AuthMode::Optional`, why the peer's certificate did not
    /// verify (if it didn't).
    pub fn unverified_peer_reason(&self) -> Option<&Error> {
        self.data.unverified_peer_reason.as_ref()
    }

    /// Returns an `io::Write` implementer you can write bytes to
    /// to send TLS1.3 early data (a.k.a. "0-RTT data") to the server.
    ///
    /// This returns None in many circumstances when the capability to
    /// send early data is not available, including but not limited to:
    ///
    /// - The server hasn't been talked to previously.
    /// - The server does not support resumption.
    /// - The server does not support early data.
    /// - The resumption data for the server has expired.
    ///
    /// The server specifies a maximum amount of early data.  You can
    /// learn this limit through the returned object, and writes through
    /// it will process only this many bytes.
    ///
    /// The server can choose not to accept any sent early data --
    /// in this case the data is lost but the connection continues.  You
    /// can tell this happened using `is_early_data_accepted`.
    pub fn early_data(&mut self) -> Option<WriteEarlyData> {
        if self.data.early_data.is_enabled() {
            Some(WriteEarlyData::new(self))
        } else {
            None
        }
    }

    /// Returns true if the server signalled it will process early data.
    ///
    /// If you sent early data and this returns false at the end of the
    /// handshake then the server will not process the data.  This
    /// is not an error, but you may wish to resend the data.
    pub fn is_early_data_accepted(&self) -> bool {
        self.data.early_data.is_accepted()
    }

    fn write_early_data(&mut self, data: &[u8]) -> io::Result<usize> {
        let sz = self
            .data
            .early_data
            .check_write(data.len())?;

        self.common
            .send_early_plaintext(&data[..sz])
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }

    /// Derive keying material from the established connection per
    /// RFC 8446 section 7.5.
    pub fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.state
            .as_ref()
            .ok_or(Error::HandshakeNotComplete)
            .and_then(|st| st.export_keying_material(output, label, context))
    }

    /// As `export_keying_material`, but from the early exporter master
    /// secret of an early-data connection.
    pub fn export_early_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        let secret = self
            .data
            .early_exporter
            .as_ref()
            .ok_or(Error::HandshakeNotComplete)?;
        let suite = self
            .data
            .resumption_ciphersuite
            .ok_or(Error::HandshakeNotComplete)?;

        key_schedule::export_keying_material(secret, suite.hkdf_algorithm, output, label, context)
    }
}
