use crate::cipher::{new_tls13_traffic_keys, TrafficKeys};
use crate::error::Error;
use crate::msgs::codec::Codec;
use crate::msgs::enums::{AlertDescription, HandshakeType, ProtocolVersion};
use crate::msgs::message::{Message, MessagePayload};
use crate::suites::Tls13CipherSuite;

#[cfg(feature = "logging")]
use crate::log::{debug, warn};

use ring::hkdf;

/// What a call to [`crate::client::ClientConnection::step`] achieved,
/// and what the engine needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// One state transition's worth of work happened; call `step`
    /// again.
    Progressed,

    /// The engine needs more bytes from the peer before it can make
    /// progress.  Feed the transport and re-enter.
    WantRead,

    /// The engine has queued records the peer must see before it will
    /// answer.  Flush the transport and re-enter.
    WantWrite,

    /// A NewSessionTicket arrived after the handshake and was added
    /// to the session.  The caller may keep stepping for more.
    GotTicket,

    /// The handshake is over: application keys are installed in both
    /// directions and the negotiated session is available.  Further
    /// calls are no-ops returning this again.
    Done,
}

/// Which direction of record protection an installed secret applies
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Protection for records we receive.
    Inbound,
    /// Protection for records we send.
    Outbound,
}

/// One item surfaced by the record layer to the handshake engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// A whole handshake message: 1-byte type, 3-byte length, body.
    Handshake(Vec<u8>),

    /// A change_cipher_spec record was observed and dropped
    /// (middlebox-compatibility mode).
    ChangeCipherSpecSeen,

    /// Application data arrived.  Only legal once the handshake is
    /// over; the record layer keeps the plaintext, this is a
    /// notification.
    ApplicationDataReceived,
}

/// The engine's view of the record layer.
///
/// Implementations own framing, fragment reassembly, encryption and
/// decryption.  The engine tells them when to switch keys; between
/// those points every byte read or written belongs to the epoch most
/// recently installed for that direction.
///
/// Writes are buffered: they must not fail merely because the peer is
/// slow.  `read_handshake` returning `Ok(None)` is the engine's
/// want-read condition.
pub trait MessageTransport {
    /// Return the next complete handshake message (or notable event),
    /// or `None` if more input is needed.
    fn read_handshake(&mut self) -> Result<Option<TransportEvent>, Error>;

    /// Queue a whole handshake message (header included) for
    /// transmission under the current outbound epoch.
    fn write_handshake(&mut self, typ: HandshakeType, message: &[u8]) -> Result<(), Error>;

    /// Queue the single-byte dummy change_cipher_spec record
    /// (middlebox-compatibility mode).  CCS records are never
    /// protected, whatever epoch is current.
    fn write_change_cipher_spec(&mut self) -> Result<(), Error>;

    /// Queue early application data under the current outbound epoch,
    /// returning how much was accepted.
    fn write_early_data(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Switch one direction of record protection to freshly derived
    /// keys.  Outbound: takes effect after previously queued records
    /// are flushed.  Inbound: takes effect for the next record
    /// consumed from the input.
    fn install_keys(&mut self, direction: Direction, keys: TrafficKeys) -> Result<(), Error>;
}

/// Connection state the handshake states mutate as they go: the
/// negotiated parameters so far, the pending fatal alert, and the
/// handle on the record layer.
pub(crate) struct CommonState {
    pub(crate) negotiated_version: Option<ProtocolVersion>,
    pub(crate) suite: Option<&'static Tls13CipherSuite>,
    pub(crate) alpn_protocol: Option<Vec<u8>>,
    /// True while 0-RTT data may still be written.
    pub(crate) early_traffic: bool,
    /// True once application keys are installed in both directions.
    pub(crate) traffic: bool,
    /// Set when something was queued since the last want-write hint.
    pub(crate) queued_writes: bool,
    pending_alert: Option<AlertDescription>,
    transport: Box<dyn MessageTransport>,
}

impl CommonState {
    pub(crate) fn new(transport: Box<dyn MessageTransport>) -> Self {
        Self {
            negotiated_version: None,
            suite: None,
            alpn_protocol: None,
            early_traffic: false,
            traffic: false,
            queued_writes: false,
            pending_alert: None,
            transport,
        }
    }

    /// Queue a fatal alert for the record layer to emit before
    /// teardown.  The first alert wins; later ones would describe
    /// knock-on effects of the same failure.
    pub(crate) fn send_fatal_alert(&mut self, desc: AlertDescription) {
        warn!("Sending fatal alert {:?}", desc);
        if self.pending_alert.is_none() {
            self.pending_alert = Some(desc);
        }
    }

    pub(crate) fn has_pending_alert(&self) -> bool {
        self.pending_alert.is_some()
    }

    pub(crate) fn take_pending_alert(&mut self) -> Option<AlertDescription> {
        self.pending_alert.take()
    }

    /// Reject a peer parameter choice: queues illegal_parameter and
    /// builds the error for the caller to return.
    pub(crate) fn illegal_param(&mut self, why: &str) -> Error {
        self.send_fatal_alert(AlertDescription::IllegalParameter);
        Error::PeerMisbehavedError(why.to_string())
    }

    pub(crate) fn missing_extension(&mut self, why: &str) -> Error {
        self.send_fatal_alert(AlertDescription::MissingExtension);
        Error::PeerMisbehavedError(why.to_string())
    }

    /// Encode and queue an outgoing message.
    pub(crate) fn send_msg(&mut self, m: Message) -> Result<(), Error> {
        self.queued_writes = true;
        match m.payload {
            MessagePayload::Handshake(ref hmp) => {
                debug!("Sending handshake message {:?}", hmp.typ);
                self.transport
                    .write_handshake(hmp.typ, &hmp.get_encoding())
            }
            MessagePayload::ChangeCipherSpec => self.transport.write_change_cipher_spec(),
            MessagePayload::ApplicationData(ref payload) => self
                .transport
                .write_early_data(&payload.0)
                .map(|_| ()),
        }
    }

    pub(crate) fn send_early_plaintext(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.queued_writes = true;
        self.transport.write_early_data(data)
    }

    pub(crate) fn read_transport(&mut self) -> Result<Option<TransportEvent>, Error> {
        self.transport.read_handshake()
    }

    /// Expand `secret` for `suite` and hand the keys to the record
    /// layer for `direction`.
    pub(crate) fn install_keys(
        &mut self,
        direction: Direction,
        suite: &'static Tls13CipherSuite,
        secret: &hkdf::Prk,
    ) -> Result<(), Error> {
        self.transport
            .install_keys(direction, new_tls13_traffic_keys(suite, secret))
    }

    pub(crate) fn start_traffic(&mut self) {
        self.traffic = true;
    }
}
