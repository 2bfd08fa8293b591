//! # thintls
//!
//! thintls is a TLS 1.3 *client handshake engine*: it negotiates a
//! cryptographic session with a TLS 1.3 server over an ordered,
//! reliable byte stream, authenticating the peer, deriving the shared
//! traffic secrets, and installing forward-secret record-protection
//! keys at exactly the boundaries RFC 8446 defines.  Optionally it
//! offers early (0-RTT) application data and accepts
//! session-resumption tickets after the handshake completes.
//!
//! It deliberately does *not* contain a record layer: framing,
//! encryption and decryption of records belong to a collaborator the
//! caller supplies through the [`MessageTransport`] trait.  The
//! engine tells that collaborator when to switch keys, per direction,
//! and otherwise exchanges whole handshake messages with it.
//!
//! ## Driving a handshake
//!
//! Build a [`ClientConfig`] through [`config_builder`], then make a
//! [`ClientConnection`] with the name of the server you want to talk
//! to and your transport.  Call [`ClientConnection::step`] until it
//! reports [`Status::Done`]; feed and flush your transport whenever it
//! reports [`Status::WantRead`] or [`Status::WantWrite`].  A returned
//! error is fatal; the alert owed to the peer is available from
//! [`ClientConnection::take_pending_alert`].
//!
//! ## Non-features
//!
//! - TLS 1.2 and below.  A legitimate TLS 1.2 server is detected
//!   (including the RFC 8446 downgrade sentinels) and surrendered to
//!   the caller via [`Error::Tls12Negotiated`]; talking TLS 1.2 is
//!   someone else's job.
//! - Server-side handshaking.
//! - Record-layer concerns: fragmentation, reordering, renegotiation
//!   (which TLS 1.3 forbids anyway).
//!
//! ## Cryptography
//!
//! All cryptographic operations are delegated to *ring*; certificate
//! path and handshake-signature verification to *webpki*.  Secrets
//! held by the engine are wiped on drop.

// Require docs for public APIs, deny unsafe code, handle extra warnings.
#![forbid(unsafe_code)]
#![warn(missing_docs, unused_qualifications)]
#![allow(clippy::new_without_default)]

// log for logging (optional).
#[cfg(feature = "logging")]
mod log {
    pub(crate) use log::{debug, trace, warn};
}

#[cfg(not(feature = "logging"))]
#[macro_use]
mod log {
    macro_rules! trace    ( ($($tt:tt)*) => {{}} );
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! warn     ( ($($tt:tt)*) => {{}} );
}

#[macro_use]
mod check;

#[allow(missing_docs)]
#[macro_use]
mod msgs;

mod anchors;
mod bs_debug;
mod builder;
mod cipher;
mod conn;
mod error;
mod hash_hs;
mod key;
mod key_schedule;
mod keylog;
mod kx;
mod rand;
mod suites;
mod ticketer;
mod verify;
mod versions;

/// Things for signing with a client certificate's private key.
pub mod sign;

/// The client.
pub mod client;

/// Internal message-codec classes which may be useful outside the
/// library, e.g. to test harnesses and protocol analysers.  The
/// contents of this module are not subject to semver.
pub mod internal {
    /// Low-level TLS message parsing and encoding.
    pub mod msgs {
        pub use crate::msgs::*;
    }
}

// The public interface is:
pub use crate::anchors::{OwnedTrustAnchor, RootCertStore};
pub use crate::builder::{
    client_config_builder_with_safe_defaults, config_builder, ConfigWantsCipherSuites,
    ConfigWantsKxGroups, ConfigWantsPeerType, ConfigWantsVersions,
};
pub use crate::cipher::{AeadKey, Iv, TrafficKeys};
pub use crate::client::{
    AuthMode, ClientConfig, ClientConnection, ExternalPsk, InvalidDnsNameError, KeyExchangeMode,
    ResolvesClientCert, ServerName, StoresClientSessions, WriteEarlyData,
};
pub use crate::conn::{Direction, MessageTransport, Status, TransportEvent};
pub use crate::error::{Error, WebPkiError, WebPkiOp};
pub use crate::key::{Certificate, PrivateKey};
pub use crate::keylog::{KeyLog, NoKeyLog};
pub use crate::kx::{SupportedKxGroup, ALL_KX_GROUPS, SECP256R1, SECP384R1, X25519};
pub use crate::msgs::enums::{
    AlertDescription, CipherSuite, ContentType, HandshakeType, MaxFragmentLength, NamedGroup,
    PSKKeyExchangeMode, ProtocolVersion, SignatureScheme,
};
pub use crate::suites::{
    BulkAlgorithm, CipherSuiteCommon, Tls13CipherSuite, ALL_CIPHER_SUITES, DEFAULT_CIPHER_SUITES,
    DEFAULT_SIGNATURE_SCHEMES, TLS13_AES_128_GCM_SHA256, TLS13_AES_256_GCM_SHA384,
    TLS13_CHACHA20_POLY1305_SHA256,
};
pub use crate::versions::{
    SupportedProtocolVersion, ALL_VERSIONS, DEFAULT_VERSIONS, TLS12, TLS13,
};

/// Message signing interfaces, and certificate verification
/// interfaces for people who want to override them.
#[cfg(feature = "dangerous_configuration")]
pub use crate::verify::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier, WebPkiVerifier,
};

// The post-quantum KEM library is referenced at the build level only;
// this proves it links.
#[cfg(all(test, feature = "post-quantum"))]
mod post_quantum_linkage {
    #[test]
    fn kem_library_links() {
        let key = aws_lc_rs::kem::DecapsulationKey::generate(&aws_lc_rs::kem::ML_KEM_768)
            .expect("KEM keygen");
        key.encapsulation_key().expect("KEM public key");
    }
}
