use crate::msgs::enums::{AlertDescription, ContentType, HandshakeType};
use crate::rand;

use std::error::Error as StdError;
use std::fmt;

/// rustls-style errors for the handshake engine.  These are used in
/// `Result`s throughout the public API.
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// We received a TLS message that isn't valid right now.
    /// `expect_types` lists the message types we can expect right now.
    /// `got_type` is the type we found.
    InappropriateMessage {
        /// Which types we expected
        expect_types: Vec<ContentType>,
        /// What type we received
        got_type: ContentType,
    },

    /// We received a TLS handshake message that isn't valid right now.
    InappropriateHandshakeMessage {
        /// Which handshake type we expected
        expect_types: Vec<HandshakeType>,
        /// What handshake type we received
        got_type: HandshakeType,
    },

    /// The peer sent us a syntactically incorrect TLS message.
    CorruptMessage,

    /// The peer sent us a TLS message with invalid contents.
    CorruptMessagePayload(ContentType),

    /// The peer didn't give us any certificates.
    NoCertificatesPresented,

    /// The peer negotiated a legitimate TLS 1.2 session; this engine
    /// only speaks TLS 1.3 and the caller's TLS 1.2 machinery (if any)
    /// owns the connection from here.  No alert is queued for this.
    Tls12Negotiated,

    /// The peer sent us a fatal alert.
    AlertReceived(AlertDescription),

    /// A catch-all error for unlikely errors.
    General(String),

    /// We detected a protocol error in the peer's behaviour: correct
    /// syntax, but a choice we never offered or a message we forbid.
    PeerMisbehavedError(String),

    /// The peer is not able to speak this protocol at all.
    PeerIncompatibleError(String),

    /// Certificate validation or handshake signature checking failed.
    WebPkiError(WebPkiError, WebPkiOp),

    /// A Finished MAC, binder, or signature did not verify.
    DecryptError,

    /// This function doesn't work until the TLS handshake is complete.
    HandshakeNotComplete,

    /// We failed to acquire random bytes from the system.
    FailedToGetRandomBytes,

    /// We failed to read the system clock.
    FailedToGetCurrentTime,

    /// The presented client-auth key was invalid or unusable.
    InvalidSignatureKey(String),
}

fn join<T: fmt::Debug>(items: &[T]) -> String {
    items
        .iter()
        .map(|x| format!("{:?}", x))
        .collect::<Vec<String>>()
        .join(" or ")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::InappropriateMessage {
                ref expect_types,
                ref got_type,
            } => write!(
                f,
                "received unexpected message: got {:?} when expecting {}",
                got_type,
                join::<ContentType>(expect_types)
            ),
            Self::InappropriateHandshakeMessage {
                ref expect_types,
                ref got_type,
            } => write!(
                f,
                "received unexpected handshake message: got {:?} when expecting {}",
                got_type,
                join::<HandshakeType>(expect_types)
            ),
            Self::CorruptMessage => write!(f, "received corrupt message"),
            Self::CorruptMessagePayload(ref typ) => {
                write!(f, "received corrupt message of type {:?}", typ)
            }
            Self::NoCertificatesPresented => write!(f, "peer sent no certificates"),
            Self::Tls12Negotiated => write!(f, "peer negotiated TLS 1.2"),
            Self::AlertReceived(ref alert) => write!(f, "received fatal alert: {:?}", alert),
            Self::PeerMisbehavedError(ref why) => write!(f, "peer misbehaved: {}", why),
            Self::PeerIncompatibleError(ref why) => write!(f, "peer is incompatible: {}", why),
            Self::WebPkiError(ref err, ref reason) => {
                write!(f, "certificate error in operation {:?}: {:?}", reason, err)
            }
            Self::DecryptError => write!(f, "cannot decrypt peer's message"),
            Self::HandshakeNotComplete => write!(f, "handshake not complete"),
            Self::FailedToGetRandomBytes => write!(f, "failed to get random bytes"),
            Self::FailedToGetCurrentTime => write!(f, "failed to get current time"),
            Self::InvalidSignatureKey(ref why) => write!(f, "invalid signing key: {}", why),
            Self::General(ref err) => write!(f, "unexpected error: {}", err),
        }
    }
}

impl StdError for Error {}

impl From<rand::GetRandomFailed> for Error {
    fn from(_: rand::GetRandomFailed) -> Self {
        Self::FailedToGetRandomBytes
    }
}

/// Which operation failed when dealing with a certificate.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum WebPkiOp {
    /// Validating the server certificate chain.
    ValidateServerCert,
    /// Parsing the end entity certificate.
    ParseEndEntity,
    /// Verifying a signature made by the end entity certificate.
    VerifySignature,
}

/// The reason a certificate was rejected.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum WebPkiError {
    /// The certificate was not correctly encoded.
    BadEncoding,
    /// The certificate's validity period is in the future.
    CertNotValidYet,
    /// The certificate has expired.
    CertExpired,
    /// The certificate is not valid for the name it was presented for.
    CertNotValidForName,
    /// The certificate does not chain to a configured trust anchor.
    UnknownIssuer,
    /// A signature was invalid for the given public key.
    InvalidSignatureForPublicKey,
    /// The signature algorithm is not supported.
    UnsupportedSignatureAlgorithm,
    /// The signature algorithm does not match the given public key.
    UnsupportedSignatureAlgorithmForPublicKey,
    /// Some other rejection, detailed in the carried reason.
    Other(String),
}

impl From<webpki::Error> for WebPkiError {
    fn from(error: webpki::Error) -> Self {
        use webpki::Error::*;
        match error {
            BadDer | BadDerTime => Self::BadEncoding,
            CertNotValidYet => Self::CertNotValidYet,
            CertExpired | InvalidCertValidity => Self::CertExpired,
            CertNotValidForName => Self::CertNotValidForName,
            UnknownIssuer => Self::UnknownIssuer,
            InvalidSignatureForPublicKey => Self::InvalidSignatureForPublicKey,
            UnsupportedSignatureAlgorithm => Self::UnsupportedSignatureAlgorithm,
            UnsupportedSignatureAlgorithmForPublicKey => {
                Self::UnsupportedSignatureAlgorithmForPublicKey
            }
            other => Self::Other(format!("{:?}", other)),
        }
    }
}

impl Error {
    /// The alert the record layer should emit for this error, if any.
    /// `Tls12Negotiated` and the webpki "not our fault" cases carry no
    /// alert because the connection is surrendered rather than torn
    /// down in protest.
    pub fn alert_description(&self) -> Option<AlertDescription> {
        Some(match self {
            Self::InappropriateMessage { .. } | Self::InappropriateHandshakeMessage { .. } => {
                AlertDescription::UnexpectedMessage
            }
            Self::CorruptMessage | Self::CorruptMessagePayload(_) => {
                AlertDescription::DecodeError
            }
            Self::NoCertificatesPresented => AlertDescription::CertificateRequired,
            Self::DecryptError => AlertDescription::DecryptError,
            Self::PeerIncompatibleError(_) => AlertDescription::HandshakeFailure,
            Self::PeerMisbehavedError(_) => AlertDescription::IllegalParameter,
            Self::WebPkiError(err, _) => match err {
                WebPkiError::BadEncoding => AlertDescription::DecodeError,
                WebPkiError::UnknownIssuer => AlertDescription::UnknownCA,
                WebPkiError::CertExpired => AlertDescription::CertificateExpired,
                WebPkiError::CertNotValidYet | WebPkiError::CertNotValidForName => {
                    AlertDescription::BadCertificate
                }
                _ => AlertDescription::BadCertificate,
            },
            Self::General(_) | Self::FailedToGetRandomBytes | Self::FailedToGetCurrentTime => {
                AlertDescription::InternalError
            }
            Self::Tls12Negotiated | Self::AlertReceived(_) => return None,
            _ => AlertDescription::InternalError,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_display() {
        let all = vec![
            Error::InappropriateMessage {
                expect_types: vec![ContentType::Alert],
                got_type: ContentType::Handshake,
            },
            Error::InappropriateHandshakeMessage {
                expect_types: vec![HandshakeType::ClientHello, HandshakeType::Finished],
                got_type: HandshakeType::ServerHello,
            },
            Error::CorruptMessage,
            Error::CorruptMessagePayload(ContentType::Alert),
            Error::NoCertificatesPresented,
            Error::AlertReceived(AlertDescription::HandshakeFailure),
            Error::General("undocumented error".to_string()),
            Error::PeerMisbehavedError("inconsistent behaviour".to_string()),
            Error::PeerIncompatibleError("no tls1.3".to_string()),
            Error::DecryptError,
            Error::FailedToGetRandomBytes,
            Error::HandshakeNotComplete,
        ];

        for err in all {
            assert!(!format!("{}", err).is_empty());
            assert!(!format!("{:?}", err).is_empty());
        }
    }

    #[test]
    fn alert_mapping_follows_taxonomy() {
        assert_eq!(
            Error::CorruptMessage.alert_description(),
            Some(AlertDescription::DecodeError)
        );
        assert_eq!(
            Error::DecryptError.alert_description(),
            Some(AlertDescription::DecryptError)
        );
        assert_eq!(
            Error::WebPkiError(WebPkiError::UnknownIssuer, WebPkiOp::ValidateServerCert)
                .alert_description(),
            Some(AlertDescription::UnknownCA)
        );
        assert_eq!(Error::Tls12Negotiated.alert_description(), None);
    }
}
