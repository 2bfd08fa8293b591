use crate::anchors::RootCertStore;
use crate::client::ServerName;
use crate::error::{Error, WebPkiError, WebPkiOp};
use crate::key::Certificate;
use crate::msgs::enums::SignatureScheme;
use crate::msgs::handshake::DigitallySignedStruct;

use ring::digest;

use std::convert::TryFrom;
use std::time::SystemTime;

type SignatureAlgorithms = &'static [&'static webpki::SignatureAlgorithm];

/// Which signature verification mechanisms we support.  No particular
/// order.
static SUPPORTED_SIG_ALGS: SignatureAlgorithms = &[
    &webpki::ECDSA_P256_SHA256,
    &webpki::ECDSA_P256_SHA384,
    &webpki::ECDSA_P384_SHA256,
    &webpki::ECDSA_P384_SHA384,
    &webpki::ED25519,
    &webpki::RSA_PSS_2048_8192_SHA256_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA384_LEGACY_KEY,
    &webpki::RSA_PSS_2048_8192_SHA512_LEGACY_KEY,
    &webpki::RSA_PKCS1_2048_8192_SHA256,
    &webpki::RSA_PKCS1_2048_8192_SHA384,
    &webpki::RSA_PKCS1_2048_8192_SHA512,
];

/// Marker types.  These are used to bind the fact some verification
/// (certificate chain or handshake signature) has taken place into
/// protocol states.  We use this to have the compiler check that there
/// are no 'goto fail'-style elisions of important checks before we
/// reach the traffic stage.
///
/// These types are public, but cannot be directly constructed.  This
/// means their origins are controlled.
#[derive(Debug)]
pub struct ServerCertVerified(());

impl ServerCertVerified {
    /// Make a `ServerCertVerified`
    pub fn assertion() -> Self {
        Self(())
    }
}

/// Marker type for a verified handshake signature.
#[derive(Debug)]
pub struct HandshakeSignatureValid(());

impl HandshakeSignatureValid {
    /// Make a `HandshakeSignatureValid`
    pub fn assertion() -> Self {
        Self(())
    }
}

/// Marker type for a verified Finished MAC.
#[derive(Debug)]
pub struct FinishedMessageVerified(());

impl FinishedMessageVerified {
    pub(crate) fn assertion() -> Self {
        Self(())
    }
}

/// Something that can verify a server certificate chain, and verify
/// signatures made by certificates.
pub trait ServerCertVerifier: Send + Sync {
    /// Verify the end-entity certificate `end_entity` is valid for the
    /// hostname `server_name` and chains to at least one trust anchor.
    ///
    /// `intermediates` contains all certificates other than
    /// `end_entity` that were sent as part of the server's Certificate
    /// message, in the order sent.
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        now: SystemTime,
    ) -> Result<ServerCertVerified, Error>;

    /// Verify a signature allegedly by the given server certificate
    /// over the TLS 1.3 CertificateVerify construction `message`.
    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13(message, cert, dss)
    }

    /// Return the list of SignatureSchemes that this verifier will
    /// handle in `verify_tls13_signature` calls, in preference order.
    fn supported_verify_schemes(&self) -> Vec<SignatureScheme>;
}

/// Default `ServerCertVerifier`, using webpki.
pub struct WebPkiVerifier {
    roots: RootCertStore,
}

impl WebPkiVerifier {
    /// Constructs a new `WebPkiVerifier` trusting `roots`.
    pub fn new(roots: RootCertStore) -> Self {
        Self { roots }
    }
}

impl ServerCertVerifier for WebPkiVerifier {
    /// Will verify the certificate is valid in the following ways:
    /// - Signed by a trusted `RootCertStore` CA
    /// - Not expired, valid for DNS entry
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        now: SystemTime,
    ) -> Result<ServerCertVerified, Error> {
        let (cert, chain, trustroots) = prepare(end_entity, intermediates, &self.roots)?;
        let webpki_now = webpki::Time::try_from(now).map_err(|_| Error::FailedToGetCurrentTime)?;

        cert.verify_is_valid_tls_server_cert(
            SUPPORTED_SIG_ALGS,
            &webpki::TlsServerTrustAnchors(&trustroots),
            &chain,
            webpki_now,
        )
        .map_err(|err| {
            Error::WebPkiError(WebPkiError::from(err), WebPkiOp::ValidateServerCert)
        })?;

        let ServerName::DnsName(dns_name) = server_name;
        cert.verify_is_valid_for_dns_name(dns_name.as_ref())
            .map_err(|err| {
                Error::WebPkiError(WebPkiError::from(err), WebPkiOp::ValidateServerCert)
            })?;

        Ok(ServerCertVerified::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        crate::suites::DEFAULT_SIGNATURE_SCHEMES.to_vec()
    }
}

type CertChainAndRoots<'a, 'b> = (
    webpki::EndEntityCert<'a>,
    Vec<&'a [u8]>,
    Vec<webpki::TrustAnchor<'b>>,
);

fn prepare<'a, 'b>(
    end_entity: &'a Certificate,
    intermediates: &'a [Certificate],
    roots: &'b RootCertStore,
) -> Result<CertChainAndRoots<'a, 'b>, Error> {
    // EE cert must appear first.
    let cert = webpki::EndEntityCert::try_from(end_entity.0.as_ref()).map_err(|err| {
        Error::WebPkiError(WebPkiError::from(err), WebPkiOp::ParseEndEntity)
    })?;

    let intermediates: Vec<&'a [u8]> = intermediates
        .iter()
        .map(|cert| cert.0.as_ref())
        .collect();

    let trustroots: Vec<webpki::TrustAnchor> = roots
        .roots
        .iter()
        .map(|anchor| anchor.to_trust_anchor())
        .collect();

    Ok((cert, intermediates, trustroots))
}

static ECDSA_NISTP256_SHA256_ALGS: SignatureAlgorithms =
    &[&webpki::ECDSA_P256_SHA256, &webpki::ECDSA_P384_SHA256];
static ECDSA_NISTP384_SHA384_ALGS: SignatureAlgorithms =
    &[&webpki::ECDSA_P256_SHA384, &webpki::ECDSA_P384_SHA384];
static ED25519_ALGS: SignatureAlgorithms = &[&webpki::ED25519];
static RSA_PSS_SHA256_ALGS: SignatureAlgorithms =
    &[&webpki::RSA_PSS_2048_8192_SHA256_LEGACY_KEY];
static RSA_PSS_SHA384_ALGS: SignatureAlgorithms =
    &[&webpki::RSA_PSS_2048_8192_SHA384_LEGACY_KEY];
static RSA_PSS_SHA512_ALGS: SignatureAlgorithms =
    &[&webpki::RSA_PSS_2048_8192_SHA512_LEGACY_KEY];

fn convert_scheme(scheme: SignatureScheme) -> Result<SignatureAlgorithms, Error> {
    Ok(match scheme {
        SignatureScheme::ECDSA_NISTP256_SHA256 => ECDSA_NISTP256_SHA256_ALGS,
        SignatureScheme::ECDSA_NISTP384_SHA384 => ECDSA_NISTP384_SHA384_ALGS,
        SignatureScheme::ED25519 => ED25519_ALGS,
        SignatureScheme::RSA_PSS_SHA256 => RSA_PSS_SHA256_ALGS,
        SignatureScheme::RSA_PSS_SHA384 => RSA_PSS_SHA384_ALGS,
        SignatureScheme::RSA_PSS_SHA512 => RSA_PSS_SHA512_ALGS,
        // The PKCS#1 schemes are only valid inside certificates in
        // TLS 1.3, never for handshake signatures.
        _ => {
            return Err(Error::PeerMisbehavedError(
                "signature scheme not valid for TLS 1.3 signing".to_string(),
            ));
        }
    })
}

fn verify_sig_using_any_alg(
    cert: &webpki::EndEntityCert,
    algs: SignatureAlgorithms,
    message: &[u8],
    sig: &[u8],
) -> Result<(), webpki::Error> {
    // TLS doesn't itself give us enough info to map to a single
    // webpki::SignatureAlgorithm.  Therefore, convert_scheme creates a
    // list of possible algorithms, and we try them all.
    for alg in algs {
        match cert.verify_signature(alg, message, sig) {
            Err(webpki::Error::UnsupportedSignatureAlgorithmForPublicKey) => continue,
            res => return res,
        }
    }

    Err(webpki::Error::UnsupportedSignatureAlgorithmForPublicKey)
}

fn verify_tls13(
    msg: &[u8],
    cert: &Certificate,
    dss: &DigitallySignedStruct,
) -> Result<HandshakeSignatureValid, Error> {
    if !dss.scheme.supported_in_tls13() {
        return Err(Error::PeerMisbehavedError(
            "signature scheme not valid for TLS 1.3 signing".to_string(),
        ));
    }

    let alg = convert_scheme(dss.scheme)?;

    let cert = webpki::EndEntityCert::try_from(cert.0.as_ref()).map_err(|err| {
        Error::WebPkiError(WebPkiError::from(err), WebPkiOp::ParseEndEntity)
    })?;

    verify_sig_using_any_alg(&cert, alg, msg, &dss.sig.0)
        .map_err(|err| Error::WebPkiError(WebPkiError::from(err), WebPkiOp::VerifySignature))
        .map(|_| HandshakeSignatureValid::assertion())
}

fn construct_tls13_verify_message(
    handshake_hash: &[u8],
    context_string_with_0: &[u8],
) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.resize(64, 0x20u8);
    msg.extend_from_slice(context_string_with_0);
    msg.extend_from_slice(handshake_hash);
    msg
}

/// The octets a server signs in its CertificateVerify: 64 bytes of
/// 0x20, the context string with its NUL terminator, then the
/// transcript hash up through Certificate.
pub(crate) fn construct_tls13_server_verify_message(handshake_hash: &digest::Digest) -> Vec<u8> {
    construct_tls13_verify_message(
        handshake_hash.as_ref(),
        b"TLS 1.3, server CertificateVerify\x00",
    )
}

pub(crate) fn construct_tls13_client_verify_message(handshake_hash: &digest::Digest) -> Vec<u8> {
    construct_tls13_verify_message(
        handshake_hash.as_ref(),
        b"TLS 1.3, client CertificateVerify\x00",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_verify_message_layout() {
        let hash = digest::digest(&digest::SHA256, b"transcript");
        let msg = construct_tls13_server_verify_message(&hash);

        assert_eq!(msg.len(), 64 + 33 + 1 + 32);
        assert!(msg[..64].iter().all(|&b| b == 0x20));
        assert_eq!(&msg[64..97], b"TLS 1.3, server CertificateVerify");
        assert_eq!(msg[97], 0x00);
        assert_eq!(&msg[98..], hash.as_ref());
    }

    #[test]
    fn pkcs1_schemes_are_refused_for_tls13_signatures() {
        let dss = DigitallySignedStruct::new(SignatureScheme::RSA_PKCS1_SHA256, vec![0; 32]);
        let cert = Certificate(vec![0; 8]);
        assert!(matches!(
            verify_tls13(b"msg", &cert, &dss),
            Err(Error::PeerMisbehavedError(_))
        ));
    }
}
