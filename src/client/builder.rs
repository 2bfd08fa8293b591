use crate::anchors::RootCertStore;
use crate::client::handy;
use crate::client::{AuthMode, ClientConfig, ResolvesClientCert};
use crate::error::Error;
use crate::key;
use crate::keylog::NoKeyLog;
use crate::kx::SupportedKxGroup;
use crate::msgs::enums::PSKKeyExchangeMode;
use crate::sign::{any_supported_type, CertifiedKey};
use crate::suites::Tls13CipherSuite;
use crate::verify;
use crate::versions;

use std::sync::Arc;

/// A config builder where we want to know how to verify the server's
/// certificate chain.
pub struct ConfigWantsServerVerifier {
    pub(crate) cipher_suites: Vec<&'static Tls13CipherSuite>,
    pub(crate) kx_groups: Vec<&'static SupportedKxGroup>,
    pub(crate) versions: versions::EnabledVersions,
}

impl ConfigWantsServerVerifier {
    /// Choose how to verify server certificates: against the given
    /// root store, using webpki.
    pub fn with_root_certificates(self, root_store: RootCertStore) -> ConfigWantsClientAuth {
        ConfigWantsClientAuth {
            cipher_suites: self.cipher_suites,
            kx_groups: self.kx_groups,
            versions: self.versions,
            verifier: Arc::new(verify::WebPkiVerifier::new(root_store)),
        }
    }

    /// Use a custom server certificate verifier.
    #[cfg(feature = "dangerous_configuration")]
    pub fn with_custom_certificate_verifier(
        self,
        verifier: Arc<dyn verify::ServerCertVerifier>,
    ) -> ConfigWantsClientAuth {
        ConfigWantsClientAuth {
            cipher_suites: self.cipher_suites,
            kx_groups: self.kx_groups,
            versions: self.versions,
            verifier,
        }
    }
}

/// A config builder where we want to know whether (and how) this
/// client answers CertificateRequests.
pub struct ConfigWantsClientAuth {
    cipher_suites: Vec<&'static Tls13CipherSuite>,
    kx_groups: Vec<&'static SupportedKxGroup>,
    versions: versions::EnabledVersions,
    verifier: Arc<dyn verify::ServerCertVerifier>,
}

impl ConfigWantsClientAuth {
    /// Do not support client auth.
    pub fn with_no_client_auth(self) -> ClientConfig {
        self.with_client_cert_resolver(Arc::new(handy::FailResolveClientCert {}))
    }

    /// Sets a single certificate chain and matching private key for
    /// use in client authentication.
    ///
    /// `cert_chain` is a vector of DER-encoded certificates.
    /// `key_der` is a DER-encoded RSA, ECDSA, or Ed25519 private key.
    pub fn with_single_cert(
        self,
        cert_chain: Vec<key::Certificate>,
        key_der: key::PrivateKey,
    ) -> Result<ClientConfig, Error> {
        let signing_key = any_supported_type(&key_der)?;
        let resolver =
            handy::AlwaysResolvesClientCert::new(CertifiedKey::new(cert_chain, signing_key));
        Ok(self.with_client_cert_resolver(Arc::new(resolver)))
    }

    /// Sets a custom [`ResolvesClientCert`].
    pub fn with_client_cert_resolver(
        self,
        client_auth_cert_resolver: Arc<dyn ResolvesClientCert>,
    ) -> ClientConfig {
        let signature_algorithms = self.verifier.supported_verify_schemes();

        ClientConfig {
            cipher_suites: self.cipher_suites,
            kx_groups: self.kx_groups,
            signature_algorithms,
            alpn_protocols: Vec::new(),
            session_storage: handy::ClientSessionMemoryCache::new(256),
            client_auth_cert_resolver,
            enable_tickets: true,
            versions: self.versions,
            enable_sni: true,
            verifier: self.verifier,
            server_auth_policy: AuthMode::Required,
            key_log: Arc::new(NoKeyLog {}),
            enable_early_data: false,
            max_early_data_size: u32::MAX,
            psk_modes: vec![PSKKeyExchangeMode::PSK_DHE_KE],
            external_psk: None,
            max_fragment_length: None,
            enable_middlebox_compat: true,
        }
    }
}
