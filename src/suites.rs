use crate::msgs::enums::{CipherSuite, SignatureScheme};

use std::fmt;

/// Bulk symmetric encryption scheme used by a cipher suite.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkAlgorithm {
    /// AES with 128-bit keys in Galois counter mode.
    Aes128Gcm,

    /// AES with 256-bit keys in Galois counter mode.
    Aes256Gcm,

    /// Chacha20 for confidentiality with poly1305 for authenticity.
    Chacha20Poly1305,
}

/// Common state for cipher suites.
pub struct CipherSuiteCommon {
    /// The TLS enumeration naming this cipher suite.
    pub suite: CipherSuite,

    /// Which bulk encryption scheme is used.
    pub bulk: BulkAlgorithm,

    /// The AEAD the record layer must use under this suite.
    pub aead_algorithm: &'static ring::aead::Algorithm,
}

/// A TLS 1.3 cipher suite supported by this engine.
pub struct Tls13CipherSuite {
    /// Common cipher suite fields.
    pub common: CipherSuiteCommon,

    /// How the suite's hash is named for HKDF purposes.
    pub(crate) hkdf_algorithm: ring::hkdf::Algorithm,
}

impl Tls13CipherSuite {
    /// Which hash function the suite uses.
    pub(crate) fn get_hash(&self) -> &'static ring::digest::Algorithm {
        self.hkdf_algorithm
            .hmac_algorithm()
            .digest_algorithm()
    }

    /// The TLS enumeration naming this suite.
    pub fn suite(&self) -> CipherSuite {
        self.common.suite
    }

    /// Can a session using the suite `prev` be resumed with this suite?
    ///
    /// In TLS 1.3 the PSK binds the hash function, not the whole suite.
    pub(crate) fn can_resume_from(&self, prev: &'static Self) -> Option<&'static Self> {
        (prev.hkdf_algorithm == self.hkdf_algorithm).then(|| prev)
    }
}

impl PartialEq for Tls13CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.common.suite == other.common.suite
    }
}

impl fmt::Debug for Tls13CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tls13CipherSuite")
            .field("suite", &self.common.suite)
            .field("bulk", &self.common.bulk)
            .finish()
    }
}

/// The TLS1.3 ciphersuite TLS_CHACHA20_POLY1305_SHA256
pub static TLS13_CHACHA20_POLY1305_SHA256: Tls13CipherSuite = Tls13CipherSuite {
    common: CipherSuiteCommon {
        suite: CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
        bulk: BulkAlgorithm::Chacha20Poly1305,
        aead_algorithm: &ring::aead::CHACHA20_POLY1305,
    },
    hkdf_algorithm: ring::hkdf::HKDF_SHA256,
};

/// The TLS1.3 ciphersuite TLS_AES_256_GCM_SHA384
pub static TLS13_AES_256_GCM_SHA384: Tls13CipherSuite = Tls13CipherSuite {
    common: CipherSuiteCommon {
        suite: CipherSuite::TLS13_AES_256_GCM_SHA384,
        bulk: BulkAlgorithm::Aes256Gcm,
        aead_algorithm: &ring::aead::AES_256_GCM,
    },
    hkdf_algorithm: ring::hkdf::HKDF_SHA384,
};

/// The TLS1.3 ciphersuite TLS_AES_128_GCM_SHA256
pub static TLS13_AES_128_GCM_SHA256: Tls13CipherSuite = Tls13CipherSuite {
    common: CipherSuiteCommon {
        suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
        bulk: BulkAlgorithm::Aes128Gcm,
        aead_algorithm: &ring::aead::AES_128_GCM,
    },
    hkdf_algorithm: ring::hkdf::HKDF_SHA256,
};

/// A list of all the cipher suites supported by this engine.
pub static ALL_CIPHER_SUITES: &[&Tls13CipherSuite] = &[
    &TLS13_AES_256_GCM_SHA384,
    &TLS13_AES_128_GCM_SHA256,
    &TLS13_CHACHA20_POLY1305_SHA256,
];

/// The cipher suite configuration that an application should use by default.
pub static DEFAULT_CIPHER_SUITES: &[&Tls13CipherSuite] = ALL_CIPHER_SUITES;

/// The signature schemes we are willing to accept in a
/// CertificateVerify and advertise in signature_algorithms,
/// in preference order.
pub static DEFAULT_SIGNATURE_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PSS_SHA512,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PSS_SHA256,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumption_requires_matching_hash() {
        assert!(TLS13_AES_128_GCM_SHA256
            .can_resume_from(&TLS13_CHACHA20_POLY1305_SHA256)
            .is_some());
        assert!(TLS13_AES_256_GCM_SHA384
            .can_resume_from(&TLS13_AES_128_GCM_SHA256)
            .is_none());
    }

    #[test]
    fn suite_hash_lengths() {
        assert_eq!(TLS13_AES_128_GCM_SHA256.get_hash().output_len, 32);
        assert_eq!(TLS13_AES_256_GCM_SHA384.get_hash().output_len, 48);
    }
}
