use crate::client::builder::ConfigWantsServerVerifier;
use crate::error::Error;
use crate::kx::{SupportedKxGroup, ALL_KX_GROUPS};
use crate::msgs::enums::ProtocolVersion;
use crate::suites::{Tls13CipherSuite, DEFAULT_CIPHER_SUITES};
use crate::versions;

/// Building a [`ClientConfig`] in a linker-friendly way.
///
/// Linker-friendly: meaning unused cipher suites, protocol
/// versions, key exchange mechanisms, etc. can be discarded
/// by the linker as they'll be unreferenced.
///
/// Example:
///
/// ```no_run
/// # use thintls::config_builder;
/// # let root_certs = thintls::RootCertStore::empty();
/// config_builder()
///     .with_safe_default_cipher_suites()
///     .with_safe_default_kx_groups()
///     .with_safe_default_protocol_versions()
///     .for_client()
///     .unwrap()
///     .with_root_certificates(root_certs)
///     .with_no_client_auth();
/// ```
///
/// This may be shortened to:
///
/// ```
/// # use thintls::client_config_builder_with_safe_defaults;
/// # let root_certs = thintls::RootCertStore::empty();
/// client_config_builder_with_safe_defaults()
///     .with_root_certificates(root_certs)
///     .with_no_client_auth();
/// ```
///
/// The types used here fit together like this:
///
/// 1. You must make a decision on which cipher suites to use, typically
///    by calling [`ConfigWantsCipherSuites::with_safe_default_cipher_suites()`].
/// 2. Now you must make a decision
///    on key exchange groups: typically by calling [`ConfigWantsKxGroups::with_safe_default_kx_groups()`].
/// 3. Now you must make
///    a decision on which protocol versions to support, typically by calling
///    [`ConfigWantsVersions::with_safe_default_protocol_versions()`].
/// 4. Since this engine is client-side only, call
///    [`ConfigWantsPeerType::for_client()`], which checks the previous
///    choices hang together.
/// 5. Now see [`ConfigWantsServerVerifier`] for further steps.
///
/// [`ClientConfig`]: crate::ClientConfig
pub fn config_builder() -> ConfigWantsCipherSuites {
    ConfigWantsCipherSuites {}
}

/// Start building a [`ClientConfig`] and accept defaults for underlying
/// cryptography.
///
/// These are safe defaults, useful for 99% of applications.
///
/// [`ClientConfig`]: crate::ClientConfig
pub fn client_config_builder_with_safe_defaults() -> ConfigWantsServerVerifier {
    // this function exists to express that for_client is infallible when
    // using defaults.
    config_builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_safe_default_protocol_versions()
        .for_client()
        .unwrap()
}

/// A config builder where we want to know the cipher suites.
pub struct ConfigWantsCipherSuites;

impl ConfigWantsCipherSuites {
    /// Choose a specific set of cipher suites.
    pub fn with_cipher_suites(
        &self,
        cipher_suites: &[&'static Tls13CipherSuite],
    ) -> ConfigWantsKxGroups {
        ConfigWantsKxGroups {
            cipher_suites: cipher_suites.to_vec(),
        }
    }

    /// Choose the default set of cipher suites.
    ///
    /// Note that this default provides only high-quality suites: there is no need
    /// to filter out low-, export- or NULL-strength cipher suites: this engine
    /// does not implement these.
    pub fn with_safe_default_cipher_suites(&self) -> ConfigWantsKxGroups {
        self.with_cipher_suites(DEFAULT_CIPHER_SUITES)
    }
}

/// A config builder where we want to know which key exchange groups to use.
pub struct ConfigWantsKxGroups {
    cipher_suites: Vec<&'static Tls13CipherSuite>,
}

impl ConfigWantsKxGroups {
    /// Choose a specific set of key exchange groups.
    pub fn with_kx_groups(self, kx_groups: &[&'static SupportedKxGroup]) -> ConfigWantsVersions {
        ConfigWantsVersions {
            cipher_suites: self.cipher_suites,
            kx_groups: kx_groups.to_vec(),
        }
    }

    /// Choose the default set of key exchange groups.
    ///
    /// This is a safe default: this engine doesn't implement any poor-quality groups.
    pub fn with_safe_default_kx_groups(self) -> ConfigWantsVersions {
        self.with_kx_groups(&ALL_KX_GROUPS)
    }
}

/// A config builder where we want to know the TLS versions.
pub struct ConfigWantsVersions {
    cipher_suites: Vec<&'static Tls13CipherSuite>,
    kx_groups: Vec<&'static SupportedKxGroup>,
}

impl ConfigWantsVersions {
    /// Accept the default protocol versions: TLS1.3, plus TLS1.2
    /// enabled for downgrade detection.
    pub fn with_safe_default_protocol_versions(self) -> ConfigWantsPeerType {
        self.with_protocol_versions(versions::DEFAULT_VERSIONS)
    }

    /// Use a specific set of protocol versions.
    pub fn with_protocol_versions(
        self,
        versions: &[&'static versions::SupportedProtocolVersion],
    ) -> ConfigWantsPeerType {
        ConfigWantsPeerType {
            cipher_suites: self.cipher_suites,
            kx_groups: self.kx_groups,
            versions: versions::EnabledVersions::new(versions),
        }
    }
}

/// A config builder ready to check the previous choices hang together.
/// The endpoint role is fixed: this engine only implements the client.
pub struct ConfigWantsPeerType {
    cipher_suites: Vec<&'static Tls13CipherSuite>,
    kx_groups: Vec<&'static SupportedKxGroup>,
    versions: versions::EnabledVersions,
}

impl ConfigWantsPeerType {
    fn validate(&self) -> Result<(), Error> {
        if !self.versions.contains(ProtocolVersion::TLSv1_3) {
            return Err(Error::General(
                "TLS 1.3 must be among the enabled versions".into(),
            ));
        }

        if self.cipher_suites.is_empty() {
            return Err(Error::General("no usable cipher suites configured".into()));
        }

        if self.kx_groups.is_empty() {
            return Err(Error::General("no kx groups configured".into()));
        }

        Ok(())
    }

    /// This config is for a client. Continue by setting client-related options.
    ///
    /// This may fail, if the previous selections are contradictory or
    /// not useful (for example, if no protocol versions are enabled).
    pub fn for_client(self) -> Result<ConfigWantsServerVerifier, Error> {
        self.validate()?;
        Ok(ConfigWantsServerVerifier {
            cipher_suites: self.cipher_suites,
            kx_groups: self.kx_groups,
            versions: self.versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::TLS12;

    #[test]
    fn rejects_tls12_only() {
        assert!(config_builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(&[&TLS12])
            .for_client()
            .is_err());
    }

    #[test]
    fn rejects_empty_suites_or_groups() {
        assert!(config_builder()
            .with_cipher_suites(&[])
            .with_safe_default_kx_groups()
            .with_safe_default_protocol_versions()
            .for_client()
            .is_err());

        assert!(config_builder()
            .with_safe_default_cipher_suites()
            .with_kx_groups(&[])
            .with_safe_default_protocol_versions()
            .for_client()
            .is_err());
    }
}
