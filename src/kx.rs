use crate::msgs::enums::NamedGroup;

use zeroize::Zeroizing;

/// An in-progress key exchange.  This has the algorithm, our private
/// key, and our public key.
pub(crate) struct KeyExchange {
    skxg: &'static SupportedKxGroup,
    privkey: ring::agreement::EphemeralPrivateKey,
    pub(crate) pubkey: ring::agreement::PublicKey,
}

impl KeyExchange {
    /// Choose a SupportedKxGroup by name, from a list of supported groups.
    pub(crate) fn choose(
        name: NamedGroup,
        supported: &[&'static SupportedKxGroup],
    ) -> Option<&'static SupportedKxGroup> {
        supported
            .iter()
            .find(|skxg| skxg.name == name)
            .cloned()
    }

    /// Start a key exchange, using the given SupportedKxGroup.
    ///
    /// This generates an ephemeral key pair and stores it in the returned KeyExchange object.
    pub(crate) fn start(skxg: &'static SupportedKxGroup) -> Option<Self> {
        let rng = ring::rand::SystemRandom::new();
        let ours =
            ring::agreement::EphemeralPrivateKey::generate(skxg.agreement_algorithm, &rng).ok()?;

        let pubkey = ours.compute_public_key().ok()?;

        Some(Self {
            skxg,
            privkey: ours,
            pubkey,
        })
    }

    /// Return the group being used.
    pub(crate) fn group(&self) -> NamedGroup {
        self.skxg.name
    }

    /// Completes the key exchange, given the peer's public key.
    ///
    /// The shared secret is passed into the closure passed down in `f`, and
    /// the result of calling `f` is returned to the caller.
    pub(crate) fn complete(self, peer: &[u8]) -> Option<KeyExchangeResult> {
        let peer_key = ring::agreement::UnparsedPublicKey::new(
            self.skxg.agreement_algorithm,
            peer,
        );
        ring::agreement::agree_ephemeral(self.privkey, &peer_key, (), |secret| {
            Ok(KeyExchangeResult {
                shared_secret: Zeroizing::new(secret.to_vec()),
            })
        })
        .ok()
    }
}

/// The result of a key exchange.  The shared secret is wiped on drop.
pub(crate) struct KeyExchangeResult {
    pub(crate) shared_secret: Zeroizing<Vec<u8>>,
}

/// A key-exchange group supported by this engine.
///
/// All the groups we support are routed through *ring*, whether the
/// curve arithmetic beneath is the generic elliptic-curve code or the
/// specialised X25519 implementation; the operation set is the same
/// either way: generate a keypair, export the public value, agree.
pub struct SupportedKxGroup {
    /// The IANA "TLS Supported Groups" name of the group
    pub name: NamedGroup,

    /// The corresponding ring agreement::Algorithm
    agreement_algorithm: &'static ring::agreement::Algorithm,
}

impl std::fmt::Debug for SupportedKxGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

/// Ephemeral ECDH on curve25519 (see RFC7748)
pub static X25519: SupportedKxGroup = SupportedKxGroup {
    name: NamedGroup::X25519,
    agreement_algorithm: &ring::agreement::X25519,
};

/// Ephemeral ECDH on secp256r1 (aka NIST-P256)
pub static SECP256R1: SupportedKxGroup = SupportedKxGroup {
    name: NamedGroup::secp256r1,
    agreement_algorithm: &ring::agreement::ECDH_P256,
};

/// Ephemeral ECDH on secp384r1 (aka NIST-P384)
pub static SECP384R1: SupportedKxGroup = SupportedKxGroup {
    name: NamedGroup::secp384r1,
    agreement_algorithm: &ring::agreement::ECDH_P384,
};

/// A list of all the key exchange groups supported by this engine.
pub static ALL_KX_GROUPS: [&SupportedKxGroup; 3] = [&X25519, &SECP256R1, &SECP384R1];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_agreement_matches_both_ways() {
        let ours = KeyExchange::start(&X25519).unwrap();
        let theirs = KeyExchange::start(&X25519).unwrap();

        let our_pub = ours.pubkey.as_ref().to_vec();
        let their_pub = theirs.pubkey.as_ref().to_vec();

        let secret1 = ours.complete(&their_pub).unwrap();
        let secret2 = theirs.complete(&our_pub).unwrap();
        assert_eq!(*secret1.shared_secret, *secret2.shared_secret);
    }

    #[test]
    fn garbage_peer_share_fails_cleanly() {
        let ours = KeyExchange::start(&SECP256R1).unwrap();
        assert!(ours.complete(&[0xab; 3]).is_none());
    }

    #[test]
    fn choose_is_by_name() {
        assert!(KeyExchange::choose(NamedGroup::X25519, &ALL_KX_GROUPS).is_some());
        assert!(KeyExchange::choose(NamedGroup::secp521r1, &ALL_KX_GROUPS).is_none());
    }
}
