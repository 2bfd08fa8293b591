use crate::key_schedule::hkdf_expand;
use crate::suites::Tls13CipherSuite;

use ring::hkdf;
use zeroize::Zeroizing;

/// A write or read IV for an AEAD suite.
pub struct Iv(pub(crate) [u8; ring::aead::NONCE_LEN]);

impl Iv {
    /// The raw IV bytes, for the record layer to fold sequence
    /// numbers into.
    pub fn value(&self) -> &[u8; ring::aead::NONCE_LEN] {
        &self.0
    }
}

pub(crate) struct IvLen;

impl hkdf::KeyType for IvLen {
    fn len(&self) -> usize {
        ring::aead::NONCE_LEN
    }
}

impl From<hkdf::Okm<'_, IvLen>> for Iv {
    fn from(okm: hkdf::Okm<IvLen>) -> Self {
        let mut r = Self([0u8; ring::aead::NONCE_LEN]);
        okm.fill(&mut r.0[..]).unwrap();
        r
    }
}

impl Drop for Iv {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.0.zeroize();
    }
}

/// A raw AEAD key of the length the suite's algorithm demands,
/// destined for the record layer.  Wiped on drop.
pub struct AeadKey(Zeroizing<Vec<u8>>);

impl AeadKey {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl AsRef<[u8]> for AeadKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

struct AeadKeyLen(usize);

impl hkdf::KeyType for AeadKeyLen {
    fn len(&self) -> usize {
        self.0
    }
}

impl From<hkdf::Okm<'_, AeadKeyLen>> for AeadKey {
    fn from(okm: hkdf::Okm<AeadKeyLen>) -> Self {
        let mut r = vec![0u8; okm.len().0];
        okm.fill(&mut r[..]).unwrap();
        Self::new(r)
    }
}

/// One direction's record protection material, as handed to the
/// record layer when an epoch switches.
pub struct TrafficKeys {
    /// The AEAD the record layer must key itself with.
    pub aead_algorithm: &'static ring::aead::Algorithm,
    /// The expanded write (or read) key.
    pub key: AeadKey,
    /// The expanded write (or read) IV.
    pub iv: Iv,
}

/// Expand a traffic secret into the concrete key and IV the record
/// layer needs for the next epoch of `suite`.
pub(crate) fn new_tls13_traffic_keys(
    suite: &'static Tls13CipherSuite,
    secret: &hkdf::Prk,
) -> TrafficKeys {
    let key = hkdf_expand(
        secret,
        AeadKeyLen(suite.common.aead_algorithm.key_len()),
        b"key",
        &[],
    );
    let iv = hkdf_expand(secret, IvLen, b"iv", &[]);

    TrafficKeys {
        aead_algorithm: suite.common.aead_algorithm,
        key,
        iv,
    }
}
