use crate::msgs::base::PayloadU24;
use crate::msgs::codec::{Codec, Reader};

use std::fmt;

/// This type contains a private key by value.
///
/// The private key must be DER-encoded ASN.1 in either
/// PKCS#8 or PKCS#1 format.
#[derive(Debug, Clone)]
pub struct PrivateKey(pub Vec<u8>);

/// This type contains a single certificate by value.
///
/// The certificate must be DER-encoded X.509.
#[derive(Clone, Eq, PartialEq)]
pub struct Certificate(pub Vec<u8>);

impl Codec for Certificate {
    fn encode(&self, bytes: &mut Vec<u8>) {
        PayloadU24::new(self.0.clone()).encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        PayloadU24::read(r).map(|p| Self(p.0))
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use super::bs_debug::BsDebug;
        f.debug_tuple("Certificate")
            .field(&BsDebug(&self.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_codec_is_u24_prefixed() {
        let cert = Certificate(vec![1, 2, 3]);
        let enc = cert.get_encoding();
        assert_eq!(enc, vec![0, 0, 3, 1, 2, 3]);
        assert_eq!(Certificate::read_bytes(&enc).unwrap(), cert);
    }
}
