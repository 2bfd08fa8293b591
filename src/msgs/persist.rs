use crate::key;
use crate::msgs::base::{PayloadU16, PayloadU8};
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::CipherSuite;
use crate::msgs::handshake::CertificatePayload;
use crate::suites::Tls13CipherSuite;
use crate::ticketer::TimeBase;

use std::cmp;
use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

// The max ticket lifetime RFC 8446 allows a server to ask for.
static MAX_TICKET_LIFETIME: u32 = 7 * 24 * 60 * 60;

/// The keys we use to index the session storage.
#[derive(Debug)]
pub struct ClientSessionKey {
    kind: &'static [u8],
    dns_name: Vec<u8>,
}

impl Codec for ClientSessionKey {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(self.kind);
        bytes.extend_from_slice(&self.dns_name);
    }

    // Don't need to read these.
    fn read(_r: &mut Reader) -> Option<Self> {
        None
    }
}

impl ClientSessionKey {
    pub fn session_for_dns_name(dns_name: webpki::DnsNameRef) -> Self {
        let name: &str = dns_name.into();
        Self {
            kind: b"session",
            dns_name: name.as_bytes().to_vec(),
        }
    }

    pub fn hint_for_dns_name(dns_name: webpki::DnsNameRef) -> Self {
        let name: &str = dns_name.into();
        Self {
            kind: b"kx",
            dns_name: name.as_bytes().to_vec(),
        }
    }
}

/// A client's recollection of a resumable session: the ticket, the
/// PSK derived from the resumption master secret, and the bookkeeping
/// needed to present a credible obfuscated ticket age later.
#[derive(Debug)]
pub struct ClientSessionValue {
    pub cipher_suite: CipherSuite,
    pub ticket: PayloadU16,
    pub master_secret: PayloadU8,
    epoch: u64,
    lifetime: u32,
    age_add: u32,
    pub max_early_data_size: u32,
    pub server_cert_chain: CertificatePayload,
    pub alpn: Option<PayloadU8>,
}

impl Codec for ClientSessionValue {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.cipher_suite.encode(bytes);
        self.ticket.encode(bytes);
        self.master_secret.encode(bytes);
        self.epoch.encode(bytes);
        self.lifetime.encode(bytes);
        self.age_add.encode(bytes);
        self.max_early_data_size.encode(bytes);

        (self.server_cert_chain.len() as u8).encode(bytes);
        for cert in &self.server_cert_chain {
            cert.encode(bytes);
        }

        match &self.alpn {
            Some(alpn) => {
                1u8.encode(bytes);
                alpn.encode(bytes);
            }
            None => 0u8.encode(bytes),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let cipher_suite = CipherSuite::read(r)?;
        let ticket = PayloadU16::read(r)?;
        let master_secret = PayloadU8::read(r)?;
        let epoch = u64::read(r)?;
        let lifetime = u32::read(r)?;
        let age_add = u32::read(r)?;
        let max_early_data_size = u32::read(r)?;

        let cert_count = u8::read(r)?;
        let mut server_cert_chain = Vec::with_capacity(usize::from(cert_count));
        for _ in 0..cert_count {
            server_cert_chain.push(key::Certificate::read(r)?);
        }

        let alpn = match u8::read(r)? {
            1 => Some(PayloadU8::read(r)?),
            0 => None,
            _ => return None,
        };

        Some(Self {
            cipher_suite,
            ticket,
            master_secret,
            epoch,
            lifetime,
            age_add,
            max_early_data_size,
            server_cert_chain,
            alpn,
        })
    }
}

impl Drop for ClientSessionValue {
    fn drop(&mut self) {
        self.master_secret.0.zeroize();
    }
}

impl ClientSessionValue {
    pub fn new(
        cipher_suite: CipherSuite,
        ticket: Vec<u8>,
        master_secret: Vec<u8>,
        server_cert_chain: &CertificatePayload,
        time_now: TimeBase,
    ) -> Self {
        Self {
            cipher_suite,
            ticket: PayloadU16::new(ticket),
            master_secret: PayloadU8::new(master_secret),
            epoch: time_now.as_secs(),
            lifetime: 0,
            age_add: 0,
            max_early_data_size: 0,
            server_cert_chain: server_cert_chain.clone(),
            alpn: None,
        }
    }

    pub fn set_times(&mut self, lifetime_secs: u32, age_add: u32) {
        self.lifetime = cmp::min(lifetime_secs, MAX_TICKET_LIFETIME);
        self.age_add = age_add;
    }

    pub fn set_max_early_data_size(&mut self, sz: u32) {
        self.max_early_data_size = sz;
    }

    /// A ticket whose receipt timestamp is in the future (the clock
    /// went backwards) counts as expired: a credible ticket age can
    /// no longer be computed for it.
    pub fn has_expired(&self, time_now: TimeBase) -> bool {
        let now = time_now.as_secs();
        self.lifetime != 0
            && (self.epoch > now || self.epoch + u64::from(self.lifetime) < now)
    }

    pub fn get_obfuscated_ticket_age(&self, time_now: TimeBase) -> u32 {
        let age_secs = time_now
            .as_secs()
            .saturating_sub(self.epoch);
        let age_millis = age_secs as u32 * 1000;
        age_millis.wrapping_add(self.age_add)
    }

    pub fn time_retrieved(&self) -> u64 {
        self.epoch
    }

    pub fn resolve_cipher_suite(
        self,
        supported: &[&'static Tls13CipherSuite],
    ) -> Option<ClientSessionValueWithResolvedCipherSuite> {
        let suite = supported
            .iter()
            .find(|s| s.suite() == self.cipher_suite)?;

        Some(ClientSessionValueWithResolvedCipherSuite {
            value: self,
            suite,
        })
    }
}

/// A `ClientSessionValue` whose cipher suite id has been checked
/// against the currently configured suites.
#[derive(Debug)]
pub struct ClientSessionValueWithResolvedCipherSuite {
    value: ClientSessionValue,
    suite: &'static Tls13CipherSuite,
}

impl ClientSessionValueWithResolvedCipherSuite {
    pub fn supported_cipher_suite(&self) -> &'static Tls13CipherSuite {
        self.suite
    }
}

impl Deref for ClientSessionValueWithResolvedCipherSuite {
    type Target = ClientSessionValue;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl DerefMut for ClientSessionValueWithResolvedCipherSuite {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites::ALL_CIPHER_SUITES;

    fn fixed_time(secs: u64) -> TimeBase {
        TimeBase::from_secs_for_test(secs)
    }

    fn sample(now: TimeBase) -> ClientSessionValue {
        ClientSessionValue::new(
            crate::msgs::enums::CipherSuite::TLS13_AES_128_GCM_SHA256,
            vec![1, 2, 3],
            vec![0x55; 32],
            &vec![key::Certificate(vec![9, 9])],
            now,
        )
    }

    #[test]
    fn round_trip_through_storage_encoding() {
        let mut v = sample(fixed_time(1000));
        v.set_times(3600, 0xaabbccdd);
        v.set_max_early_data_size(16384);
        let enc = v.get_encoding();
        let parsed = ClientSessionValue::read_bytes(&enc).unwrap();
        assert_eq!(parsed.get_encoding(), enc);
        assert_eq!(parsed.max_early_data_size, 16384);
    }

    #[test]
    fn lifetime_is_capped_and_expiry_checked() {
        let mut v = sample(fixed_time(1000));
        v.set_times(MAX_TICKET_LIFETIME + 5, 0);
        assert!(!v.has_expired(fixed_time(1000 + 60)));
        assert!(v.has_expired(fixed_time(1000 + u64::from(MAX_TICKET_LIFETIME) + 1)));
    }

    #[test]
    fn ticket_from_the_future_counts_as_expired() {
        let mut v = sample(fixed_time(5000));
        v.set_times(3600, 0);
        assert!(v.has_expired(fixed_time(4000)));
    }

    #[test]
    fn obfuscated_age_wraps_modulo_2_to_32() {
        let mut v = sample(fixed_time(1000));
        v.set_times(3600, u32::MAX);
        // 2 seconds later: 2000ms + (2^32 - 1) wraps to 1999
        assert_eq!(v.get_obfuscated_ticket_age(fixed_time(1002)), 1999);
    }

    #[test]
    fn resolve_requires_configured_suite() {
        let v = sample(fixed_time(0));
        assert!(v
            .resolve_cipher_suite(ALL_CIPHER_SUITES)
            .is_some());

        let v = ClientSessionValue::new(
            crate::msgs::enums::CipherSuite::Unknown(0x4242),
            vec![],
            vec![],
            &vec![],
            fixed_time(0),
        );
        assert!(v.resolve_cipher_suite(ALL_CIPHER_SUITES).is_none());
    }
}
