use crate::key;
use crate::msgs::base::{Payload, PayloadU16, PayloadU8};
use crate::msgs::codec;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{
    CipherSuite, Compression, ExtensionType, HandshakeType, MaxFragmentLength, NamedGroup,
    PSKKeyExchangeMode, ProtocolVersion, ServerNameType,
};
use crate::msgs::enums::{KeyUpdateRequest, SignatureScheme};
use crate::rand;

use std::collections;
use std::fmt;

/// Create a newtype wrapper around a given type.
///
/// This is used to create newtypes for the various TLS message types which
/// helps to reduce the chance of confusing one of the many `Vec<u8>`-like
/// types with another.
macro_rules! wrapped_payload(
  ($(#[$comment:meta])* $vis:vis struct $name:ident, $inner:ident,) => {
    $(#[$comment])*
    #[derive(Clone, Debug, PartialEq)]
    $vis struct $name($inner);

    impl From<Vec<u8>> for $name {
        fn from(v: Vec<u8>) -> Self {
            Self($inner::new(v))
        }
    }

    impl AsRef<[u8]> for $name {
        fn as_ref(&self) -> &[u8] {
            self.0.0.as_slice()
        }
    }

    impl Codec for $name {
        fn encode(&self, bytes: &mut Vec<u8>) {
            self.0.encode(bytes);
        }

        fn read(r: &mut Reader) -> Option<Self> {
            Some(Self($inner::read(r)?))
        }
    }
  }
);

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Random(pub [u8; 32]);

/// The fixed ServerHello.random value that marks a HelloRetryRequest.
pub static HELLO_RETRY_REQUEST_RANDOM: Random = Random([
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8,
    0x91, 0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8,
    0x33, 0x9c,
]);

static ZERO_RANDOM: Random = Random([0u8; 32]);

impl Codec for Random {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let bytes = r.take(32)?;
        let mut opaque = [0; 32];
        opaque.clone_from_slice(bytes);

        Some(Self(opaque))
    }
}

impl Random {
    pub fn new() -> Result<Self, rand::GetRandomFailed> {
        let mut data = [0u8; 32];
        rand::fill_random(&mut data)?;
        Ok(Self(data))
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        super::base::hex(f, &self.0)
    }
}

impl From<[u8; 32]> for Random {
    #[inline]
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[derive(Copy, Clone)]
pub struct SessionID {
    len: usize,
    data: [u8; 32],
}

impl fmt::Debug for SessionID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        super::base::hex(f, &self.data[..self.len])
    }
}

impl PartialEq for SessionID {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }

        let mut diff = 0u8;
        for i in 0..self.len {
            diff |= self.data[i] ^ other.data[i];
        }

        diff == 0u8
    }
}

impl Codec for SessionID {
    fn encode(&self, bytes: &mut Vec<u8>) {
        debug_assert!(self.len <= 32);
        bytes.push(self.len as u8);
        bytes.extend_from_slice(&self.data[..self.len]);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let len = u8::read(r)? as usize;
        if len > 32 {
            return None;
        }

        let bytes = r.take(len)?;
        let mut out = [0u8; 32];
        out[..len].clone_from_slice(&bytes[..len]);

        Some(Self { data: out, len })
    }
}

impl SessionID {
    pub fn random() -> Result<Self, rand::GetRandomFailed> {
        let mut data = [0u8; 32];
        rand::fill_random(&mut data)?;
        Ok(Self { data, len: 32 })
    }

    pub fn empty() -> Self {
        Self {
            data: [0u8; 32],
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Clone, Debug)]
pub struct UnknownExtension {
    pub typ: ExtensionType,
    pub payload: Payload,
}

impl UnknownExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.payload.encode(bytes);
    }

    fn read(typ: ExtensionType, r: &mut Reader) -> Self {
        let payload = Payload::new(r.rest());
        Self { typ, payload }
    }
}

wrapped_payload!(
    /// A single ALPN protocol name.
    pub struct ProtocolName, PayloadU8,
);

pub type ProtocolNameList = Vec<ProtocolName>;

pub trait ConvertProtocolNameList {
    fn from_slices(names: &[&[u8]]) -> Self;
    fn to_vecs(&self) -> Vec<Vec<u8>>;
    fn as_single_slice(&self) -> Option<&[u8]>;
}

impl ConvertProtocolNameList for ProtocolNameList {
    fn from_slices(names: &[&[u8]]) -> Self {
        let mut ret = Self::new();

        for name in names {
            ret.push(ProtocolName::from(name.to_vec()));
        }

        ret
    }

    fn to_vecs(&self) -> Vec<Vec<u8>> {
        let mut ret = Vec::new();

        for proto in self {
            ret.push(proto.as_ref().to_vec());
        }

        ret
    }

    fn as_single_slice(&self) -> Option<&[u8]> {
        if self.len() == 1 {
            Some(self[0].as_ref())
        } else {
            None
        }
    }
}

#[derive(Clone, Debug)]
pub enum ServerNamePayload {
    // Stored twice, both as the original bytes for exact re-encoding
    // and as a validated DNS name for use elsewhere.
    HostName((PayloadU16, webpki::DnsName)),
    Unknown(Payload),
}

impl ServerNamePayload {
    pub fn new_hostname(hostname: webpki::DnsName) -> Self {
        let raw = {
            let s: &str = hostname.as_ref().into();
            PayloadU16::new(s.as_bytes().to_vec())
        };
        Self::HostName((raw, hostname))
    }

    fn read_hostname(r: &mut Reader) -> Option<Self> {
        let raw = PayloadU16::read(r)?;

        let dns_name = match webpki::DnsNameRef::try_from_ascii(&raw.0) {
            Ok(dns_name) => dns_name.into(),
            Err(_) => return None,
        };

        Some(Self::HostName((raw, dns_name)))
    }

    fn encode_hostname(raw: &PayloadU16, bytes: &mut Vec<u8>) {
        ServerNameType::HostName.encode(bytes);
        raw.encode(bytes);
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        match *self {
            Self::HostName((ref raw, _)) => Self::encode_hostname(raw, bytes),
            Self::Unknown(ref r) => r.encode(bytes),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerName {
    pub typ: ServerNameType,
    pub payload: ServerNamePayload,
}

impl Codec for ServerName {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.payload.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ServerNameType::read(r)?;

        let payload = match typ {
            ServerNameType::HostName => ServerNamePayload::read_hostname(r)?,
            _ => ServerNamePayload::Unknown(Payload::read(r)?),
        };

        Some(Self { typ, payload })
    }
}

pub type ServerNameRequest = Vec<ServerName>;

pub trait ConvertServerNameList {
    fn has_duplicate_names_for_type(&self) -> bool;
    fn get_single_hostname(&self) -> Option<webpki::DnsNameRef>;
}

impl ConvertServerNameList for ServerNameRequest {
    /// RFC6066: "The ServerNameList MUST NOT contain more than one name of
    /// the same name_type."
    fn has_duplicate_names_for_type(&self) -> bool {
        let mut seen = collections::HashSet::new();

        for name in self {
            if !seen.insert(name.typ.get_u8()) {
                return true;
            }
        }

        false
    }

    fn get_single_hostname(&self) -> Option<webpki::DnsNameRef> {
        fn only_dns_hostnames(name: &ServerName) -> Option<webpki::DnsNameRef> {
            if let ServerNamePayload::HostName((_, ref dns)) = name.payload {
                Some(dns.as_ref())
            } else {
                None
            }
        }

        self.iter()
            .filter_map(only_dns_hostnames)
            .next()
    }
}

#[derive(Clone, Debug)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub payload: PayloadU16,
}

impl KeyShareEntry {
    pub fn new(group: NamedGroup, payload: &[u8]) -> Self {
        Self {
            group,
            payload: PayloadU16::new(payload.to_vec()),
        }
    }
}

impl Codec for KeyShareEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.group.encode(bytes);
        self.payload.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let group = NamedGroup::read(r)?;
        let payload = PayloadU16::read(r)?;

        Some(Self { group, payload })
    }
}

#[derive(Clone, Debug)]
pub struct PresharedKeyIdentity {
    pub identity: PayloadU16,
    pub obfuscated_ticket_age: u32,
}

impl PresharedKeyIdentity {
    pub fn new(id: Vec<u8>, age: u32) -> Self {
        Self {
            identity: PayloadU16::new(id),
            obfuscated_ticket_age: age,
        }
    }
}

impl Codec for PresharedKeyIdentity {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.identity.encode(bytes);
        self.obfuscated_ticket_age.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            identity: PayloadU16::read(r)?,
            obfuscated_ticket_age: u32::read(r)?,
        })
    }
}

wrapped_payload!(pub struct PresharedKeyBinder, PayloadU8,);

#[derive(Clone, Debug)]
pub struct PresharedKeyOffer {
    pub identities: Vec<PresharedKeyIdentity>,
    pub binders: Vec<PresharedKeyBinder>,
}

impl PresharedKeyOffer {
    /// Make a new one with one entry.
    pub fn new(id: PresharedKeyIdentity, binder: Vec<u8>) -> Self {
        Self {
            identities: vec![id],
            binders: vec![PresharedKeyBinder::from(binder)],
        }
    }
}

impl Codec for PresharedKeyOffer {
    fn encode(&self, bytes: &mut Vec<u8>) {
        codec::encode_vec_u16(bytes, &self.identities);
        codec::encode_vec_u16(bytes, &self.binders);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            identities: codec::read_vec_u16::<PresharedKeyIdentity>(r)?,
            binders: codec::read_vec_u16::<PresharedKeyBinder>(r)?,
        })
    }
}

#[derive(Clone, Debug)]
pub enum ClientExtension {
    NamedGroups(Vec<NamedGroup>),
    SignatureAlgorithms(Vec<SignatureScheme>),
    ServerName(ServerNameRequest),
    Protocols(ProtocolNameList),
    SupportedVersions(Vec<ProtocolVersion>),
    KeyShare(Vec<KeyShareEntry>),
    PresharedKeyModes(Vec<PSKKeyExchangeMode>),
    PresharedKey(PresharedKeyOffer),
    Cookie(PayloadU16),
    EarlyData,
    MaxFragmentLength(MaxFragmentLength),
    Unknown(UnknownExtension),
}

impl ClientExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::NamedGroups(_) => ExtensionType::EllipticCurves,
            Self::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms,
            Self::ServerName(_) => ExtensionType::ServerName,
            Self::Protocols(_) => ExtensionType::ALProtocolNegotiation,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::PresharedKeyModes(_) => ExtensionType::PSKKeyExchangeModes,
            Self::PresharedKey(_) => ExtensionType::PreSharedKey,
            Self::Cookie(_) => ExtensionType::Cookie,
            Self::EarlyData => ExtensionType::EarlyData,
            Self::MaxFragmentLength(_) => ExtensionType::MaxFragmentLength,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for ClientExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let nested = LengthPrefixed::new(bytes);
        match *self {
            Self::NamedGroups(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::SignatureAlgorithms(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::ServerName(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::Protocols(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::SupportedVersions(ref r) => codec::encode_vec_u8(nested.buf, r),
            Self::KeyShare(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::PresharedKeyModes(ref r) => codec::encode_vec_u8(nested.buf, r),
            Self::PresharedKey(ref r) => r.encode(nested.buf),
            Self::Cookie(ref r) => r.encode(nested.buf),
            Self::EarlyData => {}
            Self::MaxFragmentLength(ref r) => r.encode(nested.buf),
            Self::Unknown(ref r) => r.encode(nested.buf),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = usize::from(u16::read(r)?);
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::EllipticCurves => Self::NamedGroups(codec::read_vec_u16(&mut sub)?),
            ExtensionType::SignatureAlgorithms => {
                Self::SignatureAlgorithms(codec::read_vec_u16(&mut sub)?)
            }
            ExtensionType::ServerName => Self::ServerName(codec::read_vec_u16(&mut sub)?),
            ExtensionType::ALProtocolNegotiation => {
                Self::Protocols(codec::read_vec_u16(&mut sub)?)
            }
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(codec::read_vec_u8(&mut sub)?)
            }
            ExtensionType::KeyShare => Self::KeyShare(codec::read_vec_u16(&mut sub)?),
            ExtensionType::PSKKeyExchangeModes => {
                Self::PresharedKeyModes(codec::read_vec_u8(&mut sub)?)
            }
            ExtensionType::PreSharedKey => Self::PresharedKey(PresharedKeyOffer::read(&mut sub)?),
            ExtensionType::Cookie => Self::Cookie(PayloadU16::read(&mut sub)?),
            ExtensionType::EarlyData if !sub.any_left() => Self::EarlyData,
            ExtensionType::MaxFragmentLength => {
                Self::MaxFragmentLength(MaxFragmentLength::read(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

impl ClientExtension {
    /// Make a basic SNI ServerNameRequest quoting `hostname`.
    pub fn make_sni(dns_name: webpki::DnsNameRef) -> Self {
        let name = ServerName {
            typ: ServerNameType::HostName,
            payload: ServerNamePayload::new_hostname(dns_name.into()),
        };

        Self::ServerName(vec![name])
    }
}

#[derive(Clone, Debug)]
pub enum ServerExtension {
    ServerNameAck,
    Protocols(ProtocolNameList),
    KeyShare(KeyShareEntry),
    PresharedKey(u16),
    SupportedVersions(ProtocolVersion),
    EarlyData,
    MaxFragmentLength(MaxFragmentLength),
    Unknown(UnknownExtension),
}

impl ServerExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::ServerNameAck => ExtensionType::ServerName,
            Self::Protocols(_) => ExtensionType::ALProtocolNegotiation,
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::PresharedKey(_) => ExtensionType::PreSharedKey,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::EarlyData => ExtensionType::EarlyData,
            Self::MaxFragmentLength(_) => ExtensionType::MaxFragmentLength,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for ServerExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let nested = LengthPrefixed::new(bytes);
        match *self {
            Self::ServerNameAck | Self::EarlyData => {}
            Self::Protocols(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::KeyShare(ref r) => r.encode(nested.buf),
            Self::PresharedKey(r) => r.encode(nested.buf),
            Self::SupportedVersions(ref r) => r.encode(nested.buf),
            Self::MaxFragmentLength(ref r) => r.encode(nested.buf),
            Self::Unknown(ref r) => r.encode(nested.buf),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = usize::from(u16::read(r)?);
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::ServerName if !sub.any_left() => Self::ServerNameAck,
            ExtensionType::ALProtocolNegotiation => {
                Self::Protocols(codec::read_vec_u16(&mut sub)?)
            }
            ExtensionType::KeyShare => Self::KeyShare(KeyShareEntry::read(&mut sub)?),
            ExtensionType::PreSharedKey => Self::PresharedKey(u16::read(&mut sub)?),
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(ProtocolVersion::read(&mut sub)?)
            }
            ExtensionType::EarlyData if !sub.any_left() => Self::EarlyData,
            ExtensionType::MaxFragmentLength => {
                Self::MaxFragmentLength(MaxFragmentLength::read(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

/// Helper to write a length-prefixed extension body: reserves a u16
/// length slot on construction and patches it on drop.
struct LengthPrefixed<'a> {
    buf: &'a mut Vec<u8>,
    len_offset: usize,
}

impl<'a> LengthPrefixed<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        let len_offset = buf.len();
        buf.extend([0, 0]);
        Self { buf, len_offset }
    }
}

impl<'a> Drop for LengthPrefixed<'a> {
    fn drop(&mut self) {
        let len = self.buf.len() - self.len_offset - 2;
        debug_assert!(len <= 0xffff);
        codec::put_u16(
            len as u16,
            &mut self.buf[self.len_offset..self.len_offset + 2],
        );
    }
}

fn has_duplicates<I: IntoIterator<Item = u16>>(iter: I) -> bool {
    let mut seen = collections::HashSet::new();

    for x in iter {
        if !seen.insert(x) {
            return true;
        }
    }

    false
}

#[derive(Debug, Clone)]
pub struct ClientHelloPayload {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionID,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<Compression>,
    pub extensions: Vec<ClientExtension>,
}

impl Codec for ClientHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.client_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        codec::encode_vec_u16(bytes, &self.cipher_suites);
        codec::encode_vec_u8(bytes, &self.compression_methods);

        if !self.extensions.is_empty() {
            codec::encode_vec_u16(bytes, &self.extensions);
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let mut ret = Self {
            client_version: ProtocolVersion::read(r)?,
            random: Random::read(r)?,
            session_id: SessionID::read(r)?,
            cipher_suites: codec::read_vec_u16::<CipherSuite>(r)?,
            compression_methods: codec::read_vec_u8::<Compression>(r)?,
            extensions: Vec::new(),
        };

        if r.any_left() {
            ret.extensions = codec::read_vec_u16::<ClientExtension>(r)?;
        }

        if r.any_left() || ret.extensions.is_empty() {
            None
        } else {
            Some(ret)
        }
    }
}

impl ClientHelloPayload {
    /// Returns true if there is more than one extension of a given
    /// type.
    pub fn has_duplicate_extension(&self) -> bool {
        has_duplicates(
            self.extensions
                .iter()
                .map(|ext| ext.get_type().get_u16()),
        )
    }

    pub fn find_extension(&self, ext: ExtensionType) -> Option<&ClientExtension> {
        self.extensions
            .iter()
            .find(|x| x.get_type() == ext)
    }

    pub fn get_keyshare_extension(&self) -> Option<&[KeyShareEntry]> {
        let ext = self.find_extension(ExtensionType::KeyShare)?;
        match *ext {
            ClientExtension::KeyShare(ref shares) => Some(shares),
            _ => None,
        }
    }

    pub fn get_psk(&self) -> Option<&PresharedKeyOffer> {
        let ext = self.find_extension(ExtensionType::PreSharedKey)?;
        match *ext {
            ClientExtension::PresharedKey(ref psk) => Some(psk),
            _ => None,
        }
    }

    pub fn get_versions(&self) -> Option<&[ProtocolVersion]> {
        let ext = self.find_extension(ExtensionType::SupportedVersions)?;
        match *ext {
            ClientExtension::SupportedVersions(ref vs) => Some(vs),
            _ => None,
        }
    }

    pub fn psk_mode_offered(&self, mode: PSKKeyExchangeMode) -> bool {
        self.find_extension(ExtensionType::PSKKeyExchangeModes)
            .and_then(|ext| match *ext {
                ClientExtension::PresharedKeyModes(ref modes) => Some(modes.contains(&mode)),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn set_psk_binder(&mut self, binder: impl Into<Vec<u8>>) {
        let last_extension = self.extensions.last_mut();
        if let Some(ClientExtension::PresharedKey(ref mut offer)) = last_extension {
            offer.binders[0] = PresharedKeyBinder::from(binder.into());
        }
    }
}

#[derive(Debug, Clone)]
pub struct HelloRetryRequest {
    pub legacy_version: ProtocolVersion,
    pub session_id: SessionID,
    pub cipher_suite: CipherSuite,
    pub extensions: Vec<HelloRetryExtension>,
}

#[derive(Clone, Debug)]
pub enum HelloRetryExtension {
    KeyShare(NamedGroup),
    Cookie(PayloadU16),
    SupportedVersions(ProtocolVersion),
    Unknown(UnknownExtension),
}

impl HelloRetryExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::KeyShare(_) => ExtensionType::KeyShare,
            Self::Cookie(_) => ExtensionType::Cookie,
            Self::SupportedVersions(_) => ExtensionType::SupportedVersions,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for HelloRetryExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let nested = LengthPrefixed::new(bytes);
        match *self {
            Self::KeyShare(ref r) => r.encode(nested.buf),
            Self::Cookie(ref r) => r.encode(nested.buf),
            Self::SupportedVersions(ref r) => r.encode(nested.buf),
            Self::Unknown(ref r) => r.encode(nested.buf),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = usize::from(u16::read(r)?);
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::KeyShare => Self::KeyShare(NamedGroup::read(&mut sub)?),
            ExtensionType::Cookie => Self::Cookie(PayloadU16::read(&mut sub)?),
            ExtensionType::SupportedVersions => {
                Self::SupportedVersions(ProtocolVersion::read(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

impl Codec for HelloRetryRequest {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        HELLO_RETRY_REQUEST_RANDOM.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        Compression::Null.encode(bytes);
        codec::encode_vec_u16(bytes, &self.extensions);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let session_id = SessionID::read(r)?;
        let cipher_suite = CipherSuite::read(r)?;
        let compression = Compression::read(r)?;

        if compression != Compression::Null {
            return None;
        }

        Some(Self {
            legacy_version: ProtocolVersion::Unknown(0),
            session_id,
            cipher_suite,
            extensions: codec::read_vec_u16(r)?,
        })
    }
}

impl HelloRetryRequest {
    /// Returns true if there is more than one extension of a given
    /// type.
    pub fn has_duplicate_extension(&self) -> bool {
        has_duplicates(
            self.extensions
                .iter()
                .map(|ext| ext.get_type().get_u16()),
        )
    }

    pub fn has_unknown_extension(&self) -> bool {
        self.extensions.iter().any(|ext| {
            !matches!(
                ext.get_type(),
                ExtensionType::KeyShare | ExtensionType::Cookie | ExtensionType::SupportedVersions
            )
        })
    }

    fn find_extension(&self, ext: ExtensionType) -> Option<&HelloRetryExtension> {
        self.extensions
            .iter()
            .find(|x| x.get_type() == ext)
    }

    pub fn get_requested_key_share_group(&self) -> Option<NamedGroup> {
        let ext = self.find_extension(ExtensionType::KeyShare)?;
        match *ext {
            HelloRetryExtension::KeyShare(grp) => Some(grp),
            _ => None,
        }
    }

    pub fn get_cookie(&self) -> Option<&PayloadU16> {
        let ext = self.find_extension(ExtensionType::Cookie)?;
        match *ext {
            HelloRetryExtension::Cookie(ref cookie) => Some(cookie),
            _ => None,
        }
    }

    pub fn get_supported_versions(&self) -> Option<ProtocolVersion> {
        let ext = self.find_extension(ExtensionType::SupportedVersions)?;
        match *ext {
            HelloRetryExtension::SupportedVersions(ver) => Some(ver),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerHelloPayload {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionID,
    pub cipher_suite: CipherSuite,
    pub compression_method: Compression,
    pub extensions: Vec<ServerExtension>,
}

impl Codec for ServerHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.compression_method.encode(bytes);

        if !self.extensions.is_empty() {
            codec::encode_vec_u16(bytes, &self.extensions);
        }
    }

    // minus version and random, which have already been read.
    fn read(r: &mut Reader) -> Option<Self> {
        let session_id = SessionID::read(r)?;
        let cipher_suite = CipherSuite::read(r)?;
        let compression_method = Compression::read(r)?;

        let extensions = if r.any_left() {
            codec::read_vec_u16(r)?
        } else {
            Vec::new()
        };

        let ret = Self {
            legacy_version: ProtocolVersion::Unknown(0),
            random: ZERO_RANDOM,
            session_id,
            cipher_suite,
            compression_method,
            extensions,
        };

        if r.any_left() {
            None
        } else {
            Some(ret)
        }
    }
}

pub trait HasServerExtensions {
    fn get_extensions(&self) -> &[ServerExtension];

    /// Returns true if there is more than one extension of a given
    /// type.
    fn has_duplicate_extension(&self) -> bool {
        has_duplicates(
            self.get_extensions()
                .iter()
                .map(|ext| ext.get_type().get_u16()),
        )
    }

    fn find_extension(&self, ext: ExtensionType) -> Option<&ServerExtension> {
        self.get_extensions()
            .iter()
            .find(|x| x.get_type() == ext)
    }

    fn get_alpn_protocol(&self) -> Option<&[u8]> {
        let ext = self.find_extension(ExtensionType::ALProtocolNegotiation)?;
        match *ext {
            ServerExtension::Protocols(ref protos) => protos.as_single_slice(),
            _ => None,
        }
    }

    fn early_data_extension_offered(&self) -> bool {
        self.find_extension(ExtensionType::EarlyData)
            .is_some()
    }
}

impl HasServerExtensions for ServerHelloPayload {
    fn get_extensions(&self) -> &[ServerExtension] {
        &self.extensions
    }
}

impl ServerHelloPayload {
    pub fn get_key_share(&self) -> Option<&KeyShareEntry> {
        let ext = self.find_extension(ExtensionType::KeyShare)?;
        match *ext {
            ServerExtension::KeyShare(ref share) => Some(share),
            _ => None,
        }
    }

    pub fn get_psk_index(&self) -> Option<u16> {
        let ext = self.find_extension(ExtensionType::PreSharedKey)?;
        match *ext {
            ServerExtension::PresharedKey(index) => Some(index),
            _ => None,
        }
    }

    pub fn get_supported_versions(&self) -> Option<ProtocolVersion> {
        let ext = self.find_extension(ExtensionType::SupportedVersions)?;
        match *ext {
            ServerExtension::SupportedVersions(vers) => Some(vers),
            _ => None,
        }
    }
}

pub type EncryptedExtensions = Vec<ServerExtension>;

impl HasServerExtensions for EncryptedExtensions {
    fn get_extensions(&self) -> &[ServerExtension] {
        self
    }
}

pub type CertificatePayload = Vec<key::Certificate>;

// TLS1.3 certificates may carry per-entry extensions; only a closed set
// is processed, the rest are skipped.
#[derive(Clone, Debug)]
pub enum CertificateExtension {
    Unknown(UnknownExtension),
}

impl CertificateExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for CertificateExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let nested = LengthPrefixed::new(bytes);
        match *self {
            Self::Unknown(ref r) => r.encode(nested.buf),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = usize::from(u16::read(r)?);
        let mut sub = r.sub(len)?;

        let ext = Self::Unknown(UnknownExtension::read(typ, &mut sub));

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

/// A tighter bound than the wire format's 2^24-1: single certificates
/// larger than this are rejected outright.
const MAX_CERTIFICATE_SIZE_LIMIT: usize = 0x1_0000;

#[derive(Clone, Debug)]
pub struct CertificateEntry {
    pub cert: key::Certificate,
    pub exts: Vec<CertificateExtension>,
}

impl Codec for CertificateEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.cert.encode(bytes);
        codec::encode_vec_u16(bytes, &self.exts);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let cert = key::Certificate::read(r)?;
        if cert.0.is_empty() || cert.0.len() >= MAX_CERTIFICATE_SIZE_LIMIT {
            return None;
        }

        Some(Self {
            cert,
            exts: codec::read_vec_u16(r)?,
        })
    }
}

impl CertificateEntry {
    pub fn new(cert: key::Certificate) -> Self {
        Self {
            cert,
            exts: Vec::new(),
        }
    }

    pub fn has_duplicate_extension(&self) -> bool {
        has_duplicates(
            self.exts
                .iter()
                .map(|ext| ext.get_type().get_u16()),
        )
    }
}

#[derive(Clone, Debug)]
pub struct CertificatePayloadTLS13 {
    pub context: PayloadU8,
    pub entries: Vec<CertificateEntry>,
}

impl Codec for CertificatePayloadTLS13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        codec::encode_vec_u24(bytes, &self.entries);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            context: PayloadU8::read(r)?,
            entries: codec::read_vec_u24_limited(r, 0xff_ffff)?,
        })
    }
}

impl CertificatePayloadTLS13 {
    pub fn new(entries: Vec<CertificateEntry>) -> Self {
        Self {
            context: PayloadU8::empty(),
            entries,
        }
    }

    pub fn any_entry_has_duplicate_extension(&self) -> bool {
        self.entries
            .iter()
            .any(CertificateEntry::has_duplicate_extension)
    }

    pub fn convert(&self) -> CertificatePayload {
        self.entries
            .iter()
            .map(|entry| entry.cert.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DigitallySignedStruct {
    pub scheme: SignatureScheme,
    pub sig: PayloadU16,
}

impl DigitallySignedStruct {
    pub fn new(scheme: SignatureScheme, sig: Vec<u8>) -> Self {
        Self {
            scheme,
            sig: PayloadU16::new(sig),
        }
    }
}

impl Codec for DigitallySignedStruct {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.scheme.encode(bytes);
        self.sig.encode(bytes);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            scheme: SignatureScheme::read(r)?,
            sig: PayloadU16::read(r)?,
        })
    }
}

wrapped_payload!(
    /// DER-encoded X501 name, undecoded here.
    pub struct DistinguishedName, PayloadU16,
);

#[derive(Clone, Debug)]
pub enum CertReqExtension {
    SignatureAlgorithms(Vec<SignatureScheme>),
    AuthorityNames(Vec<DistinguishedName>),
    Unknown(UnknownExtension),
}

impl CertReqExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::SignatureAlgorithms(_) => ExtensionType::SignatureAlgorithms,
            Self::AuthorityNames(_) => ExtensionType::CertificateAuthorities,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for CertReqExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let nested = LengthPrefixed::new(bytes);
        match *self {
            Self::SignatureAlgorithms(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::AuthorityNames(ref r) => codec::encode_vec_u16(nested.buf, r),
            Self::Unknown(ref r) => r.encode(nested.buf),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = usize::from(u16::read(r)?);
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::SignatureAlgorithms => {
                let schemes = codec::read_vec_u16(&mut sub)?;
                if schemes.is_empty() {
                    return None;
                }
                Self::SignatureAlgorithms(schemes)
            }
            ExtensionType::CertificateAuthorities => {
                Self::AuthorityNames(codec::read_vec_u16(&mut sub)?)
            }
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificateRequestPayloadTLS13 {
    pub context: PayloadU8,
    pub extensions: Vec<CertReqExtension>,
}

impl Codec for CertificateRequestPayloadTLS13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        codec::encode_vec_u16(bytes, &self.extensions);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        Some(Self {
            context: PayloadU8::read(r)?,
            extensions: codec::read_vec_u16(r)?,
        })
    }
}

impl CertificateRequestPayloadTLS13 {
    pub fn has_duplicate_extension(&self) -> bool {
        has_duplicates(
            self.extensions
                .iter()
                .map(|ext| ext.get_type().get_u16()),
        )
    }

    fn find_extension(&self, ext: ExtensionType) -> Option<&CertReqExtension> {
        self.extensions
            .iter()
            .find(|x| x.get_type() == ext)
    }

    pub fn get_sigalgs_extension(&self) -> Option<&[SignatureScheme]> {
        let ext = self.find_extension(ExtensionType::SignatureAlgorithms)?;
        match *ext {
            CertReqExtension::SignatureAlgorithms(ref schemes) => Some(schemes),
            _ => None,
        }
    }

    pub fn get_authorities_extension(&self) -> Option<&[DistinguishedName]> {
        let ext = self.find_extension(ExtensionType::CertificateAuthorities)?;
        match *ext {
            CertReqExtension::AuthorityNames(ref names) => Some(names),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum NewSessionTicketExtension {
    EarlyData(u32),
    Unknown(UnknownExtension),
}

impl NewSessionTicketExtension {
    pub fn get_type(&self) -> ExtensionType {
        match *self {
            Self::EarlyData(_) => ExtensionType::EarlyData,
            Self::Unknown(ref r) => r.typ,
        }
    }
}

impl Codec for NewSessionTicketExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.get_type().encode(bytes);

        let nested = LengthPrefixed::new(bytes);
        match *self {
            Self::EarlyData(r) => r.encode(nested.buf),
            Self::Unknown(ref r) => r.encode(nested.buf),
        }
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let typ = ExtensionType::read(r)?;
        let len = usize::from(u16::read(r)?);
        let mut sub = r.sub(len)?;

        let ext = match typ {
            ExtensionType::EarlyData => Self::EarlyData(u32::read(&mut sub)?),
            _ => Self::Unknown(UnknownExtension::read(typ, &mut sub)),
        };

        if sub.any_left() {
            None
        } else {
            Some(ext)
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSessionTicketPayloadTLS13 {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: PayloadU8,
    pub ticket: PayloadU16,
    pub exts: Vec<NewSessionTicketExtension>,
}

impl NewSessionTicketPayloadTLS13 {
    pub fn new(lifetime: u32, age_add: u32, nonce: Vec<u8>, ticket: Vec<u8>) -> Self {
        Self {
            lifetime,
            age_add,
            nonce: PayloadU8::new(nonce),
            ticket: PayloadU16::new(ticket),
            exts: vec![],
        }
    }

    pub fn has_duplicate_extension(&self) -> bool {
        has_duplicates(
            self.exts
                .iter()
                .map(|ext| ext.get_type().get_u16()),
        )
    }

    fn find_extension(&self, ext: ExtensionType) -> Option<&NewSessionTicketExtension> {
        self.exts
            .iter()
            .find(|x| x.get_type() == ext)
    }

    pub fn get_max_early_data_size(&self) -> Option<u32> {
        let ext = self.find_extension(ExtensionType::EarlyData)?;
        match *ext {
            NewSessionTicketExtension::EarlyData(sz) => Some(sz),
            _ => None,
        }
    }
}

impl Codec for NewSessionTicketPayloadTLS13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime.encode(bytes);
        self.age_add.encode(bytes);
        self.nonce.encode(bytes);
        self.ticket.encode(bytes);
        codec::encode_vec_u16(bytes, &self.exts);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let lifetime = u32::read(r)?;
        let age_add = u32::read(r)?;
        let nonce = PayloadU8::read(r)?;
        let ticket = PayloadU16::read(r)?;
        if ticket.0.is_empty() {
            return None;
        }
        let exts = codec::read_vec_u16(r)?;

        Some(Self {
            lifetime,
            age_add,
            nonce,
            ticket,
            exts,
        })
    }
}

#[derive(Debug)]
pub enum HandshakePayload {
    HelloRequest,
    ClientHello(ClientHelloPayload),
    ServerHello(ServerHelloPayload),
    HelloRetryRequest(HelloRetryRequest),
    Certificate(CertificatePayloadTLS13),
    CertificateVerify(DigitallySignedStruct),
    CertificateRequest(CertificateRequestPayloadTLS13),
    EncryptedExtensions(EncryptedExtensions),
    NewSessionTicket(NewSessionTicketPayloadTLS13),
    EndOfEarlyData,
    KeyUpdate(KeyUpdateRequest),
    Finished(Payload),
    MessageHash(Payload),
    Unknown(Payload),
}

impl HandshakePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        use self::HandshakePayload::*;
        match *self {
            HelloRequest | EndOfEarlyData => {}
            ClientHello(ref x) => x.encode(bytes),
            ServerHello(ref x) => x.encode(bytes),
            HelloRetryRequest(ref x) => x.encode(bytes),
            Certificate(ref x) => x.encode(bytes),
            CertificateVerify(ref x) => x.encode(bytes),
            CertificateRequest(ref x) => x.encode(bytes),
            EncryptedExtensions(ref x) => codec::encode_vec_u16(bytes, x),
            NewSessionTicket(ref x) => x.encode(bytes),
            KeyUpdate(ref x) => x.encode(bytes),
            Finished(ref x) => x.encode(bytes),
            MessageHash(ref x) => x.encode(bytes),
            Unknown(ref x) => x.encode(bytes),
        }
    }
}

#[derive(Debug)]
pub struct HandshakeMessagePayload {
    pub typ: HandshakeType,
    pub payload: HandshakePayload,
}

impl Codec for HandshakeMessagePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        // output type, length, and encoded payload
        match self.typ {
            HandshakeType::HelloRetryRequest => HandshakeType::ServerHello,
            _ => self.typ,
        }
        .encode(bytes);

        let nested_offset = bytes.len();
        bytes.extend([0, 0, 0]);
        self.payload.encode(bytes);

        let len = bytes.len() - nested_offset - 3;
        debug_assert!(len <= 0xff_ffff);
        let len_bytes = u32::to_be_bytes(len as u32);
        bytes[nested_offset..nested_offset + 3].copy_from_slice(&len_bytes[1..]);
    }

    fn read(r: &mut Reader) -> Option<Self> {
        let mut typ = HandshakeType::read(r)?;
        let len = usize::from(codec::u24::read(r)?);
        let mut sub = r.sub(len)?;

        let payload = match typ {
            HandshakeType::HelloRequest if sub.left() == 0 => HandshakePayload::HelloRequest,
            HandshakeType::ClientHello => {
                HandshakePayload::ClientHello(ClientHelloPayload::read(&mut sub)?)
            }
            HandshakeType::ServerHello => {
                let version = ProtocolVersion::read(&mut sub)?;
                let random = Random::read(&mut sub)?;

                if random == HELLO_RETRY_REQUEST_RANDOM {
                    let mut hrr = HelloRetryRequest::read(&mut sub)?;
                    hrr.legacy_version = version;
                    typ = HandshakeType::HelloRetryRequest;
                    HandshakePayload::HelloRetryRequest(hrr)
                } else {
                    let mut shp = ServerHelloPayload::read(&mut sub)?;
                    shp.legacy_version = version;
                    shp.random = random;
                    HandshakePayload::ServerHello(shp)
                }
            }
            HandshakeType::Certificate => {
                HandshakePayload::Certificate(CertificatePayloadTLS13::read(&mut sub)?)
            }
            HandshakeType::CertificateVerify => {
                HandshakePayload::CertificateVerify(DigitallySignedStruct::read(&mut sub)?)
            }
            HandshakeType::CertificateRequest => {
                HandshakePayload::CertificateRequest(CertificateRequestPayloadTLS13::read(
                    &mut sub,
                )?)
            }
            HandshakeType::EncryptedExtensions => {
                HandshakePayload::EncryptedExtensions(codec::read_vec_u16(&mut sub)?)
            }
            HandshakeType::NewSessionTicket => {
                HandshakePayload::NewSessionTicket(NewSessionTicketPayloadTLS13::read(&mut sub)?)
            }
            HandshakeType::EndOfEarlyData => HandshakePayload::EndOfEarlyData,
            HandshakeType::KeyUpdate => {
                HandshakePayload::KeyUpdate(KeyUpdateRequest::read(&mut sub)?)
            }
            HandshakeType::Finished => HandshakePayload::Finished(Payload::read(&mut sub)?),
            HandshakeType::MessageHash => {
                // does not appear on the wire
                return None;
            }
            HandshakeType::HelloRetryRequest => {
                // not legal on wire
                return None;
            }
            _ => HandshakePayload::Unknown(Payload::read(&mut sub)?),
        };

        if sub.any_left() {
            None
        } else {
            Some(Self { typ, payload })
        }
    }
}

impl HandshakeMessagePayload {
    pub fn build_handshake_hash(hash: &[u8]) -> Self {
        Self {
            typ: HandshakeType::MessageHash,
            payload: HandshakePayload::MessageHash(Payload::new(hash.to_vec())),
        }
    }

    /// The ClientHello encoding minus its trailing binders section,
    /// over which PSK binders are MACed.
    pub fn get_encoding_for_binder_signing(&self) -> Vec<u8> {
        let mut ret = self.get_encoding();

        let binder_len = match self.payload {
            HandshakePayload::ClientHello(ref ch) => match ch.extensions.last() {
                Some(ClientExtension::PresharedKey(ref offer)) => {
                    let mut binders_encoding = Vec::new();
                    codec::encode_vec_u16(&mut binders_encoding, &offer.binders);
                    binders_encoding.len()
                }
                _ => 0,
            },
            _ => 0,
        };

        let ret_len = ret.len() - binder_len;
        ret.truncate(ret_len);
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::enums::{CipherSuite, Compression};

    fn sample_hello() -> HandshakeMessagePayload {
        HandshakeMessagePayload {
            typ: HandshakeType::ClientHello,
            payload: HandshakePayload::ClientHello(ClientHelloPayload {
                client_version: ProtocolVersion::TLSv1_2,
                random: Random([7u8; 32]),
                session_id: SessionID::empty(),
                cipher_suites: vec![CipherSuite::TLS13_AES_128_GCM_SHA256],
                compression_methods: vec![Compression::Null],
                extensions: vec![
                    ClientExtension::SupportedVersions(vec![ProtocolVersion::TLSv1_3]),
                    ClientExtension::NamedGroups(vec![NamedGroup::X25519]),
                    ClientExtension::SignatureAlgorithms(vec![
                        SignatureScheme::ECDSA_NISTP256_SHA256,
                    ]),
                    ClientExtension::KeyShare(vec![KeyShareEntry::new(
                        NamedGroup::X25519,
                        &[0xab; 32],
                    )]),
                ],
            }),
        }
    }

    #[test]
    fn client_hello_round_trips_byte_exact() {
        let hello = sample_hello();
        let enc = hello.get_encoding();
        let parsed = HandshakeMessagePayload::read_bytes(&enc).unwrap();
        assert_eq!(parsed.get_encoding(), enc);
    }

    #[test]
    fn client_hello_extension_order_is_preserved(){
        let hello = sample_hello();
        let enc = hello.get_encoding();
        let parsed = HandshakeMessagePayload::read_bytes(&enc).unwrap();
        let parsed_ch = match parsed.payload {
            HandshakePayload::ClientHello(ch) => ch,
            _ => panic!("wrong payload type"),
        };
        let types: Vec<ExtensionType> = parsed_ch
            .extensions
            .iter()
            .map(|ext| ext.get_type())
            .collect();
        assert_eq!(
            types,
            vec![
                ExtensionType::SupportedVersions,
                ExtensionType::EllipticCurves,
                ExtensionType::SignatureAlgorithms,
                ExtensionType::KeyShare,
            ]
        );
    }

    #[test]
    fn message_overflowing_declared_length_is_rejected() {
        let mut enc = sample_hello().get_encoding();
        // shorten the handshake header length by one so the body
        // extends one byte past the declared end
        let len = u32::from_be_bytes([0, enc[1], enc[2], enc[3]]) - 1;
        let len_bytes = u32::to_be_bytes(len);
        enc[1..4].copy_from_slice(&len_bytes[1..]);
        assert!(HandshakeMessagePayload::read_bytes(&enc).is_none());
    }

    #[test]
    fn extension_overflowing_extension_list_is_rejected() {
        let hello = sample_hello();
        let mut enc = hello.get_encoding();
        // the final (key_share) extension has a 38-byte body; its
        // u16 length field sits immediately before it.  Bump the low
        // length byte so the extension claims one byte past the end
        // of the extension list.
        let len_low_byte = enc.len() - 38 - 1;
        enc[len_low_byte] += 1;
        assert!(HandshakeMessagePayload::read_bytes(&enc).is_none());
    }

    #[test]
    fn duplicate_extensions_are_visible() {
        let mut hello = match sample_hello().payload {
            HandshakePayload::ClientHello(ch) => ch,
            _ => unreachable!(),
        };
        assert!(!hello.has_duplicate_extension());
        hello
            .extensions
            .push(ClientExtension::SupportedVersions(vec![
                ProtocolVersion::TLSv1_3,
            ]));
        assert!(hello.has_duplicate_extension());
    }

    #[test]
    fn hello_retry_request_is_discriminated_by_random() {
        let hrr = HandshakeMessagePayload {
            typ: HandshakeType::HelloRetryRequest,
            payload: HandshakePayload::HelloRetryRequest(HelloRetryRequest {
                legacy_version: ProtocolVersion::TLSv1_2,
                session_id: SessionID::empty(),
                cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
                extensions: vec![
                    HelloRetryExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
                    HelloRetryExtension::KeyShare(NamedGroup::secp256r1),
                ],
            }),
        };

        let enc = hrr.get_encoding();
        // wire type must be ServerHello
        assert_eq!(enc[0], HandshakeType::ServerHello.get_u8());

        let parsed = HandshakeMessagePayload::read_bytes(&enc).unwrap();
        assert_eq!(parsed.typ, HandshakeType::HelloRetryRequest);
        match parsed.payload {
            HandshakePayload::HelloRetryRequest(parsed_hrr) => {
                assert_eq!(
                    parsed_hrr.get_requested_key_share_group(),
                    Some(NamedGroup::secp256r1)
                );
            }
            _ => panic!("did not parse as HelloRetryRequest"),
        }
    }

    #[test]
    fn binder_signing_encoding_drops_binders_only() {
        let mut hello = match sample_hello().payload {
            HandshakePayload::ClientHello(ch) => ch,
            _ => unreachable!(),
        };
        hello
            .extensions
            .push(ClientExtension::PresharedKey(PresharedKeyOffer::new(
                PresharedKeyIdentity::new(vec![1, 2, 3], 0x1000),
                vec![0u8; 32],
            )));

        let hmp = HandshakeMessagePayload {
            typ: HandshakeType::ClientHello,
            payload: HandshakePayload::ClientHello(hello),
        };

        let full = hmp.get_encoding();
        let truncated = hmp.get_encoding_for_binder_signing();
        // 2 bytes binder-list length + 1 byte binder length + 32 binder bytes
        assert_eq!(full.len() - truncated.len(), 2 + 1 + 32);
        assert_eq!(&full[..truncated.len()], &truncated[..]);
    }

    #[test]
    fn oversized_certificate_entry_is_rejected() {
        use crate::msgs::base::PayloadU24;

        let mut bytes = Vec::new();
        PayloadU24::new(vec![0u8; MAX_CERTIFICATE_SIZE_LIMIT]).encode(&mut bytes);
        codec::encode_vec_u16::<CertificateExtension>(&mut bytes, &[]);
        assert!(CertificateEntry::read_bytes(&bytes).is_none());
    }

    #[test]
    fn new_session_ticket_round_trip() {
        let mut nst = NewSessionTicketPayloadTLS13::new(3600, 0xdead_beef, vec![0, 1], vec![9; 16]);
        nst.exts
            .push(NewSessionTicketExtension::EarlyData(16384));
        let enc = nst.get_encoding();
        let parsed = NewSessionTicketPayloadTLS13::read_bytes(&enc).unwrap();
        assert_eq!(parsed.lifetime, 3600);
        assert_eq!(parsed.age_add, 0xdead_beef);
        assert_eq!(parsed.get_max_early_data_size(), Some(16384));
        assert_eq!(parsed.get_encoding(), enc);
    }
}
