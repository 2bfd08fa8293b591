use super::*;
use crate::anchors::RootCertStore;
use crate::cipher::new_tls13_traffic_keys;
use crate::conn::{Direction, MessageTransport, Status, TransportEvent};
use crate::error::Error;
use crate::hash_hs::{HandshakeHash, HandshakeHashBuffer};
use crate::key_schedule::{KeyScheduleEarly, KeyScheduleHandshake, KeyScheduleNonSecret};
use crate::keylog::NoKeyLog;
use crate::kx;
use crate::msgs::base::{Payload, PayloadU16};
use crate::msgs::codec::Codec;
use crate::msgs::enums::{
    AlertDescription, CipherSuite, Compression, ContentType, HandshakeType, NamedGroup,
    PSKKeyExchangeMode, ProtocolVersion, SignatureScheme,
};
use crate::msgs::handshake::{
    DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload, HelloRetryExtension,
    HelloRetryRequest, KeyShareEntry, Random, ServerExtension, ServerHelloPayload, SessionID,
    CertificateEntry, CertificatePayloadTLS13, NewSessionTicketExtension,
    NewSessionTicketPayloadTLS13, ProtocolName,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist;
use crate::suites::{Tls13CipherSuite, TLS13_AES_128_GCM_SHA256};
use crate::ticketer::TimeBase;
use crate::verify::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use crate::TrafficKeys;

use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, KeyPair};

use std::collections::VecDeque;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------
// A loopback message transport: everything the engine does to the
// record layer is recorded for the test to inspect and script.

#[derive(Default)]
struct Shared {
    writes: Vec<(HandshakeType, Vec<u8>)>,
    events: VecDeque<TransportEvent>,
    installs: Vec<(Direction, Vec<u8>, Vec<u8>)>,
    early: Vec<u8>,
    ccs: usize,
}

#[derive(Clone, Default)]
struct MockTransport(Arc<Mutex<Shared>>);

impl MockTransport {
    fn push_message(&self, m: &Message) {
        let bytes = match &m.payload {
            MessagePayload::Handshake(hmp) => hmp.get_encoding(),
            _ => panic!("only handshake messages can be scripted"),
        };
        self.0
            .lock()
            .unwrap()
            .events
            .push_back(TransportEvent::Handshake(bytes));
    }

    fn take_writes(&self) -> Vec<(HandshakeType, Vec<u8>)> {
        std::mem::take(&mut self.0.lock().unwrap().writes)
    }

    fn installs(&self) -> Vec<(Direction, Vec<u8>, Vec<u8>)> {
        self.0.lock().unwrap().installs.clone()
    }

    fn ccs_count(&self) -> usize {
        self.0.lock().unwrap().ccs
    }

    fn early_data(&self) -> Vec<u8> {
        self.0.lock().unwrap().early.clone()
    }
}

impl MessageTransport for MockTransport {
    fn read_handshake(&mut self) -> Result<Option<TransportEvent>, Error> {
        Ok(self.0.lock().unwrap().events.pop_front())
    }

    fn write_handshake(&mut self, typ: HandshakeType, message: &[u8]) -> Result<(), Error> {
        self.0
            .lock()
            .unwrap()
            .writes
            .push((typ, message.to_vec()));
        Ok(())
    }

    fn write_change_cipher_spec(&mut self) -> Result<(), Error> {
        self.0.lock().unwrap().ccs += 1;
        Ok(())
    }

    fn write_early_data(&mut self, data: &[u8]) -> Result<usize, Error> {
        self.0
            .lock()
            .unwrap()
            .early
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn install_keys(&mut self, direction: Direction, keys: TrafficKeys) -> Result<(), Error> {
        self.0.lock().unwrap().installs.push((
            direction,
            keys.key.as_ref().to_vec(),
            keys.iv.value().to_vec(),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------
// A verifier that trusts one raw P-256 public key, so the scripted
// server does not need a real X.509 chain.

struct TestVerifier {
    pubkey: Vec<u8>,
}

impl ServerCertVerifier for TestVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &crate::key::Certificate,
        _intermediates: &[crate::key::Certificate],
        _server_name: &ServerName,
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        _cert: &crate::key::Certificate,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        assert_eq!(dss.scheme, SignatureScheme::ECDSA_NISTP256_SHA256);
        signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &self.pubkey)
            .verify(message, &dss.sig.0)
            .map(|_| HandshakeSignatureValid::assertion())
            .map_err(|_| Error::DecryptError)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![SignatureScheme::ECDSA_NISTP256_SHA256]
    }
}

// ---------------------------------------------------------------
// Scripted-server plumbing.

struct ServerIdentity {
    key: EcdsaKeyPair,
}

impl ServerIdentity {
    fn new() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 =
            EcdsaKeyPair::generate_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
                .unwrap();
        Self {
            key: EcdsaKeyPair::from_pkcs8(
                &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                pkcs8.as_ref(),
            )
            .unwrap(),
        }
    }

    fn verifier(&self) -> Arc<TestVerifier> {
        Arc::new(TestVerifier {
            pubkey: self.key.public_key().as_ref().to_vec(),
        })
    }
}

fn handshake(typ: HandshakeType, payload: HandshakePayload) -> Message {
    Message {
        payload: MessagePayload::Handshake(HandshakeMessagePayload { typ, payload }),
    }
}

fn parse_handshake(bytes: &[u8]) -> Message {
    Message::read_handshake(bytes).expect("client wrote unparseable message")
}

fn client_hello_of(m: &Message) -> &crate::msgs::handshake::ClientHelloPayload {
    match &m.payload {
        MessagePayload::Handshake(HandshakeMessagePayload {
            payload: HandshakePayload::ClientHello(ch),
            ..
        }) => ch,
        _ => panic!("expected ClientHello"),
    }
}

fn server_hello(
    session_id: SessionID,
    suite: CipherSuite,
    extensions: Vec<ServerExtension>,
) -> Message {
    handshake(
        HandshakeType::ServerHello,
        HandshakePayload::ServerHello(ServerHelloPayload {
            legacy_version: ProtocolVersion::TLSv1_2,
            random: Random([0x5a; 32]),
            session_id,
            cipher_suite: suite,
            compression_method: Compression::Null,
            extensions,
        }),
    )
}

fn test_config(identity: &ServerIdentity) -> ClientConfig {
    let mut config = crate::client_config_builder_with_safe_defaults()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    config.verifier = identity.verifier();
    config.signature_algorithms = vec![SignatureScheme::ECDSA_NISTP256_SHA256];
    config.cipher_suites = vec![&TLS13_AES_128_GCM_SHA256];
    config.kx_groups = vec![&kx::X25519];
    config
}

fn localhost() -> ServerName {
    ServerName::try_from("localhost").unwrap()
}

/// Everything the scripted server knows after emitting its first
/// flight.
struct ServerFlight {
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    client_hs_secret: ring::hkdf::Prk,
    server_hs_secret: ring::hkdf::Prk,
}

/// Build and queue ServerHello..Finished for an ECDHE handshake over
/// `group`, against the ClientHello in `ch_msg`.  PSK resumption is
/// layered on by `psk`: when set, the ServerHello selects identity 0
/// and the early secret seeds the schedule.
#[allow(clippy::too_many_arguments)]
fn server_first_flight(
    transport: &MockTransport,
    identity: &ServerIdentity,
    suite: &'static Tls13CipherSuite,
    group: &'static kx::SupportedKxGroup,
    transcript_seed: HandshakeHashBuffer,
    ch_msg: &Message,
    psk: Option<&[u8]>,
    ee_exts: Vec<ServerExtension>,
    send_certs: bool,
) -> ServerFlight {
    let ch = client_hello_of(ch_msg);

    let mut buffer = transcript_seed;
    buffer.add_message(ch_msg);

    // key exchange against the client's share
    let client_share = ch
        .get_keyshare_extension()
        .expect("client sent no key share")
        .iter()
        .find(|share| share.group == group.name)
        .expect("client did not offer requested group");
    let server_kx = kx::KeyExchange::start(group).unwrap();
    let server_share = KeyShareEntry::new(group.name, server_kx.pubkey.as_ref());

    let mut sh_exts = vec![
        ServerExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
        ServerExtension::KeyShare(server_share),
    ];
    if psk.is_some() {
        sh_exts.push(ServerExtension::PresharedKey(0));
    }

    let sh = server_hello(ch.session_id, suite.suite(), sh_exts);
    buffer.add_message(&sh);
    transport.push_message(&sh);

    let mut transcript = buffer.start_hash(suite.get_hash());

    let shared_secret = server_kx
        .complete(&client_share.payload.0)
        .unwrap();

    let key_schedule = match psk {
        Some(psk) => KeyScheduleEarly::new(suite.hkdf_algorithm, psk)
            .into_handshake(&shared_secret.shared_secret),
        None => KeyScheduleNonSecret::new(suite.hkdf_algorithm)
            .into_handshake(&shared_secret.shared_secret),
    };

    let hash_at_sh = transcript.get_current_hash();
    let (key_schedule, client_hs_secret, server_hs_secret) =
        key_schedule.derive_handshake_secrets(&hash_at_sh, &NoKeyLog, &[0u8; 32]);

    let ee = handshake(
        HandshakeType::EncryptedExtensions,
        HandshakePayload::EncryptedExtensions(ee_exts),
    );
    transcript.add_message(&ee);
    transport.push_message(&ee);

    if send_certs {
        let cert = handshake(
            HandshakeType::Certificate,
            HandshakePayload::Certificate(CertificatePayloadTLS13::new(vec![
                CertificateEntry::new(crate::key::Certificate(b"not-actually-der".to_vec())),
            ])),
        );
        transcript.add_message(&cert);
        transport.push_message(&cert);

        let sig_content =
            crate::verify::construct_tls13_server_verify_message(&transcript.get_current_hash());
        let rng = SystemRandom::new();
        let sig = identity
            .key
            .sign(&rng, &sig_content)
            .unwrap();
        let cv = handshake(
            HandshakeType::CertificateVerify,
            HandshakePayload::CertificateVerify(DigitallySignedStruct::new(
                SignatureScheme::ECDSA_NISTP256_SHA256,
                sig.as_ref().to_vec(),
            )),
        );
        transcript.add_message(&cv);
        transport.push_message(&cv);
    }

    let verify_data = key_schedule.sign_server_finish(&transcript.get_current_hash());
    let fin = handshake(
        HandshakeType::Finished,
        HandshakePayload::Finished(Payload::new(verify_data.as_ref())),
    );
    transcript.add_message(&fin);
    transport.push_message(&fin);

    ServerFlight {
        transcript,
        key_schedule,
        client_hs_secret,
        server_hs_secret,
    }
}

/// A pure-PSK first flight: ServerHello carries pre_shared_key only.
fn server_psk_only_flight(
    transport: &MockTransport,
    suite: &'static Tls13CipherSuite,
    ch_msg: &Message,
    psk: &[u8],
) -> ServerFlight {
    let ch = client_hello_of(ch_msg);

    let mut buffer = HandshakeHashBuffer::new();
    buffer.add_message(ch_msg);

    let sh = server_hello(
        ch.session_id,
        suite.suite(),
        vec![
            ServerExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
            ServerExtension::PresharedKey(0),
        ],
    );
    buffer.add_message(&sh);
    transport.push_message(&sh);

    let mut transcript = buffer.start_hash(suite.get_hash());

    let zeroes = vec![0u8; suite.get_hash().output_len];
    let key_schedule = KeyScheduleEarly::new(suite.hkdf_algorithm, psk).into_handshake(&zeroes);

    let hash_at_sh = transcript.get_current_hash();
    let (key_schedule, client_hs_secret, server_hs_secret) =
        key_schedule.derive_handshake_secrets(&hash_at_sh, &NoKeyLog, &[0u8; 32]);

    let ee = handshake(
        HandshakeType::EncryptedExtensions,
        HandshakePayload::EncryptedExtensions(vec![]),
    );
    transcript.add_message(&ee);
    transport.push_message(&ee);

    let verify_data = key_schedule.sign_server_finish(&transcript.get_current_hash());
    let fin = handshake(
        HandshakeType::Finished,
        HandshakePayload::Finished(Payload::new(verify_data.as_ref())),
    );
    transcript.add_message(&fin);
    transport.push_message(&fin);

    ServerFlight {
        transcript,
        key_schedule,
        client_hs_secret,
        server_hs_secret,
    }
}

/// Drive `conn` until it has consumed every queued event, asserting
/// no failure along the way.
fn drive_to_done(conn: &mut ClientConnection) {
    loop {
        match conn.step().expect("handshake failed") {
            Status::Done => return,
            Status::Progressed | Status::WantWrite | Status::GotTicket => continue,
            Status::WantRead => panic!("engine starved of input"),
        }
    }
}

/// Check the client Finished against the server's own transcript, and
/// return the server's traffic-stage schedule with the transcript
/// advanced past the client Finished.
fn expect_client_finished(
    flight: ServerFlight,
    client_writes: &[(HandshakeType, Vec<u8>)],
) -> (crate::key_schedule::KeyScheduleTraffic, HandshakeHash) {
    let mut transcript = flight.transcript;
    let hash_at_server_fin = transcript.get_current_hash();

    let (pending, _client_app, _server_app) = flight
        .key_schedule
        .into_traffic_with_client_finished_pending(&hash_at_server_fin, &NoKeyLog, &[0u8; 32]);

    // fold any client messages before its Finished (EndOfEarlyData,
    // client certs); then check the Finished MAC itself
    let mut client_fin = None;
    for (typ, bytes) in client_writes {
        let m = parse_handshake(bytes);
        match typ {
            HandshakeType::ClientHello => continue,
            HandshakeType::Finished => {
                client_fin = Some(m);
                break;
            }
            _ => {
                transcript.add_message(&m);
            }
        }
    }

    let client_fin = client_fin.expect("client never sent Finished");
    let (traffic, expected_tag) = pending.sign_client_finish(&transcript.get_current_hash());

    match &client_fin.payload {
        MessagePayload::Handshake(HandshakeMessagePayload {
            payload: HandshakePayload::Finished(payload),
            ..
        }) => assert_eq!(payload.0, expected_tag.as_ref().to_vec()),
        _ => unreachable!(),
    }

    transcript.add_message(&client_fin);
    (traffic, transcript)
}

fn seeded_session(storage: &dyn StoresClientSessions, ticket: &[u8], psk: &[u8]) {
    seeded_session_with_early_data(storage, ticket, psk, 0)
}

fn seeded_session_with_early_data(
    storage: &dyn StoresClientSessions,
    ticket: &[u8],
    psk: &[u8],
    max_early_data_size: u32,
) {
    let mut value = persist::ClientSessionValue::new(
        CipherSuite::TLS13_AES_128_GCM_SHA256,
        ticket.to_vec(),
        psk.to_vec(),
        &vec![],
        TimeBase::now().unwrap(),
    );
    value.set_times(3600, 0x1234_5678);
    value.set_max_early_data_size(max_early_data_size);

    let name = webpki::DnsNameRef::try_from_ascii_str("localhost").unwrap();
    let key = persist::ClientSessionKey::session_for_dns_name(name);
    assert!(storage.put(key.get_encoding(), value.get_encoding()));
}

// ---------------------------------------------------------------
// Scenarios.

#[test]
fn happy_ecdhe_handshake() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    config.alpn_protocols = vec![b"h2".to_vec()];
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();
    assert!(conn.is_handshaking());

    // the first flush hint, then starvation
    assert_eq!(conn.step().unwrap(), Status::WantWrite);
    assert_eq!(conn.step().unwrap(), Status::WantRead);

    let writes = transport.take_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, HandshakeType::ClientHello);
    let ch_msg = parse_handshake(&writes[0].1);

    let flight = server_first_flight(
        &transport,
        &identity,
        &TLS13_AES_128_GCM_SHA256,
        &kx::X25519,
        HandshakeHashBuffer::new(),
        &ch_msg,
        None,
        vec![ServerExtension::Protocols(vec![ProtocolName::from(
            b"h2".to_vec(),
        )])],
        true,
    );
    let client_hs_secret = flight.client_hs_secret.clone();
    let server_hs_secret = flight.server_hs_secret.clone();

    drive_to_done(&mut conn);

    assert!(!conn.is_handshaking());
    assert_eq!(
        conn.negotiated_cipher_suite().map(|s| s.suite()),
        Some(CipherSuite::TLS13_AES_128_GCM_SHA256)
    );
    assert_eq!(conn.protocol_version(), Some(ProtocolVersion::TLSv1_3));
    assert_eq!(conn.alpn_protocol(), Some(&b"h2"[..]));
    assert_eq!(conn.key_exchange_mode(), Some(KeyExchangeMode::EphemeralOnly));
    assert!(conn.peer_certificates().is_some());

    // the client's second flight is exactly one Finished
    let writes = transport.take_writes();
    let types: Vec<HandshakeType> = writes.iter().map(|w| w.0).collect();
    assert_eq!(types, vec![HandshakeType::Finished]);

    let (_traffic, _transcript) = expect_client_finished(flight, &writes);

    // epoch switches: handshake in, handshake out, application in,
    // application out, with byte-identical keys on both sides
    let installs = transport.installs();
    assert_eq!(installs.len(), 4);
    assert_eq!(installs[0].0, Direction::Inbound);
    assert_eq!(installs[1].0, Direction::Outbound);
    assert_eq!(installs[2].0, Direction::Inbound);
    assert_eq!(installs[3].0, Direction::Outbound);

    let shared_in = new_tls13_traffic_keys(&TLS13_AES_128_GCM_SHA256, &server_hs_secret);
    assert_eq!(installs[0].1, shared_in.key.as_ref().to_vec());
    let shared_out = new_tls13_traffic_keys(&TLS13_AES_128_GCM_SHA256, &client_hs_secret);
    assert_eq!(installs[1].1, shared_out.key.as_ref().to_vec());

    // middlebox-compatibility CCS went out exactly once
    assert_eq!(transport.ccs_count(), 1);

    // stepping a finished connection stays a no-op
    assert_eq!(conn.step().unwrap(), Status::Done);
    assert_eq!(conn.step().unwrap(), Status::Done);

    // exporters work once traffic keys exist
    let mut out = [0u8; 32];
    conn.export_keying_material(&mut out, b"label", None)
        .unwrap();
}

#[test]
fn new_session_ticket_is_stored_and_signalled() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    let storage = handy::ClientSessionMemoryCache::new(4);
    config.session_storage = storage.clone();
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();

    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);
    let flight = server_first_flight(
        &transport,
        &identity,
        &TLS13_AES_128_GCM_SHA256,
        &kx::X25519,
        HandshakeHashBuffer::new(),
        &ch_msg,
        None,
        vec![],
        true,
    );

    drive_to_done(&mut conn);
    let writes = transport.take_writes();
    let (traffic, transcript) = expect_client_finished(flight, &writes);

    // post-handshake: the server mints a ticket
    let mut nst =
        NewSessionTicketPayloadTLS13::new(3600, 0xdead_beef, vec![0, 1], b"ticket-1".to_vec());
    nst.exts
        .push(NewSessionTicketExtension::EarlyData(16384));
    let nst_msg = handshake(
        HandshakeType::NewSessionTicket,
        HandshakePayload::NewSessionTicket(nst),
    );
    transport.push_message(&nst_msg);

    assert_eq!(conn.step().unwrap(), Status::GotTicket);
    assert_eq!(conn.step().unwrap(), Status::Done);

    // the stored PSK matches the server's own derivation
    let expected_psk = traffic
        .resumption_master_secret_and_derive_ticket_psk(&transcript.get_current_hash(), &[0, 1]);

    let name = webpki::DnsNameRef::try_from_ascii_str("localhost").unwrap();
    let key = persist::ClientSessionKey::session_for_dns_name(name);
    let stored = storage.get(&key.get_encoding()).expect("no session stored");
    let value = persist::ClientSessionValue::read_bytes(&stored).unwrap();
    assert_eq!(value.ticket.0, b"ticket-1".to_vec());
    assert_eq!(value.master_secret.0, expected_psk);
    assert_eq!(value.max_early_data_size, 16384);
}

#[test]
fn psk_only_resumption() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = vec![PSKKeyExchangeMode::PSK_KE];
    let storage = handy::ClientSessionMemoryCache::new(4);
    config.session_storage = storage.clone();

    let psk = [0x77u8; 32];
    seeded_session(storage.as_ref(), b"ticket-psk", &psk);

    let transport = MockTransport::default();
    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();

    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);

    // offered PSK must be last, carry our ticket, and have a binder
    // the server can reproduce
    {
        let ch = client_hello_of(&ch_msg);
        let psk_offer = ch.get_psk().expect("no psk offered");
        assert_eq!(psk_offer.identities[0].identity.0, b"ticket-psk".to_vec());
        assert!(matches!(
            ch.extensions.last(),
            Some(crate::msgs::handshake::ClientExtension::PresharedKey(_))
        ));
        assert!(ch.psk_mode_offered(PSKKeyExchangeMode::PSK_KE));

        let hmp = match &ch_msg.payload {
            MessagePayload::Handshake(hmp) => hmp,
            _ => unreachable!(),
        };
        let truncated = hmp.get_encoding_for_binder_signing();
        let buffer = HandshakeHashBuffer::new();
        let binder_hash =
            buffer.get_hash_given(TLS13_AES_128_GCM_SHA256.get_hash(), &truncated);
        let expected = KeyScheduleEarly::new(TLS13_AES_128_GCM_SHA256.hkdf_algorithm, &psk)
            .resumption_psk_binder_key_and_sign_verify_data(&binder_hash);
        assert_eq!(psk_offer.binders[0].as_ref(), expected.as_ref());
    }

    let flight = server_psk_only_flight(&transport, &TLS13_AES_128_GCM_SHA256, &ch_msg, &psk);

    drive_to_done(&mut conn);

    assert_eq!(conn.key_exchange_mode(), Some(KeyExchangeMode::PskOnly));

    let writes = transport.take_writes();
    let types: Vec<HandshakeType> = writes.iter().map(|w| w.0).collect();
    assert_eq!(types, vec![HandshakeType::Finished]);
    expect_client_finished(flight, &writes);
}

#[test]
fn psk_with_accepted_early_data() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.enable_early_data = true;
    config.max_early_data_size = 16384;
    let storage = handy::ClientSessionMemoryCache::new(4);
    config.session_storage = storage.clone();

    let psk = [0x21u8; 32];
    seeded_session_with_early_data(storage.as_ref(), b"ticket-0rtt", &psk, 16384);

    let transport = MockTransport::default();
    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();

    // the early-data epoch is already live: write 5 bytes of 0-RTT
    {
        use std::io::Write;
        let mut early = conn.early_data().expect("early data not available");
        assert_eq!(early.bytes_left(), 16384);
        early.write_all(b"hello").unwrap();
    }
    assert_eq!(transport.early_data(), b"hello".to_vec());

    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);
    {
        let ch = client_hello_of(&ch_msg);
        assert!(ch
            .find_extension(crate::msgs::enums::ExtensionType::EarlyData)
            .is_some());
    }

    // CCS precedes the early-data epoch switch
    assert_eq!(transport.ccs_count(), 1);
    let installs = transport.installs();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].0, Direction::Outbound);

    // the early traffic keys match an independent derivation over the
    // full ClientHello
    {
        let mut buffer = HandshakeHashBuffer::new();
        buffer.add_message(&ch_msg);
        let ch_hash = buffer.get_hash_given(TLS13_AES_128_GCM_SHA256.get_hash(), &[]);
        let early = KeyScheduleEarly::new(TLS13_AES_128_GCM_SHA256.hkdf_algorithm, &psk);
        let secret = early.client_early_traffic_secret(&ch_hash, &NoKeyLog, &[0u8; 32]);
        let keys = new_tls13_traffic_keys(&TLS13_AES_128_GCM_SHA256, &secret);
        assert_eq!(installs[0].1, keys.key.as_ref().to_vec());
    }

    let flight = server_first_flight(
        &transport,
        &identity,
        &TLS13_AES_128_GCM_SHA256,
        &kx::X25519,
        HandshakeHashBuffer::new(),
        &ch_msg,
        Some(&psk),
        vec![ServerExtension::EarlyData],
        false,
    );

    drive_to_done(&mut conn);

    assert!(conn.is_early_data_accepted());
    assert_eq!(conn.key_exchange_mode(), Some(KeyExchangeMode::PskEphemeral));

    // EndOfEarlyData goes out before Finished
    let writes = transport.take_writes();
    let types: Vec<HandshakeType> = writes.iter().map(|w| w.0).collect();
    assert_eq!(
        types,
        vec![HandshakeType::EndOfEarlyData, HandshakeType::Finished]
    );
    expect_client_finished(flight, &writes);

    // early exporter derives once early traffic existed
    let mut out = [0u8; 16];
    conn.export_early_keying_material(&mut out, b"label", None)
        .unwrap();
}

#[test]
fn hello_retry_request_flow() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    config.kx_groups = vec![&kx::X25519, &kx::SECP256R1];
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();

    let writes = transport.take_writes();
    let ch1_msg = parse_handshake(&writes[0].1);
    {
        let ch1 = client_hello_of(&ch1_msg);
        let shares = ch1.get_keyshare_extension().unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].group, NamedGroup::X25519);
    }

    // the server wants secp256r1 instead
    let hrr = handshake(
        HandshakeType::HelloRetryRequest,
        HandshakePayload::HelloRetryRequest(HelloRetryRequest {
            legacy_version: ProtocolVersion::TLSv1_2,
            session_id: client_hello_of(&ch1_msg).session_id,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            extensions: vec![
                HelloRetryExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
                HelloRetryExtension::KeyShare(NamedGroup::secp256r1),
                HelloRetryExtension::Cookie(PayloadU16::new(b"cranberry".to_vec())),
            ],
        }),
    );
    transport.push_message(&hrr);

    assert_eq!(conn.step().unwrap(), Status::Progressed);

    // second hello echoes the cookie and carries a secp256r1 share
    let writes = transport.take_writes();
    assert_eq!(writes.len(), 1);
    let ch2_msg = parse_handshake(&writes[0].1);
    {
        let ch2 = client_hello_of(&ch2_msg);
        let shares = ch2.get_keyshare_extension().unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].group, NamedGroup::secp256r1);

        match ch2.find_extension(crate::msgs::enums::ExtensionType::Cookie) {
            Some(crate::msgs::handshake::ClientExtension::Cookie(cookie)) => {
                assert_eq!(cookie.0, b"cranberry".to_vec())
            }
            _ => panic!("second hello did not echo cookie"),
        }
    }

    // CCS goes out before the second hello
    assert_eq!(transport.ccs_count(), 1);

    // the server's transcript applies the message_hash rewrite
    let mut buffer = HandshakeHashBuffer::new();
    buffer.add_message(&ch1_msg);
    let mut seed = buffer
        .start_hash(TLS13_AES_128_GCM_SHA256.get_hash())
        .into_hrr_buffer();
    seed.add_message(&hrr);

    let flight = server_first_flight(
        &transport,
        &identity,
        &TLS13_AES_128_GCM_SHA256,
        &kx::SECP256R1,
        seed,
        &ch2_msg,
        None,
        vec![],
        true,
    );

    drive_to_done(&mut conn);
    assert!(!conn.is_handshaking());

    let writes = transport.take_writes();
    expect_client_finished(flight, &writes);
}

#[test]
fn second_hello_retry_request_is_fatal() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    config.kx_groups = vec![&kx::X25519, &kx::SECP256R1];
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();
    let writes = transport.take_writes();
    let ch1_msg = parse_handshake(&writes[0].1);

    let hrr = |group| {
        handshake(
            HandshakeType::HelloRetryRequest,
            HandshakePayload::HelloRetryRequest(HelloRetryRequest {
                legacy_version: ProtocolVersion::TLSv1_2,
                session_id: client_hello_of(&ch1_msg).session_id,
                cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
                extensions: vec![
                    HelloRetryExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
                    HelloRetryExtension::KeyShare(group),
                ],
            }),
        )
    };

    transport.push_message(&hrr(NamedGroup::secp256r1));
    assert_eq!(conn.step().unwrap(), Status::Progressed);

    transport.push_message(&hrr(NamedGroup::X25519));
    let err = conn.step().unwrap_err();
    assert!(matches!(err, Error::InappropriateHandshakeMessage { .. }));
    assert_eq!(
        conn.take_pending_alert(),
        Some(AlertDescription::UnexpectedMessage)
    );

    // the failure is sticky
    assert!(conn.step().is_err());
}

#[test]
fn downgrade_sentinel_is_fatal() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();
    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);

    let mut random = [0x5au8; 32];
    random[24..].copy_from_slice(b"DOWNGRD\x01");
    let sh = handshake(
        HandshakeType::ServerHello,
        HandshakePayload::ServerHello(ServerHelloPayload {
            legacy_version: ProtocolVersion::TLSv1_2,
            random: Random(random),
            session_id: client_hello_of(&ch_msg).session_id,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            compression_method: Compression::Null,
            // no supported_versions: server "chose" TLS 1.2
            extensions: vec![],
        }),
    );
    transport.push_message(&sh);

    let err = conn.step().unwrap_err();
    assert!(matches!(err, Error::PeerMisbehavedError(_)));
    assert_eq!(
        conn.take_pending_alert(),
        Some(AlertDescription::IllegalParameter)
    );
}

#[test]
fn legitimate_tls12_server_is_surrendered() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();
    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);

    let sh = handshake(
        HandshakeType::ServerHello,
        HandshakePayload::ServerHello(ServerHelloPayload {
            legacy_version: ProtocolVersion::TLSv1_2,
            random: Random([0x5a; 32]),
            session_id: client_hello_of(&ch_msg).session_id,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            compression_method: Compression::Null,
            extensions: vec![],
        }),
    );
    transport.push_message(&sh);

    let err = conn.step().unwrap_err();
    assert_eq!(err, Error::Tls12Negotiated);
    // surrender, not protest: no alert is queued
    assert_eq!(conn.take_pending_alert(), None);
}

#[test]
fn flipped_finished_is_fatal_decrypt_error() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();
    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);

    // a normal flight, but we intercept and corrupt the Finished
    server_first_flight(
        &transport,
        &identity,
        &TLS13_AES_128_GCM_SHA256,
        &kx::X25519,
        HandshakeHashBuffer::new(),
        &ch_msg,
        None,
        vec![],
        true,
    );

    {
        let mut shared = transport.0.lock().unwrap();
        let last = shared.events.back_mut().unwrap();
        match last {
            TransportEvent::Handshake(bytes) => {
                let idx = bytes.len() - 1;
                bytes[idx] ^= 0x01;
            }
            _ => unreachable!(),
        }
    }

    let err = loop {
        match conn.step() {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    assert_eq!(err, Error::DecryptError);
    assert_eq!(
        conn.take_pending_alert(),
        Some(AlertDescription::DecryptError)
    );
}

#[test]
fn post_handshake_ccs_is_rejected() {
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();
    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);
    server_first_flight(
        &transport,
        &identity,
        &TLS13_AES_128_GCM_SHA256,
        &kx::X25519,
        HandshakeHashBuffer::new(),
        &ch_msg,
        None,
        vec![],
        true,
    );
    drive_to_done(&mut conn);

    transport
        .0
        .lock()
        .unwrap()
        .events
        .push_back(TransportEvent::ChangeCipherSpecSeen);

    let err = conn.step().unwrap_err();
    assert!(matches!(
        err,
        Error::InappropriateMessage {
            got_type: ContentType::ChangeCipherSpec,
            ..
        }
    ));
}

#[test]
fn server_extension_set_is_subset_of_offer() {
    // an EncryptedExtensions quoting an extension we never offered is
    // rejected as unsolicited
    let identity = ServerIdentity::new();
    let mut config = test_config(&identity);
    config.psk_modes = Vec::new();
    // no ALPN configured
    let transport = MockTransport::default();

    let mut conn = ClientConnection::new(
        Arc::new(config),
        localhost(),
        Box::new(transport.clone()),
    )
    .unwrap();
    let writes = transport.take_writes();
    let ch_msg = parse_handshake(&writes[0].1);

    server_first_flight(
        &transport,
        &identity,
        &TLS13_AES_128_GCM_SHA256,
        &kx::X25519,
        HandshakeHashBuffer::new(),
        &ch_msg,
        None,
        vec![ServerExtension::Protocols(vec![ProtocolName::from(
            b"h2".to_vec(),
        )])],
        true,
    );

    let err = loop {
        match conn.step() {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    assert!(matches!(err, Error::PeerMisbehavedError(_)));
    assert_eq!(
        conn.take_pending_alert(),
        Some(AlertDescription::UnsupportedExtension)
    );
}
