use crate::check::inappropriate_handshake_message;
use crate::conn::{CommonState, Direction};
use crate::error::Error;
use crate::hash_hs::{HandshakeHash, HandshakeHashBuffer};
use crate::key_schedule::{
    KeyScheduleEarly, KeyScheduleHandshake, KeyScheduleNonSecret, KeyScheduleTraffic,
};
use crate::kx;
#[cfg(feature = "logging")]
use crate::log::{debug, trace, warn};
use crate::msgs::base::{Payload, PayloadU8};
use crate::msgs::codec::Codec;
use crate::msgs::enums::KeyUpdateRequest;
use crate::msgs::enums::{AlertDescription, NamedGroup, PSKKeyExchangeMode, SignatureScheme};
use crate::msgs::enums::{ContentType, ExtensionType, HandshakeType};
use crate::msgs::handshake::ClientExtension;
use crate::msgs::handshake::EncryptedExtensions;
use crate::msgs::handshake::NewSessionTicketPayloadTLS13;
use crate::msgs::handshake::{CertificateEntry, CertificatePayloadTLS13};
use crate::msgs::handshake::{DigitallySignedStruct, HasServerExtensions};
use crate::msgs::handshake::{HandshakeMessagePayload, HandshakePayload};
use crate::msgs::handshake::{PresharedKeyIdentity, PresharedKeyOffer, Random, ServerHelloPayload};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist;
use crate::sign;
use crate::suites::Tls13CipherSuite;
use crate::ticketer::TimeBase;
use crate::verify;

use super::hs::ClientContext;
use crate::client::common::{ClientAuthDetails, ClientHelloDetails, ServerCertDetails};
use crate::client::{hs, ClientConfig, ExternalPsk, KeyExchangeMode, ServerName};

use ring::constant_time;

use std::cmp;
use std::sync::Arc;

// Extensions we expect in plaintext in the ServerHello.
static ALLOWED_PLAINTEXT_EXTS: &[ExtensionType] = &[
    ExtensionType::KeyShare,
    ExtensionType::PreSharedKey,
    ExtensionType::SupportedVersions,
];

// Only the intersection of things we offer, and those disallowed
// in TLS1.3
static DISALLOWED_TLS13_EXTS: &[ExtensionType] = &[
    ExtensionType::ECPointFormats,
    ExtensionType::SessionTicket,
    ExtensionType::RenegotiationInfo,
    ExtensionType::ExtendedMasterSecret,
];

/// Where an offered PSK came from; decides the binder label.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum PskKind {
    Resumption,
    External,
}

pub(super) fn handle_server_hello(
    config: Arc<ClientConfig>,
    cx: &mut ClientContext,
    server_hello: &ServerHelloPayload,
    mut resuming_session: Option<persist::ClientSessionValueWithResolvedCipherSuite>,
    server_name: ServerName,
    random: Random,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    early_key_schedule: Option<(&'static Tls13CipherSuite, KeyScheduleEarly)>,
    hello: ClientHelloDetails,
    our_key_share: kx::KeyExchange,
    mut sent_tls13_fake_ccs: bool,
) -> hs::NextStateOrError {
    validate_server_hello(cx.common, server_hello)?;

    let psk_index = server_hello.get_psk_index();
    let their_key_share = server_hello.get_key_share();

    // Which of pre_shared_key and key_share the server took decides
    // the key-exchange mode for the rest of the connection.
    let mode = match (psk_index.is_some(), their_key_share.is_some()) {
        (true, true) => KeyExchangeMode::PskEphemeral,
        (true, false) => KeyExchangeMode::PskOnly,
        (false, true) => KeyExchangeMode::EphemeralOnly,
        (false, false) => {
            cx.common
                .send_fatal_alert(AlertDescription::HandshakeFailure);
            return Err(Error::PeerIncompatibleError(
                "server selected neither a psk nor a key share".to_string(),
            ));
        }
    };

    match mode {
        KeyExchangeMode::PskOnly
            if !config
                .psk_modes
                .contains(&PSKKeyExchangeMode::PSK_KE) =>
        {
            return Err(cx
                .common
                .illegal_param("server chose psk_ke which we did not offer"));
        }
        KeyExchangeMode::PskEphemeral
            if !config
                .psk_modes
                .contains(&PSKKeyExchangeMode::PSK_DHE_KE) =>
        {
            return Err(cx
                .common
                .illegal_param("server chose psk_dhe_ke which we did not offer"));
        }
        _ => {}
    }

    let key_schedule_early = if let Some(selected_psk) = psk_index {
        let (psk_suite, early_key_schedule) = early_key_schedule.ok_or_else(|| {
            cx.common
                .illegal_param("server selected unoffered psk")
        })?;

        if selected_psk != 0 {
            return Err(cx
                .common
                .illegal_param("server selected invalid psk"));
        }

        // In TLS 1.3 a PSK ties down the hash, not the whole suite.
        if psk_suite.hkdf_algorithm != suite.hkdf_algorithm {
            return Err(cx
                .common
                .illegal_param("server resuming incompatible suite"));
        }

        // If the server varies the suite here, we will have encrypted early
        // data with the wrong suite.
        if cx.data.early_data.is_enabled() && psk_suite != suite {
            return Err(cx
                .common
                .illegal_param("server varied suite with early data"));
        }

        debug!("Using PSK");
        Some(early_key_schedule)
    } else {
        debug!("Not using PSK");
        // Discard the early data key schedule.
        cx.data.early_data.rejected();
        cx.common.early_traffic = false;
        resuming_session.take();
        None
    };

    let key_schedule = match (key_schedule_early, their_key_share) {
        (early, Some(their_key_share)) => {
            if our_key_share.group() != their_key_share.group {
                return Err(cx
                    .common
                    .illegal_param("wrong group for key share"));
            }

            let kxr = our_key_share
                .complete(&their_key_share.payload.0)
                .ok_or_else(|| Error::PeerMisbehavedError("key exchange failed".to_string()))?;

            // Remember what KX group the server liked for next time.
            save_kx_hint(&config, &server_name, their_key_share.group);

            match early {
                Some(early) => early.into_handshake(&kxr.shared_secret),
                None => KeyScheduleNonSecret::new(suite.hkdf_algorithm)
                    .into_handshake(&kxr.shared_secret),
            }
        }
        (Some(early), None) => {
            // Pure-PSK: the ECDHE input to the key schedule is zeroes.
            let zeroes = vec![0u8; suite.get_hash().output_len];
            early.into_handshake(&zeroes)
        }
        (None, None) => {
            return Err(Error::General(
                "key exchange resolved to no inputs".to_string(),
            ));
        }
    };

    cx.data.kx_mode = Some(mode);

    let hash_at_client_recvd_server_hello = transcript.get_current_hash();

    let (key_schedule, client_key, server_key) = key_schedule.derive_handshake_secrets(
        &hash_at_client_recvd_server_hello,
        &*config.key_log,
        &random.0,
    );

    // For middlebox compatibility, and while the epoch is still
    // plaintext.
    emit_fake_ccs(&mut sent_tls13_fake_ccs, &config, cx.common)?;

    // Decrypt with the peer's key, encrypt with our own key.
    cx.common
        .install_keys(Direction::Inbound, suite, &server_key)?;

    if !cx.data.early_data.is_enabled() {
        // Set the client encryption key for handshakes if early data is not used
        cx.common
            .install_keys(Direction::Outbound, suite, &client_key)?;
    }

    Ok(Box::new(ExpectEncryptedExtensions {
        config,
        resuming_session,
        server_name,
        random,
        suite,
        transcript,
        key_schedule,
        hello,
    }))
}

fn validate_server_hello(
    common: &mut CommonState,
    server_hello: &ServerHelloPayload,
) -> Result<(), Error> {
    for ext in &server_hello.extensions {
        if !ALLOWED_PLAINTEXT_EXTS.contains(&ext.get_type()) {
            common.send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerMisbehavedError(
                "server sent unexpected cleartext ext".to_string(),
            ));
        }
    }

    Ok(())
}

pub(super) fn initial_key_share(
    config: &ClientConfig,
    server_name: &ServerName,
) -> Result<kx::KeyExchange, Error> {
    let ServerName::DnsName(dns_name) = server_name;
    let key = persist::ClientSessionKey::hint_for_dns_name(dns_name.as_ref());
    let key_buf = key.get_encoding();

    let maybe_value = config.session_storage.get(&key_buf);

    let group = maybe_value
        .and_then(|enc| NamedGroup::read_bytes(&enc))
        .and_then(|group| kx::KeyExchange::choose(group, &config.kx_groups))
        .unwrap_or_else(|| {
            config
                .kx_groups
                .first()
                .expect("No kx groups configured")
        });

    kx::KeyExchange::start(group).ok_or(Error::FailedToGetRandomBytes)
}

fn save_kx_hint(config: &ClientConfig, server_name: &ServerName, group: NamedGroup) {
    let ServerName::DnsName(dns_name) = server_name;
    let key = persist::ClientSessionKey::hint_for_dns_name(dns_name.as_ref());

    config
        .session_storage
        .put(key.get_encoding(), group.get_encoding());
}

/// This implements the horrifying TLS1.3 hack where PSK binders have a
/// data dependency on the message they are contained within.
pub(super) fn fill_in_psk_binder(
    psk_secret: &[u8],
    kind: PskKind,
    suite: &'static Tls13CipherSuite,
    transcript: &HandshakeHashBuffer,
    hmp: &mut HandshakeMessagePayload,
) -> KeyScheduleEarly {
    // The binder is calculated over the clienthello, but doesn't include itself or its
    // length, or the length of its container.
    let binder_plaintext = hmp.get_encoding_for_binder_signing();
    let handshake_hash = transcript.get_hash_given(suite.get_hash(), &binder_plaintext);

    // Run a fake key_schedule to simulate what the server will do if it chooses
    // to resume.
    let key_schedule = KeyScheduleEarly::new(suite.hkdf_algorithm, psk_secret);
    let real_binder = match kind {
        PskKind::Resumption => {
            key_schedule.resumption_psk_binder_key_and_sign_verify_data(&handshake_hash)
        }
        PskKind::External => {
            key_schedule.external_psk_binder_key_and_sign_verify_data(&handshake_hash)
        }
    };

    if let HandshakePayload::ClientHello(ref mut ch) = hmp.payload {
        ch.set_psk_binder(real_binder.as_ref());
    };

    key_schedule
}

pub(super) fn prepare_resumption(
    config: &ClientConfig,
    cx: &mut ClientContext<'_>,
    resuming_session: &persist::ClientSessionValueWithResolvedCipherSuite,
    resuming_suite: &'static Tls13CipherSuite,
    exts: &mut Vec<ClientExtension>,
    doing_retry: bool,
) -> Result<(), Error> {
    cx.data.resumption_ciphersuite = Some(resuming_suite);

    // The EarlyData extension MUST be supplied together with the
    // PreSharedKey extension.
    let max_early_data_size = cmp::min(
        resuming_session.max_early_data_size,
        config.max_early_data_size,
    );
    if config.enable_early_data && max_early_data_size > 0 && !doing_retry {
        cx.data
            .early_data
            .enable(max_early_data_size as usize);
        exts.push(ClientExtension::EarlyData);
    }

    // Finally, and only for TLS1.3 with a ticket resumption, include a binder
    // for our ticket.  This must go last.
    //
    // Include an empty binder. It gets filled in below because it depends on
    // the message it's contained in (!!!).
    let obfuscated_ticket_age = resuming_session.get_obfuscated_ticket_age(TimeBase::now()?);

    let binder_len = resuming_suite.get_hash().output_len;
    let binder = vec![0u8; binder_len];

    let psk_identity = PresharedKeyIdentity::new(
        resuming_session.ticket.0.clone(),
        obfuscated_ticket_age,
    );
    let psk_ext = PresharedKeyOffer::new(psk_identity, binder);
    exts.push(ClientExtension::PresharedKey(psk_ext));
    Ok(())
}

pub(super) fn prepare_external_psk(
    config: &ClientConfig,
    cx: &mut ClientContext<'_>,
    epsk: &ExternalPsk,
    exts: &mut Vec<ClientExtension>,
    doing_retry: bool,
) -> Result<(), Error> {
    cx.data.resumption_ciphersuite = Some(epsk.suite);

    if config.enable_early_data && config.max_early_data_size > 0 && !doing_retry {
        cx.data
            .early_data
            .enable(config.max_early_data_size as usize);
        exts.push(ClientExtension::EarlyData);
    }

    // An out-of-band PSK has no ticket age; it goes on the wire as
    // zero.
    let binder = vec![0u8; epsk.suite.get_hash().output_len];
    let psk_identity = PresharedKeyIdentity::new(epsk.identity.clone(), 0);
    exts.push(ClientExtension::PresharedKey(PresharedKeyOffer::new(
        psk_identity,
        binder,
    )));
    Ok(())
}

pub(super) fn derive_early_traffic_secret(
    config: &ClientConfig,
    cx: &mut ClientContext<'_>,
    psk_suite: &'static Tls13CipherSuite,
    early_key_schedule: &KeyScheduleEarly,
    sent_tls13_fake_ccs: &mut bool,
    transcript_buffer: &HandshakeHashBuffer,
    client_random: &[u8; 32],
) -> Result<(), Error> {
    // For middlebox compatibility
    emit_fake_ccs(sent_tls13_fake_ccs, config, cx.common)?;

    let client_hello_hash = transcript_buffer.get_hash_given(psk_suite.get_hash(), &[]);
    let client_early_traffic_secret = early_key_schedule.client_early_traffic_secret(
        &client_hello_hash,
        &*config.key_log,
        client_random,
    );

    // Set early data encryption key
    cx.common
        .install_keys(Direction::Outbound, psk_suite, &client_early_traffic_secret)?;

    cx.data.early_exporter =
        Some(early_key_schedule.early_exporter_master_secret(&client_hello_hash));

    // Now the client can send encrypted early data
    cx.common.early_traffic = true;
    trace!("Starting early data traffic");
    Ok(())
}

pub(super) fn emit_fake_ccs(
    sent_tls13_fake_ccs: &mut bool,
    config: &ClientConfig,
    common: &mut CommonState,
) -> Result<(), Error> {
    if !config.enable_middlebox_compat {
        return Ok(());
    }

    if std::mem::replace(sent_tls13_fake_ccs, true) {
        return Ok(());
    }

    common.send_msg(Message {
        payload: MessagePayload::ChangeCipherSpec,
    })
}

fn validate_encrypted_extensions(
    common: &mut CommonState,
    hello: &ClientHelloDetails,
    exts: &EncryptedExtensions,
) -> Result<(), Error> {
    if exts.has_duplicate_extension() {
        common.send_fatal_alert(AlertDescription::DecodeError);
        return Err(Error::PeerMisbehavedError(
            "server sent duplicate encrypted extensions".to_string(),
        ));
    }

    if hello.server_sent_unsolicited_extensions(exts, &[]) {
        common.send_fatal_alert(AlertDescription::UnsupportedExtension);
        let msg = "server sent unsolicited encrypted extension".to_string();
        return Err(Error::PeerMisbehavedError(msg));
    }

    for ext in exts {
        if ALLOWED_PLAINTEXT_EXTS.contains(&ext.get_type())
            || DISALLOWED_TLS13_EXTS.contains(&ext.get_type())
        {
            common.send_fatal_alert(AlertDescription::UnsupportedExtension);
            let msg = "server sent inappropriate encrypted extension".to_string();
            return Err(Error::PeerMisbehavedError(msg));
        }
    }

    Ok(())
}

struct ExpectEncryptedExtensions {
    config: Arc<ClientConfig>,
    resuming_session: Option<persist::ClientSessionValueWithResolvedCipherSuite>,
    server_name: ServerName,
    random: Random,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    hello: ClientHelloDetails,
}

impl hs::State for ExpectEncryptedExtensions {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> hs::NextStateOrError {
        let exts = require_handshake_msg!(
            m,
            HandshakeType::EncryptedExtensions,
            HandshakePayload::EncryptedExtensions
        )?;
        debug!("TLS1.3 encrypted extensions: {:?}", exts);
        self.transcript.add_message(&m);

        validate_encrypted_extensions(cx.common, &self.hello, exts)?;
        hs::process_alpn_protocol(cx, &self.config, exts.get_alpn_protocol())?;

        let using_psk = matches!(
            cx.data.kx_mode,
            Some(KeyExchangeMode::PskOnly) | Some(KeyExchangeMode::PskEphemeral)
        );

        if using_psk {
            let was_early_traffic = cx.common.early_traffic;
            if was_early_traffic {
                if exts.early_data_extension_offered() {
                    cx.data.early_data.accepted();
                } else {
                    cx.data.early_data.rejected();
                    cx.common.early_traffic = false;
                }
            }

            if was_early_traffic && !cx.common.early_traffic {
                // If no early traffic, set the encryption key for handshakes
                cx.common.install_keys(
                    Direction::Outbound,
                    self.suite,
                    self.key_schedule.client_key(),
                )?;
            }

            if let Some(resuming_session) = &self.resuming_session {
                cx.data.server_cert_chain = resuming_session
                    .server_cert_chain
                    .clone();
            }

            // We *don't* reverify the certificate chain here: resumption is a
            // continuation of the previous session in terms of security policy.
            let cert_verified = verify::ServerCertVerified::assertion();
            let sig_verified = verify::HandshakeSignatureValid::assertion();
            Ok(Box::new(ExpectFinished {
                config: self.config,
                server_name: self.server_name,
                random: self.random,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
                client_auth: None,
                cert_verified,
                sig_verified,
            }))
        } else {
            if exts.early_data_extension_offered() {
                let msg = "server sent early data extension without resumption".to_string();
                return Err(Error::PeerMisbehavedError(msg));
            }
            Ok(Box::new(ExpectCertificateOrCertReq {
                config: self.config,
                server_name: self.server_name,
                random: self.random,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
            }))
        }
    }
}

struct ExpectCertificateOrCertReq {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    random: Random,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
}

impl hs::State for ExpectCertificateOrCertReq {
    fn handle(self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> hs::NextStateOrError {
        crate::check::check_message(
            &m,
            &[ContentType::Handshake],
            &[
                HandshakeType::Certificate,
                HandshakeType::CertificateRequest,
            ],
        )?;
        if m.is_handshake_type(HandshakeType::Certificate) {
            Box::new(ExpectCertificate {
                config: self.config,
                server_name: self.server_name,
                random: self.random,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
                client_auth: None,
            })
            .handle(cx, m)
        } else {
            Box::new(ExpectCertificateRequest {
                config: self.config,
                server_name: self.server_name,
                random: self.random,
                suite: self.suite,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
            })
            .handle(cx, m)
        }
    }
}

// TLS1.3 version of CertificateRequest handling.  We then move to expecting the server
// Certificate.
struct ExpectCertificateRequest {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    random: Random,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
}

impl hs::State for ExpectCertificateRequest {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> hs::NextStateOrError {
        let certreq = &require_handshake_msg!(
            m,
            HandshakeType::CertificateRequest,
            HandshakePayload::CertificateRequest
        )?;
        self.transcript.add_message(&m);
        debug!("Got CertificateRequest {:?}", certreq);

        // Must be empty during handshake.
        if !certreq.context.0.is_empty() {
            warn!("Server sent non-empty certreq context");
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::CorruptMessagePayload(ContentType::Handshake));
        }

        if certreq.has_duplicate_extension() {
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::PeerMisbehavedError(
                "certificate request with duplicate extensions".to_string(),
            ));
        }

        let tls13_sign_schemes = sign::supported_sign_tls13();
        let compat_sigschemes = certreq
            .get_sigalgs_extension()
            .ok_or_else(|| {
                cx.common
                    .missing_extension("certificate request without signature_algorithms")
            })?
            .iter()
            .cloned()
            .filter(|scheme| tls13_sign_schemes.contains(scheme))
            .collect::<Vec<SignatureScheme>>();

        if compat_sigschemes.is_empty() {
            cx.common
                .send_fatal_alert(AlertDescription::HandshakeFailure);
            return Err(Error::PeerIncompatibleError(
                "server sent bad certreq schemes".to_string(),
            ));
        }

        let no_canames = Vec::new();
        let canames = certreq
            .get_authorities_extension()
            .unwrap_or(&no_canames)
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<&[u8]>>();
        let maybe_certkey = self
            .config
            .client_auth_cert_resolver
            .resolve(&canames, &compat_sigschemes);

        let mut client_auth = ClientAuthDetails::new();
        if let Some(certkey) = maybe_certkey {
            debug!("Attempting client auth");
            let maybe_signer = certkey
                .key
                .choose_scheme(&compat_sigschemes);
            client_auth.certkey = Some(certkey);
            client_auth.signer = maybe_signer;
            client_auth.auth_context = Some(certreq.context.0.clone());
        } else {
            debug!("Client auth requested but no cert selected");
        }

        Ok(Box::new(ExpectCertificate {
            config: self.config,
            server_name: self.server_name,
            random: self.random,
            suite: self.suite,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_auth: Some(client_auth),
        }))
    }
}

struct ExpectCertificate {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    random: Random,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    client_auth: Option<ClientAuthDetails>,
}

impl hs::State for ExpectCertificate {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> hs::NextStateOrError {
        let cert_chain = require_handshake_msg!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::Certificate
        )?;
        self.transcript.add_message(&m);

        // This is only non-empty for client auth.
        if !cert_chain.context.0.is_empty() {
            warn!("certificate with non-empty context during handshake");
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::CorruptMessagePayload(ContentType::Handshake));
        }

        // Unknown per-entry extensions are skipped, but an entry
        // repeating an extension is still malformed.
        if cert_chain.any_entry_has_duplicate_extension() {
            warn!("certificate chain contains duplicate extension");
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::PeerMisbehavedError(
                "bad cert chain extensions".to_string(),
            ));
        }

        let server_cert = ServerCertDetails::new(cert_chain.convert());

        Ok(Box::new(ExpectCertificateVerify {
            config: self.config,
            server_name: self.server_name,
            random: self.random,
            suite: self.suite,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            server_cert,
            client_auth: self.client_auth,
        }))
    }
}

// --- TLS1.3 CertificateVerify ---
struct ExpectCertificateVerify {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    random: Random,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    server_cert: ServerCertDetails,
    client_auth: Option<ClientAuthDetails>,
}

impl hs::State for ExpectCertificateVerify {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> hs::NextStateOrError {
        let cert_verify = require_handshake_msg!(
            m,
            HandshakeType::CertificateVerify,
            HandshakePayload::CertificateVerify
        )?;

        trace!("Server cert is {:?}", self.server_cert.cert_chain);

        // The scheme must be one the client put in signature_algorithms.
        if !self
            .config
            .signature_algorithms
            .contains(&cert_verify.scheme)
        {
            return Err(cx
                .common
                .illegal_param("server signed with non-offered scheme"));
        }

        // 1. Verify the certificate chain, as strictly as configured.
        let (end_entity, intermediates) = self
            .server_cert
            .cert_chain
            .split_first()
            .ok_or(Error::NoCertificatesPresented)?;
        let now = std::time::SystemTime::now();
        let cert_verified = match self.config.server_auth_policy {
            super::AuthMode::Required => self
                .config
                .verifier
                .verify_server_cert(end_entity, intermediates, &self.server_name, now)
                .map_err(|err| hs::send_cert_error_alert(cx.common, err))?,
            super::AuthMode::Optional => {
                match self
                    .config
                    .verifier
                    .verify_server_cert(end_entity, intermediates, &self.server_name, now)
                {
                    Ok(verified) => verified,
                    Err(err) => {
                        debug!("Tolerating unverified server cert: {:?}", err);
                        cx.data.unverified_peer_reason = Some(err);
                        verify::ServerCertVerified::assertion()
                    }
                }
            }
            super::AuthMode::None => verify::ServerCertVerified::assertion(),
        };

        // 2. Verify their signature on the handshake.  This is not
        // policy: a bad signature breaks the handshake no matter what
        // the caller thinks of the certificate.
        let handshake_hash = self.transcript.get_current_hash();
        let sig_verified = self
            .config
            .verifier
            .verify_tls13_signature(
                &verify::construct_tls13_server_verify_message(&handshake_hash),
                &self.server_cert.cert_chain[0],
                cert_verify,
            )
            .map_err(|_| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecryptError);
                Error::DecryptError
            })?;

        cx.data.server_cert_chain = self.server_cert.cert_chain;
        self.transcript.add_message(&m);

        Ok(Box::new(ExpectFinished {
            config: self.config,
            server_name: self.server_name,
            random: self.random,
            suite: self.suite,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_auth: self.client_auth,
            cert_verified,
            sig_verified,
        }))
    }
}

fn emit_certificate_tls13(
    transcript: &mut HandshakeHash,
    client_auth: &mut ClientAuthDetails,
    common: &mut CommonState,
) -> Result<(), Error> {
    let context = client_auth
        .auth_context
        .take()
        .unwrap_or_default();

    let mut cert_payload = CertificatePayloadTLS13 {
        context: PayloadU8::new(context),
        entries: Vec::new(),
    };

    if let Some(cert_key) = &client_auth.certkey {
        for cert in &cert_key.cert {
            cert_payload
                .entries
                .push(CertificateEntry::new(cert.clone()));
        }
    }

    let m = Message {
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::Certificate,
            payload: HandshakePayload::Certificate(cert_payload),
        }),
    };
    transcript.add_message(&m);
    common.send_msg(m)
}

fn emit_certverify_tls13(
    transcript: &mut HandshakeHash,
    client_auth: &mut ClientAuthDetails,
    common: &mut CommonState,
) -> Result<(), Error> {
    let signer = match client_auth.signer.take() {
        Some(s) => s,
        None => {
            debug!("Skipping certverify message (no client scheme/key)");
            return Ok(());
        }
    };

    let message = verify::construct_tls13_client_verify_message(&transcript.get_current_hash());

    let scheme = signer.get_scheme();
    let sig = signer.sign(&message)?;
    let dss = DigitallySignedStruct::new(scheme, sig);

    let m = Message {
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::CertificateVerify,
            payload: HandshakePayload::CertificateVerify(dss),
        }),
    };

    transcript.add_message(&m);
    common.send_msg(m)
}

fn emit_finished_tls13(
    transcript: &mut HandshakeHash,
    verify_data: ring::hmac::Tag,
    common: &mut CommonState,
) -> Result<(), Error> {
    let verify_data_payload = Payload::new(verify_data.as_ref());

    let m = Message {
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::Finished,
            payload: HandshakePayload::Finished(verify_data_payload),
        }),
    };

    transcript.add_message(&m);
    common.send_msg(m)
}

fn emit_end_of_early_data_tls13(
    transcript: &mut HandshakeHash,
    common: &mut CommonState,
) -> Result<(), Error> {
    let m = Message {
        payload: MessagePayload::Handshake(HandshakeMessagePayload {
            typ: HandshakeType::EndOfEarlyData,
            payload: HandshakePayload::EndOfEarlyData,
        }),
    };

    transcript.add_message(&m);
    common.send_msg(m)
}

struct ExpectFinished {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    random: Random,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleHandshake,
    client_auth: Option<ClientAuthDetails>,
    cert_verified: verify::ServerCertVerified,
    sig_verified: verify::HandshakeSignatureValid,
}

impl hs::State for ExpectFinished {
    fn handle(self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> hs::NextStateOrError {
        let mut st = *self;
        let finished =
            require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let handshake_hash = st.transcript.get_current_hash();
        let expect_verify_data = st
            .key_schedule
            .sign_server_finish(&handshake_hash);

        let fin = constant_time::verify_slices_are_equal(expect_verify_data.as_ref(), &finished.0)
            .map_err(|_| {
                cx.common
                    .send_fatal_alert(AlertDescription::DecryptError);
                Error::DecryptError
            })
            .map(|_| verify::FinishedMessageVerified::assertion())?;

        st.transcript.add_message(&m);

        let hash_after_handshake = st.transcript.get_current_hash();

        // EndOfEarlyData is signed under the early keys, so the
        // handshake write key is still needed after the application
        // secrets exist.
        let handshake_client_key = st.key_schedule.client_key().clone();

        /* Derive the application secrets at the server Finished
         * boundary, and switch inbound protection over: the server's
         * very next record is under its application key. */
        let (key_schedule_pending, client_key, server_key) = st
            .key_schedule
            .into_traffic_with_client_finished_pending(
                &hash_after_handshake,
                &*st.config.key_log,
                &st.random.0,
            );

        cx.common
            .install_keys(Direction::Inbound, st.suite, &server_key)?;

        /* The EndOfEarlyData message to server is still encrypted with early data keys,
         * but appears in the transcript after the server Finished. */
        if cx.common.early_traffic {
            emit_end_of_early_data_tls13(&mut st.transcript, cx.common)?;
            cx.common.early_traffic = false;
            cx.data.early_data.finished();
            cx.common
                .install_keys(Direction::Outbound, st.suite, &handshake_client_key)?;
        }

        /* Send our authentication/finished messages.  These are still encrypted
         * with our handshake keys. */
        if let Some(client_auth) = &mut st.client_auth {
            emit_certificate_tls13(&mut st.transcript, client_auth, cx.common)?;
            emit_certverify_tls13(&mut st.transcript, client_auth, cx.common)?;
        }

        let handshake_hash = st.transcript.get_current_hash();
        let (key_schedule_traffic, verify_data) =
            key_schedule_pending.sign_client_finish(&handshake_hash);
        emit_finished_tls13(&mut st.transcript, verify_data, cx.common)?;

        /* Now move to our application traffic keys. */
        cx.common
            .install_keys(Direction::Outbound, st.suite, &client_key)?;
        cx.common.start_traffic();

        Ok(Box::new(ExpectTraffic {
            config: st.config,
            server_name: st.server_name,
            suite: st.suite,
            transcript: st.transcript,
            key_schedule: key_schedule_traffic,
            want_write_key_update: false,
            _cert_verified: st.cert_verified,
            _sig_verified: st.sig_verified,
            _fin_verified: fin,
        }))
    }
}

// -- Traffic transit state (TLS1.3) --
// In this state we can be sent tickets, key updates,
// and application data.
struct ExpectTraffic {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_schedule: KeyScheduleTraffic,
    want_write_key_update: bool,
    _cert_verified: verify::ServerCertVerified,
    _sig_verified: verify::HandshakeSignatureValid,
    _fin_verified: verify::FinishedMessageVerified,
}

impl ExpectTraffic {
    fn handle_new_ticket_tls13(
        &mut self,
        cx: &mut ClientContext<'_>,
        nst: &NewSessionTicketPayloadTLS13,
    ) -> Result<(), Error> {
        if nst.has_duplicate_extension() {
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::PeerMisbehavedError(
                "peer sent duplicate ticket extensions".to_string(),
            ));
        }

        // The transcript stopped at the client Finished; this is the
        // resumption-master-secret boundary.
        let handshake_hash = self.transcript.get_current_hash();
        let secret = self
            .key_schedule
            .resumption_master_secret_and_derive_ticket_psk(&handshake_hash, &nst.nonce.0);

        let time_now = TimeBase::now()?;
        let mut value = persist::ClientSessionValue::new(
            self.suite.suite(),
            nst.ticket.0.clone(),
            secret,
            &cx.data.server_cert_chain,
            time_now,
        );
        value.set_times(nst.lifetime, nst.age_add);

        if let Some(sz) = nst.get_max_early_data_size() {
            value.set_max_early_data_size(sz);
        }
        if let Some(alpn) = &cx.common.alpn_protocol {
            value.alpn = Some(PayloadU8::new(alpn.clone()));
        }

        let ServerName::DnsName(dns_name) = &self.server_name;
        let key = persist::ClientSessionKey::session_for_dns_name(dns_name.as_ref());

        let worked = self
            .config
            .session_storage
            .put(key.get_encoding(), value.get_encoding());

        if worked {
            debug!("Ticket saved");
        } else {
            debug!("Ticket not saved");
        }

        cx.data.got_ticket = true;
        Ok(())
    }

    fn handle_key_update(
        &mut self,
        common: &mut CommonState,
        kur: &KeyUpdateRequest,
    ) -> Result<(), Error> {
        match kur {
            KeyUpdateRequest::UpdateNotRequested => {}
            KeyUpdateRequest::UpdateRequested => {
                self.want_write_key_update = true;
            }
            _ => {
                common.send_fatal_alert(AlertDescription::IllegalParameter);
                return Err(Error::CorruptMessagePayload(ContentType::Handshake));
            }
        }

        // Update our read-side keys.
        let new_read_key = self
            .key_schedule
            .next_server_application_traffic_secret();
        common.install_keys(Direction::Inbound, self.suite, &new_read_key)
    }
}

impl hs::State for ExpectTraffic {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> hs::NextStateOrError {
        match m.payload {
            MessagePayload::ApplicationData(_) => {
                // the record layer owns post-handshake plaintext; this
                // was informational only
            }
            MessagePayload::Handshake(payload) => match payload.payload {
                HandshakePayload::NewSessionTicket(new_ticket) => {
                    self.handle_new_ticket_tls13(cx, &new_ticket)?
                }
                HandshakePayload::KeyUpdate(key_update) => {
                    self.handle_key_update(cx.common, &key_update)?
                }
                _ => {
                    return Err(inappropriate_handshake_message(
                        &payload,
                        &[HandshakeType::NewSessionTicket, HandshakeType::KeyUpdate],
                    ));
                }
            },
            _ => {
                return Err(crate::check::inappropriate_message(
                    &m,
                    &[ContentType::ApplicationData, ContentType::Handshake],
                ));
            }
        }

        Ok(self)
    }

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.key_schedule
            .export_keying_material(output, label, context)
    }

    fn perhaps_write_key_update(&mut self, common: &mut CommonState) -> Result<(), Error> {
        if self.want_write_key_update {
            self.want_write_key_update = false;
            common.send_msg(Message::build_key_update_notify())?;

            let write_key = self
                .key_schedule
                .next_client_application_traffic_secret();
            common.install_keys(Direction::Outbound, self.suite, &write_key)?;
        }
        Ok(())
    }
}
