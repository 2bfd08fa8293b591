use crate::check::check_message;
use crate::conn::CommonState;
use crate::error::{Error, WebPkiError};
use crate::hash_hs::HandshakeHashBuffer;
use crate::key_schedule::KeyScheduleEarly;
use crate::kx;
#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{AlertDescription, CipherSuite, Compression, ProtocolVersion};
use crate::msgs::enums::{ContentType, HandshakeType};
use crate::msgs::handshake::{ClientExtension, ConvertProtocolNameList, ProtocolNameList};
use crate::msgs::handshake::{ClientHelloPayload, HandshakeMessagePayload, HandshakePayload};
use crate::msgs::handshake::HasServerExtensions;
use crate::msgs::handshake::{HelloRetryRequest, KeyShareEntry};
use crate::msgs::handshake::{Random, SessionID};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist;
use crate::suites::Tls13CipherSuite;
use crate::ticketer::TimeBase;

use crate::client::common::ClientHelloDetails;
use crate::client::{tls13, ClientConfig, ClientConnectionData, ServerName};

use std::convert::TryInto;
use std::sync::Arc;

pub(super) type NextState = Box<dyn State>;
pub(super) type NextStateOrError = Result<NextState, Error>;

/// The downgrade-protection sentinels of RFC 8446 section 4.1.3: a
/// TLS 1.3-capable server answering with TLS 1.2 (or below) plants
/// "DOWNGRD" plus a version byte in the last eight bytes of its
/// random.
static DOWNGRADE_SENTINEL_TLS12: [u8; 8] = [0x44, 0x4f, 0x57, 0x4e, 0x47, 0x52, 0x44, 0x01];
static DOWNGRADE_SENTINEL_TLS11: [u8; 8] = [0x44, 0x4f, 0x57, 0x4e, 0x47, 0x52, 0x44, 0x00];

pub(super) trait State: Send + Sync {
    /// Each handle() implementation consumes a whole TLS message, and returns
    /// either an error or the next state.
    fn handle(self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> NextStateOrError;

    fn export_keying_material(
        &self,
        _output: &mut [u8],
        _label: &[u8],
        _context: Option<&[u8]>,
    ) -> Result<(), Error> {
        Err(Error::HandshakeNotComplete)
    }

    fn perhaps_write_key_update(&mut self, _common: &mut CommonState) -> Result<(), Error> {
        Ok(())
    }
}

pub(super) struct ClientContext<'a> {
    pub(super) common: &'a mut CommonState,
    pub(super) data: &'a mut ClientConnectionData,
}

fn find_session(
    server_name: &ServerName,
    config: &ClientConfig,
) -> Option<persist::ClientSessionValueWithResolvedCipherSuite> {
    let ServerName::DnsName(dns_name) = server_name;
    let key = persist::ClientSessionKey::session_for_dns_name(dns_name.as_ref());
    let key_buf = key.get_encoding();

    let value = config
        .session_storage
        .get(&key_buf)
        .or_else(|| {
            debug!("No cached session for {:?}", server_name);
            None
        })?;

    let mut reader = Reader::init(&value[..]);
    let result = persist::ClientSessionValue::read(&mut reader)
        .and_then(|csv| csv.resolve_cipher_suite(&config.cipher_suites));

    match result {
        Some(resolved) => {
            let time = TimeBase::now().ok()?;
            if resolved.has_expired(time) {
                None
            } else {
                Some(resolved)
            }
        }
        None => None,
    }
}

pub(super) fn start_handshake(
    server_name: ServerName,
    config: Arc<ClientConfig>,
    cx: &mut ClientContext<'_>,
) -> NextStateOrError {
    let transcript_buffer = HandshakeHashBuffer::new();

    if !config.supports_version(ProtocolVersion::TLSv1_3) {
        return Err(Error::General(
            "TLS 1.3 must be among the enabled versions".to_string(),
        ));
    }

    let resuming_session = find_session(&server_name, &config);
    if resuming_session.is_some() {
        debug!("Resuming session");
    } else {
        debug!("Not resuming any session");
    }

    let key_share = tls13::initial_key_share(&config, &server_name)?;

    // https://tools.ietf.org/html/rfc8446#appendix-D.4
    let session_id = SessionID::random()?;
    let random = Random::new()?;
    let hello_details = ClientHelloDetails::new();
    let sent_tls13_fake_ccs = false;

    emit_client_hello_for_retry(
        config,
        cx,
        resuming_session,
        random,
        transcript_buffer,
        sent_tls13_fake_ccs,
        hello_details,
        session_id,
        None,
        server_name,
        key_share,
        None,
    )
}

struct ExpectServerHello {
    config: Arc<ClientConfig>,
    resuming_session: Option<persist::ClientSessionValueWithResolvedCipherSuite>,
    server_name: ServerName,
    random: Random,
    transcript_buffer: HandshakeHashBuffer,
    early_key_schedule: Option<(&'static Tls13CipherSuite, KeyScheduleEarly)>,
    hello: ClientHelloDetails,
    offered_key_share: kx::KeyExchange,
    session_id: SessionID,
    sent_tls13_fake_ccs: bool,
    suite: Option<&'static Tls13CipherSuite>,
}

struct ExpectServerHelloOrHelloRetryRequest {
    next: ExpectServerHello,
}

fn emit_client_hello_for_retry(
    config: Arc<ClientConfig>,
    cx: &mut ClientContext<'_>,
    resuming_session: Option<persist::ClientSessionValueWithResolvedCipherSuite>,
    random: Random,
    mut transcript_buffer: HandshakeHashBuffer,
    mut sent_tls13_fake_ccs: bool,
    mut hello: ClientHelloDetails,
    session_id: SessionID,
    retryreq: Option<&HelloRetryRequest>,
    server_name: ServerName,
    key_share: kx::KeyExchange,
    suite: Option<&'static Tls13CipherSuite>,
) -> NextStateOrError {
    let support_tls12 = config.supports_version(ProtocolVersion::TLSv1_2);

    let mut supported_versions = vec![ProtocolVersion::TLSv1_3];
    if support_tls12 {
        supported_versions.push(ProtocolVersion::TLSv1_2);
    }

    let mut exts = Vec::new();
    exts.push(ClientExtension::SupportedVersions(supported_versions));
    if let (Some(sni_name), true) = (server_name.for_sni(), config.enable_sni) {
        exts.push(ClientExtension::make_sni(sni_name));
    }
    exts.push(ClientExtension::NamedGroups(
        config
            .kx_groups
            .iter()
            .map(|skxg| skxg.name)
            .collect(),
    ));
    exts.push(ClientExtension::SignatureAlgorithms(
        config.signature_algorithms.clone(),
    ));
    if let Some(mfl) = config.max_fragment_length {
        exts.push(ClientExtension::MaxFragmentLength(mfl));
    }

    let key_share_entry = KeyShareEntry::new(key_share.group(), key_share.pubkey.as_ref());
    exts.push(ClientExtension::KeyShare(vec![key_share_entry]));

    if let Some(cookie) = retryreq.and_then(HelloRetryRequest::get_cookie) {
        exts.push(ClientExtension::Cookie(cookie.clone()));
    }

    let may_offer_psk = !config.psk_modes.is_empty()
        && (config.enable_tickets || config.external_psk.is_some());
    if may_offer_psk {
        exts.push(ClientExtension::PresharedKeyModes(
            config.psk_modes.clone(),
        ));
    }

    if !config.alpn_protocols.is_empty() {
        exts.push(ClientExtension::Protocols(ProtocolNameList::from_slices(
            &config
                .alpn_protocols
                .iter()
                .map(|proto| &proto[..])
                .collect::<Vec<_>>(),
        )));
    }

    // Decide what PSK, if any, goes on the end of this hello.  The
    // pre_shared_key extension MUST be last.
    let doing_retry = retryreq.is_some();
    let resumption_suite = if config.enable_tickets && may_offer_psk {
        resuming_session
            .as_ref()
            .and_then(|resuming| match suite {
                Some(suite) => suite.can_resume_from(resuming.supported_cipher_suite()),
                None => Some(resuming.supported_cipher_suite()),
            })
    } else {
        None
    };

    let fill_in_binder = if let Some(resuming_suite) = resumption_suite {
        if let Some(resuming) = resuming_session.as_ref() {
            tls13::prepare_resumption(
                &config,
                cx,
                resuming,
                resuming_suite,
                &mut exts,
                doing_retry,
            )?;
        }
        Some((resuming_suite, tls13::PskKind::Resumption))
    } else if may_offer_psk && config.external_psk.is_some() {
        let epsk = config
            .external_psk
            .as_ref()
            .expect("external offer without psk");
        tls13::prepare_external_psk(&config, cx, epsk, &mut exts, doing_retry)?;
        Some((epsk.suite, tls13::PskKind::External))
    } else {
        None
    };

    // Note what extensions we sent.
    hello.note_sent_extensions(&exts);

    let mut cipher_suites: Vec<_> = config
        .cipher_suites
        .iter()
        .map(|cs| cs.suite())
        .collect();
    // We don't do renegotiation at all, in fact.
    cipher_suites.push(CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV);

    let mut chp = HandshakeMessagePayload {
        typ: HandshakeType::ClientHello,
        payload: HandshakePayload::ClientHello(ClientHelloPayload {
            // "This value MUST be set to 0x0303 for all records generated
            //  by a TLS 1.3 implementation"
            client_version: ProtocolVersion::TLSv1_2,
            random,
            session_id,
            cipher_suites,
            compression_methods: vec![Compression::Null],
            extensions: exts,
        }),
    };

    let early_key_schedule = fill_in_binder.map(|(psk_suite, kind)| {
        let secret: &[u8] = match kind {
            tls13::PskKind::Resumption => {
                &resuming_session
                    .as_ref()
                    .expect("resumption offer without session")
                    .master_secret
                    .0
            }
            tls13::PskKind::External => config
                .external_psk
                .as_ref()
                .expect("external offer without psk")
                .secret(),
        };
        let schedule =
            tls13::fill_in_psk_binder(secret, kind, psk_suite, &transcript_buffer, &mut chp);
        (psk_suite, schedule)
    });

    let ch = Message {
        payload: MessagePayload::Handshake(chp),
    };

    if doing_retry {
        // send dummy CCS to fool middleboxes prior
        // to second client hello
        tls13::emit_fake_ccs(&mut sent_tls13_fake_ccs, &config, cx.common)?;
    }

    trace!("Sending ClientHello {:#?}", ch);

    transcript_buffer.add_message(&ch);
    cx.common.send_msg(ch)?;

    // Calculate the hash of ClientHello and use it to derive EarlyTrafficSecret
    let early_key_schedule = match early_key_schedule {
        Some((psk_suite, schedule)) => {
            if cx.data.early_data.is_enabled() {
                tls13::derive_early_traffic_secret(
                    &config,
                    cx,
                    psk_suite,
                    &schedule,
                    &mut sent_tls13_fake_ccs,
                    &transcript_buffer,
                    &random.0,
                )?;
            }
            Some((psk_suite, schedule))
        }
        None => None,
    };

    let next = ExpectServerHello {
        config,
        resuming_session,
        server_name,
        random,
        transcript_buffer,
        early_key_schedule,
        hello,
        offered_key_share: key_share,
        session_id,
        sent_tls13_fake_ccs,
        suite,
    };

    Ok(if retryreq.is_none() {
        Box::new(ExpectServerHelloOrHelloRetryRequest { next })
    } else {
        Box::new(next)
    })
}

pub(super) fn process_alpn_protocol(
    cx: &mut ClientContext<'_>,
    config: &ClientConfig,
    proto: Option<&[u8]>,
) -> Result<(), Error> {
    cx.common.alpn_protocol = proto.map(ToOwned::to_owned);

    if let Some(alpn_protocol) = &cx.common.alpn_protocol {
        if !config
            .alpn_protocols
            .contains(alpn_protocol)
        {
            return Err(cx
                .common
                .illegal_param("server sent non-offered ALPN protocol"));
        }
    }

    debug!(
        "ALPN protocol is {:?}",
        cx.common
            .alpn_protocol
            .as_ref()
            .map(|v| crate::bs_debug::BsDebug(v))
    );
    Ok(())
}

impl State for ExpectServerHello {
    fn handle(mut self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> NextStateOrError {
        let server_hello =
            require_handshake_msg!(m, HandshakeType::ServerHello, HandshakePayload::ServerHello)?;
        trace!("We got ServerHello {:#?}", server_hello);

        use crate::msgs::enums::ProtocolVersion::{TLSv1_2, TLSv1_3};

        let is_tls13 = match server_hello.get_supported_versions() {
            Some(TLSv1_3) => true,
            Some(_) => {
                return Err(cx
                    .common
                    .illegal_param("server chose unusable version"));
            }
            None => false,
        };

        if !is_tls13 {
            // No supported_versions extension: the server speaks
            // TLS 1.2 or below.
            if server_hello.legacy_version != TLSv1_2 {
                cx.common
                    .send_fatal_alert(AlertDescription::ProtocolVersion);
                return Err(Error::PeerIncompatibleError(
                    "server does not support TLS v1.2/v1.3".to_string(),
                ));
            }

            // A TLS 1.3-capable server repelled to TLS 1.2 by an
            // attacker reveals itself through the sentinel in its
            // random.
            let tail: [u8; 8] = server_hello.random.0[24..]
                .try_into()
                .unwrap();
            if tail == DOWNGRADE_SENTINEL_TLS12 || tail == DOWNGRADE_SENTINEL_TLS11 {
                return Err(cx
                    .common
                    .illegal_param("downgrade sentinel in server random"));
            }

            if cx.data.early_data.is_enabled() && cx.common.early_traffic {
                // The client must fail with a dedicated error code if the server
                // responds with TLS 1.2 when offering 0-RTT.
                return Err(Error::PeerMisbehavedError(
                    "server chose v1.2 when offering 0-rtt".to_string(),
                ));
            }

            if self.config.supports_version(TLSv1_2) {
                // A legitimate TLS 1.2 peer: this connection now
                // belongs to the caller's TLS 1.2 machinery.
                cx.common.negotiated_version = Some(TLSv1_2);
                return Err(Error::Tls12Negotiated);
            }

            cx.common
                .send_fatal_alert(AlertDescription::ProtocolVersion);
            return Err(Error::PeerIncompatibleError(
                "server only supports TLS versions below our minimum".to_string(),
            ));
        }

        if server_hello.compression_method != Compression::Null {
            return Err(cx
                .common
                .illegal_param("server chose non-Null compression"));
        }

        if server_hello.has_duplicate_extension() {
            cx.common
                .send_fatal_alert(AlertDescription::DecodeError);
            return Err(Error::PeerMisbehavedError(
                "server sent duplicate extensions".to_string(),
            ));
        }

        if self
            .hello
            .server_sent_unsolicited_extensions(&server_hello.extensions, &[])
        {
            cx.common
                .send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerMisbehavedError(
                "server sent unsolicited extension".to_string(),
            ));
        }

        if server_hello.session_id != self.session_id {
            return Err(cx
                .common
                .illegal_param("server did not echo legacy_session_id"));
        }

        cx.common.negotiated_version = Some(TLSv1_3);

        let suite = self
            .config
            .find_cipher_suite(server_hello.cipher_suite)
            .ok_or_else(|| {
                cx.common
                    .send_fatal_alert(AlertDescription::HandshakeFailure);
                Error::PeerMisbehavedError("server chose non-offered ciphersuite".to_string())
            })?;

        match self.suite {
            Some(prev_suite) if prev_suite != suite => {
                return Err(cx
                    .common
                    .illegal_param("server varied selected ciphersuite"));
            }
            _ => {
                debug!("Using ciphersuite {:?}", suite);
                self.suite = Some(suite);
                cx.common.suite = Some(suite);
            }
        }

        // Start our handshake hash, and input the hellos.
        let mut transcript = self
            .transcript_buffer
            .start_hash(suite.get_hash());
        transcript.add_message(&m);

        tls13::handle_server_hello(
            self.config,
            cx,
            server_hello,
            self.resuming_session,
            self.server_name,
            self.random,
            suite,
            transcript,
            self.early_key_schedule,
            self.hello,
            self.offered_key_share,
            self.sent_tls13_fake_ccs,
        )
    }
}

impl ExpectServerHelloOrHelloRetryRequest {
    fn into_expect_server_hello(self) -> NextState {
        Box::new(self.next)
    }

    fn handle_hello_retry_request(
        self,
        cx: &mut ClientContext<'_>,
        m: Message,
    ) -> NextStateOrError {
        let hrr = require_handshake_msg!(
            m,
            HandshakeType::HelloRetryRequest,
            HandshakePayload::HelloRetryRequest
        )?;
        trace!("Got HRR {:?}", hrr);

        let cookie = hrr.get_cookie();
        let req_group = hrr.get_requested_key_share_group();

        let offered_key_share = self.next.offered_key_share;

        // A retry request is illegal if it contains no cookie and asks for
        // retry of a group we already sent.
        if cookie.is_none() && req_group == Some(offered_key_share.group()) {
            return Err(cx
                .common
                .illegal_param("server requested hrr with our group"));
        }

        // Or has an empty cookie.
        if let Some(cookie) = cookie {
            if cookie.0.is_empty() {
                return Err(cx
                    .common
                    .illegal_param("server requested hrr with empty cookie"));
            }
        }

        // Or has something unrecognised
        if hrr.has_unknown_extension() {
            cx.common
                .send_fatal_alert(AlertDescription::UnsupportedExtension);
            return Err(Error::PeerIncompatibleError(
                "server sent hrr with unhandled extension".to_string(),
            ));
        }

        // Or has the same extensions more than once
        if hrr.has_duplicate_extension() {
            return Err(cx
                .common
                .illegal_param("server send duplicate hrr extensions"));
        }

        // Or asks us to change nothing.
        if cookie.is_none() && req_group.is_none() {
            return Err(cx
                .common
                .illegal_param("server requested hrr with no changes"));
        }

        // Or asks us to talk a protocol we didn't offer, or doesn't support HRR at all.
        match hrr.get_supported_versions() {
            Some(ProtocolVersion::TLSv1_3) => {
                cx.common.negotiated_version = Some(ProtocolVersion::TLSv1_3);
            }
            _ => {
                return Err(cx
                    .common
                    .illegal_param("server requested unsupported version in hrr"));
            }
        }

        // Or asks us to use a ciphersuite we didn't offer.
        let cs = match self
            .next
            .config
            .find_cipher_suite(hrr.cipher_suite)
        {
            Some(cs) => cs,
            None => {
                return Err(cx
                    .common
                    .illegal_param("server requested unsupported cs in hrr"));
            }
        };

        // HRR selects the ciphersuite.
        cx.common.suite = Some(cs);

        // The transcript restarts from the synthetic message_hash
        // message, then the HRR itself.
        let transcript = self
            .next
            .transcript_buffer
            .start_hash(cs.get_hash());
        let mut transcript_buffer = transcript.into_hrr_buffer();
        transcript_buffer.add_message(&m);

        // Early data is not allowed after HelloRetryRequest
        if cx.data.early_data.is_enabled() {
            cx.data.early_data.rejected();
            cx.common.early_traffic = false;
        }

        let key_share = match req_group {
            Some(group) if group != offered_key_share.group() => {
                let group = kx::KeyExchange::choose(group, &self.next.config.kx_groups)
                    .ok_or_else(|| {
                        cx.common
                            .illegal_param("server requested hrr with bad group")
                    })?;
                kx::KeyExchange::start(group).ok_or(Error::FailedToGetRandomBytes)?
            }
            _ => offered_key_share,
        };

        emit_client_hello_for_retry(
            self.next.config,
            cx,
            self.next.resuming_session,
            self.next.random,
            transcript_buffer,
            self.next.sent_tls13_fake_ccs,
            self.next.hello,
            self.next.session_id,
            Some(hrr),
            self.next.server_name,
            key_share,
            Some(cs),
        )
    }
}

impl State for ExpectServerHelloOrHelloRetryRequest {
    fn handle(self: Box<Self>, cx: &mut ClientContext<'_>, m: Message) -> NextStateOrError {
        check_message(
            &m,
            &[ContentType::Handshake],
            &[HandshakeType::ServerHello, HandshakeType::HelloRetryRequest],
        )?;
        if m.is_handshake_type(HandshakeType::ServerHello) {
            self.into_expect_server_hello()
                .handle(cx, m)
        } else {
            self.handle_hello_retry_request(cx, m)
        }
    }
}

pub(super) fn send_cert_error_alert(common: &mut CommonState, err: Error) -> Error {
    match &err {
        Error::WebPkiError(WebPkiError::BadEncoding, _) => {
            common.send_fatal_alert(AlertDescription::DecodeError);
        }
        Error::WebPkiError(WebPkiError::UnknownIssuer, _) => {
            common.send_fatal_alert(AlertDescription::UnknownCA);
        }
        Error::WebPkiError(WebPkiError::CertExpired, _) => {
            common.send_fatal_alert(AlertDescription::CertificateExpired);
        }
        Error::PeerMisbehavedError(_) => {
            common.send_fatal_alert(AlertDescription::IllegalParameter);
        }
        _ => {
            common.send_fatal_alert(AlertDescription::BadCertificate);
        }
    };

    err
}
