use crate::error::Error;
use crate::keylog::KeyLog;
use crate::msgs::base::PayloadU8;

use ring::hkdf::KeyType as _;
use ring::{digest, hkdf, hmac};

/// Key schedule maintenance for TLS1.3
///
/// The kinds of secret we can extract from `KeySchedule`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SecretKind {
    ResumptionPskBinderKey,
    ExternalPskBinderKey,
    ClientEarlyTrafficSecret,
    EarlyExporterMasterSecret,
    ClientHandshakeTrafficSecret,
    ServerHandshakeTrafficSecret,
    ClientApplicationTrafficSecret,
    ServerApplicationTrafficSecret,
    ExporterMasterSecret,
    ResumptionMasterSecret,
    DerivedSecret,
}

impl SecretKind {
    fn to_bytes(self) -> &'static [u8] {
        use self::SecretKind::*;
        match self {
            ResumptionPskBinderKey => b"res binder",
            ExternalPskBinderKey => b"ext binder",
            ClientEarlyTrafficSecret => b"c e traffic",
            EarlyExporterMasterSecret => b"e exp master",
            ClientHandshakeTrafficSecret => b"c hs traffic",
            ServerHandshakeTrafficSecret => b"s hs traffic",
            ClientApplicationTrafficSecret => b"c ap traffic",
            ServerApplicationTrafficSecret => b"s ap traffic",
            ExporterMasterSecret => b"exp master",
            ResumptionMasterSecret => b"res master",
            DerivedSecret => b"derived",
        }
    }

    fn log_label(self) -> Option<&'static str> {
        use self::SecretKind::*;
        Some(match self {
            ClientEarlyTrafficSecret => "CLIENT_EARLY_TRAFFIC_SECRET",
            ClientHandshakeTrafficSecret => "CLIENT_HANDSHAKE_TRAFFIC_SECRET",
            ServerHandshakeTrafficSecret => "SERVER_HANDSHAKE_TRAFFIC_SECRET",
            ClientApplicationTrafficSecret => "CLIENT_TRAFFIC_SECRET_0",
            ServerApplicationTrafficSecret => "SERVER_TRAFFIC_SECRET_0",
            ExporterMasterSecret => "EXPORTER_SECRET",
            _ => {
                return None;
            }
        })
    }
}

/// This is the TLS1.3 key schedule.  It stores the current secret and
/// the type of hash.  This isn't used directly; but only through the
/// typestates.
struct KeySchedule {
    current: hkdf::Prk,
    algorithm: hkdf::Algorithm,
}

// We express the state of a contained KeySchedule using these
// typestates.  This means we can write code that cannot accidentally
// (e.g.) encrypt application data using a KeySchedule solely constructed
// with an empty or trivial secret, or extract the wrong kind of secrets
// at a given point.

/// KeySchedule for early data stage.
pub(crate) struct KeyScheduleEarly {
    ks: KeySchedule,
}

impl KeyScheduleEarly {
    pub(crate) fn new(algorithm: hkdf::Algorithm, secret: &[u8]) -> Self {
        Self {
            ks: KeySchedule::new(algorithm, secret),
        }
    }

    pub(crate) fn client_early_traffic_secret(
        &self,
        hs_hash: &digest::Digest,
        key_log: &dyn KeyLog,
        client_random: &[u8; 32],
    ) -> hkdf::Prk {
        self.ks.derive_logged_secret(
            SecretKind::ClientEarlyTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        )
    }

    pub(crate) fn early_exporter_master_secret(&self, hs_hash: &digest::Digest) -> hkdf::Prk {
        self.ks
            .derive(self.ks.algorithm, SecretKind::EarlyExporterMasterSecret, hs_hash.as_ref())
    }

    pub(crate) fn resumption_psk_binder_key_and_sign_verify_data(
        &self,
        hs_hash: &digest::Digest,
    ) -> hmac::Tag {
        let resumption_psk_binder_key = self
            .ks
            .derive_for_empty_hash(SecretKind::ResumptionPskBinderKey);
        self.ks
            .sign_verify_data(&resumption_psk_binder_key, hs_hash)
    }

    pub(crate) fn external_psk_binder_key_and_sign_verify_data(
        &self,
        hs_hash: &digest::Digest,
    ) -> hmac::Tag {
        let external_psk_binder_key = self
            .ks
            .derive_for_empty_hash(SecretKind::ExternalPskBinderKey);
        self.ks
            .sign_verify_data(&external_psk_binder_key, hs_hash)
    }

    pub(crate) fn into_handshake(mut self, hs_secret: &[u8]) -> KeyScheduleHandshake {
        self.ks.input_secret(hs_secret);
        KeyScheduleHandshake::new(self.ks)
    }
}

/// KeySchedule for a TLS1.3 handshake that offered no PSK: the early
/// secret is extracted from all-zeroes.
pub(crate) struct KeyScheduleNonSecret {
    ks: KeySchedule,
}

impl KeyScheduleNonSecret {
    pub(crate) fn new(algorithm: hkdf::Algorithm) -> Self {
        Self {
            ks: KeySchedule::with_empty_secret(algorithm),
        }
    }

    pub(crate) fn into_handshake(mut self, hs_secret: &[u8]) -> KeyScheduleHandshake {
        self.ks.input_secret(hs_secret);
        KeyScheduleHandshake::new(self.ks)
    }
}

/// KeySchedule during handshake.
pub(crate) struct KeyScheduleHandshake {
    ks: KeySchedule,
    current_client_traffic_secret: Option<hkdf::Prk>,
    current_server_traffic_secret: Option<hkdf::Prk>,
}

impl KeyScheduleHandshake {
    fn new(ks: KeySchedule) -> Self {
        Self {
            ks,
            current_client_traffic_secret: None,
            current_server_traffic_secret: None,
        }
    }

    pub(crate) fn derive_handshake_secrets(
        mut self,
        hs_hash: &digest::Digest,
        key_log: &dyn KeyLog,
        client_random: &[u8; 32],
    ) -> (Self, hkdf::Prk, hkdf::Prk) {
        let client_secret = self.ks.derive_logged_secret(
            SecretKind::ClientHandshakeTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );
        let server_secret = self.ks.derive_logged_secret(
            SecretKind::ServerHandshakeTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );

        self.current_client_traffic_secret = Some(client_secret.clone());
        self.current_server_traffic_secret = Some(server_secret.clone());

        (self, client_secret, server_secret)
    }

    /// The current client handshake traffic secret, for installing
    /// outbound protection after a deferred switch (early data).
    pub(crate) fn client_key(&self) -> &hkdf::Prk {
        self.current_client_traffic_secret
            .as_ref()
            .unwrap()
    }

    pub(crate) fn sign_server_finish(&self, hs_hash: &digest::Digest) -> hmac::Tag {
        self.ks.sign_finish(
            self.current_server_traffic_secret
                .as_ref()
                .unwrap(),
            hs_hash,
        )
    }

    pub(crate) fn into_traffic_with_client_finished_pending(
        mut self,
        hs_hash: &digest::Digest,
        key_log: &dyn KeyLog,
        client_random: &[u8; 32],
    ) -> (
        KeyScheduleTrafficWithClientFinishedPending,
        hkdf::Prk,
        hkdf::Prk,
    ) {
        self.ks.input_empty();

        let client_secret = self.ks.derive_logged_secret(
            SecretKind::ClientApplicationTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );
        let server_secret = self.ks.derive_logged_secret(
            SecretKind::ServerApplicationTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );
        let exporter_secret = self.ks.derive_logged_secret(
            SecretKind::ExporterMasterSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );

        let traffic = KeyScheduleTraffic {
            ks: self.ks,
            current_client_traffic_secret: client_secret.clone(),
            current_server_traffic_secret: server_secret.clone(),
            current_exporter_secret: exporter_secret,
        };

        let pending = KeyScheduleTrafficWithClientFinishedPending {
            handshake_client_traffic_secret: self
                .current_client_traffic_secret
                .expect("handshake secrets not yet derived"),
            traffic,
        };

        (pending, client_secret, server_secret)
    }
}

/// KeySchedule during traffic stage, retaining the ability to
/// calculate the client's finished verify_data.  The traffic stage
/// key schedule can be extracted from it through signing the
/// client finished hash.
pub(crate) struct KeyScheduleTrafficWithClientFinishedPending {
    handshake_client_traffic_secret: hkdf::Prk,
    traffic: KeyScheduleTraffic,
}

impl KeyScheduleTrafficWithClientFinishedPending {
    pub(crate) fn sign_client_finish(
        self,
        hs_hash: &digest::Digest,
    ) -> (KeyScheduleTraffic, hmac::Tag) {
        let tag = self
            .traffic
            .ks
            .sign_finish(&self.handshake_client_traffic_secret, hs_hash);
        (self.traffic, tag)
    }
}

/// KeySchedule during traffic stage.  All traffic and exporter keys
/// are guaranteed to be derivable.
pub(crate) struct KeyScheduleTraffic {
    ks: KeySchedule,
    current_client_traffic_secret: hkdf::Prk,
    current_server_traffic_secret: hkdf::Prk,
    current_exporter_secret: hkdf::Prk,
}

impl KeyScheduleTraffic {
    pub(crate) fn resumption_master_secret_and_derive_ticket_psk(
        &self,
        hs_hash: &digest::Digest,
        nonce: &[u8],
    ) -> Vec<u8> {
        let resumption_master_secret = self.ks.derive(
            self.ks.algorithm,
            SecretKind::ResumptionMasterSecret,
            hs_hash.as_ref(),
        );
        self.ks
            .derive_ticket_psk(&resumption_master_secret, nonce)
    }

    pub(crate) fn next_server_application_traffic_secret(&mut self) -> hkdf::Prk {
        let secret = self
            .ks
            .derive_next(&self.current_server_traffic_secret);
        self.current_server_traffic_secret = secret.clone();
        secret
    }

    pub(crate) fn next_client_application_traffic_secret(&mut self) -> hkdf::Prk {
        let secret = self
            .ks
            .derive_next(&self.current_client_traffic_secret);
        self.current_client_traffic_secret = secret.clone();
        secret
    }

    pub(crate) fn export_keying_material(
        &self,
        out: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        export_keying_material(
            &self.current_exporter_secret,
            self.ks.algorithm,
            out,
            label,
            context,
        )
    }
}

impl KeySchedule {
    fn new(algorithm: hkdf::Algorithm, secret: &[u8]) -> Self {
        let zeroes = [0u8; digest::MAX_OUTPUT_LEN];
        let salt = hkdf::Salt::new(algorithm, &zeroes[..algorithm.len()]);
        Self {
            current: salt.extract(secret),
            algorithm,
        }
    }

    fn with_empty_secret(algorithm: hkdf::Algorithm) -> Self {
        let zeroes = [0u8; digest::MAX_OUTPUT_LEN];
        Self::new(algorithm, &zeroes[..algorithm.len()])
    }

    /// Input the given secret, extracting the next `current` from
    /// `Derive-Secret(., "derived", "")` of the old one.
    fn input_secret(&mut self, secret: &[u8]) {
        let salt: hkdf::Salt = self.derive_for_empty_hash(SecretKind::DerivedSecret);
        self.current = salt.extract(secret);
    }

    /// Input the empty secret.
    fn input_empty(&mut self) {
        let zeroes = [0u8; digest::MAX_OUTPUT_LEN];
        self.input_secret(&zeroes[..self.algorithm.len()]);
    }

    /// Derive a secret of length the algorithm's hash length, for the
    /// given label and transcript hash.
    fn derive<T, L>(&self, key_type: L, kind: SecretKind, hs_hash: &[u8]) -> T
    where
        T: for<'a> From<hkdf::Okm<'a, L>>,
        L: hkdf::KeyType,
    {
        hkdf_expand(&self.current, key_type, kind.to_bytes(), hs_hash)
    }

    fn derive_logged_secret(
        &self,
        kind: SecretKind,
        hs_hash: &[u8],
        key_log: &dyn KeyLog,
        client_random: &[u8; 32],
    ) -> hkdf::Prk {
        if let Some(log_label) = kind.log_label() {
            if key_log.will_log(log_label) {
                let secret = self
                    .derive::<PayloadU8, _>(PayloadU8Len(self.algorithm.len()), kind, hs_hash);
                key_log.log(log_label, client_random, &secret.0);
            }
        }
        self.derive(self.algorithm, kind, hs_hash)
    }

    /// Derive a secret of length the algorithm's hash length, given
    /// the hash of the empty string as transcript.
    fn derive_for_empty_hash<T>(&self, kind: SecretKind) -> T
    where
        T: for<'a> From<hkdf::Okm<'a, hkdf::Algorithm>>,
    {
        let digest_alg = self
            .algorithm
            .hmac_algorithm()
            .digest_algorithm();
        let empty_hash = digest::digest(digest_alg, &[]);
        self.derive(self.algorithm, kind, empty_hash.as_ref())
    }

    /// Sign the finished message consisting of `hs_hash` using a
    /// current traffic secret.
    fn sign_finish(&self, base_key: &hkdf::Prk, hs_hash: &digest::Digest) -> hmac::Tag {
        self.sign_verify_data(base_key, hs_hash)
    }

    /// Sign the finished message consisting of `hs_hash` using the
    /// key derived by label `base_key`.
    fn sign_verify_data(&self, base_key: &hkdf::Prk, hs_hash: &digest::Digest) -> hmac::Tag {
        let hmac_alg = self.algorithm.hmac_algorithm();
        let hmac_key = hkdf_expand(base_key, hmac_alg, b"finished", &[]);
        hmac::sign(&hmac_key, hs_hash.as_ref())
    }

    /// Derive the next application traffic secret of the same length,
    /// returning it.
    fn derive_next(&self, base_key: &hkdf::Prk) -> hkdf::Prk {
        hkdf_expand(base_key, self.algorithm, b"traffic upd", &[])
    }

    /// Derive the PSK to use given a resumption_master_secret and
    /// ticket_nonce.
    fn derive_ticket_psk(&self, rms: &hkdf::Prk, nonce: &[u8]) -> Vec<u8> {
        let payload: PayloadU8 = hkdf_expand(
            rms,
            PayloadU8Len(self.algorithm.len()),
            b"resumption",
            nonce,
        );
        payload.0
    }
}

pub(crate) fn hkdf_expand<T, L>(secret: &hkdf::Prk, key_type: L, label: &[u8], context: &[u8]) -> T
where
    T: for<'a> From<hkdf::Okm<'a, L>>,
    L: hkdf::KeyType,
{
    hkdf_expand_info(secret, key_type, label, context, |okm| okm.into())
}

fn hkdf_expand_info<F, T, L>(
    secret: &hkdf::Prk,
    key_type: L,
    label: &[u8],
    context: &[u8],
    f: F,
) -> T
where
    F: for<'b> FnOnce(hkdf::Okm<'b, L>) -> T,
    L: hkdf::KeyType,
{
    const LABEL_PREFIX: &[u8] = b"tls13 ";

    let output_len = u16::to_be_bytes(key_type.len() as u16);
    let label_len = u8::to_be_bytes((LABEL_PREFIX.len() + label.len()) as u8);
    let context_len = u8::to_be_bytes(context.len() as u8);

    let info = &[
        &output_len[..],
        &label_len[..],
        LABEL_PREFIX,
        label,
        &context_len[..],
        context,
    ];
    let okm = secret.expand(info, key_type).unwrap();

    f(okm)
}

pub(crate) struct PayloadU8Len(pub(crate) usize);
impl hkdf::KeyType for PayloadU8Len {
    fn len(&self) -> usize {
        self.0
    }
}

impl From<hkdf::Okm<'_, PayloadU8Len>> for PayloadU8 {
    fn from(okm: hkdf::Okm<PayloadU8Len>) -> Self {
        let mut r = vec![0u8; okm.len().0];
        okm.fill(&mut r[..]).unwrap();
        Self::new(r)
    }
}

pub(crate) fn export_keying_material(
    secret: &hkdf::Prk,
    algorithm: hkdf::Algorithm,
    out: &mut [u8],
    label: &[u8],
    context: Option<&[u8]>,
) -> Result<(), Error> {
    let digest_alg = algorithm
        .hmac_algorithm()
        .digest_algorithm();
    let h_empty = digest::digest(digest_alg, &[]);

    let secret: hkdf::Prk = hkdf_expand(secret, algorithm, label, h_empty.as_ref());

    let h_context = digest::digest(digest_alg, context.unwrap_or(&[]));

    // The "exporter" label is fixed by RFC 8446 section 7.5.  Unlike
    // the internal derivations, the caller controls the output length
    // here, so expansion failures are surfaced rather than unwrapped.
    const LABEL_PREFIX: &[u8] = b"tls13 ";
    const LABEL: &[u8] = b"exporter";

    let output_len = u16::to_be_bytes(out.len() as u16);
    let label_len = u8::to_be_bytes((LABEL_PREFIX.len() + LABEL.len()) as u8);
    let context_len = u8::to_be_bytes(h_context.as_ref().len() as u8);

    let info = &[
        &output_len[..],
        &label_len[..],
        LABEL_PREFIX,
        LABEL,
        &context_len[..],
        h_context.as_ref(),
    ];

    secret
        .expand(info, PayloadU8Len(out.len()))
        .and_then(|okm| okm.fill(out))
        .map_err(|_| Error::General("exporting too much".to_string()))
}
