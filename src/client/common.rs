use crate::key;
use crate::msgs::enums::ExtensionType;
use crate::msgs::handshake::{ClientExtension, ServerExtension};
use crate::sign;

#[cfg(feature = "logging")]
use crate::log::debug;

use std::sync::Arc;

/// Accounting for the extensions we sent, so the server's answers can
/// be checked against what was offered.
pub(super) struct ClientHelloDetails {
    pub(super) sent_extensions: Vec<ExtensionType>,
}

impl ClientHelloDetails {
    pub(super) fn new() -> Self {
        Self {
            sent_extensions: Vec::new(),
        }
    }

    pub(super) fn note_sent_extensions(&mut self, extensions: &[ClientExtension]) {
        self.sent_extensions = extensions
            .iter()
            .map(ClientExtension::get_type)
            .collect();
    }

    pub(super) fn server_sent_unsolicited_extensions(
        &self,
        received_exts: &[ServerExtension],
        allowed_unsolicited: &[ExtensionType],
    ) -> bool {
        for ext in received_exts {
            let ext_type = ext.get_type();
            if !self.sent_extensions.contains(&ext_type)
                && !allowed_unsolicited.contains(&ext_type)
            {
                debug!("Unsolicited extension {:?}", ext_type);
                return true;
            }
        }

        false
    }
}

/// The server's certificate chain, as received off the wire, pending
/// verification.
pub(super) struct ServerCertDetails {
    pub(super) cert_chain: Vec<key::Certificate>,
}

impl ServerCertDetails {
    pub(super) fn new(cert_chain: Vec<key::Certificate>) -> Self {
        Self { cert_chain }
    }
}

/// The material we need to answer a CertificateRequest, if we choose
/// to.
pub(super) struct ClientAuthDetails {
    pub(super) certkey: Option<Arc<sign::CertifiedKey>>,
    pub(super) signer: Option<Box<dyn sign::Signer>>,
    pub(super) auth_context: Option<Vec<u8>>,
}

impl ClientAuthDetails {
    pub(super) fn new() -> Self {
        Self {
            certkey: None,
            signer: None,
            auth_context: None,
        }
    }
}
