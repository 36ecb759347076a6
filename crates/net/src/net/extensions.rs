use std::collections::BTreeMap;

use super::packet::{ClientFeatureFlags, ClientPacket, VersionProperty};

pub const EXTENSION_PLAYER_LIMIT: u8 = 0xC0;

/// Identity reported in version replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
    /// Free-form string for the simple reply.
    pub version_string: String,
    pub locale: String,
    pub unicode: bool,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "spadenet".to_string(),
            major: 0,
            minor: 1,
            revision: 0,
            version_string: format!("spadenet {}", env!("CARGO_PKG_VERSION")),
            locale: "en_US".to_string(),
            unicode: true,
        }
    }
}

pub struct ExtensionNegotiator {
    implemented: BTreeMap<u8, u8>,
    negotiated: BTreeMap<u8, u8>,
    identity: ClientIdentity,
}

impl ExtensionNegotiator {
    pub fn new(identity: ClientIdentity) -> Self {
        Self::with_extensions(identity, [(EXTENSION_PLAYER_LIMIT, 1)])
    }

    pub fn with_extensions(
        identity: ClientIdentity,
        implemented: impl IntoIterator<Item = (u8, u8)>,
    ) -> Self {
        Self {
            implemented: implemented.into_iter().collect(),
            negotiated: BTreeMap::new(),
            identity,
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn is_negotiated(&self, id: u8) -> bool {
        self.negotiated.contains_key(&id)
    }

    pub fn negotiated(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.negotiated.iter().map(|(&id, &version)| (id, version))
    }

    /// Forgets the previous server's extensions.
    pub fn reset(&mut self) {
        self.negotiated.clear();
    }

    /// Records the extensions both sides know and builds the reply listing them.
    pub fn handle_extension_info(&mut self, offered: &[(u8, u8)]) -> ClientPacket {
        for &(id, server_version) in offered {
            match self.implemented.get(&id) {
                Some(&version) => {
                    log::info!(
                        "Server offers extension 0x{id:02x} v{server_version}, using v{version}"
                    );
                    self.negotiated.insert(id, version);
                }
                None => {
                    log::info!("Client does not support extension 0x{id:02x}");
                }
            }
        }
        ClientPacket::ExtensionInfo(self.negotiated().collect())
    }

    /// Simple reply when no property ids are requested, the enhanced one otherwise.
    pub fn version_reply(&self, property_ids: &[u8]) -> ClientPacket {
        let identity = &self.identity;
        if property_ids.is_empty() {
            return ClientPacket::VersionSend {
                major: identity.major,
                minor: identity.minor,
                revision: identity.revision,
                version: identity.version_string.clone(),
            };
        }

        // duplicates collapse and ids go out in ascending order
        let mut ids = property_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let properties = ids
            .into_iter()
            .map(|id| match id {
                0 => VersionProperty::ApplicationNameAndVersion {
                    major: identity.major,
                    minor: identity.minor,
                    revision: identity.revision,
                    name: identity.name.clone(),
                },
                1 => VersionProperty::UserLocale(identity.locale.clone()),
                2 => {
                    let mut flags = ClientFeatureFlags::empty();
                    if identity.unicode {
                        flags |= ClientFeatureFlags::SUPPORTS_UNICODE;
                    }
                    VersionProperty::FeatureFlags(flags)
                }
                other => VersionProperty::Unrecognized(other),
            })
            .collect();
        ClientPacket::VersionEnhanced(properties)
    }
}

impl Default for ExtensionNegotiator {
    fn default() -> Self {
        Self::new(ClientIdentity::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extensions_are_ignored() {
        let mut negotiator = ExtensionNegotiator::default();
        let reply = negotiator.handle_extension_info(&[(0x10, 1), (EXTENSION_PLAYER_LIMIT, 1)]);

        assert_eq!(
            reply,
            ClientPacket::ExtensionInfo(vec![(EXTENSION_PLAYER_LIMIT, 1)])
        );
        assert!(negotiator.is_negotiated(EXTENSION_PLAYER_LIMIT));
        assert!(!negotiator.is_negotiated(0x10));

        negotiator.reset();
        assert_eq!(negotiator.negotiated().count(), 0);
    }

    #[test]
    fn empty_offer_replies_with_empty_list() {
        let mut negotiator = ExtensionNegotiator::default();
        assert_eq!(
            negotiator.handle_extension_info(&[]),
            ClientPacket::ExtensionInfo(Vec::new())
        );
    }

    #[test]
    fn simple_version_reply() {
        let negotiator = ExtensionNegotiator::default();
        match negotiator.version_reply(&[]) {
            ClientPacket::VersionSend { version, .. } => assert!(version.starts_with("spadenet")),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn enhanced_version_reply_covers_every_id() {
        let identity = ClientIdentity {
            unicode: false,
            ..ClientIdentity::default()
        };
        let negotiator = ExtensionNegotiator::new(identity);

        let ClientPacket::VersionEnhanced(properties) = negotiator.version_reply(&[2, 9, 1, 2])
        else {
            panic!("expected enhanced reply");
        };
        assert_eq!(
            properties,
            vec![
                VersionProperty::UserLocale("en_US".into()),
                VersionProperty::FeatureFlags(ClientFeatureFlags::empty()),
                VersionProperty::Unrecognized(9),
            ]
        );
    }
}
