use std::path::PathBuf;
use std::time::Duration;

use crate::net::extensions::{ClientIdentity, EXTENSION_PLAYER_LIMIT};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long one `poll` may wait for transport events.
    pub poll_timeout: Duration,
    pub disconnect_timeout: Duration,
    pub unicode: bool,
    pub record_demos: bool,
    pub demo_dir: PathBuf,
    /// Name of the spectator that joins during replays.
    pub player_name: String,
    pub client_name: String,
    pub version: (u8, u8, u8),
    pub version_string: String,
    pub locale: String,
    pub extensions: Vec<(u8, u8)>,
}

impl SessionConfig {
    pub fn identity(&self) -> ClientIdentity {
        let (major, minor, revision) = self.version;
        ClientIdentity {
            name: self.client_name.clone(),
            major,
            minor,
            revision,
            version_string: self.version_string.clone(),
            locale: self.locale.clone(),
            unicode: self.unicode,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let identity = ClientIdentity::default();
        Self {
            poll_timeout: Duration::ZERO,
            disconnect_timeout: Duration::from_secs(1),
            unicode: true,
            record_demos: false,
            demo_dir: PathBuf::from("demos"),
            player_name: "Deuce".to_string(),
            client_name: identity.name,
            version: (identity.major, identity.minor, identity.revision),
            version_string: identity.version_string,
            locale: identity.locale,
            extensions: vec![(EXTENSION_PLAYER_LIMIT, 1)],
        }
    }
}
