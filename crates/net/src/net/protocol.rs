use std::fmt;

use crate::error::{NetError, NetResult};

pub const DEFAULT_PORT: u16 = 32887;

/// Utf-8 escape; a string whose first byte is this is UTF-8, otherwise CP437.
pub const UTF8_SENTINEL: u8 = 0xFF;

/// Player id the recorder writes into the state packet so a replay joins as an observer.
pub const SPECTATOR_REPLAY_ID: u8 = 33;
pub const SPECTATOR_TEAM: u8 = 255;

pub const TEAM_NAME_LEN: usize = 10;
pub const PLAYER_NAME_LEN: usize = 16;
pub const MAX_PLAYER_SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    #[default]
    V075,
    V076,
}

impl ProtocolVersion {
    pub fn wire_value(self) -> u8 {
        match self {
            Self::V075 => 3,
            Self::V076 => 4,
        }
    }

    pub fn from_wire(value: u8) -> NetResult<Self> {
        match value {
            3 => Ok(Self::V075),
            4 => Ok(Self::V076),
            other => Err(NetError::violation(format!(
                "unsupported protocol version {other}"
            ))),
        }
    }

    pub fn world_update_entry_len(self) -> usize {
        match self {
            Self::V075 => 24,
            Self::V076 => 25,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V075 => f.write_str("0.75"),
            Self::V076 => f.write_str("0.76"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormat {
    pub protocol: ProtocolVersion,
    pub unicode: bool,
}

impl WireFormat {
    pub fn new(protocol: ProtocolVersion) -> Self {
        Self {
            protocol,
            unicode: true,
        }
    }
}

impl Default for WireFormat {
    fn default() -> Self {
        Self::new(ProtocolVersion::default())
    }
}

/// Type tags. A few numbers mean different things depending on direction.
pub mod tag {
    pub const POSITION_DATA: u8 = 0;
    pub const ORIENTATION_DATA: u8 = 1;
    pub const WORLD_UPDATE: u8 = 2;
    pub const INPUT_DATA: u8 = 3;
    pub const WEAPON_INPUT: u8 = 4;
    /// Client to server.
    pub const HIT: u8 = 5;
    /// Server to client.
    pub const SET_HP: u8 = 5;
    pub const GRENADE: u8 = 6;
    pub const SET_TOOL: u8 = 7;
    pub const SET_COLOUR: u8 = 8;
    pub const EXISTING_PLAYER: u8 = 9;
    pub const SHORT_PLAYER_DATA: u8 = 10;
    pub const MOVE_OBJECT: u8 = 11;
    pub const CREATE_PLAYER: u8 = 12;
    pub const BLOCK_ACTION: u8 = 13;
    pub const BLOCK_LINE: u8 = 14;
    pub const STATE_DATA: u8 = 15;
    pub const KILL_ACTION: u8 = 16;
    pub const CHAT_MESSAGE: u8 = 17;
    pub const MAP_START: u8 = 18;
    pub const MAP_CHUNK: u8 = 19;
    pub const PLAYER_LEFT: u8 = 20;
    pub const TERRITORY_CAPTURE: u8 = 21;
    pub const PROGRESS_BAR: u8 = 22;
    pub const INTEL_CAPTURE: u8 = 23;
    pub const INTEL_PICKUP: u8 = 24;
    pub const INTEL_DROP: u8 = 25;
    pub const RESTOCK: u8 = 26;
    pub const FOG_COLOUR: u8 = 27;
    pub const WEAPON_RELOAD: u8 = 28;
    pub const CHANGE_TEAM: u8 = 29;
    pub const CHANGE_WEAPON: u8 = 30;
    /// Client to server.
    pub const MAP_CACHED: u8 = 31;
    /// Server to client.
    pub const HANDSHAKE_INIT: u8 = 31;
    pub const HANDSHAKE_RETURN: u8 = 32;
    pub const VERSION_GET: u8 = 33;
    pub const VERSION_SEND: u8 = 34;
    pub const EXTENSION_INFO: u8 = 60;
}

pub fn disconnect_reason(code: u32) -> &'static str {
    match code {
        1 => "You are banned from this server.",
        2 => "You have too many connections to this server.",
        3 => "Incompatible client protocol version.",
        4 => "Server full",
        10 => "You were kicked from this server.",
        _ => "Unknown Reason",
    }
}
