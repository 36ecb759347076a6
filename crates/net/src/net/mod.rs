pub mod address;
pub mod codec;
pub mod cp437;
pub mod extensions;
pub mod map_transfer;
pub mod packet;
pub mod protocol;
pub mod saved;
pub mod stats;
pub mod transport;

pub use address::ServerAddress;
pub use codec::{PacketReader, PacketWriter, decode_string, encode_string};
pub use extensions::{ClientIdentity, EXTENSION_PLAYER_LIMIT, ExtensionNegotiator};
pub use map_transfer::{
    InflateMapLoader, MapData, MapDecoder, MapTransferMonitor, format_transfer,
};
pub use packet::{
    BlockActionKind, ChatKind, ClientFeatureFlags, ClientPacket, CreatePlayer, CtfState,
    ExistingPlayer, GameModeKind, GameModeState, HitKind, HurtKind, IntelLocation, KillKind,
    PlayerInput, ServerPacket, StateData, TerritoryState, Tool, VersionProperty, Weapon,
    WeaponInput, WorldUpdateEntry,
};
pub use protocol::{
    DEFAULT_PORT, MAX_PLAYER_SLOTS, ProtocolVersion, SPECTATOR_REPLAY_ID, SPECTATOR_TEAM,
    WireFormat, disconnect_reason, tag,
};
pub use saved::SavedPacketQueue;
pub use stats::{BandwidthMonitor, NetworkStats};
pub use transport::{Reliability, Transport, TransportEvent, UdpTransport};
