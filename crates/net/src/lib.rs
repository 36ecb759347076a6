pub mod demo;
pub mod error;
pub mod net;
pub mod session;

pub use demo::{DemoCommand, DemoInfo, DemoPlayer, DemoRecorder, list_demos};
pub use error::{NetError, NetResult};
pub use net::{
    ClientPacket, InflateMapLoader, MapData, MapDecoder, ProtocolVersion, ServerAddress,
    ServerPacket, Transport, TransportEvent, UdpTransport,
};
pub use session::{ConnectionStatus, FollowTarget, GameSession, NetClient, SessionConfig};
