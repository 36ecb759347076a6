#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use glam::{U8Vec3, Vec3};

use spadenet::net::{
    ChatKind, CreatePlayer, ExistingPlayer, GameModeKind, GameModeState, Reliability, StateData,
    WireFormat, WorldUpdateEntry,
};
use spadenet::{
    FollowTarget, GameSession, MapData, NetClient, NetError, NetResult, ProtocolVersion,
    ServerAddress, ServerPacket, SessionConfig, Transport, TransportEvent,
};

#[derive(Default)]
pub struct Wire {
    pub incoming: VecDeque<TransportEvent>,
    pub sent: Vec<Vec<u8>>,
    pub disconnect_requested: Option<u32>,
    pub resets: u32,
}

/// Test side of a `FakeTransport`: queue server traffic and inspect what the client sent.
#[derive(Clone, Default)]
pub struct WireHandle(Rc<RefCell<Wire>>);

impl WireHandle {
    pub fn transport(&self) -> FakeTransport {
        FakeTransport {
            wire: self.0.clone(),
        }
    }

    pub fn push(&self, packet: Vec<u8>) {
        self.0
            .borrow_mut()
            .incoming
            .push_back(TransportEvent::Received(packet));
    }

    pub fn push_event(&self, event: TransportEvent) {
        self.0.borrow_mut().incoming.push_back(event);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.0.borrow().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }

    pub fn disconnect_requested(&self) -> Option<u32> {
        self.0.borrow().disconnect_requested
    }

    pub fn resets(&self) -> u32 {
        self.0.borrow().resets
    }
}

pub struct FakeTransport {
    wire: Rc<RefCell<Wire>>,
}

impl Transport for FakeTransport {
    fn connect(&mut self, _address: &ServerAddress) -> io::Result<()> {
        self.wire
            .borrow_mut()
            .incoming
            .push_back(TransportEvent::Connected);
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> io::Result<Vec<TransportEvent>> {
        Ok(self.wire.borrow_mut().incoming.drain(..).collect())
    }

    fn send(&mut self, data: &[u8], _reliability: Reliability) -> io::Result<()> {
        self.wire.borrow_mut().sent.push(data.to_vec());
        Ok(())
    }

    fn disconnect(&mut self, code: u32) {
        let mut wire = self.wire.borrow_mut();
        wire.disconnect_requested = Some(code);
        wire.incoming.push_back(TransportEvent::Disconnected(code));
    }

    fn reset(&mut self) {
        let mut wire = self.wire.borrow_mut();
        wire.resets += 1;
        wire.incoming.clear();
    }

    fn round_trip_time_ms(&self) -> Option<u32> {
        Some(42)
    }

    fn bytes_sent_total(&self) -> u64 {
        self.wire.borrow().sent.iter().map(|p| p.len() as u64).sum()
    }

    fn bytes_received_total(&self) -> u64 {
        0
    }
}

/// Game session that keeps just enough state for the client's read-backs and logs events.
#[derive(Default)]
pub struct RecordingGame {
    pub world: Option<MapData>,
    pub players: BTreeSet<u8>,
    pub local: Option<u8>,
    pub mode: Option<GameModeKind>,
    pub events: Vec<String>,
    pub world_updates: Vec<Vec<WorldUpdateEntry>>,
    pub follow: Option<FollowTarget>,
}

impl GameSession for RecordingGame {
    fn create_world(&mut self, map: MapData) -> NetResult<()> {
        self.world = Some(map);
        self.events.push("create_world".into());
        Ok(())
    }

    fn destroy_world(&mut self) {
        self.world = None;
        self.players.clear();
        self.events.push("destroy_world".into());
    }

    fn has_world(&self) -> bool {
        self.world.is_some()
    }

    fn player_exists(&self, player_id: u8) -> bool {
        self.players.contains(&player_id)
    }

    fn local_player_id(&self) -> Option<u8> {
        self.local
    }

    fn game_mode(&self) -> Option<GameModeKind> {
        self.mode
    }

    fn follow_target(&self) -> Option<FollowTarget> {
        self.follow
    }

    fn restore_follow(&mut self, target: FollowTarget) {
        self.events.push(format!("restore_follow {}", target.player_id));
    }

    fn world_update(&mut self, entries: &[WorldUpdateEntry]) {
        self.events.push(format!("world_update {}", entries.len()));
        self.world_updates.push(entries.to_vec());
    }

    fn set_local_position(&mut self, position: Vec3) {
        self.events.push(format!("local_position {position}"));
    }

    fn existing_player(&mut self, player: &ExistingPlayer, _last_position: Vec3) {
        self.players.insert(player.player_id);
        self.events
            .push(format!("existing_player {} {}", player.player_id, player.name));
    }

    fn create_player(&mut self, player: &CreatePlayer) {
        self.players.insert(player.player_id);
        self.events.push(format!(
            "create_player {} z={}",
            player.player_id, player.position.z
        ));
    }

    fn local_player_created(&mut self) {
        self.events.push("local_player_created".into());
    }

    fn player_spawned(&mut self, player_id: u8) {
        self.events.push(format!("player_spawned {player_id}"));
    }

    fn apply_state(&mut self, state: &StateData) {
        self.local = Some(state.player_id);
        self.mode = Some(state.mode.kind());
        self.events.push(format!("apply_state {}", state.player_id));
    }

    fn joined_game(&mut self) {
        self.events.push("joined_game".into());
    }

    fn chat_message(&mut self, sender: Option<u8>, kind: ChatKind, text: &str) {
        self.events
            .push(format!("chat {:?} {:?} {}", sender, kind, text));
    }
}

#[derive(Clone, Default)]
pub struct SharedBuffer(pub Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn encode(packet: ServerPacket, protocol: ProtocolVersion) -> Vec<u8> {
    packet.encode(WireFormat::new(protocol))
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn map_chunk(data: &[u8]) -> Vec<u8> {
    let mut packet = vec![spadenet::net::tag::MAP_CHUNK];
    packet.extend_from_slice(data);
    packet
}

pub fn state_data(player_id: u8) -> ServerPacket {
    ServerPacket::StateData(StateData {
        player_id,
        fog_color: U8Vec3::new(128, 232, 255),
        team_colors: [U8Vec3::new(0, 0, 255), U8Vec3::new(0, 255, 0)],
        team_names: ["Blue".to_string(), "Green".to_string()],
        mode: GameModeState::Tc(Vec::new()),
    })
}

pub fn world_update(position: Vec3) -> ServerPacket {
    ServerPacket::WorldUpdate(vec![WorldUpdateEntry {
        player_id: 0,
        position,
        orientation: Vec3::X,
    }])
}

pub fn address(protocol: ProtocolVersion) -> ServerAddress {
    ServerAddress::new("127.0.0.1", 32887, protocol)
}

/// A client whose transport has reported the connection.
pub fn connected_client(protocol: ProtocolVersion) -> (NetClient<RecordingGame>, WireHandle) {
    let wire = WireHandle::default();
    let mut client = NetClient::new(SessionConfig::default(), RecordingGame::default());
    client
        .connect_with(&address(protocol), Box::new(wire.transport()), 0.0)
        .unwrap();
    client.poll(0.0).unwrap();
    (client, wire)
}

/// A client that finished the map transfer and knows it is player `local_id`.
pub fn joined_client(
    protocol: ProtocolVersion,
    local_id: u8,
) -> (NetClient<RecordingGame>, WireHandle) {
    let (mut client, wire) = connected_client(protocol);
    wire.push(encode(ServerPacket::MapStart { map_size: 64 }, protocol));
    wire.push(map_chunk(&zlib(b"voxels")));
    wire.push(encode(state_data(local_id), protocol));
    client.poll(0.1).unwrap();
    client.game_mut().events.clear();
    (client, wire)
}

pub fn is_truncation(result: &NetResult<()>) -> bool {
    matches!(result, Err(NetError::TruncatedPacket { .. }))
}
