use std::io::Write;
use std::mem;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use glam::{IVec3, U8Vec3, Vec3};

use super::config::SessionConfig;
use super::game::{FollowTarget, GameSession};
use crate::demo::{DemoCommand, DemoPlayer, DemoRecorder};
use crate::error::{NetError, NetResult};
use crate::net::address::ServerAddress;
use crate::net::codec::PacketReader;
use crate::net::extensions::ExtensionNegotiator;
use crate::net::map_transfer::{InflateMapLoader, MapDecoder, MapTransferMonitor};
use crate::net::packet::{
    BlockActionKind, ChatKind, ClientPacket, CreatePlayer, ExistingPlayer, GameModeKind, HitKind,
    PlayerInput, ServerPacket, StateData, Tool, Weapon, WeaponInput, WorldUpdateEntry,
};
use crate::net::protocol::{
    MAX_PLAYER_SLOTS, PLAYER_NAME_LEN, ProtocolVersion, SPECTATOR_REPLAY_ID, SPECTATOR_TEAM,
    WireFormat, disconnect_reason, tag,
};
use crate::net::saved::SavedPacketQueue;
use crate::net::stats::{BandwidthMonitor, NetworkStats};
use crate::net::transport::{Reliability, Transport, TransportEvent, UdpTransport};

const MAX_ORIENTATION_LENGTH: f32 = 40.0;
const DISCONNECT_POLL_STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    ReceivingMap,
    Connected,
}

enum PacketSource {
    Idle,
    Live(Box<dyn Transport>),
    Replay(DemoPlayer),
}

type DecoderFactory = Box<dyn Fn() -> Box<dyn MapDecoder>>;

/// Last known transform and team per player slot, kept across world rebuilds.
struct PlayerRoster {
    positions: [Vec3; MAX_PLAYER_SLOTS],
    fronts: [Vec3; MAX_PLAYER_SLOTS],
    teams: [Option<u8>; MAX_PLAYER_SLOTS],
}

impl PlayerRoster {
    fn new() -> Self {
        Self {
            positions: [Vec3::ZERO; MAX_PLAYER_SLOTS],
            fronts: [Vec3::ZERO; MAX_PLAYER_SLOTS],
            teams: [None; MAX_PLAYER_SLOTS],
        }
    }
}

/// Client side of one server session, live or replayed from a demo.
///
/// The session owns its `GameSession` and feeds it decoded events. Everything runs on the
/// caller's thread: `poll` must be called once per frame with the current time in seconds.
pub struct NetClient<G: GameSession> {
    game: G,
    config: SessionConfig,
    protocol: ProtocolVersion,
    status: ConnectionStatus,
    status_text: String,
    source: PacketSource,
    decoder_factory: DecoderFactory,
    map_decoder: Option<Box<dyn MapDecoder>>,
    monitor: Option<MapTransferMonitor>,
    saved: SavedPacketQueue,
    extensions: ExtensionNegotiator,
    recorder: Option<DemoRecorder<Box<dyn Write>>>,
    roster: PlayerRoster,
    temporary_block_color: U8Vec3,
    last_player_input: Option<PlayerInput>,
    last_weapon_input: Option<WeaponInput>,
    saved_follow: Option<FollowTarget>,
    bandwidth: BandwidthMonitor,
    now: f64,
}

impl<G: GameSession> NetClient<G> {
    pub fn new(config: SessionConfig, game: G) -> Self {
        let extensions =
            ExtensionNegotiator::with_extensions(config.identity(), config.extensions.clone());

        Self {
            game,
            config,
            protocol: ProtocolVersion::default(),
            status: ConnectionStatus::NotConnected,
            status_text: "Not connected".to_string(),
            source: PacketSource::Idle,
            decoder_factory: Box::new(|| Box::new(InflateMapLoader::new())),
            map_decoder: None,
            monitor: None,
            saved: SavedPacketQueue::new(),
            extensions,
            recorder: None,
            roster: PlayerRoster::new(),
            temporary_block_color: U8Vec3::ZERO,
            last_player_input: Some(PlayerInput::empty()),
            last_weapon_input: Some(WeaponInput::empty()),
            saved_follow: None,
            bandwidth: BandwidthMonitor::new(Instant::now()),
            now: 0.0,
        }
    }

    /// Replaces the zlib map loader, e.g. with a decoder that builds the voxel map directly.
    pub fn with_map_decoder(
        mut self,
        factory: impl Fn() -> Box<dyn MapDecoder> + 'static,
    ) -> Self {
        self.decoder_factory = Box::new(factory);
        self
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn extensions(&self) -> &ExtensionNegotiator {
        &self.extensions
    }

    pub fn is_replaying(&self) -> bool {
        matches!(self.source, PacketSource::Replay(_))
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn demo_player(&self) -> Option<&DemoPlayer> {
        match &self.source {
            PacketSource::Replay(player) => Some(player),
            _ => None,
        }
    }

    pub fn status_text(&self) -> String {
        if self.status == ConnectionStatus::ReceivingMap {
            if let Some(monitor) = &self.monitor {
                let progress = self.map_decoder.as_ref().map_or(0.0, |d| d.progress());
                let transfer = monitor.displayed_text(progress);
                if !transfer.is_empty() {
                    return format!("{} ({})", self.status_text, transfer);
                }
            }
        }
        self.status_text.clone()
    }

    /// Position and orientation from the latest world update that mentioned `player_id`.
    pub fn last_known_transform(&self, player_id: u8) -> (Vec3, Vec3) {
        let slot = player_id as usize;
        (self.roster.positions[slot], self.roster.fronts[slot])
    }

    pub fn map_progress(&self) -> Option<f32> {
        self.map_decoder.as_ref().map(|d| d.progress())
    }

    /// Round trip time in milliseconds, `None` when not connected or not measured yet.
    pub fn ping(&self) -> Option<u32> {
        match &self.source {
            PacketSource::Live(transport) if self.status != ConnectionStatus::NotConnected => {
                transport.round_trip_time_ms().filter(|&rtt| rtt != 0)
            }
            _ => None,
        }
    }

    pub fn stats(&self) -> NetworkStats {
        let (bytes_sent, bytes_received) = match &self.source {
            PacketSource::Live(transport) => {
                (transport.bytes_sent_total(), transport.bytes_received_total())
            }
            _ => (0, 0),
        };
        NetworkStats {
            bytes_sent,
            bytes_received,
            up_bytes_per_sec: self.bandwidth.up_bytes_per_sec(),
            down_bytes_per_sec: self.bandwidth.down_bytes_per_sec(),
            rtt_ms: self.ping(),
        }
    }

    fn wire_format(&self) -> WireFormat {
        WireFormat {
            protocol: self.protocol,
            unicode: self.config.unicode,
        }
    }

    fn reset_session_state(&mut self) {
        self.saved.clear();
        self.extensions.reset();
        self.roster = PlayerRoster::new();
        self.temporary_block_color = U8Vec3::ZERO;
        self.last_player_input = Some(PlayerInput::empty());
        self.last_weapon_input = Some(WeaponInput::empty());
        self.map_decoder = None;
        self.monitor = None;
    }

    pub fn connect(&mut self, address: &ServerAddress, now: f64) -> NetResult<()> {
        let transport = UdpTransport::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        self.connect_with(address, Box::new(transport), now)
    }

    /// `now` is the host clock in the same seconds later passed to `poll`; demo records are
    /// stamped relative to it.
    pub fn connect_with(
        &mut self,
        address: &ServerAddress,
        mut transport: Box<dyn Transport>,
        now: f64,
    ) -> NetResult<()> {
        self.disconnect();
        self.now = now;

        self.protocol = address.protocol();
        log::info!("Using Ace of Spades {} protocol", self.protocol);
        log::info!("Connecting to {}", address);

        self.reset_session_state();
        transport.connect(address)?;
        self.source = PacketSource::Live(transport);
        self.bandwidth = BandwidthMonitor::new(Instant::now());

        self.status = ConnectionStatus::Connecting;
        self.status_text = "Connecting to the server".to_string();

        if self.config.record_demos {
            match DemoRecorder::create_in(&self.config.demo_dir, self.protocol, self.now) {
                Ok((recorder, _)) => self.recorder = Some(recorder),
                Err(e) => log::warn!("Demo recording disabled: {}", e),
            }
        }
        Ok(())
    }

    /// Records the current live session into `writer` instead of the demo directory.
    pub fn start_recording_to(&mut self, writer: Box<dyn Write>, now: f64) -> NetResult<()> {
        self.stop_recording();
        self.now = now;
        self.recorder = Some(DemoRecorder::start(writer, self.protocol, now)?);
        Ok(())
    }

    fn stop_recording(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finish() {
                log::warn!("Failed to finish demo: {}", e);
            }
        }
    }

    fn record_packet(&mut self, packet: &[u8]) {
        if let Some(recorder) = &mut self.recorder {
            if let Err(e) = recorder.record(packet, self.now) {
                log::warn!("Demo recording stopped: {}", e);
                self.recorder = None;
            }
        }
    }

    pub fn replay(&mut self, path: &Path, now: f64) -> NetResult<()> {
        let player = DemoPlayer::open(path)?;
        self.replay_from(player, now);
        Ok(())
    }

    pub fn replay_from(&mut self, mut player: DemoPlayer, now: f64) {
        self.disconnect();
        self.now = now;

        self.protocol = player.protocol();
        log::info!("Replaying a {} demo", self.protocol);
        self.reset_session_state();
        self.saved_follow = None;

        player.start(now);
        self.source = PacketSource::Replay(player);
        self.status = ConnectionStatus::Connecting;
        self.status_text = "Reading demo file".to_string();
    }

    /// Services the transport or the demo clock. Errors are session-fatal; the caller is
    /// expected to disconnect and report them.
    pub fn poll(&mut self, now: f64) -> NetResult<()> {
        self.now = now;
        match self.source {
            PacketSource::Idle => Ok(()),
            PacketSource::Live(_) => self.poll_live(),
            PacketSource::Replay(_) => self.poll_replay(),
        }
    }

    fn poll_live(&mut self) -> NetResult<()> {
        let PacketSource::Live(transport) = &mut self.source else {
            return Ok(());
        };
        self.bandwidth.update(
            Instant::now(),
            transport.bytes_sent_total(),
            transport.bytes_received_total(),
        );

        for event in transport.poll(self.config.poll_timeout)? {
            match event {
                TransportEvent::Connected => {
                    if self.status == ConnectionStatus::Connecting {
                        self.status_text = "Awaiting for state".to_string();
                    }
                }
                TransportEvent::Disconnected(code) => return Err(self.remote_disconnected(code)),
                TransportEvent::Received(packet) => self.handle_received(packet)?,
            }
        }
        Ok(())
    }

    fn remote_disconnected(&mut self, code: u32) -> NetError {
        if self.game.has_world() {
            self.game.destroy_world();
        }
        if let PacketSource::Live(mut transport) =
            mem::replace(&mut self.source, PacketSource::Idle)
        {
            transport.reset();
        }

        let reason = disconnect_reason(code);
        log::info!("Disconnected (data = 0x{:08x})", code);
        self.status = ConnectionStatus::NotConnected;
        self.status_text = format!("Disconnected: {}", reason);
        self.saved.clear();
        self.map_decoder = None;
        self.monitor = None;
        self.stop_recording();

        NetError::TransportDisconnected { code, reason }
    }

    fn poll_replay(&mut self) -> NetResult<()> {
        if self.status == ConnectionStatus::NotConnected {
            return Ok(());
        }
        let receiving_map = self.status == ConnectionStatus::ReceivingMap;
        let PacketSource::Replay(player) = &mut self.source else {
            return Ok(());
        };

        let frame = player.begin_frame(receiving_map);
        if frame.restore_follow {
            self.restore_follow();
        }
        if !frame.run {
            return Ok(());
        }

        loop {
            let PacketSource::Replay(player) = &mut self.source else {
                return Ok(());
            };
            match player.next_due(self.now) {
                Ok(Some(packet)) => self.handle_received(packet)?,
                Ok(None) => return Ok(()),
                Err(NetError::DemoEnded) => {
                    log::info!("Demo ended");
                    self.end_demo("Demo Ended: End of Recording reached");
                    return Err(NetError::DemoEnded);
                }
                Err(e) => {
                    log::error!("Demo playback failed: {}", e);
                    self.end_demo("Demo Ended: Error");
                    return Err(e);
                }
            }
        }
    }

    fn end_demo(&mut self, text: &str) {
        self.source = PacketSource::Idle;
        if self.game.has_world() {
            self.game.destroy_world();
        }
        self.status = ConnectionStatus::NotConnected;
        self.status_text = text.to_string();
        self.saved.clear();
        self.map_decoder = None;
        self.monitor = None;
    }

    fn restore_follow(&mut self) {
        if let Some(target) = self.saved_follow {
            self.game.restore_follow(target);
        }
    }

    fn handle_received(&mut self, packet: Vec<u8>) -> NetResult<()> {
        let Some(&packet_tag) = packet.first() else {
            log::debug!("Dropping empty packet");
            return Ok(());
        };

        self.record_packet(&packet);
        if self.handle_handshake(packet_tag, &packet)? {
            return Ok(());
        }

        match self.status {
            ConnectionStatus::NotConnected => Ok(()),
            ConnectionStatus::Connecting => self.handle_connecting(packet_tag, &packet),
            ConnectionStatus::ReceivingMap => self.handle_map_transfer(packet_tag, packet),
            ConnectionStatus::Connected => self.dispatch(&packet),
        }
    }

    /// Handshake packets are answered in every state. Replays consume them silently.
    fn handle_handshake(&mut self, packet_tag: u8, packet: &[u8]) -> NetResult<bool> {
        if !matches!(
            packet_tag,
            tag::HANDSHAKE_INIT | tag::VERSION_GET | tag::EXTENSION_INFO
        ) {
            return Ok(false);
        }

        let decoded = match ServerPacket::decode(packet, self.protocol) {
            Ok(decoded) => decoded,
            Err(e) => {
                log_packet_error(packet, &e);
                return Err(e);
            }
        };
        let reply = match decoded {
            ServerPacket::HandShakeInit { challenge } => {
                ClientPacket::HandShakeReturn { challenge }
            }
            ServerPacket::VersionGet { property_ids } => {
                self.extensions.version_reply(&property_ids)
            }
            ServerPacket::ExtensionInfo(offered) => self.extensions.handle_extension_info(&offered),
            _ => return Ok(false),
        };

        if !self.is_replaying() {
            self.transmit(&reply, false)?;
        }
        Ok(true)
    }

    fn handle_connecting(&mut self, packet_tag: u8, packet: &[u8]) -> NetResult<()> {
        log::debug!("{}", PacketReader::new(packet).hex_dump());
        if packet_tag != tag::MAP_START {
            return Err(NetError::violation(format!(
                "unexpected packet {} while connecting",
                packet_tag
            )));
        }

        match ServerPacket::decode(packet, self.protocol)? {
            ServerPacket::MapStart { map_size } => {
                self.begin_map_transfer(map_size);
                Ok(())
            }
            other => Err(NetError::violation(format!(
                "unexpected packet {} while connecting",
                other.tag()
            ))),
        }
    }

    fn begin_map_transfer(&mut self, map_size: u32) {
        log::info!("Map size advertised by the server: {}", map_size);

        self.map_decoder = Some((self.decoder_factory)());
        self.monitor = Some(MapTransferMonitor::new());
        self.saved.clear();
        self.status = ConnectionStatus::ReceivingMap;
        self.status_text = "Loading snapshot".to_string();

        if let PacketSource::Replay(player) = &mut self.source {
            player.skip_map_transfer();
        }
    }

    fn handle_map_transfer(&mut self, packet_tag: u8, packet: Vec<u8>) -> NetResult<()> {
        match packet_tag {
            tag::MAP_CHUNK => {
                let chunk = PacketReader::new(&packet).payload();
                if let Some(decoder) = &mut self.map_decoder {
                    decoder.add_chunk(chunk);
                }
                if let Some(monitor) = &mut self.monitor {
                    monitor.accumulate(chunk.len());
                }
                Ok(())
            }
            tag::STATE_DATA => {
                log::debug!("{}", PacketReader::new(&packet).hex_dump());
                self.finish_map_transfer(&packet)
            }
            // the server never cancels a reload scheduled before the map change
            tag::WEAPON_RELOAD => {
                log::debug!("Dropping reload packet left over from the previous map");
                Ok(())
            }
            _ => {
                self.saved.push(packet);
                Ok(())
            }
        }
    }

    fn finish_map_transfer(&mut self, state_packet: &[u8]) -> NetResult<()> {
        self.status = ConnectionStatus::Connected;
        self.status_text = "Connected".to_string();

        if let Err(e) = self.load_world() {
            log::error!("Failed to load the map: {}", e);
            if self.game.has_world() {
                self.game.destroy_world();
            }
            self.disconnect();
            self.status_text = "Error".to_string();
            return Err(e);
        }

        self.dispatch(state_packet)
    }

    fn load_world(&mut self) -> NetResult<()> {
        let mut decoder = self
            .map_decoder
            .take()
            .ok_or_else(|| NetError::MapDecode("map transfer finished without a decoder".into()))?;
        self.monitor = None;

        log::info!("Waiting for the game map decoding to complete...");
        decoder.mark_eof();
        decoder.wait_complete()?;
        let map = decoder.take_result()?;
        log::info!("The game map was decoded successfully");

        self.game.create_world(map)?;
        self.roster.teams = [None; MAX_PLAYER_SLOTS];

        log::info!(
            "World loaded. Processing saved packets ({})...",
            self.saved.len()
        );
        for packet in self.saved.drain() {
            self.dispatch(&packet)?;
        }
        log::info!("Done.");
        Ok(())
    }

    fn dispatch(&mut self, packet: &[u8]) -> NetResult<()> {
        let result = ServerPacket::decode(packet, self.protocol).and_then(|decoded| {
            if let ServerPacket::Unknown(packet_tag) = decoded {
                log::warn!("Dropped packet {}", packet_tag);
                log::debug!("{}", PacketReader::new(packet).hex_dump());
                return Ok(());
            }
            self.handle_packet(decoded)
        });

        if let Err(e) = &result {
            log_packet_error(packet, e);
        }
        result
    }

    fn require_world(&self) -> NetResult<()> {
        if self.game.has_world() {
            Ok(())
        } else {
            Err(NetError::invalid_ref("no world"))
        }
    }

    fn require_player(&self, player_id: u8) -> NetResult<()> {
        if !self.game.has_world() {
            return Err(NetError::invalid_ref(format!(
                "Invalid Player ID {}: No world",
                player_id
            )));
        }
        if player_id as usize >= self.game.player_slots() {
            return Err(NetError::invalid_ref(format!(
                "Invalid Player ID {}: Out of range",
                player_id
            )));
        }
        if !self.game.player_exists(player_id) {
            return Err(NetError::invalid_ref(format!(
                "Invalid Player ID {}: Doesn't exist",
                player_id
            )));
        }
        Ok(())
    }

    fn player_or_none(&self, player_id: u8) -> NetResult<Option<u8>> {
        if !self.game.has_world() {
            return Err(NetError::invalid_ref(format!(
                "Invalid Player ID {}: No world",
                player_id
            )));
        }
        let known = (player_id as usize) < self.game.player_slots()
            && self.game.player_exists(player_id);
        Ok(known.then_some(player_id))
    }

    fn require_local_player(&self) -> NetResult<u8> {
        if !self.game.has_world() {
            return Err(NetError::invalid_ref("Failed to get local player: no world"));
        }
        self.game
            .local_player_id()
            .filter(|&id| self.game.player_exists(id))
            .ok_or_else(|| NetError::invalid_ref("Failed to get local player: no local player"))
    }

    fn block_color_of(&self, builder: Option<u8>) -> U8Vec3 {
        builder
            .and_then(|id| self.game.player_block_color(id))
            .unwrap_or(self.temporary_block_color)
    }

    /// `false` when the mode is still unknown; a packet for the other mode is a violation.
    fn mode_allows(&self, expected: GameModeKind, packet_name: &str) -> NetResult<bool> {
        self.require_world()?;
        match self.game.game_mode() {
            None => {
                log::debug!(
                    "Ignoring {} because game mode isn't specified yet",
                    packet_name
                );
                Ok(false)
            }
            Some(mode) if mode == expected => Ok(true),
            Some(mode) => Err(NetError::violation(format!(
                "received {} in {:?} game mode",
                packet_name, mode
            ))),
        }
    }

    fn check_territory(&self, territory_id: u8) -> NetResult<()> {
        let count = self.game.territory_count();
        if (territory_id as usize) < count {
            Ok(())
        } else {
            Err(NetError::violation(format!(
                "Invalid territory id {} specified (max = {})",
                territory_id,
                count as i64 - 1
            )))
        }
    }

    fn handle_packet(&mut self, packet: ServerPacket) -> NetResult<()> {
        match packet {
            // some servers send a four byte position update
            ServerPacket::PositionData(None) => {}
            ServerPacket::PositionData(Some(position)) => {
                self.require_local_player()?;
                self.game.set_local_position(position);
            }
            ServerPacket::OrientationData(orientation) => {
                self.require_local_player()?;
                self.game.set_local_orientation(orientation);
            }
            ServerPacket::WorldUpdate(entries) => self.handle_world_update(&entries)?,
            ServerPacket::InputData { player_id, input } => {
                if !self.game.has_world() {
                    return Ok(());
                }
                self.require_player(player_id)?;
                if self.game.local_player_id() == Some(player_id) {
                    // "/fly" works by echoing jumps back
                    if input.contains(PlayerInput::JUMP) {
                        self.game.local_jump();
                    }
                } else {
                    self.game.player_input(player_id, input);
                }
            }
            ServerPacket::WeaponInput { player_id, input } => {
                if !self.game.has_world() {
                    return Ok(());
                }
                self.require_player(player_id)?;
                if self.game.local_player_id() != Some(player_id) {
                    self.game.weapon_input(player_id, input);
                }
            }
            ServerPacket::SetHp { hp, kind, source } => {
                self.require_local_player()?;
                self.game.set_health(hp, kind, source);
            }
            ServerPacket::Grenade {
                fuse,
                position,
                velocity,
                ..
            } => {
                if self.game.has_world() {
                    self.game.spawn_grenade(fuse, position, velocity);
                }
            }
            ServerPacket::SetTool { player_id, tool } => {
                self.require_player(player_id)?;
                self.game.set_tool(player_id, tool);
            }
            ServerPacket::SetColour { player_id, color } => {
                match self.player_or_none(player_id)? {
                    Some(id) => self.game.set_block_color(id, color),
                    None => self.temporary_block_color = color,
                }
            }
            ServerPacket::ExistingPlayer(player) => self.handle_existing_player(&player),
            ServerPacket::ShortPlayerData { .. } => {
                return Err(NetError::violation("Unexpected: received Short Player Data"));
            }
            ServerPacket::MoveObject {
                object_id,
                state,
                position,
            } => self.handle_move_object(object_id, state, position)?,
            ServerPacket::CreatePlayer(player) => self.handle_create_player(player)?,
            ServerPacket::BlockAction {
                player_id,
                action,
                position,
            } => self.handle_block_action(player_id, action, position)?,
            ServerPacket::BlockLine {
                player_id,
                start,
                end,
            } => {
                let builder = self.player_or_none(player_id)?;
                let color = self.block_color_of(builder);
                self.game.build_line(start, end, color, builder);
            }
            ServerPacket::StateData(state) => self.handle_state_data(&state)?,
            ServerPacket::KillAction {
                victim,
                killer,
                kind,
                respawn_time,
            } => {
                self.require_player(victim)?;
                self.require_player(killer)?;
                let killer = if kind.is_self_inflicted() {
                    victim
                } else {
                    killer
                };
                self.game.player_killed(victim, killer, kind, respawn_time);
            }
            ServerPacket::ChatMessage {
                player_id,
                kind,
                message,
            } => self.handle_chat(player_id, kind, &message)?,
            ServerPacket::MapStart { map_size } => {
                // no local map cache, so always ask for the full transfer
                if self.protocol == ProtocolVersion::V076 && !self.is_replaying() {
                    self.transmit(&ClientPacket::MapCached { cached: false }, false)?;
                }
                if self.game.has_world() {
                    self.game.destroy_world();
                }
                self.begin_map_transfer(map_size);
            }
            ServerPacket::MapChunk(_) => {
                return Err(NetError::violation("Unexpected: received Map Chunk while game"));
            }
            ServerPacket::PlayerLeft { player_id } => {
                self.require_player(player_id)?;
                self.game.player_left(player_id);
                self.roster.teams[player_id as usize] = None;
            }
            ServerPacket::TerritoryCapture {
                territory_id,
                winning,
                state,
            } => {
                if self.mode_allows(GameModeKind::Tc, "territory capture")? {
                    self.check_territory(territory_id)?;
                    self.game.territory_captured(territory_id, state, winning);
                }
            }
            ServerPacket::ProgressBar {
                territory_id,
                capturing_team,
                rate,
                progress,
            } => {
                if self.mode_allows(GameModeKind::Tc, "progress bar")? {
                    self.check_territory(territory_id)?;
                    if !(-0.1..=1.1).contains(&progress) {
                        return Err(NetError::violation(format!(
                            "Progress value out of range({})",
                            progress
                        )));
                    }
                    self.game
                        .territory_progress(territory_id, capturing_team, rate, progress);
                }
            }
            ServerPacket::IntelCapture { player_id, winning } => {
                if self.mode_allows(GameModeKind::Ctf, "intel capture")? {
                    self.require_player(player_id)?;
                    self.game.intel_captured(player_id, winning);
                }
            }
            ServerPacket::IntelPickup { player_id } => {
                self.require_player(player_id)?;
                if self.mode_allows(GameModeKind::Ctf, "intel pickup")? {
                    self.game.intel_picked_up(player_id);
                }
            }
            ServerPacket::IntelDrop {
                player_id,
                position,
            } => {
                self.require_player(player_id)?;
                if self.mode_allows(GameModeKind::Ctf, "intel drop")? {
                    self.game.intel_dropped(player_id, position);
                }
            }
            ServerPacket::Restock { .. } => {
                self.require_local_player()?;
                self.game.restock();
            }
            ServerPacket::FogColour(color) => {
                if self.game.has_world() {
                    self.game.set_fog_color(color);
                }
            }
            ServerPacket::WeaponReload {
                player_id,
                clip,
                reserve,
            } => {
                self.require_player(player_id)?;
                if self.game.local_player_id() == Some(player_id) {
                    self.game.reload_done(clip, reserve);
                } else {
                    self.game.reload_started(player_id);
                }
            }
            ServerPacket::ChangeTeam { player_id, team } => {
                self.require_player(player_id)?;
                if team > 2 {
                    return Err(NetError::violation(format!(
                        "Received invalid team: {}",
                        team
                    )));
                }
                self.game.team_changed(player_id, team);
            }
            ServerPacket::ChangeWeapon { player_id, weapon } => {
                self.game.weapon_changed(player_id, weapon);
            }
            ServerPacket::HandShakeInit { .. }
            | ServerPacket::VersionGet { .. }
            | ServerPacket::ExtensionInfo(_) => {
                log::debug!("Handshake packet reached the game dispatcher");
            }
            ServerPacket::Unknown(packet_tag) => {
                log::warn!("Dropped packet {}", packet_tag);
            }
        }
        Ok(())
    }

    fn handle_world_update(&mut self, entries: &[WorldUpdateEntry]) -> NetResult<()> {
        for entry in entries {
            if !entry.position.is_finite() || !entry.orientation.is_finite() {
                return Err(NetError::violation(format!(
                    "non-finite transform for player {}",
                    entry.player_id
                )));
            }
            if entry.orientation.length() >= MAX_ORIENTATION_LENGTH {
                return Err(NetError::violation(format!(
                    "orientation of player {} is too long",
                    entry.player_id
                )));
            }
            let slot = entry.player_id as usize;
            self.roster.positions[slot] = entry.position;
            self.roster.fronts[slot] = entry.orientation;
        }

        if self.game.has_world() {
            self.game.world_update(entries);
        }

        if let PacketSource::Replay(player) = &mut self.source {
            if player.note_world_update(self.now) {
                self.restore_follow();
            }
        }
        Ok(())
    }

    fn handle_existing_player(&mut self, player: &ExistingPlayer) {
        if !self.game.has_world() {
            return;
        }
        let slot = player.player_id as usize;
        self.game
            .existing_player(player, self.roster.positions[slot]);
        self.roster.teams[slot] = Some(player.team);
    }

    fn handle_move_object(&mut self, object_id: u8, state: u8, position: Vec3) -> NetResult<()> {
        self.require_world()?;
        match self.game.game_mode() {
            Some(GameModeKind::Ctf) => match object_id {
                0 => self.game.set_flag_position(0, position),
                1 => self.game.set_flag_position(1, position),
                2 => self.game.set_base_position(0, position),
                3 => self.game.set_base_position(1, position),
                _ => {}
            },
            Some(GameModeKind::Tc) => {
                self.check_territory(object_id)?;
                if state > 2 {
                    return Err(NetError::violation(format!(
                        "Invalid state {} specified for territory owner.",
                        state
                    )));
                }
                self.game.set_territory(object_id, position, state);
            }
            None => {}
        }
        Ok(())
    }

    fn handle_create_player(&mut self, mut player: CreatePlayer) -> NetResult<()> {
        self.require_world()?;
        let slot = player.player_id as usize;
        if slot >= self.game.player_slots() {
            log::warn!(
                "Ignoring invalid player id {} ({})",
                player.player_id,
                player.name
            );
            return Ok(());
        }

        player.position.z -= 2.0;
        self.game.create_player(&player);

        if self.game.local_player_id() == Some(player.player_id) {
            self.game.local_player_created();
            self.last_player_input = None;
            self.last_weapon_input = None;
            if let Some(color) = self.game.player_block_color(player.player_id) {
                self.transmit_as_local(
                    ClientPacket::SetColour {
                        player_id: player.player_id,
                        color,
                    },
                    true,
                )?;
            }
        } else if self.roster.teams[slot] != Some(player.team) {
            self.game.player_joined_team(player.player_id, player.team);
            self.roster.teams[slot] = Some(player.team);
        }

        self.game.player_spawned(player.player_id);
        Ok(())
    }

    fn handle_block_action(
        &mut self,
        player_id: u8,
        action: BlockActionKind,
        position: IVec3,
    ) -> NetResult<()> {
        let builder = self.player_or_none(player_id)?;
        match action {
            BlockActionKind::Build => {
                let color = self.block_color_of(builder);
                self.game.create_block(position, color, builder);
            }
            BlockActionKind::Tool => self.game.destroy_blocks(&[position], action, builder),
            BlockActionKind::Dig => {
                let cells: Vec<IVec3> = (-1..=1)
                    .map(|dz| position + IVec3::new(0, 0, dz))
                    .collect();
                self.game.destroy_blocks(&cells, action, builder);
            }
            BlockActionKind::Grenade => {
                let mut cells = Vec::with_capacity(27);
                for dx in -1..=1 {
                    for dy in -1..=1 {
                        for dz in -1..=1 {
                            cells.push(position + IVec3::new(dx, dy, dz));
                        }
                    }
                }
                self.game.destroy_blocks(&cells, action, builder);
            }
        }
        Ok(())
    }

    fn handle_state_data(&mut self, state: &StateData) -> NetResult<()> {
        if !self.game.has_world() {
            return Ok(());
        }
        self.game.apply_state(state);
        self.game.joined_game();

        if self.is_replaying() {
            self.join_replay()?;
        }
        Ok(())
    }

    /// Spawns the viewer as a spectator so the replayed world has a camera owner.
    fn join_replay(&mut self) -> NetResult<()> {
        let spectator = ExistingPlayer {
            player_id: SPECTATOR_REPLAY_ID,
            team: SPECTATOR_TEAM,
            weapon: Weapon::Rifle,
            tool: Tool::Weapon,
            kills: 0,
            color: self.game.team_color(SPECTATOR_TEAM),
            name: self.config.player_name.chars().take(PLAYER_NAME_LEN).collect(),
        };
        self.handle_packet(ServerPacket::ExistingPlayer(spectator))?;

        if let PacketSource::Replay(player) = &mut self.source {
            player.on_joined(self.now);
        }
        self.restore_follow();
        Ok(())
    }

    fn handle_chat(&mut self, player_id: u8, kind: ChatKind, message: &str) -> NetResult<()> {
        let sender = self.player_or_none(player_id)?;
        match kind {
            ChatKind::System => self.game.chat_message(None, kind, message),
            ChatKind::Global | ChatKind::Team => {
                self.game.chat_message(sender, kind, message.trim())
            }
            ChatKind::Other(value) => {
                log::debug!("Dropping chat message of unknown type {}", value);
            }
        }
        Ok(())
    }

    fn transmit(&mut self, packet: &ClientPacket, record: bool) -> NetResult<()> {
        let format = self.wire_format();
        let transport = match &mut self.source {
            PacketSource::Live(transport) => transport,
            PacketSource::Replay(_) => return Ok(()),
            PacketSource::Idle => return Err(NetError::NotConnected),
        };

        let bytes = packet.encode(format)?;
        transport.send(&bytes, Reliability::Reliable)?;
        if record {
            self.record_packet(&bytes);
        }
        Ok(())
    }

    /// Local player id for live sessions; `None` while replaying, where sends are no-ops.
    fn live_local_player(&self) -> NetResult<Option<u8>> {
        match self.source {
            PacketSource::Idle => Err(NetError::NotConnected),
            PacketSource::Replay(_) => Ok(None),
            PacketSource::Live(_) => self.require_local_player().map(Some),
        }
    }

    fn transmit_as_local(&mut self, packet: ClientPacket, record: bool) -> NetResult<()> {
        if self.is_replaying() {
            return Ok(());
        }
        self.transmit(&packet, record)
    }

    pub fn send_position(&mut self, position: Vec3) -> NetResult<()> {
        self.transmit(&ClientPacket::PositionData(position), false)
    }

    pub fn send_orientation(&mut self, orientation: Vec3) -> NetResult<()> {
        self.transmit(&ClientPacket::OrientationData(orientation), false)
    }

    /// Unchanged input is not resent.
    pub fn send_player_input(&mut self, input: PlayerInput) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        if self.last_player_input == Some(input) {
            return Ok(());
        }
        self.last_player_input = Some(input);
        self.transmit(&ClientPacket::InputData { player_id, input }, true)
    }

    pub fn send_weapon_input(&mut self, input: WeaponInput) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        if self.last_weapon_input == Some(input) {
            return Ok(());
        }
        self.last_weapon_input = Some(input);
        self.transmit(&ClientPacket::WeaponInput { player_id, input }, true)
    }

    pub fn send_block_action(&mut self, position: IVec3, action: BlockActionKind) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(
            &ClientPacket::BlockAction {
                player_id,
                action,
                position,
            },
            false,
        )
    }

    pub fn send_block_line(&mut self, start: IVec3, end: IVec3) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(
            &ClientPacket::BlockLine {
                player_id,
                start,
                end,
            },
            false,
        )
    }

    pub fn send_reload(&mut self) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(
            &ClientPacket::WeaponReload {
                player_id,
                clip: 0,
                reserve: 0,
            },
            true,
        )
    }

    pub fn send_held_block_color(&mut self, color: U8Vec3) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(&ClientPacket::SetColour { player_id, color }, true)
    }

    pub fn send_tool(&mut self, tool: Tool) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(&ClientPacket::SetTool { player_id, tool }, true)
    }

    pub fn send_grenade(&mut self, fuse: f32, position: Vec3, velocity: Vec3) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(
            &ClientPacket::Grenade {
                player_id,
                fuse,
                position,
                velocity,
            },
            true,
        )
    }

    pub fn send_hit(&mut self, target: u8, kind: HitKind) -> NetResult<()> {
        self.transmit(&ClientPacket::Hit { target, kind }, false)
    }

    /// While replaying, chat text is interpreted as a playback command instead.
    pub fn send_chat(&mut self, text: &str, global: bool) -> NetResult<()> {
        if self.is_replaying() {
            if !self.demo_command(text)? {
                log::info!("Unknown demo command: {}", text);
            }
            return Ok(());
        }

        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(
            &ClientPacket::ChatMessage {
                player_id,
                global,
                message: text.to_string(),
            },
            false,
        )
    }

    pub fn send_weapon_change(&mut self, weapon: Weapon) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(&ClientPacket::ChangeWeapon { player_id, weapon }, false)
    }

    pub fn send_team_change(&mut self, team: u8) -> NetResult<()> {
        let Some(player_id) = self.live_local_player()? else {
            return Ok(());
        };
        self.transmit(&ClientPacket::ChangeTeam { player_id, team }, false)
    }

    pub fn send_join(&mut self, team: u8, weapon: Weapon, name: &str, kills: u32) -> NetResult<()> {
        let color = self.game.team_color(team);
        self.transmit(
            &ClientPacket::Join {
                team,
                weapon,
                kills,
                color,
                name: name.to_string(),
            },
            false,
        )
    }

    /// Applies a playback command. Returns `false` when the text is not a command or no demo
    /// is playing.
    pub fn demo_command(&mut self, text: &str) -> NetResult<bool> {
        let Some(command) = DemoCommand::parse(text) else {
            return Ok(false);
        };
        let follow = self.game.follow_target();
        let now = self.now;
        let PacketSource::Replay(player) = &mut self.source else {
            return Ok(false);
        };

        log::debug!("Demo command {:?}", command);
        match command {
            DemoCommand::Pause => {
                if player.is_paused() {
                    player.unpause(now, true);
                } else {
                    player.pause();
                }
            }
            DemoCommand::Unpause => {
                if player.is_paused() {
                    player.unpause(now, true);
                }
            }
            DemoCommand::Speed(multiplier) => player.set_speed(multiplier, now)?,
            DemoCommand::GoTo(secs) => {
                self.saved_follow = follow;
                player.go_to(secs, now)?;
            }
            DemoCommand::FastForward(secs) => {
                self.saved_follow = follow;
                player.seek_forward(secs, now);
            }
            DemoCommand::Rewind(secs) => {
                self.saved_follow = follow;
                player.seek_backward(secs, now)?;
            }
            DemoCommand::NextUpdates(updates) => {
                if player.is_paused() {
                    self.saved_follow = follow;
                    player.step_forward(updates, now);
                }
            }
            DemoCommand::PrevUpdates(updates) => {
                if player.is_paused() {
                    self.saved_follow = follow;
                    player.step_backward(updates, now)?;
                }
            }
        }
        Ok(true)
    }

    /// Ends the session. Safe to call repeatedly; a live session gets a bounded graceful
    /// shutdown before the transport is reset.
    pub fn disconnect(&mut self) {
        match mem::replace(&mut self.source, PacketSource::Idle) {
            PacketSource::Idle => return,
            PacketSource::Live(mut transport) => {
                transport.disconnect(0);
                self.status = ConnectionStatus::NotConnected;
                self.status_text = "Not connected".to_string();
                self.saved.clear();

                log::info!("Waiting for graceful disconnection");
                let deadline = Instant::now() + self.config.disconnect_timeout;
                'wait: loop {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        break;
                    }
                    match transport.poll(left.min(DISCONNECT_POLL_STEP)) {
                        Ok(events) => {
                            if events
                                .iter()
                                .any(|e| matches!(e, TransportEvent::Disconnected(_)))
                            {
                                break 'wait;
                            }
                        }
                        Err(e) => {
                            log::warn!("Transport error while disconnecting: {}", e);
                            break;
                        }
                    }
                }
                log::info!("Connection terminated");
                transport.reset();
            }
            PacketSource::Replay(_) => {
                log::info!("Demo playback stopped");
                self.status = ConnectionStatus::NotConnected;
                self.status_text = "Not connected".to_string();
                self.saved.clear();
            }
        }

        if self.game.has_world() {
            self.game.destroy_world();
        }
        self.map_decoder = None;
        self.monitor = None;
        self.stop_recording();
    }
}

impl<G: GameSession> Drop for NetClient<G> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn log_packet_error(packet: &[u8], error: &NetError) {
    let packet_tag = packet.first().copied().unwrap_or_default();
    log::error!(
        "Error while handling packet type 0x{:02x}: {}",
        packet_tag,
        error
    );
    log::error!("{}", PacketReader::new(packet).hex_dump());
}
