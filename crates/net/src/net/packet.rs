use bitflags::bitflags;
use glam::{IVec3, U8Vec3, Vec3};

use super::codec::{PacketReader, PacketWriter};
use super::protocol::{PLAYER_NAME_LEN, ProtocolVersion, TEAM_NAME_LEN, WireFormat, tag};
use crate::error::{NetError, NetResult};

/// Padding after a carrier id in the CTF state block, filling the slot a position would use.
const CARRIER_PADDING: usize = 11;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlayerInput: u8 {
        const MOVE_FORWARD = 1 << 0;
        const MOVE_BACKWARD = 1 << 1;
        const MOVE_LEFT = 1 << 2;
        const MOVE_RIGHT = 1 << 3;
        const JUMP = 1 << 4;
        const CROUCH = 1 << 5;
        const SNEAK = 1 << 6;
        const SPRINT = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WeaponInput: u8 {
        const PRIMARY = 1 << 0;
        const SECONDARY = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientFeatureFlags: u32 {
        const SUPPORTS_UNICODE = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Weapon {
    Rifle,
    Smg,
    Shotgun,
}

impl Weapon {
    pub fn from_wire(value: u8) -> NetResult<Self> {
        match value {
            0 => Ok(Self::Rifle),
            1 => Ok(Self::Smg),
            2 => Ok(Self::Shotgun),
            other => Err(NetError::violation(format!("invalid weapon {other}"))),
        }
    }

    pub fn wire_value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Spade,
    Block,
    Weapon,
    Grenade,
}

impl Tool {
    pub fn from_wire(value: u8) -> NetResult<Self> {
        match value {
            0 => Ok(Self::Spade),
            1 => Ok(Self::Block),
            2 => Ok(Self::Weapon),
            3 => Ok(Self::Grenade),
            other => Err(NetError::violation(format!("invalid tool type {other}"))),
        }
    }

    pub fn wire_value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HurtKind {
    Fall,
    Weapon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitKind {
    Torso,
    Head,
    Arms,
    Legs,
    Melee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KillKind {
    Weapon,
    Headshot,
    Melee,
    Grenade,
    Fall,
    TeamChange,
    ClassChange,
}

impl KillKind {
    pub fn from_wire(value: u8) -> NetResult<Self> {
        match value {
            0 => Ok(Self::Weapon),
            1 => Ok(Self::Headshot),
            2 => Ok(Self::Melee),
            3 => Ok(Self::Grenade),
            4 => Ok(Self::Fall),
            5 => Ok(Self::TeamChange),
            6 => Ok(Self::ClassChange),
            other => Err(NetError::violation(format!("invalid kill type {other}"))),
        }
    }

    pub fn wire_value(self) -> u8 {
        self as u8
    }

    /// The victim is credited as their own killer.
    pub fn is_self_inflicted(self) -> bool {
        matches!(self, Self::Fall | Self::TeamChange | Self::ClassChange)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockActionKind {
    Build,
    /// Destroyed by a bullet or the spade.
    Tool,
    Dig,
    Grenade,
}

impl BlockActionKind {
    pub fn from_wire(value: u8) -> NetResult<Self> {
        match value {
            0 => Ok(Self::Build),
            1 => Ok(Self::Tool),
            2 => Ok(Self::Dig),
            3 => Ok(Self::Grenade),
            other => Err(NetError::violation(format!("invalid block action {other}"))),
        }
    }

    pub fn wire_value(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatKind {
    Global,
    Team,
    System,
    Other(u8),
}

impl ChatKind {
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => Self::Global,
            1 => Self::Team,
            2 => Self::System,
            other => Self::Other(other),
        }
    }

    pub fn wire_value(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Team => 1,
            Self::System => 2,
            Self::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldUpdateEntry {
    pub player_id: u8,
    pub position: Vec3,
    pub orientation: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExistingPlayer {
    pub player_id: u8,
    pub team: u8,
    pub weapon: Weapon,
    pub tool: Tool,
    pub kills: u32,
    pub color: U8Vec3,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlayer {
    pub player_id: u8,
    pub weapon: Weapon,
    pub team: u8,
    pub position: Vec3,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntelLocation {
    Carried { carrier: u8 },
    Ground(Vec3),
}

impl IntelLocation {
    pub fn is_carried(&self) -> bool {
        matches!(self, Self::Carried { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CtfState {
    pub scores: [u8; 2],
    pub capture_limit: u8,
    /// Intel belonging to each team.
    pub intel: [IntelLocation; 2],
    pub bases: [Vec3; 2],
}

impl CtfState {
    /// Whether `team` currently holds the enemy intel.
    pub fn team_has_intel(&self, team: usize) -> bool {
        self.intel
            .get(1 - team.min(1))
            .is_some_and(IntelLocation::is_carried)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerritoryState {
    pub position: Vec3,
    pub owner: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameModeState {
    Ctf(CtfState),
    Tc(Vec<TerritoryState>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameModeKind {
    Ctf,
    Tc,
}

impl GameModeState {
    pub fn kind(&self) -> GameModeKind {
        match self {
            Self::Ctf(_) => GameModeKind::Ctf,
            Self::Tc(_) => GameModeKind::Tc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateData {
    pub player_id: u8,
    pub fog_color: U8Vec3,
    pub team_colors: [U8Vec3; 2],
    pub team_names: [String; 2],
    pub mode: GameModeState,
}

/// Server to client messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    /// `None` when the server sends the short, payload-less form.
    PositionData(Option<Vec3>),
    OrientationData(Vec3),
    WorldUpdate(Vec<WorldUpdateEntry>),
    InputData {
        player_id: u8,
        input: PlayerInput,
    },
    WeaponInput {
        player_id: u8,
        input: WeaponInput,
    },
    SetHp {
        hp: u8,
        kind: HurtKind,
        source: Vec3,
    },
    Grenade {
        player_id: u8,
        fuse: f32,
        position: Vec3,
        velocity: Vec3,
    },
    SetTool {
        player_id: u8,
        tool: Tool,
    },
    SetColour {
        player_id: u8,
        color: U8Vec3,
    },
    ExistingPlayer(ExistingPlayer),
    ShortPlayerData {
        player_id: u8,
        team: u8,
        weapon: u8,
    },
    MoveObject {
        object_id: u8,
        state: u8,
        position: Vec3,
    },
    CreatePlayer(CreatePlayer),
    BlockAction {
        player_id: u8,
        action: BlockActionKind,
        position: IVec3,
    },
    BlockLine {
        player_id: u8,
        start: IVec3,
        end: IVec3,
    },
    StateData(StateData),
    KillAction {
        victim: u8,
        killer: u8,
        kind: KillKind,
        respawn_time: u8,
    },
    ChatMessage {
        player_id: u8,
        kind: ChatKind,
        message: String,
    },
    MapStart {
        map_size: u32,
    },
    MapChunk(Vec<u8>),
    PlayerLeft {
        player_id: u8,
    },
    TerritoryCapture {
        territory_id: u8,
        winning: bool,
        state: u8,
    },
    ProgressBar {
        territory_id: u8,
        capturing_team: u8,
        rate: i8,
        progress: f32,
    },
    IntelCapture {
        player_id: u8,
        winning: bool,
    },
    IntelPickup {
        player_id: u8,
    },
    IntelDrop {
        player_id: u8,
        position: Vec3,
    },
    Restock {
        player_id: u8,
    },
    FogColour(U8Vec3),
    WeaponReload {
        player_id: u8,
        clip: u8,
        reserve: u8,
    },
    ChangeTeam {
        player_id: u8,
        team: u8,
    },
    ChangeWeapon {
        player_id: u8,
        weapon: Weapon,
    },
    HandShakeInit {
        challenge: u32,
    },
    VersionGet {
        property_ids: Vec<u8>,
    },
    ExtensionInfo(Vec<(u8, u8)>),
    Unknown(u8),
}

impl ServerPacket {
    pub fn decode(data: &[u8], protocol: ProtocolVersion) -> NetResult<Self> {
        let mut r = PacketReader::new(data);
        let Some(type_tag) = r.type_tag() else {
            return Err(NetError::TruncatedPacket {
                tag: 0,
                needed: 1,
                remaining: 0,
            });
        };

        let packet = match type_tag {
            tag::POSITION_DATA => {
                if r.remaining() < 12 {
                    Self::PositionData(None)
                } else {
                    Self::PositionData(Some(r.read_vec3()?))
                }
            }
            tag::ORIENTATION_DATA => Self::OrientationData(r.read_vec3()?),
            tag::WORLD_UPDATE => Self::WorldUpdate(decode_world_update(&mut r, protocol)?),
            tag::INPUT_DATA => Self::InputData {
                player_id: r.read_u8()?,
                input: PlayerInput::from_bits_retain(r.read_u8()?),
            },
            tag::WEAPON_INPUT => Self::WeaponInput {
                player_id: r.read_u8()?,
                input: WeaponInput::from_bits_retain(r.read_u8()?),
            },
            tag::SET_HP => Self::SetHp {
                hp: r.read_u8()?,
                kind: if r.read_u8()? == 0 {
                    HurtKind::Fall
                } else {
                    HurtKind::Weapon
                },
                source: r.read_vec3()?,
            },
            tag::GRENADE => Self::Grenade {
                player_id: r.read_u8()?,
                fuse: r.read_f32()?,
                position: r.read_vec3()?,
                velocity: r.read_vec3()?,
            },
            tag::SET_TOOL => Self::SetTool {
                player_id: r.read_u8()?,
                tool: Tool::from_wire(r.read_u8()?)?,
            },
            tag::SET_COLOUR => Self::SetColour {
                player_id: r.read_u8()?,
                color: r.read_color()?,
            },
            tag::EXISTING_PLAYER => Self::ExistingPlayer(ExistingPlayer {
                player_id: r.read_u8()?,
                team: r.read_u8()?,
                weapon: Weapon::from_wire(r.read_u8()?)?,
                tool: Tool::from_wire(r.read_u8()?)?,
                kills: r.read_u32()?,
                color: r.read_color()?,
                name: r.read_remaining_string(),
            }),
            tag::SHORT_PLAYER_DATA => Self::ShortPlayerData {
                player_id: r.read_u8()?,
                team: r.read_u8()?,
                weapon: r.read_u8()?,
            },
            tag::MOVE_OBJECT => Self::MoveObject {
                object_id: r.read_u8()?,
                state: r.read_u8()?,
                position: r.read_vec3()?,
            },
            tag::CREATE_PLAYER => Self::CreatePlayer(CreatePlayer {
                player_id: r.read_u8()?,
                weapon: Weapon::from_wire(r.read_u8()?)?,
                team: r.read_u8()?,
                position: r.read_vec3()?,
                name: r.read_remaining_string(),
            }),
            tag::BLOCK_ACTION => Self::BlockAction {
                player_id: r.read_u8()?,
                action: BlockActionKind::from_wire(r.read_u8()?)?,
                position: r.read_ivec3()?,
            },
            tag::BLOCK_LINE => Self::BlockLine {
                player_id: r.read_u8()?,
                start: r.read_ivec3()?,
                end: r.read_ivec3()?,
            },
            tag::STATE_DATA => Self::StateData(decode_state_data(&mut r)?),
            tag::KILL_ACTION => Self::KillAction {
                victim: r.read_u8()?,
                killer: r.read_u8()?,
                kind: KillKind::from_wire(r.read_u8()?)?,
                respawn_time: r.read_u8()?,
            },
            tag::CHAT_MESSAGE => Self::ChatMessage {
                player_id: r.read_u8()?,
                kind: ChatKind::from_wire(r.read_u8()?),
                message: r.read_remaining_string(),
            },
            tag::MAP_START => Self::MapStart {
                map_size: r.read_u32()?,
            },
            tag::MAP_CHUNK => Self::MapChunk(r.read_remaining().to_vec()),
            tag::PLAYER_LEFT => Self::PlayerLeft {
                player_id: r.read_u8()?,
            },
            tag::TERRITORY_CAPTURE => Self::TerritoryCapture {
                territory_id: r.read_u8()?,
                winning: r.read_u8()? != 0,
                state: r.read_u8()?,
            },
            tag::PROGRESS_BAR => Self::ProgressBar {
                territory_id: r.read_u8()?,
                capturing_team: r.read_u8()?,
                rate: r.read_i8()?,
                progress: r.read_f32()?,
            },
            tag::INTEL_CAPTURE => Self::IntelCapture {
                player_id: r.read_u8()?,
                winning: r.read_u8()? != 0,
            },
            tag::INTEL_PICKUP => Self::IntelPickup {
                player_id: r.read_u8()?,
            },
            tag::INTEL_DROP => Self::IntelDrop {
                player_id: r.read_u8()?,
                position: r.read_vec3()?,
            },
            tag::RESTOCK => Self::Restock {
                player_id: r.read_u8()?,
            },
            tag::FOG_COLOUR => {
                let _alpha = r.read_u8()?;
                Self::FogColour(r.read_color()?)
            }
            tag::WEAPON_RELOAD => Self::WeaponReload {
                player_id: r.read_u8()?,
                clip: r.read_u8()?,
                reserve: r.read_u8()?,
            },
            tag::CHANGE_TEAM => Self::ChangeTeam {
                player_id: r.read_u8()?,
                team: r.read_u8()?,
            },
            tag::CHANGE_WEAPON => Self::ChangeWeapon {
                player_id: r.read_u8()?,
                weapon: Weapon::from_wire(r.read_u8()?)?,
            },
            tag::HANDSHAKE_INIT => Self::HandShakeInit {
                challenge: r.read_u32()?,
            },
            tag::VERSION_GET => Self::VersionGet {
                property_ids: r.read_remaining().to_vec(),
            },
            tag::EXTENSION_INFO => {
                let count = r.read_u8()?;
                let mut extensions = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    extensions.push((r.read_u8()?, r.read_u8()?));
                }
                Self::ExtensionInfo(extensions)
            }
            other => Self::Unknown(other),
        };

        Ok(packet)
    }

    pub fn tag(&self) -> u8 {
        match self {
            Self::PositionData(_) => tag::POSITION_DATA,
            Self::OrientationData(_) => tag::ORIENTATION_DATA,
            Self::WorldUpdate(_) => tag::WORLD_UPDATE,
            Self::InputData { .. } => tag::INPUT_DATA,
            Self::WeaponInput { .. } => tag::WEAPON_INPUT,
            Self::SetHp { .. } => tag::SET_HP,
            Self::Grenade { .. } => tag::GRENADE,
            Self::SetTool { .. } => tag::SET_TOOL,
            Self::SetColour { .. } => tag::SET_COLOUR,
            Self::ExistingPlayer(_) => tag::EXISTING_PLAYER,
            Self::ShortPlayerData { .. } => tag::SHORT_PLAYER_DATA,
            Self::MoveObject { .. } => tag::MOVE_OBJECT,
            Self::CreatePlayer(_) => tag::CREATE_PLAYER,
            Self::BlockAction { .. } => tag::BLOCK_ACTION,
            Self::BlockLine { .. } => tag::BLOCK_LINE,
            Self::StateData(_) => tag::STATE_DATA,
            Self::KillAction { .. } => tag::KILL_ACTION,
            Self::ChatMessage { .. } => tag::CHAT_MESSAGE,
            Self::MapStart { .. } => tag::MAP_START,
            Self::MapChunk(_) => tag::MAP_CHUNK,
            Self::PlayerLeft { .. } => tag::PLAYER_LEFT,
            Self::TerritoryCapture { .. } => tag::TERRITORY_CAPTURE,
            Self::ProgressBar { .. } => tag::PROGRESS_BAR,
            Self::IntelCapture { .. } => tag::INTEL_CAPTURE,
            Self::IntelPickup { .. } => tag::INTEL_PICKUP,
            Self::IntelDrop { .. } => tag::INTEL_DROP,
            Self::Restock { .. } => tag::RESTOCK,
            Self::FogColour(_) => tag::FOG_COLOUR,
            Self::WeaponReload { .. } => tag::WEAPON_RELOAD,
            Self::ChangeTeam { .. } => tag::CHANGE_TEAM,
            Self::ChangeWeapon { .. } => tag::CHANGE_WEAPON,
            Self::HandShakeInit { .. } => tag::HANDSHAKE_INIT,
            Self::VersionGet { .. } => tag::VERSION_GET,
            Self::ExtensionInfo(_) => tag::EXTENSION_INFO,
            Self::Unknown(t) => *t,
        }
    }

    /// Serializes the message the way a server would send it.
    pub fn encode(&self, format: WireFormat) -> Vec<u8> {
        let mut w = PacketWriter::new(self.tag()).with_unicode(format.unicode);
        match self {
            Self::PositionData(position) => {
                if let Some(position) = position {
                    w.write_vec3(*position);
                } else {
                    w.write_u32(0);
                }
            }
            Self::OrientationData(orientation) => {
                w.write_vec3(*orientation);
            }
            Self::WorldUpdate(entries) => {
                for entry in entries {
                    if format.protocol == ProtocolVersion::V076 {
                        w.write_u8(entry.player_id);
                    }
                    w.write_vec3(entry.position).write_vec3(entry.orientation);
                }
            }
            Self::InputData { player_id, input } => {
                w.write_u8(*player_id).write_u8(input.bits());
            }
            Self::WeaponInput { player_id, input } => {
                w.write_u8(*player_id).write_u8(input.bits());
            }
            Self::SetHp { hp, kind, source } => {
                w.write_u8(*hp)
                    .write_u8(matches!(kind, HurtKind::Weapon) as u8)
                    .write_vec3(*source);
            }
            Self::Grenade {
                player_id,
                fuse,
                position,
                velocity,
            } => {
                w.write_u8(*player_id)
                    .write_f32(*fuse)
                    .write_vec3(*position)
                    .write_vec3(*velocity);
            }
            Self::SetTool { player_id, tool } => {
                w.write_u8(*player_id).write_u8(tool.wire_value());
            }
            Self::SetColour { player_id, color } => {
                w.write_u8(*player_id).write_color(*color);
            }
            Self::ExistingPlayer(p) => {
                w.write_u8(p.player_id)
                    .write_u8(p.team)
                    .write_u8(p.weapon.wire_value())
                    .write_u8(p.tool.wire_value())
                    .write_u32(p.kills)
                    .write_color(p.color)
                    .write_string(&p.name);
            }
            Self::ShortPlayerData {
                player_id,
                team,
                weapon,
            } => {
                w.write_u8(*player_id).write_u8(*team).write_u8(*weapon);
            }
            Self::MoveObject {
                object_id,
                state,
                position,
            } => {
                w.write_u8(*object_id).write_u8(*state).write_vec3(*position);
            }
            Self::CreatePlayer(p) => {
                w.write_u8(p.player_id)
                    .write_u8(p.weapon.wire_value())
                    .write_u8(p.team)
                    .write_vec3(p.position)
                    .write_string(&p.name);
            }
            Self::BlockAction {
                player_id,
                action,
                position,
            } => {
                w.write_u8(*player_id)
                    .write_u8(action.wire_value())
                    .write_ivec3(*position);
            }
            Self::BlockLine {
                player_id,
                start,
                end,
            } => {
                w.write_u8(*player_id).write_ivec3(*start).write_ivec3(*end);
            }
            Self::StateData(state) => encode_state_data(&mut w, state),
            Self::KillAction {
                victim,
                killer,
                kind,
                respawn_time,
            } => {
                w.write_u8(*victim)
                    .write_u8(*killer)
                    .write_u8(kind.wire_value())
                    .write_u8(*respawn_time);
            }
            Self::ChatMessage {
                player_id,
                kind,
                message,
            } => {
                w.write_u8(*player_id)
                    .write_u8(kind.wire_value())
                    .write_string(message);
            }
            Self::MapStart { map_size } => {
                w.write_u32(*map_size);
            }
            Self::MapChunk(data) => {
                w.write_bytes(data);
            }
            Self::PlayerLeft { player_id }
            | Self::IntelPickup { player_id }
            | Self::Restock { player_id } => {
                w.write_u8(*player_id);
            }
            Self::TerritoryCapture {
                territory_id,
                winning,
                state,
            } => {
                w.write_u8(*territory_id)
                    .write_u8(*winning as u8)
                    .write_u8(*state);
            }
            Self::ProgressBar {
                territory_id,
                capturing_team,
                rate,
                progress,
            } => {
                w.write_u8(*territory_id)
                    .write_u8(*capturing_team)
                    .write_i8(*rate)
                    .write_f32(*progress);
            }
            Self::IntelCapture { player_id, winning } => {
                w.write_u8(*player_id).write_u8(*winning as u8);
            }
            Self::IntelDrop {
                player_id,
                position,
            } => {
                w.write_u8(*player_id).write_vec3(*position);
            }
            Self::FogColour(color) => {
                w.write_u8(0).write_color(*color);
            }
            Self::WeaponReload {
                player_id,
                clip,
                reserve,
            } => {
                w.write_u8(*player_id).write_u8(*clip).write_u8(*reserve);
            }
            Self::ChangeTeam { player_id, team } => {
                w.write_u8(*player_id).write_u8(*team);
            }
            Self::ChangeWeapon { player_id, weapon } => {
                w.write_u8(*player_id).write_u8(weapon.wire_value());
            }
            Self::HandShakeInit { challenge } => {
                w.write_u32(*challenge);
            }
            Self::VersionGet { property_ids } => {
                w.write_bytes(property_ids);
            }
            Self::ExtensionInfo(extensions) => {
                w.write_u8(extensions.len() as u8);
                for (id, version) in extensions {
                    w.write_u8(*id).write_u8(*version);
                }
            }
            Self::Unknown(_) => {}
        }
        w.finish()
    }
}

fn decode_world_update(
    r: &mut PacketReader<'_>,
    protocol: ProtocolVersion,
) -> NetResult<Vec<WorldUpdateEntry>> {
    let entry_len = protocol.world_update_entry_len();
    let count = r.remaining() / entry_len;
    let mut entries = Vec::with_capacity(count);

    for index in 0..count {
        let player_id = match protocol {
            ProtocolVersion::V075 => index as u8,
            ProtocolVersion::V076 => r.read_u8()?,
        };
        entries.push(WorldUpdateEntry {
            player_id,
            position: r.read_vec3()?,
            orientation: r.read_vec3()?,
        });
    }

    if r.remaining() != 0 {
        return Err(NetError::TruncatedPacket {
            tag: tag::WORLD_UPDATE,
            needed: entry_len,
            remaining: r.remaining(),
        });
    }
    Ok(entries)
}

fn decode_intel(r: &mut PacketReader<'_>, carried: bool) -> NetResult<IntelLocation> {
    if carried {
        let carrier = r.read_u8()?;
        r.read_bytes(CARRIER_PADDING)?;
        Ok(IntelLocation::Carried { carrier })
    } else {
        Ok(IntelLocation::Ground(r.read_vec3()?))
    }
}

fn decode_state_data(r: &mut PacketReader<'_>) -> NetResult<StateData> {
    let player_id = r.read_u8()?;
    let fog_color = r.read_color()?;
    let team_colors = [r.read_color()?, r.read_color()?];
    let team_names = [r.read_string(TEAM_NAME_LEN)?, r.read_string(TEAM_NAME_LEN)?];

    let mode = match r.read_u8()? {
        0 => {
            let scores = [r.read_u8()?, r.read_u8()?];
            let capture_limit = r.read_u8()?;
            let intel_flags = r.read_u8()?;
            // bit 0: team 0 holds team 1's intel, bit 1: the other way round
            let first = decode_intel(r, intel_flags & 2 != 0)?;
            let second = decode_intel(r, intel_flags & 1 != 0)?;
            let bases = [r.read_vec3()?, r.read_vec3()?];
            GameModeState::Ctf(CtfState {
                scores,
                capture_limit,
                intel: [first, second],
                bases,
            })
        }
        _ => {
            let count = r.read_u8()?;
            let mut territories = Vec::with_capacity(count as usize);
            for _ in 0..count {
                territories.push(TerritoryState {
                    position: r.read_vec3()?,
                    owner: r.read_u8()?,
                });
            }
            GameModeState::Tc(territories)
        }
    };

    Ok(StateData {
        player_id,
        fog_color,
        team_colors,
        team_names,
        mode,
    })
}

fn encode_intel(w: &mut PacketWriter, intel: &IntelLocation) {
    match intel {
        IntelLocation::Carried { carrier } => {
            w.write_u8(*carrier).write_bytes(&[0; CARRIER_PADDING]);
        }
        IntelLocation::Ground(position) => {
            w.write_vec3(*position);
        }
    }
}

fn encode_state_data(w: &mut PacketWriter, state: &StateData) {
    w.write_u8(state.player_id)
        .write_color(state.fog_color)
        .write_color(state.team_colors[0])
        .write_color(state.team_colors[1])
        .write_string_padded(&state.team_names[0], TEAM_NAME_LEN)
        .write_string_padded(&state.team_names[1], TEAM_NAME_LEN);

    match &state.mode {
        GameModeState::Ctf(ctf) => {
            let flags =
                (ctf.intel[1].is_carried() as u8) | ((ctf.intel[0].is_carried() as u8) << 1);
            w.write_u8(0)
                .write_u8(ctf.scores[0])
                .write_u8(ctf.scores[1])
                .write_u8(ctf.capture_limit)
                .write_u8(flags);
            encode_intel(w, &ctf.intel[0]);
            encode_intel(w, &ctf.intel[1]);
            w.write_vec3(ctf.bases[0]).write_vec3(ctf.bases[1]);
        }
        GameModeState::Tc(territories) => {
            w.write_u8(1).write_u8(territories.len() as u8);
            for territory in territories {
                w.write_vec3(territory.position).write_u8(territory.owner);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VersionProperty {
    ApplicationNameAndVersion {
        major: u8,
        minor: u8,
        revision: u8,
        name: String,
    },
    UserLocale(String),
    FeatureFlags(ClientFeatureFlags),
    /// Answered with an empty payload.
    Unrecognized(u8),
}

impl VersionProperty {
    pub fn id(&self) -> u8 {
        match self {
            Self::ApplicationNameAndVersion { .. } => 0,
            Self::UserLocale(_) => 1,
            Self::FeatureFlags(_) => 2,
            Self::Unrecognized(id) => *id,
        }
    }
}

/// Client to server messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    PositionData(Vec3),
    OrientationData(Vec3),
    InputData {
        player_id: u8,
        input: PlayerInput,
    },
    WeaponInput {
        player_id: u8,
        input: WeaponInput,
    },
    Hit {
        target: u8,
        kind: HitKind,
    },
    Grenade {
        player_id: u8,
        fuse: f32,
        position: Vec3,
        velocity: Vec3,
    },
    SetTool {
        player_id: u8,
        tool: Tool,
    },
    SetColour {
        player_id: u8,
        color: U8Vec3,
    },
    Join {
        team: u8,
        weapon: Weapon,
        kills: u32,
        color: U8Vec3,
        name: String,
    },
    BlockAction {
        player_id: u8,
        action: BlockActionKind,
        position: IVec3,
    },
    BlockLine {
        player_id: u8,
        start: IVec3,
        end: IVec3,
    },
    ChatMessage {
        player_id: u8,
        global: bool,
        message: String,
    },
    WeaponReload {
        player_id: u8,
        clip: u8,
        reserve: u8,
    },
    ChangeTeam {
        player_id: u8,
        team: u8,
    },
    ChangeWeapon {
        player_id: u8,
        weapon: Weapon,
    },
    HandShakeReturn {
        challenge: u32,
    },
    VersionSend {
        major: u8,
        minor: u8,
        revision: u8,
        version: String,
    },
    VersionEnhanced(Vec<VersionProperty>),
    ExtensionInfo(Vec<(u8, u8)>),
    MapCached {
        cached: bool,
    },
}

impl ClientPacket {
    pub fn tag(&self) -> u8 {
        match self {
            Self::PositionData(_) => tag::POSITION_DATA,
            Self::OrientationData(_) => tag::ORIENTATION_DATA,
            Self::InputData { .. } => tag::INPUT_DATA,
            Self::WeaponInput { .. } => tag::WEAPON_INPUT,
            Self::Hit { .. } => tag::HIT,
            Self::Grenade { .. } => tag::GRENADE,
            Self::SetTool { .. } => tag::SET_TOOL,
            Self::SetColour { .. } => tag::SET_COLOUR,
            Self::Join { .. } | Self::VersionEnhanced(_) => tag::EXISTING_PLAYER,
            Self::BlockAction { .. } => tag::BLOCK_ACTION,
            Self::BlockLine { .. } => tag::BLOCK_LINE,
            Self::ChatMessage { .. } => tag::CHAT_MESSAGE,
            Self::WeaponReload { .. } => tag::WEAPON_RELOAD,
            Self::ChangeTeam { .. } => tag::CHANGE_TEAM,
            Self::ChangeWeapon { .. } => tag::CHANGE_WEAPON,
            Self::HandShakeReturn { .. } => tag::HANDSHAKE_RETURN,
            Self::VersionSend { .. } => tag::VERSION_SEND,
            Self::ExtensionInfo(_) => tag::EXTENSION_INFO,
            Self::MapCached { .. } => tag::MAP_CACHED,
        }
    }

    pub fn encode(&self, format: WireFormat) -> NetResult<Vec<u8>> {
        let mut w = PacketWriter::new(self.tag()).with_unicode(format.unicode);
        match self {
            Self::PositionData(v) | Self::OrientationData(v) => {
                w.write_vec3(*v);
            }
            Self::InputData { player_id, input } => {
                w.write_u8(*player_id).write_u8(input.bits());
            }
            Self::WeaponInput { player_id, input } => {
                w.write_u8(*player_id).write_u8(input.bits());
            }
            Self::Hit { target, kind } => {
                w.write_u8(*target).write_u8(*kind as u8);
            }
            Self::Grenade {
                player_id,
                fuse,
                position,
                velocity,
            } => {
                w.write_u8(*player_id)
                    .write_f32(*fuse)
                    .write_vec3(*position)
                    .write_vec3(*velocity);
            }
            Self::SetTool { player_id, tool } => {
                w.write_u8(*player_id).write_u8(tool.wire_value());
            }
            Self::SetColour { player_id, color } => {
                w.write_u8(*player_id).write_color(*color);
            }
            Self::Join {
                team,
                weapon,
                kills,
                color,
                name,
            } => {
                // the server assigns the id; the tool always starts as the weapon
                w.write_u8(0)
                    .write_u8(*team)
                    .write_u8(weapon.wire_value())
                    .write_u8(Tool::Weapon.wire_value())
                    .write_u32(*kills)
                    .write_color(*color)
                    .write_string_padded(name, PLAYER_NAME_LEN);
            }
            Self::BlockAction {
                player_id,
                action,
                position,
            } => {
                w.write_u8(*player_id)
                    .write_u8(action.wire_value())
                    .write_ivec3(*position);
            }
            Self::BlockLine {
                player_id,
                start,
                end,
            } => {
                w.write_u8(*player_id).write_ivec3(*start).write_ivec3(*end);
            }
            Self::ChatMessage {
                player_id,
                global,
                message,
            } => {
                w.write_u8(*player_id)
                    .write_u8(if *global { 0 } else { 1 })
                    .write_string(message)
                    .write_u8(0);
            }
            Self::WeaponReload {
                player_id,
                clip,
                reserve,
            } => {
                w.write_u8(*player_id).write_u8(*clip).write_u8(*reserve);
            }
            Self::ChangeTeam { player_id, team } => {
                w.write_u8(*player_id).write_u8(*team);
            }
            Self::ChangeWeapon { player_id, weapon } => {
                w.write_u8(*player_id).write_u8(weapon.wire_value());
            }
            Self::HandShakeReturn { challenge } => {
                w.write_u32(*challenge);
            }
            Self::VersionSend {
                major,
                minor,
                revision,
                version,
            } => {
                w.write_u8(b'o')
                    .write_u8(*major)
                    .write_u8(*minor)
                    .write_u8(*revision)
                    .write_string(version);
            }
            Self::VersionEnhanced(properties) => {
                w.write_u8(b'x');
                for property in properties {
                    encode_version_property(&mut w, property)?;
                }
            }
            Self::ExtensionInfo(extensions) => {
                w.write_u8(extensions.len() as u8);
                for (id, version) in extensions {
                    w.write_u8(*id).write_u8(*version);
                }
            }
            Self::MapCached { cached } => {
                w.write_u8(*cached as u8);
            }
        }
        Ok(w.finish())
    }
}

fn encode_version_property(w: &mut PacketWriter, property: &VersionProperty) -> NetResult<()> {
    w.write_u8(property.id());
    let length_at = w.position();
    w.write_u8(0);
    let begin = w.position();

    match property {
        VersionProperty::ApplicationNameAndVersion {
            major,
            minor,
            revision,
            name,
        } => {
            w.write_u8(*major)
                .write_u8(*minor)
                .write_u8(*revision)
                .write_string(name);
        }
        VersionProperty::UserLocale(locale) => {
            w.write_string(locale);
        }
        VersionProperty::FeatureFlags(flags) => {
            w.write_u32(flags.bits());
        }
        VersionProperty::Unrecognized(_) => {}
    }

    let length = u8::try_from(w.position() - begin).map_err(|_| {
        NetError::violation(format!(
            "version property {} payload too long",
            property.id()
        ))
    })?;
    w.update_u8_at(length_at, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: ServerPacket, protocol: ProtocolVersion) {
        let bytes = packet.encode(WireFormat::new(protocol));
        let decoded = ServerPacket::decode(&bytes, protocol).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn fixed_shape_messages_round_trip() {
        let samples = vec![
            ServerPacket::PositionData(Some(Vec3::new(256.5, 128.0, 30.25))),
            ServerPacket::OrientationData(Vec3::new(0.0, 1.0, 0.0)),
            ServerPacket::InputData {
                player_id: 4,
                input: PlayerInput::JUMP | PlayerInput::SPRINT,
            },
            ServerPacket::WeaponInput {
                player_id: 4,
                input: WeaponInput::SECONDARY,
            },
            ServerPacket::SetHp {
                hp: 75,
                kind: HurtKind::Weapon,
                source: Vec3::new(1.0, 2.0, 3.0),
            },
            ServerPacket::Grenade {
                player_id: 2,
                fuse: 2.5,
                position: Vec3::new(10.0, 20.0, 30.0),
                velocity: Vec3::new(-1.0, 0.5, 0.0),
            },
            ServerPacket::SetTool {
                player_id: 1,
                tool: Tool::Grenade,
            },
            ServerPacket::SetColour {
                player_id: 1,
                color: U8Vec3::new(255, 128, 1),
            },
            ServerPacket::ExistingPlayer(ExistingPlayer {
                player_id: 7,
                team: 1,
                weapon: Weapon::Shotgun,
                tool: Tool::Block,
                kills: 12,
                color: U8Vec3::new(9, 8, 7),
                name: "Deuce".into(),
            }),
            ServerPacket::MoveObject {
                object_id: 2,
                state: 1,
                position: Vec3::new(100.0, 200.0, 50.0),
            },
            ServerPacket::CreatePlayer(CreatePlayer {
                player_id: 3,
                weapon: Weapon::Smg,
                team: 0,
                position: Vec3::new(64.0, 64.0, 10.0),
                name: "日本語".into(),
            }),
            ServerPacket::BlockAction {
                player_id: 3,
                action: BlockActionKind::Dig,
                position: IVec3::new(10, 20, 62),
            },
            ServerPacket::BlockLine {
                player_id: 3,
                start: IVec3::new(0, 0, 0),
                end: IVec3::new(5, 5, 5),
            },
            ServerPacket::KillAction {
                victim: 1,
                killer: 2,
                kind: KillKind::Headshot,
                respawn_time: 5,
            },
            ServerPacket::ChatMessage {
                player_id: 1,
                kind: ChatKind::Team,
                message: "hold the bridge".into(),
            },
            ServerPacket::MapStart { map_size: 1 << 20 },
            ServerPacket::MapChunk(vec![1, 2, 3, 4]),
            ServerPacket::PlayerLeft { player_id: 9 },
            ServerPacket::TerritoryCapture {
                territory_id: 3,
                winning: true,
                state: 1,
            },
            ServerPacket::ProgressBar {
                territory_id: 3,
                capturing_team: 0,
                rate: -2,
                progress: 0.5,
            },
            ServerPacket::IntelCapture {
                player_id: 5,
                winning: false,
            },
            ServerPacket::IntelPickup { player_id: 5 },
            ServerPacket::IntelDrop {
                player_id: 5,
                position: Vec3::new(1.0, 1.0, 1.0),
            },
            ServerPacket::Restock { player_id: 0 },
            ServerPacket::FogColour(U8Vec3::new(128, 232, 255)),
            ServerPacket::WeaponReload {
                player_id: 0,
                clip: 10,
                reserve: 50,
            },
            ServerPacket::ChangeTeam {
                player_id: 0,
                team: 2,
            },
            ServerPacket::ChangeWeapon {
                player_id: 0,
                weapon: Weapon::Rifle,
            },
            ServerPacket::HandShakeInit {
                challenge: 0x1234_5678,
            },
            ServerPacket::VersionGet {
                property_ids: vec![0, 1, 2],
            },
            ServerPacket::ExtensionInfo(vec![(0xC0, 1), (0x10, 2)]),
        ];

        for packet in samples {
            round_trip(packet, ProtocolVersion::V075);
        }
    }

    #[test]
    fn state_data_round_trip() {
        let base = StateData {
            player_id: 33,
            fog_color: U8Vec3::new(128, 232, 255),
            team_colors: [U8Vec3::new(0, 0, 255), U8Vec3::new(0, 255, 0)],
            team_names: ["Blue".into(), "Green".into()],
            mode: GameModeState::Ctf(CtfState {
                scores: [3, 1],
                capture_limit: 10,
                intel: [
                    IntelLocation::Carried { carrier: 12 },
                    IntelLocation::Ground(Vec3::new(400.0, 256.0, 60.0)),
                ],
                bases: [Vec3::new(100.0, 256.0, 60.0), Vec3::new(412.0, 256.0, 60.0)],
            }),
        };
        round_trip(ServerPacket::StateData(base.clone()), ProtocolVersion::V075);

        let tc = StateData {
            mode: GameModeState::Tc(vec![
                TerritoryState {
                    position: Vec3::new(1.0, 2.0, 3.0),
                    owner: 0,
                },
                TerritoryState {
                    position: Vec3::new(4.0, 5.0, 6.0),
                    owner: 2,
                },
            ]),
            ..base
        };
        round_trip(ServerPacket::StateData(tc), ProtocolVersion::V076);
    }

    #[test]
    fn ctf_intel_flags_follow_holders() {
        let state = CtfState {
            scores: [0, 0],
            capture_limit: 10,
            intel: [
                IntelLocation::Carried { carrier: 1 },
                IntelLocation::Ground(Vec3::ZERO),
            ],
            bases: [Vec3::ZERO; 2],
        };
        assert!(state.team_has_intel(1));
        assert!(!state.team_has_intel(0));
    }

    #[test]
    fn world_update_entry_width_depends_on_protocol() {
        let entries = vec![
            WorldUpdateEntry {
                player_id: 0,
                position: Vec3::new(1.0, 2.0, 3.0),
                orientation: Vec3::X,
            },
            WorldUpdateEntry {
                player_id: 1,
                position: Vec3::new(4.0, 5.0, 6.0),
                orientation: Vec3::Y,
            },
        ];
        let packet = ServerPacket::WorldUpdate(entries.clone());

        let v75 = packet.encode(WireFormat::new(ProtocolVersion::V075));
        assert_eq!(v75.len(), 1 + 2 * 24);
        round_trip(packet.clone(), ProtocolVersion::V075);

        let sparse = ServerPacket::WorldUpdate(vec![WorldUpdateEntry {
            player_id: 17,
            ..entries[0]
        }]);
        let v76 = sparse.encode(WireFormat::new(ProtocolVersion::V076));
        assert_eq!(v76.len(), 1 + 25);
        round_trip(sparse, ProtocolVersion::V076);
    }

    #[test]
    fn world_update_leftover_is_truncation() {
        let mut bytes = ServerPacket::WorldUpdate(vec![WorldUpdateEntry {
            player_id: 0,
            position: Vec3::ONE,
            orientation: Vec3::X,
        }])
        .encode(WireFormat::default());
        bytes.extend_from_slice(&[0, 0, 0]);

        let err = ServerPacket::decode(&bytes, ProtocolVersion::V075).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn short_position_is_none() {
        let bytes = [tag::POSITION_DATA, 0, 0, 0, 0];
        let decoded = ServerPacket::decode(&bytes, ProtocolVersion::V075).unwrap();
        assert_eq!(decoded, ServerPacket::PositionData(None));
    }

    #[test]
    fn truncated_payloads_fail_cleanly() {
        let full = ServerPacket::Grenade {
            player_id: 1,
            fuse: 3.0,
            position: Vec3::ONE,
            velocity: Vec3::ONE,
        }
        .encode(WireFormat::default());

        for len in 1..full.len() {
            let err = ServerPacket::decode(&full[..len], ProtocolVersion::V075).unwrap_err();
            assert!(err.is_truncation(), "length {len} gave {err:?}");
        }
    }

    #[test]
    fn invalid_enumerations_are_violations() {
        let bytes = [tag::SET_TOOL, 0, 9];
        assert!(matches!(
            ServerPacket::decode(&bytes, ProtocolVersion::V075),
            Err(NetError::ProtocolViolation(_))
        ));
        let bytes = [tag::KILL_ACTION, 0, 1, 7, 5];
        assert!(matches!(
            ServerPacket::decode(&bytes, ProtocolVersion::V075),
            Err(NetError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let decoded = ServerPacket::decode(&[200, 1, 2], ProtocolVersion::V075).unwrap();
        assert_eq!(decoded, ServerPacket::Unknown(200));
    }

    #[test]
    fn join_pads_name() {
        let bytes = ClientPacket::Join {
            team: 1,
            weapon: Weapon::Smg,
            kills: 0,
            color: U8Vec3::new(0, 255, 0),
            name: "Deuce".into(),
        }
        .encode(WireFormat::default())
        .unwrap();

        assert_eq!(bytes[0], tag::EXISTING_PLAYER);
        assert_eq!(bytes.len(), 1 + 4 + 4 + 3 + PLAYER_NAME_LEN);
        assert_eq!(&bytes[1..5], &[0, 1, 1, 2]);
        assert_eq!(&bytes[12..17], b"Deuce");
        assert!(bytes[17..].iter().all(|&b| b == 0));
    }

    #[test]
    fn chat_is_nul_terminated() {
        let bytes = ClientPacket::ChatMessage {
            player_id: 2,
            global: false,
            message: "gg".into(),
        }
        .encode(WireFormat::default())
        .unwrap();
        assert_eq!(bytes, vec![tag::CHAT_MESSAGE, 2, 1, b'g', b'g', 0]);
    }

    #[test]
    fn enhanced_version_patches_lengths() {
        let bytes = ClientPacket::VersionEnhanced(vec![
            VersionProperty::FeatureFlags(ClientFeatureFlags::SUPPORTS_UNICODE),
            VersionProperty::Unrecognized(42),
            VersionProperty::UserLocale("en_US".into()),
        ])
        .encode(WireFormat::default())
        .unwrap();

        assert_eq!(
            bytes,
            vec![
                tag::EXISTING_PLAYER,
                b'x',
                2,
                4,
                1,
                0,
                0,
                0,
                42,
                0,
                1,
                5,
                b'e',
                b'n',
                b'_',
                b'U',
                b'S',
            ]
        );
    }

    #[test]
    fn version_send_layout() {
        let bytes = ClientPacket::VersionSend {
            major: 0,
            minor: 1,
            revision: 5,
            version: "spadenet".into(),
        }
        .encode(WireFormat::default())
        .unwrap();
        assert_eq!(&bytes[..5], &[tag::VERSION_SEND, b'o', 0, 1, 5]);
        assert_eq!(&bytes[5..], b"spadenet");
    }
}
