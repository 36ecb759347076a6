use glam::{IVec3, U8Vec3, Vec3};

use crate::error::NetResult;
use crate::net::map_transfer::MapData;
use crate::net::packet::{
    BlockActionKind, ChatKind, CreatePlayer, ExistingPlayer, GameModeKind, HurtKind, KillKind,
    PlayerInput, StateData, Tool, Weapon, WeaponInput, WorldUpdateEntry,
};
use crate::net::protocol::MAX_PLAYER_SLOTS;

/// Camera follow state remembered across demo seeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowTarget {
    pub player_id: u8,
    pub first_person: bool,
}

/// The world the session core drives. Only a handful of read-backs are required; every
/// event has a no-op default so hosts implement what they render.
pub trait GameSession {
    fn create_world(&mut self, map: MapData) -> NetResult<()>;
    fn destroy_world(&mut self);
    fn has_world(&self) -> bool;

    fn player_slots(&self) -> usize {
        MAX_PLAYER_SLOTS
    }
    fn player_exists(&self, player_id: u8) -> bool;
    fn local_player_id(&self) -> Option<u8>;
    fn game_mode(&self) -> Option<GameModeKind>;
    fn territory_count(&self) -> usize {
        0
    }
    fn team_color(&self, _team: u8) -> U8Vec3 {
        U8Vec3::ZERO
    }
    fn player_block_color(&self, _player_id: u8) -> Option<U8Vec3> {
        None
    }
    fn follow_target(&self) -> Option<FollowTarget> {
        None
    }
    fn restore_follow(&mut self, _target: FollowTarget) {}

    fn world_update(&mut self, _entries: &[WorldUpdateEntry]) {}
    fn set_local_position(&mut self, _position: Vec3) {}
    fn set_local_orientation(&mut self, _orientation: Vec3) {}
    fn player_input(&mut self, _player_id: u8, _input: PlayerInput) {}
    /// Server-side jump echo for the local player (used by fly commands).
    fn local_jump(&mut self) {}
    fn weapon_input(&mut self, _player_id: u8, _input: WeaponInput) {}
    fn set_health(&mut self, _hp: u8, _kind: HurtKind, _source: Vec3) {}
    fn spawn_grenade(&mut self, _fuse: f32, _position: Vec3, _velocity: Vec3) {}
    fn set_tool(&mut self, _player_id: u8, _tool: Tool) {}
    fn set_block_color(&mut self, _player_id: u8, _color: U8Vec3) {}
    fn existing_player(&mut self, _player: &ExistingPlayer, _last_position: Vec3) {}
    fn set_flag_position(&mut self, _team: u8, _position: Vec3) {}
    fn set_base_position(&mut self, _team: u8, _position: Vec3) {}
    fn set_territory(&mut self, _territory: u8, _position: Vec3, _owner: u8) {}
    /// `player.position` is already lowered to the eye height the world expects.
    fn create_player(&mut self, _player: &CreatePlayer) {}
    fn local_player_created(&mut self) {}
    fn player_joined_team(&mut self, _player_id: u8, _team: u8) {}
    fn player_spawned(&mut self, _player_id: u8) {}
    fn create_block(&mut self, _position: IVec3, _color: U8Vec3, _builder: Option<u8>) {}
    fn destroy_blocks(&mut self, _cells: &[IVec3], _cause: BlockActionKind, _by: Option<u8>) {}
    fn build_line(&mut self, _start: IVec3, _end: IVec3, _color: U8Vec3, _builder: Option<u8>) {}
    fn apply_state(&mut self, _state: &StateData) {}
    fn joined_game(&mut self) {}
    fn player_killed(&mut self, _victim: u8, _killer: u8, _kind: KillKind, _respawn_time: u8) {}
    fn chat_message(&mut self, _sender: Option<u8>, _kind: ChatKind, _text: &str) {}
    fn player_left(&mut self, _player_id: u8) {}
    fn territory_captured(&mut self, _territory: u8, _team: u8, _winning: bool) {}
    fn territory_progress(
        &mut self,
        _territory: u8,
        _capturing_team: u8,
        _rate: i8,
        _progress: f32,
    ) {
    }
    fn intel_captured(&mut self, _player_id: u8, _winning: bool) {}
    fn intel_picked_up(&mut self, _player_id: u8) {}
    fn intel_dropped(&mut self, _player_id: u8, _position: Vec3) {}
    fn restock(&mut self) {}
    fn set_fog_color(&mut self, _color: U8Vec3) {}
    fn reload_started(&mut self, _player_id: u8) {}
    fn reload_done(&mut self, _clip: u8, _reserve: u8) {}
    fn team_changed(&mut self, _player_id: u8, _team: u8) {}
    fn weapon_changed(&mut self, _player_id: u8, _weapon: Weapon) {}
}
