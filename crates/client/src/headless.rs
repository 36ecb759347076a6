use std::collections::BTreeMap;

use glam::{U8Vec3, Vec3};

use spadenet::net::{
    ChatKind, CreatePlayer, ExistingPlayer, GameModeKind, KillKind, StateData, WorldUpdateEntry,
};
use spadenet::{FollowTarget, GameSession, MapData, NetResult};

#[derive(Debug, Clone)]
struct Player {
    name: String,
    team: u8,
    kills: u32,
}

/// Keeps the minimum world state the session needs and logs what happens in it.
#[derive(Default)]
pub struct HeadlessGame {
    map_len: Option<usize>,
    players: BTreeMap<u8, Player>,
    local: Option<u8>,
    mode: Option<GameModeKind>,
    team_names: [String; 2],
    team_colors: [U8Vec3; 2],
    follow: Option<FollowTarget>,
    world_updates: u64,
}

impl HeadlessGame {
    pub fn world_updates(&self) -> u64 {
        self.world_updates
    }

    fn name_of(&self, player_id: u8) -> &str {
        self.players
            .get(&player_id)
            .map(|p| p.name.as_str())
            .unwrap_or("?")
    }

    fn team_name(&self, team: u8) -> &str {
        match team {
            0 | 1 => &self.team_names[team as usize],
            _ => "Spectator",
        }
    }
}

impl GameSession for HeadlessGame {
    fn create_world(&mut self, map: MapData) -> NetResult<()> {
        log::info!("World loaded ({} bytes of map data)", map.bytes.len());
        self.map_len = Some(map.bytes.len());
        Ok(())
    }

    fn destroy_world(&mut self) {
        self.map_len = None;
        self.players.clear();
        self.local = None;
        self.mode = None;
    }

    fn has_world(&self) -> bool {
        self.map_len.is_some()
    }

    fn player_exists(&self, player_id: u8) -> bool {
        self.players.contains_key(&player_id)
    }

    fn local_player_id(&self) -> Option<u8> {
        self.local
    }

    fn game_mode(&self) -> Option<GameModeKind> {
        self.mode
    }

    fn team_color(&self, team: u8) -> U8Vec3 {
        match team {
            0 | 1 => self.team_colors[team as usize],
            _ => U8Vec3::ZERO,
        }
    }

    fn follow_target(&self) -> Option<FollowTarget> {
        self.follow
    }

    fn restore_follow(&mut self, target: FollowTarget) {
        self.follow = Some(target);
    }

    fn world_update(&mut self, _entries: &[WorldUpdateEntry]) {
        self.world_updates += 1;
    }

    fn existing_player(&mut self, player: &ExistingPlayer, _last_position: Vec3) {
        self.players.insert(
            player.player_id,
            Player {
                name: player.name.clone(),
                team: player.team,
                kills: player.kills,
            },
        );
        log::debug!("{} is on {}", player.name, self.team_name(player.team));
    }

    fn create_player(&mut self, player: &CreatePlayer) {
        let kills = self
            .players
            .get(&player.player_id)
            .map(|p| p.kills)
            .unwrap_or_default();
        self.players.insert(
            player.player_id,
            Player {
                name: player.name.clone(),
                team: player.team,
                kills,
            },
        );
    }

    fn apply_state(&mut self, state: &StateData) {
        self.local = Some(state.player_id);
        self.mode = Some(state.mode.kind());
        self.team_names = state.team_names.clone();
        self.team_colors = state.team_colors;
    }

    fn joined_game(&mut self) {
        log::info!(
            "Joined a {:?} game: {} vs {}",
            self.mode,
            self.team_names[0],
            self.team_names[1]
        );
    }

    fn player_killed(&mut self, victim: u8, killer: u8, kind: KillKind, respawn_time: u8) {
        if victim != killer {
            if let Some(player) = self.players.get_mut(&killer) {
                player.kills += 1;
            }
        }
        log::info!(
            "{} killed {} ({:?}), respawn in {}s",
            self.name_of(killer),
            self.name_of(victim),
            kind,
            respawn_time
        );
    }

    fn chat_message(&mut self, sender: Option<u8>, kind: ChatKind, text: &str) {
        match sender {
            Some(id) => log::info!("[{:?}] {}: {}", kind, self.name_of(id), text),
            None => log::info!("[{:?}] {}", kind, text),
        }
    }

    fn player_left(&mut self, player_id: u8) {
        if let Some(player) = self.players.remove(&player_id) {
            log::info!("{} left ({} kills)", player.name, player.kills);
        }
    }

    fn team_changed(&mut self, player_id: u8, team: u8) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.team = team;
        }
        log::info!("{} joined {}", self.name_of(player_id), self.team_name(team));
    }

    fn territory_captured(&mut self, territory: u8, team: u8, winning: bool) {
        log::info!("{} captured territory {}", self.team_name(team), territory);
        if winning {
            log::info!("{} wins the round", self.team_name(team));
        }
    }

    fn intel_captured(&mut self, player_id: u8, winning: bool) {
        log::info!("{} captured the intel", self.name_of(player_id));
        if winning {
            let team = self.players.get(&player_id).map(|p| p.team).unwrap_or(255);
            log::info!("{} wins the round", self.team_name(team));
        }
    }
}
