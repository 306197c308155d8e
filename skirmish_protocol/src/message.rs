// Setup messages and the packet union carried by framed connections.
//
// Two vocabularies share one connection:
// - `PlayerAction` (see `action.rs`) once the game is running.
// - `LobbyMessage` during matchmaking: the client HELLO, the server's
//   REJECTED or personalized GAME_DEF, and the symmetric HANDSHAKE used by
//   direct two-player games.
//
// Both are internally tagged on `type` and the tag sets are disjoint, so
// `Packet` decodes either one without an extra envelope on the wire.
//
// `GameDefinition` is broadcast once per recipient; the copies differ only in
// `local_player_id`.

use serde::{Deserialize, Serialize};

use crate::action::PlayerAction;
use crate::ids::{Color, PlayerId, TeamId};

/// Input delay used when a game definition omits `tick_offset`.
pub const DEFAULT_TICK_OFFSET: i64 = 2;

/// Messages exchanged before the simulation starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyMessage {
    /// Client → lobby: who I am and what I run.
    Hello {
        version: String,
        name: String,
        color: Color,
        #[serde(default)]
        params_checksum: Option<u32>,
    },
    /// Lobby → client: the join was refused. `version` is the lobby's own.
    Rejected { reason: String, version: String },
    /// Lobby → client: everything needed to build the local simulation.
    GameDef(GameDefinition),
    /// Peer ↔ peer in direct games: my identity and version.
    Handshake {
        version: String,
        params_checksum: u32,
        pid: PlayerId,
        tid: TeamId,
        name: String,
        color: Color,
    },
}

/// Identity and starting resources of one participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerDef {
    pub name: String,
    pub color: Color,
    pub pid: PlayerId,
    pub tid: TeamId,
    #[serde(default)]
    pub starting_requisition: f32,
    #[serde(default)]
    pub starting_power: f32,
    /// Scripted filler player; every participant simulates it locally.
    #[serde(default)]
    pub dummy: bool,
}

/// Map description. Only `name` and `max_players` are interpreted here; every
/// other key is carried through untouched for the game-logic collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapDef {
    pub name: String,
    #[serde(default)]
    pub max_players: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MapDef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_players: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// The shared game definition, personalized per recipient.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameDefinition {
    pub player_defs: Vec<PlayerDef>,
    pub map_def: MapDef,
    pub vps_to_win: f32,
    pub local_player_id: PlayerId,
    #[serde(default = "default_tick_offset")]
    pub tick_offset: i64,
}

fn default_tick_offset() -> i64 {
    DEFAULT_TICK_OFFSET
}

impl GameDefinition {
    pub fn local_player(&self) -> Option<&PlayerDef> {
        self.player_defs
            .iter()
            .find(|def| def.pid == self.local_player_id)
    }

    /// The same definition addressed to `pid`.
    pub fn personalized(&self, pid: PlayerId) -> GameDefinition {
        GameDefinition {
            local_player_id: pid,
            ..self.clone()
        }
    }
}

/// Anything that can arrive on a framed connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Packet {
    Action(PlayerAction),
    Lobby(LobbyMessage),
}

impl From<PlayerAction> for Packet {
    fn from(action: PlayerAction) -> Self {
        Packet::Action(action)
    }
}

impl From<LobbyMessage> for Packet {
    fn from(message: LobbyMessage) -> Self {
        Packet::Lobby(message)
    }
}
