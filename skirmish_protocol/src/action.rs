// Player actions: the per-tick input every participant contributes.
//
// `PlayerAction` is a closed union tagged on the wire by a `type` field:
//
//   {"type":"ORDER","pid":100,"tick":7,"order":{"order_type":"MOVE",...}}
//   {"type":"DONE","pid":100,"tick":7,"checksum":"1A2B3C4D"}
//   {"type":"CHAT","pid":100,"tick":7,"chat":"gl hf"}
//   {"type":"LEAVE_GAME","pid":100}
//
// Serde enforces the presence of every structural field when a frame is
// decoded. Order payloads have per-kind requirements that serde alone cannot
// express (a MOVE needs a target, a CAPTURE needs an enemy), so `validate`
// checks those; the lockstep driver calls it before dispatching an order.
//
// Each active player ends its input for a tick with exactly one terminal
// action (DONE or LEAVE_GAME). Everything it sent before that terminal action
// belongs to the same tick.

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, PlayerId, Tick};

/// A single action submitted by a player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerAction {
    /// A unit order, dispatched into game logic.
    Order {
        pid: PlayerId,
        tick: Tick,
        order: Order,
    },
    /// End of this player's input for `tick`. `checksum` is the sender's
    /// state checksum `tick_offset` ticks earlier, as uppercase hex.
    Done {
        pid: PlayerId,
        tick: Tick,
        checksum: String,
    },
    /// Chat text, delivered verbatim to every player.
    Chat {
        pid: PlayerId,
        tick: Tick,
        chat: String,
    },
    /// The player is leaving. Terminal for whatever tick it lands in.
    LeaveGame { pid: PlayerId },
}

impl PlayerAction {
    /// The originating player.
    pub fn pid(&self) -> PlayerId {
        match self {
            PlayerAction::Order { pid, .. }
            | PlayerAction::Done { pid, .. }
            | PlayerAction::Chat { pid, .. }
            | PlayerAction::LeaveGame { pid } => *pid,
        }
    }

    /// The tick this action applies to. `LEAVE_GAME` applies to whichever
    /// tick it is drained in.
    pub fn tick(&self) -> Option<Tick> {
        match self {
            PlayerAction::Order { tick, .. }
            | PlayerAction::Done { tick, .. }
            | PlayerAction::Chat { tick, .. } => Some(*tick),
            PlayerAction::LeaveGame { .. } => None,
        }
    }

    /// True for DONE and LEAVE_GAME, the actions that close a tick.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayerAction::Done { .. } | PlayerAction::LeaveGame { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlayerAction::Order { .. } => "ORDER",
            PlayerAction::Done { .. } => "DONE",
            PlayerAction::Chat { .. } => "CHAT",
            PlayerAction::LeaveGame { .. } => "LEAVE_GAME",
        }
    }

    /// Check the per-kind requirements serde cannot express.
    pub fn validate(&self) -> Result<(), MalformedAction> {
        if !self.pid().is_valid() {
            return Err(MalformedAction::new(self.kind(), "pid outside player range"));
        }
        match self {
            PlayerAction::Order { order, .. } => order.validate(),
            PlayerAction::Done { checksum, .. } if checksum.is_empty() => {
                Err(MalformedAction::new("DONE", "empty checksum"))
            }
            _ => Ok(()),
        }
    }
}

/// Kinds of unit order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Move,
    Attack,
    Capture,
    Stop,
    /// Production / special ability; names what to produce in `prod`.
    Action,
}

/// Order payload carried by `PlayerAction::Order`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_type: OrderType,
    /// Entities the order is given to.
    #[serde(default)]
    pub entity: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enemy_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prod: Option<String>,
}

impl Order {
    pub fn new(order_type: OrderType, entity: Vec<EntityId>) -> Self {
        Self {
            order_type,
            entity,
            target: None,
            enemy_id: None,
            prod: None,
        }
    }

    pub fn with_target(mut self, target: [f32; 3]) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_enemy(mut self, enemy: EntityId) -> Self {
        self.enemy_id = Some(enemy);
        self
    }

    pub fn with_prod(mut self, prod: impl Into<String>) -> Self {
        self.prod = Some(prod.into());
        self
    }

    pub fn validate(&self) -> Result<(), MalformedAction> {
        if self.entity.is_empty() {
            return Err(MalformedAction::new("ORDER", "no entities"));
        }
        match self.order_type {
            OrderType::Move if self.target.is_none() => {
                Err(MalformedAction::new("MOVE", "missing target"))
            }
            OrderType::Attack if self.target.is_none() && self.enemy_id.is_none() => {
                Err(MalformedAction::new("ATTACK", "missing target and enemy_id"))
            }
            OrderType::Capture if self.enemy_id.is_none() => {
                Err(MalformedAction::new("CAPTURE", "missing enemy_id"))
            }
            OrderType::Action if self.prod.as_deref().is_none_or(str::is_empty) => {
                Err(MalformedAction::new("ACTION", "missing prod"))
            }
            _ => Ok(()),
        }
    }
}

/// An action that is structurally valid JSON but misses a field its kind
/// requires.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("malformed {kind} action: {reason}")]
pub struct MalformedAction {
    pub kind: &'static str,
    pub reason: &'static str,
}

impl MalformedAction {
    fn new(kind: &'static str, reason: &'static str) -> Self {
        Self { kind, reason }
    }
}
