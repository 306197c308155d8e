// Core ID types for the multiplayer protocol.
//
// The ID space is one flat partition shared by everything that can be named
// in a game:
//
//   0        null (no player / no team / no entity)
//   1        the game itself
//   2        the map
//   3-99     unused
//   100-199  players
//   200-299  teams
//   300+     entities
//
// Newtypes keep the ranges from being mixed up at compile time, and the
// `new` constructors enforce the range at runtime. Serialization is the bare
// integer so the JSON wire shape stays `"pid": 100`.
//
// `Tick` is signed: the lockstep driver runs a short preroll at negative
// ticks before tick 0 (see `skirmish_net::lockstep`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Null ID, shared by all three ranges.
pub const NULL_ID: u64 = 0;
/// Special ID naming the game as an actor.
pub const GAME_ID: u64 = 1;
/// Special ID naming the map as an actor.
pub const MAP_ID: u64 = 2;

pub const STARTING_PID: u64 = 100;
pub const STARTING_TID: u64 = 200;
pub const STARTING_EID: u64 = 300;

/// Number of player slots in the ID range.
pub const MAX_PLAYERS: usize = (STARTING_TID - STARTING_PID) as usize;

/// Returned when a raw integer falls outside the range for its ID kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{value} is not a valid {kind} id")]
pub struct IdRangeError {
    pub kind: &'static str,
    pub value: u64,
}

/// Player ID in `100..200`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl PlayerId {
    /// Sentinel for "no player", used before identity is assigned.
    pub const NONE: PlayerId = PlayerId(NULL_ID);

    pub fn new(value: u64) -> Result<Self, IdRangeError> {
        if (STARTING_PID..STARTING_TID).contains(&value) {
            Ok(Self(value))
        } else {
            Err(IdRangeError {
                kind: "player",
                value,
            })
        }
    }

    /// The `index`-th player ID (0-based).
    pub fn nth(index: usize) -> Result<Self, IdRangeError> {
        Self::new(STARTING_PID + index as u64)
    }

    pub fn is_valid(self) -> bool {
        (STARTING_PID..STARTING_TID).contains(&self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Team ID in `200..300`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub u64);

impl TeamId {
    pub fn new(value: u64) -> Result<Self, IdRangeError> {
        if (STARTING_TID..STARTING_EID).contains(&value) {
            Ok(Self(value))
        } else {
            Err(IdRangeError {
                kind: "team",
                value,
            })
        }
    }

    /// The `index`-th team ID (0-based).
    pub fn nth(index: usize) -> Result<Self, IdRangeError> {
        Self::new(STARTING_TID + index as u64)
    }

    pub fn is_valid(self) -> bool {
        (STARTING_TID..STARTING_EID).contains(&self.0)
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Entity ID, `300` and up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn new(value: u64) -> Result<Self, IdRangeError> {
        if value >= STARTING_EID {
            Ok(Self(value))
        } else {
            Err(IdRangeError {
                kind: "entity",
                value,
            })
        }
    }
}

/// One discrete simulation step. Negative during the synchronization preroll.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Tick(pub i64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub fn next(self) -> Tick {
        Tick(self.0 + 1)
    }

    pub fn offset(self, delta: i64) -> Tick {
        Tick(self.0 + delta)
    }

    pub fn is_preroll(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RGB color in `0.0..=1.0`, serialized as a three-element array.
pub type Color = [f32; 3];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn partition_boundaries() {
        assert!(PlayerId::new(99).is_err());
        assert!(PlayerId::new(100).is_ok());
        assert!(PlayerId::new(199).is_ok());
        assert!(PlayerId::new(200).is_err());
        assert!(TeamId::new(199).is_err());
        assert!(TeamId::new(200).is_ok());
        assert!(TeamId::new(299).is_ok());
        assert!(TeamId::new(300).is_err());
        assert!(EntityId::new(299).is_err());
        assert!(EntityId::new(300).is_ok());
        assert!(!PlayerId::NONE.is_valid());
    }

    #[test]
    fn ids_serialize_as_bare_integers() {
        let json = serde_json::to_string(&PlayerId(104)).unwrap();
        assert_eq!(json, "104");
        let tick: Tick = serde_json::from_str("-2").unwrap();
        assert_eq!(tick, Tick(-2));
        assert!(tick.is_preroll());
    }

    #[test]
    fn range_error_names_the_kind() {
        let err = TeamId::new(7).unwrap_err();
        assert_eq!(err.to_string(), "7 is not a valid team id");
    }

    proptest! {
        #[test]
        fn nth_ids_stay_in_their_ranges(i in 0usize..100) {
            let p = PlayerId::nth(i).unwrap();
            let t = TeamId::nth(i).unwrap();
            prop_assert!((100..200).contains(&p.0));
            prop_assert!((200..300).contains(&t.0));
        }

        #[test]
        fn nth_past_the_range_is_rejected(i in 100usize..1000) {
            prop_assert!(PlayerId::nth(i).is_err());
            prop_assert!(TeamId::nth(i).is_err());
        }
    }
}
