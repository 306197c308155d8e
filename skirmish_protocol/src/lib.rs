// skirmish_protocol: wire vocabulary for lockstep multiplayer.
//
// This crate defines the IDs, actions, setup messages and framing exchanged
// by every participant in a game (`skirmish_net` drives them over TCP). It has
// no networking of its own and no dependency on game logic.
//
// Module overview:
// - `ids.rs`:       ID newtypes over the flat ID partition (players 100-199,
//                   teams 200-299, entities 300+) and the signed `Tick`.
// - `action.rs`:    `PlayerAction` (ORDER / DONE / CHAT / LEAVE_GAME) and the
//                   `Order` payload, with per-kind validation.
// - `message.rs`:   `LobbyMessage` (HELLO / REJECTED / GAME_DEF / HANDSHAKE),
//                   `GameDefinition`, and the `Packet` union of both.
// - `framing.rs`:   4-byte big-endian length prefix, then JSON payload.
// - `checksum.rs`:  CRC32 state checksums and their hex wire form.
//
// Design decisions:
// - **JSON serialization.** Every message is a JSON object with a `type` tag,
//   so captures stay human-readable.
// - **Closed unions.** Decoding happens once at the transport boundary; code
//   past that point matches on enums and never inspects raw JSON.

pub mod action;
pub mod checksum;
pub mod framing;
pub mod ids;
pub mod message;

pub use action::{MalformedAction, Order, OrderType, PlayerAction};
pub use checksum::{StateHasher, checksum_bytes, checksum_to_string};
pub use framing::{
    FrameError, FrameRead, MAX_MESSAGE_SIZE, decode_json, encode_frame, encode_json, read_frame,
    write_message,
};
pub use ids::{Color, EntityId, PlayerId, TeamId, Tick};
pub use message::{GameDefinition, LobbyMessage, MapDef, Packet, PlayerDef};
