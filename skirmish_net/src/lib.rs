// skirmish_net: lockstep networking core for Skirmish.
//
// Every machine in a game runs the same deterministic simulation. This crate
// makes sure they all feed it the same player actions in the same order, one
// tick at a time, and notices when their states diverge. It also provides
// the sockets, the lobby that assembles a game, and the relay that carries
// actions between lobby clients.
//
// Module overview:
// - `socket.rs`:     TCP sockets over `libc` (connect, non-blocking connect,
//                    listen with backlog and address reuse, accept, send,
//                    recv, pending-error query).
// - `poll.rs`:       `poll(2)` readiness over a token-tagged socket set with
//                    a shrinking timeout budget.
// - `connection.rs`: `FramedConnection`, a peer with a background reader
//                    thread and a packet inbox; synthesizes LEAVE_GAME when
//                    the peer disappears.
// - `player.rs`:     the `Player` trait and its local, dummy and networked
//                    implementations.
// - `lockstep.rs`:   `LockstepDriver`, the `Simulation` trait the game
//                    implements, and the checksum history used for desync
//                    detection.
// - `lobby.rs`:      lobby server: HELLO admission, ID assignment, GAME_DEF.
// - `relay.rs`:      forwards actions between lobby clients.
// - `matchmaker.rs`: client side of setup (lobby join, direct two-player
//                    handshake, single player) producing a player roster.
// - `config.rs`:     JSON params file, map files, derived runtime configs.
//
// Dependencies: `skirmish_protocol` (IDs, actions, messages, framing). No
// dependency on game logic; the game plugs in through `Simulation`.
//
// The lobby and relay also run as a standalone binary (`main.rs`).

pub mod config;
pub mod connection;
pub mod lobby;
pub mod lockstep;
pub mod matchmaker;
pub mod player;
pub mod poll;
pub mod relay;
pub mod socket;

pub use config::{ConfigError, Params, load_map};
pub use connection::{ConnectionError, FramedConnection};
pub use lobby::{HostedGame, Lobby, LobbyConfig};
pub use lockstep::{
    ChecksumHistory, EndReason, GameOutcome, LockstepConfig, LockstepDriver, LockstepError,
    Simulation, TickStatus, run_lockstep_loop,
};
pub use matchmaker::{
    ClientConfig, DirectHost, GameSetup, JoinedGame, SetupError, connect_to_lobby, direct_join,
    single_player_setup,
};
pub use player::{DummyPlayer, LocalInput, LocalPlayer, NetPlayer, Player, PlayerIdentity};
pub use relay::{RelayConfig, RelayHandle, RelayStats, start_relay};
