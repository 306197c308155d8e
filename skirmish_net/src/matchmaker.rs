// Client-side game setup: joining a lobby, direct two-player games, and
// single-player games.
//
// Three ways to end up with a roster of `Player`s for the lockstep driver:
//
// - **Lobby** (`connect_to_lobby` then `GameSetup::from_game_def`): connect
//   to a lobby with retries, send HELLO, wait for GAME_DEF (or REJECTED).
//   The roster is built from the definition: `LocalPlayer` for
//   `local_player_id`, a `NetPlayer` per other human (all sharing the one
//   lobby connection, the first of them forwarding local actions), and a
//   `DummyPlayer` per dummy definition.
// - **Direct** (`DirectHost::bind` + `accept`, or `direct_join`): one peer
//   listens, the other connects, and both send a HANDSHAKE. Version, params
//   checksum and identity fields are validated on both sides. The host plays
//   as player 100 on team 200, the joiner as 101 on team 201.
// - **Single player** (`single_player_setup`): local player plus one dummy,
//   no sockets at all.
//
// Everything here runs on the calling thread and blocks; the resulting
// connections have their own reader threads (see `connection.rs`).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use skirmish_protocol::ids::{STARTING_PID, STARTING_TID};
use skirmish_protocol::{Color, GameDefinition, LobbyMessage, Packet, PlayerId, TeamId};

use crate::config::ConfigError;
use crate::connection::{ConnectionError, FramedConnection};
use crate::lockstep::LockstepConfig;
use crate::player::{DummyPlayer, LocalInput, LocalPlayer, NetPlayer, Player, PlayerIdentity};
use crate::socket::{Listener, Socket, SocketError};

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("could not connect to {addr} after {attempts} attempts")]
    ConnectFailed {
        addr: String,
        attempts: u32,
        #[source]
        source: SocketError,
    },
    #[error("version mismatch: we run {ours}, peer runs {theirs}")]
    VersionMismatch { ours: String, theirs: String },
    #[error("params mismatch: ours {ours:08X}, peer {theirs:08X}")]
    ParamsMismatch { ours: u32, theirs: u32 },
    #[error("rejected by lobby: {reason}")]
    Rejected { reason: String },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("{requested} players requested but at most {max} fit")]
    TooManyPlayers { requested: usize, max: usize },
    #[error("unexpected message during setup: {0}")]
    UnexpectedMessage(String),
    #[error("connection closed during setup")]
    Closed,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Identity and network knobs for the local side of a setup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub name: String,
    pub color: Color,
    pub version: String,
    pub params_checksum: u32,
    pub connect_attempts: u32,
    pub connect_interval: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// `None` waits for the lobby to fill indefinitely.
    pub game_def_timeout: Option<Duration>,
    pub backlog: i32,
    pub tick_offset: i64,
    pub dummy_color: Color,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "player".into(),
            color: [1.0, 1.0, 1.0],
            version: "1.0".into(),
            params_checksum: 0,
            connect_attempts: 10,
            connect_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            game_def_timeout: None,
            backlog: 11,
            tick_offset: crate::lockstep::DEFAULT_TICK_OFFSET,
            dummy_color: [0.5, 0.5, 0.5],
        }
    }
}

/// Connect to `host:port`, retrying up to `config.connect_attempts` times.
pub fn attempt_connection(host: &str, port: u16, config: &ClientConfig) -> Result<Socket, SetupError> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match Socket::connect_timeout(host, port, config.connect_timeout) {
            Ok(socket) => {
                debug!("connected to {host}:{port} on attempt {attempt}");
                return Ok(socket);
            }
            Err(source) if attempt >= attempts || matches!(source, SocketError::Resolve { .. }) => {
                return Err(SetupError::ConnectFailed {
                    addr: format!("{host}:{port}"),
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                debug!("connect attempt {attempt} to {host}:{port} failed: {e}");
                thread::sleep(config.connect_interval);
            }
        }
    }
}

/// Result of joining a lobby.
#[derive(Debug)]
pub struct JoinedGame {
    pub game_def: GameDefinition,
    pub connection: Arc<FramedConnection>,
}

/// Join the lobby at `host:port` and wait for the game definition.
pub fn connect_to_lobby(host: &str, port: u16, config: &ClientConfig) -> Result<JoinedGame, SetupError> {
    let socket = attempt_connection(host, port, config)?;
    let connection = FramedConnection::new(socket)?;
    connection.send_packet(&LobbyMessage::Hello {
        version: config.version.clone(),
        name: config.name.clone(),
        color: config.color,
        params_checksum: Some(config.params_checksum),
    })?;
    info!("sent HELLO to {host}:{port}; waiting for the game definition");

    let reply = match config.game_def_timeout {
        Some(timeout) => connection.read_next_timeout(timeout),
        None => connection.read_next(),
    };
    match reply {
        Ok(Packet::Lobby(LobbyMessage::GameDef(game_def))) => {
            if game_def.local_player().is_none() {
                return Err(SetupError::Handshake(format!(
                    "game definition does not list our player {}",
                    game_def.local_player_id
                )));
            }
            info!(
                "joined as {} with {} players on {}",
                game_def.local_player_id,
                game_def.player_defs.len(),
                game_def.map_def.name
            );
            Ok(JoinedGame {
                game_def,
                connection: Arc::new(connection),
            })
        }
        Ok(Packet::Lobby(LobbyMessage::Rejected { reason, version })) => {
            if version != config.version {
                Err(SetupError::VersionMismatch {
                    ours: config.version.clone(),
                    theirs: version,
                })
            } else {
                Err(SetupError::Rejected { reason })
            }
        }
        Ok(other) => Err(SetupError::UnexpectedMessage(format!("{other:?}"))),
        Err(ConnectionError::Stopped) => Err(SetupError::Closed),
        Err(e) => Err(e.into()),
    }
}

/// A roster ready for `LockstepDriver::new`, plus the local input handle.
pub struct GameSetup {
    pub players: Vec<Box<dyn Player>>,
    pub input: LocalInput,
    pub local_player_id: PlayerId,
    pub tick_offset: i64,
    pub vps_to_win: Option<f32>,
}

impl GameSetup {
    /// Build the roster for a lobby game.
    pub fn from_game_def(
        game_def: &GameDefinition,
        connection: Arc<FramedConnection>,
    ) -> Result<GameSetup, SetupError> {
        let local_def = game_def.local_player().ok_or_else(|| {
            SetupError::Handshake(format!(
                "local player {} is not in the game definition",
                game_def.local_player_id
            ))
        })?;
        let local = LocalPlayer::new(PlayerIdentity::from(local_def), game_def.tick_offset);
        let input = local.input();

        let mut players: Vec<Box<dyn Player>> = vec![Box::new(local)];
        let mut sender_chosen = false;
        for def in &game_def.player_defs {
            if def.pid == game_def.local_player_id {
                continue;
            }
            let identity = PlayerIdentity::from(def);
            if def.dummy {
                players.push(Box::new(DummyPlayer::new(identity)));
                continue;
            }
            let mut remote = NetPlayer::new(identity, Arc::clone(&connection));
            if !sender_chosen {
                remote = remote.sending_for(game_def.local_player_id);
                sender_chosen = true;
            }
            players.push(Box::new(remote));
        }
        if !sender_chosen {
            debug!("no remote humans in this game; nothing will be sent");
        }

        Ok(GameSetup {
            players,
            input,
            local_player_id: game_def.local_player_id,
            tick_offset: game_def.tick_offset,
            vps_to_win: Some(game_def.vps_to_win),
        })
    }

    /// `base` with this game's tick offset and victory threshold.
    pub fn lockstep_config(&self, base: LockstepConfig) -> LockstepConfig {
        LockstepConfig {
            tick_offset: self.tick_offset,
            vps_to_win: self.vps_to_win.or(base.vps_to_win),
            ..base
        }
    }
}

fn host_identity(config: &ClientConfig) -> PlayerIdentity {
    PlayerIdentity::new(
        PlayerId(STARTING_PID),
        TeamId(STARTING_TID),
        config.name.clone(),
        config.color,
    )
}

fn joiner_identity(config: &ClientConfig) -> PlayerIdentity {
    PlayerIdentity::new(
        PlayerId(STARTING_PID + 1),
        TeamId(STARTING_TID + 1),
        config.name.clone(),
        config.color,
    )
}

/// Local player against one dummy.
pub fn single_player_setup(config: &ClientConfig) -> GameSetup {
    let local = LocalPlayer::new(host_identity(config), config.tick_offset);
    let input = local.input();
    let dummy = DummyPlayer::new(PlayerIdentity::new(
        PlayerId(STARTING_PID + 1),
        TeamId(STARTING_TID + 1),
        "dummy",
        config.dummy_color,
    ));
    GameSetup {
        players: vec![Box::new(local), Box::new(dummy)],
        input,
        local_player_id: PlayerId(STARTING_PID),
        tick_offset: config.tick_offset,
        vps_to_win: None,
    }
}

/// The listening side of a direct game.
#[derive(Debug)]
pub struct DirectHost {
    listener: Listener,
    config: ClientConfig,
}

impl DirectHost {
    pub fn bind(port: u16, config: ClientConfig) -> Result<DirectHost, SetupError> {
        let listener = Socket::listen(port, config.backlog)?;
        Ok(DirectHost { listener, config })
    }

    pub fn port(&self) -> Result<u16, SetupError> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Wait for the peer and exchange handshakes.
    pub fn accept(self) -> Result<GameSetup, SetupError> {
        info!("waiting for a direct peer on port {}", self.port()?);
        let (socket, addr) = self.listener.accept()?;
        info!("peer connected from {addr}");
        direct_handshake(socket, host_identity(&self.config), &self.config)
    }
}

/// Connect to a `DirectHost` and exchange handshakes.
pub fn direct_join(host: &str, port: u16, config: &ClientConfig) -> Result<GameSetup, SetupError> {
    let socket = attempt_connection(host, port, config)?;
    direct_handshake(socket, joiner_identity(config), config)
}

fn direct_handshake(
    socket: Socket,
    ours: PlayerIdentity,
    config: &ClientConfig,
) -> Result<GameSetup, SetupError> {
    let connection = FramedConnection::new(socket)?;
    connection.send_packet(&LobbyMessage::Handshake {
        version: config.version.clone(),
        params_checksum: config.params_checksum,
        pid: ours.player_id,
        tid: ours.team_id,
        name: ours.name.clone(),
        color: ours.color,
    })?;

    let packet = match connection.read_next_timeout(config.handshake_timeout) {
        Ok(packet) => packet,
        Err(ConnectionError::Stopped) => return Err(SetupError::Closed),
        Err(e) => return Err(e.into()),
    };
    let theirs = match packet {
        Packet::Lobby(LobbyMessage::Handshake {
            version,
            params_checksum,
            pid,
            tid,
            name,
            color,
        }) => {
            if version != config.version {
                return Err(SetupError::VersionMismatch {
                    ours: config.version.clone(),
                    theirs: version,
                });
            }
            if params_checksum != config.params_checksum {
                return Err(SetupError::ParamsMismatch {
                    ours: config.params_checksum,
                    theirs: params_checksum,
                });
            }
            validate_peer_identity(&ours, pid, tid, &name, color)?;
            PlayerIdentity::new(pid, tid, name, color)
        }
        other => return Err(SetupError::UnexpectedMessage(format!("{other:?}"))),
    };
    info!(
        "direct game: we are {} on {}, peer {} is {} on {}",
        ours.player_id, ours.team_id, theirs.name, theirs.player_id, theirs.team_id
    );

    let connection = Arc::new(connection);
    connection.set_peer(theirs.player_id);
    let local = LocalPlayer::new(ours.clone(), config.tick_offset);
    let input = local.input();
    let remote = NetPlayer::new(theirs, connection).sending_for(ours.player_id);
    Ok(GameSetup {
        players: vec![Box::new(local), Box::new(remote)],
        input,
        local_player_id: ours.player_id,
        tick_offset: config.tick_offset,
        vps_to_win: None,
    })
}

fn validate_peer_identity(
    ours: &PlayerIdentity,
    pid: PlayerId,
    tid: TeamId,
    name: &str,
    color: Color,
) -> Result<(), SetupError> {
    if !pid.is_valid() || pid == ours.player_id {
        return Err(SetupError::Handshake(format!("peer sent unusable player id {pid}")));
    }
    if !tid.is_valid() {
        return Err(SetupError::Handshake(format!("peer sent invalid team id {tid}")));
    }
    if name.is_empty() {
        return Err(SetupError::Handshake("peer sent an empty name".into()));
    }
    if color.iter().any(|c| !(0.0..=1.0).contains(c)) {
        warn!("peer color {color:?} is outside 0..1");
        return Err(SetupError::Handshake("peer sent an invalid color".into()));
    }
    Ok(())
}
