// Lobby server: gathers players and hands out the game definition.
//
// The lobby listens on one port and accepts connections until the configured
// number of human players has joined. Each connection must open with a HELLO
// within the handshake timeout. A HELLO with the wrong version or params
// checksum gets a REJECTED reply and the connection is dropped; the lobby
// keeps accepting. Connections that send anything else, or nothing, are
// dropped without a reply.
//
// `Roster` is the admission state, kept free of I/O so it can be tested
// directly: it assigns player IDs from 100 in join order, distributes team
// IDs round-robin from 200, and appends dummy players once everyone is in.
//
// Once the roster is full, every connection receives the same
// `GameDefinition` personalized with its own `local_player_id`, and the
// connections are returned in a `HostedGame` for the relay (see `relay.rs`)
// to take over.
//
// Capacity is checked before the listener is opened: humans plus dummies
// must fit the map's `max_players` and the 100-slot player ID range.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use skirmish_protocol::ids::MAX_PLAYERS;
use skirmish_protocol::{
    Color, GameDefinition, LobbyMessage, MapDef, Packet, PlayerDef, PlayerId, TeamId,
};

use crate::connection::{ConnectionError, FramedConnection};
use crate::matchmaker::SetupError;
use crate::socket::{Listener, Socket};

/// Configuration for a lobby.
#[derive(Clone, Debug)]
pub struct LobbyConfig {
    pub port: u16,
    pub num_players: usize,
    pub num_dummies: usize,
    pub map: MapDef,
    pub version: String,
    /// Params checksum clients must match. `None` skips the comparison.
    pub params_checksum: Option<u32>,
    pub num_teams: u32,
    pub vps_to_win: f32,
    pub starting_requisition: f32,
    pub starting_power: f32,
    pub dummy_color: Color,
    pub tick_offset: i64,
    pub handshake_timeout: Duration,
    pub backlog: i32,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            port: 0,
            num_players: 2,
            num_dummies: 0,
            map: MapDef::named("debugMap"),
            version: "1.0".into(),
            params_checksum: None,
            num_teams: 2,
            vps_to_win: 500.0,
            starting_requisition: 1000.0,
            starting_power: 100.0,
            dummy_color: [0.5, 0.5, 0.5],
            tick_offset: crate::lockstep::DEFAULT_TICK_OFFSET,
            handshake_timeout: Duration::from_secs(5),
            backlog: 11,
        }
    }
}

/// Player admission state.
#[derive(Debug)]
pub struct Roster {
    version: String,
    params_checksum: Option<u32>,
    num_teams: u32,
    starting_requisition: f32,
    starting_power: f32,
    defs: Vec<PlayerDef>,
}

impl Roster {
    pub fn new(config: &LobbyConfig) -> Self {
        Self {
            version: config.version.clone(),
            params_checksum: config.params_checksum,
            num_teams: config.num_teams.max(1),
            starting_requisition: config.starting_requisition,
            starting_power: config.starting_power,
            defs: Vec::new(),
        }
    }

    /// Validate a HELLO and assign the next IDs. `Err` carries the reason to
    /// send back in REJECTED.
    pub fn admit(
        &mut self,
        version: &str,
        params_checksum: Option<u32>,
        name: String,
        color: Color,
    ) -> Result<PlayerDef, String> {
        if version != self.version {
            return Err(format!(
                "version mismatch: lobby runs {}, client runs {version}",
                self.version
            ));
        }
        if let (Some(ours), Some(theirs)) = (self.params_checksum, params_checksum) {
            if ours != theirs {
                return Err(format!(
                    "params mismatch: lobby has {ours:08X}, client has {theirs:08X}"
                ));
            }
        }
        let def = self.next_def(name, color, false)?;
        self.defs.push(def.clone());
        Ok(def)
    }

    pub fn add_dummies(&mut self, count: usize, color: Color) -> Result<(), String> {
        for _ in 0..count {
            let def = self.next_def("dummy".into(), color, true)?;
            self.defs.push(def);
        }
        Ok(())
    }

    fn next_def(&self, name: String, color: Color, dummy: bool) -> Result<PlayerDef, String> {
        let index = self.defs.len();
        let pid = PlayerId::nth(index).map_err(|e| e.to_string())?;
        let tid = TeamId::nth(index % self.num_teams as usize).map_err(|e| e.to_string())?;
        Ok(PlayerDef {
            name,
            color,
            pid,
            tid,
            starting_requisition: self.starting_requisition,
            starting_power: self.starting_power,
            dummy,
        })
    }

    pub fn defs(&self) -> &[PlayerDef] {
        &self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// A filled lobby: the shared definition plus one connection per human.
#[derive(Debug)]
pub struct HostedGame {
    pub game_def: GameDefinition,
    pub connections: BTreeMap<PlayerId, FramedConnection>,
}

/// A lobby that is listening but not yet full.
#[derive(Debug)]
pub struct Lobby {
    listener: Listener,
    config: LobbyConfig,
}

impl Lobby {
    /// Check capacity and open the listening socket.
    pub fn bind(config: LobbyConfig) -> Result<Lobby, SetupError> {
        let requested = config.num_players + config.num_dummies;
        let max = config
            .map
            .max_players
            .map_or(MAX_PLAYERS, |m| (m as usize).min(MAX_PLAYERS));
        if requested > max {
            return Err(SetupError::TooManyPlayers { requested, max });
        }
        if config.num_players == 0 {
            return Err(SetupError::Handshake(
                "a lobby needs at least one human player".into(),
            ));
        }
        let listener = Socket::listen(config.port, config.backlog)?;
        Ok(Lobby { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SetupError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept players until the roster is full, then send everyone their
    /// game definition.
    pub fn run(self) -> Result<HostedGame, SetupError> {
        let config = &self.config;
        info!(
            "lobby waiting for {} players on map {}",
            config.num_players, config.map.name
        );

        let mut roster = Roster::new(config);
        let mut connections = BTreeMap::new();
        while connections.len() < config.num_players {
            let (socket, addr) = self.listener.accept()?;
            debug!("connection from {addr}");
            let connection = match FramedConnection::new(socket) {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("could not set up connection from {addr}: {e}");
                    continue;
                }
            };
            if let Some(pid) = admit_connection(&mut roster, &connection, config, addr) {
                connection.set_peer(pid);
                connections.insert(pid, connection);
                info!(
                    "{} of {} players joined",
                    connections.len(),
                    config.num_players
                );
            }
        }

        roster
            .add_dummies(config.num_dummies, config.dummy_color)
            .map_err(SetupError::Handshake)?;

        let game_def = GameDefinition {
            player_defs: roster.defs().to_vec(),
            map_def: config.map.clone(),
            vps_to_win: config.vps_to_win,
            local_player_id: PlayerId::NONE,
            tick_offset: config.tick_offset,
        };
        for (pid, connection) in &connections {
            let message = LobbyMessage::GameDef(game_def.personalized(*pid));
            if let Err(e) = connection.send_packet(&message) {
                warn!("failed to send game definition to {pid}: {e}");
            }
        }
        info!("game definition sent to {} players", connections.len());

        Ok(HostedGame {
            game_def,
            connections,
        })
    }
}

/// Run the HELLO exchange on one connection. Returns the new player's ID, or
/// `None` if the connection was turned away.
fn admit_connection(
    roster: &mut Roster,
    connection: &FramedConnection,
    config: &LobbyConfig,
    addr: SocketAddr,
) -> Option<PlayerId> {
    let packet = match connection.read_next_timeout(config.handshake_timeout) {
        Ok(packet) => packet,
        Err(ConnectionError::Timeout) => {
            warn!("no HELLO from {addr} within {:?}", config.handshake_timeout);
            return None;
        }
        Err(e) => {
            warn!("connection from {addr} failed before HELLO: {e}");
            return None;
        }
    };

    let (version, name, color, params_checksum) = match packet {
        Packet::Lobby(LobbyMessage::Hello {
            version,
            name,
            color,
            params_checksum,
        }) => (version, name, color, params_checksum),
        other => {
            warn!("expected HELLO from {addr}, got {other:?}");
            return None;
        }
    };

    match roster.admit(&version, params_checksum, name, color) {
        Ok(def) => {
            info!("{} joined as {} on {}", def.name, def.pid, def.tid);
            Some(def.pid)
        }
        Err(reason) => {
            warn!("rejecting {addr}: {reason}");
            let rejected = LobbyMessage::Rejected {
                reason,
                version: config.version.clone(),
            };
            if let Err(e) = connection.send_packet(&rejected) {
                debug!("could not deliver REJECTED to {addr}: {e}");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config() -> LobbyConfig {
        LobbyConfig {
            params_checksum: Some(0xFEED),
            ..LobbyConfig::default()
        }
    }

    #[test]
    fn admit_assigns_ids_in_join_order() {
        let mut roster = Roster::new(&config());
        let a = roster.admit("1.0", Some(0xFEED), "a".into(), [1.0; 3]).unwrap();
        let b = roster.admit("1.0", None, "b".into(), [1.0; 3]).unwrap();
        let c = roster.admit("1.0", Some(0xFEED), "c".into(), [1.0; 3]).unwrap();
        assert_eq!((a.pid, a.tid), (PlayerId(100), TeamId(200)));
        assert_eq!((b.pid, b.tid), (PlayerId(101), TeamId(201)));
        assert_eq!((c.pid, c.tid), (PlayerId(102), TeamId(200)));
    }

    #[test]
    fn admit_rejects_version_and_params_mismatch() {
        let mut roster = Roster::new(&config());
        let err = roster
            .admit("0.9", Some(0xFEED), "old".into(), [0.0; 3])
            .unwrap_err();
        assert!(err.contains("version mismatch"));
        let err = roster
            .admit("1.0", Some(0xBEEF), "tuned".into(), [0.0; 3])
            .unwrap_err();
        assert!(err.contains("params mismatch"));
        assert!(roster.is_empty());
    }

    #[test]
    fn dummies_follow_humans() {
        let mut roster = Roster::new(&config());
        roster.admit("1.0", None, "a".into(), [1.0; 3]).unwrap();
        roster.add_dummies(2, [0.5; 3]).unwrap();
        let defs = roster.defs();
        assert_eq!(defs.len(), 3);
        assert!(!defs[0].dummy);
        assert!(defs[1].dummy && defs[2].dummy);
        assert_eq!(defs[2].pid, PlayerId(102));
    }

    #[test]
    fn too_many_players_for_map() {
        let mut map = MapDef::named("duel");
        map.max_players = Some(2);
        let err = Lobby::bind(LobbyConfig {
            num_players: 2,
            num_dummies: 1,
            map,
            ..config()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SetupError::TooManyPlayers {
                requested: 3,
                max: 2
            }
        ));
    }

    #[test]
    fn rejected_client_does_not_take_a_slot() {
        let lobby = Lobby::bind(LobbyConfig {
            num_players: 1,
            ..config()
        })
        .unwrap();
        let port = lobby.local_addr().unwrap().port();
        let server = thread::spawn(move || lobby.run());

        let wait = Duration::from_secs(5);
        let stale = FramedConnection::new(Socket::connect("127.0.0.1", port).unwrap()).unwrap();
        stale
            .send_packet(&LobbyMessage::Hello {
                version: "0.1".into(),
                name: "stale".into(),
                color: [0.0; 3],
                params_checksum: None,
            })
            .unwrap();
        match stale.read_next_timeout(wait).unwrap() {
            Packet::Lobby(LobbyMessage::Rejected { version, .. }) => assert_eq!(version, "1.0"),
            other => panic!("expected REJECTED, got {other:?}"),
        }

        let good = FramedConnection::new(Socket::connect("127.0.0.1", port).unwrap()).unwrap();
        good.send_packet(&LobbyMessage::Hello {
            version: "1.0".into(),
            name: "good".into(),
            color: [0.0; 3],
            params_checksum: Some(0xFEED),
        })
        .unwrap();
        let def = match good.read_next_timeout(wait).unwrap() {
            Packet::Lobby(LobbyMessage::GameDef(def)) => def,
            other => panic!("expected GAME_DEF, got {other:?}"),
        };
        assert_eq!(def.local_player_id, PlayerId(100));

        let hosted = server.join().unwrap().unwrap();
        assert_eq!(hosted.connections.len(), 1);
        assert_eq!(hosted.game_def.player_defs.len(), 1);
    }
}
