// Test harness for multiplayer integration tests.
//
// Provides a small deterministic simulation (`TallySim`), a scripted player,
// and `TestGameClient`, which wraps a real `LockstepDriver` with synchronous,
// test-friendly helpers. Everything networked goes through the same code
// paths as a real game: `Lobby`, the relay, `connect_to_lobby`, `DirectHost`
// and `direct_join`.
//
// The only test-specific code is the polling wrappers: several drivers are
// advanced from one thread with `try_advance`, so two or three "machines"
// can play a game inside a single test without extra synchronization, and
// every wait is bounded by `POLL_TIMEOUT`.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::collections::{BTreeMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use skirmish_net::lobby::{Lobby, LobbyConfig};
use skirmish_net::lockstep::{
    ChecksumHistory, GameOutcome, LockstepConfig, LockstepDriver, LockstepError, Simulation,
};
use skirmish_net::matchmaker::{ClientConfig, GameSetup, connect_to_lobby};
use skirmish_net::player::{LocalInput, Player, PlayerIdentity};
use skirmish_net::relay::{RelayConfig, RelayHandle, start_relay};
use skirmish_protocol::{
    EntityId, Order, OrderType, PlayerAction, PlayerId, StateHasher, TeamId, Tick,
};

/// Default timeout for blocking poll operations.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Sleep duration between poll attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic stand-in for game logic: records every applied action and
/// tallies victory points per team.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TallySim {
    pub teams: BTreeMap<PlayerId, TeamId>,
    /// Every applied order as (tick applied, player, order type).
    pub applied: Vec<(i64, PlayerId, OrderType)>,
    pub chats: Vec<(PlayerId, String)>,
    pub points: BTreeMap<TeamId, f32>,
    pub ticks: i64,
    /// Mixed into the checksum; a nonzero salt on one machine forces a desync.
    pub salt: u64,
}

impl TallySim {
    pub fn new(teams: BTreeMap<PlayerId, TeamId>) -> Self {
        Self {
            teams,
            ..Self::default()
        }
    }

    pub fn for_setup(setup: &GameSetup) -> Self {
        Self::new(
            setup
                .players
                .iter()
                .map(|p| (p.id(), p.identity().team_id))
                .collect(),
        )
    }
}

impl Simulation for TallySim {
    fn apply_order(&mut self, player: PlayerId, order: &Order) {
        self.applied.push((self.ticks, player, order.order_type));
        if order.order_type == OrderType::Capture {
            if let Some(team) = self.teams.get(&player) {
                *self.points.entry(*team).or_default() += 10.0;
            }
        }
    }

    fn chat(&mut self, player: PlayerId, text: &str) {
        self.chats.push((player, text.into()));
    }

    fn step(&mut self, _tick: Tick) {
        self.ticks += 1;
    }

    fn checksum(&self) -> u32 {
        let mut hasher = StateHasher::new();
        hasher.write_i64(self.ticks).write_u64(self.salt);
        for (tick, player, order_type) in &self.applied {
            hasher
                .write_i64(*tick)
                .write_u64(player.0)
                .write_u64(*order_type as u64);
        }
        for (team, points) in &self.points {
            hasher.write_u64(team.0).write_f32(*points);
        }
        hasher.finish()
    }

    fn victory_points(&self) -> BTreeMap<TeamId, f32> {
        self.points.clone()
    }
}

/// A move order for `entity`, for tests that just need some order.
pub fn move_order(entity: u64) -> Order {
    Order::new(OrderType::Move, vec![EntityId(entity)]).with_target([1.0, 0.0, 2.0])
}

pub fn capture_order(entity: u64, flag: u64) -> Order {
    Order::new(OrderType::Capture, vec![EntityId(entity)]).with_enemy(EntityId(flag))
}

/// A player that issues one MOVE per tick it finishes, local only.
#[derive(Debug)]
pub struct ScriptedPlayer {
    identity: PlayerIdentity,
    queue: VecDeque<PlayerAction>,
    current: Tick,
}

impl ScriptedPlayer {
    pub fn new(pid: u64, tid: u64) -> Self {
        Self {
            identity: PlayerIdentity::new(PlayerId(pid), TeamId(tid), format!("bot{pid}"), [0.0; 3]),
            queue: VecDeque::new(),
            current: Tick(-1),
        }
    }
}

impl Player for ScriptedPlayer {
    fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    fn start_tick(&mut self, tick: Tick, checksums: &ChecksumHistory) {
        self.current = tick;
        if tick.is_preroll() {
            return;
        }
        let pid = self.identity.player_id;
        self.queue.push_back(PlayerAction::Order {
            pid,
            tick,
            order: move_order(300 + pid.0),
        });
        self.queue.push_back(PlayerAction::Done {
            pid,
            tick,
            checksum: checksums.done_checksum(tick),
        });
    }

    fn is_ready(&mut self) -> bool {
        self.current.is_preroll() || self.queue.iter().any(PlayerAction::is_terminal)
    }

    fn take_actions(&mut self) -> Vec<PlayerAction> {
        assert!(self.is_ready(), "take_actions before ready");
        let mut taken = Vec::new();
        while let Some(action) = self.queue.pop_front() {
            let terminal = action.is_terminal();
            taken.push(action);
            if terminal {
                break;
            }
        }
        taken
    }

    fn player_action(&mut self, _origin: PlayerId, _action: &PlayerAction) {}
}

/// A test client: one machine's driver plus its local input handle.
pub struct TestGameClient {
    pub driver: LockstepDriver<TallySim>,
    pub input: LocalInput,
    pub local_player_id: PlayerId,
}

impl TestGameClient {
    pub fn from_setup(setup: GameSetup) -> Self {
        Self::from_setup_with(setup, fast_config(), 0)
    }

    pub fn from_setup_with(setup: GameSetup, base: LockstepConfig, salt: u64) -> Self {
        let mut sim = TallySim::for_setup(&setup);
        sim.salt = salt;
        let config = setup.lockstep_config(base);
        let GameSetup {
            players,
            input,
            local_player_id,
            ..
        } = setup;
        let driver = LockstepDriver::new(players, sim, config).expect("valid roster");
        Self {
            driver,
            input,
            local_player_id,
        }
    }

    pub fn tick(&self) -> Tick {
        self.driver.tick()
    }

    pub fn sim(&self) -> &TallySim {
        self.driver.simulation()
    }
}

/// Driver settings suited to tests: no pacing delay worth waiting for, no
/// victory unless a test asks for one.
pub fn fast_config() -> LockstepConfig {
    LockstepConfig {
        tick_rate_hz: 1000.0,
        poll_interval: Duration::from_micros(200),
        vps_to_win: None,
        ..LockstepConfig::default()
    }
}

/// Advance every client until all have reached `target` (or finished).
/// Panics if that takes longer than `POLL_TIMEOUT`.
pub fn advance_all(clients: &mut [TestGameClient], target: Tick) -> Result<(), LockstepError> {
    let deadline = Instant::now() + POLL_TIMEOUT;
    loop {
        let mut pending = false;
        for client in clients.iter_mut() {
            if client.driver.outcome().is_some() || client.driver.tick() >= target {
                continue;
            }
            pending = true;
            client.driver.try_advance()?;
        }
        if !pending {
            return Ok(());
        }
        assert!(Instant::now() < deadline, "timed out advancing to {target}");
        thread::sleep(POLL_INTERVAL);
    }
}

/// Advance every client until each one's game is over.
pub fn run_all_to_end(clients: &mut [TestGameClient]) -> Result<Vec<GameOutcome>, LockstepError> {
    let deadline = Instant::now() + POLL_TIMEOUT;
    loop {
        let mut pending = false;
        for client in clients.iter_mut() {
            if client.driver.outcome().is_none() {
                pending = true;
                client.driver.try_advance()?;
            }
        }
        if !pending {
            return Ok(clients
                .iter()
                .filter_map(|c| c.driver.outcome().cloned())
                .collect());
        }
        assert!(Instant::now() < deadline, "timed out waiting for game end");
        thread::sleep(POLL_INTERVAL);
    }
}

/// Start a lobby for `names.len()` humans plus `dummies`, join it with one
/// client per name, and hand the connections to a relay.
pub fn lobby_game(names: &[&str], dummies: usize) -> (RelayHandle, Vec<TestGameClient>) {
    lobby_game_with(
        LobbyConfig {
            num_dummies: dummies,
            ..LobbyConfig::default()
        },
        names,
    )
}

/// `lobby_game` with explicit lobby settings; `num_players` is taken from
/// `names`.
pub fn lobby_game_with(config: LobbyConfig, names: &[&str]) -> (RelayHandle, Vec<TestGameClient>) {
    lobby_game_driven(config, names, fast_config())
}

/// `lobby_game_with`, building each client's driver from `base`.
pub fn lobby_game_driven(
    config: LobbyConfig,
    names: &[&str],
    base: LockstepConfig,
) -> (RelayHandle, Vec<TestGameClient>) {
    let lobby = Lobby::bind(LobbyConfig {
        num_players: names.len(),
        ..config
    })
    .expect("lobby bind failed");
    let port = lobby.local_addr().expect("lobby address").port();
    let hosting = thread::spawn(move || lobby.run());

    // Join in order so player IDs follow `names`.
    let mut joins = Vec::new();
    for name in names {
        let config = ClientConfig {
            name: (*name).into(),
            game_def_timeout: Some(POLL_TIMEOUT),
            ..ClientConfig::default()
        };
        joins.push(thread::spawn(move || connect_to_lobby("127.0.0.1", port, &config)));
        thread::sleep(Duration::from_millis(50));
    }
    let clients = joins
        .into_iter()
        .map(|join| {
            let joined = join.join().expect("join thread").expect("connect_to_lobby failed");
            let setup = GameSetup::from_game_def(&joined.game_def, joined.connection)
                .expect("roster from game def");
            TestGameClient::from_setup_with(setup, base.clone(), 0)
        })
        .collect();

    let hosted = hosting.join().expect("lobby thread").expect("lobby failed");
    let relay = start_relay(hosted.connections, RelayConfig::default());
    (relay, clients)
}
