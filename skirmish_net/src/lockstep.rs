// Lockstep driver: gathers every player's actions for a tick, applies them
// in a fixed order, steps the simulation, and verifies checksums.
//
// Each machine in a game runs one `LockstepDriver` over the same roster. The
// driver never advances past tick T until every player has delivered T's
// terminal action, so all machines feed the simulation identical inputs in
// identical order:
//
// 1. `start_tick(T)` on every player (once per tick).
// 2. Poll: forward locally produced actions to every player, then ask
//    everyone `is_ready`. Repeat until all are ready (or the optional ready
//    timeout evicts the stragglers as if they had left).
// 3. Drain players in ascending player-ID order. ORDER goes to
//    `Simulation::apply_order`, CHAT to `Simulation::chat`, DONE has its
//    checksum compared against local history, LEAVE_GAME marks a departure.
// 4. `Simulation::step(T)`, record the new checksum, advance to T+1.
//
// The counter starts at `-tick_offset`. Preroll ticks (T < 0) run step 1
// only, which lets local players emit DONE for ticks 0..tick_offset-1 before
// anyone needs them.
//
// Leavers: with `end_on_leave` off, a player that leaves is retired. It is
// no longer polled or drained, but it still hears local actions, so a
// NetPlayer that forwards them keeps doing so.
//
// Checksum convention: a DONE for tick X carries the checksum of the state
// after tick X - tick_offset (or the initial state, clamped at -1). That is
// the newest state every machine is guaranteed to have when the DONE is
// produced, so DONEs from local, dummy and remote players all agree.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use skirmish_protocol::{Order, PlayerAction, PlayerId, TeamId, Tick, checksum_to_string};

use crate::player::Player;

/// Input delay used when nothing else is configured.
pub const DEFAULT_TICK_OFFSET: i64 = skirmish_protocol::message::DEFAULT_TICK_OFFSET;

#[derive(Debug, thiserror::Error)]
pub enum LockstepError {
    #[error("protocol invariant violated: {0}")]
    Invariant(String),
    #[error("desync at tick {tick}: expected checksum {expected}, {player} reported {actual}")]
    Desync {
        tick: Tick,
        player: PlayerId,
        expected: String,
        actual: String,
    },
    #[error("player {0} appears twice in the roster")]
    DuplicatePlayer(PlayerId),
    #[error("a game needs at least one player")]
    NoPlayers,
    #[error("invalid lockstep configuration: {0}")]
    Config(String),
}

/// The deterministic game logic the driver steps. Everything a simulation
/// sees arrives through these calls in the same order on every machine.
pub trait Simulation {
    fn apply_order(&mut self, player: PlayerId, order: &Order);

    fn chat(&mut self, player: PlayerId, text: &str) {
        let _ = (player, text);
    }

    fn step(&mut self, tick: Tick);

    /// CRC32 over all state that must match across machines.
    fn checksum(&self) -> u32;

    /// Victory points per team, checked after every step.
    fn victory_points(&self) -> BTreeMap<TeamId, f32> {
        BTreeMap::new()
    }
}

/// Recent post-tick checksums, keyed by tick. The initial state is stored at
/// tick -1.
#[derive(Clone, Debug)]
pub struct ChecksumHistory {
    tick_offset: i64,
    entries: BTreeMap<Tick, u32>,
}

impl ChecksumHistory {
    pub fn new(tick_offset: i64, initial: u32) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(Tick(-1), initial);
        Self {
            tick_offset,
            entries,
        }
    }

    /// Record the state after `tick` and forget entries no DONE can still
    /// refer to.
    pub fn record(&mut self, tick: Tick, checksum: u32) {
        self.entries.insert(tick, checksum);
        let oldest = tick.offset(-self.tick_offset);
        self.entries.retain(|t, _| *t >= oldest);
    }

    pub fn get(&self, tick: Tick) -> Option<u32> {
        self.entries.get(&tick).copied()
    }

    /// The state tick whose checksum a DONE for `done_tick` carries.
    pub fn source_tick(&self, done_tick: Tick) -> Tick {
        Tick((done_tick.0 - self.tick_offset).max(-1))
    }

    pub fn expected_for_done(&self, done_tick: Tick) -> Option<u32> {
        self.get(self.source_tick(done_tick))
    }

    /// Wire form of `expected_for_done`.
    pub fn done_checksum(&self, done_tick: Tick) -> String {
        match self.expected_for_done(done_tick) {
            Some(checksum) => checksum_to_string(checksum),
            None => {
                warn!("no checksum recorded for DONE at {done_tick}");
                String::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Knobs for a driver.
#[derive(Clone, Debug, PartialEq)]
pub struct LockstepConfig {
    /// Target simulation rate for `run`.
    pub tick_rate_hz: f32,
    /// Input delay D, at least 1.
    pub tick_offset: i64,
    /// Sleep between readiness polls.
    pub poll_interval: Duration,
    /// Evict players not ready within this long after a tick starts.
    pub ready_timeout: Option<Duration>,
    /// End the game at the first LEAVE_GAME. Otherwise leavers are dropped and
    /// the game ends when nobody is left.
    pub end_on_leave: bool,
    /// A team with strictly more victory points wins.
    pub vps_to_win: Option<f32>,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 10.0,
            tick_offset: DEFAULT_TICK_OFFSET,
            poll_interval: Duration::from_millis(1),
            ready_timeout: None,
            end_on_leave: true,
            vps_to_win: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EndReason {
    Victory(TeamId),
    PlayerLeft(Vec<PlayerId>),
    AllPlayersLeft,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GameOutcome {
    /// Last tick that was simulated.
    pub final_tick: Tick,
    pub reason: EndReason,
}

/// Result of one attempt to advance.
#[derive(Clone, Debug, PartialEq)]
pub enum TickStatus {
    /// Some player is not ready yet.
    Waiting,
    Advanced,
    Finished(GameOutcome),
}

pub struct LockstepDriver<S: Simulation> {
    players: Vec<Box<dyn Player>>,
    /// Removed from the roster but still notified of local actions.
    retired: Vec<Box<dyn Player>>,
    sim: S,
    config: LockstepConfig,
    tick: Tick,
    history: ChecksumHistory,
    /// `start_tick` has been issued for `tick`, at this instant.
    started: Option<Instant>,
    outcome: Option<GameOutcome>,
}

impl<S: Simulation> LockstepDriver<S> {
    pub fn new(
        mut players: Vec<Box<dyn Player>>,
        sim: S,
        config: LockstepConfig,
    ) -> Result<Self, LockstepError> {
        if config.tick_offset < 1 {
            return Err(LockstepError::Config(format!(
                "tick_offset must be at least 1, got {}",
                config.tick_offset
            )));
        }
        if config.tick_rate_hz.is_nan() || config.tick_rate_hz <= 0.0 {
            return Err(LockstepError::Config(format!(
                "tick_rate_hz must be positive, got {}",
                config.tick_rate_hz
            )));
        }
        if players.is_empty() {
            return Err(LockstepError::NoPlayers);
        }
        players.sort_by_key(|p| p.id());
        for pair in players.windows(2) {
            if pair[0].id() == pair[1].id() {
                return Err(LockstepError::DuplicatePlayer(pair[0].id()));
            }
        }

        let history = ChecksumHistory::new(config.tick_offset, sim.checksum());
        info!(
            "lockstep driver ready: {} players, tick offset {}",
            players.len(),
            config.tick_offset
        );
        Ok(Self {
            players,
            retired: Vec::new(),
            sim,
            tick: Tick(-config.tick_offset),
            config,
            history,
            started: None,
            outcome: None,
        })
    }

    /// The tick that will be gathered next.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    pub fn into_simulation(self) -> S {
        self.sim
    }

    pub fn checksums(&self) -> &ChecksumHistory {
        &self.history
    }

    pub fn config(&self) -> &LockstepConfig {
        &self.config
    }

    /// Remaining players, ascending.
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id()).collect()
    }

    pub fn outcome(&self) -> Option<&GameOutcome> {
        self.outcome.as_ref()
    }

    /// Make one pass over the current tick without blocking.
    pub fn try_advance(&mut self) -> Result<TickStatus, LockstepError> {
        if let Some(outcome) = &self.outcome {
            return Ok(TickStatus::Finished(outcome.clone()));
        }

        let started = match self.started {
            Some(started) => started,
            None => {
                for player in &mut self.players {
                    player.start_tick(self.tick, &self.history);
                }
                let now = Instant::now();
                self.started = Some(now);
                now
            }
        };

        self.broadcast_outgoing();

        let waiting = self.not_ready();
        let evicted: BTreeSet<PlayerId> = if waiting.is_empty() {
            BTreeSet::new()
        } else {
            match self.config.ready_timeout {
                Some(limit) if started.elapsed() >= limit => {
                    warn!(
                        "players {waiting:?} not ready for tick {} after {limit:?}; removing them",
                        self.tick
                    );
                    waiting.into_iter().collect()
                }
                _ => {
                    trace!("tick {} waiting on {waiting:?}", self.tick);
                    return Ok(TickStatus::Waiting);
                }
            }
        };

        self.advance(&evicted)
    }

    /// Block until the current tick has been simulated or the game ends.
    pub fn step(&mut self) -> Result<TickStatus, LockstepError> {
        loop {
            match self.try_advance()? {
                TickStatus::Waiting => thread::sleep(self.config.poll_interval),
                status => return Ok(status),
            }
        }
    }

    /// Run all preroll ticks.
    pub fn preroll(&mut self) -> Result<(), LockstepError> {
        while self.tick.is_preroll() && self.outcome.is_none() {
            self.step()?;
        }
        Ok(())
    }

    /// Run until the game ends, pacing simulated ticks at `tick_rate_hz`.
    pub fn run(&mut self) -> Result<GameOutcome, LockstepError> {
        self.preroll()?;
        let period = Duration::from_secs_f32(1.0 / self.config.tick_rate_hz);
        let mut next_due = Instant::now();
        loop {
            match self.step()? {
                TickStatus::Finished(outcome) => return Ok(outcome),
                TickStatus::Waiting => {}
                TickStatus::Advanced => {
                    next_due += period;
                    let now = Instant::now();
                    if next_due > now {
                        thread::sleep(next_due - now);
                    } else if now - next_due > period {
                        debug!("tick {} running {:?} behind", self.tick, now - next_due);
                        next_due = now;
                    }
                }
            }
        }
    }

    fn broadcast_outgoing(&mut self) {
        for index in 0..self.players.len() {
            let outgoing = self.players[index].take_outgoing();
            if outgoing.is_empty() {
                continue;
            }
            let origin = self.players[index].id();
            for action in &outgoing {
                for player in self.players.iter_mut().chain(self.retired.iter_mut()) {
                    player.player_action(origin, action);
                }
            }
        }
    }

    fn not_ready(&mut self) -> Vec<PlayerId> {
        // Every player is polled, even after one reports not ready, so remote
        // queues keep draining.
        self.players
            .iter_mut()
            .filter_map(|p| (!p.is_ready()).then(|| p.id()))
            .collect()
    }

    fn advance(&mut self, evicted: &BTreeSet<PlayerId>) -> Result<TickStatus, LockstepError> {
        let tick = self.tick;
        self.started = None;
        if tick.is_preroll() {
            self.tick = tick.next();
            return Ok(TickStatus::Advanced);
        }

        let mut leavers = Vec::new();
        for index in 0..self.players.len() {
            let pid = self.players[index].id();
            let actions = if evicted.contains(&pid) {
                vec![PlayerAction::LeaveGame { pid }]
            } else {
                self.players[index].take_actions()
            };
            self.apply_player_actions(pid, tick, actions, &mut leavers)?;
        }

        self.sim.step(tick);
        self.history.record(tick, self.sim.checksum());
        self.tick = tick.next();

        if let Some(threshold) = self.config.vps_to_win {
            let winner = self
                .sim
                .victory_points()
                .into_iter()
                .find(|(_, points)| *points > threshold);
            if let Some((team, points)) = winner {
                info!("team {team} wins with {points} victory points at tick {tick}");
                return Ok(self.finish(tick, EndReason::Victory(team)));
            }
        }

        if !leavers.is_empty() {
            if self.config.end_on_leave {
                return Ok(self.finish(tick, EndReason::PlayerLeft(leavers)));
            }
            self.retire(&leavers);
            if self.players.is_empty() {
                return Ok(self.finish(tick, EndReason::AllPlayersLeft));
            }
        }
        Ok(TickStatus::Advanced)
    }

    fn retire(&mut self, leavers: &[PlayerId]) {
        let (gone, staying): (Vec<_>, Vec<_>) = mem::take(&mut self.players)
            .into_iter()
            .partition(|p| leavers.contains(&p.id()));
        self.players = staying;
        for mut player in gone {
            debug!("removing {} from the roster", player.id());
            player.retire();
            self.retired.push(player);
        }
    }

    fn apply_player_actions(
        &mut self,
        pid: PlayerId,
        tick: Tick,
        actions: Vec<PlayerAction>,
        leavers: &mut Vec<PlayerId>,
    ) -> Result<(), LockstepError> {
        let terminals = actions.iter().filter(|a| a.is_terminal()).count();
        if terminals != 1 || !actions.last().is_some_and(PlayerAction::is_terminal) {
            return Err(LockstepError::Invariant(format!(
                "{pid} delivered {terminals} terminal actions for tick {tick}"
            )));
        }

        for action in actions {
            if action.pid() != pid {
                return Err(LockstepError::Invariant(format!(
                    "{} action from {} arrived in {pid}'s stream",
                    action.kind(),
                    action.pid()
                )));
            }
            action
                .validate()
                .map_err(|e| LockstepError::Invariant(e.to_string()))?;
            if let Some(action_tick) = action.tick() {
                if action_tick != tick {
                    return Err(LockstepError::Invariant(format!(
                        "{} from {pid} stamped for tick {action_tick} applied at tick {tick}",
                        action.kind()
                    )));
                }
            }

            match action {
                PlayerAction::Order { order, .. } => self.sim.apply_order(pid, &order),
                PlayerAction::Chat { chat, .. } => {
                    info!("[chat] {pid}: {chat}");
                    self.sim.chat(pid, &chat);
                }
                PlayerAction::Done { checksum, .. } => self.verify_done(pid, tick, checksum)?,
                PlayerAction::LeaveGame { .. } => {
                    info!("{pid} left the game at tick {tick}");
                    leavers.push(pid);
                }
            }
        }
        Ok(())
    }

    fn verify_done(&self, pid: PlayerId, tick: Tick, actual: String) -> Result<(), LockstepError> {
        let expected = self.history.expected_for_done(tick).ok_or_else(|| {
            LockstepError::Invariant(format!(
                "no local checksum for tick {}",
                self.history.source_tick(tick)
            ))
        })?;
        let expected = checksum_to_string(expected);
        if expected != actual {
            return Err(LockstepError::Desync {
                tick,
                player: pid,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn finish(&mut self, final_tick: Tick, reason: EndReason) -> TickStatus {
        info!("game over at tick {final_tick}: {reason:?}");
        let outcome = GameOutcome { final_tick, reason };
        self.outcome = Some(outcome.clone());
        TickStatus::Finished(outcome)
    }
}

/// Build a driver with default settings at `tick_rate_hz` and run it to the
/// end. Returns the outcome and the final simulation state.
pub fn run_lockstep_loop<S: Simulation>(
    players: Vec<Box<dyn Player>>,
    sim: S,
    tick_rate_hz: f32,
) -> Result<(GameOutcome, S), LockstepError> {
    let config = LockstepConfig {
        tick_rate_hz,
        ..LockstepConfig::default()
    };
    let mut driver = LockstepDriver::new(players, sim, config)?;
    let outcome = driver.run()?;
    Ok((outcome, driver.into_simulation()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{DummyPlayer, LocalPlayer, PlayerIdentity};
    use skirmish_protocol::{EntityId, OrderType, StateHasher};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Counter {
        steps: i64,
        orders: Vec<(PlayerId, Tick)>,
        chats: Vec<String>,
        points: f32,
    }

    impl Simulation for Counter {
        fn apply_order(&mut self, player: PlayerId, _order: &Order) {
            self.orders.push((player, Tick(self.steps)));
        }

        fn chat(&mut self, _player: PlayerId, text: &str) {
            self.chats.push(text.into());
        }

        fn step(&mut self, _tick: Tick) {
            self.steps += 1;
            self.points += 1.0;
        }

        fn checksum(&self) -> u32 {
            let mut hasher = StateHasher::new();
            hasher
                .write_i64(self.steps)
                .write_u64(self.orders.len() as u64);
            hasher.finish()
        }

        fn victory_points(&self) -> BTreeMap<TeamId, f32> {
            BTreeMap::from([(TeamId(200), self.points)])
        }
    }

    fn identity(pid: u64) -> PlayerIdentity {
        PlayerIdentity::new(PlayerId(pid), TeamId(pid + 100), "p", [0.0; 3])
    }

    fn fast() -> LockstepConfig {
        LockstepConfig {
            tick_rate_hz: 1000.0,
            poll_interval: Duration::from_micros(100),
            ..LockstepConfig::default()
        }
    }

    #[test]
    fn counter_starts_at_negative_offset() {
        let players: Vec<Box<dyn Player>> = vec![Box::new(DummyPlayer::new(identity(100)))];
        let mut driver = LockstepDriver::new(players, Counter::default(), fast()).unwrap();
        assert_eq!(driver.tick(), Tick(-2));
        driver.preroll().unwrap();
        assert_eq!(driver.tick(), Tick(0));
        assert_eq!(driver.simulation().steps, 0);
    }

    #[test]
    fn local_and_dummy_run_hundred_ticks() {
        let local = LocalPlayer::new(identity(100), 2);
        let players: Vec<Box<dyn Player>> =
            vec![Box::new(DummyPlayer::new(identity(101))), Box::new(local)];
        let mut driver = LockstepDriver::new(players, Counter::default(), fast()).unwrap();
        driver.preroll().unwrap();
        for _ in 0..100 {
            assert_eq!(driver.step().unwrap(), TickStatus::Advanced);
        }
        assert_eq!(driver.tick(), Tick(100));
        assert_eq!(driver.simulation().steps, 100);
        assert_eq!(driver.player_ids(), vec![PlayerId(100), PlayerId(101)]);
    }

    #[test]
    fn orders_apply_at_offset_tick() {
        let local = LocalPlayer::new(identity(100), 2);
        let input = local.input();
        let players: Vec<Box<dyn Player>> = vec![Box::new(local)];
        let mut driver = LockstepDriver::new(players, Counter::default(), fast()).unwrap();
        driver.preroll().unwrap();
        for _ in 0..5 {
            driver.step().unwrap();
        }
        // Submitted before tick 5 starts; lands in tick 5 + 2 - 1.
        input.order(Order::new(OrderType::Stop, vec![EntityId(300)]));
        input.chat("gg");
        for _ in 0..5 {
            driver.step().unwrap();
        }
        assert_eq!(driver.simulation().orders, vec![(PlayerId(100), Tick(6))]);
        assert_eq!(driver.simulation().chats, vec!["gg".to_string()]);
    }

    #[test]
    fn leave_ends_game_by_default() {
        let local = LocalPlayer::new(identity(100), 2);
        let input = local.input();
        let players: Vec<Box<dyn Player>> =
            vec![Box::new(local), Box::new(DummyPlayer::new(identity(101)))];
        let mut driver = LockstepDriver::new(players, Counter::default(), fast()).unwrap();
        driver.preroll().unwrap();
        driver.step().unwrap();
        input.leave();
        let outcome = loop {
            if let TickStatus::Finished(outcome) = driver.step().unwrap() {
                break outcome;
            }
        };
        assert_eq!(outcome.reason, EndReason::PlayerLeft(vec![PlayerId(100)]));
        assert_eq!(
            driver.try_advance().unwrap(),
            TickStatus::Finished(outcome)
        );
    }

    #[test]
    fn leaver_removed_when_game_continues() {
        let local = LocalPlayer::new(identity(100), 1);
        let input = local.input();
        let players: Vec<Box<dyn Player>> =
            vec![Box::new(local), Box::new(DummyPlayer::new(identity(101)))];
        let config = LockstepConfig {
            end_on_leave: false,
            ..fast()
        };
        let mut driver = LockstepDriver::new(players, Counter::default(), config).unwrap();
        driver.preroll().unwrap();
        input.leave();
        for _ in 0..3 {
            assert_eq!(driver.step().unwrap(), TickStatus::Advanced);
        }
        assert_eq!(driver.player_ids(), vec![PlayerId(101)]);
    }

    /// Leaves at its first real tick, then records what it is told.
    struct Quitter {
        identity: PlayerIdentity,
        heard: Arc<Mutex<Vec<(PlayerId, &'static str)>>>,
        retired: Arc<AtomicBool>,
    }

    impl Player for Quitter {
        fn identity(&self) -> &PlayerIdentity {
            &self.identity
        }

        fn start_tick(&mut self, _tick: Tick, _checksums: &ChecksumHistory) {}

        fn is_ready(&mut self) -> bool {
            true
        }

        fn take_actions(&mut self) -> Vec<PlayerAction> {
            vec![PlayerAction::LeaveGame {
                pid: self.identity.player_id,
            }]
        }

        fn player_action(&mut self, origin: PlayerId, action: &PlayerAction) {
            self.heard.lock().unwrap().push((origin, action.kind()));
        }

        fn retire(&mut self) {
            self.retired.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn retired_player_still_hears_local_actions() {
        let local = LocalPlayer::new(identity(100), 1);
        let input = local.input();
        let heard = Arc::new(Mutex::new(Vec::new()));
        let retired = Arc::new(AtomicBool::new(false));
        let quitter = Quitter {
            identity: identity(101),
            heard: Arc::clone(&heard),
            retired: Arc::clone(&retired),
        };
        let players: Vec<Box<dyn Player>> = vec![
            Box::new(local),
            Box::new(quitter),
            Box::new(DummyPlayer::new(identity(102))),
        ];
        let config = LockstepConfig {
            end_on_leave: false,
            ..fast()
        };
        let mut driver = LockstepDriver::new(players, Counter::default(), config).unwrap();
        driver.preroll().unwrap();
        assert_eq!(driver.step().unwrap(), TickStatus::Advanced);
        assert_eq!(driver.player_ids(), vec![PlayerId(100), PlayerId(102)]);
        assert!(retired.load(Ordering::SeqCst));

        heard.lock().unwrap().clear();
        input.order(Order::new(OrderType::Stop, vec![EntityId(300)]));
        for _ in 0..2 {
            assert_eq!(driver.step().unwrap(), TickStatus::Advanced);
        }
        let heard = heard.lock().unwrap();
        assert!(heard.contains(&(PlayerId(100), "ORDER")));
        assert!(heard.contains(&(PlayerId(100), "DONE")));
    }

    #[test]
    fn victory_ends_game() {
        let players: Vec<Box<dyn Player>> = vec![Box::new(DummyPlayer::new(identity(100)))];
        let config = LockstepConfig {
            vps_to_win: Some(9.5),
            ..fast()
        };
        let mut driver = LockstepDriver::new(players, Counter::default(), config).unwrap();
        let outcome = driver.run().unwrap();
        assert_eq!(outcome.reason, EndReason::Victory(TeamId(200)));
        assert_eq!(outcome.final_tick, Tick(9));
    }

    #[test]
    fn duplicate_and_empty_rosters_rejected() {
        let players: Vec<Box<dyn Player>> = vec![
            Box::new(DummyPlayer::new(identity(100))),
            Box::new(DummyPlayer::new(identity(100))),
        ];
        assert!(matches!(
            LockstepDriver::new(players, Counter::default(), fast()),
            Err(LockstepError::DuplicatePlayer(PlayerId(100)))
        ));
        assert!(matches!(
            LockstepDriver::new(Vec::new(), Counter::default(), fast()),
            Err(LockstepError::NoPlayers)
        ));
        let zero_offset = LockstepConfig {
            tick_offset: 0,
            ..fast()
        };
        let players: Vec<Box<dyn Player>> = vec![Box::new(DummyPlayer::new(identity(100)))];
        assert!(matches!(
            LockstepDriver::new(players, Counter::default(), zero_offset),
            Err(LockstepError::Config(_))
        ));
    }

    #[test]
    fn history_prunes_behind_offset() {
        let mut history = ChecksumHistory::new(2, 7);
        assert_eq!(history.expected_for_done(Tick(1)), Some(7));
        for tick in 0..10 {
            history.record(Tick(tick), tick as u32 * 10);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.get(Tick(7)), Some(70));
        assert_eq!(history.get(Tick(6)), None);
        assert_eq!(history.expected_for_done(Tick(10)), Some(80));
        assert_eq!(history.done_checksum(Tick(11)), "5A");
    }
}
