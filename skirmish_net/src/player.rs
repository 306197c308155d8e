// Action sources for the lockstep driver.
//
// Every participant in a game is a `Player`: something that, once per tick,
// produces that tick's actions ending in a terminal DONE or LEAVE_GAME. The
// driver calls `start_tick` on everyone, waits until everyone `is_ready`, then
// takes each player's actions in ascending player-ID order.
//
// Three kinds:
// - `LocalPlayer`: the human at this machine. Input arrives through a
//   `LocalInput` handle (usable from any thread) and is stamped on the
//   simulation thread with the tick `tick_offset` ticks ahead, so remote
//   machines receive it before they need it.
// - `DummyPlayer`: scripted filler that immediately finishes every tick.
//   Every machine simulates dummies locally, so they never touch the network.
// - `NetPlayer`: a participant on another machine, fed from a shared
//   `FramedConnection`. One NetPlayer per connection is marked as the sender
//   and forwards locally originated actions to the peer. The sender keeps
//   forwarding after its own player leaves the roster (see `retire`), and a
//   retired NetPlayer stops its player's packets from piling up in the
//   shared inbox.
//
// Readiness is "a terminal action for this tick is queued" (or the tick is a
// preroll tick, which never consumes actions).

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use skirmish_protocol::{Color, Order, PlayerAction, PlayerDef, PlayerId, TeamId, Tick};

use crate::connection::FramedConnection;
use crate::lockstep::ChecksumHistory;

/// Who a player is.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerIdentity {
    pub player_id: PlayerId,
    pub team_id: TeamId,
    pub name: String,
    pub color: Color,
}

impl PlayerIdentity {
    pub fn new(player_id: PlayerId, team_id: TeamId, name: impl Into<String>, color: Color) -> Self {
        Self {
            player_id,
            team_id,
            name: name.into(),
            color,
        }
    }
}

impl From<&PlayerDef> for PlayerIdentity {
    fn from(def: &PlayerDef) -> Self {
        Self::new(def.pid, def.tid, def.name.clone(), def.color)
    }
}

/// A source of per-tick actions.
pub trait Player: Send {
    fn identity(&self) -> &PlayerIdentity;

    fn id(&self) -> PlayerId {
        self.identity().player_id
    }

    /// Tick `tick` is about to be gathered. `checksums` holds recent state
    /// checksums for stamping DONE actions.
    fn start_tick(&mut self, tick: Tick, checksums: &ChecksumHistory);

    /// Whether this player's actions for the current tick are complete.
    fn is_ready(&mut self) -> bool;

    /// The current tick's actions, ending in exactly one terminal action.
    ///
    /// # Panics
    ///
    /// If called while `is_ready` would return false.
    fn take_actions(&mut self) -> Vec<PlayerAction>;

    /// Notification of an action submitted by a player on this machine
    /// (`origin`), including this player's own.
    fn player_action(&mut self, origin: PlayerId, action: &PlayerAction);

    /// Actions this player produced since the last call, for broadcast to
    /// the other players on this machine.
    fn take_outgoing(&mut self) -> Vec<PlayerAction> {
        Vec::new()
    }

    /// The driver dropped this player from the roster. It is never polled
    /// again but still receives `player_action`.
    fn retire(&mut self) {}
}

/// Pending actions, consumed one tick at a time.
#[derive(Debug, Default)]
pub(crate) struct ActionQueue {
    pending: VecDeque<PlayerAction>,
}

impl ActionQueue {
    pub(crate) fn push(&mut self, action: PlayerAction) {
        self.pending.push_back(action);
    }

    pub(crate) fn has_terminal(&self) -> bool {
        self.pending.iter().any(PlayerAction::is_terminal)
    }

    /// Pop everything up to and including the first terminal action.
    pub(crate) fn take_tick(&mut self) -> Vec<PlayerAction> {
        let mut taken = Vec::new();
        while let Some(action) = self.pending.pop_front() {
            let terminal = action.is_terminal();
            taken.push(action);
            if terminal {
                break;
            }
        }
        taken
    }

    pub(crate) fn pending_mut(&mut self) -> &mut VecDeque<PlayerAction> {
        &mut self.pending
    }
}

/// Something the local human asked for, not yet assigned a tick.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalCommand {
    Order(Order),
    Chat(String),
    Leave,
}

/// Thread-safe handle for feeding input to a `LocalPlayer`.
#[derive(Clone, Debug, Default)]
pub struct LocalInput {
    queue: Arc<Mutex<VecDeque<LocalCommand>>>,
}

impl LocalInput {
    pub fn order(&self, order: Order) {
        self.push(LocalCommand::Order(order));
    }

    pub fn chat(&self, text: impl Into<String>) {
        self.push(LocalCommand::Chat(text.into()));
    }

    pub fn leave(&self) {
        self.push(LocalCommand::Leave);
    }

    fn push(&self, command: LocalCommand) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(command);
    }

    fn drain(&self) -> Vec<LocalCommand> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

/// The human at this machine.
#[derive(Debug)]
pub struct LocalPlayer {
    identity: PlayerIdentity,
    input: LocalInput,
    queue: ActionQueue,
    outgoing: Vec<PlayerAction>,
    tick_offset: i64,
    current: Tick,
    last_started: Option<Tick>,
    /// Tick currently collecting input; closed with a DONE on the next
    /// `start_tick`.
    open_target: Option<Tick>,
    left: bool,
}

impl LocalPlayer {
    pub fn new(identity: PlayerIdentity, tick_offset: i64) -> Self {
        Self {
            identity,
            input: LocalInput::default(),
            queue: ActionQueue::default(),
            outgoing: Vec::new(),
            tick_offset,
            current: Tick(i64::MIN),
            last_started: None,
            open_target: None,
            left: false,
        }
    }

    /// A handle for submitting input from any thread.
    pub fn input(&self) -> LocalInput {
        self.input.clone()
    }

    pub fn has_left(&self) -> bool {
        self.left
    }

    fn emit(&mut self, action: PlayerAction) {
        self.outgoing.push(action.clone());
        self.queue.push(action);
    }
}

impl Player for LocalPlayer {
    fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    fn start_tick(&mut self, tick: Tick, checksums: &ChecksumHistory) {
        self.current = tick;
        if self.left || self.last_started.is_some_and(|t| tick <= t) {
            return;
        }
        self.last_started = Some(tick);

        let pid = self.identity.player_id;
        if let Some(target) = self.open_target.take() {
            for command in self.input.drain() {
                match command {
                    LocalCommand::Order(order) => self.emit(PlayerAction::Order {
                        pid,
                        tick: target,
                        order,
                    }),
                    LocalCommand::Chat(chat) => self.emit(PlayerAction::Chat {
                        pid,
                        tick: target,
                        chat,
                    }),
                    LocalCommand::Leave => {
                        debug!("{pid} leaving at tick {target}");
                        self.emit(PlayerAction::LeaveGame { pid });
                        self.left = true;
                        return;
                    }
                }
            }
            let checksum = checksums.done_checksum(target);
            self.emit(PlayerAction::Done {
                pid,
                tick: target,
                checksum,
            });
        }
        self.open_target = Some(tick.offset(self.tick_offset));
    }

    fn is_ready(&mut self) -> bool {
        self.current.is_preroll() || self.queue.has_terminal()
    }

    fn take_actions(&mut self) -> Vec<PlayerAction> {
        assert!(
            self.queue.has_terminal(),
            "take_actions on {} before it was ready",
            self.identity.player_id
        );
        self.queue.take_tick()
    }

    fn player_action(&mut self, _origin: PlayerId, _action: &PlayerAction) {}

    fn take_outgoing(&mut self) -> Vec<PlayerAction> {
        mem::take(&mut self.outgoing)
    }
}

/// Scripted filler that finishes every tick without doing anything.
#[derive(Debug)]
pub struct DummyPlayer {
    identity: PlayerIdentity,
    queue: ActionQueue,
    current: Tick,
    last_started: Option<Tick>,
}

impl DummyPlayer {
    pub fn new(identity: PlayerIdentity) -> Self {
        Self {
            identity,
            queue: ActionQueue::default(),
            current: Tick(i64::MIN),
            last_started: None,
        }
    }
}

impl Player for DummyPlayer {
    fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    fn start_tick(&mut self, tick: Tick, checksums: &ChecksumHistory) {
        self.current = tick;
        if tick.is_preroll() || self.last_started.is_some_and(|t| tick <= t) {
            return;
        }
        self.last_started = Some(tick);
        self.queue.push(PlayerAction::Done {
            pid: self.identity.player_id,
            tick,
            checksum: checksums.done_checksum(tick),
        });
    }

    fn is_ready(&mut self) -> bool {
        self.current.is_preroll() || self.queue.has_terminal()
    }

    fn take_actions(&mut self) -> Vec<PlayerAction> {
        assert!(
            self.queue.has_terminal(),
            "take_actions on {} before it was ready",
            self.identity.player_id
        );
        self.queue.take_tick()
    }

    fn player_action(&mut self, _origin: PlayerId, _action: &PlayerAction) {}
}

/// A participant on another machine.
#[derive(Debug)]
pub struct NetPlayer {
    identity: PlayerIdentity,
    connection: Arc<FramedConnection>,
    queue: ActionQueue,
    current: Tick,
    /// Actions originated by this player are forwarded over `connection`.
    sends_for: Option<PlayerId>,
    synthesized_leave: bool,
    send_failed: bool,
}

impl NetPlayer {
    /// A remote player that only receives. Use `sending_for` on exactly one
    /// NetPlayer per connection.
    pub fn new(identity: PlayerIdentity, connection: Arc<FramedConnection>) -> Self {
        Self {
            identity,
            connection,
            queue: ActionQueue::default(),
            current: Tick(i64::MIN),
            sends_for: None,
            synthesized_leave: false,
            send_failed: false,
        }
    }

    /// Forward actions originated by `local` over this player's connection.
    pub fn sending_for(mut self, local: PlayerId) -> Self {
        self.sends_for = Some(local);
        self
    }

    pub fn connection(&self) -> &Arc<FramedConnection> {
        &self.connection
    }
}

impl Player for NetPlayer {
    fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    fn start_tick(&mut self, tick: Tick, _checksums: &ChecksumHistory) {
        self.current = tick;
    }

    fn is_ready(&mut self) -> bool {
        if self.current.is_preroll() || self.queue.has_terminal() {
            return true;
        }
        let pid = self.identity.player_id;
        if self.connection.take_actions_for(pid, self.queue.pending_mut()) {
            return true;
        }
        if self.connection.is_running() {
            return false;
        }
        // The reader may have queued its last packets just before stopping.
        if self.connection.take_actions_for(pid, self.queue.pending_mut()) {
            return true;
        }
        if !self.synthesized_leave {
            warn!("connection for {pid} is down; treating it as LEAVE_GAME");
            self.synthesized_leave = true;
        }
        self.queue.push(PlayerAction::LeaveGame { pid });
        true
    }

    fn take_actions(&mut self) -> Vec<PlayerAction> {
        assert!(
            self.queue.has_terminal(),
            "take_actions on {} before it was ready",
            self.identity.player_id
        );
        self.queue.take_tick()
    }

    fn player_action(&mut self, origin: PlayerId, action: &PlayerAction) {
        if self.sends_for != Some(origin) {
            return;
        }
        if !self.connection.can_send() {
            return;
        }
        if let Err(e) = self.connection.send_packet(action) {
            // The reader notices the dead peer and we read that as LEAVE_GAME.
            if !mem::replace(&mut self.send_failed, true) {
                warn!("failed to send {} to {}: {e}", action.kind(), self.identity.player_id);
            }
        }
        if matches!(action, PlayerAction::LeaveGame { .. }) {
            // Keep listening: the others' actions up to our last tick are
            // still on the way.
            self.connection.close_write();
        }
    }

    fn retire(&mut self) {
        self.queue = ActionQueue::default();
        self.connection.ignore_player(self.identity.player_id);
    }
}
