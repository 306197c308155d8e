// Action relay for lobby-hosted games.
//
// After the lobby hands over its connections (see `lobby.rs`), the relay
// forwards every action received from one client to every other client, in
// arrival order. It never runs the simulation and never reorders: each client
// drains its own queue per player, so per-player order is all that matters.
//
// Architecture: each `FramedConnection` already has its own reader thread, so
// the relay is a single polling loop over the connection inboxes. It is the
// only writer to the client sockets.
//
// Departures: a client's LEAVE_GAME is forwarded like any other action. A
// client that disconnects without one gets a LEAVE_GAME synthesized by its
// connection (the lobby set the peer ID), which is forwarded the same way, so
// every remaining client sees exactly one. A departed client keeps receiving
// until a send to it fails: it still needs the others' actions for the ticks
// before its own LEAVE_GAME.
//
// The loop ends when every client has left, or when `RelayHandle::stop` is
// called.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use skirmish_protocol::{Packet, PlayerAction, PlayerId};

use crate::connection::FramedConnection;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Sleep between passes when nothing arrived.
    pub poll_interval: Duration,
    /// How often to log throughput.
    pub stats_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            stats_interval: Duration::from_secs(5),
        }
    }
}

/// Totals for a finished relay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub actions_forwarded: u64,
    pub departures: Vec<PlayerId>,
}

/// Handle for a relay running on a background thread.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<JoinHandle<RelayStats>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it.
    pub fn stop(mut self) -> RelayStats {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join_thread()
    }

    /// Wait for the relay to finish on its own (every client gone).
    pub fn join(mut self) -> RelayStats {
        self.join_thread()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn join_thread(&mut self) -> RelayStats {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!("relay thread panicked");
                RelayStats::default()
            }
            None => RelayStats::default(),
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join_thread();
    }
}

/// Run the relay on a background thread.
pub fn start_relay(
    connections: BTreeMap<PlayerId, FramedConnection>,
    config: RelayConfig,
) -> RelayHandle {
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_relay = Arc::clone(&keep_running);
    let thread = thread::spawn(move || run_relay(connections, &config, &keep_running_relay));
    RelayHandle {
        keep_running,
        thread: Some(thread),
    }
}

/// Forward actions between `connections` until every client has left or
/// `keep_running` is cleared.
pub fn run_relay(
    mut connections: BTreeMap<PlayerId, FramedConnection>,
    config: &RelayConfig,
    keep_running: &AtomicBool,
) -> RelayStats {
    info!("relay running for {} clients", connections.len());
    let mut stats = RelayStats::default();
    let mut departed = BTreeSet::new();
    let mut throughput = Throughput::new(config.stats_interval);

    while keep_running.load(Ordering::SeqCst) && remaining(&connections, &departed) > 0 {
        let mut forwarded_any = false;
        let mut unreachable = Vec::new();

        let pids: Vec<PlayerId> = connections.keys().copied().collect();
        for pid in pids {
            if departed.contains(&pid) {
                continue;
            }
            let Some(connection) = connections.get(&pid) else {
                continue;
            };
            // Read the flag first so a closing reader's last packets are in
            // the drain below.
            let running = connection.is_running();
            let mut left = false;
            for packet in connection.drain_queue() {
                match packet {
                    Packet::Action(action) if left => {
                        debug!("dropping {} from {pid} after it left", action.kind());
                    }
                    Packet::Action(action) => {
                        if action.pid() != pid {
                            warn!(
                                "dropping {} claiming to be from {} on {pid}'s connection",
                                action.kind(),
                                action.pid()
                            );
                            continue;
                        }
                        left = matches!(action, PlayerAction::LeaveGame { .. });
                        unreachable.extend(broadcast_except(&connections, pid, &action));
                        stats.actions_forwarded += 1;
                        forwarded_any = true;
                    }
                    Packet::Lobby(message) => {
                        debug!("ignoring lobby message from {pid} mid-game: {message:?}");
                    }
                }
            }
            if !running && !left {
                // Only reachable when the reader stopped without a peer ID.
                let action = PlayerAction::LeaveGame { pid };
                unreachable.extend(broadcast_except(&connections, pid, &action));
                left = true;
            }
            if left {
                departed.insert(pid);
                stats.departures.push(pid);
                info!(
                    "{pid} left; {} clients remain",
                    remaining(&connections, &departed)
                );
            }
        }

        for pid in unreachable {
            if departed.contains(&pid) && connections.remove(&pid).is_some() {
                debug!("closed connection to departed {pid}");
            }
        }

        throughput.maybe_log(&connections);
        if !forwarded_any {
            thread::sleep(config.poll_interval);
        }
    }

    info!(
        "relay finished: {} actions forwarded, {} departures",
        stats.actions_forwarded,
        stats.departures.len()
    );
    stats
}

fn remaining(
    connections: &BTreeMap<PlayerId, FramedConnection>,
    departed: &BTreeSet<PlayerId>,
) -> usize {
    connections.keys().filter(|pid| !departed.contains(pid)).count()
}

/// Send `action` to every connection but `origin`'s. Returns the players the
/// send failed for.
fn broadcast_except(
    connections: &BTreeMap<PlayerId, FramedConnection>,
    origin: PlayerId,
    action: &PlayerAction,
) -> Vec<PlayerId> {
    let mut failed = Vec::new();
    for (pid, connection) in connections {
        if *pid == origin {
            continue;
        }
        if let Err(e) = connection.send_packet(action) {
            debug!("could not forward {} to {pid}: {e}", action.kind());
            failed.push(*pid);
        }
    }
    failed
}

/// Periodic byte-rate logging.
struct Throughput {
    interval: Duration,
    last: Instant,
    sent: u64,
    received: u64,
}

impl Throughput {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
            sent: 0,
            received: 0,
        }
    }

    fn maybe_log(&mut self, connections: &BTreeMap<PlayerId, FramedConnection>) {
        let elapsed = self.last.elapsed();
        if elapsed < self.interval {
            return;
        }
        let sent: u64 = connections.values().map(FramedConnection::bytes_sent).sum();
        let received: u64 = connections.values().map(FramedConnection::bytes_received).sum();
        let secs = elapsed.as_secs_f64();
        info!(
            "relay throughput: {:.1} B/s down, {:.1} B/s up",
            received.saturating_sub(self.received) as f64 / secs,
            sent.saturating_sub(self.sent) as f64 / secs
        );
        self.last = Instant::now();
        self.sent = sent;
        self.received = received;
    }
}
