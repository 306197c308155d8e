// Framed connection: one TCP peer, a background reader, a shared inbox.
//
// Architecture:
// - **Reader thread** (one per connection): polls the socket with a 100 ms
//   timeout so it notices `stop()` promptly, reads whole frames, decodes each
//   as a `Packet` and appends it to the inbox. Only the reader touches the
//   read half of the socket.
// - **Callers** (simulation thread, lobby, relay loop): send through
//   `send_packet`, which encodes header and payload into one buffer and hands
//   it to a single blocking `write_all`, and consume the inbox through
//   `read_next`, `read_next_timeout`, `drain_queue` or the per-player
//   `take_actions_for`.
//
// Remote close, a framing violation or an undecodable payload ends the reader.
// If a peer player ID was assigned with `set_peer`, the reader then appends a
// synthetic LEAVE_GAME for that player, unless the peer already sent one or
// the connection was stopped locally. Consumers therefore see every departure
// as exactly one LEAVE_GAME, whether the peer said goodbye or just vanished.
//
// Shutdown: `stop()` ends both directions, clears the running flag and wakes
// blocked readers; it is idempotent. `close_write()` only ends our sending
// side (the peer reads a clean close) while packets keep arriving, which is
// how a leaving player hears the rest of the final ticks. The peer closing
// its side stops the reader but leaves sending possible. Dropping the
// connection stops it, shuts the socket down and joins the reader thread
// before the descriptor is released.

use std::collections::{BTreeSet, VecDeque};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use serde::Serialize;
use skirmish_protocol::framing::HEADER_LEN;
use skirmish_protocol::{
    FrameError, FrameRead, Packet, PlayerAction, PlayerId, decode_json, encode_json, read_frame,
};

use crate::poll::SocketSet;
use crate::socket::{Socket, SocketError};

/// How long the reader waits on the socket before re-checking `running`.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("connection is stopped")]
    Stopped,
    #[error("timed out waiting for a message")]
    Timeout,
}

#[derive(Debug, Default)]
struct Inbox {
    packets: VecDeque<Packet>,
    /// A LEAVE_GAME for the peer is already queued or consumed.
    peer_left: bool,
    /// Players no longer in the game; their actions are discarded.
    ignored: BTreeSet<PlayerId>,
}

#[derive(Debug)]
struct Shared {
    inbox: Mutex<Inbox>,
    arrived: Condvar,
    /// The reader is still delivering packets.
    running: AtomicBool,
    /// No more sends: stopped locally or write side shut down.
    send_closed: AtomicBool,
    peer: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Shared {
    fn inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self) -> PlayerId {
        PlayerId(self.peer.load(Ordering::SeqCst))
    }

    fn push(&self, packet: Packet) {
        let mut inbox = self.inbox();
        if let Packet::Action(PlayerAction::LeaveGame { pid }) = &packet {
            if *pid == self.peer() {
                inbox.peer_left = true;
            }
        }
        if let Packet::Action(action) = &packet {
            if inbox.ignored.contains(&action.pid()) {
                trace!("discarding {} from removed player {}", action.kind(), action.pid());
                return;
            }
        }
        inbox.packets.push_back(packet);
        self.arrived.notify_all();
    }

    /// Called once by the reader on exit. `remote` is false when the loop
    /// ended because of a local `stop()`.
    fn finish(&self, remote: bool) {
        let mut inbox = self.inbox();
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let peer = self.peer();
        if remote
            && was_running
            && !inbox.peer_left
            && peer.is_valid()
            && !inbox.ignored.contains(&peer)
        {
            info!("connection to {peer} lost; queueing LEAVE_GAME");
            inbox
                .packets
                .push_back(Packet::Action(PlayerAction::LeaveGame { pid: peer }));
            inbox.peer_left = true;
        }
        self.arrived.notify_all();
    }
}

enum ReaderExit {
    Stopped,
    Closed,
    Failed(ConnectionError),
}

/// A connected peer exchanging length-prefixed JSON packets.
#[derive(Debug)]
pub struct FramedConnection {
    writer: Socket,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    peer_addr: Option<SocketAddr>,
}

impl FramedConnection {
    /// Take ownership of a connected socket and start its reader thread.
    pub fn new(socket: Socket) -> Result<Self, ConnectionError> {
        socket.set_nonblocking(false)?;
        let reader_socket = socket.try_clone()?;
        let peer_addr = socket.peer_addr().ok();

        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox::default()),
            arrived: Condvar::new(),
            running: AtomicBool::new(true),
            send_closed: AtomicBool::new(false),
            peer: AtomicU64::new(PlayerId::NONE.0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        });
        let thread_shared = Arc::clone(&shared);
        let reader = thread::Builder::new()
            .name("net-reader".into())
            .spawn(move || reader_loop(reader_socket, thread_shared))
            .map_err(|source| SocketError::Io {
                op: "spawn reader",
                source,
            })?;

        Ok(Self {
            writer: socket,
            shared,
            reader: Some(reader),
            peer_addr,
        })
    }

    /// Two connections wired to each other over loopback.
    pub fn loopback_pair() -> Result<(FramedConnection, FramedConnection), ConnectionError> {
        let (a, b) = Socket::loopback_pair()?;
        Ok((FramedConnection::new(a)?, FramedConnection::new(b)?))
    }

    /// Player on the far side. LEAVE_GAME is synthesized for this ID when the
    /// connection drops.
    pub fn set_peer(&self, pid: PlayerId) {
        self.shared.peer.store(pid.0, Ordering::SeqCst);
    }

    pub fn peer(&self) -> PlayerId {
        self.shared.peer()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Whether packets can still arrive.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn can_send(&self) -> bool {
        !self.shared.send_closed.load(Ordering::SeqCst)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.shared.bytes_received.load(Ordering::Relaxed)
    }

    /// Serialize `value` and send it as one frame.
    pub fn send_packet<T: Serialize>(&self, value: &T) -> Result<(), ConnectionError> {
        if !self.can_send() {
            return Err(ConnectionError::Stopped);
        }
        let frame = encode_json(value)?;
        self.writer.send_all(&frame)?;
        self.shared
            .bytes_sent
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Stop the reader and wake anyone blocked on the inbox. Safe to call
    /// any number of times.
    pub fn stop(&self) {
        let _inbox = self.shared.inbox();
        self.shared.send_closed.store(true, Ordering::SeqCst);
        if self.shared.running.swap(false, Ordering::SeqCst) {
            debug!("stopping connection to {}", self.describe());
        }
        self.shared.arrived.notify_all();
    }

    /// Stop sending and signal end-of-stream to the peer; keep receiving.
    pub fn close_write(&self) {
        if self.shared.send_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing our side of the connection to {}", self.describe());
        if let Err(e) = self.writer.shutdown(Shutdown::Write) {
            debug!("shutdown of write side failed: {e}");
        }
    }

    /// Next packet, blocking until one arrives. Fails with `Stopped` once the
    /// connection is down and the inbox is empty.
    pub fn read_next(&self) -> Result<Packet, ConnectionError> {
        let inbox = self.shared.inbox();
        let mut inbox = self
            .shared
            .arrived
            .wait_while(inbox, |inbox| {
                inbox.packets.is_empty() && self.shared.running.load(Ordering::SeqCst)
            })
            .unwrap_or_else(PoisonError::into_inner);
        inbox.packets.pop_front().ok_or(ConnectionError::Stopped)
    }

    /// Like `read_next`, giving up after `timeout`.
    pub fn read_next_timeout(&self, timeout: Duration) -> Result<Packet, ConnectionError> {
        let deadline = Instant::now() + timeout;
        let mut inbox = self.shared.inbox();
        loop {
            if let Some(packet) = inbox.packets.pop_front() {
                return Ok(packet);
            }
            if !self.is_running() {
                return Err(ConnectionError::Stopped);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectionError::Timeout);
            }
            inbox = self
                .shared
                .arrived
                .wait_timeout(inbox, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn try_next(&self) -> Option<Packet> {
        self.shared.inbox().packets.pop_front()
    }

    /// Everything queued so far, in arrival order.
    pub fn drain_queue(&self) -> Vec<Packet> {
        self.shared.inbox().packets.drain(..).collect()
    }

    /// Drop `pid`'s queued actions and discard any that arrive later. Used
    /// once a player is out of the game on this machine.
    pub fn ignore_player(&self, pid: PlayerId) {
        let mut inbox = self.shared.inbox();
        if inbox.ignored.insert(pid) {
            let before = inbox.packets.len();
            inbox
                .packets
                .retain(|packet| !matches!(packet, Packet::Action(a) if a.pid() == pid));
            debug!(
                "ignoring {pid}; dropped {} queued actions",
                before - inbox.packets.len()
            );
        }
    }

    /// Packets waiting in the inbox.
    pub fn queued(&self) -> usize {
        self.shared.inbox().packets.len()
    }

    /// Move `pid`'s queued actions into `out`, up to and including the first
    /// terminal one. Packets for other players and lobby messages stay
    /// queued. Returns whether a terminal action was taken.
    pub fn take_actions_for(&self, pid: PlayerId, out: &mut VecDeque<PlayerAction>) -> bool {
        let mut inbox = self.shared.inbox();
        let mut index = 0;
        while index < inbox.packets.len() {
            let matches = matches!(&inbox.packets[index], Packet::Action(a) if a.pid() == pid);
            if !matches {
                index += 1;
                continue;
            }
            let Some(Packet::Action(action)) = inbox.packets.remove(index) else {
                continue;
            };
            let terminal = action.is_terminal();
            out.push_back(action);
            if terminal {
                return true;
            }
        }
        false
    }

    fn describe(&self) -> String {
        match self.peer_addr {
            Some(addr) => format!("{} ({addr})", self.peer()),
            None => self.peer().to_string(),
        }
    }
}

impl Drop for FramedConnection {
    fn drop(&mut self) {
        self.stop();
        let _ = self.writer.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn reader_loop(mut socket: Socket, shared: Arc<Shared>) {
    let mut set = SocketSet::new();
    set.add_read(0, &socket);

    let exit = loop {
        if !shared.running.load(Ordering::SeqCst) {
            break ReaderExit::Stopped;
        }
        let mut timeout = READ_POLL_INTERVAL;
        match set.poll(&mut timeout) {
            Ok(ready) if ready.is_empty() => continue,
            Ok(_) => {}
            Err(e) => break ReaderExit::Failed(e.into()),
        }
        if !shared.running.load(Ordering::SeqCst) {
            break ReaderExit::Stopped;
        }

        match read_frame(&mut socket) {
            Ok(FrameRead::Frame(payload)) => {
                shared
                    .bytes_received
                    .fetch_add((payload.len() + HEADER_LEN) as u64, Ordering::Relaxed);
                match decode_json::<Packet>(&payload) {
                    Ok(packet) => shared.push(packet),
                    Err(e) => break ReaderExit::Failed(e.into()),
                }
            }
            Ok(FrameRead::Closed) => break ReaderExit::Closed,
            Err(e) => break ReaderExit::Failed(e.into()),
        }
    };

    match &exit {
        ReaderExit::Stopped => debug!("reader for {} stopped", shared.peer()),
        ReaderExit::Closed => info!("peer {} closed the connection", shared.peer()),
        ReaderExit::Failed(e) => {
            if shared.running.load(Ordering::SeqCst) {
                warn!("dropping connection to {}: {e}", shared.peer());
            }
        }
    }
    shared.finish(!matches!(exit, ReaderExit::Stopped));
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish_protocol::{LobbyMessage, Tick};

    const WAIT: Duration = Duration::from_secs(5);

    fn done(pid: u64, tick: i64) -> PlayerAction {
        PlayerAction::Done {
            pid: PlayerId(pid),
            tick: Tick(tick),
            checksum: "0".into(),
        }
    }

    #[test]
    fn packets_arrive_in_order() {
        let (a, b) = FramedConnection::loopback_pair().unwrap();
        for tick in 0..5 {
            a.send_packet(&done(100, tick)).unwrap();
        }
        for tick in 0..5 {
            assert_eq!(
                b.read_next_timeout(WAIT).unwrap(),
                Packet::Action(done(100, tick))
            );
        }
        assert!(a.bytes_sent() > 0);
        assert_eq!(a.bytes_sent(), b.bytes_received());
    }

    #[test]
    fn read_next_timeout_times_out() {
        let (_a, b) = FramedConnection::loopback_pair().unwrap();
        let err = b.read_next_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, ConnectionError::Timeout));
    }

    #[test]
    fn abrupt_close_injects_one_leave() {
        let (a, b) = FramedConnection::loopback_pair().unwrap();
        b.set_peer(PlayerId(101));
        drop(a);

        let packet = b.read_next_timeout(WAIT).unwrap();
        assert_eq!(
            packet,
            Packet::Action(PlayerAction::LeaveGame { pid: PlayerId(101) })
        );
        assert!(matches!(
            b.read_next_timeout(Duration::from_millis(50)),
            Err(ConnectionError::Stopped)
        ));
        assert!(!b.is_running());
    }

    #[test]
    fn explicit_leave_is_not_duplicated() {
        let (a, b) = FramedConnection::loopback_pair().unwrap();
        b.set_peer(PlayerId(101));
        a.send_packet(&PlayerAction::LeaveGame { pid: PlayerId(101) })
            .unwrap();
        drop(a);

        let mut leaves = 0;
        while let Ok(packet) = b.read_next_timeout(WAIT) {
            if matches!(packet, Packet::Action(PlayerAction::LeaveGame { .. })) {
                leaves += 1;
            }
        }
        assert_eq!(leaves, 1);
    }

    #[test]
    fn local_stop_injects_nothing() {
        let (_a, b) = FramedConnection::loopback_pair().unwrap();
        b.set_peer(PlayerId(101));
        b.stop();
        b.stop();
        assert!(!b.is_running());
        assert!(b.drain_queue().is_empty());
        assert!(matches!(b.send_packet(&done(100, 0)), Err(ConnectionError::Stopped)));
    }

    #[test]
    fn half_close_keeps_receiving() {
        let (a, b) = FramedConnection::loopback_pair().unwrap();
        b.set_peer(PlayerId(100));
        a.send_packet(&PlayerAction::LeaveGame { pid: PlayerId(100) })
            .unwrap();
        a.close_write();
        assert!(matches!(a.send_packet(&done(100, 0)), Err(ConnectionError::Stopped)));

        assert_eq!(
            b.read_next_timeout(WAIT).unwrap(),
            Packet::Action(PlayerAction::LeaveGame { pid: PlayerId(100) })
        );
        // b's reader ends on the clean close without a second LEAVE_GAME, but
        // b can still talk to a.
        assert!(matches!(b.read_next_timeout(WAIT), Err(ConnectionError::Stopped)));
        b.send_packet(&done(101, 4)).unwrap();
        assert_eq!(a.read_next_timeout(WAIT).unwrap(), Packet::Action(done(101, 4)));
        assert!(a.is_running());
    }

    #[test]
    fn stop_wakes_blocked_reader() {
        let (_a, b) = FramedConnection::loopback_pair().unwrap();
        let b = Arc::new(b);
        let waiter = {
            let b = Arc::clone(&b);
            thread::spawn(move || b.read_next())
        };
        thread::sleep(Duration::from_millis(20));
        b.stop();
        assert!(matches!(waiter.join().unwrap(), Err(ConnectionError::Stopped)));
    }

    #[test]
    fn garbage_payload_abandons_connection() {
        let (raw, framed) = Socket::loopback_pair().unwrap();
        let framed = FramedConnection::new(framed).unwrap();
        framed.set_peer(PlayerId(102));
        raw.send_all(&skirmish_protocol::encode_frame(b"not json").unwrap())
            .unwrap();

        assert_eq!(
            framed.read_next_timeout(WAIT).unwrap(),
            Packet::Action(PlayerAction::LeaveGame { pid: PlayerId(102) })
        );
        assert!(!framed.is_running());
    }

    #[test]
    fn take_actions_for_demultiplexes() {
        let (a, b) = FramedConnection::loopback_pair().unwrap();
        a.send_packet(&done(101, 0)).unwrap();
        a.send_packet(&PlayerAction::Chat {
            pid: PlayerId(100),
            tick: Tick(0),
            chat: "hi".into(),
        })
        .unwrap();
        a.send_packet(&done(100, 0)).unwrap();
        a.send_packet(&done(100, 1)).unwrap();
        a.send_packet(&LobbyMessage::Rejected {
            reason: "late".into(),
            version: "1".into(),
        })
        .unwrap();

        let deadline = Instant::now() + WAIT;
        let mut taken = VecDeque::new();
        while !b.take_actions_for(PlayerId(100), &mut taken) {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(taken.len(), 2);
        assert!(taken[1].is_terminal());

        // Player 101's DONE, 100's second DONE and the lobby message remain
        // (the last two may still be in flight).
        let mut rest = Vec::new();
        while rest.len() < 3 {
            rest.push(b.read_next_timeout(WAIT).unwrap());
        }
        assert_eq!(rest[0], Packet::Action(done(101, 0)));
        assert_eq!(rest[1], Packet::Action(done(100, 1)));
        assert!(matches!(rest[2], Packet::Lobby(_)));
    }

    #[test]
    fn short_frame_is_one_leave() {
        let (raw, framed) = Socket::loopback_pair().unwrap();
        let framed = FramedConnection::new(framed).unwrap();
        framed.set_peer(PlayerId(103));
        raw.send_all(&[0, 0]).unwrap();
        drop(raw);

        assert_eq!(
            framed.read_next_timeout(WAIT).unwrap(),
            Packet::Action(PlayerAction::LeaveGame { pid: PlayerId(103) })
        );
        assert!(matches!(framed.read_next_timeout(WAIT), Err(ConnectionError::Stopped)));
        assert_eq!(framed.queued(), 0);
    }

    #[test]
    fn short_body_is_one_leave() {
        let (raw, framed) = Socket::loopback_pair().unwrap();
        let framed = FramedConnection::new(framed).unwrap();
        framed.set_peer(PlayerId(103));
        let frame = encode_json(&done(103, 0)).unwrap();
        raw.send_all(&frame[..frame.len() - 3]).unwrap();
        drop(raw);

        assert_eq!(
            framed.read_next_timeout(WAIT).unwrap(),
            Packet::Action(PlayerAction::LeaveGame { pid: PlayerId(103) })
        );
        assert!(matches!(framed.read_next_timeout(WAIT), Err(ConnectionError::Stopped)));
    }

    #[test]
    fn ignored_player_never_queues() {
        let (a, b) = FramedConnection::loopback_pair().unwrap();
        b.set_peer(PlayerId(101));
        a.send_packet(&done(101, 0)).unwrap();
        a.send_packet(&done(100, 0)).unwrap();
        assert_eq!(b.read_next_timeout(WAIT).unwrap(), Packet::Action(done(101, 0)));

        // 100's DONE may be queued already or still in flight; either way it
        // is gone once 100 is ignored.
        b.ignore_player(PlayerId(100));
        for tick in 1..50 {
            a.send_packet(&done(100, tick)).unwrap();
        }
        a.send_packet(&done(101, 1)).unwrap();
        assert_eq!(b.read_next_timeout(WAIT).unwrap(), Packet::Action(done(101, 1)));
        assert_eq!(b.queued(), 0);
    }

    #[test]
    fn ignored_peer_gets_no_synthesized_leave() {
        let (a, b) = FramedConnection::loopback_pair().unwrap();
        b.set_peer(PlayerId(101));
        b.ignore_player(PlayerId(101));
        drop(a);
        assert!(matches!(b.read_next_timeout(WAIT), Err(ConnectionError::Stopped)));
    }
}
