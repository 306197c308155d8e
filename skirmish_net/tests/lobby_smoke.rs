// Integration smoke test for the lobby and relay.
//
// Starts a lobby on localhost, connects mock clients, and exercises the setup
// and in-game lifecycle: HELLO admission, personalized GAME_DEF, action
// relaying, and departure handling for both graceful and abrupt exits.
//
// The mock clients are plain TCP sockets using the protocol crate's framing
// and message types, with no simulation involved. A second test drives the
// real client path (`connect_to_lobby`) against a lobby running a different
// version.

use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use skirmish_net::lobby::{Lobby, LobbyConfig};
use skirmish_net::matchmaker::{ClientConfig, SetupError, connect_to_lobby};
use skirmish_net::relay::{RelayConfig, start_relay};
use skirmish_protocol::{
    FrameRead, GameDefinition, LobbyMessage, Packet, PlayerAction, PlayerId, TeamId, Tick,
    decode_json, encode_json, read_frame,
};

/// Helper: send a packet over a framed TCP stream.
fn send(stream: &mut TcpStream, packet: impl Into<Packet>) {
    use std::io::Write;
    let frame = encode_json(&packet.into()).unwrap();
    stream.write_all(&frame).unwrap();
}

/// Helper: receive one packet from a framed TCP stream.
fn recv(stream: &mut TcpStream) -> Packet {
    match read_frame(stream).unwrap() {
        FrameRead::Frame(payload) => decode_json(&payload).unwrap(),
        FrameRead::Closed => panic!("stream closed"),
    }
}

/// Connect to the lobby and send HELLO. Returns the stream and the
/// personalized game definition.
fn connect_and_hello(addr: SocketAddr, name: &str) -> (TcpStream, thread::JoinHandle<GameDefinition>) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    send(
        &mut stream,
        LobbyMessage::Hello {
            version: "1.0".into(),
            name: name.into(),
            color: [0.2, 0.4, 0.6],
            params_checksum: None,
        },
    );
    // GAME_DEF only arrives once everyone has joined, so wait on a clone.
    let mut reader = stream.try_clone().unwrap();
    let waiter = thread::spawn(move || match recv(&mut reader) {
        Packet::Lobby(LobbyMessage::GameDef(def)) => def,
        other => panic!("expected GAME_DEF, got {other:?}"),
    });
    (stream, waiter)
}

fn done(pid: u64, tick: i64) -> PlayerAction {
    PlayerAction::Done {
        pid: PlayerId(pid),
        tick: Tick(tick),
        checksum: "0".into(),
    }
}

#[test]
fn full_lobby_lifecycle() {
    // 1. Start a lobby for two humans plus one dummy on a random port.
    let lobby = Lobby::bind(LobbyConfig {
        num_players: 2,
        num_dummies: 1,
        ..LobbyConfig::default()
    })
    .unwrap();
    let addr: SocketAddr = ([127, 0, 0, 1], lobby.local_addr().unwrap().port()).into();
    let hosting = thread::spawn(move || lobby.run());

    // 2. Two clients join in order.
    let (mut alice, alice_def) = connect_and_hello(addr, "alice");
    thread::sleep(Duration::from_millis(50));
    let (mut bob, bob_def) = connect_and_hello(addr, "bob");

    let alice_def = alice_def.join().unwrap();
    let bob_def = bob_def.join().unwrap();
    assert_eq!(alice_def.local_player_id, PlayerId(100));
    assert_eq!(bob_def.local_player_id, PlayerId(101));
    assert_eq!(alice_def.player_defs, bob_def.player_defs);

    let defs = &alice_def.player_defs;
    assert_eq!(defs.len(), 3);
    assert_eq!((defs[0].name.as_str(), defs[0].tid), ("alice", TeamId(200)));
    assert_eq!((defs[1].name.as_str(), defs[1].tid), ("bob", TeamId(201)));
    assert!(defs[2].dummy);
    assert_eq!(defs[2].pid, PlayerId(102));

    // 3. The relay takes over the lobby's connections.
    let hosted = hosting.join().unwrap().unwrap();
    let relay = start_relay(hosted.connections, RelayConfig::default());

    // 4. Actions flow both ways in order.
    for tick in 0..3 {
        send(&mut alice, done(100, tick));
    }
    send(&mut bob, done(101, 0));
    for tick in 0..3 {
        assert_eq!(recv(&mut bob), Packet::Action(done(100, tick)));
    }
    assert_eq!(recv(&mut alice), Packet::Action(done(101, 0)));

    // 5. Alice vanishes; Bob hears exactly one LEAVE_GAME for her.
    drop(alice);
    assert_eq!(
        recv(&mut bob),
        Packet::Action(PlayerAction::LeaveGame { pid: PlayerId(100) })
    );

    // 6. Bob leaves gracefully and the relay winds down.
    send(&mut bob, PlayerAction::LeaveGame { pid: PlayerId(101) });
    let stats = relay.join();
    assert_eq!(stats.departures, vec![PlayerId(100), PlayerId(101)]);
    assert_eq!(stats.actions_forwarded, 6);
}

#[test]
fn hello_with_wrong_version_is_rejected() {
    let lobby = Lobby::bind(LobbyConfig {
        num_players: 1,
        version: "2.0".into(),
        ..LobbyConfig::default()
    })
    .unwrap();
    let port = lobby.local_addr().unwrap().port();
    let _hosting = thread::spawn(move || lobby.run());

    let config = ClientConfig {
        version: "1.0".into(),
        game_def_timeout: Some(Duration::from_secs(10)),
        ..ClientConfig::default()
    };
    let err = connect_to_lobby("127.0.0.1", port, &config).unwrap_err();
    match err {
        SetupError::VersionMismatch { ours, theirs } => {
            assert_eq!(ours, "1.0");
            assert_eq!(theirs, "2.0");
        }
        other => panic!("expected VersionMismatch, got {other}"),
    }
}

#[test]
fn silent_client_is_dropped_after_handshake_timeout() {
    let lobby = Lobby::bind(LobbyConfig {
        num_players: 1,
        handshake_timeout: Duration::from_millis(100),
        ..LobbyConfig::default()
    })
    .unwrap();
    let addr: SocketAddr = ([127, 0, 0, 1], lobby.local_addr().unwrap().port()).into();
    let hosting = thread::spawn(move || lobby.run());

    let mut silent = TcpStream::connect(addr).unwrap();
    silent
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    assert_eq!(read_frame(&mut silent).unwrap(), FrameRead::Closed);

    let (_carol, carol_def) = connect_and_hello(addr, "carol");
    assert_eq!(carol_def.join().unwrap().local_player_id, PlayerId(100));
    assert_eq!(hosting.join().unwrap().unwrap().connections.len(), 1);
}
