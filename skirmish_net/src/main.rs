// CLI entry point for the Skirmish lobby.
//
// Waits for the requested number of players, sends each of them the game
// definition, then relays actions between them until everyone has left.
// The lobby never runs the simulation. See `lobby.rs` for admission and
// `relay.rs` for forwarding.
//
// Usage:
//   lobby [OPTIONS]
//     --port <PORT>         Listen port (default: 7878)
//     --players <N>         Human players to wait for (default: 2)
//     --dummies <N>         Dummy players to add (default: 0)
//     --map <NAME>          Map name (default: debugMap)
//     --maps-dir <DIR>      Load <DIR>/<NAME>.map instead of a bare map
//     --params <FILE>       Params JSON file (default: built-in params)
//
// Log verbosity follows RUST_LOG (default: info).

use std::path::PathBuf;
use std::process;

use log::{error, info};
use skirmish_net::config::{Params, load_map};
use skirmish_net::lobby::Lobby;
use skirmish_net::relay::{RelayConfig, start_relay};
use skirmish_protocol::MapDef;

struct Args {
    port: u16,
    players: usize,
    dummies: usize,
    map: String,
    maps_dir: Option<PathBuf>,
    params: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            port: 7878,
            players: 2,
            dummies: 0,
            map: "debugMap".into(),
            maps_dir: None,
            params: None,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args();

    let params = match &args.params {
        Some(path) => Params::load(path).unwrap_or_else(|e| fail(&e.to_string())),
        None => Params::default(),
    };
    let map = match &args.maps_dir {
        Some(dir) => load_map(dir, &args.map).unwrap_or_else(|e| fail(&e.to_string())),
        None => MapDef::named(args.map.clone()),
    };

    let config = params.lobby_config(args.port, args.players, args.dummies, map);
    let lobby = Lobby::bind(config).unwrap_or_else(|e| fail(&format!("failed to start lobby: {e}")));
    match lobby.local_addr() {
        Ok(addr) => info!("lobby listening on {addr}"),
        Err(e) => fail(&e.to_string()),
    }

    let hosted = lobby
        .run()
        .unwrap_or_else(|e| fail(&format!("lobby failed: {e}")));
    let stats = start_relay(hosted.connections, RelayConfig::default()).join();
    info!(
        "game over: {} actions relayed, departures {:?}",
        stats.actions_forwarded, stats.departures
    );
}

fn fail(message: &str) -> ! {
    error!("{message}");
    process::exit(1);
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching.
fn parse_args() -> Args {
    let mut args = Args::default();
    let argv: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < argv.len() {
        match argv[i].as_str() {
            "--port" => {
                i += 1;
                args.port = parse_value(&argv, i, "--port requires a valid port number");
            }
            "--players" => {
                i += 1;
                args.players = parse_value(&argv, i, "--players requires a number");
            }
            "--dummies" => {
                i += 1;
                args.dummies = parse_value(&argv, i, "--dummies requires a number");
            }
            "--map" => {
                i += 1;
                args.map = parse_value(&argv, i, "--map requires a name");
            }
            "--maps-dir" => {
                i += 1;
                args.maps_dir = Some(parse_value(&argv, i, "--maps-dir requires a path"));
            }
            "--params" => {
                i += 1;
                args.params = Some(parse_value(&argv, i, "--params requires a path"));
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }

    args
}

fn parse_value<T: std::str::FromStr>(argv: &[String], i: usize, message: &str) -> T {
    argv.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{message}");
        process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: lobby [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --port <PORT>         Listen port (default: 7878)");
    println!("  --players <N>         Human players to wait for (default: 2)");
    println!("  --dummies <N>         Dummy players to add (default: 0)");
    println!("  --map <NAME>          Map name (default: debugMap)");
    println!("  --maps-dir <DIR>      Directory holding <NAME>.map files");
    println!("  --params <FILE>       Params JSON file");
    println!("  --help, -h            Show this help");
}
