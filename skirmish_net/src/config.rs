// Tunable parameters, loaded from a JSON params file.
//
// `Params` mirrors the params file section by section. Every field has a
// default and `#[serde(default)]` fills gaps, so an empty `{}` or a partial
// file loads fine and older files keep working when fields are added.
//
// The CRC32 of the exact file bytes is kept as `Params::checksum`. Peers
// compare it during setup so two machines with different tuning refuse to
// play each other. Params built in code checksum their own JSON form.
//
// The runtime configs (`LockstepConfig`, `LobbyConfig`, `ClientConfig`) are
// derived from `Params` by the `*_config` methods; each also has a
// `Default` for tests and embedding.
//
// Map definitions live one per file as `<maps_dir>/<name>.map` (JSON).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skirmish_protocol::{Color, MapDef, checksum_bytes};

use crate::lobby::LobbyConfig;
use crate::lockstep::LockstepConfig;
use crate::matchmaker::ClientConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid parameter: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameParams {
    /// Protocol/game version string; peers must match exactly.
    pub version: String,
    /// Simulation ticks per second.
    pub simrate: f32,
    /// Input delay in ticks.
    pub tick_offset: i64,
}

impl Default for GameParams {
    fn default() -> Self {
        Self {
            version: "1.0".into(),
            simrate: 10.0,
            tick_offset: crate::lockstep::DEFAULT_TICK_OFFSET,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    pub connect_attempts: u32,
    pub connect_interval_secs: f32,
    pub connect_timeout_secs: f32,
    /// How long the lobby waits for HELLO (and peers for HANDSHAKE).
    pub handshake_max_wait_secs: f32,
    /// How long a client waits for GAME_DEF after HELLO. `None` waits
    /// indefinitely.
    pub game_def_max_wait_secs: Option<f32>,
    pub poll_interval_ms: u64,
    pub ready_timeout_ms: Option<u64>,
    pub listen_backlog: i32,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            connect_attempts: 10,
            connect_interval_secs: 1.0,
            connect_timeout_secs: 2.0,
            handshake_max_wait_secs: 5.0,
            game_def_max_wait_secs: None,
            poll_interval_ms: 1,
            ready_timeout_ms: None,
            listen_backlog: 11,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalParams {
    pub points_to_win: f32,
    pub starting_requisition: f32,
    pub starting_power: f32,
    pub num_teams: u32,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            points_to_win: 500.0,
            starting_requisition: 1000.0,
            starting_power: 100.0,
            num_teams: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorParams {
    pub dummy_player: Color,
}

impl Default for ColorParams {
    fn default() -> Self {
        Self {
            dummy_player: [0.5, 0.5, 0.5],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub game: GameParams,
    pub network: NetworkParams,
    pub global: GlobalParams,
    pub colors: ColorParams,
    /// CRC32 of the file this was loaded from.
    #[serde(skip)]
    pub file_checksum: Option<u32>,
}

impl Params {
    pub fn load(path: &Path) -> Result<Params, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut params: Params =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        params.file_checksum = Some(checksum_bytes(&bytes));
        params.validate()?;
        Ok(params)
    }

    pub fn from_json(json: &str) -> Result<Params, ConfigError> {
        let mut params: Params =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                path: PathBuf::from("<inline>"),
                source,
            })?;
        params.file_checksum = Some(checksum_bytes(json.as_bytes()));
        params.validate()?;
        Ok(params)
    }

    /// Checksum peers compare before playing.
    pub fn checksum(&self) -> u32 {
        match self.file_checksum {
            Some(checksum) => checksum,
            None => serde_json::to_vec(self)
                .map(|bytes| checksum_bytes(&bytes))
                .unwrap_or(0),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.game.tick_offset < 1 {
            return Err(ConfigError::Invalid(format!(
                "game.tick_offset must be at least 1, got {}",
                self.game.tick_offset
            )));
        }
        if self.game.simrate.is_nan() || self.game.simrate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "game.simrate must be positive, got {}",
                self.game.simrate
            )));
        }
        if self.network.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "network.connect_attempts must be at least 1".into(),
            ));
        }
        if self.global.num_teams == 0 || self.global.num_teams > 100 {
            return Err(ConfigError::Invalid(format!(
                "global.num_teams must be within 1..=100, got {}",
                self.global.num_teams
            )));
        }
        Ok(())
    }

    pub fn lockstep_config(&self) -> LockstepConfig {
        LockstepConfig {
            tick_rate_hz: self.game.simrate,
            tick_offset: self.game.tick_offset,
            poll_interval: Duration::from_millis(self.network.poll_interval_ms),
            ready_timeout: self.network.ready_timeout_ms.map(Duration::from_millis),
            end_on_leave: true,
            vps_to_win: Some(self.global.points_to_win),
        }
    }

    pub fn lobby_config(&self, port: u16, num_players: usize, num_dummies: usize, map: MapDef) -> LobbyConfig {
        LobbyConfig {
            port,
            num_players,
            num_dummies,
            map,
            version: self.game.version.clone(),
            params_checksum: Some(self.checksum()),
            num_teams: self.global.num_teams,
            vps_to_win: self.global.points_to_win,
            starting_requisition: self.global.starting_requisition,
            starting_power: self.global.starting_power,
            dummy_color: self.colors.dummy_player,
            tick_offset: self.game.tick_offset,
            handshake_timeout: secs(self.network.handshake_max_wait_secs),
            backlog: self.network.listen_backlog,
        }
    }

    pub fn client_config(&self, name: impl Into<String>, color: Color) -> ClientConfig {
        ClientConfig {
            name: name.into(),
            color,
            version: self.game.version.clone(),
            params_checksum: self.checksum(),
            connect_attempts: self.network.connect_attempts,
            connect_interval: secs(self.network.connect_interval_secs),
            connect_timeout: secs(self.network.connect_timeout_secs),
            handshake_timeout: secs(self.network.handshake_max_wait_secs),
            game_def_timeout: self.network.game_def_max_wait_secs.map(secs),
            backlog: self.network.listen_backlog,
            tick_offset: self.game.tick_offset,
            dummy_color: self.colors.dummy_player,
        }
    }
}

fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value).unwrap_or(Duration::ZERO)
}

/// Load `<maps_dir>/<name>.map`.
pub fn load_map(maps_dir: &Path, name: &str) -> Result<MapDef, ConfigError> {
    let path = maps_dir.join(format!("{name}.map"));
    let bytes = fs::read(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let mut map: MapDef =
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
    if map.name.is_empty() {
        map.name = name.into();
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let params = Params::from_json("{}").unwrap();
        assert_eq!(params.game, GameParams::default());
        assert_eq!(params.network.listen_backlog, 11);
        assert_eq!(params.global.num_teams, 2);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let params = Params::from_json(r#"{"game":{"version":"2.1"}}"#).unwrap();
        assert_eq!(params.game.version, "2.1");
        assert_eq!(params.game.tick_offset, 2);
    }

    #[test]
    fn checksum_tracks_file_bytes() {
        let a = Params::from_json(r#"{"global":{"points_to_win":100}}"#).unwrap();
        let b = Params::from_json(r#"{"global":{"points_to_win":200}}"#).unwrap();
        assert_ne!(a.checksum(), b.checksum());
        assert_eq!(a.checksum(), Params::from_json(r#"{"global":{"points_to_win":100}}"#).unwrap().checksum());
        assert_eq!(Params::default().checksum(), Params::default().checksum());
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(matches!(
            Params::from_json(r#"{"game":{"tick_offset":0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Params::from_json(r#"{"global":{"num_teams":0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Params::from_json("not json"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn derived_configs_follow_params() {
        let params = Params::from_json(
            r#"{"game":{"simrate":20,"tick_offset":3},"network":{"ready_timeout_ms":250}}"#,
        )
        .unwrap();
        let lockstep = params.lockstep_config();
        assert_eq!(lockstep.tick_rate_hz, 20.0);
        assert_eq!(lockstep.tick_offset, 3);
        assert_eq!(lockstep.ready_timeout, Some(Duration::from_millis(250)));

        let client = params.client_config("ana", [0.0, 1.0, 0.0]);
        assert_eq!(client.params_checksum, params.checksum());
        assert_eq!(client.tick_offset, 3);
    }

    #[test]
    fn load_reads_file_and_map() {
        let dir = std::env::temp_dir().join(format!("skirmish-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let params_path = dir.join("params.json");
        fs::write(&params_path, r#"{"game":{"version":"9"}}"#).unwrap();
        let params = Params::load(&params_path).unwrap();
        assert_eq!(params.game.version, "9");
        assert_eq!(params.file_checksum, Some(checksum_bytes(br#"{"game":{"version":"9"}}"#)));

        fs::write(dir.join("canyon.map"), r#"{"name":"canyon","max_players":2}"#).unwrap();
        let map = load_map(&dir, "canyon").unwrap();
        assert_eq!(map.max_players, Some(2));

        assert!(matches!(load_map(&dir, "missing"), Err(ConfigError::Io { .. })));
        let _ = fs::remove_dir_all(&dir);
    }
}
