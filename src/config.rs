// src/config.rs

//! Loads and validates the toolkit's `anvil.conf`-style configuration (§6):
//! one `database::<uuid>::*` block per peer plus the `sys::database::*`
//! scalars and `sys::database::archive::*` archiver settings.

use crate::core::config_file::ConfigFile;
use crate::core::errors::{AnvilError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// Connection parameters for a single peer database (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: Option<String>,
    /// Ping timeout in seconds before attempting TCP connect. `0` disables
    /// the probe entirely (§4.A step 2).
    pub ping_timeout_s: u64,
}

/// `sys::database::*` scalars (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSysConfig {
    pub locking_reap_age: u64,
    pub log_transactions: bool,
    pub maximum_batch_size: usize,
    pub failed_connection_log_level: String,
}

impl Default for DatabaseSysConfig {
    fn default() -> Self {
        Self {
            locking_reap_age: 300,
            log_transactions: false,
            maximum_batch_size: 25_000,
            failed_connection_log_level: "warn".to_string(),
        }
    }
}

/// `sys::database::archive::*` scalars (§4.G).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub trigger: u64,
    pub count: u64,
    pub division: u64,
    pub directory: String,
    pub compress: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            trigger: 20_000,
            count: 10_000,
            division: 25_000,
            directory: "/usr/local/anvil/archives".to_string(),
            compress: true,
        }
    }
}

/// The fully-resolved, validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub peers: HashMap<Uuid, PeerConfig>,
    pub database: DatabaseSysConfig,
    pub archive: ArchiveConfig,
    pub heartbeat_file: String,
}

impl Config {
    /// Loads configuration from an `anvil.conf`-style file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = ConfigFile::load(path)?;
        Self::from_config_file(&file)
    }

    fn from_config_file(file: &ConfigFile) -> Result<Self> {
        let peers = parse_peers(file)?;

        let database = DatabaseSysConfig {
            locking_reap_age: parse_or_default(
                file.get("sys::database::locking_reap_age"),
                300,
            )?,
            log_transactions: file
                .get("sys::database::log_transactions")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
            maximum_batch_size: parse_or_default(
                file.get("sys::database::maximum_batch_size"),
                25_000,
            )?,
            failed_connection_log_level: file
                .get("sys::database::failed_connection_log_level")
                .unwrap_or("warn")
                .to_string(),
        };

        let defaults = ArchiveConfig::default();
        let archive = ArchiveConfig {
            trigger: parse_or_default(
                file.get("sys::database::archive::trigger"),
                defaults.trigger,
            )?,
            count: parse_or_default(file.get("sys::database::archive::count"), defaults.count)?,
            division: parse_or_default(
                file.get("sys::database::archive::division"),
                defaults.division,
            )?,
            directory: file
                .get("sys::database::archive::directory")
                .unwrap_or(&defaults.directory)
                .to_string(),
            compress: file
                .get("sys::database::archive::compress")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(defaults.compress),
        };

        let heartbeat_file = file
            .get("sys::database::locking_heartbeat_file")
            .unwrap_or("/tmp/anvil.lock_heartbeat")
            .to_string();

        let config = Config {
            peers,
            database,
            archive,
            heartbeat_file,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(AnvilError::Config(
                "at least one database::<uuid>::* peer block is required".to_string(),
            ));
        }
        for (uuid, peer) in &self.peers {
            if peer.host.trim().is_empty() {
                return Err(AnvilError::Config(format!(
                    "peer '{uuid}' is missing a host"
                )));
            }
            if peer.port == 0 {
                return Err(AnvilError::Config(format!(
                    "peer '{uuid}' has an invalid port"
                )));
            }
            if peer.name.trim().is_empty() {
                return Err(AnvilError::Config(format!(
                    "peer '{uuid}' is missing a database name"
                )));
            }
            if peer.user.trim().is_empty() {
                return Err(AnvilError::Config(format!(
                    "peer '{uuid}' is missing a database user"
                )));
            }
        }
        if self.database.maximum_batch_size == 0 {
            return Err(AnvilError::Config(
                "sys::database::maximum_batch_size cannot be 0".to_string(),
            ));
        }
        if self.archive.trigger > 0 && self.archive.count >= self.archive.trigger {
            return Err(AnvilError::Config(
                "sys::database::archive::count must be less than trigger".to_string(),
            ));
        }
        if !self.archive.directory.starts_with('/') {
            return Err(AnvilError::Config(
                "sys::database::archive::directory must be an absolute path".to_string(),
            ));
        }
        Ok(())
    }
}

/// Deduplicates `database::<uuid>::*` blocks by `host:port`, logging and
/// skipping repeats (§4.A step 1).
fn parse_peers(file: &ConfigFile) -> Result<HashMap<Uuid, PeerConfig>> {
    let mut uuids: Vec<Uuid> = Vec::new();
    for (key, _) in file.keys_with_prefix("database::") {
        // key looks like "database::<uuid>::host"
        let mut parts = key.splitn(3, "::");
        let _ = parts.next(); // "database"
        if let Some(uuid_str) = parts.next()
            && let Ok(uuid) = Uuid::parse_str(uuid_str)
            && !uuids.contains(&uuid)
        {
            uuids.push(uuid);
        }
    }

    let mut seen_targets: Vec<String> = Vec::new();
    let mut peers = HashMap::new();
    for uuid in uuids {
        let prefix = format!("database::{uuid}::");
        let host = file
            .get(&format!("{prefix}host"))
            .ok_or_else(|| AnvilError::Config(format!("peer '{uuid}' is missing 'host'")))?
            .to_string();
        let port: u16 = file
            .get(&format!("{prefix}port"))
            .unwrap_or("5432")
            .parse()
            .map_err(|_| AnvilError::Config(format!("peer '{uuid}' has an invalid port")))?;
        let name = file
            .get(&format!("{prefix}name"))
            .unwrap_or("anvil")
            .to_string();
        let user = file
            .get(&format!("{prefix}user"))
            .unwrap_or("admin")
            .to_string();
        let password = file.get(&format!("{prefix}password")).map(String::from);
        let ping_timeout_s: u64 = parse_or_default(file.get(&format!("{prefix}ping")), 0)?;

        let target = format!("{host}:{port}");
        if seen_targets.contains(&target) {
            tracing::warn!(peer = %uuid, target = %target, "duplicate peer target, skipping");
            continue;
        }
        seen_targets.push(target);

        peers.insert(
            uuid,
            PeerConfig {
                host,
                port,
                name,
                user,
                password,
                ping_timeout_s,
            },
        );
    }
    Ok(peers)
}

fn parse_or_default<T>(raw: Option<&str>, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match raw {
        None => Ok(default),
        Some(s) => {
            // Tolerate thousands separators, per §4.G "commas/decimals tolerated".
            let cleaned: String = s.chars().filter(|c| *c != ',').collect();
            cleaned
                .parse::<T>()
                .map_err(|_| AnvilError::Config(format!("invalid numeric value '{s}'")))
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(AnvilError::Config(format!(
            "expected a boolean value, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_file::ConfigFile;

    fn load(contents: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anvil.conf");
        std::fs::write(&path, contents).unwrap();
        let file = ConfigFile::load(&path)?;
        Config::from_config_file(&file)
    }

    const SAMPLE: &str = "\
        database::11111111-1111-1111-1111-111111111111::host = 10.0.0.1\n\
        database::11111111-1111-1111-1111-111111111111::port = 5432\n\
        database::11111111-1111-1111-1111-111111111111::name = anvil\n\
        database::11111111-1111-1111-1111-111111111111::user = admin\n\
        database::11111111-1111-1111-1111-111111111111::password = secret\n\
        sys::database::maximum_batch_size = 25000\n\
        sys::database::locking_reap_age = 300\n\
        sys::database::archive::trigger = 20000\n\
        sys::database::archive::count = 10000\n\
        sys::database::archive::directory = /usr/local/anvil/archives\n";

    #[test]
    fn parses_a_single_peer_block() {
        let config = load(SAMPLE).unwrap();
        assert_eq!(config.peers.len(), 1);
        let uuid = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let peer = &config.peers[&uuid];
        assert_eq!(peer.host, "10.0.0.1");
        assert_eq!(peer.port, 5432);
        assert_eq!(peer.password.as_deref(), Some("secret"));
    }

    #[test]
    fn tolerates_comma_separators_in_batch_size() {
        let contents = SAMPLE.replace(
            "sys::database::maximum_batch_size = 25000",
            "sys::database::maximum_batch_size = 25,000",
        );
        let config = load(&contents).unwrap();
        assert_eq!(config.database.maximum_batch_size, 25_000);
    }

    #[test]
    fn rejects_empty_peer_set() {
        assert!(load("sys::database::maximum_batch_size = 25000\n").is_err());
    }

    #[test]
    fn rejects_archive_count_gte_trigger() {
        let contents = SAMPLE.replace(
            "sys::database::archive::count = 10000",
            "sys::database::archive::count = 20000",
        );
        assert!(load(&contents).is_err());
    }

    #[test]
    fn rejects_relative_archive_directory() {
        let contents = SAMPLE.replace(
            "sys::database::archive::directory = /usr/local/anvil/archives",
            "sys::database::archive::directory = relative/path",
        );
        assert!(load(&contents).is_err());
    }
}
