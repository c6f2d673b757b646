use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Error, Result, BLOCK_SIZE, DEFAULT_PORT, PEER_ID_SIZE};

const PEER_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Peer identifier, chosen by each peer for itself at start-up
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_SIZE]);

impl PeerId {
    /// Generates a new random peer ID
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; PEER_ID_SIZE];
        for byte in bytes.iter_mut() {
            *byte = PEER_ID_ALPHABET[rng.gen_range(0..PEER_ID_ALPHABET.len())];
        }
        PeerId(bytes)
    }

    /// Accepts raw wire bytes if they are printable ASCII
    pub fn from_bytes(bytes: [u8; PEER_ID_SIZE]) -> Option<Self> {
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            Some(PeerId(bytes))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // from_bytes and random only admit ASCII
        std::str::from_utf8(&self.0).unwrap_or("????????????????????")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.as_str())
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; PEER_ID_SIZE] = s
            .as_bytes()
            .try_into()
            .map_err(|_| Error::invalid_input(format!("peer id must be {} characters", PEER_ID_SIZE)))?;
        PeerId::from_bytes(bytes)
            .ok_or_else(|| Error::invalid_input("peer id must be printable ASCII"))
    }
}

/// Configuration for a lanchat node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// UDP port every peer listens on
    pub port: u16,
    /// Local address to bind to
    pub bind_ip: IpAddr,
    /// Address used for LAN-wide messages
    pub broadcast_ip: Ipv4Addr,
    /// Group joined when multicast mode is on
    pub multicast_group: Option<Ipv4Addr>,
    /// Display name announced to other peers
    pub nickname: String,
    /// Where received files are written
    pub download_dir: PathBuf,
    /// Size of the blocks files are served in
    pub block_size: u32,
    /// Silence after which a peer gets pinged
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub alive_timeout: Duration,
    /// Watchdog period
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub watchdog_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: Ipv4Addr::BROADCAST,
            multicast_group: None,
            nickname: String::new(),
            download_dir: PathBuf::from("."),
            block_size: BLOCK_SIZE as u32,
            alive_timeout: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Default multicast group used by `-m`
    pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 76, 67);

    /// Loads the config file (explicit path, or the per-user default if present),
    /// then applies `LANCHAT_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Config::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("can't read {}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| Error::config(format!("can't parse {}: {}", path.display(), e)))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(port) = var("LANCHAT_PORT") {
            self.port = port
                .parse()
                .map_err(|_| Error::config(format!("LANCHAT_PORT is not a port: {}", port)))?;
        }
        if let Some(nickname) = var("LANCHAT_NICKNAME") {
            self.nickname = nickname;
        }
        if let Some(dir) = var("LANCHAT_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(group) = var("LANCHAT_MULTICAST") {
            self.multicast_group = Some(group.parse().map_err(|_| {
                Error::config(format!("LANCHAT_MULTICAST is not an IPv4 address: {}", group))
            })?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size as usize > BLOCK_SIZE {
            return Err(Error::config(format!(
                "block_size must be between 1 and {}",
                BLOCK_SIZE
            )));
        }
        if let Some(group) = self.multicast_group {
            if !group.is_multicast() {
                return Err(Error::config(format!("{} is not a multicast address", group)));
            }
        }
        if self.watchdog_interval.is_zero() {
            return Err(Error::config("watchdog_interval must be positive"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.broadcast_ip), self.port)
    }

    pub fn multicast_addr(&self) -> Option<SocketAddr> {
        self.multicast_group
            .map(|group| SocketAddr::new(IpAddr::V4(group), self.port))
    }
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/lanchat/config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_peer_id_random() {
        let id1 = PeerId::random();
        let id2 = PeerId::random();
        assert_ne!(id1, id2);
        assert!(id1.as_str().bytes().all(|b| PEER_ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_peer_id_parse() {
        let id = PeerId::random();
        let parsed: PeerId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("short".parse::<PeerId>().is_err());
        assert!(PeerId::from_bytes([0u8; PEER_ID_SIZE]).is_none());
    }

    #[test]
    fn test_config_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            port = 40000
            nickname = "alice"
            alive_timeout = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 40000);
        assert_eq!(config.nickname, "alice");
        assert_eq!(config.alive_timeout, Duration::from_millis(2500));
        assert_eq!(config.block_size as usize, BLOCK_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        assert!(toml::from_str::<Config>("colour = \"red\"").is_err());
    }

    #[test]
    fn test_config_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LANCHAT_PORT", "41000"),
            ("LANCHAT_NICKNAME", "bob"),
            ("LANCHAT_MULTICAST", "239.1.2.3"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.port, 41000);
        assert_eq!(config.nickname, "bob");
        assert_eq!(
            config.multicast_addr(),
            Some("239.1.2.3:41000".parse().unwrap())
        );

        let mut config = Config::default();
        assert!(config
            .apply_env(|key| (key == "LANCHAT_PORT").then(|| "nope".to_string()))
            .is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.block_size = 0;
        assert!(config.validate().is_err());
        config.block_size = BLOCK_SIZE as u32 + 1;
        assert!(config.validate().is_err());
        config.block_size = 10;
        config.multicast_group = Some(Ipv4Addr::new(10, 0, 0, 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_addresses() {
        let config = Config::default();
        assert_eq!(config.broadcast_addr(), "255.255.255.255:54321".parse().unwrap());
        assert_eq!(config.bind_addr(), "0.0.0.0:54321".parse().unwrap());
        assert!(config.multicast_addr().is_none());
    }
}
