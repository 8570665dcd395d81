use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use parley_db::PoolSettings;

/// Where channel existence and membership are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    /// `channels` / `channel_members` tables on each shard
    #[default]
    Shard,
    /// In-process maps, empty at startup
    Memory,
}

impl FromStr for DirectoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "shard" => Ok(Self::Shard),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown directory kind '{}'", other)),
        }
    }
}

/// A channel loaded into the memory directory at startup. Only read from the
/// JSON config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSeed {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_channel_type")]
    pub channel_type: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub members: Vec<String>,
}

fn default_channel_type() -> String {
    "public".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub host: String,
    pub port: u16,
    /// Explicit shard files, in shard-index order. Overrides `shard_count`.
    pub shards: Vec<PathBuf>,
    pub shard_count: usize,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    pub directory: DirectoryKind,
    pub event_buffer: usize,
    /// Channels and members for the `memory` directory.
    pub channels: Vec<ChannelSeed>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8081,
            shards: Vec::new(),
            shard_count: 3,
            data_dir: "./data".into(),
            max_connections: 8,
            acquire_timeout_ms: 4000,
            query_timeout_ms: 5000,
            busy_timeout_ms: 5000,
            directory: DirectoryKind::Shard,
            event_buffer: 1024,
            channels: Vec::new(),
        }
    }
}

impl ChatConfig {
    /// `.env`, then the JSON file named by `PARLEY_CONFIG_FILE`, then
    /// `PARLEY_*` environment overrides.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match std::env::var("PARLEY_CONFIG_FILE") {
            Ok(path) => Self::from_file(&PathBuf::from(path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `PARLEY_*` overrides read through `get`.
    pub fn apply_overrides<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("PARLEY_HOST") {
            self.host = v;
        }
        if let Some(v) = get("PARLEY_PORT") {
            self.port = parse("PARLEY_PORT", &v)?;
        }
        if let Some(v) = get("PARLEY_SHARDS") {
            self.shards = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(v) = get("PARLEY_SHARD_COUNT") {
            self.shard_count = parse("PARLEY_SHARD_COUNT", &v)?;
        }
        if let Some(v) = get("PARLEY_DATA_DIR") {
            self.data_dir = v.into();
        }
        if let Some(v) = get("PARLEY_MAX_CONNECTIONS") {
            self.max_connections = parse("PARLEY_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = get("PARLEY_ACQUIRE_TIMEOUT_MS") {
            self.acquire_timeout_ms = parse("PARLEY_ACQUIRE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("PARLEY_QUERY_TIMEOUT_MS") {
            self.query_timeout_ms = parse("PARLEY_QUERY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("PARLEY_BUSY_TIMEOUT_MS") {
            self.busy_timeout_ms = parse("PARLEY_BUSY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("PARLEY_DIRECTORY") {
            self.directory = v.parse()?;
        }
        if let Some(v) = get("PARLEY_EVENT_BUFFER") {
            self.event_buffer = parse("PARLEY_EVENT_BUFFER", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let paths = self.shard_paths();
        if paths.is_empty() {
            bail!("at least one shard is required");
        }
        let unique: HashSet<&PathBuf> = paths.iter().collect();
        if unique.len() != paths.len() {
            bail!("shard paths must be distinct");
        }
        if self.max_connections == 0 {
            bail!("max_connections must be positive");
        }
        if self.acquire_timeout_ms == 0 || self.query_timeout_ms == 0 {
            bail!("pool timeouts must be positive");
        }
        if self.event_buffer == 0 {
            bail!("event_buffer must be positive");
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.id.trim().is_empty() {
                bail!("seeded channels need an id");
            }
            if !seen.insert(channel.id.as_str()) {
                bail!("channel '{}' is seeded twice", channel.id);
            }
        }
        Ok(())
    }

    /// Shard files in index order. The order and count must not change
    /// between restarts or channels will route to different shards.
    pub fn shard_paths(&self) -> Vec<PathBuf> {
        if !self.shards.is_empty() {
            return self.shards.clone();
        }
        (0..self.shard_count)
            .map(|i| self.data_dir.join(format!("shard-{}.db", i)))
            .collect()
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("invalid {}='{}': {}", key, value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ChatConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.shard_paths(),
            vec![
                PathBuf::from("./data/shard-0.db"),
                PathBuf::from("./data/shard-1.db"),
                PathBuf::from("./data/shard-2.db"),
            ]
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ChatConfig::default();
        config
            .apply_overrides(env(&[
                ("PARLEY_PORT", "9000"),
                ("PARLEY_SHARDS", "a.db, b.db"),
                ("PARLEY_DIRECTORY", "memory"),
                ("PARLEY_QUERY_TIMEOUT_MS", "250"),
            ]))
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.shard_paths(), vec![PathBuf::from("a.db"), PathBuf::from("b.db")]);
        assert_eq!(config.directory, DirectoryKind::Memory);
        assert_eq!(config.pool_settings().query_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_numbers_are_reported() {
        let mut config = ChatConfig::default();
        let err = config
            .apply_overrides(env(&[("PARLEY_SHARD_COUNT", "three")]))
            .unwrap_err();
        assert!(err.to_string().contains("PARLEY_SHARD_COUNT"));
    }

    #[test]
    fn validation_rejects_bad_shapes() {
        let zero = ChatConfig {
            shard_count: 0,
            ..ChatConfig::default()
        };
        assert!(zero.validate().is_err());

        let dup = ChatConfig {
            shards: vec!["a.db".into(), "a.db".into()],
            ..ChatConfig::default()
        };
        assert!(dup.validate().is_err());

        let no_conns = ChatConfig {
            max_connections: 0,
            ..ChatConfig::default()
        };
        assert!(no_conns.validate().is_err());
    }

    #[test]
    fn channel_seeds_are_read_and_checked() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("parley.json");
        std::fs::write(
            &path,
            r#"{
                "directory": "memory",
                "channels": [{ "id": "C1", "name": "general", "members": ["U1", "U2"] }]
            }"#,
        )
        .unwrap();

        let config = ChatConfig::from_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.directory, DirectoryKind::Memory);
        assert_eq!(config.channels[0].channel_type, "public");
        assert_eq!(config.channels[0].members, vec!["U1", "U2"]);

        let mut dup = config.clone();
        dup.channels.push(config.channels[0].clone());
        assert!(dup.validate().is_err());
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("parley.json");
        std::fs::write(&path, r#"{ "port": 7000, "shard_count": 1 }"#).unwrap();

        let config = ChatConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.shard_paths().len(), 1);
        assert_eq!(config.max_connections, 8);
    }
}
