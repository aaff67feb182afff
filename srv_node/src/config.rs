use std::{fs::File, io::BufReader, net::SocketAddr, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Error;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:7411";

/// Settings shared by the server and client nodes, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Address the server listens on and the client connects to.
    pub address: SocketAddr,
    /// Requests a responder buffers before senders see a full queue.
    pub queue_depth: usize,
    pub poll_interval_ms: u64,
    /// Waits for the service forever when unset.
    pub availability_timeout_ms: Option<u64>,
    pub reconnect_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 7411)),
            queue_depth: 10,
            poll_interval_ms: 1000,
            availability_timeout_ms: None,
            reconnect_interval_ms: 500,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Reads `path` if given, otherwise warns and falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                warn!("No config file specified, default settings will be used.");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.queue_depth == 0 {
            return Err(Error::Config {
                message: "queue_depth must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config {
                message: "poll_interval_ms must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn availability_timeout(&self) -> Option<Duration> {
        self.availability_timeout_ms.map(Duration::from_millis)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_address() {
        assert_eq!(
            NodeConfig::default().address,
            DEFAULT_ADDRESS.parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(r#"{ "address": "0.0.0.0:9000", "availability_timeout_ms": 2500 }"#);
        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.address, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.availability_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.queue_depth, 10);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_key_rejected() {
        let file = write_config(r#"{ "scenario_path": "/tmp" }"#);
        assert!(matches!(
            NodeConfig::from_file(file.path()),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NodeConfig::load(Some(dir.path().join("missing.json").as_path())),
            Err(Error::Io(_))
        ));
        assert_eq!(NodeConfig::load(None).unwrap(), NodeConfig::default());
    }

    #[test]
    fn test_validate() {
        let config = NodeConfig {
            queue_depth: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
        let config = NodeConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }
}
