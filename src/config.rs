use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::quorum::QuorumCalculator;
use crate::retry::RetryPolicy;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QuorumSettings {
    pub phase1: usize,
    pub phase2: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaxosConfig {
    pub nodes: usize,
    /// Majority for both phases when absent.
    pub quorum: Option<QuorumSettings>,
    pub rpc_timeout_ms: u64,
    pub ping_timeout_ms: u64,
    pub round_floor: u64,
    pub retry: RetryPolicy,
    /// Acceptor records are kept in memory when absent.
    pub data_dir: Option<PathBuf>,
}

impl Default for PaxosConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            quorum: None,
            rpc_timeout_ms: 500,
            ping_timeout_ms: 200,
            round_floor: 0,
            retry: RetryPolicy::default(),
            data_dir: None,
        }
    }
}

impl PaxosConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: PaxosConfig = serde_json::from_str(&data)?;
        config.quorum_calculator()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn quorum_calculator(&self) -> Result<QuorumCalculator> {
        match self.quorum {
            Some(QuorumSettings { phase1, phase2 }) => {
                QuorumCalculator::new(self.nodes, phase1, phase2)
            }
            None => QuorumCalculator::majority(self.nodes),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::quorum::Quorum;

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paxos.json");
        std::fs::write(&path, r#"{ "nodes": 5, "quorum": { "phase1": 4, "phase2": 2 } }"#).unwrap();

        let config = PaxosConfig::load_from_file(&path).unwrap();
        assert_eq!(config.nodes, 5);
        assert_eq!(config.rpc_timeout(), Duration::from_millis(500));
        assert_eq!(config.retry, RetryPolicy::default());

        let quorum = config.quorum_calculator().unwrap();
        assert_eq!((quorum.prepare_quorum(), quorum.accept_quorum()), (4, 2));
    }

    #[test]
    fn unsafe_quorum_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paxos.json");
        std::fs::write(&path, r#"{ "nodes": 4, "quorum": { "phase1": 2, "phase2": 2 } }"#).unwrap();

        assert!(matches!(
            PaxosConfig::load_from_file(&path),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paxos.json");
        let config = PaxosConfig {
            data_dir: Some(dir.path().join("data")),
            ..PaxosConfig::default()
        };

        config.save_to_file(&path).unwrap();
        assert_eq!(PaxosConfig::load_from_file(&path).unwrap(), config);
    }
}
