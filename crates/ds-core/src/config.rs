use crate::error::{DsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    pub chain: ChainConfig,
    pub memory: MemoryConfig,
    pub file: FileStoreConfig,
}

impl SessionStoreConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }
}

/// Which backend fills a slot of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Backends in priority order.
    pub backends: Vec<BackendKind>,
    /// Seconds to wait on each backend call. `0` waits forever; negative values count as `0`.
    pub wait_budget_secs: i64,
    /// Give writes that overran the budget one more bounded wait before abandoning them.
    pub retry_timed_out_writes: bool,
    /// Upper bound on backend calls running at once. `None` leaves the pool unbounded.
    pub max_in_flight: Option<usize>,
}

impl ChainConfig {
    pub fn wait_budget(&self) -> WaitBudget {
        WaitBudget::from_secs(self.wait_budget_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == Some(0) {
            return Err(DsError::InvalidConfig("max_in_flight must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::Memory, BackendKind::File],
            wait_budget_secs: 20,
            retry_timed_out_writes: true,
            max_in_flight: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_entries: usize,
    pub expire_after_access_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_entries: 100, expire_after_access_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    pub root: PathBuf,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self { root: PathBuf::from("sessions") }
    }
}

/// How long the chain waits on a single backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBudget {
    Bounded(Duration),
    Unbounded,
}

impl WaitBudget {
    pub fn from_secs(secs: i64) -> Self {
        if secs <= 0 {
            WaitBudget::Unbounded
        } else {
            WaitBudget::Bounded(Duration::from_secs(secs as u64))
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            WaitBudget::Bounded(d) => Some(*d),
            WaitBudget::Unbounded => None,
        }
    }

    /// Window for the second wait on a write that overran: one second less
    /// than the budget, never below one second.
    pub fn grace(&self) -> WaitBudget {
        match self {
            WaitBudget::Bounded(d) => {
                let second = Duration::from_secs(1);
                WaitBudget::Bounded(d.saturating_sub(second).max(second))
            }
            WaitBudget::Unbounded => WaitBudget::Unbounded,
        }
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        WaitBudget::Bounded(Duration::from_secs(20))
    }
}

impl From<Duration> for WaitBudget {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            WaitBudget::Unbounded
        } else {
            WaitBudget::Bounded(d)
        }
    }
}

impl fmt::Display for WaitBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitBudget::Bounded(d) => write!(f, "{d:?}"),
            WaitBudget::Unbounded => write!(f, "unbounded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SessionStoreConfig::default();
        assert_eq!(cfg.chain.backends, vec![BackendKind::Memory, BackendKind::File]);
        assert_eq!(cfg.chain.wait_budget(), WaitBudget::Bounded(Duration::from_secs(20)));
        assert!(cfg.chain.retry_timed_out_writes);
        assert_eq!(cfg.memory.max_entries, 100);
        assert_eq!(cfg.memory.expire_after_access_secs, 60);
        assert_eq!(cfg.file.root, PathBuf::from("sessions"));
    }

    #[test]
    fn test_zero_and_negative_budget_unbounded() {
        assert_eq!(WaitBudget::from_secs(0), WaitBudget::Unbounded);
        assert_eq!(WaitBudget::from_secs(-5), WaitBudget::Unbounded);
        assert_eq!(WaitBudget::from(Duration::ZERO), WaitBudget::Unbounded);
    }

    #[test]
    fn test_grace_window() {
        assert_eq!(
            WaitBudget::from_secs(20).grace(),
            WaitBudget::Bounded(Duration::from_secs(19))
        );
        assert_eq!(
            WaitBudget::from_secs(1).grace(),
            WaitBudget::Bounded(Duration::from_secs(1))
        );
        assert_eq!(
            WaitBudget::Bounded(Duration::from_millis(300)).grace(),
            WaitBudget::Bounded(Duration::from_secs(1))
        );
        assert_eq!(WaitBudget::Unbounded.grace(), WaitBudget::Unbounded);
    }

    #[test]
    fn test_partial_json() {
        let cfg = SessionStoreConfig::from_json(
            r#"{"chain": {"backends": ["file"], "wait_budget_secs": 3}}"#,
        )
        .unwrap();
        assert_eq!(cfg.chain.backends, vec![BackendKind::File]);
        assert_eq!(cfg.chain.wait_budget_secs, 3);
        assert!(cfg.chain.retry_timed_out_writes);
        assert_eq!(cfg.memory.max_entries, 100);
    }

    #[test]
    fn test_bad_json() {
        let err = SessionStoreConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, DsError::Serialization(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"memory": {"max_entries": 7}}"#).unwrap();
        let cfg = SessionStoreConfig::load(&path).unwrap();
        assert_eq!(cfg.memory.max_entries, 7);
    }

    #[test]
    fn test_validate_max_in_flight() {
        let mut cfg = ChainConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.max_in_flight = Some(0);
        assert!(matches!(cfg.validate(), Err(DsError::InvalidConfig(_))));
    }

    #[test]
    fn test_budget_display() {
        assert_eq!(WaitBudget::from_secs(2).to_string(), "2s");
        assert_eq!(WaitBudget::Unbounded.to_string(), "unbounded");
    }
}
