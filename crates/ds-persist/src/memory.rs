use crate::traits::{Persister, SessionIds};
use async_trait::async_trait;
use ds_core::config::MemoryConfig;
use ds_core::error::Result;
use ds_core::record::SessionRecord;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    record: SessionRecord,
    last_access: Instant,
}

/// Fast, volatile session cache.
///
/// Entries expire once they have gone `expire_after_access` without being
/// read or written, and the least recently used entry is evicted when the
/// cache grows past `max_entries`. Losing sessions is expected here; a durable
/// backend further down the chain is what keeps them.
pub struct InMemoryPersister {
    name: String,
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    /// Zero disables expiry.
    expire_after_access: Duration,
}

impl InMemoryPersister {
    pub fn new(max_entries: usize, expire_after_access: Duration) -> Self {
        Self {
            name: "memory".into(),
            entries: Mutex::new(HashMap::new()),
            max_entries,
            expire_after_access,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.expire_after_access_secs))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of entries currently held, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        !self.expire_after_access.is_zero()
            && now.saturating_duration_since(entry.last_access) >= self.expire_after_access
    }

    fn evict_overflow(&self, entries: &mut HashMap<String, CacheEntry>, now: Instant) {
        entries.retain(|_, e| !self.is_expired(e, now));
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    debug!(backend = %self.name, session_id = %key, "evicting least recently used session");
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for InMemoryPersister {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

#[async_trait]
impl Persister for InMemoryPersister {
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        if self.max_entries == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.insert(
            record.session_id().to_string(),
            CacheEntry { record: record.clone(), last_access: now },
        );
        if entries.len() > self.max_entries {
            self.evict_overflow(&mut entries, now);
        }
        Ok(())
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(session_id) {
            None => Ok(None),
            Some(entry) if !self.is_expired(entry, now) => {
                entry.last_access = now;
                Ok(Some(entry.record.clone()))
            }
            Some(_) => {
                debug!(backend = %self.name, session_id, "dropping expired session");
                entries.remove(session_id);
                Ok(None)
            }
        }
    }

    async fn invalidate(&self, session_id: &str) -> Result<()> {
        self.entries.lock().remove(session_id);
        Ok(())
    }

    async fn is_valid(&self, session_id: &str) -> Result<bool> {
        Ok(self.fetch(session_id).await?.is_some())
    }

    async fn list_ids(&self) -> Result<SessionIds> {
        let now = Instant::now();
        let ids: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| !self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(Box::new(ids.into_iter()))
    }

    async fn release_resources(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        debug!(backend = %self.name, dropped = entries.len(), "clearing session cache");
        entries.clear();
        Ok(())
    }
}
