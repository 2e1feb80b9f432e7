use async_trait::async_trait;
use ds_core::error::Result;
use ds_core::record::SessionRecord;
use std::sync::Arc;

/// Lazily consumed sequence of session ids.
pub type SessionIds = Box<dyn Iterator<Item = String> + Send>;

pub type SharedPersister = Arc<dyn Persister>;

/// A store that can hold session records.
///
/// Implementations must be safe to call from many tasks at once. None of the
/// methods may wait forever on their own account; callers that need a bound
/// (the chain) apply it from outside.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Store or replace the record keyed by its session id.
    async fn persist(&self, record: &SessionRecord) -> Result<()>;

    async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Remove the session and anything attached to it. Removing an unknown id is not an error.
    async fn invalidate(&self, session_id: &str) -> Result<()>;

    async fn is_valid(&self, session_id: &str) -> Result<bool>;

    async fn list_ids(&self) -> Result<SessionIds>;

    async fn release_resources(&self) -> Result<()>;

    /// Persist `record`, or invalidate the session when there is no record.
    async fn persist_or_invalidate(&self, session_id: &str, record: Option<&SessionRecord>) -> Result<()> {
        match record {
            Some(record) => self.persist(record).await,
            None => self.invalidate(session_id).await,
        }
    }
}
