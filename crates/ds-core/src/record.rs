use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Attribute map of a session, ordered by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Immutable snapshot of one session.
///
/// A record never changes after construction: the `with_*`/`touched`/`stored`
/// helpers consume it and hand back a new record. An empty attribute map is a
/// real session with no attributes; a missing session is `Option::None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    session_id: String,
    #[serde(default)]
    attributes: Attributes,
    created_at: i64,
    last_accessed_at: i64,
    max_inactive_interval_secs: i32,
    #[serde(default)]
    is_new: bool,
}

impl SessionRecord {
    /// Rebuild a record that already exists in some store.
    pub fn new(
        session_id: impl Into<String>,
        attributes: Option<Attributes>,
        created_at: i64,
        last_accessed_at: i64,
        max_inactive_interval_secs: i32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            attributes: attributes.unwrap_or_default(),
            created_at,
            last_accessed_at,
            max_inactive_interval_secs,
            is_new: false,
        }
    }

    /// Start a brand new session with a random id, stamped with the current time.
    pub fn create(max_inactive_interval_secs: i32) -> Self {
        Self::create_with_id(Uuid::new_v4().to_string(), max_inactive_interval_secs)
    }

    pub fn create_with_id(session_id: impl Into<String>, max_inactive_interval_secs: i32) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            session_id: session_id.into(),
            attributes: Attributes::new(),
            created_at: now,
            last_accessed_at: now,
            max_inactive_interval_secs,
            is_new: true,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn last_accessed_at(&self) -> i64 {
        self.last_accessed_at
    }

    pub fn max_inactive_interval_secs(&self) -> i32 {
        self.max_inactive_interval_secs
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn without_attribute(mut self, name: &str) -> Self {
        self.attributes.remove(name);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_max_inactive_interval(mut self, secs: i32) -> Self {
        self.max_inactive_interval_secs = secs;
        self
    }

    /// Same session, last accessed at `at` (epoch millis).
    pub fn touched(mut self, at: i64) -> Self {
        self.last_accessed_at = at;
        self
    }

    /// Same session, flagged as already written to durable storage.
    pub fn stored(mut self) -> Self {
        self.is_new = false;
        self
    }

    /// Hex SHA-256 of the canonical JSON encoding of the attributes.
    ///
    /// Two records with equal attribute maps share a fingerprint regardless of
    /// their timestamps, which is what change detection keys on.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.attributes).unwrap_or_default();
        format!("{:x}", Sha256::digest(&bytes))
    }

    /// Whether the session idled longer than its inactivity window as of `now_ms`.
    /// A non-positive window never expires.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        if self.max_inactive_interval_secs <= 0 {
            return false;
        }
        now_ms - self.last_accessed_at > i64::from(self.max_inactive_interval_secs) * 1000
    }
}

impl fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionRecord[{}]", self.session_id)
    }
}
