//! On-disk layout of a stored session.

use ds_core::error::{DsError, Result};
use ds_core::record::{Attributes, SessionRecord};
use serde::{Deserialize, Serialize};

/// File extension of a session document.
pub const SESSION_EXTENSION: &str = "json";

/// One session document as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSession {
    pub session_id: String,
    /// Fingerprint of `attributes` at write time, used to skip unchanged updates.
    pub fingerprint: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub max_inactive_interval_secs: i32,
}

impl StoredSession {
    pub fn from_record(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id().to_string(),
            fingerprint: record.fingerprint(),
            attributes: record.attributes().clone(),
            created_at: record.created_at(),
            last_accessed_at: record.last_accessed_at(),
            max_inactive_interval_secs: record.max_inactive_interval_secs(),
        }
    }

    /// Rebuild the record; anything read back from disk is no longer new.
    pub fn into_record(self) -> SessionRecord {
        SessionRecord::new(
            self.session_id,
            Some(self.attributes),
            self.created_at,
            self.last_accessed_at,
            self.max_inactive_interval_secs,
        )
    }
}

/// Session ids double as file names, so only `[A-Za-z0-9._-]` is accepted.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let well_formed = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && session_id.len() <= 255
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if well_formed {
        Ok(())
    } else {
        Err(DsError::InvalidSessionId(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_ids() {
        for id in ["abc", "2f1c-44aa", "A.B_c-9", "0"] {
            assert!(validate_session_id(id).is_ok(), "{id}");
        }
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["", ".", "..", "a/b", "a\\b", "x y", "caf\u{e9}"] {
            assert!(matches!(validate_session_id(id), Err(DsError::InvalidSessionId(_))), "{id}");
        }
        assert!(validate_session_id(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_record_conversion() {
        let record = SessionRecord::create_with_id("s1", 900).with_attribute("cart", json!([1, 2]));
        let stored = StoredSession::from_record(&record);
        assert_eq!(stored.fingerprint, record.fingerprint());
        let back = stored.into_record();
        assert!(!back.is_new());
        assert_eq!(back.attributes(), record.attributes());
        assert_eq!(back.created_at(), record.created_at());
        assert_eq!(back.max_inactive_interval_secs(), 900);
    }
}
