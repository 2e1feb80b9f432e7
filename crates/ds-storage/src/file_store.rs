//! File-backed durable persister.
//!
//! Every session lives in its own JSON document `<root>/<session_id>.json`.
//! Writes land in a uniquely named temp file first and are then linked or
//! renamed into place, so readers never observe a half-written document.

use crate::schema::{validate_session_id, StoredSession, SESSION_EXTENSION};
use async_trait::async_trait;
use ds_core::config::FileStoreConfig;
use ds_core::error::{DsError, Result};
use ds_core::record::SessionRecord;
use ds_persist::traits::{Persister, SessionIds};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

pub struct FilePersister {
    name: String,
    root: PathBuf,
}

impl FilePersister {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| DsError::Storage(format!("mkdir {}: {e}", root.display())))?;
        info!(root = %root.display(), "opened file session store");
        Ok(Self { name: "file".into(), root })
    }

    pub async fn from_config(config: &FileStoreConfig) -> Result<Self> {
        Self::open(config.root.clone()).await
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(format!("{session_id}.{SESSION_EXTENSION}")))
    }

    fn temp_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!(".{session_id}.{}.tmp", Uuid::new_v4().simple()))
    }

    async fn read_stored(&self, path: &Path) -> Result<Option<StoredSession>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DsError::Storage(format!("read {}: {e}", path.display()))),
        }
    }

    async fn write_temp(&self, stored: &StoredSession) -> Result<PathBuf> {
        let tmp = self.temp_path(&stored.session_id);
        let json = serde_json::to_vec_pretty(stored)?;
        fs::write(&tmp, json)
            .await
            .map_err(|e| DsError::Storage(format!("write {}: {e}", tmp.display())))?;
        Ok(tmp)
    }

    /// First write of a new session. Fails if a document already exists.
    async fn insert(&self, path: &Path, stored: &StoredSession) -> Result<()> {
        let tmp = self.write_temp(stored).await?;
        let linked = fs::hard_link(&tmp, path).await;
        let _ = fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(DsError::DuplicateSession(stored.session_id.clone()))
            }
            Err(e) => Err(DsError::Storage(format!("insert {}: {e}", path.display()))),
        }
    }

    /// Rewrite an existing session, unless its attributes did not change.
    async fn update(&self, path: &Path, stored: &StoredSession) -> Result<()> {
        if let Some(current) = self.read_stored(path).await? {
            if current.fingerprint == stored.fingerprint {
                debug!(backend = %self.name, session_id = %stored.session_id, "attributes unchanged, skipping write");
                return Ok(());
            }
        }
        let tmp = self.write_temp(stored).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(DsError::Storage(format!("replace {}: {e}", path.display())));
        }
        Ok(())
    }
}

#[async_trait]
impl Persister for FilePersister {
    fn name(&self) -> &str {
        &self.name
    }

    async fn persist(&self, record: &SessionRecord) -> Result<()> {
        let path = self.session_path(record.session_id())?;
        let stored = StoredSession::from_record(record);
        if record.is_new() {
            self.insert(&path, &stored).await
        } else {
            self.update(&path, &stored).await
        }
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let path = self.session_path(session_id)?;
        let stored = self.read_stored(&path).await?;
        if stored.is_none() {
            debug!(backend = %self.name, session_id, "no stored session");
        }
        Ok(stored.map(StoredSession::into_record))
    }

    async fn invalidate(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DsError::Storage(format!("rm {}: {e}", path.display()))),
        }
    }

    async fn is_valid(&self, session_id: &str) -> Result<bool> {
        let path = self.session_path(session_id)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| DsError::Storage(format!("stat {}: {e}", path.display())))
    }

    async fn list_ids(&self) -> Result<SessionIds> {
        let mut ids = Vec::new();
        let mut rd = fs::read_dir(&self.root)
            .await
            .map_err(|e| DsError::Storage(format!("ls {}: {e}", self.root.display())))?;
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| DsError::Storage(format!("ls entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_session_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(Box::new(ids.into_iter()))
    }

    async fn release_resources(&self) -> Result<()> {
        debug!(backend = %self.name, "nothing to release for file store");
        Ok(())
    }
}
