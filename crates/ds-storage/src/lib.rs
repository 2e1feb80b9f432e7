//! Durable session storage on the local filesystem.

pub mod file_store;
pub mod schema;

pub use file_store::FilePersister;
pub use schema::{validate_session_id, StoredSession};
