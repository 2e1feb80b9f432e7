pub mod config;
pub mod error;
pub mod record;

pub use config::{BackendKind, ChainConfig, FileStoreConfig, MemoryConfig, SessionStoreConfig, WaitBudget};
pub use error::{DsError, Result};
pub use record::{Attributes, SessionRecord};
