//! The persister capability shared by every session backend, plus the
//! in-process expiring cache backend.

pub mod memory;
pub mod traits;

pub use memory::InMemoryPersister;
pub use traits::{Persister, SessionIds, SharedPersister};
