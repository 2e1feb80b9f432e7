//! Chain coordinator: runs one logical persister operation against an
//! ordered list of backends, broadcasting writes and racing reads.

pub mod builder;
pub mod chain;
pub mod executor;
pub mod lookahead;

pub use builder::build_chain;
pub use chain::ChainPersister;
pub use executor::{BackendCall, CallOutcome, CallState, TaskExecutor};
pub use lookahead::{LookAhead, LOOKAHEAD_DEPTH};
pub use tokio_util::sync::CancellationToken;
