//! Assemble a chain from configuration.

use crate::chain::ChainPersister;
use crate::executor::TaskExecutor;
use ds_core::config::{BackendKind, SessionStoreConfig};
use ds_core::error::Result;
use ds_persist::memory::InMemoryPersister;
use ds_persist::traits::SharedPersister;
use ds_storage::FilePersister;
use std::sync::Arc;
use tracing::info;

/// Build the configured backends, in order, behind a chain running on the current runtime.
pub async fn build_chain(config: &SessionStoreConfig) -> Result<ChainPersister> {
    config.chain.validate()?;

    let mut executor = TaskExecutor::current()?;
    if let Some(max) = config.chain.max_in_flight {
        executor = executor.with_max_in_flight(max);
    }

    let mut persisters: Vec<SharedPersister> = Vec::with_capacity(config.chain.backends.len());
    for kind in &config.chain.backends {
        let persister: SharedPersister = match kind {
            BackendKind::Memory => Arc::new(InMemoryPersister::from_config(&config.memory)),
            BackendKind::File => Arc::new(FilePersister::from_config(&config.file).await?),
        };
        persisters.push(persister);
    }

    let chain = ChainPersister::with_persisters(executor, persisters);
    chain.set_wait_budget(config.chain.wait_budget());
    chain.set_retry_timed_out_writes(config.chain.retry_timed_out_writes);
    info!(
        backends = ?config.chain.backends,
        budget = %config.chain.wait_budget(),
        max_in_flight = ?config.chain.max_in_flight,
        "built persister chain"
    );
    Ok(chain)
}
