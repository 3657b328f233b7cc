//! Transaction capability probe
//!
//! Runs at most once per facade: open a session, start a transaction,
//! insert a throwaway document, abort. Any failure along the way means the
//! deployment cannot run transactions and transforms fall back to the
//! optimistic strategy.

use shapedb_core::{doc, StorageResult};
use shapedb_storage::DocumentStore;
use tokio::sync::OnceCell;
use tracing::info;

/// Whether the storage deployment supports multi-document transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSupport {
    /// Not probed yet
    Unknown,
    /// Transactions work
    Supported,
    /// Transactions are unavailable
    Unsupported,
}

pub(crate) struct CapabilityProbe {
    collection: String,
    outcome: OnceCell<TransactionSupport>,
}

impl CapabilityProbe {
    pub(crate) fn new(collection: String) -> Self {
        CapabilityProbe {
            collection,
            outcome: OnceCell::new(),
        }
    }

    pub(crate) fn state(&self) -> TransactionSupport {
        self.outcome
            .get()
            .copied()
            .unwrap_or(TransactionSupport::Unknown)
    }

    /// Probe on first call; concurrent callers wait for the same probe
    pub(crate) async fn resolve(&self, store: &dyn DocumentStore) -> TransactionSupport {
        *self
            .outcome
            .get_or_init(|| probe(store, &self.collection))
            .await
    }
}

async fn probe(store: &dyn DocumentStore, collection: &str) -> TransactionSupport {
    match try_transaction(store, collection).await {
        Ok(()) => {
            info!("Storage supports transactions, transforms commit transactionally");
            TransactionSupport::Supported
        }
        Err(e) => {
            info!(reason = %e, "Storage transactions unavailable, transforms commit optimistically");
            TransactionSupport::Unsupported
        }
    }
}

async fn try_transaction(store: &dyn DocumentStore, collection: &str) -> StorageResult<()> {
    let mut session = store.start_session().await?;
    session.start_transaction().await?;
    session.insert_one(collection, doc! { "probe" => true }).await?;
    session.abort_transaction().await
}
