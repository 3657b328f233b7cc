//! Transactional commit: snapshot and write inside one storage transaction
//!
//! The document is located outside the transaction, then re-read inside it
//! by `_id` and the caller's filter together, so the snapshot and the write
//! observe the same state and a document that stopped matching is left
//! alone. Any failure between `start_transaction` and commit, or a miss on
//! the re-read, aborts the transaction.

use super::{single_id_filter, Plan, TransformContext, TransformOutcome, TransformSpec};
use shapedb_core::{
    document_id, Document, DocumentId, Error, Result, StorageError, Value, ID_FIELD,
};
use shapedb_storage::{FindOptions, Session, UpdateOptions};
use tracing::warn;

pub(super) async fn run(
    ctx: &TransformContext<'_>,
    filter: &Document,
    spec: &TransformSpec,
) -> Result<Option<TransformOutcome>> {
    let collection = ctx.registry.name();
    let Some(located) = ctx
        .store
        .find_one(collection, filter, &FindOptions::new())
        .await?
    else {
        return Ok(None);
    };
    let id = document_id(&located).ok_or_else(|| {
        Error::Storage(StorageError::Malformed(format!(
            "stored document in '{}' has no {}",
            collection, ID_FIELD
        )))
    })?;

    let mut session = ctx.store.start_session().await?;
    session.start_transaction().await?;

    let outcome = apply_in_transaction(ctx, session.as_mut(), filter, spec, id).await;
    match outcome {
        Ok(Some(outcome)) => {
            session.commit_transaction().await?;
            Ok(Some(outcome))
        }
        Ok(None) => {
            abort(session.as_mut(), collection, id).await;
            Ok(None)
        }
        Err(e) => {
            abort(session.as_mut(), collection, id).await;
            Err(e)
        }
    }
}

async fn abort(session: &mut dyn Session, collection: &str, id: DocumentId) {
    if let Err(e) = session.abort_transaction().await {
        warn!(collection = %collection, id = %id, error = %e, "Failed to abort transform transaction");
    }
}

/// `filter` restricted to one identity
fn pinned_filter(filter: &Document, id: DocumentId) -> Document {
    let mut pinned = Document::new();
    pinned.insert(
        "$and".to_string(),
        Value::Array(vec![
            Value::Object(filter.clone()),
            Value::Object(single_id_filter(id)),
        ]),
    );
    pinned
}

async fn apply_in_transaction(
    ctx: &TransformContext<'_>,
    session: &mut dyn Session,
    filter: &Document,
    spec: &TransformSpec,
    id: DocumentId,
) -> Result<Option<TransformOutcome>> {
    let collection = ctx.registry.name();
    let by_id = single_id_filter(id);
    let Some(stored) = session
        .find_one(collection, &pinned_filter(filter, id))
        .await?
    else {
        // Changed so it no longer matches: not a transform target any more.
        if session.find_one(collection, &by_id).await?.is_some() {
            return Ok(None);
        }
        return Err(Error::DocumentVanished {
            collection: collection.to_string(),
            id,
        });
    };

    let plan = Plan::build(ctx.registry, ctx.warnings, spec, &stored)?;
    if plan.patch.is_empty() {
        return Ok(Some(plan.unchanged()));
    }
    let result = session
        .update_one(collection, &by_id, &plan.patch, UpdateOptions::default())
        .await?;
    Ok(Some(plan.committed(result)))
}
